//! Projection entities and the store contract the event router writes through.
//!
//! Duplicate delivery is part of the contract, not an accident of the backend:
//!
//! - **Creates** (`insert_*`) are insert-or-ignore keyed by the on-chain id
//!   (reviews: by the event key). They return `false` for a duplicate.
//! - **Set-style updates** (`update_*`) carry the event key. Every row
//!   remembers the key of the last event applied to it, and an update only
//!   applies when its key is strictly greater. A replayed older event is
//!   reported as [`UpdateOutcome::Stale`] and never reverts newer state.
//! - **Counters** (`credit_agent`) are read and added inside one store
//!   transaction with checked arithmetic, and deduplicated per event key so a
//!   replay never double counts while distinct credits commute.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IndexerError;
use crate::types::EventKey;

/// Reputation score given to a newly registered agent.
pub const BASELINE_REPUTATION: u64 = 50;

/// A token amount in base units (wei for an 18-decimal token).
pub type Amount = u128;

// ─── Bounty status ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BountyStatus {
    Open,
    Claimed,
    Submitted,
    Approved,
    Rejected,
    Disputed,
    Paid,
    Cancelled,
    Expired,
}

impl BountyStatus {
    pub const ALL: [BountyStatus; 9] = [
        Self::Open,
        Self::Claimed,
        Self::Submitted,
        Self::Approved,
        Self::Rejected,
        Self::Disputed,
        Self::Paid,
        Self::Cancelled,
        Self::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Claimed => "claimed",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Disputed => "disputed",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for BountyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BountyStatus {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| IndexerError::Storage(format!("unknown bounty status '{s}'")))
    }
}

// ─── Entities ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: u64,
    pub owner: Option<String>,
    pub wallet: Option<String>,
    pub token_uri: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub skills: Vec<String>,
    pub reputation_score: u64,
    pub completed_bounties: u64,
    pub total_earnings: Amount,
    /// Block timestamp of the creating event.
    pub registered_at: i64,
    /// Key of the last set-style event applied to this row.
    pub last_event: EventKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounty {
    pub id: u64,
    pub creator_id: Option<u64>,
    pub hunter_id: Option<u64>,
    pub reward: Option<Amount>,
    pub token: Option<String>,
    pub deadline: Option<i64>,
    pub metadata_uri: Option<String>,
    pub status: BountyStatus,
    pub submission_ref: Option<String>,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub submitted_at: Option<i64>,
    pub last_event: EventKey,
}

/// Append-only record of an approval. Identified by the approving event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub event: EventKey,
    pub bounty_id: u64,
    /// The bounty's hunter at approval time, if known.
    pub agent_id: Option<u64>,
    pub rating: Option<u8>,
    pub feedback_uri: Option<String>,
    pub created_at: i64,
}

// ─── Mutations ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAgent {
    pub id: u64,
    pub owner: Option<String>,
    pub token_uri: Option<String>,
    pub registered_at: i64,
}

impl NewAgent {
    /// An agent row with nothing but its id, used when a later event
    /// references an agent the projection has never seen.
    pub fn placeholder(id: u64, registered_at: i64) -> Self {
        Self {
            id,
            owner: None,
            token_uri: None,
            registered_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBounty {
    pub id: u64,
    pub creator_id: Option<u64>,
    pub reward: Option<Amount>,
    pub token: Option<String>,
    pub deadline: Option<i64>,
    pub metadata_uri: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentUpdate {
    Name(String),
    Description(String),
    Image(String),
    Skills(Vec<String>),
    Wallet(String),
    /// Absolute score, not a delta.
    Reputation(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BountyUpdate {
    Claimed { hunter_id: u64, at: i64 },
    Submitted { submission_ref: Option<String>, at: i64 },
    Status(BountyStatus),
}

/// Database-side additions to an agent's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credit {
    pub completed: u64,
    pub earnings: Amount,
}

impl Credit {
    pub fn earnings(amount: Amount) -> Self {
        Self {
            completed: 0,
            earnings: amount,
        }
    }

    pub fn completion(reward: Amount) -> Self {
        Self {
            completed: 1,
            earnings: reward,
        }
    }

    /// Counters after applying this credit to `(completed, earnings)`.
    ///
    /// Overflow is a storage error and must leave the row untouched.
    pub fn add_to(&self, completed: u64, earnings: Amount) -> Result<(u64, Amount), IndexerError> {
        match (
            completed.checked_add(self.completed),
            earnings.checked_add(self.earnings),
        ) {
            (Some(completed), Some(earnings)) => Ok((completed, earnings)),
            _ => Err(IndexerError::Storage(format!(
                "credit of {} completed / {} earnings overflows counters ({completed} / {earnings})",
                self.completed, self.earnings
            ))),
        }
    }
}

/// Result of a keyed update or credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The row already reflects this event or a later one.
    Stale,
    /// No row with that id.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectionCounts {
    pub agents: u64,
    pub bounties: u64,
    pub reviews: u64,
}

// ─── Store contract ───────────────────────────────────────────────────────────

/// The relational projection (agents, bounties, reviews).
///
/// Every method is one short statement or transaction; no call holds a
/// transaction open across awaits on anything but the store itself.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Insert if no agent with this id exists. `key` becomes the row's last event.
    async fn insert_agent(&self, agent: &NewAgent, key: EventKey) -> Result<bool, IndexerError>;

    async fn update_agent(
        &self,
        id: u64,
        update: &AgentUpdate,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError>;

    /// Atomically add `credit` to the agent's counters, once per `key`.
    ///
    /// `Missing` leaves no trace, so the same credit can be retried once the
    /// agent exists.
    async fn credit_agent(
        &self,
        id: u64,
        credit: Credit,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError>;

    async fn agent(&self, id: u64) -> Result<Option<Agent>, IndexerError>;

    /// Insert with status `open` if no bounty with this id exists.
    async fn insert_bounty(&self, bounty: &NewBounty, key: EventKey) -> Result<bool, IndexerError>;

    async fn update_bounty(
        &self,
        id: u64,
        update: &BountyUpdate,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError>;

    async fn bounty(&self, id: u64) -> Result<Option<Bounty>, IndexerError>;

    /// Insert if no review for `review.event` exists.
    async fn insert_review(&self, review: &Review) -> Result<bool, IndexerError>;

    async fn reviews_for_bounty(&self, bounty_id: u64) -> Result<Vec<Review>, IndexerError>;

    async fn counts(&self) -> Result<ProjectionCounts, IndexerError>;
}

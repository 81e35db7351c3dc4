//! Event router: applies one decoded event to the projection.
//!
//! One handler per [`LedgerEvent`] variant. Each performs exactly the
//! projection mutation its event implies and is safe to run more than once
//! with the same event:
//!
//! | Event | Effect | On duplicate |
//! |---|---|---|
//! | `Registered` | insert agent, baseline reputation | insert ignored |
//! | `MetadataSet` | set name / description / image / skills | stale key, no-op |
//! | `AgentWalletSet` | set wallet | stale key, no-op |
//! | `ReputationUpdated` | set absolute score | stale key, no-op |
//! | `BountyCreated` | insert bounty, status `open` | insert ignored |
//! | `BountyClaimed` | hunter, claimed-at, status `claimed` | stale key, no-op |
//! | `WorkSubmitted` | submission ref, submitted-at, status `submitted` | stale key, no-op |
//! | `BountyApproved` | status `approved` + one review | stale key, review ignored |
//! | rejected / disputed / cancelled / expired | status only | stale key, no-op |
//! | `BountyPaid` | status `paid`, hunter earnings += amount | credit deduplicated |
//! | `BountyCompleted` | completed += 1, earnings += reward | credit deduplicated |
//!
//! A reference to an entity that should exist but doesn't is an anomaly: it
//! is logged at `warn` with the full event payload under the
//! `bountyindex::anomaly` target. A missing agent is then created with
//! defaults; a missing bounty's own mutation is skipped while the event's
//! other effects still apply.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{DecodeError, IndexerError};
use crate::events::LedgerEvent;
use crate::projection::{
    AgentUpdate, BountyStatus, BountyUpdate, Credit, NewAgent, NewBounty, ProjectionStore, Review,
    UpdateOutcome,
};
use crate::types::{ChainEvent, EventKey};

/// What applying one event did. Summed into the engine's stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Handled {
    /// Mutations that changed the projection.
    pub applied: u32,
    /// Mutations skipped because the projection already reflected them.
    pub duplicates: u32,
    pub anomalies: u32,
    /// Fields left unset because they failed to decode.
    pub field_errors: u32,
    /// The event was not applied at all (unknown, or undecodable identifiers).
    pub skipped: bool,
}

impl Handled {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// `true` if the event was seen before and nothing changed.
    pub fn is_duplicate(&self) -> bool {
        self.applied == 0 && self.duplicates > 0
    }

    fn record(&mut self, outcome: UpdateOutcome) {
        match outcome {
            UpdateOutcome::Applied => self.applied += 1,
            UpdateOutcome::Stale => self.duplicates += 1,
            UpdateOutcome::Missing => {}
        }
    }

    fn record_insert(&mut self, inserted: bool) {
        if inserted {
            self.applied += 1;
        } else {
            self.duplicates += 1;
        }
    }
}

/// Maps events to projection mutations.
#[derive(Clone)]
pub struct EventRouter {
    store: Arc<dyn ProjectionStore>,
}

impl EventRouter {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ProjectionStore> {
        &self.store
    }

    /// Apply one event.
    ///
    /// Only store failures are returned as errors; they are fatal to the
    /// batch. Decode problems and anomalies are logged and reported in
    /// [`Handled`].
    pub async fn apply(&self, raw: &ChainEvent) -> Result<Handled, IndexerError> {
        let key = raw.key();
        let decoded = match LedgerEvent::decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(
                    key = %key,
                    event = %raw.event_name,
                    source = %raw.source,
                    error = %e,
                    payload = %raw.payload(),
                    "event skipped: required argument unusable"
                );
                return Ok(Handled::skipped());
            }
        };

        let mut handled = Handled::default();
        for e in &decoded.field_errors {
            log_field_error(raw, e);
            handled.field_errors += 1;
        }

        let mut cx = Apply {
            store: self.store.as_ref(),
            raw,
            key,
            handled,
        };
        cx.dispatch(decoded.event).await?;
        Ok(cx.handled)
    }
}

/// Per-event application context.
struct Apply<'a> {
    store: &'a dyn ProjectionStore,
    raw: &'a ChainEvent,
    key: EventKey,
    handled: Handled,
}

impl Apply<'_> {
    async fn dispatch(&mut self, event: LedgerEvent) -> Result<(), IndexerError> {
        let at = self.raw.block_timestamp;
        match event {
            LedgerEvent::AgentRegistered {
                agent_id,
                owner,
                token_uri,
            } => {
                let agent = NewAgent {
                    id: agent_id,
                    owner,
                    token_uri,
                    registered_at: at,
                };
                let inserted = self.store.insert_agent(&agent, self.key).await?;
                self.handled.record_insert(inserted);
            }

            LedgerEvent::AgentMetadataSet {
                agent_id,
                key,
                value,
            } => {
                let (Some(key), Some(value)) = (key, value) else {
                    debug!(key = %self.key, agent_id, "metadata event without key or value");
                    return Ok(());
                };
                match self.metadata_update(&key, &value) {
                    Some(update) => self.update_agent(agent_id, update).await?,
                    None => debug!(key = %self.key, agent_id, metadata_key = %key, "metadata key ignored"),
                }
            }

            LedgerEvent::AgentWalletSet { agent_id, wallet } => {
                if let Some(wallet) = wallet {
                    self.update_agent(agent_id, AgentUpdate::Wallet(wallet)).await?;
                }
            }

            LedgerEvent::ReputationUpdated { agent_id, score } => {
                if let Some(score) = score {
                    self.update_agent(agent_id, AgentUpdate::Reputation(score)).await?;
                }
            }

            LedgerEvent::BountyCreated {
                bounty_id,
                creator_id,
                reward,
                token,
                deadline,
                metadata_uri,
            } => {
                let bounty = NewBounty {
                    id: bounty_id,
                    creator_id,
                    reward,
                    token,
                    deadline,
                    metadata_uri,
                    created_at: at,
                };
                let inserted = self.store.insert_bounty(&bounty, self.key).await?;
                self.handled.record_insert(inserted);
            }

            LedgerEvent::BountyClaimed {
                bounty_id,
                hunter_id,
            } => {
                self.update_bounty(bounty_id, BountyUpdate::Claimed { hunter_id, at })
                    .await?;
            }

            LedgerEvent::WorkSubmitted {
                bounty_id,
                submission,
                ..
            } => {
                let update = BountyUpdate::Submitted {
                    submission_ref: submission,
                    at,
                };
                self.update_bounty(bounty_id, update).await?;
            }

            LedgerEvent::BountyApproved {
                bounty_id,
                rating,
                feedback_uri,
            } => {
                self.update_bounty(bounty_id, BountyUpdate::Status(BountyStatus::Approved))
                    .await?;
                let hunter = self.store.bounty(bounty_id).await?.and_then(|b| b.hunter_id);
                let review = Review {
                    event: self.key,
                    bounty_id,
                    agent_id: hunter,
                    rating,
                    feedback_uri,
                    created_at: at,
                };
                let inserted = self.store.insert_review(&review).await?;
                self.handled.record_insert(inserted);
            }

            LedgerEvent::BountyStatusChanged { bounty_id, status } => {
                self.update_bounty(bounty_id, BountyUpdate::Status(status)).await?;
            }

            LedgerEvent::BountyPaid {
                bounty_id,
                hunter_id,
                amount,
            } => {
                self.update_bounty(bounty_id, BountyUpdate::Status(BountyStatus::Paid))
                    .await?;

                let (hunter_id, amount) = if hunter_id.is_some() && amount.is_some() {
                    (hunter_id, amount)
                } else {
                    let bounty = self.store.bounty(bounty_id).await?;
                    (
                        hunter_id.or_else(|| bounty.as_ref().and_then(|b| b.hunter_id)),
                        amount.or_else(|| bounty.as_ref().and_then(|b| b.reward)),
                    )
                };
                match (hunter_id, amount) {
                    (Some(hunter_id), Some(amount)) => {
                        self.credit_agent(hunter_id, Credit::earnings(amount)).await?;
                    }
                    _ => self.anomaly("bounty paid without a known hunter and amount", "bounty", bounty_id),
                }
            }

            LedgerEvent::BountyCompleted {
                agent_id, reward, ..
            } => {
                self.credit_agent(agent_id, Credit::completion(reward.unwrap_or(0)))
                    .await?;
            }

            LedgerEvent::Unknown { source, event_name } => {
                warn!(key = %self.key, %source, event = %event_name, "unknown event ignored");
                self.handled.skipped = true;
            }
        }
        Ok(())
    }

    /// Turn a `MetadataSet` key/value into an agent update.
    ///
    /// Unknown keys yield `None`. Values that fail to decode are logged and
    /// also yield `None`.
    fn metadata_update(&mut self, key: &str, value: &[u8]) -> Option<AgentUpdate> {
        let known = matches!(key, "name" | "description" | "image" | "skills");
        if !known {
            return None;
        }
        let text = match std::str::from_utf8(value) {
            Ok(text) => text,
            Err(_) => {
                self.field_error(DecodeError::InvalidUtf8 {
                    field: format!("metadata.{key}"),
                });
                return None;
            }
        };
        match key {
            "name" => Some(AgentUpdate::Name(text.to_string())),
            "description" => Some(AgentUpdate::Description(text.to_string())),
            "image" => Some(AgentUpdate::Image(text.to_string())),
            _ => match serde_json::from_str::<Vec<String>>(text) {
                Ok(skills) => Some(AgentUpdate::Skills(skills)),
                Err(e) => {
                    self.field_error(DecodeError::InvalidJson {
                        field: "metadata.skills".into(),
                        reason: e.to_string(),
                    });
                    None
                }
            },
        }
    }

    /// Set-style agent update; creates a default agent if it is missing.
    async fn update_agent(&mut self, id: u64, update: AgentUpdate) -> Result<(), IndexerError> {
        let mut outcome = self.store.update_agent(id, &update, self.key).await?;
        if outcome == UpdateOutcome::Missing {
            self.create_missing_agent(id).await?;
            outcome = self.store.update_agent(id, &update, self.key).await?;
        }
        self.handled.record(outcome);
        Ok(())
    }

    async fn credit_agent(&mut self, id: u64, credit: Credit) -> Result<(), IndexerError> {
        let mut outcome = self.store.credit_agent(id, credit, self.key).await?;
        if outcome == UpdateOutcome::Missing {
            self.create_missing_agent(id).await?;
            outcome = self.store.credit_agent(id, credit, self.key).await?;
        }
        self.handled.record(outcome);
        Ok(())
    }

    /// Set-style bounty update; a missing bounty is an anomaly and the
    /// mutation is skipped.
    async fn update_bounty(&mut self, id: u64, update: BountyUpdate) -> Result<(), IndexerError> {
        let outcome = self.store.update_bounty(id, &update, self.key).await?;
        if outcome == UpdateOutcome::Missing {
            self.anomaly("bounty not in projection; mutation skipped", "bounty", id);
        }
        self.handled.record(outcome);
        Ok(())
    }

    async fn create_missing_agent(&mut self, id: u64) -> Result<(), IndexerError> {
        self.anomaly("agent not in projection; creating with defaults", "agent", id);
        // Placeholder rows carry the zero key so the triggering update still applies.
        let placeholder = NewAgent::placeholder(id, self.raw.block_timestamp);
        self.store.insert_agent(&placeholder, EventKey::ZERO).await?;
        Ok(())
    }

    fn anomaly(&mut self, message: &str, entity: &str, id: u64) {
        self.handled.anomalies += 1;
        warn!(
            target: "bountyindex::anomaly",
            key = %self.key,
            event = %self.raw.event_name,
            entity,
            id,
            payload = %self.raw.payload(),
            "{message}"
        );
    }

    fn field_error(&mut self, e: DecodeError) {
        log_field_error(self.raw, &e);
        self.handled.field_errors += 1;
    }
}

fn log_field_error(raw: &ChainEvent, e: &DecodeError) {
    error!(
        key = %raw.key(),
        event = %raw.event_name,
        error = %e,
        payload = %raw.payload(),
        "field left unset: decode failed"
    );
}

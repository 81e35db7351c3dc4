//! In-memory storage backend.
//!
//! Holds the projection (agents, bounties, reviews, applied credits) and the
//! checkpoint key/value map in RAM. Useful for tests and short-lived indexers
//! that don't need persistence. A single mutex guards all projection tables,
//! so every mutation is atomic exactly as a single SQL statement would be.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use bountyindex_core::checkpoint::CheckpointStore;
use bountyindex_core::error::IndexerError;
use bountyindex_core::projection::{
    Agent, AgentUpdate, Bounty, BountyStatus, BountyUpdate, Credit, NewAgent, NewBounty,
    ProjectionCounts, ProjectionStore, Review, UpdateOutcome, BASELINE_REPUTATION,
};
use bountyindex_core::types::EventKey;

#[derive(Default)]
struct Tables {
    agents: BTreeMap<u64, Agent>,
    bounties: BTreeMap<u64, Bounty>,
    reviews: BTreeMap<EventKey, Review>,
    /// Event keys whose credit has been applied.
    credits: HashSet<EventKey>,
}

/// In-memory projection and checkpoint storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    checkpoints: Mutex<HashMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, IndexerError> {
        self.tables
            .lock()
            .map_err(|_| IndexerError::Storage("projection mutex poisoned".into()))
    }

    fn checkpoints(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, IndexerError> {
        self.checkpoints
            .lock()
            .map_err(|_| IndexerError::Storage("checkpoint mutex poisoned".into()))
    }

    /// Number of credits applied so far (one per crediting event).
    pub fn credit_count(&self) -> Result<usize, IndexerError> {
        Ok(self.tables()?.credits.len())
    }

    /// All agents ordered by id.
    pub fn agents(&self) -> Result<Vec<Agent>, IndexerError> {
        Ok(self.tables()?.agents.values().cloned().collect())
    }

    /// All bounties ordered by id.
    pub fn bounties(&self) -> Result<Vec<Bounty>, IndexerError> {
        Ok(self.tables()?.bounties.values().cloned().collect())
    }
}

fn apply_agent_update(agent: &mut Agent, update: &AgentUpdate) {
    match update {
        AgentUpdate::Name(v) => agent.name = Some(v.clone()),
        AgentUpdate::Description(v) => agent.description = Some(v.clone()),
        AgentUpdate::Image(v) => agent.image = Some(v.clone()),
        AgentUpdate::Skills(v) => agent.skills = v.clone(),
        AgentUpdate::Wallet(v) => agent.wallet = Some(v.clone()),
        AgentUpdate::Reputation(score) => agent.reputation_score = *score,
    }
}

fn apply_bounty_update(bounty: &mut Bounty, update: &BountyUpdate) {
    match update {
        BountyUpdate::Claimed { hunter_id, at } => {
            bounty.hunter_id = Some(*hunter_id);
            bounty.claimed_at = Some(*at);
            bounty.status = BountyStatus::Claimed;
        }
        BountyUpdate::Submitted { submission_ref, at } => {
            if submission_ref.is_some() {
                bounty.submission_ref = submission_ref.clone();
            }
            bounty.submitted_at = Some(*at);
            bounty.status = BountyStatus::Submitted;
        }
        BountyUpdate::Status(status) => bounty.status = *status,
    }
}

#[async_trait]
impl ProjectionStore for InMemoryStorage {
    async fn insert_agent(&self, agent: &NewAgent, key: EventKey) -> Result<bool, IndexerError> {
        let mut tables = self.tables()?;
        if tables.agents.contains_key(&agent.id) {
            return Ok(false);
        }
        tables.agents.insert(
            agent.id,
            Agent {
                id: agent.id,
                owner: agent.owner.clone(),
                wallet: None,
                token_uri: agent.token_uri.clone(),
                name: None,
                description: None,
                image: None,
                skills: vec![],
                reputation_score: BASELINE_REPUTATION,
                completed_bounties: 0,
                total_earnings: 0,
                registered_at: agent.registered_at,
                last_event: key,
            },
        );
        Ok(true)
    }

    async fn update_agent(
        &self,
        id: u64,
        update: &AgentUpdate,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError> {
        let mut tables = self.tables()?;
        let Some(agent) = tables.agents.get_mut(&id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if key <= agent.last_event {
            return Ok(UpdateOutcome::Stale);
        }
        apply_agent_update(agent, update);
        agent.last_event = key;
        Ok(UpdateOutcome::Applied)
    }

    async fn credit_agent(
        &self,
        id: u64,
        credit: Credit,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError> {
        let mut tables = self.tables()?;
        if tables.credits.contains(&key) {
            return Ok(if tables.agents.contains_key(&id) {
                UpdateOutcome::Stale
            } else {
                UpdateOutcome::Missing
            });
        }
        let Some(agent) = tables.agents.get_mut(&id) else {
            return Ok(UpdateOutcome::Missing);
        };
        let (completed, earnings) = credit.add_to(agent.completed_bounties, agent.total_earnings)?;
        agent.completed_bounties = completed;
        agent.total_earnings = earnings;
        tables.credits.insert(key);
        Ok(UpdateOutcome::Applied)
    }

    async fn agent(&self, id: u64) -> Result<Option<Agent>, IndexerError> {
        Ok(self.tables()?.agents.get(&id).cloned())
    }

    async fn insert_bounty(&self, bounty: &NewBounty, key: EventKey) -> Result<bool, IndexerError> {
        let mut tables = self.tables()?;
        if tables.bounties.contains_key(&bounty.id) {
            return Ok(false);
        }
        tables.bounties.insert(
            bounty.id,
            Bounty {
                id: bounty.id,
                creator_id: bounty.creator_id,
                hunter_id: None,
                reward: bounty.reward,
                token: bounty.token.clone(),
                deadline: bounty.deadline,
                metadata_uri: bounty.metadata_uri.clone(),
                status: BountyStatus::Open,
                submission_ref: None,
                created_at: bounty.created_at,
                claimed_at: None,
                submitted_at: None,
                last_event: key,
            },
        );
        Ok(true)
    }

    async fn update_bounty(
        &self,
        id: u64,
        update: &BountyUpdate,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError> {
        let mut tables = self.tables()?;
        let Some(bounty) = tables.bounties.get_mut(&id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if key <= bounty.last_event {
            return Ok(UpdateOutcome::Stale);
        }
        apply_bounty_update(bounty, update);
        bounty.last_event = key;
        Ok(UpdateOutcome::Applied)
    }

    async fn bounty(&self, id: u64) -> Result<Option<Bounty>, IndexerError> {
        Ok(self.tables()?.bounties.get(&id).cloned())
    }

    async fn insert_review(&self, review: &Review) -> Result<bool, IndexerError> {
        let mut tables = self.tables()?;
        if tables.reviews.contains_key(&review.event) {
            return Ok(false);
        }
        tables.reviews.insert(review.event, review.clone());
        Ok(true)
    }

    async fn reviews_for_bounty(&self, bounty_id: u64) -> Result<Vec<Review>, IndexerError> {
        Ok(self
            .tables()?
            .reviews
            .values()
            .filter(|r| r.bounty_id == bounty_id)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<ProjectionCounts, IndexerError> {
        let tables = self.tables()?;
        Ok(ProjectionCounts {
            agents: tables.agents.len() as u64,
            bounties: tables.bounties.len() as u64,
            reviews: tables.reviews.len() as u64,
        })
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.checkpoints()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), IndexerError> {
        self.checkpoints()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), IndexerError> {
        self.checkpoints()?.remove(key);
        Ok(())
    }
}

//! Escrow event log - append-only audit trail
//!
//! Every applied transition is recorded here and broadcast to subscribers
//! (database mirrors, notification workers, cross-chain indexers).

use crate::models::{Address, EscrowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

const BROADCAST_CAPACITY: usize = 1024;

/// Event kinds emitted by the ledger and the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEventKind {
    EscrowInitialized,
    FundsDeposited,
    VerificationSubmitted,
    DisputeRaised,
    DisputeResolved,
    DisputeLapsed,
    FundsReleased,
    BuyerRefunded,
    UniversalInitialized,
    ZkmeVerificationUpdated,
    CrossChainApplied,
}

impl EscrowEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EscrowInitialized => "escrow.initialized",
            Self::FundsDeposited => "funds.deposited",
            Self::VerificationSubmitted => "verification.submitted",
            Self::DisputeRaised => "dispute.raised",
            Self::DisputeResolved => "dispute.resolved",
            Self::DisputeLapsed => "dispute.lapsed",
            Self::FundsReleased => "funds.released",
            Self::BuyerRefunded => "buyer.refunded",
            Self::UniversalInitialized => "universal.initialized",
            Self::ZkmeVerificationUpdated => "universal.zkme_updated",
            Self::CrossChainApplied => "universal.cross_chain_applied",
        }
    }
}

/// Escrow event for audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub id: Uuid,
    /// Position in the log, starting at 0
    pub sequence: u64,
    pub kind: EscrowEventKind,
    pub escrow_id: EscrowId,
    pub actor: Option<Address>,
    pub status: Option<String>,
    pub metadata: Option<serde_json::Value>,
    // Timestamp (immutable)
    pub created_at: DateTime<Utc>,
}

pub struct EventLog {
    events: RwLock<Vec<EscrowEvent>>,
    sender: broadcast::Sender<EscrowEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            events: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Append an event and broadcast it
    pub async fn record(
        &self,
        kind: EscrowEventKind,
        escrow_id: EscrowId,
        actor: Option<Address>,
        status: Option<String>,
        metadata: Option<serde_json::Value>,
        created_at: DateTime<Utc>,
    ) -> EscrowEvent {
        let mut events = self.events.write().await;
        let event = EscrowEvent {
            id: Uuid::new_v4(),
            sequence: events.len() as u64,
            kind,
            escrow_id,
            actor,
            status,
            metadata,
            created_at,
        };
        events.push(event.clone());

        // no subscribers is fine
        let _ = self.sender.send(event.clone());
        debug!(kind = kind.as_str(), escrow_id = %escrow_id, "Recorded escrow event");
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.sender.subscribe()
    }

    pub async fn all(&self) -> Vec<EscrowEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, escrow_id: &EscrowId) -> Vec<EscrowEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.escrow_id == *escrow_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

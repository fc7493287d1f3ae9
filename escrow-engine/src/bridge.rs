//! Universal Escrow Bridge - cross-chain escrow coordination
//!
//! Tracks one escrow's presence across chains. Status is driven by messages
//! relayed from a trusted gateway, which may arrive late, duplicated, or out
//! of order. Each message carries a nonce; its id is a hash of the full
//! canonical encoding, and an id is applied at most once. A message that is
//! illegal in the current state is rejected without being marked processed,
//! so the relay may redeliver it once earlier messages have landed.
//!
//! Processed ids are kept per escrow and live exactly as long as the escrow
//! record does.

use crate::{
    clock::Clock,
    error::EscrowError,
    events::{EscrowEventKind, EventLog},
    models::{Address, EscrowId, Hash32, UniversalEscrow, UniversalEscrowView, UniversalStatus},
    protocol_config::ProtocolConfig,
    EscrowResult,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const MESSAGE_DOMAIN: &[u8] = b"universal-escrow-msg:v1";

/// Configuration for the bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// The only caller allowed to deliver relayed messages
    pub gateway: Address,
}

/// Actions a relayed message can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossChainAction {
    /// Initiated -> Active
    InitiateEscrow,
    /// Active -> Completed | Refunded, Initiated -> Cancelled
    StateChange { target: UniversalStatus },
}

/// Inbound relayed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainMessage {
    pub source_chain: String,
    pub destination_chain: String,
    pub escrow_id: EscrowId,
    pub action: CrossChainAction,
    pub amount: u64,
    pub recipient: Address,
    pub nonce: u64,
}

impl CrossChainMessage {
    /// Replay-protection key covering every field
    pub fn message_id(&self) -> Hash32 {
        let mut hasher = Sha256::new();
        hasher.update(MESSAGE_DOMAIN);
        for chain in [&self.source_chain, &self.destination_chain] {
            hasher.update((chain.len() as u32).to_le_bytes());
            hasher.update(chain.as_bytes());
        }
        hasher.update(self.escrow_id.as_bytes());
        match self.action {
            CrossChainAction::InitiateEscrow => hasher.update([0u8]),
            CrossChainAction::StateChange { target } => {
                hasher.update([1u8, status_tag(target)]);
            }
        }
        hasher.update(self.amount.to_le_bytes());
        hasher.update(self.recipient.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        Hash32(hasher.finalize().into())
    }
}

fn status_tag(status: UniversalStatus) -> u8 {
    match status {
        UniversalStatus::Initiated => 0,
        UniversalStatus::Active => 1,
        UniversalStatus::Completed => 2,
        UniversalStatus::Refunded => 3,
        UniversalStatus::Cancelled => 4,
    }
}

/// Result of handling a relayed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    Applied(UniversalEscrow),
    /// Message id already applied; nothing changed
    Duplicate,
}

/// A universal escrow with the relay message ids already applied to it
#[derive(Debug)]
struct BridgeRecord {
    escrow: UniversalEscrow,
    processed: HashSet<Hash32>,
}

pub struct UniversalEscrowBridge {
    config: BridgeConfig,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    escrows: RwLock<HashMap<EscrowId, Arc<Mutex<BridgeRecord>>>>,
}

impl UniversalEscrowBridge {
    pub fn new(config: BridgeConfig, clock: Arc<dyn Clock>, events: Arc<EventLog>) -> Self {
        Self {
            config,
            clock,
            events,
            escrows: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub async fn initialize_universal_escrow(
        &self,
        id: EscrowId,
        source_chain: String,
        destination_chain: String,
    ) -> EscrowResult<UniversalEscrow> {
        if source_chain.trim().is_empty() || destination_chain.trim().is_empty() {
            return Err(EscrowError::InvalidChain(
                "Chain names cannot be empty".to_string(),
            ));
        }
        if source_chain == destination_chain {
            return Err(EscrowError::InvalidChain(format!(
                "Source and destination are both {}",
                source_chain
            )));
        }

        let now = self.clock.now();
        let escrow = UniversalEscrow {
            id,
            source_chain,
            destination_chain,
            zkme_verification: false,
            status: UniversalStatus::Initiated,
            amount: None,
            recipient: None,
            created_at: now,
            updated_at: now,
        };

        {
            let mut escrows = self.escrows.write().await;
            if escrows.contains_key(&id) {
                return Err(EscrowError::AlreadyExists(format!("Universal escrow {}", id)));
            }
            escrows.insert(
                id,
                Arc::new(Mutex::new(BridgeRecord {
                    escrow: escrow.clone(),
                    processed: HashSet::new(),
                })),
            );
        }

        self.events
            .record(
                EscrowEventKind::UniversalInitialized,
                id,
                None,
                Some(format!("{:?}", escrow.status)),
                Some(serde_json::json!({
                    "source_chain": escrow.source_chain,
                    "destination_chain": escrow.destination_chain,
                })),
                now,
            )
            .await;
        info!(
            escrow_id = %id,
            source = %escrow.source_chain,
            destination = %escrow.destination_chain,
            "Initialized universal escrow"
        );

        Ok(escrow)
    }

    /// KYC flag push; authority only
    pub async fn update_zkme_verification(
        &self,
        config: &ProtocolConfig,
        caller: Address,
        id: EscrowId,
        verified: bool,
    ) -> EscrowResult<UniversalEscrow> {
        config.ensure_authority(&caller)?;

        let record = self.record(&id).await?;
        let mut record = record.lock().await;
        let escrow = &mut record.escrow;
        let now = self.clock.now();

        escrow.zkme_verification = verified;
        if verified && escrow.status == UniversalStatus::Initiated {
            escrow.status = UniversalStatus::Active;
        }
        escrow.updated_at = now;

        self.events
            .record(
                EscrowEventKind::ZkmeVerificationUpdated,
                id,
                Some(caller),
                Some(format!("{:?}", escrow.status)),
                Some(serde_json::json!({ "zkme_verification": verified })),
                now,
            )
            .await;
        info!(escrow_id = %id, verified, status = ?escrow.status, "Updated zkMe verification");

        Ok(escrow.clone())
    }

    /// Decode a JSON relay payload and handle it
    pub async fn universal_on_call_raw(
        &self,
        caller: Address,
        payload: &[u8],
    ) -> EscrowResult<BridgeOutcome> {
        self.ensure_gateway(&caller)?;
        let message: CrossChainMessage = serde_json::from_slice(payload)?;
        self.apply(caller, message).await
    }

    /// Apply a relayed message from the trusted gateway
    pub async fn universal_on_call(
        &self,
        caller: Address,
        message: CrossChainMessage,
    ) -> EscrowResult<BridgeOutcome> {
        self.ensure_gateway(&caller)?;
        self.apply(caller, message).await
    }

    /// Apply a message whose caller was already checked against the gateway
    async fn apply(
        &self,
        caller: Address,
        message: CrossChainMessage,
    ) -> EscrowResult<BridgeOutcome> {
        let record = self.record(&message.escrow_id).await?;
        let mut record = record.lock().await;
        let BridgeRecord { escrow, processed } = &mut *record;
        let now = self.clock.now();

        if escrow.source_chain != message.source_chain
            || escrow.destination_chain != message.destination_chain
        {
            return Err(EscrowError::ChainMismatch(format!(
                "Message {} -> {} does not match escrow {} -> {}",
                message.source_chain,
                message.destination_chain,
                escrow.source_chain,
                escrow.destination_chain
            )));
        }

        let message_id = message.message_id();
        if processed.contains(&message_id) {
            info!(escrow_id = %message.escrow_id, %message_id, "Ignoring replayed message");
            return Ok(BridgeOutcome::Duplicate);
        }

        let next = next_state(escrow, &message)?;

        processed.insert(message_id);
        if message.action == CrossChainAction::InitiateEscrow {
            escrow.amount = Some(message.amount);
            escrow.recipient = Some(message.recipient);
        }
        escrow.status = next;
        escrow.updated_at = now;

        self.events
            .record(
                EscrowEventKind::CrossChainApplied,
                message.escrow_id,
                Some(caller),
                Some(format!("{:?}", escrow.status)),
                Some(serde_json::json!({
                    "message_id": message_id,
                    "action": message.action,
                    "amount": message.amount,
                    "recipient": message.recipient,
                    "nonce": message.nonce,
                })),
                now,
            )
            .await;
        info!(escrow_id = %message.escrow_id, status = ?next, "Applied cross-chain message");

        Ok(BridgeOutcome::Applied(escrow.clone()))
    }

    /// Status view polled by indexers
    pub async fn status_of(&self, id: &EscrowId) -> EscrowResult<UniversalEscrowView> {
        let escrow = self.get(id).await?;
        Ok(UniversalEscrowView {
            status: escrow.status,
            zkme_verification: escrow.zkme_verification,
        })
    }

    pub async fn get(&self, id: &EscrowId) -> EscrowResult<UniversalEscrow> {
        let record = self.record(id).await?;
        let record = record.lock().await;
        Ok(record.escrow.clone())
    }

    fn ensure_gateway(&self, caller: &Address) -> EscrowResult<()> {
        if *caller != self.config.gateway {
            warn!(caller = %caller, "Rejected relay call from untrusted caller");
            return Err(EscrowError::UnauthorizedGateway(caller.to_string()));
        }
        Ok(())
    }

    async fn record(&self, id: &EscrowId) -> EscrowResult<Arc<Mutex<BridgeRecord>>> {
        self.escrows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found(format!("Universal escrow {}", id)))
    }
}

/// Target status for `message`, or why it is illegal now
fn next_state(
    escrow: &UniversalEscrow,
    message: &CrossChainMessage,
) -> EscrowResult<UniversalStatus> {
    use UniversalStatus::*;

    let illegal = |to: UniversalStatus, reason: &str| {
        EscrowError::state_transition(
            format!("{:?}", escrow.status),
            format!("{:?}", to),
            reason.to_string(),
        )
    };

    match message.action {
        CrossChainAction::InitiateEscrow => {
            // a KYC update may have activated the escrow before the relay landed
            let awaiting_relay = match escrow.status {
                Initiated => true,
                Active => escrow.amount.is_none(),
                _ => false,
            };
            if !awaiting_relay {
                return Err(illegal(Active, "Escrow was already initiated"));
            }
            if message.amount == 0 {
                return Err(EscrowError::InvalidAmount(
                    "Initiating amount must be greater than 0".to_string(),
                ));
            }
            Ok(Active)
        }
        CrossChainAction::StateChange { target } => match (escrow.status, target) {
            (Active, Completed) if !escrow.zkme_verification => {
                Err(illegal(Completed, "zkMe verification required"))
            }
            (Active, Completed) | (Active, Refunded) if escrow.amount.is_none() => {
                Err(illegal(target, "Escrow initiation has not been relayed"))
            }
            (Active, Completed) | (Active, Refunded) | (Initiated, Cancelled) => Ok(target),
            _ => Err(illegal(target, "Transition not allowed by relay")),
        },
    }
}

//! Dispute arbitration
//!
//! Either counterparty may open one dispute on a funded or verified escrow.
//! While open, release and refund are blocked. An admin from the protocol
//! config replaces the verdict before the deadline, returning the escrow to
//! `Verified`. A dispute left unresolved past its deadline lapses: the escrow
//! returns to the status it had when the dispute was raised and settles on
//! the verdict it already carried, or by expiry refund if it had none.

use crate::{
    error::EscrowError,
    events::EscrowEventKind,
    ledger::{transition_error, EscrowLedger, EscrowRecord},
    models::{Address, Escrow, EscrowId, EscrowStatus},
    protocol_config::ProtocolConfig,
    EscrowResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Admin ruling on a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeDecision {
    FavorBuyer,
    FavorSeller,
}

impl DisputeDecision {
    /// Verdict that replaces the AI verdict
    pub fn verification_result(self) -> bool {
        matches!(self, Self::FavorSeller)
    }
}

/// Authorization and window checks for dispute resolution
pub struct DisputeArbiter;

impl DisputeArbiter {
    pub fn authorize(config: &ProtocolConfig, caller: &Address) -> EscrowResult<()> {
        config.ensure_admin(caller)
    }

    /// The escrow must be disputed and `now` no later than its deadline
    pub fn check_window(escrow: &Escrow, now: DateTime<Utc>) -> EscrowResult<()> {
        match (escrow.status, escrow.dispute_deadline) {
            (EscrowStatus::Disputed, Some(deadline)) if now <= deadline => Ok(()),
            _ => Err(EscrowError::DisputeExpired(escrow.id.to_string())),
        }
    }
}

impl EscrowLedger {
    /// Buyer or seller contests the escrow
    pub async fn raise_dispute(&self, caller: Address, escrow_id: EscrowId) -> EscrowResult<Escrow> {
        let record = self.record(&escrow_id).await?;
        let mut record = record.lock().await;
        let now = self.clock().now();
        self.lapse_expired_dispute(&mut record, now).await;

        if !record.escrow.is_party(&caller) {
            return Err(EscrowError::unauthorized_party(
                "Only the buyer or the seller can raise a dispute",
            ));
        }
        if record.escrow.dispute_raised {
            return Err(EscrowError::DisputeActive(escrow_id.to_string()));
        }
        if !record.escrow.status.can_dispute() {
            return Err(transition_error(
                &record.escrow,
                EscrowStatus::Disputed,
                "Only funded or verified escrows can be disputed",
            ));
        }

        let deadline = now
            .checked_add_signed(self.config().dispute_window()?)
            .ok_or_else(|| EscrowError::overflow("Dispute deadline is out of range"))?;
        record.escrow.status_before_dispute = Some(record.escrow.status);
        record.escrow.status = EscrowStatus::Disputed;
        record.escrow.dispute_raised = true;
        record.escrow.dispute_deadline = Some(deadline);
        record.escrow.updated_at = now;
        debug_assert!(record.escrow.is_consistent_with(&record.vault));

        self.events()
            .record(
                EscrowEventKind::DisputeRaised,
                escrow_id,
                Some(caller),
                Some(record.escrow.status.to_string()),
                Some(serde_json::json!({ "dispute_deadline": deadline })),
                now,
            )
            .await;
        warn!(escrow_id = %escrow_id, raised_by = %caller, %deadline, "Dispute raised");

        Ok(record.escrow.clone())
    }

    /// Admin replaces the verdict while the dispute window is open
    pub async fn resolve_dispute(
        &self,
        config: &ProtocolConfig,
        caller: Address,
        escrow_id: EscrowId,
        decision: DisputeDecision,
    ) -> EscrowResult<Escrow> {
        DisputeArbiter::authorize(config, &caller)?;

        let record = self.record(&escrow_id).await?;
        let mut record = record.lock().await;
        let now = self.clock().now();

        DisputeArbiter::check_window(&record.escrow, now)?;

        let result = decision.verification_result();
        record.escrow.verification_result = Some(result);
        record.escrow.dispute_raised = false;
        record.escrow.dispute_deadline = None;
        record.escrow.status_before_dispute = None;
        record.escrow.status = EscrowStatus::Verified;
        record.escrow.verified_at = Some(now);
        record.escrow.updated_at = now;
        debug_assert!(record.escrow.is_consistent_with(&record.vault));

        self.events()
            .record(
                EscrowEventKind::DisputeResolved,
                escrow_id,
                Some(caller),
                Some(record.escrow.status.to_string()),
                Some(serde_json::json!({ "decision": decision, "verification_result": result })),
                now,
            )
            .await;
        info!(escrow_id = %escrow_id, admin = %caller, ?decision, "Dispute resolved");

        Ok(record.escrow.clone())
    }

    /// Close a dispute whose deadline has passed; callable by anyone
    pub async fn close_lapsed_dispute(&self, escrow_id: EscrowId) -> EscrowResult<Escrow> {
        let record = self.record(&escrow_id).await?;
        let mut record = record.lock().await;
        let now = self.clock().now();

        if !self.lapse_expired_dispute(&mut record, now).await {
            return Err(if record.escrow.status == EscrowStatus::Disputed {
                EscrowError::DisputeActive(escrow_id.to_string())
            } else {
                transition_error(
                    &record.escrow,
                    record.escrow.status,
                    "No dispute is open on this escrow",
                )
            });
        }
        Ok(record.escrow.clone())
    }

    /// Restore the pre-dispute status once `now` is past the deadline.
    /// Returns whether a dispute was closed.
    pub(crate) async fn lapse_expired_dispute(
        &self,
        record: &mut EscrowRecord,
        now: DateTime<Utc>,
    ) -> bool {
        let deadline = match (record.escrow.status, record.escrow.dispute_deadline) {
            (EscrowStatus::Disputed, Some(deadline)) if now > deadline => deadline,
            _ => return false,
        };

        let fallback = if record.escrow.verification_result.is_some() {
            EscrowStatus::Verified
        } else {
            EscrowStatus::Funded
        };
        let restored = record.escrow.status_before_dispute.take().unwrap_or(fallback);
        record.escrow.status = restored;
        record.escrow.dispute_raised = false;
        record.escrow.dispute_deadline = None;
        record.escrow.updated_at = now;
        debug_assert!(record.escrow.is_consistent_with(&record.vault));

        self.events()
            .record(
                EscrowEventKind::DisputeLapsed,
                record.escrow.id,
                None,
                Some(restored.to_string()),
                Some(serde_json::json!({ "dispute_deadline": deadline })),
                now,
            )
            .await;
        info!(escrow_id = %record.escrow.id, status = %restored, %deadline, "Dispute lapsed unresolved");

        true
    }
}

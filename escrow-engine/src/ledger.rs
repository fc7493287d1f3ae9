//! Escrow Ledger - custody state machine
//!
//! Owns escrow records and their vaults. Each escrow sits behind its own
//! mutex, so calls against one escrow are serialized while calls against
//! different escrows run independently. Every operation validates fully
//! before its first mutation; an error leaves the record, the vault and all
//! balances untouched. The one exception is a dispute whose deadline has
//! passed: the next call against that escrow closes it first, whether or not
//! the call itself then succeeds.

use crate::{
    balances::TokenBalances,
    clock::Clock,
    error::EscrowError,
    events::{EscrowEventKind, EventLog},
    fees::{FeeCalculator, DEFAULT_FEE_RATE_PERCENT},
    models::{AgentPublicKey, Address, Escrow, EscrowId, EscrowStatus, Hash32, Vault},
    verification_service::{
        parse_agent_key, VerificationService, VerificationServiceConfig, VerificationSubmission,
    },
    EscrowResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Longest accepted dispute window (one year)
pub const MAX_DISPUTE_WINDOW_SECS: u64 = 365 * 24 * 3600;

/// Configuration for the escrow ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Protocol fee in whole percent
    pub fee_rate_percent: u64,
    /// Length of the dispute window, in seconds
    pub dispute_window_secs: u64,
    /// Address receiving protocol fees
    pub treasury: Address,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fee_rate_percent: DEFAULT_FEE_RATE_PERCENT,
            dispute_window_secs: 72 * 3600, // 72 hours
            treasury: Address::default(),
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> EscrowResult<()> {
        FeeCalculator::new(self.fee_rate_percent)?;
        if self.dispute_window_secs == 0 {
            return Err(EscrowError::config("Dispute window must be non-zero"));
        }
        if self.dispute_window_secs > MAX_DISPUTE_WINDOW_SECS {
            return Err(EscrowError::config(format!(
                "Dispute window of {}s exceeds the {}s maximum",
                self.dispute_window_secs, MAX_DISPUTE_WINDOW_SECS
            )));
        }
        self.dispute_window()?;
        Ok(())
    }

    pub fn dispute_window(&self) -> EscrowResult<Duration> {
        i64::try_from(self.dispute_window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| EscrowError::config("Dispute window is out of range"))
    }
}

/// Escrow creation request, submitted by the buyer
#[derive(Debug, Clone)]
pub struct InitializeEscrowRequest {
    pub id: EscrowId,
    pub seller: Address,
    pub amount: u64,
    pub ai_agent_public_key: AgentPublicKey,
    pub metadata_hash: Hash32,
    pub expiry: DateTime<Utc>,
}

/// An escrow together with the vault it owns
#[derive(Debug, Clone)]
pub(crate) struct EscrowRecord {
    pub escrow: Escrow,
    pub vault: Vault,
}

/// Main escrow ledger
pub struct EscrowLedger {
    config: LedgerConfig,
    fees: FeeCalculator,
    verifier: VerificationService,
    clock: Arc<dyn Clock>,
    balances: Arc<TokenBalances>,
    events: Arc<EventLog>,
    escrows: RwLock<HashMap<EscrowId, Arc<Mutex<EscrowRecord>>>>,
}

impl EscrowLedger {
    /// Create a new escrow ledger
    pub fn new(
        config: LedgerConfig,
        verification_config: VerificationServiceConfig,
        clock: Arc<dyn Clock>,
        balances: Arc<TokenBalances>,
        events: Arc<EventLog>,
    ) -> EscrowResult<Self> {
        config.validate()?;
        let fees = FeeCalculator::new(config.fee_rate_percent)?;

        Ok(Self {
            config,
            fees,
            verifier: VerificationService::new(verification_config),
            clock,
            balances,
            events,
            escrows: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn fees(&self) -> &FeeCalculator {
        &self.fees
    }

    pub fn balances(&self) -> &Arc<TokenBalances> {
        &self.balances
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Buyer opens a new escrow; the vault starts empty
    pub async fn initialize_escrow(
        &self,
        buyer: Address,
        request: InitializeEscrowRequest,
    ) -> EscrowResult<Escrow> {
        let now = self.clock.now();
        info!(escrow_id = %request.id, buyer = %buyer, amount = request.amount, "Initializing escrow");

        self.validate_initialize_request(&buyer, &request, now)?;
        let split = self.fees.split(request.amount)?;

        let vault = Vault::empty(request.id);
        let escrow = Escrow {
            id: request.id,
            buyer,
            seller: request.seller,
            amount: request.amount,
            fee_amount: split.fee_amount,
            vault: vault.address,
            status: EscrowStatus::Created,
            ai_agent_public_key: request.ai_agent_public_key,
            metadata_hash: request.metadata_hash,
            verification_result: None,
            dispute_raised: false,
            dispute_deadline: None,
            status_before_dispute: None,
            expiry: request.expiry,
            created_at: now,
            updated_at: now,
            verified_at: None,
            settled_at: None,
        };

        {
            let mut escrows = self.escrows.write().await;
            if escrows.contains_key(&escrow.id) {
                return Err(EscrowError::AlreadyExists(format!("Escrow {}", escrow.id)));
            }
            escrows.insert(
                escrow.id,
                Arc::new(Mutex::new(EscrowRecord {
                    escrow: escrow.clone(),
                    vault,
                })),
            );
        }

        self.events
            .record(
                EscrowEventKind::EscrowInitialized,
                escrow.id,
                Some(buyer),
                Some(escrow.status.to_string()),
                Some(serde_json::json!({
                    "seller": escrow.seller,
                    "amount": escrow.amount,
                    "fee_amount": escrow.fee_amount,
                    "vault": escrow.vault,
                    "expiry": escrow.expiry,
                })),
                now,
            )
            .await;

        Ok(escrow)
    }

    /// Buyer moves exactly `amount` into the vault
    pub async fn deposit_funds(&self, caller: Address, escrow_id: EscrowId) -> EscrowResult<Escrow> {
        let record = self.record(&escrow_id).await?;
        let mut record = record.lock().await;
        let now = self.clock.now();

        if record.escrow.buyer != caller {
            return Err(EscrowError::unauthorized_party(
                "Only the buyer can deposit funds",
            ));
        }
        if !record.escrow.status.can_deposit() {
            return Err(transition_error(
                &record.escrow,
                EscrowStatus::Funded,
                "Funds can only be deposited into a created escrow",
            ));
        }

        let amount = record.escrow.amount;
        self.balances.debit(&caller, amount).await?;

        record.vault.balance = amount;
        record.escrow.status = EscrowStatus::Funded;
        record.escrow.updated_at = now;
        debug_assert!(record.escrow.is_consistent_with(&record.vault));

        self.events
            .record(
                EscrowEventKind::FundsDeposited,
                escrow_id,
                Some(caller),
                Some(record.escrow.status.to_string()),
                Some(serde_json::json!({ "amount": amount })),
                now,
            )
            .await;
        info!(escrow_id = %escrow_id, amount, "Escrow funded");

        Ok(record.escrow.clone())
    }

    /// Record the AI agent's signed verdict
    pub async fn submit_verification(
        &self,
        submission: VerificationSubmission,
    ) -> EscrowResult<Escrow> {
        let escrow_id = submission.escrow_id;
        let record = self.record(&escrow_id).await?;
        let mut record = record.lock().await;
        let now = self.clock.now();
        self.lapse_expired_dispute(&mut record, now).await;

        if record.escrow.dispute_raised {
            return Err(transition_error(
                &record.escrow,
                EscrowStatus::Verified,
                "Verdicts cannot be submitted while a dispute is open",
            ));
        }
        if !record.escrow.status.can_verify() {
            return Err(transition_error(
                &record.escrow,
                EscrowStatus::Verified,
                "Verdicts can only be submitted for funded escrows",
            ));
        }

        if let Err(err) =
            self.verifier
                .verify_submission(&record.escrow.ai_agent_public_key, &submission, now)
        {
            warn!(escrow_id = %escrow_id, error = %err, "Rejected verdict");
            return Err(err);
        }

        record.escrow.verification_result = Some(submission.result);
        record.escrow.status = EscrowStatus::Verified;
        record.escrow.verified_at = Some(now);
        record.escrow.updated_at = now;

        self.events
            .record(
                EscrowEventKind::VerificationSubmitted,
                escrow_id,
                None,
                Some(record.escrow.status.to_string()),
                Some(serde_json::json!({
                    "result": submission.result,
                    "evidence_hash": submission.evidence_hash,
                    "timestamp": submission.timestamp,
                })),
                now,
            )
            .await;
        info!(escrow_id = %escrow_id, result = submission.result, "Verdict recorded");

        Ok(record.escrow.clone())
    }

    /// Pay the seller and the treasury after a favorable verdict
    pub async fn release_funds(&self, caller: Address, escrow_id: EscrowId) -> EscrowResult<Escrow> {
        let record = self.record(&escrow_id).await?;
        let mut record = record.lock().await;
        let now = self.clock.now();
        self.lapse_expired_dispute(&mut record, now).await;

        self.ensure_settleable(&record.escrow, &caller, EscrowStatus::Released)?;
        if record.escrow.verification_result != Some(true) {
            return Err(transition_error(
                &record.escrow,
                EscrowStatus::Released,
                "Release requires a verdict in favor of the seller",
            ));
        }

        let split = self.fees.split(record.escrow.amount)?;
        self.balances
            .credit_all(&[
                (record.escrow.seller, split.seller_amount),
                (self.config.treasury, split.fee_amount),
            ])
            .await?;

        record.vault.balance = 0;
        record.escrow.status = EscrowStatus::Released;
        record.escrow.settled_at = Some(now);
        record.escrow.updated_at = now;
        debug_assert!(record.escrow.is_consistent_with(&record.vault));

        self.events
            .record(
                EscrowEventKind::FundsReleased,
                escrow_id,
                Some(caller),
                Some(record.escrow.status.to_string()),
                Some(serde_json::json!({
                    "seller_amount": split.seller_amount,
                    "fee_amount": split.fee_amount,
                    "treasury": self.config.treasury,
                })),
                now,
            )
            .await;
        info!(
            escrow_id = %escrow_id,
            seller_amount = split.seller_amount,
            fee_amount = split.fee_amount,
            "Funds released"
        );

        Ok(record.escrow.clone())
    }

    /// Return the full amount to the buyer after an unfavorable verdict, or
    /// after expiry when no verdict was ever recorded
    pub async fn refund_buyer(&self, caller: Address, escrow_id: EscrowId) -> EscrowResult<Escrow> {
        let record = self.record(&escrow_id).await?;
        let mut record = record.lock().await;
        let now = self.clock.now();
        self.lapse_expired_dispute(&mut record, now).await;

        self.ensure_settleable(&record.escrow, &caller, EscrowStatus::Refunded)?;
        let escrow = &record.escrow;
        let reason = match (escrow.status, escrow.verification_result) {
            (EscrowStatus::Verified, Some(false)) => "verdict_rejected",
            (EscrowStatus::Funded, None) if escrow.is_expired(now) => "expired",
            (EscrowStatus::Funded, None) => {
                return Err(transition_error(
                    escrow,
                    EscrowStatus::Refunded,
                    "Escrow has not expired and no verdict is recorded",
                ));
            }
            _ => {
                return Err(transition_error(
                    escrow,
                    EscrowStatus::Refunded,
                    "Refund requires a verdict against the seller",
                ));
            }
        };

        let (buyer, amount) = (escrow.buyer, escrow.amount);
        self.balances.credit_all(&[(buyer, amount)]).await?;

        record.vault.balance = 0;
        record.escrow.status = EscrowStatus::Refunded;
        record.escrow.settled_at = Some(now);
        record.escrow.updated_at = now;
        debug_assert!(record.escrow.is_consistent_with(&record.vault));

        self.events
            .record(
                EscrowEventKind::BuyerRefunded,
                escrow_id,
                Some(caller),
                Some(record.escrow.status.to_string()),
                Some(serde_json::json!({ "amount": amount, "reason": reason })),
                now,
            )
            .await;
        info!(escrow_id = %escrow_id, amount, reason, "Buyer refunded");

        Ok(record.escrow.clone())
    }

    /// Get an escrow by ID
    pub async fn get_escrow(&self, escrow_id: &EscrowId) -> EscrowResult<Escrow> {
        let record = self.record(escrow_id).await?;
        let record = record.lock().await;
        Ok(record.escrow.clone())
    }

    /// Get the vault of an escrow
    pub async fn vault(&self, escrow_id: &EscrowId) -> EscrowResult<Vault> {
        let record = self.record(escrow_id).await?;
        let record = record.lock().await;
        Ok(record.vault.clone())
    }

    /// Get all escrows where `party` is buyer or seller
    pub async fn escrows_for_party(&self, party: &Address) -> Vec<Escrow> {
        let records: Vec<_> = self.escrows.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for record in records {
            let record = record.lock().await;
            if record.escrow.is_party(party) {
                out.push(record.escrow.clone());
            }
        }
        out.sort_by_key(|escrow| escrow.created_at);
        out
    }

    pub(crate) async fn record(
        &self,
        escrow_id: &EscrowId,
    ) -> EscrowResult<Arc<Mutex<EscrowRecord>>> {
        self.escrows
            .read()
            .await
            .get(escrow_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found(format!("Escrow {}", escrow_id)))
    }

    fn ensure_settleable(
        &self,
        escrow: &Escrow,
        caller: &Address,
        to_state: EscrowStatus,
    ) -> EscrowResult<()> {
        if !escrow.is_party(caller) {
            return Err(EscrowError::unauthorized_party(
                "Only the buyer or the seller can settle an escrow",
            ));
        }
        if escrow.status == EscrowStatus::Disputed {
            return Err(EscrowError::DisputeActive(escrow.id.to_string()));
        }
        escrow
            .status
            .validate_transition(to_state)
            .map_err(|_| transition_error(escrow, to_state, "Escrow is not settleable"))
    }

    /// Validate escrow creation request
    fn validate_initialize_request(
        &self,
        buyer: &Address,
        request: &InitializeEscrowRequest,
        now: DateTime<Utc>,
    ) -> EscrowResult<()> {
        if request.amount == 0 {
            return Err(EscrowError::InvalidAmount(
                "Amount must be greater than 0".to_string(),
            ));
        }
        if request.expiry <= now {
            return Err(EscrowError::InvalidExpiry(format!(
                "Expiry {} is not in the future",
                request.expiry
            )));
        }
        if *buyer == request.seller {
            return Err(EscrowError::unauthorized_party(
                "Buyer and seller must differ",
            ));
        }
        parse_agent_key(&request.ai_agent_public_key)?;
        Ok(())
    }
}

pub(crate) fn transition_error(escrow: &Escrow, to_state: EscrowStatus, reason: &str) -> EscrowError {
    EscrowError::state_transition(
        escrow.status.to_string(),
        to_state.to_string(),
        reason.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use ed25519_dalek::SigningKey;

    const START: i64 = 1_700_000_000;

    struct Fixture {
        ledger: EscrowLedger,
        clock: Arc<ManualClock>,
        balances: Arc<TokenBalances>,
        agent: SigningKey,
    }

    fn addr(b: u8) -> Address {
        Address::new([b; 32])
    }

    const BUYER: u8 = 1;
    const SELLER: u8 = 2;
    const TREASURY: u8 = 3;

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_unix(START));
        let balances = Arc::new(TokenBalances::new());
        let config = LedgerConfig {
            treasury: addr(TREASURY),
            ..LedgerConfig::default()
        };
        let ledger = EscrowLedger::new(
            config,
            VerificationServiceConfig::default(),
            clock.clone(),
            balances.clone(),
            Arc::new(EventLog::new()),
        )
        .unwrap();
        balances.credit(addr(BUYER), 5_000_000).await.unwrap();

        Fixture {
            ledger,
            clock,
            balances,
            agent: SigningKey::from_bytes(&[7u8; 32]),
        }
    }

    fn request(f: &Fixture, id: u8, amount: u64) -> InitializeEscrowRequest {
        InitializeEscrowRequest {
            id: EscrowId::new([id; 32]),
            seller: addr(SELLER),
            amount,
            ai_agent_public_key: AgentPublicKey(f.agent.verifying_key().to_bytes()),
            metadata_hash: Hash32::new([4; 32]),
            expiry: f.clock.now() + Duration::days(7),
        }
    }

    fn verdict(f: &Fixture, id: u8, result: bool) -> VerificationSubmission {
        VerificationSubmission::sign(
            &f.agent,
            EscrowId::new([id; 32]),
            result,
            Hash32::new([9; 32]),
            f.clock.now().timestamp() as u64,
        )
    }

    async fn funded(f: &Fixture, id: u8, amount: u64) -> EscrowId {
        let escrow = f
            .ledger
            .initialize_escrow(addr(BUYER), request(f, id, amount))
            .await
            .unwrap();
        f.ledger.deposit_funds(addr(BUYER), escrow.id).await.unwrap();
        escrow.id
    }

    #[tokio::test]
    async fn test_initialize_computes_fee() {
        let f = fixture().await;
        let escrow = f
            .ledger
            .initialize_escrow(addr(BUYER), request(&f, 1, 999))
            .await
            .unwrap();
        assert_eq!(escrow.status, EscrowStatus::Created);
        assert_eq!(escrow.fee_amount, 19);
        assert_eq!(escrow.seller_amount(), 980);
        assert_eq!(f.ledger.vault(&escrow.id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_initialize_rejects_bad_requests() {
        let f = fixture().await;

        let duplicate = request(&f, 1, 100);
        f.ledger
            .initialize_escrow(addr(BUYER), duplicate.clone())
            .await
            .unwrap();
        assert!(matches!(
            f.ledger.initialize_escrow(addr(BUYER), duplicate).await,
            Err(EscrowError::AlreadyExists(_))
        ));

        assert!(matches!(
            f.ledger.initialize_escrow(addr(BUYER), request(&f, 2, 0)).await,
            Err(EscrowError::InvalidAmount(_))
        ));

        let mut past = request(&f, 3, 100);
        past.expiry = f.clock.now();
        assert!(matches!(
            f.ledger.initialize_escrow(addr(BUYER), past).await,
            Err(EscrowError::InvalidExpiry(_))
        ));

        assert!(matches!(
            f.ledger.initialize_escrow(addr(SELLER), request(&f, 4, 100)).await,
            Err(EscrowError::UnauthorizedParty(_))
        ));

        assert!(matches!(
            f.ledger
                .initialize_escrow(addr(BUYER), request(&f, 5, u64::MAX))
                .await,
            Err(EscrowError::MathOverflow(_))
        ));
        assert!(matches!(
            f.ledger.get_escrow(&EscrowId::new([5; 32])).await,
            Err(EscrowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deposit_moves_exact_amount() {
        let f = fixture().await;
        let id = funded(&f, 1, 1_000_000).await;

        assert_eq!(f.balances.balance_of(&addr(BUYER)).await, 4_000_000);
        let vault = f.ledger.vault(&id).await.unwrap();
        assert_eq!(vault.balance, 1_000_000);
        assert_eq!(vault.address, Vault::derive_address(&id));
        assert_eq!(
            f.ledger.get_escrow(&id).await.unwrap().status,
            EscrowStatus::Funded
        );
    }

    #[tokio::test]
    async fn test_deposit_rejections_have_no_side_effects() {
        let f = fixture().await;
        let escrow = f
            .ledger
            .initialize_escrow(addr(BUYER), request(&f, 1, 6_000_000))
            .await
            .unwrap();

        assert!(matches!(
            f.ledger.deposit_funds(addr(SELLER), escrow.id).await,
            Err(EscrowError::UnauthorizedParty(_))
        ));
        assert!(matches!(
            f.ledger.deposit_funds(addr(BUYER), escrow.id).await,
            Err(EscrowError::InsufficientFunds { .. })
        ));
        assert_eq!(f.balances.balance_of(&addr(BUYER)).await, 5_000_000);
        assert_eq!(
            f.ledger.get_escrow(&escrow.id).await.unwrap().status,
            EscrowStatus::Created
        );

        let id = funded(&f, 2, 100).await;
        assert!(matches!(
            f.ledger.deposit_funds(addr(BUYER), id).await,
            Err(EscrowError::InvalidStateTransition { .. })
        ));
        assert_eq!(f.balances.balance_of(&addr(BUYER)).await, 4_999_900);
    }

    #[tokio::test]
    async fn test_verdict_then_release() {
        let f = fixture().await;
        let id = funded(&f, 1, 1_000_000).await;

        let escrow = f.ledger.submit_verification(verdict(&f, 1, true)).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Verified);
        assert_eq!(escrow.verification_result, Some(true));

        let escrow = f.ledger.release_funds(addr(SELLER), id).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert_eq!(f.balances.balance_of(&addr(SELLER)).await, 980_000);
        assert_eq!(f.balances.balance_of(&addr(TREASURY)).await, 20_000);
        assert_eq!(f.ledger.vault(&id).await.unwrap().balance, 0);

        assert!(matches!(
            f.ledger.release_funds(addr(SELLER), id).await,
            Err(EscrowError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_verdict_accepted_once() {
        let f = fixture().await;
        funded(&f, 1, 100).await;

        let submission = verdict(&f, 1, true);
        f.ledger.submit_verification(submission.clone()).await.unwrap();
        assert!(matches!(
            f.ledger.submit_verification(submission).await,
            Err(EscrowError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_verdict_before_funding_rejected() {
        let f = fixture().await;
        f.ledger
            .initialize_escrow(addr(BUYER), request(&f, 1, 100))
            .await
            .unwrap();
        assert!(matches!(
            f.ledger.submit_verification(verdict(&f, 1, true)).await,
            Err(EscrowError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_verdict_rejected() {
        let f = fixture().await;
        let id = funded(&f, 1, 100).await;

        let stale = verdict(&f, 1, true);
        f.clock.advance(Duration::minutes(10));
        assert!(matches!(
            f.ledger.submit_verification(stale).await,
            Err(EscrowError::TimestampTooOld { .. })
        ));
        assert_eq!(
            f.ledger.get_escrow(&id).await.unwrap().status,
            EscrowStatus::Funded
        );
    }

    #[tokio::test]
    async fn test_negative_verdict_refunds() {
        let f = fixture().await;
        let id = funded(&f, 1, 1_000).await;
        f.ledger.submit_verification(verdict(&f, 1, false)).await.unwrap();

        assert!(matches!(
            f.ledger.release_funds(addr(SELLER), id).await,
            Err(EscrowError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            f.ledger.refund_buyer(addr(9), id).await,
            Err(EscrowError::UnauthorizedParty(_))
        ));

        let escrow = f.ledger.refund_buyer(addr(BUYER), id).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Refunded);
        assert_eq!(f.balances.balance_of(&addr(BUYER)).await, 5_000_000);
        assert_eq!(f.ledger.vault(&id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_positive_verdict_blocks_refund() {
        let f = fixture().await;
        let id = funded(&f, 1, 1_000).await;
        f.ledger.submit_verification(verdict(&f, 1, true)).await.unwrap();
        f.clock.advance(Duration::days(30));

        assert!(matches!(
            f.ledger.refund_buyer(addr(BUYER), id).await,
            Err(EscrowError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_expiry_refund_without_verdict() {
        let f = fixture().await;
        let id = funded(&f, 1, 1_000).await;

        assert!(matches!(
            f.ledger.refund_buyer(addr(BUYER), id).await,
            Err(EscrowError::InvalidStateTransition { .. })
        ));

        f.clock.advance(Duration::days(7) + Duration::seconds(1));
        let escrow = f.ledger.refund_buyer(addr(BUYER), id).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Refunded);
        assert_eq!(f.balances.balance_of(&addr(BUYER)).await, 5_000_000);
    }

    #[tokio::test]
    async fn test_escrows_for_party() {
        let f = fixture().await;
        funded(&f, 1, 10).await;
        funded(&f, 2, 10).await;

        assert_eq!(f.ledger.escrows_for_party(&addr(BUYER)).await.len(), 2);
        assert_eq!(f.ledger.escrows_for_party(&addr(SELLER)).await.len(), 2);
        assert!(f.ledger.escrows_for_party(&addr(TREASURY)).await.is_empty());
    }
}

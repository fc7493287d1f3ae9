//! Main Escrow Node - High-level API for the escrow system
//!
//! Wires the protocol config, ledger, bridge, balances and event log
//! together from one configuration, and supplies the current
//! `ProtocolConfig` snapshot to operations that need authorization.

use crate::{
    balances::TokenBalances,
    bridge::{BridgeConfig, UniversalEscrowBridge},
    clock::{Clock, SystemClock},
    dispute::DisputeDecision,
    error::EscrowError,
    events::EventLog,
    ledger::{EscrowLedger, LedgerConfig},
    models::{Address, Escrow, EscrowId, UniversalEscrow},
    protocol_config::{ProtocolConfig, ProtocolConfigStore},
    verification_service::VerificationServiceConfig,
    EscrowResult,
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, path::Path, sync::Arc};
use tracing::info;

/// Environment variable prefix, e.g. `ESCROW__LEDGER__FEE_RATE_PERCENT=2`
pub const ENV_PREFIX: &str = "ESCROW";

/// Configuration for the escrow node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowNodeConfig {
    /// Escrow ledger configuration
    pub ledger: LedgerConfig,
    /// Verification service configuration
    pub verification: VerificationServiceConfig,
    /// Cross-chain bridge configuration
    pub bridge: BridgeConfig,
}

impl EscrowNodeConfig {
    /// Layered config that passed `validate`
    pub fn load(path: Option<&Path>) -> EscrowResult<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, an optional config file and `ESCROW__*` variables
    /// without validating the result
    pub fn read(path: Option<&Path>) -> EscrowResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> EscrowResult<()> {
        self.ledger.validate()?;
        if self.verification.freshness_window_secs == 0 {
            return Err(EscrowError::config("Freshness window must be non-zero"));
        }
        if self.ledger.treasury == Address::default() {
            return Err(EscrowError::config("Treasury address must be set"));
        }
        if self.bridge.gateway == Address::default() {
            return Err(EscrowError::config("Gateway address must be set"));
        }
        Ok(())
    }
}

/// Main escrow node that coordinates all components
pub struct EscrowNode {
    protocol: Arc<ProtocolConfigStore>,
    ledger: Arc<EscrowLedger>,
    bridge: Arc<UniversalEscrowBridge>,
    balances: Arc<TokenBalances>,
    events: Arc<EventLog>,
}

impl EscrowNode {
    /// Create a new escrow node driven by `clock`
    pub fn new(config: EscrowNodeConfig, clock: Arc<dyn Clock>) -> EscrowResult<Self> {
        config.validate()?;
        info!(
            fee_rate_percent = config.ledger.fee_rate_percent,
            dispute_window_secs = config.ledger.dispute_window_secs,
            treasury = %config.ledger.treasury,
            gateway = %config.bridge.gateway,
            "Starting escrow node"
        );

        let balances = Arc::new(TokenBalances::new());
        let events = Arc::new(EventLog::new());
        let ledger = EscrowLedger::new(
            config.ledger,
            config.verification,
            clock.clone(),
            balances.clone(),
            events.clone(),
        )?;
        let bridge = UniversalEscrowBridge::new(config.bridge, clock, events.clone());

        Ok(Self {
            protocol: Arc::new(ProtocolConfigStore::new()),
            ledger: Arc::new(ledger),
            bridge: Arc::new(bridge),
            balances,
            events,
        })
    }

    /// Create a node on the monotonic system clock
    pub fn with_system_clock(config: EscrowNodeConfig) -> EscrowResult<Self> {
        Self::new(config, Arc::new(SystemClock::new()))
    }

    pub fn ledger(&self) -> &Arc<EscrowLedger> {
        &self.ledger
    }

    pub fn bridge(&self) -> &Arc<UniversalEscrowBridge> {
        &self.bridge
    }

    pub fn balances(&self) -> &Arc<TokenBalances> {
        &self.balances
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn protocol(&self) -> &Arc<ProtocolConfigStore> {
        &self.protocol
    }

    pub async fn initialize_config(
        &self,
        caller: Address,
        admins: BTreeSet<Address>,
    ) -> EscrowResult<ProtocolConfig> {
        self.protocol.initialize(caller, admins).await
    }

    pub async fn add_admin(&self, caller: Address, admin: Address) -> EscrowResult<ProtocolConfig> {
        self.protocol.add_admin(caller, admin).await
    }

    pub async fn remove_admin(
        &self,
        caller: Address,
        admin: Address,
    ) -> EscrowResult<ProtocolConfig> {
        self.protocol.remove_admin(caller, admin).await
    }

    /// Resolve a dispute against the current admin set
    pub async fn resolve_dispute(
        &self,
        caller: Address,
        escrow_id: EscrowId,
        decision: DisputeDecision,
    ) -> EscrowResult<Escrow> {
        let config = self.protocol.snapshot().await?;
        self.ledger
            .resolve_dispute(&config, caller, escrow_id, decision)
            .await
    }

    /// Push the KYC flag for a universal escrow; authority only
    pub async fn update_zkme_verification(
        &self,
        caller: Address,
        escrow_id: EscrowId,
        verified: bool,
    ) -> EscrowResult<UniversalEscrow> {
        let config = self.protocol.snapshot().await?;
        self.bridge
            .update_zkme_verification(&config, caller, escrow_id, verified)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MAX_DISPUTE_WINDOW_SECS;
    use std::io::Write;

    fn configured() -> EscrowNodeConfig {
        let mut config = EscrowNodeConfig::default();
        config.ledger.treasury = Address::new([0x11; 32]);
        config.bridge.gateway = Address::new([0x22; 32]);
        config
    }

    fn write_config(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("escrow-node-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = configured();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.fee_rate_percent, 2);
        assert_eq!(config.ledger.dispute_window_secs, 72 * 3600);
        assert_eq!(config.verification.freshness_window_secs, 300);
    }

    #[test]
    fn test_zero_addresses_rejected() {
        let mut config = configured();
        config.ledger.treasury = Address::default();
        assert!(matches!(config.validate(), Err(EscrowError::Config(_))));

        let mut config = configured();
        config.bridge.gateway = Address::default();
        assert!(matches!(config.validate(), Err(EscrowError::Config(_))));

        assert!(EscrowNode::with_system_clock(EscrowNodeConfig::default()).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let treasury = Address::new([0x11; 32]);
        let gateway = Address::new([0x22; 32]);
        let path = std::env::temp_dir().join(format!("escrow-node-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[ledger]\nfee_rate_percent = 10\ntreasury = \"{}\"\n\n[verification]\nfreshness_window_secs = 120\n\n[bridge]\ngateway = \"{}\"\n",
            treasury, gateway
        )
        .unwrap();

        let config = EscrowNodeConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.ledger.fee_rate_percent, 10);
        assert_eq!(config.ledger.treasury, treasury);
        assert_eq!(config.ledger.dispute_window_secs, 72 * 3600);
        assert_eq!(config.verification.freshness_window_secs, 120);
        assert_eq!(config.verification.max_clock_skew_secs, 30);
        assert_eq!(config.bridge.gateway, gateway);
    }

    #[test]
    fn test_invalid_fee_rate_rejected() {
        let path = write_config("[ledger]\nfee_rate_percent = 150\n");
        let result = EscrowNodeConfig::load(Some(&path));
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(EscrowError::Config(_))));
    }

    #[test]
    fn test_oversized_dispute_window_rejected() {
        let path = write_config(&format!(
            "[ledger]\ndispute_window_secs = {}\n",
            i64::MAX as u64 / 1000 + 1
        ));
        let config = EscrowNodeConfig::read(Some(&path)).unwrap();
        let result = EscrowNodeConfig::load(Some(&path));
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(EscrowError::Config(_))));
        assert!(config.ledger.dispute_window().is_err());

        let mut config = configured();
        config.ledger.dispute_window_secs = MAX_DISPUTE_WINDOW_SECS + 1;
        assert!(matches!(config.validate(), Err(EscrowError::Config(_))));
        config.ledger.dispute_window_secs = MAX_DISPUTE_WINDOW_SECS;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_resolve_requires_initialized_config() {
        let node = EscrowNode::with_system_clock(configured()).unwrap();
        assert!(matches!(
            node.resolve_dispute(
                Address::new([1; 32]),
                EscrowId::new([1; 32]),
                DisputeDecision::FavorBuyer
            )
            .await,
            Err(EscrowError::NotInitialized)
        ));
    }
}

//! Escrow CLI - operator tooling for the escrow engine
//!
//! - Generate verification agent keys
//! - Sign verdicts over the canonical message
//! - Preview fee splits
//! - Run an in-memory escrow lifecycle end to end
//! - Print the effective configuration

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use escrow_engine::{
    clock::{Clock, ManualClock},
    dispute::DisputeDecision,
    fees,
    ledger::InitializeEscrowRequest,
    models::{AgentPublicKey, Address, EscrowId, Hash32},
    node::{EscrowNode, EscrowNodeConfig},
    verification_service::VerificationSubmission,
};
use rand::{rngs::OsRng, RngCore};
use std::{collections::BTreeSet, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "escrow")]
#[command(about = "Attested escrow ledger tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, env = "ESCROW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an Ed25519 verification agent keypair
    Keygen,

    /// Sign a verification verdict
    SignVerdict {
        /// Agent secret key, hex
        #[arg(long, env = "ESCROW_AGENT_SECRET")]
        secret: String,

        #[arg(long)]
        escrow_id: EscrowId,

        /// Verdict: true pays the seller, false refunds the buyer
        #[arg(long, action = clap::ArgAction::Set)]
        result: bool,

        #[arg(long)]
        evidence_hash: Hash32,

        /// Unix seconds; defaults to now
        #[arg(long)]
        timestamp: Option<u64>,
    },

    /// Show how an amount splits between seller and treasury
    FeeSplit {
        amount: u64,

        /// Fee rate in whole percent; defaults to the configured rate
        #[arg(long)]
        rate: Option<u64>,
    },

    /// Run a full escrow lifecycle in memory and print the audit log
    Demo {
        #[arg(long, default_value_t = 1_000_000)]
        amount: u64,

        /// Verdict the simulated agent signs
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        result: bool,

        /// Have the buyer dispute and an admin overturn the verdict
        #[arg(long)]
        dispute: bool,
    },

    /// Show effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let path = cli.config.as_deref();

    match cli.command {
        Commands::Keygen => keygen(),
        Commands::SignVerdict {
            secret,
            escrow_id,
            result,
            evidence_hash,
            timestamp,
        } => sign_verdict(&secret, escrow_id, result, evidence_hash, timestamp),
        Commands::FeeSplit { amount, rate } => {
            let rate = match rate {
                Some(rate) => rate,
                None => {
                    EscrowNodeConfig::read(path)
                        .context("Failed to read config")?
                        .ledger
                        .fee_rate_percent
                }
            };
            let split = fees::split(amount, rate)?;
            print_json(&serde_json::json!({
                "amount": amount,
                "fee_rate_percent": rate,
                "fee_amount": split.fee_amount,
                "seller_amount": split.seller_amount,
            }))
        }
        Commands::Demo {
            amount,
            result,
            dispute,
        } => {
            let config = EscrowNodeConfig::read(path).context("Failed to read config")?;
            demo(config, amount, result, dispute).await
        }
        Commands::Config => {
            let config = EscrowNodeConfig::load(path).context("Failed to load config")?;
            print_json(&serde_json::to_value(&config)?)
        }
    }
}

fn keygen() -> Result<()> {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    let key = SigningKey::from_bytes(&secret);

    print_json(&serde_json::json!({
        "secret_key": hex::encode(key.to_bytes()),
        "public_key": hex::encode(key.verifying_key().to_bytes()),
    }))
}

fn parse_secret(secret: &str) -> Result<SigningKey> {
    let bytes = hex::decode(secret.trim_start_matches("0x")).context("Secret key is not hex")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Secret key must be 32 bytes"))?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn sign_verdict(
    secret: &str,
    escrow_id: EscrowId,
    result: bool,
    evidence_hash: Hash32,
    timestamp: Option<u64>,
) -> Result<()> {
    let key = parse_secret(secret)?;
    let timestamp = match timestamp {
        Some(ts) => ts,
        None => u64::try_from(chrono::Utc::now().timestamp()).context("Clock before epoch")?,
    };
    let submission = VerificationSubmission::sign(&key, escrow_id, result, evidence_hash, timestamp);

    print_json(&serde_json::json!({
        "escrow_id": submission.escrow_id,
        "result": submission.result,
        "evidence_hash": submission.evidence_hash,
        "timestamp": submission.timestamp,
        "signer": submission.signer,
        "message": hex::encode(submission.message()),
        "signature": hex::encode(submission.signature),
    }))
}

async fn demo(mut config: EscrowNodeConfig, amount: u64, result: bool, dispute: bool) -> Result<()> {
    let authority = Address::new([0xa0; 32]);
    let admin = Address::new([0xa1; 32]);
    let buyer = Address::new([0xb0; 32]);
    let seller = Address::new([0x5e; 32]);
    if config.ledger.treasury == Address::default() {
        config.ledger.treasury = Address::new([0x7e; 32]);
    }
    if config.bridge.gateway == Address::default() {
        config.bridge.gateway = Address::new([0x9a; 32]);
    }
    let treasury = config.ledger.treasury;

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let node = EscrowNode::new(config, clock.clone())?;
    node.initialize_config(authority, BTreeSet::from([admin])).await?;
    node.balances().credit(buyer, amount).await?;

    let agent = SigningKey::from_bytes(&[0x42; 32]);
    let id = EscrowId::new([0xe5; 32]);
    let ledger = node.ledger();

    ledger
        .initialize_escrow(
            buyer,
            InitializeEscrowRequest {
                id,
                seller,
                amount,
                ai_agent_public_key: AgentPublicKey(agent.verifying_key().to_bytes()),
                metadata_hash: Hash32::new([0x11; 32]),
                expiry: clock.now() + Duration::days(7),
            },
        )
        .await?;
    ledger.deposit_funds(buyer, id).await?;

    clock.advance(Duration::minutes(10));
    let timestamp = u64::try_from(clock.now().timestamp()).context("Clock before epoch")?;
    let verdict =
        VerificationSubmission::sign(&agent, id, result, Hash32::new([0x22; 32]), timestamp);
    ledger.submit_verification(verdict).await?;

    if dispute {
        ledger.raise_dispute(buyer, id).await?;
        clock.advance(Duration::hours(24));
        let decision = if result {
            DisputeDecision::FavorBuyer
        } else {
            DisputeDecision::FavorSeller
        };
        node.resolve_dispute(admin, id, decision).await?;
    }

    let escrow = ledger.get_escrow(&id).await?;
    let escrow = if escrow.verification_result == Some(true) {
        ledger.release_funds(seller, id).await?
    } else {
        ledger.refund_buyer(buyer, id).await?
    };
    info!(escrow_id = %id, status = %escrow.status, "Demo escrow settled");

    print_json(&serde_json::json!({
        "escrow": escrow,
        "balances": {
            "buyer": node.balances().balance_of(&buyer).await,
            "seller": node.balances().balance_of(&seller).await,
            "treasury": node.balances().balance_of(&treasury).await,
        },
        "events": node.events().events_for(&id).await,
    }))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//! Core data models for the escrow ledger
//!
//! Fixed-width identifiers, the escrow record and its vault, the escrow
//! state machine, and the cross-chain (universal) escrow record.

use crate::{error::EscrowError, EscrowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

const VAULT_DOMAIN: &[u8] = b"escrow-vault";

/// 64-byte Ed25519 signature as carried on the wire
pub type SignatureBytes = [u8; 64];

macro_rules! bytes32_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut out = [0u8; 32];
                hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
                Ok(Self(out))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

bytes32_type!(
    /// Caller-supplied, globally unique escrow identifier
    EscrowId
);
bytes32_type!(
    /// Opaque account address (buyer, seller, treasury, admin, gateway, vault)
    Address
);
bytes32_type!(
    /// 32-byte cryptographic hash (evidence, metadata, message ids)
    Hash32
);
bytes32_type!(
    /// Ed25519 public key of the AI verification agent
    AgentPublicKey
);

/// Escrow state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Escrow initialized but vault not yet funded
    Created,
    /// Buyer deposited `amount` into the vault
    Funded,
    /// A verdict (AI or admin) is recorded
    Verified,
    /// Under arbitration
    Disputed,
    /// Funds paid out to seller and treasury
    Released,
    /// Funds returned to buyer
    Refunded,
}

impl EscrowStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    /// Check if the vault must hold the full amount in this state
    pub fn holds_funds(&self) -> bool {
        matches!(self, Self::Funded | Self::Verified | Self::Disputed)
    }

    pub fn can_deposit(&self) -> bool {
        matches!(self, Self::Created)
    }

    pub fn can_verify(&self) -> bool {
        matches!(self, Self::Funded)
    }

    pub fn can_dispute(&self) -> bool {
        matches!(self, Self::Funded | Self::Verified)
    }

    pub fn can_settle(&self) -> bool {
        matches!(self, Self::Verified)
    }

    /// Validate a state transition
    pub fn validate_transition(&self, to_state: EscrowStatus) -> EscrowResult<()> {
        let valid = matches!(
            (self, &to_state),
            (Self::Created, Self::Funded)
                | (Self::Funded, Self::Verified)
                | (Self::Funded, Self::Disputed)
                | (Self::Verified, Self::Disputed)
                | (Self::Disputed, Self::Verified)
                // dispute lapsed with no verdict on record
                | (Self::Disputed, Self::Funded)
                | (Self::Verified, Self::Released)
                | (Self::Verified, Self::Refunded)
                // expiry escape hatch, no verdict recorded
                | (Self::Funded, Self::Refunded)
        );

        if valid {
            Ok(())
        } else {
            Err(EscrowError::state_transition(
                format!("{:?}", self),
                format!("{:?}", to_state),
                "Invalid state transition".to_string(),
            ))
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Escrow record between a buyer and a seller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,

    // Parties
    pub buyer: Address,
    pub seller: Address,

    // Value
    pub amount: u64,
    pub fee_amount: u64,
    pub vault: Address,

    pub status: EscrowStatus,

    // Verification
    pub ai_agent_public_key: AgentPublicKey,
    pub metadata_hash: Hash32,
    pub verification_result: Option<bool>,

    // Dispute
    pub dispute_raised: bool,
    pub dispute_deadline: Option<DateTime<Utc>>,
    /// Status to return to if the dispute lapses unresolved
    pub status_before_dispute: Option<EscrowStatus>,

    // Timestamps
    pub expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Escrow {
    /// Check whether `addr` is the buyer or the seller
    pub fn is_party(&self, addr: &Address) -> bool {
        self.buyer == *addr || self.seller == *addr
    }

    /// Amount paid to the seller on release
    pub fn seller_amount(&self) -> u64 {
        self.amount - self.fee_amount
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }

    /// Status-dependent invariants between the record and its vault
    pub fn is_consistent_with(&self, vault: &Vault) -> bool {
        let balance_ok = if self.status.holds_funds() {
            vault.balance == self.amount
        } else {
            vault.balance == 0
        };
        let deadline_ok =
            self.dispute_deadline.is_some() == (self.status == EscrowStatus::Disputed);
        let disputed = self.status == EscrowStatus::Disputed;
        let dispute_ok = self.dispute_raised == disputed
            && self.status_before_dispute.is_some() == disputed;
        balance_ok && deadline_ok && dispute_ok && vault.address == self.vault
    }
}

/// Custodial balance bound 1:1 to an escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub address: Address,
    pub escrow_id: EscrowId,
    pub balance: u64,
}

impl Vault {
    /// Deterministic vault address for an escrow id
    pub fn derive_address(escrow_id: &EscrowId) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(VAULT_DOMAIN);
        hasher.update(escrow_id.as_bytes());
        Address(hasher.finalize().into())
    }

    pub fn empty(escrow_id: EscrowId) -> Self {
        Self {
            address: Self::derive_address(&escrow_id),
            escrow_id,
            balance: 0,
        }
    }
}

/// Cross-chain escrow state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniversalStatus {
    /// Record created, awaiting KYC or the initiating relay message
    Initiated,
    /// Escrow live on the destination chain
    Active,
    Completed,
    Refunded,
    Cancelled,
}

impl UniversalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Cancelled)
    }
}

/// Cross-chain escrow record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalEscrow {
    pub id: EscrowId,
    pub source_chain: String,
    pub destination_chain: String,
    pub zkme_verification: bool,
    pub status: UniversalStatus,

    // Filled in by the initiating relay message
    pub amount: Option<u64>,
    pub recipient: Option<Address>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What external indexers see of a universal escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalEscrowView {
    pub status: UniversalStatus,
    pub zkme_verification: bool,
}

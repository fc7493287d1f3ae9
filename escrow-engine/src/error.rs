//! Error types for the escrow ledger
//!
//! Every operation returns a named error kind so that callers (database
//! mirrors, UIs, notification workers) can branch on the specific failure.
//! An error always means the operation applied nothing.

use thiserror::Error;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// A non-authority caller tried to mutate the protocol config
    #[error("Unauthorized: caller is not the protocol authority")]
    Unauthorized,

    /// A non-admin caller tried to resolve a dispute
    #[error("Unauthorized admin: caller is not in the admin set")]
    UnauthorizedAdmin,

    /// Verdict was signed by a key other than the escrow's registered agent key
    #[error("Unauthorized AI agent: signer does not match the registered agent key")]
    UnauthorizedAIAgent,

    /// Ed25519 verification failed against the canonical message
    #[error("Invalid signature")]
    InvalidSignature,

    /// Verdict timestamp is older than the freshness window
    #[error("Timestamp too old: {age_secs}s exceeds the {window_secs}s freshness window")]
    TimestampTooOld { age_secs: u64, window_secs: u64 },

    /// Verdict timestamp lies in the future beyond the tolerated skew
    #[error("Timestamp too new: {ahead_secs}s ahead exceeds the {skew_secs}s skew tolerance")]
    TimestampTooNew { ahead_secs: u64, skew_secs: u64 },

    /// State machine transition errors
    #[error("Invalid state transition: {from_state} -> {to_state}: {reason}")]
    InvalidStateTransition {
        from_state: String,
        to_state: String,
        reason: String,
    },

    /// Operation blocked while a dispute is open
    #[error("Dispute active on escrow {0}")]
    DisputeActive(String),

    /// Dispute resolution attempted after the deadline
    #[error("Dispute expired on escrow {0}")]
    DisputeExpired(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Math overflow: {0}")]
    MathOverflow(String),

    #[error("Config already initialized")]
    AlreadyInitialized,

    #[error("Config not initialized")]
    NotInitialized,

    /// Caller is not a counterparty of the escrow
    #[error("Unauthorized party: {0}")]
    UnauthorizedParty(String),

    /// Relay caller is not the trusted gateway
    #[error("Unauthorized gateway: {0}")]
    UnauthorizedGateway(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("Invalid agent key: {0}")]
    InvalidAgentKey(String),

    /// Relayed message names chains that do not match the escrow record
    #[error("Chain mismatch: {0}")]
    ChainMismatch(String),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EscrowError {
    /// Create a state transition error
    pub fn state_transition<S: Into<String>>(from_state: S, to_state: S, reason: S) -> Self {
        Self::InvalidStateTransition {
            from_state: from_state.into(),
            to_state: to_state.into(),
            reason: reason.into(),
        }
    }

    /// Create a math overflow error
    pub fn overflow<S: Into<String>>(msg: S) -> Self {
        Self::MathOverflow(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an unauthorized-party error
    pub fn unauthorized_party<S: Into<String>>(msg: S) -> Self {
        Self::UnauthorizedParty(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Stable machine-readable code for this error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::UnauthorizedAdmin => "UnauthorizedAdmin",
            Self::UnauthorizedAIAgent => "UnauthorizedAIAgent",
            Self::InvalidSignature => "InvalidSignature",
            Self::TimestampTooOld { .. } => "TimestampTooOld",
            Self::TimestampTooNew { .. } => "TimestampTooNew",
            Self::InvalidStateTransition { .. } => "InvalidStateTransition",
            Self::DisputeActive(_) => "DisputeActive",
            Self::DisputeExpired(_) => "DisputeExpired",
            Self::InsufficientFunds { .. } => "InsufficientFunds",
            Self::MathOverflow(_) => "MathOverflow",
            Self::AlreadyInitialized => "AlreadyInitialized",
            Self::NotInitialized => "NotInitialized",
            Self::UnauthorizedParty(_) => "UnauthorizedParty",
            Self::UnauthorizedGateway(_) => "UnauthorizedGateway",
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::InvalidAmount(_) => "InvalidAmount",
            Self::InvalidExpiry(_) => "InvalidExpiry",
            Self::InvalidAgentKey(_) => "InvalidAgentKey",
            Self::ChainMismatch(_) => "ChainMismatch",
            Self::InvalidChain(_) => "InvalidChain",
            Self::Config(_) => "Config",
            Self::Serialization(_) => "Serialization",
        }
    }
}

impl From<config::ConfigError> for EscrowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(EscrowError::InvalidSignature.kind(), "InvalidSignature");
        assert_eq!(
            EscrowError::state_transition("Created", "Verified", "not funded").kind(),
            "InvalidStateTransition"
        );
        assert_eq!(EscrowError::overflow("fee").kind(), "MathOverflow");
    }

    #[test]
    fn test_state_transition_message() {
        let err = EscrowError::state_transition("Funded", "Released", "no verdict");
        assert_eq!(
            err.to_string(),
            "Invalid state transition: Funded -> Released: no verdict"
        );
    }
}

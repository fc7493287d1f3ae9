//! Verification Service - Validates signed verdicts from the AI agent
//!
//! The verdict payload is bound to one escrow through a canonical byte
//! message:
//!
//! ```text
//! escrow_id (32) || result (1) || evidence_hash (32) || timestamp (8, little-endian)
//! ```
//!
//! The service is stateless: it checks freshness against a trusted "now",
//! checks the signer against the escrow's registered agent key, and runs
//! strict Ed25519 verification over the exact message bytes.

use crate::{
    error::EscrowError,
    models::{AgentPublicKey, EscrowId, Hash32, SignatureBytes},
    EscrowResult,
};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Length of the canonical verdict message
pub const CANONICAL_MESSAGE_LEN: usize = 32 + 1 + 32 + 8;

/// Configuration for the verification service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationServiceConfig {
    /// Maximum age of a verdict timestamp, in seconds
    pub freshness_window_secs: u64,
    /// Tolerated clock skew for timestamps in the future, in seconds
    pub max_clock_skew_secs: u64,
}

impl Default for VerificationServiceConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 300, // 5 minutes
            max_clock_skew_secs: 30,
        }
    }
}

/// Signed verdict submitted by the verification collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSubmission {
    pub escrow_id: EscrowId,
    pub result: bool,
    pub evidence_hash: Hash32,
    /// Unix seconds at which the verdict was produced
    pub timestamp: u64,
    /// Key that produced `signature`
    pub signer: AgentPublicKey,
    pub signature: SignatureBytes,
}

impl VerificationSubmission {
    /// Produce a signed verdict with `signing_key`
    pub fn sign(
        signing_key: &SigningKey,
        escrow_id: EscrowId,
        result: bool,
        evidence_hash: Hash32,
        timestamp: u64,
    ) -> Self {
        let message = canonical_message(&escrow_id, result, &evidence_hash, timestamp);
        let signature = signing_key.sign(&message);
        Self {
            escrow_id,
            result,
            evidence_hash,
            timestamp,
            signer: AgentPublicKey(signing_key.verifying_key().to_bytes()),
            signature: signature.to_bytes(),
        }
    }

    pub fn message(&self) -> [u8; CANONICAL_MESSAGE_LEN] {
        canonical_message(
            &self.escrow_id,
            self.result,
            &self.evidence_hash,
            self.timestamp,
        )
    }
}

/// Build the canonical message a verdict signature covers
pub fn canonical_message(
    escrow_id: &EscrowId,
    result: bool,
    evidence_hash: &Hash32,
    timestamp: u64,
) -> [u8; CANONICAL_MESSAGE_LEN] {
    let mut msg = [0u8; CANONICAL_MESSAGE_LEN];
    msg[..32].copy_from_slice(escrow_id.as_bytes());
    msg[32] = u8::from(result);
    msg[33..65].copy_from_slice(evidence_hash.as_bytes());
    msg[65..].copy_from_slice(&timestamp.to_le_bytes());
    msg
}

/// Parse a 32-byte agent key into an Ed25519 verifying key
pub fn parse_agent_key(key: &AgentPublicKey) -> EscrowResult<VerifyingKey> {
    VerifyingKey::from_bytes(key.as_bytes())
        .map_err(|e| EscrowError::InvalidAgentKey(format!("{}: {}", key, e)))
}

/// Main verification service
#[derive(Debug, Clone, Default)]
pub struct VerificationService {
    config: VerificationServiceConfig,
}

impl VerificationService {
    /// Create a new verification service
    pub fn new(config: VerificationServiceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerificationServiceConfig {
        &self.config
    }

    /// Reject timestamps outside `[now - window, now + skew]`
    pub fn check_freshness(&self, timestamp: u64, now: DateTime<Utc>) -> EscrowResult<()> {
        let now_secs = u64::try_from(now.timestamp()).unwrap_or(0);

        if timestamp > now_secs {
            let ahead_secs = timestamp - now_secs;
            if ahead_secs > self.config.max_clock_skew_secs {
                return Err(EscrowError::TimestampTooNew {
                    ahead_secs,
                    skew_secs: self.config.max_clock_skew_secs,
                });
            }
        } else {
            let age_secs = now_secs - timestamp;
            if age_secs > self.config.freshness_window_secs {
                return Err(EscrowError::TimestampTooOld {
                    age_secs,
                    window_secs: self.config.freshness_window_secs,
                });
            }
        }

        Ok(())
    }

    /// Verify `signature` over `message` by `signer`, which must be `registered`
    pub fn verify_signature(
        &self,
        message: &[u8],
        signature: &SignatureBytes,
        signer: &AgentPublicKey,
        registered: &AgentPublicKey,
    ) -> EscrowResult<()> {
        if signer != registered {
            return Err(EscrowError::UnauthorizedAIAgent);
        }

        let key = parse_agent_key(registered)?;
        let signature = Signature::from_bytes(signature);
        key.verify_strict(message, &signature)
            .map_err(|_| EscrowError::InvalidSignature)
    }

    /// Full check of a verdict against an escrow's registered key
    pub fn verify_submission(
        &self,
        registered: &AgentPublicKey,
        submission: &VerificationSubmission,
        now: DateTime<Utc>,
    ) -> EscrowResult<()> {
        self.check_freshness(submission.timestamp, now)?;
        self.verify_signature(
            &submission.message(),
            &submission.signature,
            &submission.signer,
            registered,
        )?;

        debug!(
            escrow_id = %submission.escrow_id,
            result = submission.result,
            "Verdict signature accepted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const NOW: i64 = 1_700_000_000;

    fn agent() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(NOW, 0).unwrap()
    }

    fn submission(result: bool) -> VerificationSubmission {
        VerificationSubmission::sign(
            &agent(),
            EscrowId::new([1; 32]),
            result,
            Hash32::new([9; 32]),
            NOW as u64,
        )
    }

    fn registered() -> AgentPublicKey {
        AgentPublicKey(agent().verifying_key().to_bytes())
    }

    #[test]
    fn test_canonical_message_layout() {
        let msg = canonical_message(
            &EscrowId::new([1; 32]),
            true,
            &Hash32::new([2; 32]),
            0x0102_0304_0506_0708,
        );
        assert_eq!(&msg[..32], &[1u8; 32]);
        assert_eq!(msg[32], 1);
        assert_eq!(&msg[33..65], &[2u8; 32]);
        assert_eq!(&msg[65..], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_valid_signature_accepted() {
        let service = VerificationService::default();
        assert!(service
            .verify_submission(&registered(), &submission(true), now())
            .is_ok());
    }

    #[test]
    fn test_other_key_rejected() {
        let service = VerificationService::default();
        let rogue = SigningKey::from_bytes(&[8u8; 32]);
        let forged = VerificationSubmission::sign(
            &rogue,
            EscrowId::new([1; 32]),
            true,
            Hash32::new([9; 32]),
            NOW as u64,
        );
        assert!(matches!(
            service.verify_submission(&registered(), &forged, now()),
            Err(EscrowError::UnauthorizedAIAgent)
        ));
    }

    #[test]
    fn test_rogue_signature_claiming_registered_key_rejected() {
        let service = VerificationService::default();
        let rogue = SigningKey::from_bytes(&[8u8; 32]);
        let mut forged = VerificationSubmission::sign(
            &rogue,
            EscrowId::new([1; 32]),
            true,
            Hash32::new([9; 32]),
            NOW as u64,
        );
        forged.signer = registered();
        assert!(matches!(
            service.verify_submission(&registered(), &forged, now()),
            Err(EscrowError::InvalidSignature)
        ));
    }

    #[test]
    fn test_tampered_fields_rejected() {
        let service = VerificationService::default();

        let mut flipped = submission(false);
        flipped.result = true;
        assert!(matches!(
            service.verify_submission(&registered(), &flipped, now()),
            Err(EscrowError::InvalidSignature)
        ));

        let mut evidence = submission(true);
        evidence.evidence_hash.0[31] ^= 0x01;
        assert!(matches!(
            service.verify_submission(&registered(), &evidence, now()),
            Err(EscrowError::InvalidSignature)
        ));

        let mut stamp = submission(true);
        stamp.timestamp -= 1;
        assert!(matches!(
            service.verify_submission(&registered(), &stamp, now()),
            Err(EscrowError::InvalidSignature)
        ));

        let mut id = submission(true);
        id.escrow_id.0[0] ^= 0x80;
        assert!(matches!(
            service.verify_submission(&registered(), &id, now()),
            Err(EscrowError::InvalidSignature)
        ));
    }

    #[test]
    fn test_freshness_window() {
        let service = VerificationService::default();
        let ts = NOW as u64;

        assert!(service.check_freshness(ts - 300, now()).is_ok());
        assert!(matches!(
            service.check_freshness(ts - 301, now()),
            Err(EscrowError::TimestampTooOld { age_secs: 301, .. })
        ));
        assert!(service.check_freshness(ts + 30, now()).is_ok());
        assert!(matches!(
            service.check_freshness(ts + 31, now()),
            Err(EscrowError::TimestampTooNew { ahead_secs: 31, .. })
        ));
    }
}

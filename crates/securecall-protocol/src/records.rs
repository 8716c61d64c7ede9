//! Persisted record types and their state machine rules.

use serde::{Deserialize, Serialize};

use crate::types::{CallId, CallSide, ChallengeId, IdentityId};

/// Current vault/signature scheme version.
///
/// Version 1: RSA-PSS, 2048-bit modulus, SHA-256, 32-byte PSS salt,
/// private key wrapped with PBKDF2(600k)/AES-256-GCM.
/// Sign and verify paths must agree on these parameters; the version tag
/// makes a mismatch an explicit error instead of a silent false rejection.
pub const VAULT_VERSION: u16 = 1;

/// The four vault fields persisted per identity, plus the scheme version.
///
/// All byte fields are base64url-encoded text (the store only ever sees
/// opaque strings). The wrapped private key can only be opened with the
/// key derived from the owner's password; losing the password loses the
/// vault irrecoverably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub version: u16,
    /// SPKI DER public key, base64url.
    pub public_key: String,
    /// PKCS#8 DER private key sealed with AES-256-GCM, base64url.
    pub wrapped_private_key: String,
    /// 16-byte PBKDF2 salt, base64url.
    pub salt: String,
    /// 12-byte AES-GCM initialization vector, base64url.
    pub iv: String,
}

/// Vault presence as a single tagged state.
///
/// The four vault fields are all-or-nothing; modeling them as one variant
/// makes partial vault state unrepresentable rather than an invariant to
/// check. A password change replaces the whole `Present` payload at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultState {
    Absent,
    Present(VaultRecord),
}

impl VaultState {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn record(&self) -> Option<&VaultRecord> {
        match self {
            Self::Absent => None,
            Self::Present(record) => Some(record),
        }
    }
}

/// A registered identity. Created with `VaultState::Absent`; the vault is
/// populated by a successful vault creation and only ever replaced whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub vault: VaultState,
}

/// Resolution state of a challenge. Pending challenges resolve exactly
/// once, to Verified or Failed, and never transition out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeStatus {
    Pending,
    Verified,
    Failed,
}

impl ChallengeStatus {
    /// Whether the challenge has left `Pending`. A resolved challenge's
    /// nonce is spent and must never be re-verified.
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Verified => f.write_str("verified"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// A proof-of-key-possession challenge. Retained after resolution as an
/// audit trail; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    /// High-entropy single-use nonce, returned to the challenger only.
    pub nonce: String,
    pub challenger_id: IdentityId,
    pub target_id: IdentityId,
    pub status: ChallengeStatus,
}

/// Call lifecycle status.
///
/// Monotonic: `Pending → (Accepted | Rejected)`, `Accepted → Connected →
/// Ended`, with `Ended` also reachable directly from `Accepted` (hang-up
/// before the answer lands). `Rejected` and `Ended` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Pending,
    Accepted,
    Rejected,
    Connected,
    Ended,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Ended)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted)
                | (Self::Pending, Self::Rejected)
                | (Self::Accepted, Self::Connected)
                | (Self::Accepted, Self::Ended)
                | (Self::Connected, Self::Ended)
        )
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Accepted => f.write_str("accepted"),
            Self::Rejected => f.write_str("rejected"),
            Self::Connected => f.write_str("connected"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

/// One call between two identities, shared through the record store.
///
/// `offer` and `answer` are opaque session-description blobs owned by the
/// peer connection layer; the signaling core never interprets them.
/// Records are never physically deleted — a terminal status means
/// "logically dead," retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    pub caller_id: IdentityId,
    pub callee_id: IdentityId,
    pub offer: Option<String>,
    pub answer: Option<String>,
    pub status: CallStatus,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
}

impl CallRecord {
    /// Which side of this call `identity` is, if a party at all.
    pub fn side_of(&self, identity: &IdentityId) -> Option<CallSide> {
        if *identity == self.caller_id {
            Some(CallSide::Caller)
        } else if *identity == self.callee_id {
            Some(CallSide::Callee)
        } else {
            None
        }
    }
}

/// A single trickled network-reachability candidate, tagged with the side
/// that produced it. Candidates form an ordered per-side sequence; the
/// payload is opaque text owned by the peer connection layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub side: CallSide,
    pub payload: String,
}

/// Partial update applied to a call record. Only fields set here are
/// touched; the store applies the patch atomically under a status
/// compare-and-set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallPatch {
    pub offer: Option<String>,
    pub answer: Option<String>,
    pub status: Option<CallStatus>,
}

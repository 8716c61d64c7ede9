use thiserror::Error;

use crate::records::CallStatus;
use crate::types::{CallId, ChallengeId, IdentityId};

/// Signaling error taxonomy.
///
/// Every variant is terminal for the operation that raised it: each one
/// represents a policy violation or integrity failure that retrying with
/// the same input cannot fix. The one exception is [`PatchConflict`],
/// which the coordinator consumes internally by re-reading and
/// re-validating; it never reaches callers.
///
/// [`PatchConflict`]: SignalingError::PatchConflict
#[derive(Debug, Error)]
pub enum SignalingError {
    /// No verified caller identity. Mutations require a challenge-verified
    /// identity first.
    #[error("not authenticated: no verified caller identity")]
    NotAuthenticated,

    /// Authenticated, but not the owner of the mutated field or record.
    /// Security-relevant: callers should log this, not swallow it.
    #[error("unauthorized: {actor} may not {action}")]
    Unauthorized {
        actor: IdentityId,
        action: &'static str,
    },

    /// State machine rule violated — usually a duplicate or raced
    /// operation, routine noise rather than an attack signal.
    #[error("invalid transition: cannot {action} while {state}")]
    InvalidTransition {
        state: String,
        action: &'static str,
    },

    #[error("call not found: {0}")]
    CallNotFound(CallId),

    #[error("challenge not found: {0}")]
    ChallengeNotFound(ChallengeId),

    /// The challenge target has no vault, so there is no public key to
    /// verify against.
    #[error("no public key stored for identity {0}")]
    MissingPublicKey(IdentityId),

    /// Bad encoding of an input (base64, DER, record shape).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Cryptographic machinery failed (RNG, unsupported scheme version).
    /// Distinct from a signature that simply does not verify — that is a
    /// `Failed` challenge, not an error.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Compare-and-set miss: the status moved between read and patch.
    /// Internal to the coordinator's retry loop.
    #[error("patch conflict on call {call_id}: expected {expected}, found {actual}")]
    PatchConflict {
        call_id: CallId,
        expected: CallStatus,
        actual: CallStatus,
    },
}

impl SignalingError {
    /// Convenience constructor for transition violations.
    pub fn invalid_transition(state: impl ToString, action: &'static str) -> Self {
        Self::InvalidTransition {
            state: state.to_string(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_display_names_actor_and_action() {
        let e = SignalingError::Unauthorized {
            actor: IdentityId::from("mallory"),
            action: "accept call",
        };
        let msg = e.to_string();
        assert!(msg.contains("mallory"));
        assert!(msg.contains("accept call"));
    }

    #[test]
    fn invalid_transition_display() {
        let e = SignalingError::invalid_transition(CallStatus::Ended, "attach answer");
        let msg = e.to_string();
        assert!(msg.contains("ended"));
        assert!(msg.contains("attach answer"));
    }

    #[test]
    fn patch_conflict_display() {
        let e = SignalingError::PatchConflict {
            call_id: CallId::from("c1"),
            expected: CallStatus::Pending,
            actual: CallStatus::Accepted,
        };
        let msg = e.to_string();
        assert!(msg.contains("c1"));
        assert!(msg.contains("pending"));
        assert!(msg.contains("accepted"));
    }
}

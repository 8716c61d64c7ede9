//! SecureCall shared data model.
//!
//! This crate defines the records both halves of the system agree on:
//! - Identity vault fields as persisted by the vault store collaborator
//! - Challenge records for proof-of-key-possession
//! - Call records and the signaling state machine rules
//! - Typed events emitted on call-record mutation
//! - The signaling error taxonomy
//!
//! It contains no crypto and no I/O; everything here is plain data plus
//! the transition rules the coordinator and stores validate against.

pub mod error;
pub mod events;
pub mod records;
pub mod types;

pub use error::SignalingError;
pub use events::{CallEvent, CallEventKind, CallFilter};
pub use records::{
    CallPatch, CallRecord, CallStatus, Challenge, ChallengeStatus, IceCandidate, Identity,
    VaultRecord, VaultState, VAULT_VERSION,
};
pub use types::{CallId, CallSide, ChallengeId, IdentityId};

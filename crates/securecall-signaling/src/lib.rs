//! SecureCall signaling layer.
//!
//! This crate coordinates two peers through a call's lifecycle over a
//! shared, authorization-checked record store:
//! - [`VaultStore`] / [`CallRecordStore`] — the mutable-record collaborators,
//!   with in-memory implementations
//! - [`ChallengeAuthenticator`] — issues nonce challenges and resolves them
//!   against stored public keys; the only source of [`AuthContext`] tokens
//! - [`CallSignalingCoordinator`] — validates every state transition against
//!   caller/callee identity and the status actually observed in the store
//! - [`CallSession`] — one task per active call, merging store notifications
//!   and peer-connection adapter events, buffering early candidates
//!
//! [`VaultStore`]: vault_store::VaultStore
//! [`CallRecordStore`]: call_store::CallRecordStore
//! [`ChallengeAuthenticator`]: authenticator::ChallengeAuthenticator
//! [`AuthContext`]: authenticator::AuthContext
//! [`CallSignalingCoordinator`]: coordinator::CallSignalingCoordinator
//! [`CallSession`]: session::CallSession

pub mod adapter;
pub mod authenticator;
pub mod call_store;
pub mod coordinator;
pub mod session;
pub mod vault_store;

pub use adapter::{AdapterEvent, PeerConnectionAdapter};
pub use authenticator::{AuthContext, ChallengeAuthenticator, IssuedChallenge};
pub use call_store::{CallRecordStore, CallSubscription, CallUpdate, MemoryCallRecordStore};
pub use coordinator::CallSignalingCoordinator;
pub use session::CallSession;
pub use vault_store::{MemoryVaultStore, VaultStore};

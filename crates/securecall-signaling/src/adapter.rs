//! The peer connection boundary.
//!
//! Media capture, encoding, and the actual network path live behind this
//! trait; the signaling layer only shuttles opaque description and
//! candidate blobs between the adapter and the record store. The
//! [`CallSession`](crate::session::CallSession) is the sole bridge.

use async_trait::async_trait;

use securecall_protocol::error::SignalingError;

/// The media/transport layer for one call, as seen by signaling.
///
/// Descriptions and candidates are uninterpreted text; their internal
/// structure belongs to the adapter's protocol.
#[async_trait]
pub trait PeerConnectionAdapter: Send {
    /// Produce the local session description: the offer on the caller
    /// side, the answer on the callee side.
    async fn create_local_description(&mut self) -> Result<String, SignalingError>;

    /// Apply the remote party's session description.
    async fn apply_remote_description(&mut self, description: &str)
        -> Result<(), SignalingError>;

    /// Feed one remote candidate. Must only be called after the remote
    /// description was applied; the session enforces the ordering.
    async fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), SignalingError>;
}

/// Events the adapter pushes toward the session task.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// A locally gathered candidate to trickle to the remote side.
    LocalCandidate(String),
    /// Remote media started flowing.
    RemoteStreamAvailable,
    /// Transport-level connection state (opaque to signaling, logged).
    ConnectionStateChanged(String),
}

//! Typed call events.
//!
//! Every mutation of a call record is published as one `CallEvent` on the
//! store's subscription channel. Modeling the "notify on remote write"
//! mechanism as a single typed event stream per call (instead of ad-hoc
//! callbacks) keeps the ordering guarantees auditable: record mutations
//! are delivered in application order, and so are the candidate appends of
//! each side (the `CandidateAdded` index makes that order explicit).

use serde::{Deserialize, Serialize};

use crate::records::{CallRecord, CallStatus, IceCandidate};
use crate::types::{CallId, IdentityId};

/// What changed about a call record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallEventKind {
    /// A new call record was created (rings the callee's subscription).
    Created,
    /// The caller wrote or overwrote the offer.
    OfferSet,
    /// The callee wrote the answer.
    AnswerSet,
    /// Either side appended a candidate. `index` is the candidate's
    /// position in its side's ordered sequence, so a consumer that lost
    /// events can tell a replay from a new candidate after re-reading the
    /// sequence from the store.
    CandidateAdded { index: usize, candidate: IceCandidate },
    /// The status moved; the new status is in the record snapshot.
    StatusChanged { previous: CallStatus },
}

/// One mutation notification, carrying a snapshot of the record as it was
/// immediately after the mutation. Consumers must treat a terminal status
/// as "stop processing signaling input for this call."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    pub record: CallRecord,
    pub kind: CallEventKind,
}

impl CallEvent {
    pub fn call_id(&self) -> &CallId {
        &self.record.id
    }
}

/// Subscription / query filter. Unset fields match everything; set fields
/// must all match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallFilter {
    pub call_id: Option<CallId>,
    pub caller_id: Option<IdentityId>,
    pub callee_id: Option<IdentityId>,
    pub status: Option<CallStatus>,
}

impl CallFilter {
    /// Match a single call by id.
    pub fn for_call(call_id: CallId) -> Self {
        Self {
            call_id: Some(call_id),
            ..Self::default()
        }
    }

    /// Match calls ringing a given callee.
    pub fn incoming_for(callee_id: IdentityId) -> Self {
        Self {
            callee_id: Some(callee_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &CallRecord) -> bool {
        if let Some(id) = &self.call_id {
            if *id != record.id {
                return false;
            }
        }
        if let Some(caller) = &self.caller_id {
            if *caller != record.caller_id {
                return false;
            }
        }
        if let Some(callee) = &self.callee_id {
            if *callee != record.callee_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if status != record.status {
                return false;
            }
        }
        true
    }
}

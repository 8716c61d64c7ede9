//! The call signaling state machine driver.
//!
//! Every mutation follows one discipline: re-read the record, validate the
//! actor's side and the transition against the status actually observed,
//! then compare-and-set patch. Client-side cached state is never trusted —
//! the remote party's subscription-driven writes can race any local
//! intent. A CAS miss re-runs the read/validate step, so a lost race
//! surfaces as the taxonomy error the *new* state implies (usually a
//! routine [`InvalidTransition`]), never as a clobbered field.
//!
//! [`InvalidTransition`]: SignalingError::InvalidTransition

use std::sync::Arc;

use tracing::{debug, info, warn};

use securecall_protocol::error::SignalingError;
use securecall_protocol::records::{CallPatch, CallRecord, CallStatus, IceCandidate};
use securecall_protocol::types::{CallId, CallSide, IdentityId};

use crate::authenticator::AuthContext;
use crate::call_store::CallRecordStore;

/// CAS retry bound. Two peers racing on one record resolve in one retry;
/// anything beyond that indicates a store misbehaving, not a race.
const CAS_RETRY_LIMIT: usize = 3;

/// Per-participant signaling driver over the shared record store.
#[derive(Clone)]
pub struct CallSignalingCoordinator {
    store: Arc<dyn CallRecordStore>,
    auth: Option<AuthContext>,
}

impl CallSignalingCoordinator {
    /// A coordinator without a verified identity. Every mutation fails
    /// with [`SignalingError::NotAuthenticated`] until one is attached.
    pub fn new(store: Arc<dyn CallRecordStore>) -> Self {
        Self { store, auth: None }
    }

    pub fn authenticated(store: Arc<dyn CallRecordStore>, auth: AuthContext) -> Self {
        Self {
            store,
            auth: Some(auth),
        }
    }

    pub fn store(&self) -> &Arc<dyn CallRecordStore> {
        &self.store
    }

    fn require_auth(&self) -> Result<&AuthContext, SignalingError> {
        self.auth.as_ref().ok_or(SignalingError::NotAuthenticated)
    }

    /// Start a call to `callee`. The record is created Pending with no
    /// offer or answer.
    pub async fn initiate(&self, callee: &IdentityId) -> Result<CallRecord, SignalingError> {
        let auth = self.require_auth()?;
        let record = self.store.create(auth.identity(), callee).await?;
        info!(call = %record.id, callee = %callee, "call initiated");
        Ok(record)
    }

    /// Write (or overwrite) the offer. Caller only, Pending only;
    /// overwriting while still Pending is idempotent, after Accepted it is
    /// a forbidden renegotiation.
    pub async fn attach_offer(
        &self,
        call_id: &CallId,
        offer: &str,
    ) -> Result<CallRecord, SignalingError> {
        let actor = self.require_auth()?.identity().clone();
        self.mutate(call_id, "attach offer", |record, side| {
            require_side(&actor, side, CallSide::Caller, "attach offer")?;
            require_status(record, CallStatus::Pending, "attach offer")?;
            Ok(CallPatch {
                offer: Some(offer.to_owned()),
                ..CallPatch::default()
            })
        })
        .await
    }

    /// Accept a Pending call. Callee only.
    pub async fn accept(&self, call_id: &CallId) -> Result<CallRecord, SignalingError> {
        let actor = self.require_auth()?.identity().clone();
        self.mutate(call_id, "accept call", |record, side| {
            require_side(&actor, side, CallSide::Callee, "accept call")?;
            require_status(record, CallStatus::Pending, "accept call")?;
            Ok(CallPatch {
                status: Some(CallStatus::Accepted),
                ..CallPatch::default()
            })
        })
        .await
    }

    /// Reject a Pending call. Callee only; terminal.
    pub async fn reject(&self, call_id: &CallId) -> Result<CallRecord, SignalingError> {
        let actor = self.require_auth()?.identity().clone();
        self.mutate(call_id, "reject call", |record, side| {
            require_side(&actor, side, CallSide::Callee, "reject call")?;
            require_status(record, CallStatus::Pending, "reject call")?;
            Ok(CallPatch {
                status: Some(CallStatus::Rejected),
                ..CallPatch::default()
            })
        })
        .await
    }

    /// Write the answer. Callee only, Accepted only, and only after the
    /// offer exists. The first successful answer is the signaling-layer
    /// connection signal: status moves to Connected in the same patch.
    pub async fn attach_answer(
        &self,
        call_id: &CallId,
        answer: &str,
    ) -> Result<CallRecord, SignalingError> {
        let actor = self.require_auth()?.identity().clone();
        self.mutate(call_id, "attach answer", |record, side| {
            require_side(&actor, side, CallSide::Callee, "attach answer")?;
            require_status(record, CallStatus::Accepted, "attach answer")?;
            if record.offer.is_none() {
                return Err(SignalingError::invalid_transition(
                    format!("{} without offer", record.status),
                    "attach answer",
                ));
            }
            Ok(CallPatch {
                answer: Some(answer.to_owned()),
                status: Some(CallStatus::Connected),
                ..CallPatch::default()
            })
        })
        .await
    }

    /// Append a trickled candidate for this side. Either party, any
    /// non-terminal status.
    pub async fn add_ice_candidate(
        &self,
        call_id: &CallId,
        payload: &str,
    ) -> Result<(), SignalingError> {
        let auth = self.require_auth()?;
        let record = self.store.get(call_id).await?;
        let side = record.side_of(auth.identity()).ok_or_else(|| {
            warn!(call = %call_id, actor = %auth.identity(), "non-party tried to add candidate");
            SignalingError::Unauthorized {
                actor: auth.identity().clone(),
                action: "add candidate",
            }
        })?;
        if record.status.is_terminal() {
            return Err(SignalingError::invalid_transition(
                record.status,
                "add candidate",
            ));
        }
        self.store
            .add_candidate(
                call_id,
                IceCandidate {
                    side,
                    payload: payload.to_owned(),
                },
            )
            .await
    }

    /// Hang up. Either party, from Accepted or Connected; idempotent on an
    /// already-Ended call.
    pub async fn end(&self, call_id: &CallId) -> Result<CallRecord, SignalingError> {
        let actor = self.require_auth()?.identity().clone();
        let observed = self.store.get(call_id).await?;
        if observed.status == CallStatus::Ended && observed.side_of(&actor).is_some() {
            return Ok(observed);
        }
        self.mutate(call_id, "end call", |record, side| {
            if side.is_none() {
                return Err(SignalingError::Unauthorized {
                    actor: actor.clone(),
                    action: "end call",
                });
            }
            // The other party may have hung up between read and retry;
            // ending an Ended call stays idempotent.
            if record.status == CallStatus::Ended {
                return Ok(CallPatch::default());
            }
            if !matches!(record.status, CallStatus::Accepted | CallStatus::Connected) {
                return Err(SignalingError::invalid_transition(record.status, "end call"));
            }
            Ok(CallPatch {
                status: Some(CallStatus::Ended),
                ..CallPatch::default()
            })
        })
        .await
    }

    /// Read/validate/CAS-patch loop shared by all mutations.
    ///
    /// `validate` sees the freshly observed record and the actor's side
    /// (`None` for a non-party) and produces the patch to apply against
    /// that observed status.
    async fn mutate<F>(
        &self,
        call_id: &CallId,
        action: &'static str,
        validate: F,
    ) -> Result<CallRecord, SignalingError>
    where
        F: Fn(&CallRecord, Option<CallSide>) -> Result<CallPatch, SignalingError>,
    {
        let auth = self.require_auth()?;
        let mut attempts = 0;
        loop {
            let observed = self.store.get(call_id).await?;
            let side = observed.side_of(auth.identity());

            let patch = validate(&observed, side).map_err(|err| {
                match &err {
                    // Security-relevant: somebody authenticated is poking a
                    // record or field they do not own.
                    SignalingError::Unauthorized { actor, action } => {
                        warn!(call = %call_id, %actor, action, "unauthorized signaling mutation");
                    }
                    // Routine race/duplicate noise.
                    SignalingError::InvalidTransition { state, action } => {
                        debug!(call = %call_id, %state, action, "transition refused");
                    }
                    _ => {}
                }
                err
            })?;

            match self.store.patch(call_id, observed.status, patch).await {
                Ok(record) => {
                    debug!(call = %call_id, status = %record.status, action, "mutation applied");
                    return Ok(record);
                }
                Err(SignalingError::PatchConflict { actual, .. }) if attempts < CAS_RETRY_LIMIT => {
                    attempts += 1;
                    debug!(call = %call_id, %actual, action, "patch conflict, re-validating");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn require_side(
    actor: &IdentityId,
    side: Option<CallSide>,
    required: CallSide,
    action: &'static str,
) -> Result<(), SignalingError> {
    if side == Some(required) {
        Ok(())
    } else {
        Err(SignalingError::Unauthorized {
            actor: actor.clone(),
            action,
        })
    }
}

fn require_status(
    record: &CallRecord,
    required: CallStatus,
    action: &'static str,
) -> Result<(), SignalingError> {
    if record.status == required {
        Ok(())
    } else {
        Err(SignalingError::invalid_transition(record.status, action))
    }
}

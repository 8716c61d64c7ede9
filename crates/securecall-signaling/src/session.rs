//! Per-call session task.
//!
//! One `CallSession` per active call per participant, merging the two
//! event sources that drive a call — the store subscription (remote wrote
//! offer/answer/candidate/status) and the local adapter (gathered
//! candidates, media state) — in a single `select!` loop, so there is no
//! shared mutable state between them to race on.
//!
//! The ordering rule that matters lives here: a remote candidate may
//! arrive before the remote description over the subscription channel.
//! Such candidates are buffered and flushed, in arrival order, the moment
//! the description is applied. Dropping one is a correctness bug, not a
//! simplification — which is also why a lagged subscription is never
//! skipped over: the session re-reads the record and the remote candidate
//! sequence from the store and catches up by index.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{debug, info};

use securecall_protocol::error::SignalingError;
use securecall_protocol::events::{CallEvent, CallEventKind};
use securecall_protocol::types::{CallId, CallSide};

use crate::adapter::{AdapterEvent, PeerConnectionAdapter};
use crate::call_store::{CallSubscription, CallUpdate};
use crate::coordinator::CallSignalingCoordinator;

/// Presentation state for the local media controls. Session-owned, never
/// persisted; the remote party learns about muting from the media stream
/// itself, not from signaling.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaToggles {
    pub muted: bool,
    pub video_off: bool,
}

/// Drives one side of one call until a terminal status.
pub struct CallSession {
    call_id: CallId,
    local_side: CallSide,
    coordinator: CallSignalingCoordinator,
    adapter: Box<dyn PeerConnectionAdapter>,
    call_events: CallSubscription,
    adapter_events: mpsc::Receiver<AdapterEvent>,
    /// Remote candidates that arrived before the remote description.
    pending_remote: VecDeque<String>,
    /// The remote description last handed to the adapter, if any.
    last_remote_description: Option<String>,
    /// How many remote candidates were already forwarded or buffered;
    /// equals the next expected per-side candidate index.
    remote_candidates_seen: usize,
    toggles: MediaToggles,
}

impl CallSession {
    pub fn new(
        call_id: CallId,
        local_side: CallSide,
        coordinator: CallSignalingCoordinator,
        adapter: Box<dyn PeerConnectionAdapter>,
        call_events: CallSubscription,
        adapter_events: mpsc::Receiver<AdapterEvent>,
    ) -> Self {
        Self {
            call_id,
            local_side,
            coordinator,
            adapter,
            call_events,
            adapter_events,
            pending_remote: VecDeque::new(),
            last_remote_description: None,
            remote_candidates_seen: 0,
            toggles: MediaToggles::default(),
        }
    }

    pub fn toggles(&self) -> MediaToggles {
        self.toggles
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.toggles.muted = muted;
    }

    pub fn set_video_off(&mut self, video_off: bool) {
        self.toggles.video_off = video_off;
    }

    /// Ask the adapter for the local description and publish it: the offer
    /// when we are the caller, the answer when we are the callee.
    pub async fn publish_local_description(&mut self) -> Result<(), SignalingError> {
        let description = self.adapter.create_local_description().await?;
        match self.local_side {
            CallSide::Caller => {
                self.coordinator
                    .attach_offer(&self.call_id, &description)
                    .await?;
            }
            CallSide::Callee => {
                self.coordinator
                    .attach_answer(&self.call_id, &description)
                    .await?;
            }
        }
        Ok(())
    }

    /// Consume events until the call reaches a terminal status or both
    /// event sources close.
    pub async fn run(mut self) -> Result<(), SignalingError> {
        let mut adapter_closed = false;
        loop {
            tokio::select! {
                update = self.call_events.recv() => match update {
                    Some(CallUpdate::Event(event)) => {
                        if self.handle_call_event(event).await? {
                            break;
                        }
                    }
                    Some(CallUpdate::Lagged) => {
                        if self.resync().await? {
                            break;
                        }
                    }
                    None => break,
                },
                event = self.adapter_events.recv(), if !adapter_closed => match event {
                    Some(event) => self.handle_adapter_event(event).await?,
                    None => adapter_closed = true,
                },
            }
        }
        Ok(())
    }

    /// Returns true when the call reached a terminal status.
    async fn handle_call_event(&mut self, event: CallEvent) -> Result<bool, SignalingError> {
        match event.kind {
            CallEventKind::Created => {
                // Ringing is the UI layer's concern.
                debug!(call = %self.call_id, "call record created");
            }
            CallEventKind::OfferSet => {
                if self.local_side == CallSide::Callee {
                    if let Some(offer) = &event.record.offer {
                        let offer = offer.clone();
                        self.apply_remote_description(&offer).await?;
                    }
                }
            }
            CallEventKind::AnswerSet => {
                if self.local_side == CallSide::Caller {
                    if let Some(answer) = &event.record.answer {
                        let answer = answer.clone();
                        self.apply_remote_description(&answer).await?;
                    }
                }
            }
            CallEventKind::CandidateAdded { index, candidate } => {
                if candidate.side != self.local_side {
                    if index < self.remote_candidates_seen {
                        // Replay of a candidate a resync already covered.
                        debug!(call = %self.call_id, index, "skipping stale candidate event");
                    } else {
                        self.take_remote_candidate(index, candidate.payload).await?;
                    }
                }
            }
            CallEventKind::StatusChanged { previous } => {
                let status = event.record.status;
                debug!(call = %self.call_id, %previous, %status, "status changed");
                if status.is_terminal() {
                    // Stop processing signaling input; in-flight data for
                    // this call is simply no longer consumed.
                    info!(call = %self.call_id, %status, "call reached terminal status");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn handle_adapter_event(&mut self, event: AdapterEvent) -> Result<(), SignalingError> {
        match event {
            AdapterEvent::LocalCandidate(payload) => {
                match self
                    .coordinator
                    .add_ice_candidate(&self.call_id, &payload)
                    .await
                {
                    Ok(()) => {}
                    // The call can end while the adapter is still
                    // gathering; late candidates are simply dropped on the
                    // write side.
                    Err(SignalingError::InvalidTransition { .. }) => {
                        debug!(call = %self.call_id, "discarding candidate for finished call");
                    }
                    Err(err) => return Err(err),
                }
            }
            AdapterEvent::RemoteStreamAvailable => {
                info!(call = %self.call_id, "remote stream available");
            }
            AdapterEvent::ConnectionStateChanged(state) => {
                debug!(call = %self.call_id, state, "adapter connection state changed");
            }
        }
        Ok(())
    }

    async fn apply_remote_description(&mut self, description: &str) -> Result<(), SignalingError> {
        // A resync and a replayed event can both carry the same
        // description; hand it to the adapter once.
        if self.last_remote_description.as_deref() == Some(description) {
            return Ok(());
        }
        self.adapter.apply_remote_description(description).await?;
        self.last_remote_description = Some(description.to_owned());
        // Flush everything that arrived early, in arrival order.
        while let Some(candidate) = self.pending_remote.pop_front() {
            self.adapter.add_remote_candidate(&candidate).await?;
        }
        Ok(())
    }

    async fn take_remote_candidate(
        &mut self,
        index: usize,
        payload: String,
    ) -> Result<(), SignalingError> {
        self.remote_candidates_seen = index + 1;
        if self.last_remote_description.is_some() {
            self.adapter.add_remote_candidate(&payload).await?;
        } else {
            debug!(call = %self.call_id, "buffering early remote candidate");
            self.pending_remote.push_back(payload);
        }
        Ok(())
    }

    /// The subscription lost events. The store is authoritative: re-read
    /// the record and the remote candidate sequence and catch up on
    /// anything the channel dropped. Returns true when the call turned out
    /// to have reached a terminal status in the meantime.
    async fn resync(&mut self) -> Result<bool, SignalingError> {
        let record = self.coordinator.store().get(&self.call_id).await?;
        debug!(call = %self.call_id, status = %record.status, "resyncing from the store");

        if let Some(description) = match self.local_side {
            CallSide::Caller => record.answer.as_deref(),
            CallSide::Callee => record.offer.as_deref(),
        } {
            self.apply_remote_description(description).await?;
        }

        let remote = self
            .coordinator
            .store()
            .candidates(&self.call_id, self.local_side.remote())
            .await?;
        let missed: Vec<String> = remote
            .into_iter()
            .skip(self.remote_candidates_seen)
            .map(|c| c.payload)
            .collect();
        let mut index = self.remote_candidates_seen;
        for payload in missed {
            self.take_remote_candidate(index, payload).await?;
            index += 1;
        }

        if record.status.is_terminal() {
            info!(call = %self.call_id, status = %record.status, "call reached terminal status");
            return Ok(true);
        }
        Ok(false)
    }
}

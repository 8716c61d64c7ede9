//! Call record store.
//!
//! Authorized CRUD plus subscription over call records. The store is
//! deliberately mechanical: it enforces the record-granularity rules
//! (status compare-and-set, monotonic transitions, ordered candidate
//! sequences) and publishes a typed event per mutation; identity and
//! field-ownership checks belong to the coordinator in front of it.
//!
//! Records are never physically deleted. A terminal status means the call
//! is logically dead; the row stays for audit.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use securecall_protocol::error::SignalingError;
use securecall_protocol::events::{CallEvent, CallEventKind, CallFilter};
use securecall_protocol::records::{CallPatch, CallRecord, CallStatus, IceCandidate};
use securecall_protocol::types::{CallId, CallSide, IdentityId};

/// Event channel capacity. A lagging subscriber loses its oldest events
/// and is warned; the record itself is always re-readable.
const EVENT_CAPACITY: usize = 256;

/// The shared mutable call-record resource.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    /// Create a Pending record with no offer/answer, stamped now.
    async fn create(
        &self,
        caller: &IdentityId,
        callee: &IdentityId,
    ) -> Result<CallRecord, SignalingError>;

    async fn get(&self, call_id: &CallId) -> Result<CallRecord, SignalingError>;

    /// Apply a partial update, compare-and-set against the status the
    /// caller observed. Fails with [`SignalingError::PatchConflict`] if the
    /// status moved in between, and with
    /// [`SignalingError::InvalidTransition`] if the patch asks for a
    /// transition the state machine forbids.
    async fn patch(
        &self,
        call_id: &CallId,
        expected: CallStatus,
        patch: CallPatch,
    ) -> Result<CallRecord, SignalingError>;

    /// Append a candidate to its side's ordered sequence.
    async fn add_candidate(
        &self,
        call_id: &CallId,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError>;

    /// The ordered candidate sequence of one side.
    async fn candidates(
        &self,
        call_id: &CallId,
        side: CallSide,
    ) -> Result<Vec<IceCandidate>, SignalingError>;

    /// All records matching the filter, oldest first.
    async fn query(&self, filter: &CallFilter) -> Vec<CallRecord>;

    /// Typed event stream for all mutations matching the filter.
    fn subscribe(&self, filter: CallFilter) -> CallSubscription;
}

/// One item from a call subscription.
#[derive(Debug)]
pub enum CallUpdate {
    /// A mutation matching the subscription's filter.
    Event(CallEvent),
    /// The channel evicted events before this subscriber consumed them.
    /// The store remains authoritative: the consumer must re-read the
    /// record and candidate sequences instead of trusting replay.
    Lagged,
}

/// A filtered receiver over the store's event channel.
pub struct CallSubscription {
    rx: broadcast::Receiver<CallEvent>,
    filter: CallFilter,
}

impl CallSubscription {
    /// Next matching event or loss notice, or `None` once the store is
    /// gone.
    pub async fn recv(&mut self) -> Option<CallUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event.record) => {
                    return Some(CallUpdate::Event(event))
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "call event subscriber lagged");
                    return Some(CallUpdate::Lagged);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-memory call record store with broadcast notifications.
pub struct MemoryCallRecordStore {
    records: DashMap<CallId, CallRecord>,
    candidates: DashMap<CallId, Vec<IceCandidate>>,
    events: broadcast::Sender<CallEvent>,
}

impl Default for MemoryCallRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCallRecordStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: DashMap::new(),
            candidates: DashMap::new(),
            events,
        }
    }

    fn publish(&self, record: CallRecord, kind: CallEventKind) {
        // Send fails only when nobody subscribes, which is fine.
        let _ = self.events.send(CallEvent { record, kind });
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl CallRecordStore for MemoryCallRecordStore {
    async fn create(
        &self,
        caller: &IdentityId,
        callee: &IdentityId,
    ) -> Result<CallRecord, SignalingError> {
        if caller == callee {
            return Err(SignalingError::MalformedInput(
                "caller and callee must differ".into(),
            ));
        }

        let record = CallRecord {
            id: CallId::from(Uuid::new_v4().to_string()),
            caller_id: caller.clone(),
            callee_id: callee.clone(),
            offer: None,
            answer: None,
            status: CallStatus::Pending,
            created_at: now_millis(),
        };
        self.records.insert(record.id.clone(), record.clone());
        self.candidates.insert(record.id.clone(), Vec::new());
        self.publish(record.clone(), CallEventKind::Created);
        Ok(record)
    }

    async fn get(&self, call_id: &CallId) -> Result<CallRecord, SignalingError> {
        self.records
            .get(call_id)
            .map(|r| r.clone())
            .ok_or_else(|| SignalingError::CallNotFound(call_id.clone()))
    }

    async fn patch(
        &self,
        call_id: &CallId,
        expected: CallStatus,
        patch: CallPatch,
    ) -> Result<CallRecord, SignalingError> {
        let mut entry = self
            .records
            .get_mut(call_id)
            .ok_or_else(|| SignalingError::CallNotFound(call_id.clone()))?;

        if entry.status != expected {
            return Err(SignalingError::PatchConflict {
                call_id: call_id.clone(),
                expected,
                actual: entry.status,
            });
        }

        if let Some(next) = patch.status {
            if !entry.status.can_transition_to(next) {
                return Err(SignalingError::invalid_transition(
                    entry.status,
                    "apply status patch",
                ));
            }
        }

        let mut events = Vec::new();
        if let Some(offer) = patch.offer {
            entry.offer = Some(offer);
            events.push(CallEventKind::OfferSet);
        }
        if let Some(answer) = patch.answer {
            entry.answer = Some(answer);
            events.push(CallEventKind::AnswerSet);
        }
        if let Some(next) = patch.status {
            let previous = entry.status;
            entry.status = next;
            events.push(CallEventKind::StatusChanged { previous });
        }

        let snapshot = entry.clone();
        // Publish before releasing the entry: two racing patches must not
        // publish in the opposite order from their application.
        for kind in events {
            self.publish(snapshot.clone(), kind);
        }
        drop(entry);
        Ok(snapshot)
    }

    async fn add_candidate(
        &self,
        call_id: &CallId,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        let snapshot = self.get(call_id).await?;
        let mut list = self
            .candidates
            .get_mut(call_id)
            .ok_or_else(|| SignalingError::CallNotFound(call_id.clone()))?;
        let index = list.iter().filter(|c| c.side == candidate.side).count();
        list.push(candidate.clone());
        // Publish before releasing the sequence so indices go out in order.
        self.publish(snapshot, CallEventKind::CandidateAdded { index, candidate });
        Ok(())
    }

    async fn candidates(
        &self,
        call_id: &CallId,
        side: CallSide,
    ) -> Result<Vec<IceCandidate>, SignalingError> {
        let list = self
            .candidates
            .get(call_id)
            .ok_or_else(|| SignalingError::CallNotFound(call_id.clone()))?;
        Ok(list.iter().filter(|c| c.side == side).cloned().collect())
    }

    async fn query(&self, filter: &CallFilter) -> Vec<CallRecord> {
        let mut matching: Vec<CallRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.clone())
            .collect();
        matching.sort_by_key(|r| r.created_at);
        matching
    }

    fn subscribe(&self, filter: CallFilter) -> CallSubscription {
        CallSubscription {
            rx: self.events.subscribe(),
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (IdentityId, IdentityId) {
        (IdentityId::from("alice"), IdentityId::from("bob"))
    }

    async fn next_event(sub: &mut CallSubscription) -> CallEvent {
        match sub.recv().await.unwrap() {
            CallUpdate::Event(event) => event,
            CallUpdate::Lagged => panic!("subscriber unexpectedly lagged"),
        }
    }

    #[tokio::test]
    async fn create_starts_pending_with_empty_payloads() {
        let store = MemoryCallRecordStore::new();
        let (a, b) = ids();
        let record = store.create(&a, &b).await.unwrap();
        assert_eq!(record.status, CallStatus::Pending);
        assert!(record.offer.is_none());
        assert!(record.answer.is_none());
        assert_eq!(store.get(&record.id).await.unwrap().id, record.id);
    }

    #[tokio::test]
    async fn self_call_is_rejected() {
        let store = MemoryCallRecordStore::new();
        let a = IdentityId::from("alice");
        let err = store.create(&a, &a).await.unwrap_err();
        assert!(matches!(err, SignalingError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn get_unknown_call_fails() {
        let store = MemoryCallRecordStore::new();
        let err = store.get(&CallId::from("nope")).await.unwrap_err();
        assert!(matches!(err, SignalingError::CallNotFound(_)));
    }

    #[tokio::test]
    async fn patch_is_compare_and_set_on_status() {
        let store = MemoryCallRecordStore::new();
        let (a, b) = ids();
        let record = store.create(&a, &b).await.unwrap();

        let accepted = store
            .patch(
                &record.id,
                CallStatus::Pending,
                CallPatch {
                    status: Some(CallStatus::Accepted),
                    ..CallPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(accepted.status, CallStatus::Accepted);

        // A writer still assuming Pending must see a conflict, not clobber.
        let err = store
            .patch(
                &record.id,
                CallStatus::Pending,
                CallPatch {
                    status: Some(CallStatus::Rejected),
                    ..CallPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::PatchConflict { .. }));
    }

    #[tokio::test]
    async fn patch_refuses_forbidden_transitions() {
        let store = MemoryCallRecordStore::new();
        let (a, b) = ids();
        let record = store.create(&a, &b).await.unwrap();
        let err = store
            .patch(
                &record.id,
                CallStatus::Pending,
                CallPatch {
                    status: Some(CallStatus::Connected),
                    ..CallPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn candidate_sequences_are_per_side_and_ordered() {
        let store = MemoryCallRecordStore::new();
        let (a, b) = ids();
        let record = store.create(&a, &b).await.unwrap();

        for (side, payload) in [
            (CallSide::Caller, "c1"),
            (CallSide::Callee, "x1"),
            (CallSide::Caller, "c2"),
            (CallSide::Caller, "c3"),
        ] {
            store
                .add_candidate(
                    &record.id,
                    IceCandidate {
                        side,
                        payload: payload.into(),
                    },
                )
                .await
                .unwrap();
        }

        let caller_side = store.candidates(&record.id, CallSide::Caller).await.unwrap();
        let payloads: Vec<&str> = caller_side.iter().map(|c| c.payload.as_str()).collect();
        assert_eq!(payloads, ["c1", "c2", "c3"]);

        let callee_side = store.candidates(&record.id, CallSide::Callee).await.unwrap();
        assert_eq!(callee_side.len(), 1);
    }

    #[tokio::test]
    async fn query_filters_and_orders_by_creation() {
        let store = MemoryCallRecordStore::new();
        let (a, b) = ids();
        let c = IdentityId::from("carol");
        let first = store.create(&a, &b).await.unwrap();
        let _other = store.create(&a, &c).await.unwrap();
        let second = store.create(&c, &b).await.unwrap();

        let incoming = store.query(&CallFilter::incoming_for(b.clone())).await;
        let ids: Vec<&CallId> = incoming.iter().map(|r| &r.id).collect();
        assert_eq!(ids, [&first.id, &second.id]);
    }

    #[tokio::test]
    async fn subscription_sees_matching_mutations_in_order() {
        let store = MemoryCallRecordStore::new();
        let (a, b) = ids();

        let mut sub = store.subscribe(CallFilter::incoming_for(b.clone()));
        let record = store.create(&a, &b).await.unwrap();
        store
            .patch(
                &record.id,
                CallStatus::Pending,
                CallPatch {
                    offer: Some("O1".into()),
                    ..CallPatch::default()
                },
            )
            .await
            .unwrap();

        // A call for someone else must not show up on this subscription.
        store.create(&a, &IdentityId::from("carol")).await.unwrap();
        store
            .patch(
                &record.id,
                CallStatus::Pending,
                CallPatch {
                    status: Some(CallStatus::Accepted),
                    ..CallPatch::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(next_event(&mut sub).await.kind, CallEventKind::Created));
        assert!(matches!(next_event(&mut sub).await.kind, CallEventKind::OfferSet));
        let status_event = next_event(&mut sub).await;
        assert!(matches!(
            status_event.kind,
            CallEventKind::StatusChanged {
                previous: CallStatus::Pending
            }
        ));
        assert_eq!(status_event.record.status, CallStatus::Accepted);
    }

    #[tokio::test]
    async fn candidate_events_carry_per_side_indices() {
        let store = MemoryCallRecordStore::new();
        let (a, b) = ids();
        let record = store.create(&a, &b).await.unwrap();
        let mut sub = store.subscribe(CallFilter::for_call(record.id.clone()));

        for (side, payload) in [
            (CallSide::Caller, "c1"),
            (CallSide::Callee, "x1"),
            (CallSide::Caller, "c2"),
        ] {
            store
                .add_candidate(
                    &record.id,
                    IceCandidate {
                        side,
                        payload: payload.into(),
                    },
                )
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let CallEventKind::CandidateAdded { index, candidate } =
                next_event(&mut sub).await.kind
            {
                seen.push((candidate.side, index));
            }
        }
        // Each side counts its own sequence from zero.
        assert_eq!(
            seen,
            [
                (CallSide::Caller, 0),
                (CallSide::Callee, 0),
                (CallSide::Caller, 1),
            ]
        );
    }

    #[tokio::test]
    async fn overflowed_subscription_reports_the_loss() {
        let store = MemoryCallRecordStore::new();
        let (a, b) = ids();
        let mut sub = store.subscribe(CallFilter::default());
        let record = store.create(&a, &b).await.unwrap();

        // Overflow the capacity-256 channel while the subscriber sleeps.
        for i in 0..300 {
            store
                .add_candidate(
                    &record.id,
                    IceCandidate {
                        side: CallSide::Caller,
                        payload: format!("c{i}"),
                    },
                )
                .await
                .unwrap();
        }

        // The subscriber is told about the loss instead of being silently
        // skipped ahead past the evicted events.
        assert!(matches!(sub.recv().await.unwrap(), CallUpdate::Lagged));

        // The store keeps everything, so re-reading recovers the lot.
        let all = store.candidates(&record.id, CallSide::Caller).await.unwrap();
        assert_eq!(all.len(), 300);
    }
}

//! Call setup and teardown.
//!
//! The signaling flow negotiates one 1:1 call per room through the
//! document store: the caller writes an offer record and relays its
//! ICE candidates into `offerCandidates`; the answerer merges an
//! answer into the same record and relays into `answerCandidates`;
//! each side watches the other's collection. Teardown is an explicit
//! user action — there is no automatic disconnect detection.

mod peer;
mod signaling;

pub use signaling::{
    ANSWER_CANDIDATES, CALL_DOC_ID, CallMedium, CallRecord, CandidateRecord, OFFER_CANDIDATES,
    SignalKind,
};

use std::sync::{Arc, Mutex as StdMutex};

use serde_json::json;
use tokio::sync::{Mutex as TokioMutex, mpsc, watch};
use tokio::task::JoinHandle;

use peer::PeerConnection;
use signaling::CallPaths;

use crate::auth::Identity;
use crate::errors::{CallError, StoreError};
use crate::events::{ClientEvent, EventEmitter};
use crate::media::{LocalMediaStream, MediaConstraints, MediaDevices};
use crate::rooms::RoomCode;
use crate::store::{ChangeKind, CollectionPath, DocumentPath, DocumentStore};

/// Where a call attempt currently stands. Caller attempts run
/// Idle → AcquiringMedia → ConnectionCreated → OfferSent →
/// AwaitingAnswer → Connected; answerer attempts run
/// IncomingDetected → Confirmed → AcquiringMedia → AnswerSent →
/// Connected. Failed attempts return to Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    AcquiringMedia,
    ConnectionCreated,
    OfferSent,
    AwaitingAnswer,
    IncomingDetected,
    Confirmed,
    AnswerSent,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Answerer,
}

struct ActiveCall {
    role: CallRole,
    medium: CallMedium,
    phase: Arc<StdMutex<CallPhase>>,
    peer: Arc<PeerConnection>,
    local: LocalMediaStream,
    tasks: Vec<JoinHandle<()>>,
}

/// The signaling flow for one room session.
pub struct CallService {
    paths: CallPaths,
    store: Arc<dyn DocumentStore>,
    media: Arc<dyn MediaDevices>,
    emitter: EventEmitter,
    identity: watch::Receiver<Option<Identity>>,
    display_name: Option<String>,
    ice_servers: Vec<String>,
    active: Arc<TokioMutex<Option<ActiveCall>>>,
    pending: Arc<StdMutex<Option<CallRecord>>>,
    watch_task: StdMutex<Option<JoinHandle<()>>>,
}

impl CallService {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        room: &RoomCode,
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaDevices>,
        emitter: EventEmitter,
        identity: watch::Receiver<Option<Identity>>,
        display_name: Option<String>,
        ice_servers: Vec<String>,
    ) -> Self {
        Self {
            paths: CallPaths::for_room(room),
            store,
            media,
            emitter,
            identity,
            display_name,
            ice_servers,
            active: Arc::new(TokioMutex::new(None)),
            pending: Arc::new(StdMutex::new(None)),
            watch_task: StdMutex::new(None),
        }
    }

    /// Start the standing watch that detects incoming offers. Runs for
    /// the life of the room session.
    pub(crate) async fn start_incoming_watch(&self) {
        let store = self.store.clone();
        let doc = self.paths.doc.clone();
        let identity = self.identity.clone();
        let active = self.active.clone();
        let pending = self.pending.clone();
        let emitter = self.emitter.clone();
        let task = tokio::spawn(async move {
            Self::incoming_watch(store, doc, identity, active, pending, emitter).await;
        });
        *self.watch_task.lock().unwrap() = Some(task);
    }

    /// Caller path. Holds the call slot for the whole setup sequence,
    /// so a second concurrent start is rejected rather than leaking
    /// the first attempt's capture.
    pub async fn start_call(&self, medium: CallMedium) -> Result<(), CallError> {
        let identity = self.identity.borrow().clone().ok_or(CallError::NotSignedIn)?;
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(CallError::CallAlreadyActive);
        }

        tracing::info!("starting {medium:?} call");
        let phase = Arc::new(StdMutex::new(CallPhase::Idle));
        Self::emit_phase(&self.emitter, &phase, CallPhase::AcquiringMedia);

        let local = match self.media.acquire(Self::constraints(medium)).await {
            Ok(local) => local,
            Err(e) => {
                // No signaling record exists yet, and none is written.
                self.emitter.emit(ClientEvent::ErrorSurfaced {
                    message: format!("could not access camera/microphone: {e}"),
                });
                Self::abort_phase(&self.emitter, &phase);
                return Err(e.into());
            }
        };
        self.emitter.emit(ClientEvent::LocalStreamStarted { medium });

        let peer = match PeerConnection::new(&self.ice_servers).await {
            Ok(peer) => Arc::new(peer),
            Err(e) => {
                local.stop();
                Self::abort_phase(&self.emitter, &phase);
                return Err(e);
            }
        };
        Self::emit_phase(&self.emitter, &phase, CallPhase::ConnectionCreated);

        if let Err(e) = peer.attach_local_stream(&local).await {
            local.stop();
            peer.close().await;
            Self::abort_phase(&self.emitter, &phase);
            return Err(e);
        }
        peer.forward_remote_tracks(self.emitter.clone());

        let relay_task = Self::spawn_candidate_relay(
            peer.local_candidates(),
            self.store.clone(),
            self.paths.offer_candidates.clone(),
        );

        let offer = match peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                relay_task.abort();
                local.stop();
                peer.close().await;
                Self::abort_phase(&self.emitter, &phase);
                return Err(e);
            }
        };

        let record = CallRecord {
            kind: SignalKind::Offer,
            medium,
            caller: identity.uid.clone(),
            caller_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| identity.display_name().to_string()),
            sdp: offer.sdp,
            offer_type: Some(offer.kind),
            answer_type: None,
            callee: None,
        };
        let fields = serde_json::to_value(&record)
            .map_err(|e| CallError::Store(StoreError::InvalidData(e.to_string())))?;

        // Create-if-absent: the room's call slot is taken atomically,
        // never clobbered.
        match self.store.create(&self.paths.doc, fields).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                relay_task.abort();
                local.stop();
                peer.close().await;
                Self::abort_phase(&self.emitter, &phase);
                return Err(CallError::RoomBusy);
            }
            Err(e) => {
                // Store failures are not rolled back: the capture stays
                // open with no signaling record, as the failure model
                // documents.
                relay_task.abort();
                Self::emit_phase(&self.emitter, &phase, CallPhase::Failed);
                return Err(e.into());
            }
        }
        Self::emit_phase(&self.emitter, &phase, CallPhase::OfferSent);

        let answer_task = {
            let store = self.store.clone();
            let doc = self.paths.doc.clone();
            let peer = peer.clone();
            let phase = phase.clone();
            let emitter = self.emitter.clone();
            tokio::spawn(async move {
                Self::answer_watch(store, doc, peer, phase, emitter).await;
            })
        };
        let candidates_task = Self::spawn_remote_candidates(
            self.store.clone(),
            self.paths.answer_candidates.clone(),
            peer.clone(),
        );

        Self::emit_phase(&self.emitter, &phase, CallPhase::AwaitingAnswer);
        *active = Some(ActiveCall {
            role: CallRole::Caller,
            medium,
            phase,
            peer,
            local,
            tasks: vec![relay_task, answer_task, candidates_task],
        });
        Ok(())
    }

    /// Answerer path, after the embedder confirmed the incoming offer.
    pub async fn accept_incoming(&self) -> Result<(), CallError> {
        let record = self
            .pending
            .lock()
            .unwrap()
            .take()
            .ok_or(CallError::NoPendingOffer)?;
        let identity = self.identity.borrow().clone().ok_or(CallError::NotSignedIn)?;
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(CallError::CallAlreadyActive);
        }

        tracing::info!("answering {:?} call from {}", record.medium, record.caller_name);
        let phase = Arc::new(StdMutex::new(CallPhase::IncomingDetected));
        Self::emit_phase(&self.emitter, &phase, CallPhase::Confirmed);

        // Connection before capture, as the offer side already
        // committed its half of the exchange.
        let peer = Arc::new(PeerConnection::new(&self.ice_servers).await?);

        Self::emit_phase(&self.emitter, &phase, CallPhase::AcquiringMedia);
        let local = match self.media.acquire(Self::constraints(record.medium)).await {
            Ok(local) => local,
            Err(e) => {
                peer.close().await;
                self.emitter.emit(ClientEvent::ErrorSurfaced {
                    message: format!("could not access camera/microphone: {e}"),
                });
                Self::abort_phase(&self.emitter, &phase);
                return Err(e.into());
            }
        };
        self.emitter.emit(ClientEvent::LocalStreamStarted { medium: record.medium });

        if let Err(e) = peer.attach_local_stream(&local).await {
            local.stop();
            peer.close().await;
            Self::abort_phase(&self.emitter, &phase);
            return Err(e);
        }
        peer.forward_remote_tracks(self.emitter.clone());
        {
            let phase = phase.clone();
            let emitter = self.emitter.clone();
            peer.watch_connected(move || {
                let newly_connected = {
                    let mut phase = phase.lock().unwrap();
                    if *phase == CallPhase::Connected {
                        false
                    } else {
                        *phase = CallPhase::Connected;
                        true
                    }
                };
                if newly_connected {
                    emitter.emit(ClientEvent::CallPhaseChanged(CallPhase::Connected));
                }
            });
        }

        let relay_task = Self::spawn_candidate_relay(
            peer.local_candidates(),
            self.store.clone(),
            self.paths.answer_candidates.clone(),
        );

        let answer = match peer.accept_offer(&record.sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                relay_task.abort();
                local.stop();
                peer.close().await;
                Self::abort_phase(&self.emitter, &phase);
                return Err(e);
            }
        };

        // In-place merge: offer metadata survives, sdp becomes the
        // answer description.
        let patch = json!({
            "type": "answer",
            "answerType": answer.kind,
            "sdp": answer.sdp,
            "callee": identity.uid,
        });
        if let Err(e) = self.store.update(&self.paths.doc, patch).await {
            relay_task.abort();
            Self::emit_phase(&self.emitter, &phase, CallPhase::Failed);
            return Err(e.into());
        }
        Self::emit_phase(&self.emitter, &phase, CallPhase::AnswerSent);

        let candidates_task = Self::spawn_remote_candidates(
            self.store.clone(),
            self.paths.offer_candidates.clone(),
            peer.clone(),
        );

        *active = Some(ActiveCall {
            role: CallRole::Answerer,
            medium: record.medium,
            phase,
            peer,
            local,
            tasks: vec![relay_task, candidates_task],
        });
        Ok(())
    }

    /// Decline the pending offer. Nothing is sent back — the offer is
    /// simply left unanswered.
    pub fn decline_incoming(&self) {
        if self.pending.lock().unwrap().take().is_some() {
            tracing::info!("incoming call declined; offer left unanswered");
        }
    }

    /// Tear down the active call: stop capture, close the connection,
    /// cancel the call's subscriptions, best-effort delete the
    /// signaling record. A no-op when no call is active.
    pub async fn hang_up(&self) {
        let call = self.active.lock().await.take();
        let Some(call) = call else { return };

        tracing::info!("hanging up");
        call.local.stop();
        call.peer.close().await;
        for task in &call.tasks {
            task.abort();
        }
        if let Err(e) = self.store.delete(&self.paths.doc).await {
            tracing::debug!("call record delete failed (ignored): {e}");
        }
        *call.phase.lock().unwrap() = CallPhase::Idle;
        self.emitter.emit(ClientEvent::CallPhaseChanged(CallPhase::Idle));
        self.emitter.emit(ClientEvent::CallEnded);
    }

    pub async fn phase(&self) -> CallPhase {
        match self.active.lock().await.as_ref() {
            Some(call) => *call.phase.lock().unwrap(),
            None => CallPhase::Idle,
        }
    }

    pub async fn active_role(&self) -> Option<CallRole> {
        self.active.lock().await.as_ref().map(|call| call.role)
    }

    pub async fn active_medium(&self) -> Option<CallMedium> {
        self.active.lock().await.as_ref().map(|call| call.medium)
    }

    pub fn has_pending_offer(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    /// Room-session teardown: end any call, stop the standing watch.
    pub(crate) async fn shutdown(&self) {
        self.hang_up().await;
        self.pending.lock().unwrap().take();
        if let Some(task) = self.watch_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn constraints(medium: CallMedium) -> MediaConstraints {
        // Audio is always captured; video only for video calls.
        MediaConstraints {
            audio: true,
            video: medium == CallMedium::Video,
        }
    }

    fn emit_phase(emitter: &EventEmitter, slot: &Arc<StdMutex<CallPhase>>, phase: CallPhase) {
        *slot.lock().unwrap() = phase;
        emitter.emit(ClientEvent::CallPhaseChanged(phase));
    }

    fn abort_phase(emitter: &EventEmitter, slot: &Arc<StdMutex<CallPhase>>) {
        Self::emit_phase(emitter, slot, CallPhase::Failed);
        Self::emit_phase(emitter, slot, CallPhase::Idle);
    }

    /// Writes locally discovered candidates into the given mailbox
    /// collection. Fire-and-forget: failures are logged, not retried.
    fn spawn_candidate_relay(
        mut candidates: mpsc::UnboundedReceiver<CandidateRecord>,
        store: Arc<dyn DocumentStore>,
        collection: CollectionPath,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(record) = candidates.recv().await {
                match serde_json::to_value(&record) {
                    Ok(fields) => {
                        if let Err(e) = store.add(&collection, fields).await {
                            tracing::warn!("candidate write failed (not retried): {e}");
                        }
                    }
                    Err(e) => tracing::warn!("candidate serialization failed: {e}"),
                }
            }
        })
    }

    /// Applies every Added entry of the remote side's candidate
    /// collection to the peer connection.
    fn spawn_remote_candidates(
        store: Arc<dyn DocumentStore>,
        collection: CollectionPath,
        peer: Arc<PeerConnection>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sub = store.watch_collection(&collection).await;
            while let Some(change) = sub.next().await {
                if change.kind != ChangeKind::Added {
                    continue;
                }
                match serde_json::from_value::<CandidateRecord>(change.doc.fields.clone()) {
                    Ok(record) => {
                        if let Err(e) = peer.add_remote_candidate(record).await {
                            tracing::warn!("remote candidate rejected: {e}");
                        }
                    }
                    Err(e) => tracing::warn!("malformed candidate document: {e}"),
                }
            }
        })
    }

    /// Caller-side record watch: apply the answer once, when it lands.
    async fn answer_watch(
        store: Arc<dyn DocumentStore>,
        doc: DocumentPath,
        peer: Arc<PeerConnection>,
        phase: Arc<StdMutex<CallPhase>>,
        emitter: EventEmitter,
    ) {
        let mut sub = store.watch_document(&doc).await;
        while let Some(change) = sub.next().await {
            if change.kind == ChangeKind::Removed {
                continue;
            }
            let record = match serde_json::from_value::<CallRecord>(change.doc.fields.clone()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("malformed call record: {e}");
                    continue;
                }
            };
            if record.kind == SignalKind::Answer && !peer.has_remote_description().await {
                match peer.apply_answer(&record.sdp).await {
                    Ok(()) => {
                        Self::emit_phase(&emitter, &phase, CallPhase::Connected);
                    }
                    Err(e) => tracing::warn!("failed to apply answer: {e}"),
                }
            }
        }
    }

    /// Standing watch on the call record. Detects an incoming offer:
    /// record of kind offer, no local call, caller is someone else.
    async fn incoming_watch(
        store: Arc<dyn DocumentStore>,
        doc: DocumentPath,
        identity: watch::Receiver<Option<Identity>>,
        active: Arc<TokioMutex<Option<ActiveCall>>>,
        pending: Arc<StdMutex<Option<CallRecord>>>,
        emitter: EventEmitter,
    ) {
        let mut sub = store.watch_document(&doc).await;
        while let Some(change) = sub.next().await {
            if change.kind == ChangeKind::Removed {
                pending.lock().unwrap().take();
                continue;
            }
            let record = match serde_json::from_value::<CallRecord>(change.doc.fields.clone()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("malformed call record: {e}");
                    continue;
                }
            };
            if record.kind != SignalKind::Offer {
                continue;
            }
            let Some(me) = identity.borrow().clone() else {
                continue;
            };
            if record.caller == me.uid {
                // Self-echo of our own offer.
                continue;
            }
            if active.lock().await.is_some() {
                continue;
            }
            let fresh = {
                let mut pending = pending.lock().unwrap();
                let duplicate = pending
                    .as_ref()
                    .map(|p| p.sdp == record.sdp)
                    .unwrap_or(false);
                if !duplicate {
                    *pending = Some(record.clone());
                }
                !duplicate
            };
            if fresh {
                emitter.emit(ClientEvent::CallPhaseChanged(CallPhase::IncomingDetected));
                emitter.emit(ClientEvent::IncomingCall {
                    medium: record.medium,
                    caller_uid: record.caller.clone(),
                    caller_name: record.caller_name.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraints_always_request_audio() {
        let audio = CallService::constraints(CallMedium::Audio);
        assert!(audio.audio && !audio.video);
        let video = CallService::constraints(CallMedium::Video);
        assert!(video.audio && video.video);
    }
}

//! Thin wrapper around a webrtc-rs peer connection: offer/answer
//! negotiation, candidate exchange, track attachment. All webrtc
//! errors collapse into [`CallError::Negotiation`] here.

use std::sync::Arc;

use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

use super::signaling::CandidateRecord;
use crate::errors::CallError;
use crate::events::{ClientEvent, EventEmitter};
use crate::media::{LocalMediaStream, TrackKind};

/// A committed local or remote session description.
#[derive(Debug, Clone)]
pub(crate) struct SessionDescription {
    pub sdp: String,
    /// "offer" or "answer", as the store schema records it.
    pub kind: String,
}

pub(crate) struct PeerConnection {
    pc: Arc<RTCPeerConnection>,
}

impl PeerConnection {
    /// Build a peer connection against the fixed relay hints.
    pub async fn new(ice_servers: &[String]) -> Result<Self, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::Negotiation(format!("register codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| CallError::Negotiation(format!("register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(config)
            .await
            .map_err(|e| CallError::Negotiation(format!("create peer connection: {e}")))?;

        Ok(Self { pc: Arc::new(pc) })
    }

    /// Attach every local capture track.
    pub async fn attach_local_stream(&self, stream: &LocalMediaStream) -> Result<(), CallError> {
        for track in stream.tracks() {
            let rtc: Arc<dyn TrackLocal + Send + Sync> = track.rtc();
            self.pc
                .add_track(rtc)
                .await
                .map_err(|e| CallError::Negotiation(format!("add track: {e}")))?;
        }
        Ok(())
    }

    /// Locally discovered ICE candidates, ready for the relay writer.
    pub fn local_candidates(&self) -> mpsc::UnboundedReceiver<CandidateRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(candidate) = candidate {
                        match candidate.to_json() {
                            Ok(init) => {
                                let _ = tx.send(CandidateRecord::from(init));
                            }
                            Err(e) => tracing::warn!("candidate serialization failed: {e}"),
                        }
                    }
                })
            }));
        rx
    }

    /// Emit `RemoteTrackStarted` when remote media arrives. The first
    /// remote track is the only "call is live" acknowledgment.
    pub fn forward_remote_tracks(&self, emitter: EventEmitter) {
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let emitter = emitter.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                tracing::info!("remote {kind:?} track started");
                emitter.emit(ClientEvent::RemoteTrackStarted { kind });
            })
        }));
    }

    /// Invoke `on_connected` once the connection reaches Connected.
    pub fn watch_connected<F>(&self, on_connected: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let on_connected = Arc::new(on_connected);
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let on_connected = on_connected.clone();
                Box::pin(async move {
                    tracing::debug!("peer connection state: {state}");
                    if state == RTCPeerConnectionState::Connected {
                        on_connected();
                    }
                })
            }));
    }

    /// Create an offer and commit it as the local description.
    pub async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("create offer: {e}")))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| CallError::Negotiation(format!("set local description: {e}")))?;
        self.local_description().await
    }

    /// Apply a remote offer and commit a local answer.
    pub async fn accept_offer(&self, offer_sdp: &str) -> Result<SessionDescription, CallError> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| CallError::Negotiation(format!("parse offer: {e}")))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| CallError::Negotiation(format!("set remote description: {e}")))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("create answer: {e}")))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| CallError::Negotiation(format!("set local description: {e}")))?;
        self.local_description().await
    }

    /// Apply the remote answer.
    pub async fn apply_answer(&self, answer_sdp: &str) -> Result<(), CallError> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_string())
            .map_err(|e| CallError::Negotiation(format!("parse answer: {e}")))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| CallError::Negotiation(format!("set remote description: {e}")))
    }

    pub async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    pub async fn add_remote_candidate(&self, record: CandidateRecord) -> Result<(), CallError> {
        self.pc
            .add_ice_candidate(record.into())
            .await
            .map_err(|e| CallError::Negotiation(format!("add ice candidate: {e}")))
    }

    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!("peer connection close failed: {e}");
        }
    }

    async fn local_description(&self) -> Result<SessionDescription, CallError> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CallError::Negotiation("no local description after commit".into()))?;
        Ok(SessionDescription {
            kind: desc.sdp_type.to_string(),
            sdp: desc.sdp,
        })
    }
}

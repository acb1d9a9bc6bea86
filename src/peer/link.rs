//! One signaling + media relationship with one remote participant.
//!
//! A `PeerLink` wraps an `RTCPeerConnection` and drives the offer/answer
//! handshake for it: outgoing messages go to the session's outbound
//! signaling queue, incoming ones are applied by the session calling the
//! `apply_*` operations. ICE candidates that arrive before the remote
//! description are buffered and flushed in arrival order once it lands.
//! At most one local offer is outstanding at a time; further offer
//! requests are deferred and replayed when the answer arrives.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::channels::ChannelEvent;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::media::{LocalTrack, MediaKind};
use crate::signaling::SignalingMessage;

/// Negotiation state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, no negotiation yet.
    Idle,
    /// Local offer sent, waiting for the answer.
    Offering,
    /// Remote offer received, answer sent, waiting for connectivity.
    Answering,
    /// Transport connected.
    Connected,
    /// Transport regressed after being connected. Recovery is observed,
    /// not driven: no timeout, no automatic teardown.
    Reconnecting,
    /// Torn down. Terminal.
    Closed,
}

/// Why a link was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The local participant left the session.
    Hangup,
    /// The remote participant announced departure.
    RemoteLeft,
    /// Negotiation could not reach a connected transport.
    NegotiationFailed,
    /// The transport failed or closed underneath the link.
    TransportFailed,
}

/// Outcome of [`PeerLink::attach_local_track`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackChange {
    /// An existing sender swapped tracks in place; the media line count
    /// is unchanged and no renegotiation is needed.
    Replaced,
    /// A new sender was added, introducing a media line the remote side
    /// has not seen. The caller must issue a fresh offer on this link.
    NewSender,
}

/// Candidate buffer and the described flag, under one lock so a late
/// candidate cannot overtake the flush.
#[derive(Default)]
struct CandidateGate {
    described: bool,
    queue: Vec<RTCIceCandidateInit>,
}

#[derive(Default)]
struct NegotiationState {
    offer_pending: bool,
    queued: bool,
}

/// Connection to one remote participant.
pub struct PeerLink {
    local_id: String,
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
    state: RwLock<LinkState>,
    connected_once: AtomicBool,
    closed: AtomicBool,
    close_reason: RwLock<Option<CloseReason>>,
    gate: Mutex<CandidateGate>,
    negotiation: Mutex<NegotiationState>,
    senders: Mutex<HashMap<MediaKind, Arc<RTCRtpSender>>>,
    channel: Mutex<Option<Arc<RTCDataChannel>>>,
    inbound: Mutex<Vec<MediaKind>>,
    channel_label: String,
    outbound: mpsc::UnboundedSender<SignalingMessage>,
    events: broadcast::Sender<SessionEvent>,
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("local_id", &self.local_id)
            .field("peer_id", &self.peer_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl PeerLink {
    /// Create a link toward `peer_id`.
    ///
    /// Outgoing signaling goes to `outbound`; transport and channel
    /// events to `events`. The link starts in [`LinkState::Idle`] with
    /// no senders attached.
    #[instrument(skip(config, outbound, events), fields(peer_id = %peer_id))]
    pub(crate) async fn new(
        local_id: String,
        peer_id: String,
        config: &SessionConfig,
        outbound: mpsc::UnboundedSender<SignalingMessage>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::TransportError(format!("failed to register codecs: {e}")))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::TransportError(format!("failed to register interceptors: {e}")))?;

        // Loopback candidates stay in the pool so single-host and LAN
        // sessions negotiate without STUN.
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_include_loopback_candidate(true);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::TransportError(format!("failed to create connection: {e}")))?,
        );

        let link = Arc::new(Self {
            local_id,
            peer_id,
            pc,
            state: RwLock::new(LinkState::Idle),
            connected_once: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_reason: RwLock::new(None),
            gate: Mutex::new(CandidateGate::default()),
            negotiation: Mutex::new(NegotiationState::default()),
            senders: Mutex::new(HashMap::new()),
            channel: Mutex::new(None),
            inbound: Mutex::new(Vec::new()),
            channel_label: config.data_channel_label.clone(),
            outbound,
            events,
        });

        link.install_transport_callbacks();
        debug!("link created");
        Ok(link)
    }

    /// Remote participant id this link talks to.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Current negotiation state.
    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// Why the link closed, once it has.
    pub async fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.read().await
    }

    /// Number of outbound senders currently attached.
    pub async fn sender_count(&self) -> usize {
        self.senders.lock().await.len()
    }

    /// Start (or queue) a local offer.
    ///
    /// At most one local offer is outstanding; a request made while one
    /// is pending is deferred and replayed when the answer arrives, so
    /// callers can treat this as fire-and-forget renegotiation. The
    /// link's ordered data channel is created here before the first
    /// offer if no channel exists yet.
    pub async fn begin_offer(self: &Arc<Self>) -> Result<()> {
        {
            let mut negotiation = self.negotiation.lock().await;
            if negotiation.offer_pending {
                negotiation.queued = true;
                debug!(peer_id = %self.peer_id, "offer deferred behind pending negotiation");
                return Ok(());
            }
            negotiation.offer_pending = true;
        }

        if let Err(e) = self.send_offer().await {
            // Leave the door open for a later attempt.
            self.negotiation.lock().await.offer_pending = false;
            return Err(e);
        }
        Ok(())
    }

    async fn send_offer(self: &Arc<Self>) -> Result<()> {
        if *self.state.read().await == LinkState::Closed {
            return Err(Error::NegotiationFailed("link is closed".to_string()));
        }
        self.ensure_channel().await?;

        if *self.state.read().await == LinkState::Idle {
            self.set_state(LinkState::Offering).await;
        }

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::NegotiationFailed(format!("failed to create offer: {e}")))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| Error::NegotiationFailed(format!("failed to set local offer: {e}")))?;

        self.outbound
            .send(SignalingMessage::offer(&self.local_id, &self.peer_id, offer))
            .map_err(|_| Error::TransportError("signaling queue closed".to_string()))?;
        debug!(peer_id = %self.peer_id, "offer sent");
        Ok(())
    }

    /// Apply a remote offer and send back the answer.
    ///
    /// Flushes buffered ICE candidates in arrival order once the remote
    /// description is set. Simultaneous offers from both sides are not
    /// reconciled: the transport rejects the colliding description and
    /// the failure surfaces as [`Error::NegotiationFailed`].
    pub async fn apply_remote_offer(&self, offer: RTCSessionDescription) -> Result<()> {
        let mark = {
            let state = self.state.read().await;
            if *state == LinkState::Closed {
                return Err(Error::NegotiationFailed("link is closed".to_string()));
            }
            *state == LinkState::Idle
        };
        if mark {
            self.set_state(LinkState::Answering).await;
        }

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::NegotiationFailed(format!("remote offer rejected: {e}")))?;
        self.flush_candidates().await;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationFailed(format!("failed to create answer: {e}")))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| Error::NegotiationFailed(format!("failed to set local answer: {e}")))?;

        self.outbound
            .send(SignalingMessage::answer(
                &self.local_id,
                &self.peer_id,
                answer,
            ))
            .map_err(|_| Error::TransportError("signaling queue closed".to_string()))?;
        debug!(peer_id = %self.peer_id, "answer sent");
        Ok(())
    }

    /// Apply the remote answer to our outstanding offer.
    ///
    /// Flushes buffered candidates, clears the outstanding-offer flag,
    /// and replays a deferred offer if one queued up in the meantime.
    /// An answer with no offer outstanding is dropped: at-least-once
    /// relays may redeliver one we already applied, and it must not
    /// disturb the settled description.
    pub async fn apply_remote_answer(self: &Arc<Self>, answer: RTCSessionDescription) -> Result<()> {
        if !self.negotiation.lock().await.offer_pending {
            debug!(peer_id = %self.peer_id, "answer without outstanding offer dropped");
            return Ok(());
        }
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::NegotiationFailed(format!("remote answer rejected: {e}")))?;
        self.flush_candidates().await;

        let replay = {
            let mut negotiation = self.negotiation.lock().await;
            negotiation.offer_pending = false;
            std::mem::take(&mut negotiation.queued)
        };
        if replay {
            debug!(peer_id = %self.peer_id, "replaying deferred offer");
            self.begin_offer().await?;
        }
        Ok(())
    }

    /// Add a remote ICE candidate, buffering it if no remote description
    /// has been applied yet. Application failures are logged and
    /// non-fatal; connectivity can survive individual bad candidates.
    pub async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) {
        let mut gate = self.gate.lock().await;
        if !gate.described {
            gate.queue.push(candidate);
            debug!(
                peer_id = %self.peer_id,
                buffered = gate.queue.len(),
                "candidate buffered before remote description"
            );
            return;
        }
        if let Err(e) = self.pc.add_ice_candidate(candidate).await {
            warn!(peer_id = %self.peer_id, error = %e, "candidate rejected");
        }
    }

    /// Attach a local track, replacing on an existing sender of the same
    /// kind or adding a new sender.
    ///
    /// The returned [`TrackChange`] tells the caller whether signaling is
    /// needed: a replacement changes no media lines, a new sender does.
    pub async fn attach_local_track(&self, track: &Arc<LocalTrack>) -> Result<TrackChange> {
        let kind = track.kind();
        let mut senders = self.senders.lock().await;

        if let Some(sender) = senders.get(&kind) {
            sender
                .replace_track(Some(
                    track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>
                ))
                .await
                .map_err(|e| {
                    Error::TransportError(format!("failed to replace {kind} track: {e}"))
                })?;
            debug!(peer_id = %self.peer_id, kind = %kind, track_id = %track.id(), "sender track replaced");
            return Ok(TrackChange::Replaced);
        }

        let sender = self
            .pc
            .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::TransportError(format!("failed to add {kind} track: {e}")))?;
        senders.insert(kind, sender);
        debug!(peer_id = %self.peer_id, kind = %kind, track_id = %track.id(), "sender added");
        Ok(TrackChange::NewSender)
    }

    /// Detach outbound video without removing the media line, so a later
    /// track can be swapped back in with no renegotiation.
    pub async fn clear_video_sender(&self) -> Result<()> {
        let senders = self.senders.lock().await;
        if let Some(sender) = senders.get(&MediaKind::Video) {
            sender
                .replace_track(None)
                .await
                .map_err(|e| Error::TransportError(format!("failed to clear video sender: {e}")))?;
            debug!(peer_id = %self.peer_id, "video sender cleared");
        }
        Ok(())
    }

    /// Send an application event over the data channel.
    pub async fn send_channel_event(&self, event: &ChannelEvent) -> Result<()> {
        let bytes = event.to_bytes()?;
        let channel = self.channel.lock().await;
        let dc = channel
            .as_ref()
            .ok_or_else(|| Error::TransportError("no data channel on this link".to_string()))?;
        dc.send(&Bytes::from(bytes))
            .await
            .map_err(|e| Error::TransportError(format!("data channel send failed: {e}")))?;
        Ok(())
    }

    /// Tear the link down. Idempotent: only the first call runs, later
    /// ones return immediately.
    ///
    /// Discards buffered candidates, closes channel and transport, emits
    /// a removal for every known remote track and then the final
    /// [`LinkState::Closed`] state change.
    pub async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(peer_id = %self.peer_id, ?reason, "closing link");
        *self.close_reason.write().await = Some(reason);

        self.gate.lock().await.queue.clear();

        if let Some(dc) = self.channel.lock().await.take() {
            if let Err(e) = dc.close().await {
                debug!(peer_id = %self.peer_id, error = %e, "data channel close reported an error");
            }
        }

        let removed: Vec<MediaKind> = {
            let mut inbound = self.inbound.lock().await;
            inbound.drain(..).collect()
        };
        for kind in removed {
            let _ = self.events.send(SessionEvent::RemoteTrackRemoved {
                peer_id: self.peer_id.clone(),
                kind,
            });
        }

        if let Err(e) = self.pc.close().await {
            debug!(peer_id = %self.peer_id, error = %e, "transport close reported an error");
        }

        self.set_state(LinkState::Closed).await;
    }

    async fn set_state(&self, new_state: LinkState) {
        {
            let mut state = self.state.write().await;
            if *state == new_state || *state == LinkState::Closed {
                return;
            }
            debug!(
                peer_id = %self.peer_id,
                from = ?*state,
                to = ?new_state,
                "link state changed"
            );
            *state = new_state;
        }
        let _ = self.events.send(SessionEvent::ConnectionStateChanged {
            peer_id: self.peer_id.clone(),
            state: new_state,
        });
    }

    async fn flush_candidates(&self) {
        let mut gate = self.gate.lock().await;
        gate.described = true;
        // Drained under the lock so an arriving candidate cannot slot in
        // ahead of the buffered ones.
        for candidate in gate.queue.drain(..) {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!(peer_id = %self.peer_id, error = %e, "buffered candidate rejected");
            }
        }
    }

    async fn ensure_channel(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.channel.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(&self.channel_label, Some(init))
            .await
            .map_err(|e| Error::TransportError(format!("failed to create data channel: {e}")))?;
        self.wire_channel(&dc);
        *slot = Some(dc);
        debug!(peer_id = %self.peer_id, label = %self.channel_label, "data channel created");
        Ok(())
    }

    fn wire_channel(self: &Arc<Self>, dc: &Arc<RTCDataChannel>) {
        let peer_id = self.peer_id.clone();
        dc.on_open(Box::new(move || {
            let peer_id = peer_id.clone();
            Box::pin(async move {
                debug!(%peer_id, "data channel open");
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let weak = weak.clone();
            let data = msg.data.to_vec();
            Box::pin(async move {
                let link = match weak.upgrade() {
                    Some(link) => link,
                    None => return,
                };
                match ChannelEvent::from_bytes(&data) {
                    Ok(event) => {
                        let _ = link.events.send(SessionEvent::ChannelMessage {
                            peer_id: link.peer_id.clone(),
                            event,
                        });
                    }
                    Err(e) => {
                        warn!(peer_id = %link.peer_id, error = %e, "dropping malformed channel payload");
                    }
                }
            })
        }));
    }

    fn install_transport_callbacks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.pc.on_peer_connection_state_change(Box::new(
            move |transport_state: RTCPeerConnectionState| {
                let weak = weak.clone();
                Box::pin(async move {
                    let link = match weak.upgrade() {
                        Some(link) => link,
                        None => return,
                    };
                    link.on_transport_state(transport_state).await;
                })
            },
        ));

        let weak = Arc::downgrade(self);
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let weak = weak.clone();
                Box::pin(async move {
                    // None marks end of gathering.
                    let candidate = match candidate {
                        Some(candidate) => candidate,
                        None => return,
                    };
                    let link = match weak.upgrade() {
                        Some(link) => link,
                        None => return,
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = link.outbound.send(SignalingMessage::ice_candidate(
                                &link.local_id,
                                &link.peer_id,
                                init,
                            ));
                        }
                        Err(e) => {
                            warn!(peer_id = %link.peer_id, error = %e, "failed to serialize local candidate");
                        }
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let weak = weak.clone();
                Box::pin(async move {
                    let link = match weak.upgrade() {
                        Some(link) => link,
                        None => return,
                    };
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        RTPCodecType::Video => MediaKind::Video,
                        _ => return,
                    };
                    {
                        let mut inbound = link.inbound.lock().await;
                        if !inbound.contains(&kind) {
                            inbound.push(kind);
                        }
                    }
                    info!(peer_id = %link.peer_id, kind = %kind, "remote track added");
                    let _ = link.events.send(SessionEvent::RemoteTrackAdded {
                        peer_id: link.peer_id.clone(),
                        kind,
                        track,
                    });
                })
            },
        ));

        let weak = Arc::downgrade(self);
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let weak = weak.clone();
            Box::pin(async move {
                let link = match weak.upgrade() {
                    Some(link) => link,
                    None => return,
                };
                debug!(peer_id = %link.peer_id, label = %dc.label(), "remote data channel received");
                link.wire_channel(&dc);
                *link.channel.lock().await = Some(dc);
            })
        }));
    }

    async fn on_transport_state(self: Arc<Self>, transport_state: RTCPeerConnectionState) {
        match transport_state {
            RTCPeerConnectionState::Connected => {
                self.connected_once.store(true, Ordering::SeqCst);
                self.set_state(LinkState::Connected).await;
            }
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
                if self.connected_once.load(Ordering::SeqCst) =>
            {
                // Observed, not driven: the transport may still recover.
                self.set_state(LinkState::Reconnecting).await;
            }
            RTCPeerConnectionState::Failed => {
                warn!(peer_id = %self.peer_id, "transport failed before connecting");
                let link = Arc::clone(&self);
                tokio::spawn(async move {
                    link.close(CloseReason::NegotiationFailed).await;
                });
            }
            RTCPeerConnectionState::Closed => {
                // Our own close() already holds the closed flag; this
                // only fires for a transport closed underneath us.
                let link = Arc::clone(&self);
                tokio::spawn(async move {
                    link.close(CloseReason::TransportFailed).await;
                });
            }
            _ => {}
        }
    }

    #[cfg(test)]
    pub(crate) async fn buffered_candidates(&self) -> Vec<String> {
        self.gate
            .lock()
            .await
            .queue
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }
}

//! Session orchestration across peer links.
//!
//! The manager owns the peer map and wires the three long-lived pumps:
//! outbound signaling (links push messages into an unbounded queue, one
//! task forwards them to the relay), media events (speaking changes and
//! platform-ended screen shares), and housekeeping (closed links drop
//! out of the map). Local capture operations run through the manager so
//! the resulting track changes fan out to every link, with a fresh offer
//! wherever a new sender appeared.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::channels::ChannelEvent;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::media::{LocalTrack, MediaController, MediaEvent};
use crate::peer::{CloseReason, LinkState, PeerLink, TrackChange};
use crate::signaling::{SignalingMessage, SignalingRelay};

/// One participant's view of a multi-party call.
pub struct SessionManager {
    local_id: String,
    config: SessionConfig,
    media: Arc<MediaController>,
    relay: Arc<dyn SignalingRelay>,
    links: RwLock<HashMap<String, Arc<PeerLink>>>,
    outbound: mpsc::UnboundedSender<SignalingMessage>,
    events: broadcast::Sender<SessionEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    left: AtomicBool,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("local_id", &self.local_id)
            .field("left", &self.left.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Enter a session as `local_peer_id`.
    ///
    /// Validates the configuration, spawns the event pumps, and
    /// announces presence through the relay (best-effort). No peer links
    /// exist yet: they are created lazily when a remote offer arrives,
    /// when a `join` announcement names a newcomer, or when the embedder
    /// calls [`initiate`](Self::initiate).
    #[instrument(skip(relay, media, config), fields(peer_id = %local_peer_id))]
    pub async fn join(
        local_peer_id: &str,
        relay: Arc<dyn SignalingRelay>,
        media: Arc<MediaController>,
        config: SessionConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let manager = Arc::new(Self {
            local_id: local_peer_id.to_string(),
            config,
            media,
            relay,
            links: RwLock::new(HashMap::new()),
            outbound: outbound_tx,
            events,
            tasks: Mutex::new(Vec::new()),
            left: AtomicBool::new(false),
        });

        manager.spawn_outbound_pump(outbound_rx).await;
        manager.spawn_media_pump().await;
        manager.spawn_housekeeping().await;

        if let Err(e) = manager
            .relay
            .send(SignalingMessage::join(&manager.local_id))
            .await
        {
            debug!(error = %e, "presence announcement not delivered");
        }

        info!("joined session");
        Ok(manager)
    }

    /// Local participant id.
    pub fn local_peer_id(&self) -> &str {
        &self.local_id
    }

    /// The media controller backing this session.
    pub fn media(&self) -> &Arc<MediaController> {
        &self.media
    }

    /// Subscribe to session events. Dropping the receiver unsubscribes;
    /// the stream closes once the manager (and its links) are dropped
    /// after [`leave`](Self::leave).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Remote participant ids with a live link.
    pub async fn peers(&self) -> Vec<String> {
        self.links.read().await.keys().cloned().collect()
    }

    /// Number of live links.
    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }

    /// Whether the local microphone currently reads as speaking.
    pub fn is_speaking(&self) -> bool {
        self.media.is_speaking()
    }

    /// Return the existing link for `remote_peer_id` or create one in
    /// `Idle`, attaching the current local tracks so they are part of
    /// the first negotiation.
    ///
    /// # Errors
    ///
    /// [`Error::TransportError`] when the configured peer cap is reached
    /// or the session has been left.
    pub async fn ensure_link(&self, remote_peer_id: &str) -> Result<Arc<PeerLink>> {
        self.ensure_active()?;

        if let Some(link) = self.links.read().await.get(remote_peer_id) {
            return Ok(Arc::clone(link));
        }

        let mut links = self.links.write().await;
        if let Some(link) = links.get(remote_peer_id) {
            return Ok(Arc::clone(link));
        }
        if links.len() as u32 >= self.config.max_peers {
            return Err(Error::TransportError(format!(
                "peer cap of {} reached, rejecting link to {remote_peer_id}",
                self.config.max_peers
            )));
        }

        let link = PeerLink::new(
            self.local_id.clone(),
            remote_peer_id.to_string(),
            &self.config,
            self.outbound.clone(),
            self.events.clone(),
        )
        .await?;

        for track in self.media.local_tracks().await {
            if let Err(e) = link.attach_local_track(&track).await {
                link.close(CloseReason::TransportFailed).await;
                return Err(e);
            }
        }

        links.insert(remote_peer_id.to_string(), Arc::clone(&link));
        info!(peer_id = %remote_peer_id, links = links.len(), "link created");
        Ok(link)
    }

    /// Create or reuse the link to `remote_peer_id` and drive it to an
    /// offer.
    pub async fn initiate(&self, remote_peer_id: &str) -> Result<()> {
        let link = self.ensure_link(remote_peer_id).await?;
        link.begin_offer().await
    }

    /// Route one inbound signaling message.
    ///
    /// Call this serially per relay connection (or use
    /// [`attach_inbound`](Self::attach_inbound)): per-sender arrival
    /// order is what keeps candidate and description application
    /// ordered. Messages echoed back for the local participant and
    /// messages addressed to someone else are dropped.
    pub async fn handle_incoming(&self, message: SignalingMessage) -> Result<()> {
        if self.left.load(Ordering::SeqCst) {
            return Ok(());
        }
        if message.from() == self.local_id {
            return Ok(());
        }
        if let Some(to) = message.to() {
            if to != self.local_id {
                warn!(to = %to, "dropping message addressed to another participant");
                return Ok(());
            }
        }

        match message {
            SignalingMessage::Offer { from, payload, .. } => {
                let link = self.ensure_link(&from).await?;
                if let Err(e) = link.apply_remote_offer(payload).await {
                    warn!(peer_id = %from, error = %e, "remote offer failed, closing link");
                    link.close(CloseReason::NegotiationFailed).await;
                    return Err(e);
                }
                Ok(())
            }
            SignalingMessage::Answer { from, payload, .. } => {
                let link = self.links.read().await.get(&from).cloned();
                let link = match link {
                    Some(link) => link,
                    None => {
                        warn!(peer_id = %from, "answer for unknown link dropped");
                        return Ok(());
                    }
                };
                if let Err(e) = link.apply_remote_answer(payload).await {
                    warn!(peer_id = %from, error = %e, "remote answer failed, closing link");
                    link.close(CloseReason::NegotiationFailed).await;
                    return Err(e);
                }
                Ok(())
            }
            SignalingMessage::IceCandidate { from, payload, .. } => {
                let link = self.ensure_link(&from).await?;
                link.add_remote_candidate(payload).await;
                Ok(())
            }
            SignalingMessage::Join { from } => {
                info!(peer_id = %from, "participant joined, initiating");
                self.initiate(&from).await
            }
            SignalingMessage::Leave { from } => {
                self.close_link(&from, CloseReason::RemoteLeft).await;
                Ok(())
            }
        }
    }

    /// Pump inbound messages from a channel, serially, until it closes
    /// or the session is torn down.
    pub async fn attach_inbound(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<SignalingMessage>,
    ) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let manager = match weak.upgrade() {
                    Some(manager) => manager,
                    None => break,
                };
                if let Err(e) = manager.handle_incoming(message).await {
                    warn!(error = %e, "inbound signaling message failed");
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    /// Acquire local capture and attach the new tracks to every link.
    pub async fn acquire_media(&self, audio: bool, video: bool) -> Result<Vec<Arc<LocalTrack>>> {
        self.ensure_active()?;
        let tracks = self.media.acquire(audio, video).await?;
        for track in &tracks {
            self.attach_to_all(track).await;
        }
        Ok(tracks)
    }

    /// Flip the microphone mute state. Returns the new enabled state.
    pub async fn toggle_audio(&self) -> Result<bool> {
        self.media.toggle_audio().await
    }

    /// Flip the camera state, acquiring and fanning out a fresh track
    /// when none exists. Returns the new enabled state.
    pub async fn toggle_video(&self) -> Result<bool> {
        let toggle = self.media.toggle_video().await?;
        if let Some(track) = &toggle.attach {
            self.attach_to_all(track).await;
        }
        Ok(toggle.enabled)
    }

    /// Start screen sharing; the display track takes over the video
    /// sender on every link.
    pub async fn start_screen_share(&self) -> Result<()> {
        self.ensure_active()?;
        let track = self.media.start_screen_share().await?;
        self.attach_to_all(&track).await;
        Ok(())
    }

    /// Stop screen sharing; the camera track returns to every link's
    /// video sender if one exists, otherwise video goes dark.
    pub async fn stop_screen_share(&self) -> Result<()> {
        match self.media.stop_screen_share().await? {
            Some(camera) => self.attach_to_all(&camera).await,
            None => self.clear_video_on_all().await,
        }
        Ok(())
    }

    /// Switch to a different camera and fan the new track out, unless a
    /// screen share currently owns the video line (the share's stop path
    /// picks the new camera up later).
    pub async fn switch_camera(&self, device_id: &str) -> Result<()> {
        let track = self.media.switch_camera(device_id).await?;
        if !self.media.is_screen_sharing().await {
            self.attach_to_all(&track).await;
        }
        Ok(())
    }

    /// Switch to a different microphone and fan the new track out.
    pub async fn switch_microphone(&self, device_id: &str) -> Result<()> {
        let track = self.media.switch_microphone(device_id).await?;
        self.attach_to_all(&track).await;
        Ok(())
    }

    /// Send a chat message to every connected peer, best-effort.
    pub async fn send_chat(&self, body: &str) -> Result<()> {
        self.broadcast_channel_event(ChannelEvent::chat(body)).await
    }

    /// Send an emoji reaction to every connected peer, best-effort.
    pub async fn send_reaction(&self, emoji: &str) -> Result<()> {
        self.broadcast_channel_event(ChannelEvent::reaction(emoji))
            .await
    }

    /// Leave the session. Idempotent.
    ///
    /// Announces departure (best-effort), closes every link with
    /// [`CloseReason::Hangup`], releases local capture, and stops the
    /// pumps. Event receivers see the per-link teardown events; the
    /// stream itself ends when the manager is dropped.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(peer_id = %self.local_id, "leaving session");

        if let Err(e) = self
            .relay
            .send(SignalingMessage::leave(&self.local_id))
            .await
        {
            debug!(error = %e, "departure announcement not delivered");
        }

        let links: Vec<Arc<PeerLink>> = {
            let mut map = self.links.write().await;
            map.drain().map(|(_, link)| link).collect()
        };
        join_all(links.iter().map(|link| link.close(CloseReason::Hangup))).await;

        self.media.cleanup().await;

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.left.load(Ordering::SeqCst) {
            return Err(Error::TransportError(
                "session has been left".to_string(),
            ));
        }
        Ok(())
    }

    async fn close_link(&self, peer_id: &str, reason: CloseReason) {
        let link = self.links.write().await.remove(peer_id);
        if let Some(link) = link {
            link.close(reason).await;
        }
    }

    /// Attach a track to every link, renegotiating where it introduced a
    /// new sender. Per-link failures are logged; one bad link must not
    /// hold the track back from the rest.
    async fn attach_to_all(&self, track: &Arc<LocalTrack>) {
        let links: Vec<Arc<PeerLink>> = self.links.read().await.values().cloned().collect();
        if links.is_empty() {
            return;
        }
        let results = join_all(links.iter().map(|link| async move {
            let change = link.attach_local_track(track).await?;
            if change == TrackChange::NewSender {
                link.begin_offer().await?;
            }
            Ok::<(), Error>(())
        }))
        .await;
        for (link, result) in links.iter().zip(results) {
            if let Err(e) = result {
                warn!(peer_id = %link.peer_id(), error = %e, "failed to attach track");
            }
        }
    }

    async fn clear_video_on_all(&self) {
        let links: Vec<Arc<PeerLink>> = self.links.read().await.values().cloned().collect();
        let results = join_all(links.iter().map(|link| link.clear_video_sender())).await;
        for (link, result) in links.iter().zip(results) {
            if let Err(e) = result {
                warn!(peer_id = %link.peer_id(), error = %e, "failed to clear video sender");
            }
        }
    }

    async fn broadcast_channel_event(&self, event: ChannelEvent) -> Result<()> {
        // Surface size and encoding problems once, not per link.
        event.to_bytes()?;
        let links: Vec<Arc<PeerLink>> = self.links.read().await.values().cloned().collect();
        let results = join_all(links.iter().map(|link| link.send_channel_event(&event))).await;
        for (link, result) in links.iter().zip(results) {
            if let Err(e) = result {
                debug!(peer_id = %link.peer_id(), error = %e, "channel event not delivered");
            }
        }
        Ok(())
    }

    async fn spawn_outbound_pump(
        self: &Arc<Self>,
        mut outbound: mpsc::UnboundedReceiver<SignalingMessage>,
    ) {
        let relay = Arc::clone(&self.relay);
        let handle = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(e) = relay.send(message).await {
                    warn!(error = %e, "relay send failed");
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    async fn spawn_media_pump(self: &Arc<Self>) {
        let mut media_events = self.media.subscribe();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match media_events.recv().await {
                    Ok(event) => {
                        let manager = match weak.upgrade() {
                            Some(manager) => manager,
                            None => break,
                        };
                        manager.on_media_event(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "media event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    async fn on_media_event(&self, event: MediaEvent) {
        match event {
            MediaEvent::SpeakingChanged { speaking } => {
                let _ = self.events.send(SessionEvent::SpeakingChanged {
                    peer_id: self.local_id.clone(),
                    speaking,
                });
            }
            MediaEvent::ScreenShareEnded { restored } => {
                info!("screen share ended by the platform");
                match restored {
                    Some(track) => self.attach_to_all(&track).await,
                    None => self.clear_video_on_all().await,
                }
            }
        }
    }

    async fn spawn_housekeeping(self: &Arc<Self>) {
        let mut events = self.events.subscribe();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::ConnectionStateChanged {
                        peer_id,
                        state: LinkState::Closed,
                    }) => {
                        let manager = match weak.upgrade() {
                            Some(manager) => manager,
                            None => break,
                        };
                        if manager.links.write().await.remove(&peer_id).is_some() {
                            debug!(%peer_id, "closed link removed from session");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }
}

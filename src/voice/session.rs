use super::{
    codec,
    error::{Error, Result},
    transport::{DatagramSocket, MessageSocket},
    VoiceConnectionClient,
};
use crate::{
    error::BoxError,
    events::Handler,
    id::UserId,
    manager::{
        close::TransportClosed,
        ConnectionManager,
        Connector,
        Error as ConnectionError,
        Result as ConnectionResult,
        WeakConnectionManager,
    },
    model::{ControlFrame, Event, OpCode},
    udp::UdpTransport,
    ws::WsTransport,
    Config,
    ConnectionInfo,
    ConnectionState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    select,
    spawn,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn, Instrument};
use url::Url;

/// A self-healing voice session.
///
/// This couples a [`VoiceConnectionClient`] to a [`ConnectionManager`]: the
/// manager reconnects on failure, while this type performs the voice
/// gateway handshake on each attempt.
///
/// An attempt is counted as connected once the voice server has confirmed the
/// session's encryption key.
///
/// The session is stopped when dropped.
#[derive(Debug)]
pub struct VoiceSession {
    core: Arc<SessionCore>,
    manager: ConnectionManager,
}

#[derive(Debug)]
struct SessionCore {
    info: ConnectionInfo,
    config: Config,
    client: VoiceConnectionClient,
    attempt: Mutex<AttemptState>,
    latency: Mutex<Option<Duration>>,
    udp_latency: Mutex<Option<Duration>>,
    ssrcs: Mutex<HashMap<u32, UserId>>,
}

#[derive(Debug, Default)]
struct AttemptState {
    token: Option<CancellationToken>,
    heartbeat: Option<CancellationToken>,
    keepalive: Option<CancellationToken>,
    ssrc: Option<u32>,
    secret_key: Option<Vec<u8>>,
    pending_heartbeat: Option<(u64, Instant)>,
    pending_keepalive: Option<(u64, Instant)>,
}

impl AttemptState {
    fn stop_tasks(&mut self) {
        for token in [self.heartbeat.take(), self.keepalive.take()]
            .into_iter()
            .flatten()
        {
            token.cancel();
        }
    }
}

impl VoiceSession {
    /// Creates a stopped session using websocket and UDP transports.
    #[must_use]
    pub fn new(info: ConnectionInfo, config: Config) -> Self {
        Self::with_transports(
            info,
            config,
            Box::new(WsTransport::new()),
            Box::new(UdpTransport::new()),
        )
    }

    /// Creates a stopped session over the given transports.
    #[must_use]
    pub fn with_transports(
        info: ConnectionInfo,
        config: Config,
        ws: Box<dyn MessageSocket>,
        udp: Box<dyn DatagramSocket>,
    ) -> Self {
        let client = VoiceConnectionClient::new(info.guild_id, config.crypto_mode, ws, udp);

        let core = Arc::new(SessionCore {
            info,
            config: config.clone(),
            client: client.clone(),
            attempt: Mutex::new(AttemptState::default()),
            latency: Mutex::new(None),
            udp_latency: Mutex::new(None),
            ssrcs: Mutex::new(HashMap::new()),
        });

        let manager = ConnectionManager::new(config, core.clone(), |close| {
            client.on_disconnected(
                move |closed: &Option<TransportClosed>| -> std::result::Result<(), BoxError> {
                    close.closed(closed.clone());
                    Ok(())
                },
            );
        });

        client.on_received_event(EventRouter {
            core: Arc::downgrade(&core),
            manager: manager.downgrade(),
        });
        client.on_received_packet(PacketRouter {
            core: Arc::downgrade(&core),
            manager: manager.downgrade(),
        });

        Self { core, manager }
    }

    /// Begins connecting in the background, reconnecting on failure.
    #[instrument(skip(self))]
    pub async fn start(&self) -> ConnectionResult<()> {
        self.manager.start().await
    }

    /// Leaves the voice session, and stops reconnecting.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        self.manager.stop();
    }

    /// Returns the lifecycle stage of the session.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Returns the SSRC allocated to this session by the voice server.
    #[must_use]
    pub fn ssrc(&self) -> Option<u32> {
        self.core.attempt.lock().ssrc
    }

    /// Returns the key for encrypting voice packets, once negotiated.
    #[must_use]
    pub fn secret_key(&self) -> Option<Vec<u8>> {
        self.core.attempt.lock().secret_key.clone()
    }

    /// Returns the round-trip time of the last acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        *self.core.latency.lock()
    }

    /// Returns the round-trip time of the last echoed UDP keepalive.
    #[must_use]
    pub fn udp_latency(&self) -> Option<Duration> {
        *self.core.udp_latency.lock()
    }

    /// Returns the user last seen speaking with `ssrc`.
    #[must_use]
    pub fn user_for_ssrc(&self, ssrc: u32) -> Option<UserId> {
        self.core.ssrcs.lock().get(&ssrc).copied()
    }

    /// Returns the manager driving this session's reconnects.
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Returns the client carrying this session's traffic.
    #[must_use]
    pub fn client(&self) -> &VoiceConnectionClient {
        &self.core.client
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.manager.stop();
    }
}

#[async_trait]
impl Connector for SessionCore {
    async fn on_connecting(
        &self,
        manager: &ConnectionManager,
        token: CancellationToken,
    ) -> std::result::Result<(), BoxError> {
        {
            let mut attempt = self.attempt.lock();
            attempt.stop_tasks();
            *attempt = AttemptState {
                token: Some(token),
                ..Default::default()
            };
        }

        let url = generate_url(&self.info.endpoint, self.config.gateway_version)?;

        self.client.connect(url).await?;
        self.client
            .send_identity(self.info.user_id, &self.info.session_id, &self.info.token)
            .await?;

        manager.wait().await?;

        info!("Connected to: {}", self.info.endpoint);

        Ok(())
    }

    async fn on_disconnecting(
        &self,
        _manager: &ConnectionManager,
        error: &ConnectionError,
    ) -> std::result::Result<(), BoxError> {
        debug!("Leaving voice session: {error}");

        self.attempt.lock().stop_tasks();
        self.ssrcs.lock().clear();

        self.client.disconnect().await?;

        Ok(())
    }
}

impl SessionCore {
    async fn handle_event(
        &self,
        this: &Weak<SessionCore>,
        manager: &ConnectionManager,
        event: Event,
    ) -> Result<()> {
        match event {
            Event::Hello(hello) => {
                info!("WS heartbeat duration {}ms.", hello.heartbeat_interval);

                let millis = hello.heartbeat_interval.max(1.0);
                let interval = Duration::try_from_secs_f64(millis / 1000.0)
                    .map_err(|_| Error::IllegalHeartbeatInterval)?;
                let Some(token) = self.child_token(|a| &mut a.heartbeat) else {
                    return Ok(());
                };

                spawn(
                    heartbeat_loop(this.clone(), manager.downgrade(), interval, token)
                        .in_current_span(),
                );
            },
            Event::Ready(ready) => {
                if !self.config.crypto_mode.is_offered(&ready.modes) {
                    return Err(Error::CryptoModeUnavailable);
                }

                self.attempt.lock().ssrc = Some(ready.ssrc);

                self.client
                    .set_udp_endpoint(SocketAddr::new(ready.ip, ready.port))
                    .await;
                self.client.send_discovery(ready.ssrc).await?;
            },
            Event::SessionDescription(desc) => {
                if desc.mode != self.config.crypto_mode.to_request_str() {
                    return Err(Error::CryptoModeInvalid);
                }

                self.attempt.lock().secret_key = Some(desc.secret_key);

                if let Some(token) = self.child_token(|a| &mut a.keepalive) {
                    spawn(
                        keepalive_loop(
                            this.clone(),
                            manager.downgrade(),
                            self.config.keepalive_interval,
                            token,
                        )
                        .in_current_span(),
                    );
                }

                manager.complete();
            },
            Event::HeartbeatAck(nonce) => {
                let pending = self.attempt.lock().pending_heartbeat;

                match pending {
                    Some((sent, at)) if sent == nonce => {
                        self.attempt.lock().pending_heartbeat = None;
                        *self.latency.lock() = Some(at.elapsed());
                    },
                    _ => debug!("Heartbeat ACK for unknown nonce {nonce}."),
                }
            },
            Event::Speaking(speaking) =>
                if let (Some(ssrc), Some(user_id)) = (speaking.ssrc, speaking.user_id) {
                    self.ssrcs.lock().insert(ssrc, user_id);
                },
            Event::ClientDisconnect(gone) => {
                self.ssrcs.lock().retain(|_, user| *user != gone.user_id);
            },
            other => trace!("Unhandled voice event: {:?}", other),
        }

        Ok(())
    }

    async fn handle_packet(&self, packet: &[u8]) -> Result<()> {
        if codec::is_discovery_response(packet) {
            let (address, port) = codec::parse_discovery_response(packet)?;
            debug!("IP discovery found external endpoint {address}:{port}.");

            self.client.send_select_protocol(address, port).await?;
        } else if let Some(value) = codec::parse_keepalive(packet) {
            let pending = self.attempt.lock().pending_keepalive;

            if let Some((sent, at)) = pending {
                if sent == value {
                    *self.udp_latency.lock() = Some(at.elapsed());
                }
            }
        }

        Ok(())
    }

    /// Creates a cancellation scope for a background task of the current
    /// attempt, replacing any previous one in `slot`.
    fn child_token(
        &self,
        slot: impl FnOnce(&mut AttemptState) -> &mut Option<CancellationToken>,
    ) -> Option<CancellationToken> {
        let mut attempt = self.attempt.lock();
        let token = attempt.token.as_ref()?.child_token();

        if let Some(old) = slot(&mut *attempt).replace(token.clone()) {
            old.cancel();
        }

        Some(token)
    }
}

fn generate_url(endpoint: &str, version: u8) -> Result<Url> {
    let endpoint = endpoint.strip_suffix(":80").unwrap_or(endpoint);

    Url::parse(&format!("wss://{endpoint}/?v={version}")).or(Err(Error::EndpointUrl))
}

async fn heartbeat_loop(
    core: Weak<SessionCore>,
    manager: WeakConnectionManager,
    interval: Duration,
    token: CancellationToken,
) {
    trace!("Heartbeat loop started.");

    loop {
        let (Some(core), Some(manager)) = (core.upgrade(), manager.upgrade()) else {
            break;
        };

        if core.attempt.lock().pending_heartbeat.is_some() {
            warn!("Voice server did not acknowledge last heartbeat.");
            manager.error(ConnectionError::connector(Error::HeartbeatMissed));
            break;
        }

        match core.client.send_heartbeat().await {
            Ok(nonce) => core.attempt.lock().pending_heartbeat = Some((nonce, Instant::now())),
            Err(e) => {
                manager.error(ConnectionError::connector(e));
                break;
            },
        }

        drop((core, manager));

        select! {
            () = token.cancelled() => break,
            () = sleep(interval) => {},
        }
    }

    trace!("Heartbeat loop stopped.");
}

async fn keepalive_loop(
    core: Weak<SessionCore>,
    manager: WeakConnectionManager,
    interval: Duration,
    token: CancellationToken,
) {
    trace!("Keepalive loop started.");

    loop {
        let (Some(core), Some(manager)) = (core.upgrade(), manager.upgrade()) else {
            break;
        };

        match core.client.send_keepalive().await {
            Ok(value) => core.attempt.lock().pending_keepalive = Some((value, Instant::now())),
            Err(e) => {
                manager.error(ConnectionError::connector(e));
                break;
            },
        }

        drop((core, manager));

        select! {
            () = token.cancelled() => break,
            () = sleep(interval) => {},
        }
    }

    trace!("Keepalive loop stopped.");
}

/// Opcodes whose payloads an attempt cannot proceed without.
fn is_handshake(op: Option<OpCode>) -> bool {
    matches!(
        op,
        Some(OpCode::Hello | OpCode::Ready | OpCode::SessionDescription)
    )
}

struct EventRouter {
    core: Weak<SessionCore>,
    manager: WeakConnectionManager,
}

#[async_trait]
impl Handler<ControlFrame> for EventRouter {
    async fn act(&self, frame: &ControlFrame) -> std::result::Result<(), BoxError> {
        let (Some(core), Some(manager)) = (self.core.upgrade(), self.manager.upgrade()) else {
            return Ok(());
        };

        let res = match Event::try_from(frame.clone()) {
            Ok(event) => core.handle_event(&self.core, &manager, event).await,
            Err(e) if is_handshake(frame.opcode()) => Err(Error::from(e)),
            Err(e) => {
                warn!("Dropping malformed op{} payload: {e}", frame.op);
                Ok(())
            },
        };

        if let Err(e) = res {
            warn!("Voice handshake failed: {e}");
            manager.error(ConnectionError::connector(e));
        }

        Ok(())
    }
}

struct PacketRouter {
    core: Weak<SessionCore>,
    manager: WeakConnectionManager,
}

#[async_trait]
impl Handler<Vec<u8>> for PacketRouter {
    async fn act(&self, packet: &Vec<u8>) -> std::result::Result<(), BoxError> {
        let (Some(core), Some(manager)) = (self.core.upgrade(), self.manager.upgrade()) else {
            return Ok(());
        };

        if let Err(e) = core.handle_packet(packet).await {
            warn!("Voice datagram handling failed: {e}");
            manager.error(ConnectionError::connector(e));
        }

        Ok(())
    }
}

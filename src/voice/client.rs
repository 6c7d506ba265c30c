use super::{
    codec,
    error::Result,
    transport::{DatagramSocket, MessageSocket, SocketEvent, SocketMessage},
};
use crate::{
    events::{Handler, Subscribers},
    id::{GuildId, UserId},
    manager::close::TransportClosed,
    model::{
        payload::{Identify, ProtocolData, Resume, SelectProtocol, Speaking},
        ControlFrame,
        OpCode,
    },
    ConnectionState,
    CryptoMode,
};
use derivative::Derivative;
use flume::Receiver;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Weak,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{select, spawn, sync::Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn, Instrument};
use url::Url;

/// Control and data transport pair for one voice session.
///
/// A client owns a message socket carrying the voice gateway's JSON control
/// frames, and a datagram socket carrying voice, IP discovery, and keepalive
/// traffic. It performs no handshake logic itself: each step is exposed as a
/// method, and inbound traffic is raised to subscribers.
///
/// This is a cheap handle: clones drive the same sockets. Both sockets are
/// released once the last handle is dropped.
#[derive(Clone, Debug)]
pub struct VoiceConnectionClient {
    inner: Arc<ClientInner>,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct ClientInner {
    guild_id: GuildId,
    crypto_mode: CryptoMode,
    state: RwLock<ConnectionState>,
    connection_lock: AsyncMutex<()>,
    cancel: Mutex<Option<CancellationToken>>,
    #[derivative(Debug = "ignore")]
    ws: AsyncMutex<Box<dyn MessageSocket>>,
    #[derivative(Debug = "ignore")]
    udp: AsyncMutex<Box<dyn DatagramSocket>>,
    udp_port: Mutex<Option<u16>>,
    next_keepalive: AtomicU64,
    received_event: Subscribers<ControlFrame>,
    received_packet: Subscribers<Vec<u8>>,
    disconnected: Subscribers<Option<TransportClosed>>,
    sent_gateway_message: Subscribers<OpCode>,
    sent_discovery: Subscribers<()>,
    sent_data: Subscribers<usize>,
}

impl VoiceConnectionClient {
    /// Creates a disconnected client for a call in `guild_id`.
    ///
    /// `crypto_mode` is announced to the voice server in
    /// [`send_select_protocol`](Self::send_select_protocol).
    pub fn new(
        guild_id: GuildId,
        crypto_mode: CryptoMode,
        ws: Box<dyn MessageSocket>,
        udp: Box<dyn DatagramSocket>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                guild_id,
                crypto_mode,
                state: RwLock::new(ConnectionState::Disconnected),
                connection_lock: AsyncMutex::new(()),
                cancel: Mutex::new(None),
                ws: AsyncMutex::new(ws),
                udp: AsyncMutex::new(udp),
                udp_port: Mutex::new(None),
                next_keepalive: AtomicU64::new(0),
                received_event: Subscribers::new(),
                received_packet: Subscribers::new(),
                disconnected: Subscribers::new(),
                sent_gateway_message: Subscribers::new(),
                sent_discovery: Subscribers::new(),
                sent_data: Subscribers::new(),
            }),
        }
    }

    /// Returns the guild this client's session belongs to.
    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    /// Returns the current connection status of both sockets.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Returns the local port of the datagram socket, while connected.
    #[must_use]
    pub fn udp_port(&self) -> Option<u16> {
        *self.inner.udp_port.lock()
    }

    /// Adds a handler for every decoded inbound control frame.
    pub fn on_received_event<H: Handler<ControlFrame> + 'static>(&self, handler: H) {
        self.inner.received_event.add(handler);
    }

    /// Adds a handler for every inbound datagram.
    pub fn on_received_packet<H: Handler<Vec<u8>> + 'static>(&self, handler: H) {
        self.inner.received_packet.add(handler);
    }

    /// Adds a handler fired when the message socket closes unexpectedly.
    ///
    /// This fires after both sockets have been torn down.
    pub fn on_disconnected<H: Handler<Option<TransportClosed>> + 'static>(&self, handler: H) {
        self.inner.disconnected.add(handler);
    }

    /// Adds a handler fired with the opcode of each sent control frame.
    pub fn on_sent_gateway_message<H: Handler<OpCode> + 'static>(&self, handler: H) {
        self.inner.sent_gateway_message.add(handler);
    }

    /// Adds a handler fired after each IP discovery request.
    pub fn on_sent_discovery<H: Handler<()> + 'static>(&self, handler: H) {
        self.inner.sent_discovery.add(handler);
    }

    /// Adds a handler fired with the size of each datagram sent via
    /// [`send_datagram`](Self::send_datagram).
    pub fn on_sent_data<H: Handler<usize> + 'static>(&self, handler: H) {
        self.inner.sent_data.add(handler);
    }

    /// Opens the message socket to `url`, and binds the datagram socket.
    ///
    /// If either step fails, both sockets are torn down before the error is
    /// returned: the client is never left [`Connecting`].
    ///
    /// [`Connecting`]: ConnectionState::Connecting
    #[instrument(skip(self))]
    pub async fn connect(&self, url: Url) -> Result<()> {
        let _guard = self.inner.connection_lock.lock().await;

        let res = self.connect_inner(url).await;

        if let Err(e) = &res {
            debug!("Voice connection failed: {e}");
            if let Err(e) = self.disconnect_inner().await {
                warn!("Cleanup after failed connection also failed: {e}");
            }
        }

        res
    }

    async fn connect_inner(&self, url: Url) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        let token = CancellationToken::new();
        let old_token = self.inner.cancel.lock().replace(token.clone());
        if let Some(old_token) = old_token {
            old_token.cancel();
        }

        let (ws_tx, ws_rx) = flume::unbounded();
        let (udp_tx, udp_rx) = flume::unbounded();

        {
            let mut ws = self.inner.ws.lock().await;
            ws.set_cancel_token(token.clone());
            ws.connect(url, ws_tx).await?;
        }

        let port = {
            let mut udp = self.inner.udp.lock().await;
            udp.set_cancel_token(token.clone());
            udp.start(udp_tx).await?;
            udp.port()
        };
        *self.inner.udp_port.lock() = port;

        let inner = Arc::downgrade(&self.inner);
        spawn(ws_runner(inner.clone(), ws_rx, token.clone()).in_current_span());
        spawn(udp_runner(inner, udp_rx, token).in_current_span());

        self.set_state(ConnectionState::Connected);
        info!("Voice transports connected.");

        Ok(())
    }

    /// Closes both sockets.
    ///
    /// Does nothing if the client is already disconnected.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.inner.connection_lock.lock().await;

        self.disconnect_inner().await
    }

    async fn disconnect_inner(&self) -> Result<()> {
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        self.set_state(ConnectionState::Disconnecting);

        let token = self.inner.cancel.lock().take();
        if let Some(token) = token {
            token.cancel();
        }

        let udp_res = self.inner.udp.lock().await.stop().await;
        let ws_res = self.inner.ws.lock().await.disconnect().await;
        *self.inner.udp_port.lock() = None;

        self.set_state(ConnectionState::Disconnected);
        info!("Voice transports disconnected.");

        udp_res?;
        ws_res?;

        Ok(())
    }

    /// Disconnects, and unregisters every handler.
    pub async fn dispose(self) -> Result<()> {
        let res = self.disconnect().await;

        self.inner.received_event.clear();
        self.inner.received_packet.clear();
        self.inner.disconnected.clear();
        self.inner.sent_gateway_message.clear();
        self.inner.sent_discovery.clear();
        self.inner.sent_data.clear();

        res
    }

    /// Sends a control frame with any serializable payload.
    pub async fn send<T: Serialize + Sync>(&self, op: OpCode, payload: &T) -> Result<()> {
        let frame = ControlFrame::new(op, payload)?;
        let message = codec::encode_frame(&frame)?;

        self.inner.ws.lock().await.send(message).await?;
        self.inner.sent_gateway_message.invoke(&op).await?;

        Ok(())
    }

    /// Identifies this session to the voice gateway.
    #[instrument(skip(self, token))]
    pub async fn send_identity(&self, user_id: UserId, session_id: &str, token: &str) -> Result<()> {
        self.send(OpCode::Identify, &Identify {
            server_id: self.inner.guild_id,
            session_id: session_id.into(),
            token: token.into(),
            user_id,
        })
        .await
    }

    /// Asks the voice gateway to resume an interrupted session.
    #[instrument(skip(self, token))]
    pub async fn send_resume(&self, session_id: &str, token: &str) -> Result<()> {
        self.send(OpCode::Resume, &Resume {
            server_id: self.inner.guild_id,
            session_id: session_id.into(),
            token: token.into(),
        })
        .await
    }

    /// Sends a heartbeat, returning the nonce the server should echo back.
    ///
    /// The nonce is the current Unix time in milliseconds.
    pub async fn send_heartbeat(&self) -> Result<u64> {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);

        self.send(OpCode::Heartbeat, &nonce).await?;

        Ok(nonce)
    }

    /// Announces the external endpoint found via IP discovery, selecting the
    /// datagram protocol and this client's encryption mode.
    #[instrument(skip(self))]
    pub async fn send_select_protocol(&self, external_ip: IpAddr, external_port: u16) -> Result<()> {
        self.send(OpCode::SelectProtocol, &SelectProtocol {
            protocol: crate::constants::VOICE_DATA_PROTOCOL.into(),
            data: ProtocolData {
                address: external_ip,
                port: external_port,
                mode: self.inner.crypto_mode.to_request_str().into(),
            },
        })
        .await
    }

    /// Sets whether this client is currently sending voice.
    pub async fn send_set_speaking(&self, speaking: bool) -> Result<()> {
        self.send(OpCode::Speaking, &Speaking {
            speaking: u8::from(speaking),
            delay: Some(0),
            ssrc: None,
            user_id: None,
        })
        .await
    }

    /// Sets the voice server address used for all datagrams.
    pub async fn set_udp_endpoint(&self, addr: SocketAddr) {
        self.inner.udp.lock().await.set_destination(addr);
    }

    /// Sends an IP discovery request for `ssrc`.
    #[instrument(skip(self))]
    pub async fn send_discovery(&self, ssrc: u32) -> Result<()> {
        let packet = codec::discovery_request(ssrc);

        self.inner.udp.lock().await.send(&packet).await?;
        self.inner.sent_discovery.invoke(&()).await?;

        Ok(())
    }

    /// Sends a keepalive datagram, returning the counter value it carried.
    ///
    /// Counter values start from `0`, and wrap on overflow.
    pub async fn send_keepalive(&self) -> Result<u64> {
        let value = self.inner.next_keepalive.fetch_add(1, Ordering::Relaxed);
        let packet = codec::keepalive(value);

        self.inner.udp.lock().await.send(&packet).await?;

        Ok(value)
    }

    /// Sends raw bytes, such as an encrypted voice packet, as one datagram.
    pub async fn send_datagram(&self, datagram: &[u8]) -> Result<()> {
        self.inner.udp.lock().await.send(datagram).await?;
        self.inner.sent_data.invoke(&datagram.len()).await?;

        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.inner.state.write() = state;
    }

    async fn handle_message(&self, message: &SocketMessage) {
        let frame = match codec::decode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable control frame: {e}");
                return;
            },
        };

        trace!("Received op{}.", frame.op);

        if let Err(e) = self.inner.received_event.invoke(&frame).await {
            warn!("Received event handlers failed: {e}");
        }
    }

    async fn handle_packet(&self, packet: Vec<u8>) {
        if let Err(e) = self.inner.received_packet.invoke(&packet).await {
            warn!("Received packet handlers failed: {e}");
        }
    }

    async fn handle_closed(&self, token: &CancellationToken, closed: Option<TransportClosed>) {
        {
            let _guard = self.inner.connection_lock.lock().await;

            // This connection was replaced or closed while waiting for the lock.
            if token.is_cancelled() {
                return;
            }

            match &closed {
                Some(c) => info!("Voice websocket closed: {c}."),
                None => info!("Voice websocket closed."),
            }

            if let Err(e) = self.disconnect_inner().await {
                warn!("Failed to tear down closed connection: {e}");
            }
        }

        if let Err(e) = self.inner.disconnected.invoke(&closed).await {
            warn!("Disconnect handlers failed: {e}");
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.get_mut().take() {
            token.cancel();
        }
    }
}

fn upgrade(inner: &Weak<ClientInner>) -> Option<VoiceConnectionClient> {
    inner.upgrade().map(|inner| VoiceConnectionClient { inner })
}

async fn ws_runner(
    inner: Weak<ClientInner>,
    rx: Receiver<SocketEvent>,
    token: CancellationToken,
) {
    trace!("Voice WS dispatch started.");

    loop {
        let event = select! {
            () = token.cancelled() => break,
            event = rx.recv_async() => match event {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        let Some(client) = upgrade(&inner) else {
            break;
        };

        match event {
            SocketEvent::Message(message) => client.handle_message(&message).await,
            SocketEvent::Closed(closed) => {
                client.handle_closed(&token, closed).await;
                break;
            },
        }
    }

    trace!("Voice WS dispatch stopped.");
}

async fn udp_runner(inner: Weak<ClientInner>, rx: Receiver<Vec<u8>>, token: CancellationToken) {
    trace!("Voice UDP dispatch started.");

    loop {
        let packet = select! {
            () = token.cancelled() => break,
            packet = rx.recv_async() => match packet {
                Ok(packet) => packet,
                Err(_) => break,
            },
        };

        let Some(client) = upgrade(&inner) else {
            break;
        };

        client.handle_packet(packet).await;
    }

    trace!("Voice UDP dispatch stopped.");
}

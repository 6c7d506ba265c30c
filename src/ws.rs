use crate::{
    manager::close::TransportClosed,
    voice::transport::{Error, MessageSocket, Result, SocketEvent, SocketMessage},
};
use async_trait::async_trait;
use flume::Sender;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use std::fmt;
use tokio::{net::TcpStream, select, spawn, task::JoinHandle};
use tokio_tungstenite::{
    tungstenite::{
        error::Error as TungsteniteError,
        protocol::{CloseFrame, WebSocketConfig as Config},
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket [`MessageSocket`] built on `tokio-tungstenite`.
#[derive(Default)]
pub struct WsTransport {
    sink: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WsTransport {
    /// Creates an unconnected websocket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("connected", &self.sink.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

#[async_trait]
impl MessageSocket for WsTransport {
    fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    #[instrument(skip(self, inbound))]
    async fn connect(&mut self, url: Url, inbound: Sender<SocketEvent>) -> Result<()> {
        self.disconnect().await?;

        let connect = tokio_tungstenite::connect_async_with_config(
            url.as_str(),
            Some(Config {
                max_message_size: None,
                max_frame_size: None,
                ..Default::default()
            }),
            true,
        );

        let (stream, _) = select! {
            res = connect => res?,
            () = self.cancel.cancelled() => return Err(Error::NotConnected),
        };

        let (sink, stream) = stream.split();

        self.sink = Some(sink);
        self.reader = Some(spawn(runner(stream, inbound, self.cancel.clone())));

        Ok(())
    }

    async fn send(&mut self, message: SocketMessage) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::NotConnected)?;

        let message = match message {
            SocketMessage::Text(text) => Message::Text(text),
            SocketMessage::Binary(bytes) => Message::Binary(bytes),
        };

        sink.send(message).await?;

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if let Some(mut sink) = self.sink.take() {
            // The remote may already have dropped the connection.
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!("Failed to send websocket close: {e}");
            }
            if let Err(e) = sink.close().await {
                debug!("Failed to close websocket: {e}");
            }
        }

        Ok(())
    }
}

async fn runner(
    mut stream: SplitStream<WsStream>,
    inbound: Sender<SocketEvent>,
    token: CancellationToken,
) {
    trace!("WS reader started.");

    loop {
        let message = select! {
            () = token.cancelled() => break,
            message = stream.next() => message,
        };

        let Some(event) = convert_ws_message(message) else {
            continue;
        };

        let is_closed = matches!(event, SocketEvent::Closed(_));
        if inbound.send_async(event).await.is_err() || is_closed {
            break;
        }
    }

    trace!("WS reader stopped.");
}

#[inline]
pub(crate) fn convert_ws_message(
    message: Option<std::result::Result<Message, TungsteniteError>>,
) -> Option<SocketEvent> {
    Some(match message {
        Some(Ok(Message::Text(text))) => SocketEvent::Message(SocketMessage::Text(text)),
        Some(Ok(Message::Binary(bytes))) => SocketEvent::Message(SocketMessage::Binary(bytes)),
        Some(Ok(Message::Close(frame))) => SocketEvent::Closed(frame.map(convert_close_frame)),
        Some(Err(e)) => SocketEvent::Closed(Some(TransportClosed::without_code(e.to_string()))),
        None => SocketEvent::Closed(None),
        // Ping/Pong message behaviour is internally handled by tungstenite.
        Some(Ok(_)) => return None,
    })
}

fn convert_close_frame(frame: CloseFrame<'_>) -> TransportClosed {
    TransportClosed::with_code(u16::from(frame.code), frame.reason.into_owned())
}

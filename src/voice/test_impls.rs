#![allow(missing_docs)]

use super::transport::{DatagramSocket, Error, MessageSocket, Result, SocketEvent, SocketMessage};
use async_trait::async_trait;
use flume::Sender;
use parking_lot::Mutex;
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use url::Url;

// Port reported by every started mock datagram socket.
pub const MOCK_UDP_PORT: u16 = 50_000;

#[derive(Default)]
struct SocketState {
    inbound: Option<Sender<SocketEvent>>,
    urls: Vec<Url>,
    sent: Vec<SocketMessage>,
    disconnects: usize,
    fail_connect: bool,
}

/// Message socket which records all sends, and lets tests inject traffic.
#[derive(Clone, Default)]
pub struct MockSocket {
    state: Arc<Mutex<SocketState>>,
}

impl MockSocket {
    pub fn fail_connect(&self) {
        self.state.lock().fail_connect = true;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().inbound.is_some()
    }

    pub fn inbound(&self) -> Option<Sender<SocketEvent>> {
        self.state.lock().inbound.clone()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.state.lock().urls.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn sent(&self) -> Vec<SocketMessage> {
        self.state.lock().sent.clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SocketMessage::Text(t) => serde_json::from_str(&t).ok(),
                SocketMessage::Binary(_) => None,
            })
            .collect()
    }

    /// Returns the opcodes of all sent control frames.
    pub fn sent_ops(&self) -> Vec<u64> {
        self.sent_json()
            .iter()
            .filter_map(|v| v["op"].as_u64())
            .collect()
    }

    pub fn push(&self, event: SocketEvent) {
        if let Some(tx) = self.inbound() {
            let _ = tx.send(event);
        }
    }

    pub fn push_json(&self, frame: &Value) {
        self.push(SocketEvent::Message(SocketMessage::Text(frame.to_string())));
    }
}

#[async_trait]
impl MessageSocket for MockSocket {
    fn set_cancel_token(&mut self, _token: CancellationToken) {}

    async fn connect(&mut self, url: Url, inbound: Sender<SocketEvent>) -> Result<()> {
        let mut state = self.state.lock();
        state.urls.push(url);

        if state.fail_connect {
            return Err(Error::NotConnected);
        }

        state.inbound = Some(inbound);
        Ok(())
    }

    async fn send(&mut self, message: SocketMessage) -> Result<()> {
        let mut state = self.state.lock();

        if state.inbound.is_none() {
            return Err(Error::NotConnected);
        }

        state.sent.push(message);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state.lock();

        if state.inbound.take().is_some() {
            state.disconnects += 1;
        }

        Ok(())
    }
}

#[derive(Default)]
struct DatagramState {
    inbound: Option<Sender<Vec<u8>>>,
    destination: Option<SocketAddr>,
    sent: Vec<Vec<u8>>,
    stops: usize,
    fail_start: bool,
}

/// Datagram socket which records all sends, and lets tests inject traffic.
#[derive(Clone, Default)]
pub struct MockDatagram {
    state: Arc<Mutex<DatagramState>>,
}

impl MockDatagram {
    pub fn fail_start(&self) {
        self.state.lock().fail_start = true;
    }

    pub fn port_if_started(&self) -> Option<u16> {
        self.state.lock().inbound.as_ref().map(|_| MOCK_UDP_PORT)
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.state.lock().destination
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn push(&self, datagram: Vec<u8>) {
        let tx = self.state.lock().inbound.clone();

        if let Some(tx) = tx {
            let _ = tx.send(datagram);
        }
    }
}

#[async_trait]
impl DatagramSocket for MockDatagram {
    fn set_cancel_token(&mut self, _token: CancellationToken) {}

    fn set_destination(&mut self, addr: SocketAddr) {
        self.state.lock().destination = Some(addr);
    }

    fn port(&self) -> Option<u16> {
        self.port_if_started()
    }

    async fn start(&mut self, inbound: Sender<Vec<u8>>) -> Result<()> {
        let mut state = self.state.lock();

        if state.fail_start {
            return Err(Error::Io(std::io::ErrorKind::AddrInUse.into()));
        }

        state.inbound = Some(inbound);
        Ok(())
    }

    async fn send(&mut self, datagram: &[u8]) -> Result<()> {
        let mut state = self.state.lock();

        if state.inbound.is_none() {
            return Err(Error::NotConnected);
        }
        if state.destination.is_none() {
            return Err(Error::NoDestination);
        }

        state.sent.push(datagram.to_vec());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock();

        if state.inbound.take().is_some() {
            state.stops += 1;
        }

        Ok(())
    }
}

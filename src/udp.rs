use crate::{
    constants::VOICE_PACKET_MAX,
    voice::transport::{DatagramSocket, Error, Result},
};
use async_trait::async_trait;
use flume::Sender;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::UdpSocket, select, spawn, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, trace};

/// UDP [`DatagramSocket`] built on tokio's UDP socket.
#[derive(Debug, Default)]
pub struct UdpTransport {
    socket: Option<Arc<UdpSocket>>,
    destination: Option<SocketAddr>,
    port: Option<u16>,
    receiver: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl UdpTransport {
    /// Creates an unbound socket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatagramSocket for UdpTransport {
    fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    fn set_destination(&mut self, addr: SocketAddr) {
        self.destination = Some(addr);
    }

    fn port(&self) -> Option<u16> {
        self.port
    }

    #[instrument(skip(self, inbound))]
    async fn start(&mut self, inbound: Sender<Vec<u8>>) -> Result<()> {
        self.stop().await?;

        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);

        self.port = Some(socket.local_addr()?.port());
        self.receiver = Some(spawn(runner(
            socket.clone(),
            inbound,
            self.cancel.clone(),
        )));
        self.socket = Some(socket);

        Ok(())
    }

    async fn send(&mut self, datagram: &[u8]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        let destination = self.destination.ok_or(Error::NoDestination)?;

        select! {
            res = socket.send_to(datagram, destination) => {
                res?;
                Ok(())
            },
            () = self.cancel.cancelled() => Err(Error::NotConnected),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }

        self.socket = None;
        self.port = None;

        Ok(())
    }
}

async fn runner(socket: Arc<UdpSocket>, inbound: Sender<Vec<u8>>, token: CancellationToken) {
    trace!("UDP receiver started.");

    let mut buf = [0u8; VOICE_PACKET_MAX];

    loop {
        let received = select! {
            () = token.cancelled() => break,
            res = socket.recv_from(&mut buf) => res,
        };

        match received {
            Ok((len, _addr)) =>
                if inbound.send_async(buf[..len].to_vec()).await.is_err() {
                    break;
                },
            Err(e) => {
                error!("Fatal UDP packet receive error: {:?}.", e);
                break;
            },
        }
    }

    trace!("UDP receiver stopped.");
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn datagrams_need_a_bound_socket_and_destination() {
        let mut udp = UdpTransport::new();

        assert!(matches!(udp.send(&[1]).await, Err(Error::NotConnected)));

        let (tx, _rx) = flume::unbounded();
        udp.start(tx).await.unwrap();
        assert!(udp.port().is_some());
        assert!(matches!(udp.send(&[1]).await, Err(Error::NoDestination)));

        udp.stop().await.unwrap();
        assert!(udp.port().is_none());
    }

    #[tokio::test]
    async fn received_datagrams_are_forwarded() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut udp = UdpTransport::new();
        let (tx, rx) = flume::unbounded();

        udp.start(tx).await.unwrap();
        udp.set_destination(peer.local_addr().unwrap());
        udp.send(&[1, 2, 3]).await.unwrap();

        let mut buf = [0u8; 8];
        let (len, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);

        let local = SocketAddr::from(([127, 0, 0, 1], from.port()));
        peer.send_to(&[9, 8], local).await.unwrap();
        assert_eq!(rx.recv_async().await.unwrap(), vec![9, 8]);

        udp.stop().await.unwrap();
    }
}

//! UDP publish/subscribe and command sockets, TCP request/reply framing.
//!
//! Receive paths never wait: they drain whatever datagrams are ready with
//! `try_recv_from` and return, so a polling task can re-arm on its next tick.

use crate::error::NetError;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, trace, warn};

/// Largest datagram accepted.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest request accepted on the request/reply channel.
pub const MAX_REQUEST: usize = 1024;

/// Largest reply accepted by [`request`].
pub const MAX_REPLY: usize = 256 * 1024 * 1024;

fn drain_socket(
    socket: &UdpSocket,
    buf: &mut [u8],
    mut on_datagram: impl FnMut(&[u8], SocketAddr),
) -> Result<usize, NetError> {
    let mut received = 0;
    loop {
        match socket.try_recv_from(buf) {
            Ok((len, from)) => {
                trace!(len, %from, "datagram");
                on_datagram(&buf[..len], from);
                received += 1;
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(received),
            Err(err) => return Err(NetError::Io(err)),
        }
    }
}

/// Receives frames published by peers.
pub struct SubscribeSocket {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl SubscribeSocket {
    /// Bind the subscribe port.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind subscribe socket on {addr}"))?;
        info!("Subscribe socket bound to {}", socket.local_addr()?);
        Ok(Self {
            socket,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Hand every ready frame to `on_frame`; returns how many there were.
    pub fn drain(&mut self, mut on_frame: impl FnMut(&[u8])) -> Result<usize, NetError> {
        drain_socket(&self.socket, &mut self.buf, |frame, _| on_frame(frame))
    }

    /// Like [`SubscribeSocket::drain`], also passing the sender's address.
    pub fn drain_from(
        &mut self,
        on_frame: impl FnMut(&[u8], SocketAddr),
    ) -> Result<usize, NetError> {
        drain_socket(&self.socket, &mut self.buf, on_frame)
    }

    /// Send a frame from the subscribe port, so the receiver learns where to publish.
    pub async fn send_to(&self, frame: &[u8], to: SocketAddr) -> Result<(), NetError> {
        self.socket.send_to(frame, to).await?;
        Ok(())
    }
}

/// Subscribe addresses learned at runtime, shared by the relay and publish paths.
#[derive(Debug, Default)]
pub struct Subscribers {
    addrs: RwLock<Vec<SocketAddr>>,
}

impl Subscribers {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `addr`. Returns `true` if it was not known yet.
    pub fn join(&self, addr: SocketAddr) -> bool {
        let mut addrs = self.addrs.write().unwrap_or_else(PoisonError::into_inner);
        if addrs.contains(&addr) {
            return false;
        }
        info!(%addr, "subscriber joined");
        addrs.push(addr);
        true
    }

    /// Current addresses in join order.
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.addrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of known subscribers.
    pub fn len(&self) -> usize {
        self.addrs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nobody has joined.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sends frames to the configured targets and every learned subscriber.
pub struct PublishSocket {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    subscribers: Arc<Subscribers>,
}

impl PublishSocket {
    /// Bind a sending socket for `targets`.
    pub async fn bind(addr: SocketAddr, targets: Vec<SocketAddr>) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind publish socket on {addr}"))?;
        info!(
            "Publish socket bound to {} with {} targets",
            socket.local_addr()?,
            targets.len()
        );
        Ok(Self {
            socket,
            targets,
            subscribers: Arc::new(Subscribers::new()),
        })
    }

    /// Also publish to whoever joins `subscribers`.
    pub fn with_subscribers(mut self, subscribers: Arc<Subscribers>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Fixed destinations reached by [`PublishSocket::publish`].
    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    /// Learned destinations reached by [`PublishSocket::publish`].
    pub fn subscribers(&self) -> &Arc<Subscribers> {
        &self.subscribers
    }

    /// Send `frame` to every target and subscriber. Returns the number of successful sends.
    pub async fn publish(&self, frame: &[u8]) -> usize {
        let mut destinations = self.targets.clone();
        for addr in self.subscribers.snapshot() {
            if !destinations.contains(&addr) {
                destinations.push(addr);
            }
        }
        let mut sent = 0;
        for target in &destinations {
            match self.socket.send_to(frame, target).await {
                Ok(_) => sent += 1,
                Err(err) => warn!(%target, %err, "publish failed"),
            }
        }
        sent
    }
}

/// Ping channel: sends probes to the command endpoint and drains echoes.
///
/// Sending and draining both take `&self` so one socket can be shared by the
/// publish and ping tasks.
pub struct CommandSocket {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl CommandSocket {
    /// Bind locally and direct probes at `peer`.
    pub async fn bind(addr: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind command socket on {addr}"))?;
        debug!("Command socket bound to {}", socket.local_addr()?);
        Ok(Self { socket, peer })
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send a frame to the command endpoint.
    pub async fn send(&self, frame: &[u8]) -> Result<(), NetError> {
        self.socket.send_to(frame, self.peer).await?;
        Ok(())
    }

    /// Send a frame to an explicit address.
    pub async fn send_to(&self, frame: &[u8], to: SocketAddr) -> Result<(), NetError> {
        self.socket.send_to(frame, to).await?;
        Ok(())
    }

    /// Hand every ready datagram and its sender to `on_frame`, using `buf` as scratch.
    pub fn drain(
        &self,
        buf: &mut [u8],
        on_frame: impl FnMut(&[u8], SocketAddr),
    ) -> Result<usize, NetError> {
        drain_socket(&self.socket, buf, on_frame)
    }
}

/// Write one length-prefixed message (`u32` LE length, then bytes).
pub async fn write_message<W>(writer: &mut W, bytes: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(bytes.len()).map_err(|_| {
        NetError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "message exceeds u32 length",
        ))
    })?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed message. `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_le_bytes(len) as usize;
    if len > limit {
        return Err(NetError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("message of {len} bytes exceeds limit of {limit}"),
        )));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(Some(bytes))
}

/// Pull one blob from a distribution server.
pub async fn request(addr: SocketAddr, command: &str) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to distribution server at {addr}"))?;
    write_message(&mut stream, command.as_bytes())
        .await
        .context("Failed to send request")?;
    let reply = read_message(&mut stream, MAX_REPLY)
        .await
        .context("Failed to read reply")?
        .context("Server closed the connection without replying")?;
    debug!(command, len = reply.len(), "received reply");
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn length_prefix_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_message(&mut a, b"objects").await.unwrap();
        write_message(&mut a, b"").await.unwrap();
        drop(a);
        assert_eq!(
            read_message(&mut b, MAX_REQUEST).await.unwrap(),
            Some(b"objects".to_vec())
        );
        assert_eq!(read_message(&mut b, MAX_REQUEST).await.unwrap(), Some(vec![]));
        assert_eq!(read_message(&mut b, MAX_REQUEST).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&5000u32.to_le_bytes()).await.unwrap();
        assert!(read_message(&mut b, MAX_REQUEST).await.is_err());
    }

    #[tokio::test]
    async fn empty_subscribe_socket_returns_immediately() {
        let mut sub = SubscribeSocket::bind(local()).await.unwrap();
        assert_eq!(sub.drain(|_| {}).unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let mut sub = SubscribeSocket::bind(local()).await.unwrap();
        let publisher = PublishSocket::bind(local(), vec![sub.local_addr().unwrap()])
            .await
            .unwrap();
        assert_eq!(publisher.publish(&[1, 2, 0]).await, 1);

        let mut frames = Vec::new();
        for _ in 0..100 {
            sub.drain(|frame| frames.push(frame.to_vec())).unwrap();
            if !frames.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(frames, vec![vec![1, 2, 0]]);
    }

    #[tokio::test]
    async fn joined_subscribers_receive_publishes() {
        let mut sub = SubscribeSocket::bind(local()).await.unwrap();
        let subscribers = Arc::new(Subscribers::new());
        let publisher = PublishSocket::bind(local(), Vec::new())
            .await
            .unwrap()
            .with_subscribers(Arc::clone(&subscribers));
        assert_eq!(publisher.publish(&[1, 2, 0]).await, 0);

        let addr = sub.local_addr().unwrap();
        assert!(subscribers.join(addr));
        assert!(!subscribers.join(addr));
        assert_eq!(subscribers.len(), 1);
        assert_eq!(publisher.publish(&[1, 3, 0]).await, 1);

        let mut frames = Vec::new();
        for _ in 0..100 {
            sub.drain_from(|frame, _| frames.push(frame.to_vec())).unwrap();
            if !frames.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(frames, vec![vec![1, 3, 0]]);
    }
}

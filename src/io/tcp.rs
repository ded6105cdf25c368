// src/io/tcp.rs
//
// TCP side of the bridge channels (command channel and serial bridges).
//
// Each channel has one listener task, one reader task per accepted
// connection and one writer task. Readers copy bytes into the channel's
// ring. The writer owns the write half of the newest connection; a new
// accept replaces it (last writer wins), even while a write to a client that
// stopped reading is pending. Outbound data is bounded per channel. The replaced write half is dropped,
// which half-closes it, while its reader keeps feeding the ring until the
// peer closes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use super::ring::RingBuffer;
use super::IoError;

/// How often blocked accepts and reads re-check the stop flag
const STOP_POLL: Duration = Duration::from_millis(100);

const READ_BUF_SIZE: usize = 512;

// ============================================================================
// Channel link
// ============================================================================

/// Outbound chunks queued per channel before `send` starts dropping
const SEND_QUEUE_DEPTH: usize = 32;

/// Events seen by a channel's writer task
#[derive(Debug)]
pub enum LinkEvent {
    /// New connection; becomes the write target
    Attach(u64, OwnedWriteHalf),
    /// Connection closed by its peer
    Detach(u64),
    Data(Vec<u8>),
}

/// Bytes bound to the connection that was current when they were sent
#[derive(Debug)]
struct Outbound {
    connection: u64,
    bytes: Vec<u8>,
}

/// Receiving side of a link.
///
/// Connection changes travel on their own channel so they are never queued
/// behind data for a client that stopped reading.
#[derive(Debug)]
pub struct LinkEvents {
    control: mpsc::UnboundedReceiver<LinkEvent>,
    data: mpsc::Receiver<Outbound>,
}

impl LinkEvents {
    /// Next pending event, connection changes first.
    pub fn try_recv(&mut self) -> Result<LinkEvent, TryRecvError> {
        if let Ok(event) = self.control.try_recv() {
            return Ok(event);
        }
        self.data.try_recv().map(|out| LinkEvent::Data(out.bytes))
    }
}

/// Handle used by the poll loop to send on a channel's current connection.
///
/// Sending never blocks. Bytes are dropped when no client is connected or
/// when the writer is `SEND_QUEUE_DEPTH` chunks behind.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    name: Arc<str>,
    control_tx: mpsc::UnboundedSender<LinkEvent>,
    data_tx: mpsc::Sender<Outbound>,
    connected: Arc<AtomicBool>,
    /// Id of the newest accepted connection
    current: Arc<AtomicU64>,
}

impl ChannelLink {
    /// Link without a writer task. The caller consumes the events.
    pub fn detached(name: &str) -> (Self, LinkEvents) {
        let (control_tx, control) = mpsc::unbounded_channel();
        let (data_tx, data) = mpsc::channel(SEND_QUEUE_DEPTH);
        let link = Self {
            name: Arc::from(name),
            control_tx,
            data_tx,
            connected: Arc::new(AtomicBool::new(false)),
            current: Arc::new(AtomicU64::new(0)),
        };
        (link, LinkEvents { control, data })
    }

    /// Link with its writer task running on the current runtime.
    pub fn spawn(name: &str) -> Self {
        let (link, events) = Self::detached(name);
        tokio::spawn(run_writer(link.name.clone(), events, link.connected.clone()));
        link
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queue bytes for the current connection. Returns `false` if dropped.
    pub fn send(&self, data: &[u8]) -> bool {
        if data.is_empty() || !self.is_connected() {
            return false;
        }
        let out = Outbound {
            connection: self.current.load(Ordering::SeqCst),
            bytes: data.to_vec(),
        };
        match self.data_tx.try_send(out) {
            Ok(()) => true,
            Err(TrySendError::Full(out)) => {
                tlog!(
                    "[tcp:{}] Client not reading, dropped {} bytes",
                    self.name,
                    out.bytes.len()
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn attach(&self, id: u64, half: OwnedWriteHalf) {
        // Marked here so data queued right after the accept is not dropped
        self.current.store(id, Ordering::SeqCst);
        self.set_connected(true);
        let _ = self.control_tx.send(LinkEvent::Attach(id, half));
    }

    fn detach(&self, id: u64) {
        let _ = self.control_tx.send(LinkEvent::Detach(id));
    }
}

/// Apply an `Attach` or `Detach` to the writer's current connection.
fn apply_control(
    name: &str,
    event: LinkEvent,
    current: &mut Option<(u64, OwnedWriteHalf)>,
    connected: &AtomicBool,
) {
    match event {
        LinkEvent::Attach(id, half) => {
            if let Some((old, _)) = current.replace((id, half)) {
                tlog!("[tcp:{}] Connection {} replaced by {}", name, old, id);
            }
            connected.store(true, Ordering::SeqCst);
        }
        LinkEvent::Detach(id) => {
            if current.as_ref().is_some_and(|(cur, _)| *cur == id) {
                *current = None;
                connected.store(false, Ordering::SeqCst);
            }
        }
        LinkEvent::Data(_) => {}
    }
}

fn current_id(current: &Option<(u64, OwnedWriteHalf)>) -> Option<u64> {
    current.as_ref().map(|(id, _)| *id)
}

/// Write one chunk to the current connection.
///
/// Connection changes are still applied while the write is pending; if the
/// target is replaced or closed the rest of the chunk is abandoned.
async fn write_outbound(
    name: &str,
    events: &mut LinkEvents,
    current: &mut Option<(u64, OwnedWriteHalf)>,
    connected: &AtomicBool,
    out: Outbound,
) {
    if current_id(current) != Some(out.connection) {
        dlog!(
            "[tcp:{}] Dropped {} bytes for connection {}",
            name,
            out.bytes.len(),
            out.connection
        );
        return;
    }

    let mut written = 0;
    while written < out.bytes.len() {
        let Some((_, half)) = current.as_mut() else {
            return;
        };
        tokio::select! {
            biased;
            Some(event) = events.control.recv() => {
                apply_control(name, event, current, connected);
                if current_id(current) != Some(out.connection) {
                    dlog!(
                        "[tcp:{}] Abandoned {} bytes for connection {}",
                        name,
                        out.bytes.len() - written,
                        out.connection
                    );
                    return;
                }
            }
            result = half.write(&out.bytes[written..]) => match result {
                Ok(n) if n > 0 => written += n,
                result => {
                    let reason = match result {
                        Err(e) => e.to_string(),
                        Ok(_) => "connection closed".to_string(),
                    };
                    tlog!("[tcp:{}] Write to connection {} failed: {}", name, out.connection, reason);
                    *current = None;
                    connected.store(false, Ordering::SeqCst);
                    return;
                }
            },
        }
    }
}

async fn run_writer(name: Arc<str>, mut events: LinkEvents, connected: Arc<AtomicBool>) {
    let mut current: Option<(u64, OwnedWriteHalf)> = None;

    loop {
        tokio::select! {
            biased;
            Some(event) = events.control.recv() => {
                apply_control(&name, event, &mut current, &connected);
            }
            Some(out) = events.data.recv() => {
                write_outbound(&name, &mut events, &mut current, &connected, out).await;
            }
            else => break,
        }
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Bind a channel's listening socket.
pub async fn bind(addr: SocketAddr, name: &str) -> Result<TcpListener, IoError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| IoError::connection(format!("{}({})", name, addr), e.to_string()))
}

/// Bind, start the writer and accept loop, and return the channel's link and
/// bound address.
pub async fn open_channel(
    addr: SocketAddr,
    name: &str,
    ring: Arc<RingBuffer>,
    stop: Arc<AtomicBool>,
) -> Result<(ChannelLink, SocketAddr), IoError> {
    let listener = bind(addr, name).await?;
    let local = listener
        .local_addr()
        .map_err(|e| IoError::connection(name, e.to_string()))?;
    let link = ChannelLink::spawn(name);
    tokio::spawn(serve(listener, link.clone(), ring, stop));
    tlog!("[tcp:{}] Listening on {}", name, local);
    Ok((link, local))
}

/// Accept connections until `stop` is set.
pub async fn serve(
    listener: TcpListener,
    link: ChannelLink,
    ring: Arc<RingBuffer>,
    stop: Arc<AtomicBool>,
) {
    let mut next_id: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        match tokio::time::timeout(STOP_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                next_id += 1;
                tlog!("[tcp:{}] Connection {} from {}", link.name(), next_id, peer);
                let _ = stream.set_nodelay(true);
                let (read_half, write_half) = stream.into_split();
                link.attach(next_id, write_half);
                tokio::spawn(read_connection(
                    next_id,
                    read_half,
                    link.clone(),
                    ring.clone(),
                    stop.clone(),
                ));
            }
            Ok(Err(e)) => {
                tlog!("[tcp:{}] Accept failed: {}", link.name(), e);
            }
            Err(_) => {}
        }
    }
}

async fn read_connection(
    id: u64,
    mut reader: OwnedReadHalf,
    link: ChannelLink,
    ring: Arc<RingBuffer>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; READ_BUF_SIZE];

    while !stop.load(Ordering::SeqCst) {
        match tokio::time::timeout(STOP_POLL, reader.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let accepted = ring.write_slice(&buf[..n]);
                if accepted < n {
                    dlog!(
                        "[tcp:{}] Ring full, dropped {} bytes from connection {}",
                        link.name(),
                        n - accepted,
                        id
                    );
                }
            }
            Ok(Err(e)) => {
                tlog!("[tcp:{}] Read from connection {} failed: {}", link.name(), id, e);
                break;
            }
            Err(_) => {}
        }
    }

    tlog!("[tcp:{}] Connection {} closed", link.name(), id);
    link.detach(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[test]
    fn test_detached_link_drops_when_disconnected() {
        let (link, mut rx) = ChannelLink::detached("test");
        assert!(!link.send(&[1, 2, 3]));
        link.set_connected(true);
        assert!(link.send(&[1, 2, 3]));
        assert!(!link.send(&[]));
        match rx.try_recv() {
            Ok(LinkEvent::Data(bytes)) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accepted_bytes_land_in_ring() {
        let ring = Arc::new(RingBuffer::new(64));
        let stop = Arc::new(AtomicBool::new(false));
        let (link, addr) = open_channel(localhost(), "cmd", ring.clone(), stop.clone())
            .await
            .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();

        wait_for(|| ring.len() == 5).await;
        assert_eq!(ring.drain(), b"hello".to_vec());
        assert!(link.is_connected());
        stop.store(true, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_reply_reaches_newest_client() {
        let ring = Arc::new(RingBuffer::new(64));
        let stop = Arc::new(AtomicBool::new(false));
        let (link, addr) = open_channel(localhost(), "cmd", ring.clone(), stop.clone())
            .await
            .unwrap();

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"a").await.unwrap();
        wait_for(|| ring.len() == 1).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"b").await.unwrap();
        wait_for(|| ring.len() == 2).await;
        assert_eq!(ring.drain(), b"ab".to_vec());

        // The old reader still feeds the ring
        first.write_all(b"c").await.unwrap();
        wait_for(|| ring.len() == 1).await;
        assert_eq!(ring.drain(), b"c".to_vec());

        assert!(link.send(b"reply"));
        let mut buf = [0u8; 5];
        tokio::time::timeout(Duration::from_secs(2), second.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"reply");

        // The replaced connection was half-closed and gets nothing
        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), first.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        stop.store(true, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_stalled_client_replaced() {
        let ring = Arc::new(RingBuffer::new(64));
        let stop = Arc::new(AtomicBool::new(false));
        let (link, addr) = open_channel(localhost(), "cmd", ring.clone(), stop.clone())
            .await
            .unwrap();

        // Connects and never reads
        let mut stalled = TcpStream::connect(addr).await.unwrap();
        stalled.write_all(b"a").await.unwrap();
        wait_for(|| ring.len() == 1).await;

        let chunk = vec![0x55u8; 64 * 1024];
        let mut saturated = false;
        for _ in 0..4096 {
            if !link.send(&chunk) {
                saturated = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(saturated, "send queue never filled");

        let mut newest = TcpStream::connect(addr).await.unwrap();
        newest.write_all(b"b").await.unwrap();
        wait_for(|| ring.len() == 2).await;

        let mut buf = [0u8; 5];
        let mut got = false;
        for _ in 0..60 {
            link.send(b"reply");
            let read = tokio::time::timeout(Duration::from_millis(50), newest.read_exact(&mut buf)).await;
            if let Ok(result) = read {
                result.unwrap();
                got = true;
                break;
            }
        }
        assert!(got, "newest client got no reply");
        assert_eq!(&buf, b"reply");

        drop(stalled);
        stop.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_send_drops_when_queue_full() {
        let (link, mut events) = ChannelLink::detached("test");
        link.set_connected(true);
        for _ in 0..SEND_QUEUE_DEPTH {
            assert!(link.send(&[1]));
        }
        assert!(!link.send(&[2]));

        assert!(matches!(events.try_recv(), Ok(LinkEvent::Data(_))));
        assert!(link.send(&[3]));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_connection_error() {
        let listener = TcpListener::bind(localhost()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let err = bind(addr, "cmd").await.unwrap_err();
        assert!(matches!(err, IoError::Connection { .. }));
    }
}

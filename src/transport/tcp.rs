//! Stream transport: TCP client with background receive, plus the paired
//! acceptor that wraps every inbound connection in a fresh client link.

use super::link::{drain_loop, receive_loop, LinkShared};
use super::{LinkReader, ReadCallback};
use crate::error::{Error, Result};
use socket2::SockRef;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Scratch read size for stream sockets.
const TCP_FRAME: usize = 4096;
/// Inbound ring capacity (large enough for a burst of device replies).
const TCP_INBOUND: usize = 75 * 1024;
/// Outbound ring capacity.
const TCP_OUTBOUND: usize = 16 * 1024;

pub struct TcpLink {
    shared: Arc<LinkShared>,
    peer: SocketAddr,
    receiver: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    open: Arc<AtomicBool>,
}

impl TcpLink {
    /// Connect to a remote host and start the receive/drain threads.
    /// Keep-alive is enabled so a silently dead device eventually surfaces
    /// as a read error.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        Self::from_stream(stream)
    }

    /// Wrap an already-accepted stream (server side).
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        SockRef::from(&stream).set_keepalive(true)?;
        stream.set_read_timeout(Some(Duration::from_millis(100)))?;
        let writer_stream = stream.try_clone()?;

        let shared = Arc::new(LinkShared::new(TCP_INBOUND, TCP_OUTBOUND));
        let open = Arc::new(AtomicBool::new(true));

        let receiver = {
            let shared = Arc::clone(&shared);
            let open = Arc::clone(&open);
            std::thread::Builder::new()
                .name("tcp-rx".to_string())
                .spawn(move || {
                    receive_loop(
                        ClosingStream {
                            stream,
                            open: Arc::clone(&open),
                        },
                        shared,
                        |e| {
                            matches!(
                                e.kind(),
                                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                            )
                        },
                        TCP_FRAME,
                    );
                    open.store(false, Ordering::Relaxed);
                })
                .map_err(|e| Error::Other(format!("spawn tcp-rx: {}", e)))?
        };

        let writer = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("tcp-tx".to_string())
                .spawn(move || drain_loop(writer_stream, shared))
                .map_err(|e| Error::Other(format!("spawn tcp-tx: {}", e)))?
        };

        Ok(Self {
            shared,
            peer,
            receiver: Some(receiver),
            writer: Some(writer),
            open,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The socket is still delivering data (receive loop alive).
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    pub fn set_min_read(&self, len: usize) {
        self.shared.min_read.store(len, Ordering::Relaxed);
    }

    pub fn on_read(&self, callback: ReadCallback) {
        *self.shared.callback.lock() = Some(callback);
    }

    pub fn reader(&self) -> LinkReader {
        self.shared.reader()
    }

    pub fn write(&self, bytes: &[u8]) -> usize {
        self.shared.write(bytes)
    }

    pub fn bytes_drained(&self) -> u64 {
        self.shared.drained.load(Ordering::Relaxed)
    }

    pub fn close(&mut self) {
        self.shared.request_shutdown();
        self.open.store(false, Ordering::Relaxed);
        if let Some(h) = self.receiver.take() {
            let _ = h.join();
        }
        if let Some(h) = self.writer.take() {
            let _ = h.join();
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read adapter that converts "remote closed" (0-byte read) into an error so
/// the receive loop fires the callback once and exits.
struct ClosingStream {
    stream: TcpStream,
    open: Arc<AtomicBool>,
}

impl std::io::Read for ClosingStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.stream.read(buf) {
            Ok(0) => {
                self.open.store(false, Ordering::Relaxed);
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "remote closed",
                ))
            }
            other => other,
        }
    }
}

pub type AcceptCallback = Box<dyn FnMut(TcpLink) + Send>;

/// Acceptor that hands each inbound connection to the user callback as a
/// fresh [`TcpLink`], then re-arms.
pub struct TcpServer {
    local: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl TcpServer {
    pub fn bind(addr: &str, mut on_accept: AcceptCallback) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("tcp-accept".to_string())
                .spawn(move || {
                    while !shutdown.load(Ordering::Relaxed) {
                        match listener.accept() {
                            Ok((stream, addr)) => {
                                log::info!("Client connected: {}", addr);
                                match TcpLink::from_stream(stream) {
                                    Ok(link) => on_accept(link),
                                    Err(e) => log::error!("accept wrap failed: {}", e),
                                }
                            }
                            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                                std::thread::sleep(Duration::from_millis(100));
                            }
                            Err(e) => {
                                log::error!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                })
                .map_err(|e| Error::Other(format!("spawn tcp-accept: {}", e)))?
        };

        Ok(Self {
            local,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.acceptor.take() {
            let _ = h.join();
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Server echoes whatever arrives; client frames the reply via lookup.
    #[test]
    fn client_roundtrip_through_server() {
        let links: Arc<Mutex<Vec<TcpLink>>> = Arc::new(Mutex::new(Vec::new()));
        let server = {
            let links = Arc::clone(&links);
            TcpServer::bind(
                "127.0.0.1:0",
                Box::new(move |link| {
                    let reader = link.reader();
                    let echo = link.shared.clone();
                    link.on_read(Box::new(move |_, ec, buffered| {
                        if ec == 0 && buffered > 0 {
                            let mut buf = vec![0u8; buffered];
                            let n = reader.read(&mut buf, 0, true);
                            echo.write(&buf[..n]);
                        }
                    }));
                    links.lock().push(link);
                }),
            )
            .unwrap()
        };

        let addr = server.local_addr();
        let client = TcpLink::connect("127.0.0.1", addr.port()).unwrap();
        assert!(client.is_open());

        assert_eq!(client.write(b"rx\0measure"), 10);

        let reader = client.reader();
        let mut deadline = 200;
        while reader.buffered() < 10 && deadline > 0 {
            std::thread::sleep(Duration::from_millis(5));
            deadline -= 1;
        }
        assert_eq!(reader.lookup(b"rx", 0), Some(0));
        assert_eq!(reader.lookup(b"measure", 0), Some(3));
        let mut buf = [0u8; 10];
        assert_eq!(reader.read(&mut buf, 0, true), 10);
        assert_eq!(&buf, b"rx\0measure");
        assert_eq!(client.bytes_drained(), 10);
    }

    #[test]
    fn balanced_delimiters_frame_a_json_blob() {
        let links: Arc<Mutex<Vec<TcpLink>>> = Arc::new(Mutex::new(Vec::new()));
        let server = {
            let links = Arc::clone(&links);
            TcpServer::bind(
                "127.0.0.1:0",
                Box::new(move |link| {
                    link.write(b"noise{\"cover\":{\"level\":7}}rest");
                    links.lock().push(link);
                }),
            )
            .unwrap()
        };

        let client = TcpLink::connect("127.0.0.1", server.local_addr().port()).unwrap();
        let reader = client.reader();
        let mut deadline = 200;
        while reader.buffered() < 30 && deadline > 0 {
            std::thread::sleep(Duration::from_millis(5));
            deadline -= 1;
        }

        let (open, close, len) = reader.lookup_pair(b'{', b'}', 0).unwrap();
        assert_eq!(open, 5);
        assert_eq!(len, close - open + 1);
        let mut blob = vec![0u8; len];
        assert_eq!(reader.read(&mut blob, open, true), len);
        assert_eq!(blob, b"{\"cover\":{\"level\":7}}");
    }

    #[test]
    fn remote_close_fires_error_callback() {
        let server = TcpServer::bind("127.0.0.1:0", Box::new(|link| drop(link))).unwrap();
        let client = TcpLink::connect("127.0.0.1", server.local_addr().port()).unwrap();

        let errored = Arc::new(AtomicBool::new(false));
        {
            let errored = Arc::clone(&errored);
            client.on_read(Box::new(move |_, ec, _| {
                if ec != 0 {
                    errored.store(true, Ordering::Relaxed);
                }
            }));
        }

        let mut deadline = 200;
        while client.is_open() && deadline > 0 {
            std::thread::sleep(Duration::from_millis(5));
            deadline -= 1;
        }
        assert!(!client.is_open());
        assert!(errored.load(Ordering::Relaxed));
    }
}

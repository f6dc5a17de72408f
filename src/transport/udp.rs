//! Datagram transport.
//!
//! Two modes: *unconnected* (`send_to` / receive from anyone) and *connected*
//! (fixed peer, `send`). A receiver thread re-arms a 1500-byte packet buffer;
//! each datagram either completes an in-flight blocking request or is handed
//! to the registered callback together with its source address. `reply` sends
//! to the most recent sender, which is how the focus endpoint answers the
//! focuser that talked to it last.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Maximum datagram payload handled (one UDP MTU).
pub const UDP_MAX: usize = 1500;

/// Wait budget for a blocking request/reply exchange.
const BLOCK_READ_TIMEOUT: Duration = Duration::from_millis(100);

pub type DatagramCallback = Box<dyn FnMut(&[u8], SocketAddr) + Send>;

struct Pending {
    /// A blocking request is in flight
    armed: bool,
    reply: Option<Vec<u8>>,
}

struct UdpShared {
    callback: Mutex<Option<DatagramCallback>>,
    pending: Mutex<Pending>,
    reply_ready: Condvar,
    last_peer: Mutex<Option<SocketAddr>>,
    shutdown: AtomicBool,
}

pub struct UdpLink {
    socket: UdpSocket,
    shared: Arc<UdpShared>,
    receiver: Option<JoinHandle<()>>,
}

impl UdpLink {
    /// Bind a local endpoint. Port 0 picks an ephemeral port.
    /// `SO_REUSEADDR` is set so a restarted daemon can rebind immediately.
    pub fn open(port: u16) -> Result<Self> {
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        raw.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        let socket: UdpSocket = raw.into();
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;

        let shared = Arc::new(UdpShared {
            callback: Mutex::new(None),
            pending: Mutex::new(Pending {
                armed: false,
                reply: None,
            }),
            reply_ready: Condvar::new(),
            last_peer: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let receiver = {
            let socket = socket.try_clone()?;
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("udp-rx".to_string())
                .spawn(move || receive_loop(socket, shared))
                .map_err(|e| Error::Other(format!("spawn udp-rx: {}", e)))?
        };

        Ok(Self {
            socket,
            shared,
            receiver: Some(receiver),
        })
    }

    /// Fix the remote peer; `send` becomes available.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.socket.connect((host, port))?;
        Ok(())
    }

    pub fn set_broadcast(&self, on: bool) -> Result<()> {
        self.socket.set_broadcast(on)?;
        Ok(())
    }

    /// Join a multicast group on the default interface.
    pub fn join_multicast(&self, group: Ipv4Addr) -> Result<()> {
        self.socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Register the datagram callback; runs on the receiver thread.
    pub fn on_receive(&self, callback: DatagramCallback) {
        *self.shared.callback.lock() = Some(callback);
    }

    /// Fire-and-forget to the connected peer.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        Ok(self.socket.send(payload)?)
    }

    /// Fire-and-forget to an explicit peer.
    pub fn send_to(&self, payload: &[u8], peer: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, peer)?)
    }

    /// Send to the most recent sender seen by the receiver thread.
    pub fn reply(&self, payload: &[u8]) -> Result<usize> {
        let peer = *self.shared.last_peer.lock();
        let peer = peer.ok_or_else(|| Error::Protocol("no peer to reply to".into()))?;
        self.send_to(payload, peer)
    }

    /// Write a datagram and wait up to 100 ms for one reply.
    pub fn block_read(&self, payload: &[u8], peer: Option<SocketAddr>) -> Option<Vec<u8>> {
        {
            let mut pending = self.shared.pending.lock();
            pending.armed = true;
            pending.reply = None;
        }
        let sent = match peer {
            Some(p) => self.send_to(payload, p),
            None => self.send(payload),
        };
        if sent.is_err() {
            self.shared.pending.lock().armed = false;
            return None;
        }

        let mut pending = self.shared.pending.lock();
        if pending.reply.is_none() {
            self.shared
                .reply_ready
                .wait_for(&mut pending, BLOCK_READ_TIMEOUT);
        }
        pending.armed = false;
        pending.reply.take()
    }

    pub fn close(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.receiver.take() {
            let _ = h.join();
        }
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(socket: UdpSocket, shared: Arc<UdpShared>) {
    let mut packet = [0u8; UDP_MAX];
    while !shared.shutdown.load(Ordering::Relaxed) {
        match socket.recv_from(&mut packet) {
            Ok((bytes, peer)) => {
                *shared.last_peer.lock() = Some(peer);

                let mut pending = shared.pending.lock();
                if pending.armed {
                    pending.reply = Some(packet[..bytes].to_vec());
                    drop(pending);
                    shared.reply_ready.notify_one();
                    continue;
                }
                drop(pending);

                let mut slot = shared.callback.lock();
                if let Some(cb) = slot.as_mut() {
                    cb(&packet[..bytes], peer);
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) => {}
            Err(e) => {
                if !shared.shutdown.load(Ordering::Relaxed) {
                    log::error!("UDP receive error: {}", e);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_roundtrip_and_reply() {
        let a = UdpLink::open(0).unwrap();
        let mut b = UdpLink::open(0).unwrap();
        let addr_b = b.local_addr().unwrap();

        let got = Arc::new(Mutex::new(Vec::new()));
        {
            let got = Arc::clone(&got);
            b.on_receive(Box::new(move |bytes, _| {
                got.lock().extend_from_slice(bytes);
            }));
        }

        a.send_to(b"hello", addr_b).unwrap();
        for _ in 0..100 {
            if !got.lock().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got.lock().as_slice(), b"hello");

        b.close();
    }

    #[test]
    fn broadcast_and_multicast_options_apply() {
        let link = UdpLink::open(0).unwrap();
        link.set_broadcast(true).unwrap();
        link.join_multicast(Ipv4Addr::new(224, 0, 2, 60)).unwrap();
    }

    #[test]
    fn block_read_times_out_without_reply() {
        let a = UdpLink::open(0).unwrap();
        let b = UdpLink::open(0).unwrap();
        let addr_b = b.local_addr().unwrap();

        let start = std::time::Instant::now();
        assert!(a.block_read(b"ping", Some(addr_b)).is_none());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn block_read_returns_the_reply() {
        let a = UdpLink::open(0).unwrap();

        let echo_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let echo_addr = echo_sock.local_addr().unwrap();
        let echo = std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (n, from) = echo_sock.recv_from(&mut buf).unwrap();
            echo_sock.send_to(&buf[..n], from).unwrap();
        });

        let reply = a.block_read(b"ping", Some(echo_addr));
        echo.join().unwrap();
        assert_eq!(reply.as_deref(), Some(&b"ping"[..]));
    }
}

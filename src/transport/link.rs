//! Shared plumbing for the serial and TCP links: inbound/outbound rings,
//! the receiver loop and the outbound drain loop.

use super::ring::ByteRing;
use super::ReadCallback;
use parking_lot::{Condvar, Mutex};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handle passed to read callbacks and held by link owners for framing.
///
/// All methods take the inbound lock only for the duration of the call.
#[derive(Clone)]
pub struct LinkReader {
    inbound: Arc<Mutex<ByteRing>>,
}

impl LinkReader {
    pub(super) fn new(inbound: Arc<Mutex<ByteRing>>) -> Self {
        Self { inbound }
    }

    /// First offset >= `from` where the buffered bytes match `pattern`.
    pub fn lookup(&self, pattern: &[u8], from: usize) -> Option<usize> {
        self.inbound.lock().find(pattern, from)
    }

    /// Balanced-delimiter scan: (pos_open, pos_close, length).
    pub fn lookup_pair(&self, open: u8, close: u8, from: usize) -> Option<(usize, usize, usize)> {
        self.inbound.lock().find_pair(open, close, from)
    }

    /// Copy out up to `buf.len()` bytes starting at `from`; with `erase` the
    /// span and everything before it is consumed.
    pub fn read(&self, buf: &mut [u8], from: usize, erase: bool) -> usize {
        self.inbound.lock().read(buf, from, erase)
    }

    /// Consume `n` bytes without copying.
    pub fn consume(&self, n: usize) {
        self.inbound.lock().advance(n)
    }

    pub fn buffered(&self) -> usize {
        self.inbound.lock().len()
    }

    /// Stand-alone reader over a fresh ring, for exercising frame scanners
    /// without a live port.
    pub fn detached(capacity: usize) -> Self {
        Self::new(Arc::new(Mutex::new(ByteRing::new(capacity))))
    }

    /// Push bytes into the ring as if they had arrived from the wire.
    pub fn feed(&self, bytes: &[u8]) -> usize {
        self.inbound.lock().extend(bytes)
    }
}

/// State shared between a link facade and its worker threads.
pub(super) struct LinkShared {
    pub inbound: Arc<Mutex<ByteRing>>,
    pub outbound: Mutex<ByteRing>,
    pub out_ready: Condvar,
    pub shutdown: AtomicBool,
    /// Fire the read callback only once at least this many bytes are buffered
    pub min_read: AtomicUsize,
    pub callback: Mutex<Option<ReadCallback>>,
    /// Total bytes accepted by `write`
    pub accepted: AtomicU64,
    /// Total bytes handed to the OS by the drain loop
    pub drained: AtomicU64,
}

impl LinkShared {
    pub fn new(inbound_capacity: usize, outbound_capacity: usize) -> Self {
        Self {
            inbound: Arc::new(Mutex::new(ByteRing::new(inbound_capacity))),
            outbound: Mutex::new(ByteRing::new(outbound_capacity)),
            out_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            min_read: AtomicUsize::new(0),
            callback: Mutex::new(None),
            accepted: AtomicU64::new(0),
            drained: AtomicU64::new(0),
        }
    }

    pub fn reader(&self) -> LinkReader {
        LinkReader::new(Arc::clone(&self.inbound))
    }

    /// Queue bytes for transmission; wakes the drain loop iff the ring was
    /// previously empty. Returns the number of bytes accepted.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut ring = self.outbound.lock();
        let was_empty = ring.is_empty();
        let n = ring.extend(bytes);
        drop(ring);
        self.accepted.fetch_add(n as u64, Ordering::Relaxed);
        if was_empty && n > 0 {
            self.out_ready.notify_one();
        }
        n
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.out_ready.notify_all();
    }

    fn fire_callback(&self, ec: i32, buffered: usize) {
        let mut slot = self.callback.lock();
        if let Some(cb) = slot.as_mut() {
            let reader = self.reader();
            cb(&reader, ec, buffered);
        }
    }
}

/// Receiver loop: read-some into a scratch frame, append to the inbound ring,
/// fire the callback when enough is buffered. A zero-length or timed-out read
/// is "no data yet"; a hard error fires the callback once and ends the loop.
pub(super) fn receive_loop<R, F>(mut source: R, shared: Arc<LinkShared>, is_idle: F, scratch: usize)
where
    R: Read,
    F: Fn(&std::io::Error) -> bool,
{
    let mut frame = vec![0u8; scratch];
    while !shared.shutdown.load(Ordering::Relaxed) {
        match source.read(&mut frame) {
            Ok(0) => {
                // remote closed (TCP) or nothing pending (serial)
                if shared.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(n) => {
                let buffered = {
                    let mut ring = shared.inbound.lock();
                    let kept = ring.extend(&frame[..n]);
                    if kept < n {
                        log::warn!("inbound ring full, dropped {} bytes", n - kept);
                    }
                    ring.len()
                };
                if buffered >= shared.min_read.load(Ordering::Relaxed) {
                    shared.fire_callback(0, buffered);
                }
            }
            Err(ref e) if is_idle(e) => {}
            Err(e) => {
                if !shared.shutdown.load(Ordering::Relaxed) {
                    log::error!("receive loop error: {}", e);
                    shared.fire_callback(e.raw_os_error().unwrap_or(-1), 0);
                }
                break;
            }
        }
    }
}

/// Outbound drain loop: parked until `write` reports the empty→non-empty
/// transition, then flushes the ring to the sink.
pub(super) fn drain_loop<W: Write>(mut sink: W, shared: Arc<LinkShared>) {
    let mut chunk = [0u8; 256];
    loop {
        let n = {
            let mut ring = shared.outbound.lock();
            while ring.is_empty() && !shared.shutdown.load(Ordering::Relaxed) {
                shared.out_ready.wait(&mut ring);
            }
            if ring.is_empty() {
                return; // shutdown with nothing left to send
            }
            ring.drain_into(&mut chunk)
        };
        match sink.write_all(&chunk[..n]) {
            Ok(()) => {
                let _ = sink.flush();
                shared.drained.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(e) => {
                if !shared.shutdown.load(Ordering::Relaxed) {
                    log::error!("drain loop error: {}", e);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_counts_accepted_bytes() {
        let shared = LinkShared::new(64, 8);
        assert_eq!(shared.write(&[1, 2, 3]), 3);
        assert_eq!(shared.write(&[0; 10]), 5); // ring holds 8
        assert_eq!(shared.accepted.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn drain_loop_accounts_every_accepted_byte() {
        let shared = Arc::new(LinkShared::new(64, 1024));
        let (sink, rx) = {
            // pipe via a Vec guarded by a mutex, wrapped in a Write adapter
            struct SharedSink(Arc<Mutex<Vec<u8>>>);
            impl Write for SharedSink {
                fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                    self.0.lock().extend_from_slice(buf);
                    Ok(buf.len())
                }
                fn flush(&mut self) -> std::io::Result<()> {
                    Ok(())
                }
            }
            let store = Arc::new(Mutex::new(Vec::new()));
            (SharedSink(Arc::clone(&store)), store)
        };

        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || drain_loop(sink, shared))
        };

        let mut sent = 0u64;
        for i in 0..50u8 {
            sent += shared.write(&[i; 17]) as u64;
            std::thread::sleep(Duration::from_millis(1));
        }
        // wait for the ring to empty, then stop the loop
        while !shared.outbound.lock().is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
        shared.request_shutdown();
        worker.join().unwrap();

        assert_eq!(shared.drained.load(Ordering::Relaxed), sent);
        assert_eq!(rx.lock().len() as u64, sent);
    }

    #[test]
    fn callback_fires_at_min_read_threshold() {
        let shared = Arc::new(LinkShared::new(64, 64));
        shared.min_read.store(4, Ordering::Relaxed);
        let hits = Arc::new(AtomicU64::new(0));
        {
            let hits = Arc::clone(&hits);
            *shared.callback.lock() = Some(Box::new(move |reader, ec, buffered| {
                assert_eq!(ec, 0);
                assert!(buffered >= 4);
                assert_eq!(reader.buffered(), buffered);
                hits.fetch_add(1, Ordering::Relaxed);
            }));
        }
        shared.inbound.lock().extend(&[1, 2, 3]);
        if shared.inbound.lock().len() >= shared.min_read.load(Ordering::Relaxed) {
            shared.fire_callback(0, shared.inbound.lock().len());
        }
        assert_eq!(hits.load(Ordering::Relaxed), 0);

        shared.inbound.lock().extend(&[4]);
        let buffered = shared.inbound.lock().len();
        if buffered >= shared.min_read.load(Ordering::Relaxed) {
            shared.fire_callback(0, buffered);
        }
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}

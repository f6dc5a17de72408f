//! Serial transport: a field-bus byte pipe with background receive.
//!
//! Opens 8-N-1 at the requested baud rate. A receiver thread copies arriving
//! bytes into the inbound ring and fires the read callback once at least
//! `min_read` bytes are buffered (default 0: every delivery). Writes are
//! queued on the outbound ring and drained by a writer thread that wakes on
//! the empty→non-empty transition.

use super::link::{drain_loop, receive_loop, LinkShared};
use super::{LinkReader, ReadCallback};
use crate::error::Result;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Single-frame scratch read size.
const SERIAL_FRAME: usize = 128;
/// Inbound/outbound ring capacity.
const SERIAL_RING: usize = 1280;

pub struct SerialLink {
    shared: Arc<LinkShared>,
    receiver: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl SerialLink {
    /// Open a serial port and start the receive/drain threads.
    ///
    /// # Arguments
    /// * `path` - device path (e.g. "/dev/ttyUSB0")
    /// * `baud_rate` - 9600 for the weather station, 4800 for the rain line
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(50))
            .open()?;
        let writer_port = port.try_clone()?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        let shared = Arc::new(LinkShared::new(SERIAL_RING, SERIAL_RING));

        let receiver = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("serial-rx-{}", short_name(path)))
                .spawn(move || {
                    receive_loop(
                        port,
                        shared,
                        |e| {
                            matches!(
                                e.kind(),
                                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                            )
                        },
                        SERIAL_FRAME,
                    )
                })
                .map_err(|e| crate::error::Error::Other(format!("spawn serial-rx: {}", e)))?
        };

        let writer = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("serial-tx-{}", short_name(path)))
                .spawn(move || drain_loop(writer_port, shared))
                .map_err(|e| crate::error::Error::Other(format!("spawn serial-tx: {}", e)))?
        };

        Ok(Self {
            shared,
            receiver: Some(receiver),
            writer: Some(writer),
        })
    }

    /// Fire the read callback only once this many bytes are buffered.
    pub fn set_min_read(&self, len: usize) {
        self.shared.min_read.store(len, Ordering::Relaxed);
    }

    /// Register the read callback. It runs on the receiver thread under no
    /// ring lock; copy data out before returning.
    pub fn on_read(&self, callback: ReadCallback) {
        *self.shared.callback.lock() = Some(callback);
    }

    /// Framing handle over the inbound ring.
    pub fn reader(&self) -> LinkReader {
        self.shared.reader()
    }

    /// Queue bytes for transmission. Returns the number accepted.
    pub fn write(&self, bytes: &[u8]) -> usize {
        self.shared.write(bytes)
    }

    /// Total bytes handed to the OS so far.
    pub fn bytes_drained(&self) -> u64 {
        self.shared.drained.load(Ordering::Relaxed)
    }

    pub fn close(&mut self) {
        self.shared.request_shutdown();
        if let Some(h) = self.receiver.take() {
            let _ = h.join();
        }
        if let Some(h) = self.writer.take() {
            let _ = h.join();
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn short_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

//! Byte-stream and datagram transports.
//!
//! Each link owns two bounded rings (inbound and outbound) behind their own
//! locks, a background receiver thread that fires the registered read
//! callback, and a writer thread that drains the outbound ring whenever it
//! transitions from empty to non-empty.
//!
//! The read callback runs on the receiver thread and under no ring lock;
//! handlers must copy data out through [`LinkReader`] before returning. On a
//! transport error the callback fires once with a non-zero code and the
//! receive loop exits; the owning component decides whether to reopen.

mod link;
mod ring;
pub mod serial;
pub mod tcp;
pub mod udp;

pub use link::LinkReader;
pub use ring::ByteRing;
pub use serial::SerialLink;
pub use tcp::{TcpLink, TcpServer};
pub use udp::UdpLink;

/// Read-callback signature shared by the stream transports:
/// `(reader, error_code, bytes_buffered)`.
pub type ReadCallback = Box<dyn FnMut(&LinkReader, i32, usize) + Send>;

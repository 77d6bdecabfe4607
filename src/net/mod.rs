//! MQTT delivery: wire framing, the non-blocking TLS transport, and the
//! session state machine that drains the network queue into the broker.

pub mod client;
pub mod codec;
pub mod transport;

pub use client::{NetworkTask, SessionPhase};
pub use codec::{CodecError, Packet, PacketIds};
pub use transport::{BrokerDialer, Dialer, TlsTransport, Transport, TransportError};

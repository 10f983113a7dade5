//! Buffered socket layer: receive/send queues over an exclusive transport.

pub mod queue;
pub mod socket;
pub mod transport;

pub use queue::{ByteQueue, SendQueue};
pub use socket::{Socket, SocketEvent, SocketState};
pub use transport::{ReadyState, TcpTransport, Transport, TransportEvent};

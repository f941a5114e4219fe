//! Transport layer: frame codec, dialing and the broker session.

pub mod dialer;
pub mod frame;
pub mod session;

pub use dialer::{BoxedBrokerIo, BrokerDialer, TcpDialer};
pub use session::{Publisher, TransportError, TransportSession};

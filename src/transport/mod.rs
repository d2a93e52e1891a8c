//! Transport layer: TCP dialing, TLS handshakes, and the plain/TLS
//! variant stream the engine reads and writes.

pub mod connector;

pub use connector::{Connector, MaybeTlsStream};

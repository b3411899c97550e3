//! Client configuration constants.

use std::time::Duration;

/// Default limit on TCP connect, TLS and the handshake together.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit on a single request's round trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default server port.
pub const DEFAULT_PORT: u16 = 7457;

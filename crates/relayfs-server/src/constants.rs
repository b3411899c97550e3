//! Server configuration constants.

use std::time::Duration;

/// Default listen address (localhost only).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:7457";

/// A client that has not proven the secret by now is dropped.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

//! I/O utilities for rotoproxy
//!
//! Provides the bidirectional relay loop used by SOCKS sessions after
//! the handshake completes.

mod copy;

pub use copy::{relay, relay_with_buffer, CopyResult, RELAY_BUFFER_SIZE};

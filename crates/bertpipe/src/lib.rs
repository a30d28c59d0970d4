//! Control channel between a spreadsheet host and an embedded language runtime.
//!
//! # Crate Structure
//!
//! - [`transport`]: local pipes, wakers and the `poll(2)` wait
//! - [`frame`]: length-prefixed framing
//! - [`protocol`]: call/response messages and clients
//! - [`server`]: channel pool, event loop and dispatcher (behind `server` feature)

/// Re-export transport types.
pub mod transport {
    pub use bertpipe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use bertpipe_frame::*;
}

/// Re-export message types and clients.
pub mod protocol {
    pub use bertpipe_protocol::*;
}

/// Re-export the control process (requires `server` feature).
#[cfg(feature = "server")]
pub mod server {
    pub use bertpipe_server::*;
}

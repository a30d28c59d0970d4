//! Local pipe transport for bertpipe.
//!
//! The control channel needs a bidirectional, connection-oriented local
//! transport plus a way to wait on many of them at once. On Unix this is:
//! - Unix domain sockets for the named pipe instances ([`PipeListener`], [`IpcStream`])
//! - a self-pipe [`Waker`] standing in for a manual-reset event
//! - `poll(2)` as the single multiplexed wait ([`PollSet`])
//!
//! Everything above this crate sees only these types.

pub mod error;
pub mod name;
#[cfg(unix)]
pub mod poll;
pub mod stream;
#[cfg(unix)]
pub mod uds;
#[cfg(unix)]
pub mod waker;

pub use error::{Result, TransportError};
pub use name::pipe_path;
#[cfg(unix)]
pub use poll::{Interest, PollSet, Readiness};
pub use stream::IpcStream;
#[cfg(unix)]
pub use uds::PipeListener;
#[cfg(unix)]
pub use waker::Waker;

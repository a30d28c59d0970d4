//! The bertpipe control process.
//!
//! A bounded pool of pipe slots is multiplexed by a single `poll(2)` loop.
//! Requests are decoded, dispatched to the system table or the embedded
//! language runtime, and answered on the originating slot. One client may
//! hold the console role; console output produced while nobody holds it is
//! buffered and handed over in order on the next claim.
//!
//! ```no_run
//! use bertpipe_server::{CommandRuntime, EventLoop, ServerConfig};
//!
//! let config = ServerConfig::new("bertpipe-ctl");
//! let runtime = CommandRuntime::new(config.runtime.clone());
//! EventLoop::bind(config, Box::new(runtime))?.run()?;
//! # Ok::<(), bertpipe_server::ServerError>(())
//! ```

pub mod channel;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod pool;
pub mod runtime;
pub mod stdio;

pub use channel::{Channel, ChannelState, ChannelWriter, ReadStatus};
pub use config::{RuntimeConfig, ServerConfig, DEFAULT_MAX_CHANNELS};
pub use console::{ConsoleRelay, PromptSignal};
pub use dispatch::{CallDispatcher, Disposition, SystemFunction, SystemTable};
pub use error::{Result, ServerError};
pub use event_loop::{EventLoop, ShutdownHandle, INITIAL_PROMPT_ID};
pub use pool::ChannelPool;
pub use runtime::{CommandRuntime, LanguageRuntime, StdioSinks};
pub use stdio::StdioRelay;

use std::path::PathBuf;
use std::time::Duration;

use bertpipe_frame::DEFAULT_MAX_PAYLOAD;

/// Default bound on pool slots.
pub const DEFAULT_MAX_CHANNELS: usize = 16;
/// Default event-loop wait timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Default stdio relay wait timeout.
pub const DEFAULT_STDIO_POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Default deadline for flushing queued writes on shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// How the shipped [`CommandRuntime`](crate::CommandRuntime) drives its interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Name reported by `get-language`.
    pub language: String,
    /// Interpreter binary.
    pub program: String,
    /// Flag that makes the interpreter evaluate its next argument.
    pub eval_flag: String,
    /// Prompt string sent to the console client.
    pub prompt: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            language: "Julia".to_string(),
            program: "julia".to_string(),
            eval_flag: "-e".to_string(),
            prompt: "julia> ".to_string(),
        }
    }
}

/// Control process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Channel name shared by every pool slot.
    pub pipe_name: String,
    /// Upper bound on pool slots (listening plus connected).
    pub max_channels: usize,
    /// Bound on each event-loop wait.
    pub poll_timeout: Duration,
    /// Bound on each stdio relay wait.
    pub stdio_poll_timeout: Duration,
    /// Largest accepted frame payload.
    pub max_payload_size: usize,
    /// How long shutdown waits for queued writes. Zero skips the drain.
    pub drain_timeout: Duration,
    pub runtime: RuntimeConfig,
}

impl ServerConfig {
    pub fn new(pipe_name: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            max_channels: DEFAULT_MAX_CHANNELS,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            stdio_poll_timeout: DEFAULT_STDIO_POLL_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            runtime: RuntimeConfig::default(),
        }
    }

    /// A bound of zero is treated as one; the first client always gets a slot.
    pub fn with_max_channels(mut self, max_channels: usize) -> Self {
        self.max_channels = max_channels.max(1);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_stdio_poll_timeout(mut self, timeout: Duration) -> Self {
        self.stdio_poll_timeout = timeout;
        self
    }

    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Socket path the channel name resolves to.
    pub fn pipe_path(&self) -> PathBuf {
        bertpipe_transport::pipe_path(&self.pipe_name)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("bertpipe")
    }
}

use std::time::Duration;

use bertpipe_frame::FrameConfig;
use bertpipe_protocol::{Client, Variable};
use clap::{Args, Subcommand};

use crate::exit::{client_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod console;
pub mod control;
pub mod exec;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the control process on a named pipe.
    Serve(ServeArgs),
    /// Call a system or language function and print the result.
    Call(CallArgs),
    /// Execute a block of code in the runtime.
    Exec(ExecArgs),
    /// Send a control message (shutdown, console, close, ...).
    Control(ControlArgs),
    /// Claim the console role and stream console output.
    Console(ConsoleArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format),
        Command::Exec(args) => exec::run(args, format),
        Command::Control(args) => control::run(args, format),
        Command::Console(args) => console::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Channel name or socket path.
    #[arg(short = 'p', long = "pipe", env = "BERTPIPE_PIPE")]
    pub pipe: Option<String>,
    /// Upper bound on concurrently open pipe slots.
    #[arg(long, env = "BERTPIPE_MAX_CHANNELS", default_value_t = bertpipe_server::DEFAULT_MAX_CHANNELS)]
    pub max_channels: usize,
    /// Language name reported to clients.
    #[arg(long, default_value = "Julia")]
    pub language: String,
    /// Interpreter binary.
    #[arg(long, env = "BERTPIPE_PROGRAM", default_value = "julia")]
    pub program: String,
    /// Interpreter flag that evaluates the next argument.
    #[arg(long, default_value = "-e", allow_hyphen_values = true)]
    pub eval_flag: String,
    /// Console prompt.
    #[arg(long, default_value = "julia> ")]
    pub prompt: String,
    /// Largest accepted message payload in bytes.
    #[arg(long, default_value_t = bertpipe_frame::DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
    /// Event-loop wait bound (e.g. 100ms, 1s).
    #[arg(long, default_value = "100ms")]
    pub poll_timeout: String,
    /// How long shutdown waits for queued replies (e.g. 250ms).
    #[arg(long, default_value = "250ms")]
    pub drain_timeout: String,
}

/// Connection options shared by the client subcommands.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Channel name or socket path.
    #[arg(short = 'p', long = "pipe", env = "BERTPIPE_PIPE")]
    pub pipe: String,
    /// Maximum time to wait for a response (e.g. 5s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Function name.
    pub function: String,
    /// Arguments. Integers, reals, `true`, `false` and `nil` keep that type; anything else is a string.
    pub args: Vec<String>,
    /// Call the control process's system table instead of the language.
    #[arg(long)]
    pub system: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Source code to run.
    pub code: String,
}

#[derive(Args, Debug)]
pub struct ControlArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Control command.
    pub command: String,
    /// Wait for the acknowledgement.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args, Debug)]
pub struct ConsoleArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Send this line as a shell command after claiming the console.
    #[arg(long)]
    pub run: Option<String>,
    /// Exit after the prompt for `--run` arrives.
    #[arg(long, requires = "run")]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

impl ConnectArgs {
    /// Connect with the response timeout applied to reads.
    pub fn connect(&self) -> CliResult<Client> {
        let timeout = parse_duration(&self.timeout)?;
        let path = bertpipe_transport::pipe_path(&self.pipe);
        Client::connect_with_config(
            &path,
            FrameConfig {
                read_timeout: Some(timeout),
                write_timeout: Some(timeout),
                ..FrameConfig::default()
            },
        )
        .map_err(|err| client_error("connect failed", err))
    }
}

/// Reads a command-line argument as a channel value.
pub fn parse_argument(input: &str) -> Variable {
    match input {
        "nil" => Variable::Nil,
        "true" => Variable::Boolean(true),
        "false" => Variable::Boolean(false),
        _ => {
            if let Ok(value) = input.parse::<i64>() {
                Variable::Integer(value)
            } else if let Ok(value) = input.parse::<f64>() {
                Variable::Real(value)
            } else {
                Variable::Str(input.to_string())
            }
        }
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn parse_argument_keeps_scalar_types() {
        assert_eq!(parse_argument("42"), Variable::Integer(42));
        assert_eq!(parse_argument("2.5"), Variable::Real(2.5));
        assert_eq!(parse_argument("true"), Variable::Boolean(true));
        assert_eq!(parse_argument("nil"), Variable::Nil);
        assert_eq!(parse_argument("A1:B2"), Variable::from("A1:B2"));
    }
}

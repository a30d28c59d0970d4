use bertpipe_server::{CommandRuntime, EventLoop, RuntimeConfig, ServerConfig, ShutdownHandle};
use tracing::{error, info};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{server_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let pipe = args.pipe.clone().ok_or_else(|| {
        CliError::new(
            USAGE,
            "no pipe name given (pass --pipe or set BERTPIPE_PIPE)",
        )
    })?;
    if args.max_channels == 0 {
        return Err(CliError::new(USAGE, "--max-channels must be at least 1"));
    }

    let runtime = RuntimeConfig {
        language: args.language.clone(),
        program: args.program.clone(),
        eval_flag: args.eval_flag.clone(),
        prompt: args.prompt.clone(),
    };
    let config = ServerConfig::new(pipe)
        .with_max_channels(args.max_channels)
        .with_poll_timeout(parse_duration(&args.poll_timeout)?)
        .with_drain_timeout(parse_duration(&args.drain_timeout)?)
        .with_max_payload_size(args.max_payload)
        .with_runtime(runtime.clone());

    let event_loop = EventLoop::bind(config, Box::new(CommandRuntime::new(runtime)))
        .map_err(|err| server_error("bind failed", err))?;
    install_ctrlc_handler(event_loop.shutdown_handle())?;

    info!(path = %event_loop.path().display(), "serving control channel");
    event_loop.run().map_err(|err| {
        if err.is_wait_failure() {
            error!(error = %err, "multiplexed wait failed; control loop stopped");
        }
        server_error("control loop failed", err)
    })?;

    Ok(SUCCESS)
}

fn install_ctrlc_handler(handle: ShutdownHandle) -> CliResult<()> {
    ctrlc::set_handler(move || handle.shutdown()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}

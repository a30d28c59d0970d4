use bertpipe_protocol::ControlCommand;

use crate::cmd::ControlArgs;
use crate::exit::{client_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ControlArgs, format: OutputFormat) -> CliResult<i32> {
    let command = ControlCommand::parse(args.command.trim());
    if command.as_str().is_empty() {
        return Err(CliError::new(USAGE, "control command must not be empty"));
    }
    if args.wait && matches!(command, ControlCommand::Shutdown | ControlCommand::Close) {
        // Neither command is acknowledged; waiting would only end in a disconnect.
        return Err(CliError::new(
            USAGE,
            format!("'{command}' is never acknowledged; drop --wait"),
        ));
    }

    let mut client = args.connect.connect()?;
    let reply = client
        .control(&command, args.wait)
        .map_err(|err| client_error("control failed", err))?;
    if let Some(reply) = reply {
        print_message(&reply, format);
    }

    Ok(SUCCESS)
}

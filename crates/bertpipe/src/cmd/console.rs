use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bertpipe_protocol::{ClientError, ConsoleOutput, ControlCommand, Message, Operation};

use crate::cmd::ConsoleArgs;
use crate::exit::{client_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_console, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ConsoleArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = args.connect.connect()?;

    // Backlog buffered while nobody held the console arrives ahead of the reply.
    let id = client.next_id();
    let claimed = client
        .request_with(
            &Message::control(id, &ControlCommand::Console, true),
            |message| print_console(message, format),
        )
        .map_err(|err| client_error("console claim failed", err))?;
    if claimed.result_value().and_then(|value| value.as_bool()) != Some(true) {
        return Err(CliError::new(FAILURE, "console role is held by another client"));
    }

    let awaited = match &args.run {
        Some(line) => Some(
            client
                .shell(line)
                .map_err(|err| client_error("shell command failed", err))?,
        ),
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        let message = match client.recv_timeout(POLL_INTERVAL) {
            Ok(message) => message,
            Err(ClientError::Timeout(_)) => continue,
            Err(ClientError::Disconnected) => break,
            Err(err) => return Err(client_error("receive failed", err)),
        };
        print_console(&message, format);

        let prompt_for_run = matches!(
            message.operation,
            Operation::Console(ConsoleOutput::Prompt(_))
        ) && Some(message.id) == awaited;
        if args.once && prompt_for_run {
            break;
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

use bertpipe_protocol::{CallTarget, Operation};

use crate::cmd::{parse_argument, CallArgs};
use crate::exit::{client_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = args.connect.connect()?;
    let target = if args.system {
        CallTarget::System
    } else {
        CallTarget::Language
    };
    let arguments = args.args.iter().map(|arg| parse_argument(arg)).collect();

    let reply = client
        .call(target, &args.function, arguments)
        .map_err(|err| client_error("call failed", err))?;
    print_message(&reply, format);

    Ok(exit_code(&reply.operation))
}

/// An error reply still prints, but the process reports failure.
pub(crate) fn exit_code(operation: &Operation) -> i32 {
    match operation {
        Operation::Err(_) => FAILURE,
        _ => SUCCESS,
    }
}

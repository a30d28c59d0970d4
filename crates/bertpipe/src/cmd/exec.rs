use crate::cmd::call::exit_code;
use crate::cmd::ExecArgs;
use crate::exit::{client_error, CliResult};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ExecArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = args.connect.connect()?;
    let reply = client
        .exec(&args.code)
        .map_err(|err| client_error("exec failed", err))?;
    print_message(&reply, format);

    Ok(exit_code(&reply.operation))
}

use std::fs::File;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::{Command, Stdio};

use bertpipe_protocol::{FunctionCall, Message, Operation, Variable};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::Result;

/// Write ends of the capture pipes. Anything written here reaches the console
/// client as text (stdout) or error text (stderr).
#[derive(Debug)]
pub struct StdioSinks {
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

impl StdioSinks {
    /// A child-process handle onto the stdout capture pipe.
    pub fn stdout(&self) -> std::io::Result<Stdio> {
        Ok(Stdio::from(self.stdout.try_clone()?))
    }

    /// A child-process handle onto the stderr capture pipe.
    pub fn stderr(&self) -> std::io::Result<Stdio> {
        Ok(Stdio::from(self.stderr.try_clone()?))
    }

    /// Write `bytes` to the stderr capture pipe.
    pub fn write_stderr(&self, bytes: &[u8]) -> std::io::Result<()> {
        File::from(self.stderr.try_clone()?).write_all(bytes)
    }

    /// Write `bytes` to the stdout capture pipe.
    pub fn write_stdout(&self, bytes: &[u8]) -> std::io::Result<()> {
        File::from(self.stdout.try_clone()?).write_all(bytes)
    }
}

/// The embedded language runtime as the control loop sees it.
pub trait LanguageRuntime: Send {
    /// Called once after the first client has connected.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once after the loop has stopped.
    fn shutdown(&mut self) {}

    /// Name reported by `get-language`.
    fn language(&self) -> &str;

    /// Prompt text sent to the console client.
    fn prompt(&self) -> &str;

    /// Run a `FunctionCall` aimed at the language and build the response.
    fn handle_function_call(&mut self, message: &Message) -> Message;

    /// Run a `Code` block and build the response.
    fn handle_code(&mut self, message: &Message) -> Message;

    /// Run console input. Output goes through the capture pipes.
    fn handle_shell_command(&mut self, text: &str);

    fn read_source_file(&mut self, path: &Path) -> bool;

    /// Receive the capture pipe write ends before `init`.
    fn attach_stdio(&mut self, _sinks: StdioSinks) {}
}

/// Runs requests through an external interpreter, one child process each.
#[derive(Debug)]
pub struct CommandRuntime {
    config: RuntimeConfig,
    sinks: Option<StdioSinks>,
}

impl CommandRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            sinks: None,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.program);
        command.stdin(Stdio::null());
        command
    }

    fn console_stdio(&self, command: &mut Command) -> std::io::Result<()> {
        match &self.sinks {
            Some(sinks) => {
                command.stdout(sinks.stdout()?).stderr(sinks.stderr()?);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        Ok(())
    }

    /// Evaluate `source` with console output; `Ok(success)`.
    fn eval_to_console(&self, source: &str) -> std::io::Result<bool> {
        let mut command = self.command();
        command.arg(&self.config.eval_flag).arg(source);
        self.console_stdio(&mut command)?;
        Ok(command.status()?.success())
    }

    fn eval_for_value(&self, expression: &str) -> std::result::Result<Variable, String> {
        let output = self
            .command()
            .arg(&self.config.eval_flag)
            .arg(expression)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| format!("failed to run {}: {err}", self.config.program))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim_end().to_string());
        }
        if !output.stderr.is_empty() {
            if let Some(sinks) = &self.sinks {
                if let Err(err) = sinks.write_stderr(&output.stderr) {
                    debug!(error = %err, "failed to forward call stderr");
                }
            }
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(Variable::Str(text.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl LanguageRuntime for CommandRuntime {
    fn language(&self) -> &str {
        &self.config.language
    }

    fn prompt(&self) -> &str {
        &self.config.prompt
    }

    fn handle_function_call(&mut self, message: &Message) -> Message {
        let Operation::FunctionCall(call) = &message.operation else {
            return Message::error(message.id, "not a function call");
        };
        match self.eval_for_value(&render_call(call)) {
            Ok(value) => Message::result(message.id, value),
            Err(err) => Message::error(message.id, err),
        }
    }

    fn handle_code(&mut self, message: &Message) -> Message {
        let Operation::Code { source } = &message.operation else {
            return Message::error(message.id, "not a code block");
        };
        match self.eval_to_console(source) {
            Ok(success) => Message::result(message.id, success),
            Err(err) => Message::error(
                message.id,
                format!("failed to run {}: {err}", self.config.program),
            ),
        }
    }

    fn handle_shell_command(&mut self, text: &str) {
        match self.eval_to_console(text) {
            Ok(true) => {}
            Ok(false) => debug!("shell command exited with failure"),
            Err(err) => {
                warn!(program = %self.config.program, error = %err, "failed to run shell command");
                if let Some(sinks) = &self.sinks {
                    let _ = sinks.write_stderr(format!("{err}\n").as_bytes());
                }
            }
        }
    }

    fn read_source_file(&mut self, path: &Path) -> bool {
        if !path.exists() {
            debug!(path = %path.display(), "source file not found");
            return false;
        }
        let mut command = self.command();
        command.arg(path);
        let run = self
            .console_stdio(&mut command)
            .and_then(|()| command.status());
        match run {
            Ok(status) => status.success(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load source file");
                false
            }
        }
    }

    fn attach_stdio(&mut self, sinks: StdioSinks) {
        self.sinks = Some(sinks);
    }
}

/// Render `function(arg, ...)` with literal arguments.
pub fn render_call(call: &FunctionCall) -> String {
    let args: Vec<String> = call.arguments.iter().map(render_literal).collect();
    format!("{}({})", call.function, args.join(", "))
}

fn render_literal(value: &Variable) -> String {
    match value {
        Variable::Nil => "nothing".to_string(),
        Variable::Boolean(b) => b.to_string(),
        Variable::Integer(i) => i.to_string(),
        Variable::Real(r) => format!("{r:?}"),
        Variable::Str(s) => format!("{s:?}"),
        Variable::Array(items) => {
            let items: Vec<String> = items.iter().map(render_literal).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Control command: stop the server loop.
pub const CONTROL_SHUTDOWN: &str = "shutdown";
/// Control command: claim the console role for the sending client.
pub const CONTROL_CONSOLE: &str = "console";
/// Control command: close the sending client's pipe.
pub const CONTROL_CLOSE: &str = "close";

/// System function returning the embedded language's name.
pub const SYSTEM_GET_LANGUAGE: &str = "get-language";
/// System function loading a source file into the runtime.
pub const SYSTEM_READ_SOURCE_FILE: &str = "read-source-file";

/// One call or response on the control channel.
///
/// Requests and responses share this shape; a response carries the request's
/// `id` and one of the response operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id set by the caller and echoed in the response.
    pub id: u32,
    /// Whether the caller expects a reply.
    #[serde(default)]
    pub wait: bool,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    FunctionCall(FunctionCall),
    Code { source: String },
    ShellCommand(String),
    ControlMessage(String),
    Result(Variable),
    Console(ConsoleOutput),
    Err(String),
}

/// Who handles a function call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallTarget {
    /// Built-in system functions of the control process.
    System,
    /// The embedded language runtime.
    #[default]
    Language,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub target: CallTarget,
    pub function: String,
    #[serde(default)]
    pub arguments: Vec<Variable>,
}

/// A value crossing the channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Str(String),
    Array(Vec<Variable>),
}

impl Variable {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variable::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variable::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Nil => f.write_str("nil"),
            Variable::Boolean(b) => write!(f, "{b}"),
            Variable::Integer(i) => write!(f, "{i}"),
            Variable::Real(r) => write!(f, "{r}"),
            Variable::Str(s) => f.write_str(s),
            Variable::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Variable {
    fn from(value: &str) -> Self {
        Variable::Str(value.to_string())
    }
}

impl From<String> for Variable {
    fn from(value: String) -> Self {
        Variable::Str(value)
    }
}

impl From<bool> for Variable {
    fn from(value: bool) -> Self {
        Variable::Boolean(value)
    }
}

impl From<i64> for Variable {
    fn from(value: i64) -> Self {
        Variable::Integer(value)
    }
}

impl From<f64> for Variable {
    fn from(value: f64) -> Self {
        Variable::Real(value)
    }
}

/// Text relayed to the console client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleOutput {
    /// Captured standard output.
    Text(String),
    /// Captured standard error.
    Err(String),
    /// The runtime is ready for the next shell command.
    Prompt(String),
}

/// Parsed form of a `ControlMessage` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown,
    Console,
    Close,
    Other(String),
}

impl ControlCommand {
    pub fn parse(command: &str) -> Self {
        match command {
            CONTROL_SHUTDOWN => ControlCommand::Shutdown,
            CONTROL_CONSOLE => ControlCommand::Console,
            CONTROL_CLOSE => ControlCommand::Close,
            other => ControlCommand::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ControlCommand::Shutdown => CONTROL_SHUTDOWN,
            ControlCommand::Console => CONTROL_CONSOLE,
            ControlCommand::Close => CONTROL_CLOSE,
            ControlCommand::Other(other) => other,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    pub fn function_call(
        id: u32,
        target: CallTarget,
        function: impl Into<String>,
        arguments: Vec<Variable>,
    ) -> Self {
        Self {
            id,
            wait: true,
            operation: Operation::FunctionCall(FunctionCall {
                target,
                function: function.into(),
                arguments,
            }),
        }
    }

    pub fn code(id: u32, source: impl Into<String>) -> Self {
        Self {
            id,
            wait: true,
            operation: Operation::Code {
                source: source.into(),
            },
        }
    }

    /// Shell commands never get a direct reply; the next prompt acknowledges them.
    pub fn shell_command(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            wait: false,
            operation: Operation::ShellCommand(text.into()),
        }
    }

    pub fn control(id: u32, command: &ControlCommand, wait: bool) -> Self {
        Self {
            id,
            wait,
            operation: Operation::ControlMessage(command.as_str().to_string()),
        }
    }

    /// Set whether a reply is expected.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// An empty response to `id`; handlers fill in the operation.
    pub fn response_to(id: u32) -> Self {
        Self::result(id, Variable::Nil)
    }

    pub fn result(id: u32, value: impl Into<Variable>) -> Self {
        Self {
            id,
            wait: false,
            operation: Operation::Result(value.into()),
        }
    }

    pub fn error(id: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            wait: false,
            operation: Operation::Err(message.into()),
        }
    }

    pub fn console_text(text: impl Into<String>) -> Self {
        Self::console(0, ConsoleOutput::Text(text.into()))
    }

    pub fn console_err(text: impl Into<String>) -> Self {
        Self::console(0, ConsoleOutput::Err(text.into()))
    }

    pub fn prompt(id: u32, prompt: impl Into<String>) -> Self {
        Self::console(id, ConsoleOutput::Prompt(prompt.into()))
    }

    fn console(id: u32, output: ConsoleOutput) -> Self {
        Self {
            id,
            wait: false,
            operation: Operation::Console(output),
        }
    }

    /// The result value, if this is a result response.
    pub fn result_value(&self) -> Option<&Variable> {
        match &self.operation {
            Operation::Result(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_console(&self) -> bool {
        matches!(self.operation, Operation::Console(_))
    }

    /// Short operation name for logs.
    pub fn kind(&self) -> &'static str {
        match self.operation {
            Operation::FunctionCall(_) => "function_call",
            Operation::Code { .. } => "code",
            Operation::ShellCommand(_) => "shell_command",
            Operation::ControlMessage(_) => "control_message",
            Operation::Result(_) => "result",
            Operation::Console(_) => "console",
            Operation::Err(_) => "err",
        }
    }
}

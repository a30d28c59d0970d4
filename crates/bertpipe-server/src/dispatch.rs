use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bertpipe_protocol::{
    CallTarget, ControlCommand, FunctionCall, Message, Operation, Variable, SYSTEM_GET_LANGUAGE,
    SYSTEM_READ_SOURCE_FILE,
};
use tracing::{debug, info, warn};

use crate::channel::ChannelWriter;
use crate::console::{ConsoleRelay, PromptSignal};
use crate::runtime::LanguageRuntime;

/// Handler for one system function.
pub type SystemFunction =
    Box<dyn Fn(&mut dyn LanguageRuntime, &FunctionCall) -> Variable + Send + Sync>;

/// Name-to-handler table for `FunctionCall`s aimed at the control process.
pub struct SystemTable {
    functions: HashMap<String, SystemFunction>,
}

impl SystemTable {
    /// A table with no functions at all.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// `get-language` and `read-source-file`.
    pub fn with_builtins() -> Self {
        let mut table = Self::empty();
        table.register(SYSTEM_GET_LANGUAGE, |runtime, _| {
            Variable::from(runtime.language())
        });
        table.register(SYSTEM_READ_SOURCE_FILE, |runtime, call| {
            let path = call
                .arguments
                .first()
                .and_then(Variable::as_str)
                .filter(|path| !path.is_empty());
            match path {
                Some(path) => Variable::Boolean(runtime.read_source_file(Path::new(path))),
                None => {
                    warn!("read-source-file called without a path argument");
                    Variable::Boolean(false)
                }
            }
        });
        table
    }

    /// Add or replace a function.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&mut dyn LanguageRuntime, &FunctionCall) -> Variable + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Run `call`; unknown names yield `false`.
    pub fn call(&self, runtime: &mut dyn LanguageRuntime, call: &FunctionCall) -> Variable {
        match self.functions.get(&call.function) {
            Some(function) => function(runtime, call),
            None => {
                warn!(function = %call.function, "system function not implemented");
                Variable::Boolean(false)
            }
        }
    }
}

impl Default for SystemTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for SystemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("SystemTable").field("functions", &names).finish()
    }
}

/// What the event loop does with a dispatched message.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Write this response to the originating channel.
    Reply(Message),
    /// Send nothing; advance the channel's write queue.
    NoReply,
    /// Reset the originating channel without replying.
    Close,
    /// Stop the event loop.
    Shutdown,
}

/// Routes decoded requests by operation and call target.
pub struct CallDispatcher {
    runtime: Box<dyn LanguageRuntime>,
    system: SystemTable,
    console: Arc<ConsoleRelay>,
    prompt: Arc<PromptSignal>,
}

impl CallDispatcher {
    pub fn new(
        runtime: Box<dyn LanguageRuntime>,
        console: Arc<ConsoleRelay>,
        prompt: Arc<PromptSignal>,
    ) -> Self {
        Self {
            runtime,
            system: SystemTable::with_builtins(),
            console,
            prompt,
        }
    }

    pub fn with_system_table(mut self, system: SystemTable) -> Self {
        self.system = system;
        self
    }

    pub fn system_table_mut(&mut self) -> &mut SystemTable {
        &mut self.system
    }

    pub fn runtime_mut(&mut self) -> &mut dyn LanguageRuntime {
        self.runtime.as_mut()
    }

    /// Queue the runtime prompt for the console, tagged with `id`.
    pub fn raise_prompt(&self, id: u32) {
        self.prompt.raise(self.runtime.prompt(), id);
    }

    /// Handle a request that arrived on channel `index`.
    pub fn dispatch(
        &mut self,
        index: usize,
        writer: &Arc<ChannelWriter>,
        message: &Message,
    ) -> Disposition {
        debug!(
            channel = index,
            id = message.id,
            kind = message.kind(),
            wait = message.wait,
            "dispatching"
        );

        match &message.operation {
            Operation::FunctionCall(call) => {
                let response = match call.target {
                    CallTarget::System => {
                        Message::result(message.id, self.system.call(self.runtime.as_mut(), call))
                    }
                    CallTarget::Language => {
                        let mut response = self.runtime.handle_function_call(message);
                        response.id = message.id;
                        response
                    }
                };
                reply_if_wait(message, response)
            }
            Operation::Code { .. } => {
                let mut response = self.runtime.handle_code(message);
                response.id = message.id;
                reply_if_wait(message, response)
            }
            Operation::ShellCommand(text) => {
                self.runtime.handle_shell_command(text);
                self.raise_prompt(message.id);
                Disposition::NoReply
            }
            Operation::ControlMessage(command) => self.control(index, writer, message, command),
            Operation::Result(_) | Operation::Console(_) | Operation::Err(_) => {
                warn!(
                    channel = index,
                    id = message.id,
                    kind = message.kind(),
                    "response operation received as a request"
                );
                reply_if_wait(
                    message,
                    Message::error(message.id, "unsupported operation"),
                )
            }
        }
    }

    fn control(
        &mut self,
        index: usize,
        writer: &Arc<ChannelWriter>,
        message: &Message,
        command: &str,
    ) -> Disposition {
        match ControlCommand::parse(command) {
            ControlCommand::Shutdown => {
                info!(channel = index, "shutdown requested");
                Disposition::Shutdown
            }
            ControlCommand::Close => {
                debug!(channel = index, "close requested");
                Disposition::Close
            }
            ControlCommand::Console => {
                let claimed = self.console.claim(index, writer);
                if !claimed {
                    warn!(
                        channel = index,
                        holder = ?self.console.holder(),
                        "console role conflict; claim ignored"
                    );
                }
                reply_if_wait(message, Message::result(message.id, claimed))
            }
            ControlCommand::Other(other) => {
                debug!(channel = index, command = %other, "ignoring unknown control command");
                reply_if_wait(message, Message::response_to(message.id))
            }
        }
    }
}

impl std::fmt::Debug for CallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDispatcher")
            .field("language", &self.runtime.language())
            .field("system", &self.system)
            .field("console", &self.console)
            .finish()
    }
}

fn reply_if_wait(request: &Message, response: Message) -> Disposition {
    if request.wait {
        Disposition::Reply(response)
    } else {
        Disposition::NoReply
    }
}

//! Call/response messages for the bertpipe control channel.
//!
//! A [`Message`] is serialized as JSON inside one length-prefixed frame.
//! The same shape carries requests (function calls, code, shell commands,
//! control messages) and responses (results, errors, console output).

#[cfg(feature = "async")]
pub mod async_client;
pub mod client;
pub mod codec;
pub mod error;
pub mod message;

#[cfg(feature = "async")]
pub use async_client::AsyncClient;
pub use client::Client;
#[cfg(feature = "async")]
pub use codec::MessageCodec;
pub use codec::{decode_message, encode_message};
pub use error::{ClientError, CodecError, Result};
pub use message::{
    CallTarget, ConsoleOutput, ControlCommand, FunctionCall, Message, Operation, Variable,
    CONTROL_CLOSE, CONTROL_CONSOLE, CONTROL_SHUTDOWN, SYSTEM_GET_LANGUAGE,
    SYSTEM_READ_SOURCE_FILE,
};

use std::io::{IsTerminal, Write};

use bertpipe_protocol::{ConsoleOutput, Message, Operation, Variable};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    id: u32,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Variable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    console: Option<&'a ConsoleOutput>,
}

impl<'a> ResponseOutput<'a> {
    fn from_message(message: &'a Message) -> Self {
        let (value, error, console) = match &message.operation {
            Operation::Result(value) => (Some(value), None, None),
            Operation::Err(text) => (None, Some(text.as_str()), None),
            Operation::Console(output) => (None, None, Some(output)),
            _ => (None, None, None),
        };
        Self {
            id: message.id,
            kind: message.kind(),
            value,
            error,
            console,
        }
    }
}

/// Print a response received from the control process.
pub fn print_message(message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput::from_message(message);
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "KIND", "VALUE"])
                .add_row(vec![
                    message.id.to_string(),
                    message.kind().to_string(),
                    summary(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={} kind={} value={}",
                message.id,
                message.kind(),
                summary(message)
            );
        }
        OutputFormat::Raw => {
            print_raw(summary(message).as_bytes());
            print_raw(b"\n");
        }
    }
}

/// Print console traffic. Text and prompts go to stdout as-is in raw and
/// table modes so the stream reads like a terminal; stderr text goes to stderr.
pub fn print_console(message: &Message, format: OutputFormat) {
    let Operation::Console(output) = &message.operation else {
        print_message(message, format);
        return;
    };

    match format {
        OutputFormat::Json | OutputFormat::Pretty => print_message(message, format),
        OutputFormat::Table | OutputFormat::Raw => match output {
            ConsoleOutput::Text(text) | ConsoleOutput::Prompt(text) => print_raw(text.as_bytes()),
            ConsoleOutput::Err(text) => {
                let mut err = std::io::stderr();
                let _ = err.write_all(text.as_bytes());
                let _ = err.flush();
            }
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn summary(message: &Message) -> String {
    match &message.operation {
        Operation::Result(value) => value.to_string(),
        Operation::Err(text) => format!("error: {text}"),
        Operation::Console(ConsoleOutput::Text(text)) => text.clone(),
        Operation::Console(ConsoleOutput::Err(text)) => text.clone(),
        Operation::Console(ConsoleOutput::Prompt(prompt)) => prompt.clone(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_output_carries_value_or_error() {
        let ok = Message::result(4, "Julia");
        let json = serde_json::to_value(ResponseOutput::from_message(&ok)).unwrap();
        assert_eq!(json["id"], 4);
        assert_eq!(json["kind"], "result");
        assert_eq!(json["value"]["str"], "Julia");
        assert!(json.get("error").is_none());

        let failed = Message::error(5, "boom");
        let json = serde_json::to_value(ResponseOutput::from_message(&failed)).unwrap();
        assert_eq!(json["kind"], "err");
        assert_eq!(json["error"], "boom");
        assert!(json.get("value").is_none());
    }

    #[test]
    fn summary_renders_results_and_errors() {
        assert_eq!(summary(&Message::result(1, 3_i64)), "3");
        assert_eq!(summary(&Message::error(1, "nope")), "error: nope");
        assert_eq!(summary(&Message::prompt(2, "julia> ")), "julia> ");
    }
}

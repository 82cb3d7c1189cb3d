//! Output formatting for canflash (text, json) and console log sinks

use canflash_core::LogSink;
use clap::ValueEnum;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human readable text (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet && self.format == OutputFormat::Text {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet && self.format == OutputFormat::Text {
            println!("{}", msg);
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Text => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                println!("{}", kv_json(pairs));
            }
        }
    }

    /// Print a JSON value as-is (json format) or pretty-printed (text)
    pub fn print_json(&self, value: &Value) {
        match self.format {
            OutputFormat::Json => println!("{}", value),
            OutputFormat::Text => println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            ),
        }
    }

    /// Progress bar for a flash run; hidden in quiet or json mode
    pub fn flash_progress(&self) -> ProgressBar {
        if self.quiet || self.format == OutputFormat::Json {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    }
}

fn kv_json(pairs: &[(&str, String)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

/// Session log lines above an indicatif progress bar
pub struct ProgressSink {
    bar: ProgressBar,
}

impl ProgressSink {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl LogSink for ProgressSink {
    fn info(&self, message: &str) {
        self.bar.set_message(message.to_string());
        self.bar.println(message);
    }

    fn warn(&self, message: &str) {
        self.bar.println(format!("{}", message.yellow()));
    }

    fn error(&self, message: &str) {
        self.bar.println(format!("{}", message.red()));
    }

    fn progress(&self, done: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(done as u64);
    }
}

/// Session log lines straight to the terminal
pub struct ConsoleSink {
    quiet: bool,
}

impl ConsoleSink {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl LogSink for ConsoleSink {
    fn info(&self, message: &str) {
        if !self.quiet {
            eprintln!("{}", message);
        }
    }

    fn warn(&self, message: &str) {
        eprintln!("{}", message.yellow());
    }

    fn error(&self, message: &str) {
        eprintln!("{}", message.red());
    }
}

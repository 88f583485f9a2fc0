//! Engine module for the CLI: argument parsing, run handler, progress and report sinks

pub mod arg_parser;
pub mod cli;
pub mod progress;
pub mod report;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use cli::handle_run;
pub use report::{ReportSink, csv_field};

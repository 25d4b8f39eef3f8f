use clap::Parser;

mod cmd;
mod exit;
mod logging;
mod output;

use cmd::Command;
use logging::{init_logging, LogFormat, LogLevel};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "nclink", version, about = "Diagnostics for the nclink coprocessor protocol")]
struct Cli {
    /// Output format (defaults to table on a terminal, json otherwise)
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli
        .format
        .unwrap_or_else(OutputFormat::default_for_stdout);

    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nclink: {err}");
            std::process::exit(err.code);
        }
    }
}

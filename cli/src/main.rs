use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use cli::{
    handlers::{InitModelArgs, RunArgs, handle_init_model, handle_run},
    logger::{LogLevel, init_logger},
};

#[derive(Parser)]
struct Cli {
    /// Verbosity of the stderr log
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate continuations for one or more prompts
    Run(RunArgs),
    /// Write randomly initialized weights for the reference CPU backend
    InitModel(InitModelArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.log_level);

    let result = match cli.command {
        Some(Commands::Run(args)) => handle_run(args),
        Some(Commands::InitModel(args)) => handle_init_model(args),
        None => {
            let mut cmd = Cli::command();
            cmd.print_help().map_err(Into::into)
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        },
    }
}

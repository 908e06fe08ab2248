mod cli;
mod commands;
mod interactive;
mod logging;

use boba_core::config::{config_dir, ClientConfig, OutputFormat};
use boba_core::formatter::TableStyle;
use clap::Parser;

use crate::cli::{Cli, Command};
use crate::commands::{CommandError, OneShot, OutputOptions};
use crate::logging::LogOutput;

fn run_app(
    command: Command,
    run_tui: impl FnOnce() -> Result<(), boba_tui::TuiError>,
    run_command: impl FnOnce(OneShot) -> Result<(), CommandError>,
) -> Result<(), Box<dyn std::error::Error>> {
    match OneShot::from_command(command) {
        None => run_tui()?,
        Some(one_shot) => run_command(one_shot)?,
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_path(path)?,
        None => ClientConfig::load_default()?,
    };
    config.apply_env()?;
    cli.apply_overrides(&mut config);
    Ok(config)
}

fn log_output(command: &Command) -> LogOutput {
    match (command, config_dir()) {
        (Command::Interactive, Ok(dir)) => LogOutput::File(dir.join("logs")),
        _ => LogOutput::Stderr,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let command = cli.command.clone().unwrap_or(Command::Interactive);
    let _logging = logging::init(&log_output(&command), cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let options = OutputOptions {
        format: config.display.format,
        export_format: cli.format.map_or(OutputFormat::Csv, OutputFormat::from),
        style: TableStyle::for_theme(config.display.theme, config.display.max_column_width),
    };

    run_app(
        command,
        || interactive::run(&runtime, &config),
        |one_shot| commands::run(&runtime, &config, options, one_shot),
    )
}

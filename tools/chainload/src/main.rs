use std::process::ExitCode;

use clap::Parser;

use chainload::cli::{Cli, Command};
use chainload::config::ToolConfig;
use chainload::error::ToolError;
use chainload::{commands, output};

/// Emit a command result; a failed chain exits 1.
fn finish<T>(format: output::OutputFormat, value: &T, success: bool) -> Result<ExitCode, ToolError>
where
    T: serde::Serialize + std::fmt::Display,
{
    output::emit(format, value)?;
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn dispatch(cli: &Cli) -> Result<ExitCode, ToolError> {
    let mut config = ToolConfig::load(cli.config.as_deref())?;
    if let Some(root) = &cli.sd_root {
        config.sd_root = root.clone();
    }

    // --verbose wins over the config level; RUST_LOG overrides both
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        config.level_filter()
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    match &cli.command {
        Command::Scan => {
            let summary = commands::scan::run(&config)?;
            finish(cli.output, &summary, true)
        }
        Command::Inspect(args) => {
            let report = commands::inspect::run(&args.path)?;
            let loadable = report.loadable;
            finish(cli.output, &report, loadable)
        }
        Command::Run(args) => {
            let summary = commands::run::run(args, &config)?;
            let ok = summary.executed && summary.exit_code == 0;
            finish(cli.output, &summary, ok)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(&cli) {
        Ok(code) => code,
        Err(e) => {
            output::emit_error(cli.output, e.exit_code_num(), &e.to_string());
            e.exit_code()
        }
    }
}

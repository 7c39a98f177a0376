mod cli;
mod commands;
mod config;
mod pipeline;
mod progress;
mod report;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Overrides;
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub overrides: Overrides,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        overrides: Overrides {
            config: cli.config,
            region: cli.region,
            username: cli.username,
            api_key: cli.api_key,
        },
    };
    log::trace!("verbosity {}", ctx.verbose);

    let result = match cli.command {
        Command::Servers(args) => commands::compute::servers(&ctx, args),
        Command::Cluster(args) => commands::compute::cluster(&ctx, args),
        Command::Stack(args) => commands::compute::stack(&ctx, args),
        Command::Grow(args) => commands::compute::grow(&ctx, args),
        Command::Clone(args) => commands::clone::clone(&ctx, args),
        Command::Host(args) => commands::clone::host(&ctx, args),
        Command::Record(args) => commands::dns::record(&ctx, args),
        Command::Database(args) => commands::database::run(&ctx, args),
        Command::CdnContainer(args) => commands::storage::cdn_container(&ctx, args),
        Command::Site(args) => commands::storage::site(&ctx, args),
        Command::Upload(args) => commands::storage::upload(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "cumulus", &mut io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

/// Print a failure, with catalog alternatives and advice when the cause
/// is a provisioning error.
fn report_error(err: &anyhow::Error) {
    ui::error(&format!("{err:#}"));

    let Some(cause) = err.downcast_ref::<cloudkit::Error>() else {
        return;
    };
    let alternatives = cause.alternatives();
    if let cloudkit::Error::NotFound { kind, .. } = cause {
        eprintln!("Valid {kind} choices:");
        ui::alternatives(alternatives);
    }
    let category = cause.category();
    eprintln!("{}: {}", category, category.advice());
}

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::cast_possible_truncation)]

mod commands;
mod logging;

use assetpipe_core::config::Mode;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "assetpipe")]
#[command(author, version, about = "Build and serve hashed front-end assets", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the project directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Config file (default: assetpipe.json in the project directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Write a default assetpipe.json
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Build once and publish to the output directory
    Build {
        /// Keep whitespace and comments in scripts and styles
        #[arg(long)]
        no_minify: bool,

        /// Maximum number of transform threads
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
        max_parallel: Option<u16>,

        /// Build mode (sets process.env.NODE_ENV)
        #[arg(long, value_parser = ["development", "production"])]
        mode: Option<String>,
    },

    /// Serve the output, rebuild on change and reload connected browsers
    Dev {
        /// Port to listen on
        #[arg(short, long, env = "ASSETPIPE_PORT")]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Poll the file system every N milliseconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..), conflicts_with = "no_poll")]
        poll_ms: Option<u64>,

        /// Use native file system events instead of polling
        #[arg(long)]
        no_poll: bool,

        /// Keep whitespace and comments in scripts and styles
        #[arg(long)]
        no_minify: bool,
    },
}

fn parse_mode(mode: Option<&str>) -> Option<Mode> {
    match mode {
        Some("production") => Some(Mode::Production),
        Some("development") => Some(Mode::Development),
        _ => None,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);

    // Commands that own their output
    match &cli.command {
        Some(Commands::Version) | None => return commands::version::run(cli.json),
        Some(Commands::Init { force }) => {
            return commands::init::run(&cwd, cli.config.as_deref(), *force, cli.json);
        }
        _ => {}
    }

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Build {
            no_minify,
            max_parallel,
            mode,
        }) => {
            let span = tracing::info_span!("build", cmd = "build", cwd = %cwd.display());
            let _guard = span.enter();
            commands::build::run(
                commands::build::BuildAction {
                    cwd,
                    config: cli.config,
                    minify: no_minify.then_some(false),
                    max_parallel: max_parallel.map(usize::from),
                    mode: parse_mode(mode.as_deref()),
                },
                cli.json,
            )
        }
        Some(Commands::Dev {
            port,
            host,
            poll_ms,
            no_poll,
            no_minify,
        }) => {
            let action = commands::dev::DevAction {
                cwd,
                config: cli.config,
                port,
                host,
                poll: if no_poll { Some(None) } else { poll_ms.map(Some) },
                no_minify,
            };
            let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
            runtime.block_on(commands::dev::run(action))
        }
        Some(Commands::Version | Commands::Init { .. }) | None => unreachable!("handled above"),
    }
}

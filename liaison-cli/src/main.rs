// MIT License
// Copyright 2023--present liaison developers

//! liaison CLI: serve an FMI 3.0 model unit over the network, or package the
//! proxy unit a simulation host loads in its place.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Serve FMI 3.0 model units remotely
#[derive(Parser)]
#[command(name = "liaison")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a model unit and answer calls for it until interrupted
    Serve {
        /// Model unit (.fmu) to serve
        fmu: PathBuf,

        /// Routing namespace clients address this model by
        namespace: String,

        /// Transport config (JSON); defaults to listening on tcp/127.0.0.1:7447
        #[arg(short = 'c', long = "transport-config")]
        transport_config: Option<PathBuf>,
    },

    /// Write a proxy unit whose binaries forward every call to a server
    Package {
        /// Model unit (.fmu) to proxy
        fmu: PathBuf,

        /// Routing namespace the server was started with
        namespace: String,

        /// Transport config (JSON) embedded in the proxy unit
        #[arg(short = 'c', long = "transport-config")]
        transport_config: Option<PathBuf>,

        /// Directory of client stubs laid out as <platform>/<library>;
        /// defaults to `stubs/` next to this executable
        #[arg(short, long)]
        stub_dir: Option<PathBuf>,

        /// Output archive; defaults to <fmu stem>-remote.fmu next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Serve {
            fmu,
            namespace,
            transport_config,
        } => commands::serve::run(&fmu, &namespace, transport_config.as_deref()),

        Commands::Package {
            fmu,
            namespace,
            transport_config,
            stub_dir,
            output,
        } => commands::package::run(
            &fmu,
            &namespace,
            transport_config.as_deref(),
            stub_dir,
            output,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

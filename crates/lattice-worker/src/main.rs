//! Lattice worker - an interpreter process.
//!
//! Hosts the built-in interpreters behind the wire protocol on `--port` until
//! the front-end asks it to shut down or it is terminated.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use lattice_core::interpreter::InterpreterFactory;
use lattice_core::runtime::{InterpreterRuntime, RuntimeConfig, RuntimeServer};

#[derive(Parser)]
#[command(name = "lattice-worker")]
#[command(about = "Interpreter process for Lattice")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Interpreter group served by this process
    #[arg(long)]
    group_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout belongs to the interpreters.
    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let group_id = args
        .group_id
        .unwrap_or_else(|| format!("group_{}", uuid::Uuid::new_v4()));
    let factory = InterpreterFactory::with_builtins();
    info!(group = %group_id, classes = ?factory.class_names(), "starting interpreter process");
    let runtime = Arc::new(InterpreterRuntime::new(
        group_id,
        factory,
        RuntimeConfig::default(),
    ));

    let server = RuntimeServer::bind((args.host.as_str(), args.port), runtime)?;
    server.serve()?;

    info!("interpreter process exiting");
    Ok(())
}

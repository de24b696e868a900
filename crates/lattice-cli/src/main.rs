//! Lattice CLI - run code fragments in interpreter processes.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use lattice_core::client::ConnectionPoolConfig;
use lattice_core::interpreter::{Code, Interpreter, InterpreterContext, ResultType};
use lattice_core::process::{
    InterpreterProcess, LaunchConfig, LocalInterpreterProcess, RemoteInterpreterProcess,
};
use lattice_core::{Cluster, InterpreterGroup, Properties, RemoteInterpreter};

#[derive(Parser)]
#[command(name = "lattice")]
#[command(about = "Run code through Lattice interpreter processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scripts with one interpreter, each as its own paragraph
    Run {
        /// Interpreter class name (echo, pool, angular)
        interpreter: String,

        /// Scripts to run in order; `-` reads one from stdin
        #[arg(required = true)]
        scripts: Vec<String>,

        /// Interpreter group id
        #[arg(long, default_value = "default")]
        group: String,

        /// Worker binary to launch (default: locate lattice-worker)
        #[arg(long, conflicts_with = "connect")]
        worker: Option<PathBuf>,

        /// Attach to a running interpreter process at host:port
        #[arg(long)]
        connect: Option<String>,

        /// Note id of the paragraphs
        #[arg(long, default_value = "note")]
        note: String,

        /// Interpreter property as key=value
        #[arg(short = 'D', long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            interpreter,
            scripts,
            group,
            worker,
            connect,
            note,
            properties,
        } => {
            let process = match connect {
                Some(endpoint) => {
                    let (host, port) = parse_endpoint(&endpoint)?;
                    Arc::new(RemoteInterpreterProcess::new(host, port)) as Arc<dyn InterpreterProcess>
                }
                None => {
                    let config = match worker {
                        Some(path) => LaunchConfig::new(path),
                        None => LaunchConfig::worker()?,
                    };
                    Arc::new(LocalInterpreterProcess::new(
                        config.with_arg("--host").with_arg("127.0.0.1").with_arg("--group-id").with_arg(&group),
                    )) as Arc<dyn InterpreterProcess>
                }
            };
            let properties = parse_properties(&properties)?;
            let failed = run(&interpreter, &scripts, &group, &note, properties, process)?;
            if failed > 0 {
                bail!("{} of {} paragraphs failed", failed, scripts.len());
            }
        }
    }

    Ok(())
}

/// Run every script as a paragraph; returns how many failed.
fn run(
    class_name: &str,
    scripts: &[String],
    group_id: &str,
    note_id: &str,
    properties: Properties,
    process: Arc<dyn InterpreterProcess>,
) -> anyhow::Result<usize> {
    let cluster = Cluster::new(ConnectionPoolConfig::default());
    let connection = cluster.connection_pool(group_id, || process);
    let group = Arc::new(InterpreterGroup::new(group_id));
    let interpreter = RemoteInterpreter::new(class_name, properties, group, connection);

    let start = Instant::now();
    interpreter
        .open()
        .with_context(|| format!("failed to open interpreter '{}'", class_name))?;
    debug!(elapsed = ?start.elapsed(), "interpreter opened");

    let mut failed = 0;
    for (i, script) in scripts.iter().enumerate() {
        let script = if script == "-" {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            script.clone()
        };

        let context = InterpreterContext::new(note_id, format!("paragraph_{}", i + 1));
        let result = interpreter.interpret(&script, &context)?;
        match result.code() {
            Code::Error => {
                failed += 1;
                eprintln!("{}", result.message());
            }
            _ if result.result_type() == ResultType::Text => println!("{}", result.message()),
            _ => println!("{}", result),
        }
    }

    interpreter.close()?;
    Ok(failed)
}

fn parse_endpoint(endpoint: &str) -> anyhow::Result<(String, u16)> {
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        bail!("invalid --connect address '{}': expected host:port", endpoint);
    };
    let port = port
        .parse()
        .with_context(|| format!("invalid port in '{}': expected host:port", endpoint))?;
    Ok((host.to_string(), port))
}

fn parse_properties(pairs: &[String]) -> anyhow::Result<Properties> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => Ok((key.to_string(), value.to_string())),
            None => bail!("invalid property '{}': expected KEY=VALUE", pair),
        })
        .collect()
}

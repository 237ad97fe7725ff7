//! kiln CLI
//!
//! Runs commands and requires resources on the local machine or an SSH target

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use kiln_exec::{Connection, LocalConnection, transfer};
use kiln_require::{DownloadCache, Provider, VirtualEnvironment};
use tracing_subscriber::EnvFilter;

mod config;
mod target;

use config::Config;
use target::Target;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Idempotent provisioning over local and SSH connections", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $KILN_CONFIG, ./kiln.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// `local`, `vagrant`, or a target name from the configuration file
    #[arg(long, short, global = true, default_value = "local")]
    target: String,

    /// Vagrant machine name for `--target vagrant`
    #[arg(long, global = true)]
    vagrant_machine: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Target(TargetCommand),
    /// Copy a local path to the remote target
    Push { local: String, remote: String },
    /// Copy a remote path to the local machine
    Pull { remote: String, local: String },
}

/// Commands that work the same on any connection
#[derive(Subcommand)]
enum TargetCommand {
    /// Run a shell command and print its stdout
    Run {
        command: String,
        /// Run inside this virtual environment
        #[arg(long)]
        venv: Option<String>,
        /// Print status, stdout and stderr as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Run a shell command and report whether it succeeded
    Test { command: String },
    /// Make sure a URL is present in the download cache
    Fetch { url: String },
    /// Make sure a virtual environment exists and matches the interpreter
    Venv {
        path: String,
        #[arg(long, default_value = "python3")]
        python: String,
    },
}

fn init_tracing(verbose: u8, config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(level)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run one connection-level subcommand, returning the process exit code
async fn execute<C: Connection>(conn: &C, command: TargetCommand) -> Result<i32> {
    match command {
        TargetCommand::Run {
            command,
            venv,
            json,
        } => {
            let prefixed;
            let conn: &C = match venv {
                Some(path) => {
                    prefixed = conn.with_prefix([VirtualEnvironment::new(path).prefix()]);
                    &prefixed
                }
                None => conn,
            };

            if json {
                let output = conn.run_capturing(&command).await?;
                println!("{}", serde_json::to_string_pretty(&output)?);
                Ok(output.status)
            } else {
                print!("{}", conn.run(&command).await?);
                Ok(0)
            }
        }
        TargetCommand::Test { command } => {
            let ok = conn.test(&command).await?;
            println!("{ok}");
            Ok(if ok { 0 } else { 1 })
        }
        TargetCommand::Fetch { url } => {
            let cache = DownloadCache::new(url);
            let changed = cache.require(conn).await?;
            println!("{} changed={changed}", cache.download_location());
            Ok(0)
        }
        TargetCommand::Venv { path, python } => {
            let venv = VirtualEnvironment::new(path).with_interpreter(python);
            let changed = venv.require(conn).await?;
            println!("{} changed={changed}", venv.location());
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = Config::load_default(cli.config.as_deref())?;
    init_tracing(cli.verbose, &config);

    let target = Target::resolve(&cli.target, cli.vagrant_machine.as_deref(), &config).await?;

    let code = match cli.command {
        Commands::Push { local, remote } => {
            transfer::push(&LocalConnection::new(), target.remote()?, &local, &remote).await?;
            0
        }
        Commands::Pull { remote, local } => {
            transfer::pull(&LocalConnection::new(), target.remote()?, &remote, &local).await?;
            0
        }
        Commands::Target(command) => match &target {
            Target::Local(conn) => execute(conn, command).await?,
            Target::Remote(conn) => execute(conn, command).await?,
        },
    };

    target.close().await?;
    std::io::stdout().flush()?;
    std::process::exit(code);
}

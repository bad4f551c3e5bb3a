mod commands;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Rampart -- declarative MCP gateway for sandboxed shell tools.
#[derive(Parser, Debug)]
#[command(name = "rampart", version, about)]
struct Cli {
    /// Increase logging verbosity (RUST_LOG=debug)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the tool catalog over MCP (stdio by default)
    Serve {
        /// Path to the YAML tool catalog
        #[arg(long, short)]
        config: PathBuf,

        /// Shell for executing commands (overrides the catalog's run.shell)
        #[arg(long)]
        shell: Option<String>,

        /// Serve over HTTP on this port instead of stdio
        #[arg(long)]
        http: Option<u16>,
    },

    /// Validate a tool catalog without starting the server
    Validate {
        /// Path to the YAML tool catalog
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Execute a single tool directly, bypassing the MCP transport
    Exec {
        /// Path to the YAML tool catalog
        #[arg(long, short)]
        config: PathBuf,

        /// Shell for executing commands (overrides the catalog's run.shell)
        #[arg(long)]
        shell: Option<String>,

        /// Tool name
        tool: String,

        /// Tool arguments as key=value pairs
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Generate shell completions for bash, zsh, fish, elvish, or powershell
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn main() {
    // Top-level fault isolation: a panic anywhere below becomes a clean
    // non-zero exit instead of an unwinding crash.
    let outcome = std::panic::catch_unwind(run);
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            eprintln!("rampart: {err:#}");
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("rampart: fatal internal error");
            std::process::exit(2);
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging goes to stderr: stdout belongs to the stdio transport and to
    // direct-exec output.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { config, shell, http } => runtime()?.block_on(commands::serve::run(
            &config,
            shell.as_deref(),
            http,
        )),
        Commands::Validate { config } => commands::validate::run(&config),
        Commands::Exec {
            config,
            shell,
            tool,
            args,
        } => runtime()?.block_on(commands::exec::run(&config, shell.as_deref(), &tool, &args)),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to start async runtime: {e}"))
}

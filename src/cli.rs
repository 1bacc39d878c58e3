//! Command surface for host programs.
//!
//! A host application embeds the freezer in its own binary:
//!
//! ```rust,ignore
//! fn main() -> std::process::ExitCode {
//!     let mut registry = GeneratorRegistry::new();
//!     registry.register("post", || (1..=2).map(|id| Binding::new().with("id", id)));
//!     site_freezer::cli::main_with(Blog::load(), registry)
//! }
//! ```
//!
//! ```text
//! blog freeze --output build --base-url https://example.com/
//! blog urls
//! blog gen-config > freezer.toml
//! ```
//!
//! Exit code is 0 on success and [`FreezeError::exit_code`] otherwise.

use crate::app::Application;
use crate::config::{self, load_config};
use crate::error::FreezeError;
use crate::freezer::Freezer;
use crate::generators::GeneratorRegistry;
use crate::output;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Freeze a dynamic web application into static files")]
#[command(long_about = "\
Freeze a dynamic web application into static files

Every URL the routing table can produce is dispatched in-process and its
response body written under the output directory:

  /                 → index.html
  /post/1           → post/1/index.html
  /about (text/plain) → about/index.txt
  /feed.xml         → feed.xml

Files left over from earlier runs are removed unless listed in
destination_ignore.

Run 'gen-config' to generate a documented freezer.toml.")]
pub struct Cli {
    /// Config file
    #[arg(long, default_value = "freezer.toml", global = true)]
    pub config: PathBuf,

    /// Log debug output (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture every URL and write the static site
    Freeze(FreezeArgs),
    /// List the URLs a freeze would capture, without dispatching
    Urls,
    /// Print a stock freezer.toml with all options documented
    GenConfig,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct FreezeArgs {
    /// Output directory (overrides output_root)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Base URL the site will be served from (overrides base_url)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Also write the run manifest as JSON to this path
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Print only the final summary
    #[arg(short, long)]
    pub quiet: bool,
}

/// Install the stderr log subscriber. Later calls are no-ops.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parse the process arguments, run the command and map the result to an
/// exit code.
pub fn main_with<A: Application>(app: A, registry: GeneratorRegistry) -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match execute(cli, app, registry) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

pub fn execute<A: Application>(
    cli: Cli,
    app: A,
    registry: GeneratorRegistry,
) -> Result<(), FreezeError> {
    match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(())
        }
        Command::Urls => {
            let config = load_config(&cli.config)?;
            let freezer = Freezer::new(app, registry, config);
            output::print_url_list(&freezer.enumerate_urls()?);
            Ok(())
        }
        Command::Freeze(args) => freeze(&cli.config, args, app, registry),
    }
}

fn freeze<A: Application>(
    config_path: &std::path::Path,
    args: FreezeArgs,
    app: A,
    registry: GeneratorRegistry,
) -> Result<(), FreezeError> {
    let mut config = load_config(config_path)?;
    if let Some(output) = args.output {
        config.output_root = output;
    }
    if args.base_url.is_some() {
        config.base_url = args.base_url;
    }
    config.validate()?;

    let (tx, rx) = std::sync::mpsc::channel();
    let quiet = args.quiet;
    let printer = std::thread::spawn(move || {
        for event in rx {
            if quiet {
                continue;
            }
            for line in output::format_freeze_event(&event) {
                println!("{}", line);
            }
        }
    });

    let mut freezer = Freezer::new(app, registry, config).with_events(tx);
    let result = freezer.run();
    // Dropping the freezer closes the channel so the printer can finish.
    drop(freezer);
    if printer.join().is_err() {
        warn!("progress printer panicked");
    }
    let manifest = result?;

    if let Some(path) = &args.manifest {
        manifest
            .save(path)
            .map_err(|e| FreezeError::write(path, e))?;
    }
    output::print_manifest_summary(&manifest);
    Ok(())
}

mod client;
mod extract;
mod lifecycle;
mod process;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use nodepack_installer::{
    default_global_prefix, install, install_at, Externals, InstallOptions, InstallSummary,
    ProjectLayout,
};

use crate::client::{RegistryClient, DEFAULT_REGISTRY};
use crate::extract::TarballExtractor;
use crate::lifecycle::ShellLifecycle;

#[derive(Parser, Debug)]
#[command(name = "nodepack")]
#[command(about = "Nested dependency tree installer", long_about = None)]
struct Cli {
    #[arg(long)]
    registry: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the manifest's dependencies, or the given specs.
    Install {
        specs: Vec<String>,
        #[arg(long)]
        global: bool,
        #[arg(long)]
        production: bool,
        #[arg(long)]
        dev: bool,
        #[arg(long)]
        npat: bool,
        #[arg(long)]
        unicode: bool,
        #[arg(long)]
        prefix: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print the resolved install locations.
    Doctor,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Install {
            specs,
            global,
            production,
            dev,
            npat,
            unicode,
            prefix,
            concurrency,
        } => {
            let defaults = InstallOptions::default();
            let options = InstallOptions {
                global,
                production,
                dev,
                unicode,
                npat,
                concurrency: concurrency.unwrap_or(defaults.concurrency),
            };
            let client = RegistryClient::new(
                cli.registry
                    .unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
            );
            let externals = Externals {
                fetcher: &client,
                extractor: &TarballExtractor,
                lifecycle: &ShellLifecycle,
            };

            let summary = match prefix {
                Some(target) => install_at(&options, &externals, &target, &specs)?,
                None => install(&options, &externals, &specs)?,
            };
            print_summary(&options, &summary);
        }
        Commands::Doctor => {
            let project = std::env::current_dir()?;
            let layout = ProjectLayout::new(&project);
            println!("project: {}", layout.root().display());
            println!("modules: {}", layout.modules_dir().display());
            println!("staging: {}", layout.staging_dir().display());
            println!("lockfile: {}", layout.lockfile_path().display());
            println!("global prefix: {}", default_global_prefix()?.display());
        }
    }

    Ok(())
}

fn print_summary(options: &InstallOptions, summary: &InstallSummary) {
    if summary.is_noop() {
        println!("up to date");
        return;
    }

    let marker = if options.unicode { "•" } else { "*" };
    for action in &summary.actions {
        println!("{marker} {} {}", action.kind.as_str(), action.label());
    }
    println!(
        "added {}, removed {}, updated {}, moved {}",
        summary.added, summary.removed, summary.updated, summary.moved
    );
}

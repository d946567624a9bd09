use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tsumiki::{Config, Mode, Site};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Project root.
    #[arg(long, global = true, default_value = ".")]
    root: Utf8PathBuf,

    /// Configuration directory, relative to the root.
    #[arg(long, global = true, default_value = "config")]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the full build plan for deployment.
    Build {
        /// Rebuild everything and emit source maps instead.
        #[arg(long)]
        development: bool,
    },
    /// Remove the output tree.
    Clean,
    /// Clean, then build for deployment.
    CleanBuild {
        #[arg(long)]
        development: bool,
    },
    /// Build, serve and rebuild on changes.
    #[cfg(feature = "live")]
    Watch,
    /// Lint scripts, stylesheets and pages.
    Lint,
}

fn mode(development: bool) -> Mode {
    match development {
        true => Mode::Development,
        false => Mode::Production,
    }
}

fn run(args: Args) -> anyhow::Result<bool> {
    let config = Config::load(&args.root, &args.config)?;
    let site = Site::new(config)?;

    match args.command {
        Command::Build { development } => {
            let report = site.build(mode(development))?;
            println!("{report}");
        }
        Command::Clean => {
            site.clean()?;
        }
        Command::CleanBuild { development } => {
            let report = site.clean_build(mode(development))?;
            println!("{report}");
        }
        #[cfg(feature = "live")]
        Command::Watch => {
            site.watch()?;
        }
        Command::Lint => {
            let report = site.lint();
            for violation in report.violations() {
                println!("{violation}");
            }
            return Ok(report.is_clean());
        }
    }

    Ok(true)
}

fn main() -> ExitCode {
    let args = Args::parse();
    tsumiki::logging::init("info");

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

//! ipapatch - inject dylib loads into iOS apps.
//!
//! Patches the main executable and every plugin of an IPA/TIPA archive or an
//! `.app` bundle so they load the given libraries, then copies the libraries
//! into the app's `Frameworks` directory.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ipapatch::{AssumeYes, Confirm, Error, InjectedLibrary, IpaPatch, TracingReporter};

/// Inject dylib load commands into iOS apps and re-sign them ad-hoc.
#[derive(Parser, Debug)]
#[command(name = "ipapatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input IPA, TIPA or .app bundle
    #[arg(short, long)]
    input: PathBuf,

    /// Write the patched archive here (default: overwrite input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overwrite the input (implicit if --output is not set)
    #[arg(short = 'f', long)]
    inplace: bool,

    /// Assume yes to all prompts
    #[arg(short, long)]
    yes: bool,

    /// Dylib to inject and copy into Frameworks (repeatable)
    #[arg(short, long = "dylib")]
    dylib: Vec<PathBuf>,

    /// Only inject into plugins (.appex), not the main executable
    #[arg(long)]
    plugins_only: bool,

    /// Emit LC_LOAD_DYLIB instead of LC_LOAD_WEAK_DYLIB
    #[arg(long)]
    strong: bool,

    /// Library injected as zxPluginsInject.dylib when no --dylib is given
    #[arg(long, env = "IPAPATCH_DEFAULT_DYLIB")]
    default_dylib: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,
}

/// Asks on the terminal.
struct Prompt;

impl Confirm for Prompt {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N] ", prompt);
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if !cli.input.exists() {
        bail!("input path does not exist: {}", cli.input.display());
    }
    for dylib in cli.dylib.iter().filter(|d| !d.as_os_str().is_empty()) {
        if !dylib.exists() {
            bail!("path provided to -d/--dylib doesn't exist: {}", dylib.display());
        }
    }

    let mut patcher = IpaPatch::new()
        .plugins_only(cli.plugins_only)
        .weak(!cli.strong)
        .reporter(TracingReporter);
    for dylib in &cli.dylib {
        patcher = patcher.dylib(dylib);
    }
    if let Some(path) = &cli.default_dylib {
        patcher = patcher.default_library(InjectedLibrary::default_from_path(path));
    }

    match (&cli.output, cli.inplace) {
        (Some(output), false) => {
            patcher = patcher.output(output);
            patcher = if cli.yes {
                patcher.confirm(AssumeYes)
            } else {
                patcher.confirm(Prompt)
            };
        }
        (Some(_), true) => info!("--inplace specified, will overwrite input"),
        (None, _) => info!("--inplace assumed (no --output specified), will overwrite input"),
    }

    let report = match patcher.patch(&cli.input) {
        Ok(report) => report,
        Err(Error::Declined(path)) => {
            info!("not overwriting {}", path.display());
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to patch {}", cli.input.display()))
        }
    };

    info!(
        patched = report.patched.len(),
        skipped = report.skipped.len(),
        "done"
    );
    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

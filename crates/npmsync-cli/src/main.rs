#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

mod logging;

use clap::Parser;
use miette::{miette, IntoDiagnostic, Result};
use npmsync_core::pkg::{Analysis, Platform, ProgressEvent, SyncReport};
use npmsync_core::{Config, SyncEngine, SyncOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "npmsync")]
#[command(author, version, about = "Keep an offline npm mirror installable", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Registry base URL (overrides NPMSYNC_REGISTRY)
    #[arg(long, global = true, value_name = "URL")]
    registry: Option<String>,

    /// Store root directory (overrides NPMSYNC_STORE)
    #[arg(long, global = true, value_name = "PATH")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Show which versions are missing from the store
    Plan {
        #[command(flatten)]
        opts: SyncArgs,
    },

    /// Download every missing version into the store
    Sync {
        #[command(flatten)]
        opts: SyncArgs,

        /// Extra passes over failed downloads
        #[arg(long, default_value_t = 1)]
        retries: u32,
    },
}

#[derive(clap::Args, Debug, Default)]
struct SyncArgs {
    /// Also fetch the newest stable version of every cached package
    #[arg(long)]
    update_latest: bool,

    /// Complete each cached version with the latest patch and minor of its series
    #[arg(long)]
    siblings: bool,

    /// Follow devDependencies
    #[arg(long)]
    include_dev: bool,

    /// Follow peerDependencies
    #[arg(long)]
    include_peer: bool,

    /// Follow optionalDependencies
    #[arg(long)]
    include_optional: bool,

    /// Dependency layers to expand below the cached packages
    #[arg(long, value_name = "N")]
    max_depth: Option<u32>,

    /// Parallel registry requests and downloads (1-50)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Target platform for native binaries, e.g. linux-x64-gnu (repeatable)
    #[arg(long = "platform", value_name = "OS-ARCH[-LIBC]", value_parser = parse_platform)]
    platforms: Vec<Platform>,
}

impl SyncArgs {
    /// Flags only switch features on; env values stay when a flag is absent.
    fn apply(&self, mut options: SyncOptions) -> SyncOptions {
        options.update_to_latest |= self.update_latest;
        options.complete_sibling_versions |= self.siblings;
        options.include_dev |= self.include_dev;
        options.include_peer |= self.include_peer;
        options.include_optional |= self.include_optional;
        if let Some(depth) = self.max_depth {
            options.max_depth = depth;
        }
        if let Some(concurrency) = self.concurrency {
            options.concurrency = concurrency;
        }
        if !self.platforms.is_empty() {
            options.target_platforms.clone_from(&self.platforms);
        }
        options
    }
}

fn parse_platform(text: &str) -> Result<Platform, String> {
    Platform::parse(text).ok_or_else(|| format!("expected OS-ARCH[-LIBC], got '{text}'"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let mut config = Config::from_env().into_diagnostic()?;
    if let Some(url) = &cli.registry {
        config = config.with_registry(url).into_diagnostic()?;
    }
    if let Some(root) = &cli.store {
        config = config.with_store_root(root.clone());
    }
    debug!(registry = %config.registry_url, store = %config.store_root.display(), "config loaded");

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(log_progress(rx));

    let (opts, retries) = match &cli.command {
        Commands::Plan { opts } => (opts, None),
        Commands::Sync { opts, retries } => (opts, Some(*retries)),
    };
    let options = opts.apply(config.options.clone());

    // The engine holds the last sender; once it drops the logger drains and exits.
    let outcome = {
        let engine = SyncEngine::from_config(&config)
            .into_diagnostic()?
            .with_progress(Arc::new(tx));
        match retries {
            None => {
                let analysis = engine.plan(&options).await.into_diagnostic()?;
                print_plan(&analysis, cli.json)
            }
            Some(retries) => {
                let report = engine
                    .with_retries(retries)
                    .sync(&options)
                    .await
                    .into_diagnostic()?;
                print_report(&report, cli.json)?;
                let failed = report.summary.failed;
                if failed > 0 {
                    Err(miette!("{failed} download(s) failed"))
                } else {
                    Ok(())
                }
            }
        }
    };

    progress.await.into_diagnostic()?;
    outcome
}

async fn log_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::LayerStarted { depth, targets } => {
                debug!(depth, targets, "layer started");
            }
            ProgressEvent::LayerFinished { depth, planned } => {
                info!(depth, planned, "layer finished");
            }
            ProgressEvent::DownloadStarted { total } => {
                info!(total, "downloading");
            }
            ProgressEvent::ItemCompleted {
                name,
                version,
                ok,
                completed,
                total,
            } => {
                debug!(%name, %version, ok, completed, total, "download finished");
            }
        }
    }
}

fn print_plan(analysis: &Analysis, json: bool) -> Result<()> {
    if json {
        let json = serde_json::to_string_pretty(analysis).into_diagnostic()?;
        println!("{json}");
        return Ok(());
    }

    let mut out = io::stdout().lock();
    for item in &analysis.plan {
        let line = match &item.required_by {
            Some(parent) => format!("{}@{}  {}  (required by {parent})\n", item.name, item.version, item.reason),
            None => format!("{}@{}  {}\n", item.name, item.version, item.reason),
        };
        w(&mut out, &line)?;
    }
    for target in &analysis.unresolved {
        w(&mut out, &format!("unresolved: {target}\n"))?;
    }
    w(
        &mut out,
        &format!(
            "{} to download ({} layers, {} packuments fetched)\n",
            analysis.plan.len(),
            analysis.layers_processed,
            analysis.packuments_fetched
        ),
    )
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        let mut value = serde_json::to_value(report).into_diagnostic()?;
        let failures: Vec<_> = report
            .failures()
            .map(|r| {
                let (code, message) = r
                    .error()
                    .map(|e| (e.code(), e.to_string()))
                    .unwrap_or_default();
                serde_json::json!({
                    "name": r.name,
                    "version": r.version,
                    "code": code,
                    "message": message,
                })
            })
            .collect();
        value["failures"] = serde_json::Value::from(failures);
        let json = serde_json::to_string_pretty(&value).into_diagnostic()?;
        println!("{json}");
        return Ok(());
    }

    let mut out = io::stdout().lock();
    for failure in report.failures() {
        if let Some(err) = failure.error() {
            w(&mut out, &format!("failed: {}  {err}\n", failure.key()))?;
        }
    }
    w(
        &mut out,
        &format!(
            "{} downloaded, {} failed, {} bytes\n",
            report.summary.succeeded, report.summary.failed, report.summary.bytes
        ),
    )
}

fn w(out: &mut impl Write, s: &str) -> Result<()> {
    out.write_all(s.as_bytes()).into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_options() {
        let cli = Cli::parse_from([
            "npmsync",
            "plan",
            "--siblings",
            "--max-depth",
            "2",
            "--platform",
            "linux-x64-gnu",
            "--platform",
            "darwin-arm64",
        ]);
        let Commands::Plan { opts } = cli.command else {
            panic!("expected plan");
        };
        let options = opts.apply(SyncOptions::default());
        assert!(options.complete_sibling_versions);
        assert!(!options.update_to_latest);
        assert_eq!(options.max_depth, 2);
        assert_eq!(options.concurrency, SyncOptions::default().concurrency);
        assert_eq!(options.target_platforms.len(), 2);
    }

    #[test]
    fn test_absent_flags_keep_env_values() {
        let env = SyncOptions::default().with_update_to_latest(true).with_max_depth(3);
        let options = SyncArgs::default().apply(env.clone());
        assert_eq!(options, env);
    }

    #[test]
    fn test_bad_platform_rejected() {
        let parsed = Cli::try_parse_from(["npmsync", "plan", "--platform", "nonsense"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_sync_retries_default() {
        let cli = Cli::parse_from(["npmsync", "--json", "sync", "--concurrency", "8"]);
        assert!(cli.json);
        let Commands::Sync { opts, retries } = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(retries, 1);
        assert_eq!(opts.concurrency, Some(8));
    }
}

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use git_backup::{
    Config, ListingReport, PlanEntry, PlannedAction, RunPhases, Runner, SyncMode, SyncSummary,
};

#[derive(Parser)]
#[command(name = "git-backup")]
#[command(about = "Back up every repository you own on GitHub and Bitbucket")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: PathBuf,

    /// Refresh the repository catalog from the providers
    #[arg(short, long)]
    list: bool,

    /// Sync local mirrors from the catalog
    #[arg(short, long)]
    sync: bool,

    /// Which sync phases to run
    #[arg(short, long, value_enum, default_value_t = ModeArg::Full)]
    mode: ModeArg,

    /// Catalog file (overrides CATALOG_PATH)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Repositories synced in parallel (overrides MAX_PARALLEL)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    jobs: Option<u16>,

    /// Show what sync would do without running git
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy)]
enum ModeArg {
    /// Materialize missing mirrors, then fetch all of them
    Full,
    /// Only create missing mirrors
    Materialize,
    /// Only fetch existing mirrors
    Refresh,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => SyncMode::Full,
            ModeArg::Materialize => SyncMode::MaterializeOnly,
            ModeArg::Refresh => SyncMode::RefreshOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting git-backup v{}", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = Config::load(&cli.config)?;
    if let Some(catalog) = &cli.catalog {
        config.catalog_path = Some(catalog.to_string_lossy().into_owned());
    }
    if let Some(jobs) = cli.jobs {
        config.max_parallel = usize::from(jobs);
    }

    // Neither phase named means both
    let (list, sync) = match (cli.list, cli.sync) {
        (false, false) => (true, true),
        phases => phases,
    };
    let mode = SyncMode::from(cli.mode);

    let runner = Runner::from_config(config)?;
    debug!("Active providers: {:?}", runner.active_providers());

    if cli.dry_run {
        if list {
            print_listing(&runner.refresh_listing().await?);
        }
        if sync {
            print_plan(&runner.plan_content(mode).await?);
        }
        return Ok(0);
    }

    watch_for_interrupt(runner.interrupt_flag());

    let report = runner.run(RunPhases { list, sync, mode }).await?;

    if let Some(listing) = &report.listing {
        print_listing(listing);
    }
    if let Some(summary) = &report.sync {
        print_summary(summary, cli.verbose);
    }

    Ok(report.exit_code())
}

/// First Ctrl+C stops new repositories from starting; a second one exits
fn watch_for_interrupt(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to listen for Ctrl+C");
            return;
        }
        warn!("Interrupted, finishing in-flight repositories (Ctrl+C again to abort)");
        flag.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn print_listing(report: &ListingReport) {
    println!("🔍 Repository listing");
    for listing in &report.providers {
        match &listing.result {
            Ok(count) => println!("   ✅ {}: {} repositories", listing.provider, count),
            Err(e) => println!("   ⚠️  {}: {}", listing.provider, e),
        }
    }
    println!("   📝 Catalogued: {}", report.written);
}

fn print_plan(plan: &[PlanEntry]) {
    println!("\n🔍 Dry run mode - planned repository operations");

    for entry in plan {
        match &entry.action {
            PlannedAction::Skip(reason) => println!(
                "   ⏭️  {} ({})",
                entry.descriptor.key(),
                reason
            ),
            action => println!(
                "   📥 {}: {} -> {}",
                action.as_str(),
                entry.descriptor.key(),
                entry.local_path.display()
            ),
        }
    }

    let skipped = plan
        .iter()
        .filter(|entry| matches!(entry.action, PlannedAction::Skip(_)))
        .count();
    println!("\n📈 Summary:");
    println!("   📊 Repositories in catalog: {}", plan.len());
    println!("   🔄 Would be synced: {}", plan.len() - skipped);
    println!("   ⏭️  Would be skipped: {}", skipped);
}

fn print_summary(summary: &SyncSummary, verbose: bool) {
    println!("\n🎉 Synchronization Complete!");
    println!("   📊 Total repositories: {}", summary.total);
    println!("   ✅ Successful: {}", summary.succeeded);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏭️  Skipped: {}", summary.skipped);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    let interrupted = summary.interrupted();
    if interrupted > 0 {
        println!("\n⚠️  Interrupted: {} repositories were not synced", interrupted);
    }

    if summary.has_failures() {
        println!("\n🔍 Failed repositories:");
        for outcome in summary.failures() {
            match (&outcome.error, verbose) {
                (Some(error), true) => println!(
                    "   ❌ {} ({}): {}",
                    outcome.descriptor.key(),
                    outcome.phase.as_str(),
                    error
                ),
                _ => println!("   ❌ {}", outcome.descriptor.key()),
            }
        }
        if !verbose {
            println!("\n💡 Tip: rerun with --verbose to see each failure");
        }
    }
}

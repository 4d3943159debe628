use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vaultview::config::{CompletionOrdering, SessionConfig};
use vaultview::manager::{self, SystemProfile};
use vaultview::server::VaultServer;
use vaultview::{HistoryRetention, VaultDb, DEFAULT_HISTORY_MAX_ITEMS, DEFAULT_HISTORY_MAX_SIZE};

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:9100")]
    addr: String,

    /// Version log; templates are kept next to it
    #[clap(long, default_value = "vault.dat")]
    store: PathBuf,

    /// Historical versions retained per record by compaction
    #[clap(long, default_value_t = DEFAULT_HISTORY_MAX_ITEMS)]
    history_limit: usize,

    /// Bytes of field content retained per record's history by compaction
    #[clap(long, default_value_t = DEFAULT_HISTORY_MAX_SIZE)]
    history_max_size: u64,

    /// Seconds between background compactions (0 disables them)
    #[clap(long, default_value = "600")]
    compaction_interval_secs: u64,

    /// How overlapping loads on one session are applied
    #[clap(long, value_enum, default_value_t = CompletionOrdering::LatestRequest)]
    ordering: CompletionOrdering,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vaultview=info"));
    tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_level(true)
    .init();

    let args = Args::parse();
    let profile = SystemProfile::detect();
    info!(
        cores = profile.logical_cores,
        workers = profile.worker_threads,
        blocking = profile.blocking_threads,
        strict_durability = profile.strict_durability,
        "resource profile"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(profile.worker_threads)
    .max_blocking_threads(profile.blocking_threads)
    .enable_all()
    .build();

    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(args, profile)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "node stopped");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(args: Args, profile: SystemProfile) -> Result<(), Box<dyn std::error::Error>> {
    let db = Arc::new(VaultDb::open(&args.store, profile.strict_durability)?);

    if args.compaction_interval_secs > 0 {
        let retention = HistoryRetention { max_items: args.history_limit, max_size: args.history_max_size };
        manager::start_compaction_thread(db.clone(), retention, Duration::from_secs(args.compaction_interval_secs));
    }

    let listener = TcpListener::bind(&args.addr).await?;
    let server = VaultServer::new(db, SessionConfig::with_ordering(args.ordering));

    tokio::select! {
        _ = server.run(listener) => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutting down");
        }
    }
    Ok(())
}

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use salon_ledger::clock::SystemClock;
use salon_ledger::config::EngineConfig;
use salon_ledger::engine::Engine;
use salon_ledger::store::JournaledStore;

/// Replay the journal, settle any ledger rows a crash left behind and compact
/// the journal when it has grown past the threshold.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = EngineConfig::from_env()?;
    salon_ledger::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let journal = config.journal_path();
    info!("salon-ledger maintenance");
    info!("  journal: {}", journal.display());
    info!("  slot granularity: {} min", config.slot_granularity_minutes);
    info!("  compact threshold: {}", config.compact_threshold);

    let store = Arc::new(JournaledStore::open(&journal)?);
    let engine = Engine::new(store.clone(), Arc::new(SystemClock))
        .with_slot_granularity(config.slot_granularity_minutes)?;

    let report = engine.reconcile_ledgers().await?;
    let compacted = store.compact_if_needed(config.compact_threshold).await?;

    let summary = json!({
        "journal": journal.display().to_string(),
        "rows": store.stats(),
        "reconciled": report,
        "stale_ledgers": engine.stale_ledger_count(),
        "compacted": compacted,
    });
    info!("{summary}");
    Ok(())
}

use std::sync::Arc;

use backend::{
    artifact::LocalArtifactStore,
    chain::ChainRunner,
    config::AppConfig,
    db::Db,
    dispatcher::ProviderSet,
    ledger::{
        QuotaLedger,
        model::{ProviderQuota, ResetPolicy},
        repository_sqlx::SqlxUsageRepository,
    },
    metrics::counters::Counters,
    session::{SessionController, model::SessionRequest},
    sinks::{ChannelEventSink, ScraperEvent, SqlxProgressSink},
};
use clap::Parser;
use common::logger::{TraceId, init_tracing, record_outcome, request_span};
use providers::{Provider, fusion::FusionProvider, places::PlacesProvider, serp::SerpProvider};
use tokio::sync::mpsc;
use tracing::Instrument;

#[derive(Debug, Parser)]
#[clap(name = "leadcast", version)]
struct Cli {
    /// Search keyword, e.g. "dentist".
    #[clap(long)]
    keyword: String,

    /// Human-readable region the cities belong to.
    #[clap(long)]
    location: String,

    /// Target number of leads.
    #[clap(long, default_value_t = 50)]
    limit: u32,

    /// City work list (comma-separated; region expansion runs upstream).
    #[clap(long, value_delimiter = ',', required = true)]
    cities: Vec<String>,

    /// Channel the host pushes realtime updates to.
    #[clap(long, default_value = "cli")]
    channel_id: String,

    /// Opaque hint forwarded to the upstream city-expansion step.
    #[clap(long)]
    is_reverse: bool,
}

fn env_credits(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Builds the adapter set from whatever API keys the environment carries,
/// with one ledger entry per configured provider.
fn build_providers() -> anyhow::Result<(ProviderSet, Vec<ProviderQuota>)> {
    let mut adapters: Vec<Arc<dyn Provider>> = Vec::new();
    let mut quotas = Vec::new();

    if let Ok(key) = std::env::var("SERP_API_KEY") {
        adapters.push(Arc::new(SerpProvider::new(key)?));
        quotas.push(ProviderQuota::new(
            "serp",
            env_credits("SERP_CREDITS", 250),
            ResetPolicy::Monthly,
        ));
    }

    if let Ok(key) = std::env::var("PLACES_API_KEY") {
        adapters.push(Arc::new(PlacesProvider::new(key)?));
        quotas.push(ProviderQuota::new(
            "places",
            env_credits("PLACES_CREDITS", 1_000),
            ResetPolicy::Monthly,
        ));
    }

    if let Ok(key) = std::env::var("FUSION_API_KEY") {
        adapters.push(Arc::new(FusionProvider::new(key)?));
        quotas.push(ProviderQuota::new(
            "fusion",
            env_credits("FUSION_CREDITS", 500),
            ResetPolicy::Daily,
        ));
    }

    if adapters.is_empty() {
        anyhow::bail!(
            "no provider configured; set SERP_API_KEY, PLACES_API_KEY, or FUSION_API_KEY"
        );
    }

    Ok((ProviderSet::new(adapters), quotas))
}

/// Connects the DB, runs migrations, and hydrates the ledger with any
/// usage persisted by earlier runs.
async fn init_ledger(db: &Db, quotas: Vec<ProviderQuota>) -> anyhow::Result<Arc<QuotaLedger>> {
    let repo = Arc::new(SqlxUsageRepository::new(db.pool.clone()));
    let ledger = Arc::new(QuotaLedger::new(quotas).with_repository(repo));

    ledger.hydrate().await?;
    Ok(ledger)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    let cli = Cli::parse();
    let cfg = AppConfig::from_env();

    let (providers, quotas) = build_providers()?;

    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let ledger = init_ledger(&db, quotas).await?;
    let progress = Arc::new(SqlxProgressSink::new(db.pool.clone()));
    let artifacts = Arc::new(LocalArtifactStore::new(cfg.artifact_dir.clone()));

    // Drain events to the log; a real host would bridge this channel to
    // its push transport.
    let (event_tx, mut event_rx) = mpsc::channel::<ScraperEvent>(256);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::info!(
                target: "events",
                name = event.payload.name(),
                correlation_id = %event.correlation_id,
                "scraper event"
            );
        }
    });
    let events = Arc::new(ChannelEventSink::new(event_tx));

    let controller = SessionController::new(
        cfg,
        ledger,
        providers,
        progress,
        events,
        artifacts,
        Counters::default(),
    );
    let runner = ChainRunner::new(controller);

    let correlation_id = TraceId::generate();
    let span = request_span(correlation_id.as_str());
    tracing::info!(correlation_id = %correlation_id, "starting scrape request");

    let mut request = SessionRequest::new(
        cli.keyword,
        cli.location,
        cli.limit,
        correlation_id.as_str(),
        cli.channel_id,
        cli.cities,
    );
    request.is_reverse = cli.is_reverse;

    let report = runner.run(request).instrument(span.clone()).await?;

    let sessions = runner
        .controller()
        .counters()
        .sessions_chained
        .load(std::sync::atomic::Ordering::Relaxed) as u32
        + 1;
    record_outcome(&span, sessions, report.leads_count);

    tracing::info!(
        state = ?report.state,
        leads = report.leads_count,
        elapsed_s = report.completed_in_s,
        "request finished"
    );

    println!("{}", report.message);
    if let Some(url) = &report.artifact_url {
        println!("{url}");
    }

    Ok(())
}

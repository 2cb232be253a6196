mod catalog;
mod config;
mod error;
mod filters;
mod matching;
mod notify;
mod options;
mod portal;
mod sources;
mod store;
mod watcher;

use anyhow::bail;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use notify::Notifier;
use store::SeenStore;
use watcher::WatchService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env()?;
    let mode = std::env::args().nth(1).unwrap_or_else(|| "watch".to_string());

    match mode.as_str() {
        "discover" => run_discover(&cfg).await,
        "scan" => run_scan(&cfg).await,
        "watch" => {
            let sources = cfg.sources();
            let notifier = Notifier::from_config(&cfg.notifier, cfg.webhook_url.as_deref());
            let store = SeenStore::new(cfg.seen_path.clone());
            WatchService::new(cfg, sources, notifier, store).run().await
        }
        other => bail!("unknown mode '{other}' (expected discover, scan, or watch)"),
    }
}

/// List the entities each source can see, without probing for options.
async fn run_discover(cfg: &Config) -> anyhow::Result<()> {
    for source in cfg.sources() {
        let entities = source.discover().await?;
        println!("\n==============================");
        println!("{}: {} entities", source.name(), entities.len());
        println!("==============================");
        for entity in &entities {
            println!("{} ({})", entity.display_name, entity.slug);
            if !entity.location_hint.is_empty() {
                println!("  {}", entity.location_hint);
            }
        }
    }
    Ok(())
}

/// One full scan cycle, printed and forgotten: no seen-store, no alerts.
async fn run_scan(cfg: &Config) -> anyhow::Result<()> {
    let policy = cfg.window_policy();
    let year = cfg.academic_year();

    let mut all = Vec::new();
    for source in cfg.sources() {
        match source.scan(&policy, &year).await {
            Ok(options) => {
                info!(source = source.name(), count = options.len(), "scan complete");
                all.extend(options);
            }
            Err(err) => {
                tracing::error!(source = source.name(), error = %err, "scan failed");
            }
        }
    }

    let mut matches = filters::apply_filters(all, &cfg.filters);
    options::rank(&mut matches);

    println!("\n==============================");
    println!("MATCHING OPTIONS: {}", matches.len());
    println!("==============================\n");
    for option in &matches {
        for line in option.alert_lines() {
            println!("{line}");
        }
        println!();
    }
    Ok(())
}

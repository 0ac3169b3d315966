use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use feed_engine::core::{EngineSettings, FeedCore, FeedEvent, SnapshotStore};
use feed_engine::metrics::TracingMetrics;
use feed_engine::player::SimulatedFactory;
use feed_engine::source::{CatalogSource, FeedSource, HttpSource};
use feed_engine::{http, FeedBroadcast};
use feed_proto::config::Config;
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = feed_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("reelfeed.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG wins; otherwise info for the engine with HTTP client internals quieted.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("reelfeed log: {}", log_path.display());
    tracing::info!("reelfeed starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("config unreadable ({}), using defaults", e);
            Config::default()
        }
    };
    let settings = EngineSettings::from_config(&config)?;

    // ── Feed source ──────────────────────────────────────────────────────────
    let source: Arc<dyn FeedSource> = match &config.source.remote_url {
        Some(url) => {
            tracing::info!("feed source: {}", url);
            Arc::new(HttpSource::new(url.clone()))
        }
        None => {
            let path = &config.source.catalog_file;
            let catalog = CatalogSource::from_file(path)
                .with_context(|| format!("reading feed catalog {}", path.display()))?;
            Arc::new(catalog)
        }
    };

    let factory = SimulatedFactory::new(
        Duration::from_millis(config.player.simulated_load_ms),
        Duration::from_millis(config.player.simulated_jitter_ms),
        config.player.fail_schemes.clone(),
    );

    // ── Channels ─────────────────────────────────────────────────────────────
    let (broadcast_tx, mut broadcast_rx) = broadcast::channel::<FeedBroadcast>(1024);
    let (event_tx, event_rx) = mpsc::channel::<FeedEvent>(1024);

    // ── Build FeedCore ───────────────────────────────────────────────────────
    let mut core = FeedCore::new(
        settings,
        Box::new(factory),
        source,
        Arc::new(TracingMetrics),
        &event_tx,
        broadcast_tx,
    );
    core.bootstrap().await?;
    let snapshot = core.snapshot_store();

    // ── HTTP server ──────────────────────────────────────────────────────────
    if config.http.enabled {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            snapshot.clone(),
            event_tx.clone(),
        );
    }

    tokio::spawn(async move {
        while let Ok(msg) = broadcast_rx.recv().await {
            if let FeedBroadcast::ItemsAppended { added, total } = msg {
                eprintln!("+{} item(s), {} total", added, total);
            }
        }
    });

    // ── stdin control ────────────────────────────────────────────────────────
    // Plain thread: a blocking stdin read must not hold up runtime shutdown.
    std::thread::spawn(move || read_commands(event_tx, snapshot));

    core.run(event_rx).await;
    tracing::info!("reelfeed stopped");
    Ok(())
}

/// Line-oriented control for running without the HTTP surface.
fn read_commands(event_tx: mpsc::Sender<FeedEvent>, snapshot: SnapshotStore) {
    for line in std::io::stdin().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("stdin: {}", e);
                break;
            }
        };

        let parts: Vec<&str> = line.split_whitespace().collect();
        let evt = match parts.as_slice() {
            [] => continue,
            ["scroll", offset] => match offset.parse() {
                Ok(offset) => FeedEvent::ScrollEnded { offset },
                Err(_) => {
                    eprintln!("scroll: bad offset {:?}", offset);
                    continue;
                }
            },
            ["view", index, percent] => match (index.parse(), percent.parse::<u8>()) {
                (Ok(index), Ok(percent)) => FeedEvent::Viewable {
                    index,
                    percent_visible: percent.min(100),
                },
                _ => {
                    eprintln!("usage: view <index> <percent>");
                    continue;
                }
            },
            ["fg", "on"] => FeedEvent::Foreground(true),
            ["fg", "off"] => FeedEvent::Foreground(false),
            ["pause"] => FeedEvent::TogglePause,
            ["trim"] => FeedEvent::MemoryPressure,
            ["status"] => {
                print_status(&snapshot);
                continue;
            }
            ["quit"] | ["q"] => break,
            _ => {
                eprintln!("commands: scroll <offset> | view <i> <pct> | fg on|off | pause | trim | status | quit");
                continue;
            }
        };
        if event_tx.blocking_send(evt).is_err() {
            return;
        }
    }
    let _ = event_tx.blocking_send(FeedEvent::Shutdown);
}

fn print_status(snapshot: &SnapshotStore) {
    let Ok(snap) = snapshot.read() else {
        return;
    };
    println!(
        "rev {} active {:?} {:?} items {}{}{}",
        snap.rev,
        snap.active_index,
        snap.direction,
        snap.item_count,
        if snap.fetch_in_flight { " [fetching]" } else { "" },
        if snap.user_paused { " [paused]" } else { "" },
    );
    for h in &snap.handles {
        println!(
            "  {}{:>4} slot {:>2} {:<5} {}{} {}",
            if h.is_active { '>' } else { ' ' },
            h.index,
            h.slot,
            h.status.badge_label(),
            if h.is_playing { "▶" } else { "‖" },
            if h.is_muted { " muted" } else { "" },
            h.item_id,
        );
    }
}

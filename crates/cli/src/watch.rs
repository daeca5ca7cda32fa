use std::path::PathBuf;
use std::time::Duration;

use library::AudioDatabase;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Watch every registered root and refresh the catalog after a quiet
/// period. Runs until the watchers die.
pub async fn run(
    db: AudioDatabase,
    roots: Vec<PathBuf>,
    debounce: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watchers = Vec::new();
    for root in roots {
        let tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(
            "Watching {} for changes (debounce {}s)",
            root.display(),
            debounce.as_secs()
        );
        watchers.push(watcher);
    }
    drop(tx);

    watch_loop(db, rx, debounce).await;
    Ok(())
}

async fn watch_loop(db: AudioDatabase, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    match db.refresh().await {
                        Ok(true) => {
                            let stats = db.stats();
                            info!(
                                "Auto-refresh finished: {} songs, {} albums, {} artists",
                                stats.songs, stats.albums, stats.artists
                            );
                            if let Err(err) = db.save().await {
                                warn!("Failed to save catalog: {}", err);
                            }
                        }
                        Ok(false) => info!("Auto-refresh skipped (scan already running)"),
                        Err(err) => warn!("Auto-refresh failed: {}", err),
                    }
                    break;
                }
                maybe_event = rx.recv() => {
                    if let Some(event) = maybe_event {
                        if !is_relevant_event(&event) {
                            continue;
                        }
                    } else {
                        return;
                    }
                }
            }
        }
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

mod config;
mod store;
mod watch;

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::MediaKey;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use library::{AudioDatabase, Persist};
use store::RedbPersist;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let data_dir = resolve_path(&config_path, &config.data_path);
    fs::create_dir_all(&data_dir)?;
    let persist: Arc<dyn Persist> = Arc::new(RedbPersist::open(&data_dir.join("catalog.redb"))?);
    let db = AudioDatabase::with_database_key(persist, &config.database_key);

    if db.load().await? {
        let stats = db.stats();
        info!(
            "Loaded catalog: {} songs, {} albums, {} artists",
            stats.songs, stats.albums, stats.artists
        );
    }

    for root in &config.music_roots {
        let path = resolve_path(&config_path, root);
        match db.add_file_location(&path).await {
            Ok(true) => {}
            Ok(false) => {
                if !db.get_locations().contains(&path) {
                    warn!("Music root not found: {}", path.display());
                }
            }
            Err(err) => warn!("Failed to register {}: {}", path.display(), err),
        }
    }

    let mut args = env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "scan".to_string());
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "scan" | "refresh" => {
            if db.get_locations().is_empty() {
                warn!("No music roots configured; edit {:?}", config_path);
            }
            if db.refresh().await? {
                let stats = db.stats();
                println!(
                    "Indexed: {} songs, {} albums, {} artists",
                    stats.songs, stats.albums, stats.artists
                );
                db.save().await?;
            } else {
                println!("Scan skipped: another refresh is already running.");
            }
        }
        "locations" => {
            for root in db.get_locations() {
                println!("{}", root.display());
            }
        }
        "search" => {
            let substring = rest.iter().any(|arg| arg == "--substring");
            let terms: Vec<&str> = rest
                .iter()
                .filter(|arg| *arg != "--substring")
                .map(String::as_str)
                .collect();
            if terms.is_empty() {
                return Err("usage: discograph search [--substring] <terms>".into());
            }
            run_search(&db, substring, &terms.join(" "));
        }
        "show" => {
            let key = rest
                .first()
                .ok_or("usage: discograph show <key>")?
                .parse::<MediaKey>()?;
            show_entity(&db, key);
        }
        "canonical" => {
            let key = rest
                .first()
                .ok_or("usage: discograph canonical <song-key>")?
                .parse()?;
            match db.get_canonical_file_name(key) {
                Some(name) => println!("{}", name),
                None => println!("Unknown song key."),
            }
        }
        "ignore" => {
            let action = rest.first().map(String::as_str);
            let kind: library::IgnoreKind = rest
                .get(1)
                .ok_or("usage: discograph ignore add|remove <kind> <value>")?
                .parse()?;
            let value = rest
                .get(2)
                .ok_or("usage: discograph ignore add|remove <kind> <value>")?;
            let changed = match action {
                Some("add") => db.add_ignore_item(kind, value),
                Some("remove") => db.remove_ignore_item(kind, value),
                _ => return Err("usage: discograph ignore add|remove <kind> <value>".into()),
            };
            if changed {
                println!("Ignore rules updated.");
            } else {
                println!("No change.");
            }
            for (kind, value) in db.get_ignore_items() {
                println!("{}: {}", kind, value);
            }
        }
        "watch" => {
            db.refresh().await?;
            db.save().await?;
            let debounce = Duration::from_secs(config.watch_debounce_secs);
            let roots: Vec<PathBuf> = db.get_locations();
            watch::run(db.clone(), roots, debounce).await?;
        }
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Commands: scan | locations | search | show | canonical | watch");
        }
    }

    db.flush().await;
    Ok(())
}

fn run_search(db: &AudioDatabase, substring: bool, terms: &str) {
    let results = db.search_index(substring, terms);
    for key in &results.artists {
        if let Some(artist) = db.get_artist(*key) {
            println!(
                "artist  {}  {} ({} songs, {} albums)",
                key,
                artist.name,
                artist.songs.len(),
                artist.albums.len()
            );
        }
    }
    for key in &results.albums {
        if let Some(album) = db.get_album(*key) {
            println!(
                "album   {}  {} ({}, {} songs)",
                key,
                album.title,
                album.year,
                album.songs.len()
            );
        }
    }
    for key in &results.songs {
        if let Some(song) = db.get_song(*key) {
            println!("song    {}  {}", key, song.title);
        }
    }
    if results.songs.is_empty() && results.albums.is_empty() && results.artists.is_empty() {
        println!("No matches.");
    }
}

fn show_entity(db: &AudioDatabase, key: MediaKey) {
    match key {
        MediaKey::Song(key) => match db.get_song(key) {
            Some(song) => {
                println!("song {}", key);
                println!("  title: {}", song.title);
                println!("  path: {}", song.path.display());
                println!("  track: {} (disk {})", song.track_on_disk(), song.disk());
                println!("  album: {}", song.album);
                if let Some(name) = db.get_canonical_file_name(key) {
                    println!("  canonical: {}", name);
                }
            }
            None => println!("Unknown song key."),
        },
        MediaKey::Album(key) => match db.get_album(key) {
            Some(album) => {
                println!("album {}", key);
                println!("  title: {}", album.title);
                println!("  year: {}", album.year);
                if !album.va_type.is_none() {
                    println!("  type: {}", album.va_type.as_str());
                }
                println!("  songs: {}", album.songs.len());
            }
            None => println!("Unknown album key."),
        },
        MediaKey::Artist(key) => match db.get_artist(key) {
            Some(artist) => {
                println!("artist {}", key);
                println!("  name: {}", artist.name);
                println!("  songs: {}", artist.songs.len());
                println!("  albums: {}", artist.albums.len());
            }
            None => println!("Unknown artist key."),
        },
    }
}

//! Local feed catalog loader.
//!
//! A catalog is a TOML file with one `[[item]]` table per feed entry:
//!
//! ```toml
//! [[item]]
//! id = "clip-001"
//! url = "https://cdn.example.com/clip-001/master.m3u8"
//! title = "Morning surf"
//! ```

use std::collections::HashSet;

use crate::protocol::FeedItem;
use tracing::warn;

/// Mirrors the TOML `[[item]]` table.  Kept apart from `FeedItem` so the file
/// schema can grow without touching the wire type.
#[derive(Debug, serde::Deserialize)]
struct TomlCatalogFile {
    #[serde(default)]
    item: Vec<TomlItem>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlItem {
    id: String,
    url: String,
    #[serde(default)]
    title: String,
}

pub fn load_catalog(path: &std::path::Path) -> anyhow::Result<Vec<FeedItem>> {
    let content = std::fs::read_to_string(path)?;
    parse_catalog_from_str(&content)
}

/// Parse a catalog, dropping entries whose id was already seen.
pub fn parse_catalog_from_str(content: &str) -> anyhow::Result<Vec<FeedItem>> {
    let file: TomlCatalogFile = toml::from_str(content)?;
    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(file.item.len());
    for entry in file.item {
        if !seen.insert(entry.id.clone()) {
            warn!("catalog: duplicate id {:?} ignored", entry.id);
            continue;
        }
        items.push(FeedItem {
            id: entry.id,
            url: entry.url,
            title: entry.title,
        });
    }
    Ok(items)
}

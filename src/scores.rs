use crate::models::ScoredAsset;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Reads the ranking table: a JSON array of
/// `{"instrument_id": "...", "score": 1.0, "name": "..."}` rows.
pub fn load_scored_assets(path: &Path) -> Result<Vec<ScoredAsset>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read scored assets from {}", path.display()))?;
    let assets = parse_scored_assets(&raw)
        .with_context(|| format!("failed to parse scored assets from {}", path.display()))?;
    info!(
        "Loaded {} scored assets from {}",
        assets.len(),
        path.display()
    );
    Ok(assets)
}

pub fn parse_scored_assets(raw: &str) -> Result<Vec<ScoredAsset>> {
    let rows: Vec<ScoredAsset> = serde_json::from_str(raw)?;

    let mut seen = HashSet::new();
    let mut assets = Vec::with_capacity(rows.len());
    for mut row in rows {
        row.instrument_id = row.instrument_id.trim().to_string();
        if row.instrument_id.is_empty() {
            return Err(anyhow!("scored asset rows must have a non-empty instrument_id"));
        }
        if !seen.insert(row.instrument_id.clone()) {
            warn!(
                "Duplicate scored asset {}; keeping the first row",
                row.instrument_id
            );
            continue;
        }
        assets.push(row);
    }
    Ok(assets)
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rating_kernel_core::{EntityId, KernelError, RatingStore, RatingVector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

const ENTITY_COLUMN: &str = "userId";
const ITEM_COLUMN: &str = "movieId";
const RATING_COLUMN: &str = "rating";

/// What the loader saw: store shape, skipped rows, and a content digest of
/// the raw file so operators can tell which dataset a process is serving.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DatasetSummary {
    pub entities: usize,
    pub ratings: usize,
    pub skipped_rows: usize,
    pub content_digest: String,
}

struct ColumnLayout {
    entity: usize,
    item: usize,
    rating: usize,
}

impl ColumnLayout {
    fn from_header(header: &str) -> Result<Self, KernelError> {
        let columns = header.split(',').map(str::trim).collect::<Vec<_>>();
        let position = |name: &str| {
            columns.iter().position(|column| *column == name).ok_or_else(|| {
                KernelError::DataLoad(format!("header is missing required column `{name}`"))
            })
        };

        Ok(Self {
            entity: position(ENTITY_COLUMN)?,
            item: position(ITEM_COLUMN)?,
            rating: position(RATING_COLUMN)?,
        })
    }

    fn widest(&self) -> usize {
        self.entity.max(self.item).max(self.rating)
    }
}

/// Load the row-oriented rating dataset into an immutable [`RatingStore`].
///
/// Loading is all-or-nothing for structural problems (unreadable file,
/// missing header column, zero usable rows), while individually malformed
/// rows are skipped with a warning so one corrupt line cannot deny all
/// scoring.
///
/// # Errors
/// Returns [`KernelError::DataLoad`] when the source cannot be read, the
/// header lacks a required column, or no valid rating rows remain.
pub fn load_ratings(path: &Path) -> Result<(RatingStore, DatasetSummary), KernelError> {
    let bytes = fs::read(path).map_err(|err| {
        KernelError::DataLoad(format!("failed to read {}: {err}", path.display()))
    })?;
    let content_digest = {
        let digest = Sha256::digest(&bytes);
        format!("sha256:{digest:x}")
    };
    let text = String::from_utf8(bytes).map_err(|err| {
        KernelError::DataLoad(format!("{} is not valid UTF-8: {err}", path.display()))
    })?;

    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| KernelError::DataLoad(format!("{} has no header row", path.display())))?;
    let layout = ColumnLayout::from_header(header)?;

    let mut ratings_by_entity: BTreeMap<EntityId, BTreeMap<String, f64>> = BTreeMap::new();
    let mut ratings = 0_usize;
    let mut skipped_rows = 0_usize;

    for (index, line) in lines.enumerate() {
        let line_number = index + 2;
        if line.trim().is_empty() {
            continue;
        }

        let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
        if fields.len() <= layout.widest() {
            warn!(line = line_number, "skipping row with missing fields");
            skipped_rows += 1;
            continue;
        }

        let entity_id = fields[layout.entity];
        let item_id = fields[layout.item];
        if entity_id.is_empty() || item_id.is_empty() {
            warn!(line = line_number, "skipping row with empty identifier");
            skipped_rows += 1;
            continue;
        }

        let rating = match fields[layout.rating].parse::<f64>() {
            Ok(rating) if rating.is_finite() => rating,
            _ => {
                warn!(line = line_number, value = fields[layout.rating], "skipping non-numeric rating");
                skipped_rows += 1;
                continue;
            }
        };

        ratings_by_entity
            .entry(EntityId::from(entity_id))
            .or_default()
            .insert(item_id.to_string(), rating);
        ratings += 1;
    }

    if ratings == 0 {
        return Err(KernelError::DataLoad(format!(
            "{} contains no usable rating rows",
            path.display()
        )));
    }

    let entities = ratings_by_entity.len();
    let store = RatingStore::from_entries(
        ratings_by_entity
            .into_iter()
            .map(|(entity_id, vector)| (entity_id, RatingVector::from_ratings(vector))),
    );

    Ok((store, DatasetSummary { entities, ratings, skipped_rows, content_digest }))
}

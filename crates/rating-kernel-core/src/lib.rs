use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Wire sentinel for a distance computed over entities with no shared rated
/// items. Valid distances are non-negative, so consumers can always tell the
/// sentinel apart from a real result.
pub const NO_OVERLAP_SENTINEL: f64 = -1.0;

const SESSION_TOKEN_BYTES: usize = 8;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("rating dataset could not be loaded: {0}")]
    DataLoad(String),
    #[error("entities not found in rating store: [{}]", join_entity_ids(.missing))]
    EntityNotFound { missing: Vec<EntityId> },
    #[error("no shared rated items between the requested entities")]
    InsufficientOverlap,
    #[error("score sink append failed: {0}")]
    SinkWrite(String),
    #[error("score record serialization failed: {0}")]
    Serialize(String),
}

fn join_entity_ids(ids: &[EntityId]) -> String {
    ids.iter().map(|id| id.0.clone()).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Sparse item-to-rating mapping for one entity. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingVector(BTreeMap<String, f64>);

impl RatingVector {
    #[must_use]
    pub fn from_ratings(ratings: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self(ratings.into_iter().collect())
    }

    #[must_use]
    pub fn get(&self, item_id: &str) -> Option<f64> {
        self.0.get(item_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(item_id, rating)| (item_id.as_str(), *rating))
    }
}

impl FromIterator<(String, f64)> for RatingVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self::from_ratings(iter)
    }
}

/// Read-only mapping from entity ID to its rating vector.
///
/// Built once at startup by the ingest layer; lookups are pure and the store
/// is never mutated afterwards, so it can be shared freely across requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingStore {
    entries: BTreeMap<EntityId, RatingVector>,
}

impl RatingStore {
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (EntityId, RatingVector)>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    #[must_use]
    pub fn get(&self, entity_id: &EntityId) -> Option<&RatingVector> {
        self.entries.get(entity_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entries.keys()
    }
}

/// Mean absolute rating difference over the shared rated items.
///
/// Lower is more similar. Returns [`NO_OVERLAP_SENTINEL`] when the two
/// vectors share no items; every defined result is non-negative.
#[must_use]
pub fn manhattan(left: &RatingVector, right: &RatingVector) -> f64 {
    let mut distance = 0.0;
    let mut shared = 0_u32;
    for (item_id, left_rating) in left.iter() {
        if let Some(right_rating) = right.get(item_id) {
            distance += (left_rating - right_rating).abs();
            shared += 1;
        }
    }

    if shared == 0 {
        NO_OVERLAP_SENTINEL
    } else {
        distance / f64::from(shared)
    }
}

/// Pearson linear correlation over the shared rated items.
///
/// Nominal range is [-1, 1]; a degenerate distribution (zero variance on
/// either side) yields exactly 0 via the denominator short-circuit, never a
/// division error. No other clamping is performed.
///
/// # Errors
/// Returns [`KernelError::InsufficientOverlap`] when the vectors share no
/// items. The formula divides by the overlap count, so this case is guarded
/// explicitly instead of surfacing as a NaN.
pub fn pearson(left: &RatingVector, right: &RatingVector) -> Result<f64, KernelError> {
    let mut sum_xy = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_x2 = 0.0;
    let mut sum_y2 = 0.0;
    let mut shared = 0_u32;

    for (item_id, x) in left.iter() {
        let Some(y) = right.get(item_id) else {
            continue;
        };
        shared += 1;
        sum_xy += x * y;
        sum_x += x;
        sum_y += y;
        sum_x2 += x * x;
        sum_y2 += y * y;
    }

    if shared == 0 {
        return Err(KernelError::InsufficientOverlap);
    }

    let n = f64::from(shared);
    let denominator = (sum_x2 - sum_x * sum_x / n).sqrt() * (sum_y2 - sum_y * sum_y / n).sqrt();
    if denominator == 0.0 {
        Ok(0.0)
    } else {
        Ok((sum_xy - sum_x * sum_y / n) / denominator)
    }
}

/// Pass an existing non-empty session token through unchanged, or mint a
/// fresh one: 64 bits from the OS RNG as a 16-character lowercase hex string.
///
/// Uniqueness of supplied tokens is not re-verified here; durable issuance
/// (cookies) belongs to the boundary layer.
#[must_use]
pub fn resolve_session_token(existing: Option<&str>) -> String {
    match existing {
        Some(token) if !token.is_empty() => token.to_string(),
        _ => {
            let mut bytes = [0_u8; SESSION_TOKEN_BYTES];
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
    }
}

/// One completed scoring result, in the wire shape downstream consumers
/// expect: both metrics string-encoded (`"-1"` marks no overlap for the
/// Manhattan field).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScoreRecord {
    pub voter_id: String,
    pub distancia_manhattan: String,
    pub distancia_pearson: String,
}

impl ScoreRecord {
    #[must_use]
    pub fn new(session_token: &str, manhattan: f64, pearson: f64) -> Self {
        Self {
            voter_id: session_token.to_string(),
            distancia_manhattan: manhattan.to_string(),
            distancia_pearson: pearson.to_string(),
        }
    }

    /// Serialize into the flat JSON payload handed to the sink.
    ///
    /// # Errors
    /// Returns [`KernelError::Serialize`] when JSON encoding fails.
    pub fn to_sink_payload(&self) -> Result<String, KernelError> {
        serde_json::to_string(self).map_err(|err| KernelError::Serialize(err.to_string()))
    }
}

/// Opaque append-only destination for completed score records.
///
/// The kernel issues exactly one append per completed scoring request and
/// never batches, deduplicates, or retries; any retry policy belongs to the
/// sink implementation itself.
pub trait ScoreSink {
    /// Append one serialized record.
    ///
    /// # Errors
    /// Returns [`KernelError::SinkWrite`] when the append cannot be made
    /// durable.
    fn append(&mut self, payload: &str) -> Result<(), KernelError>;
}

/// Build an immutable [`ScoreRecord`] and submit it to the sink, exactly
/// once.
///
/// # Errors
/// Returns [`KernelError::Serialize`] when the record cannot be encoded, or
/// [`KernelError::SinkWrite`] when the sink rejects the append.
pub fn record_score(
    sink: &mut dyn ScoreSink,
    session_token: &str,
    manhattan: f64,
    pearson: f64,
) -> Result<(), KernelError> {
    let payload = ScoreRecord::new(session_token, manhattan, pearson).to_sink_payload()?;
    sink.append(&payload)
}

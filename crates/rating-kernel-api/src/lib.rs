use std::path::PathBuf;
use std::sync::Arc;

use rating_kernel_core::{
    manhattan, pearson, record_score, resolve_session_token, EntityId, KernelError, RatingStore,
    ScoreSink,
};
use rating_kernel_sink_sqlite::SqliteSink;
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CompareRequest {
    pub left: String,
    pub right: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompareResponse {
    pub session_token: String,
    pub distance_manhattan: f64,
    pub correlation_pearson: f64,
}

/// Run one scoring request end to end: resolve the session token, look up
/// both rating vectors, score both metrics, and enqueue exactly one record.
///
/// The request fails before any sink traffic when either entity is missing
/// or the pair shares no rated items; a failed append never produces a
/// success response.
///
/// # Errors
/// Returns [`KernelError::EntityNotFound`] naming each missing side,
/// [`KernelError::InsufficientOverlap`] for a pair with no shared items, or
/// [`KernelError::SinkWrite`]/[`KernelError::Serialize`] when the record
/// cannot be handed off.
pub fn run_compare(
    store: &RatingStore,
    sink: &mut dyn ScoreSink,
    request: &CompareRequest,
) -> Result<CompareResponse, KernelError> {
    let session_token = resolve_session_token(request.session_token.as_deref());

    let left_id = EntityId::from(request.left.as_str());
    let right_id = EntityId::from(request.right.as_str());

    let left_vector = store.get(&left_id);
    let right_vector = store.get(&right_id);
    let (Some(left), Some(right)) = (left_vector, right_vector) else {
        let mut missing = Vec::new();
        if left_vector.is_none() {
            missing.push(left_id);
        }
        if right_vector.is_none() {
            missing.push(right_id);
        }
        return Err(KernelError::EntityNotFound { missing });
    };

    let correlation = pearson(left, right)?;
    let distance = manhattan(left, right);

    record_score(sink, &session_token, distance, correlation)?;

    Ok(CompareResponse {
        session_token,
        distance_manhattan: distance,
        correlation_pearson: correlation,
    })
}

/// Boundary-facing handle over the read-only rating store and the score
/// queue location.
///
/// The store is loaded once and shared; the sink is opened per call so each
/// request holds its own scoped connection and nothing leaks across
/// requests.
#[derive(Debug, Clone)]
pub struct ScoreApi {
    ratings: Arc<RatingStore>,
    queue_path: PathBuf,
}

impl ScoreApi {
    #[must_use]
    pub fn new(ratings: Arc<RatingStore>, queue_path: PathBuf) -> Self {
        Self { ratings, queue_path }
    }

    #[must_use]
    pub fn ratings(&self) -> &RatingStore {
        &self.ratings
    }

    /// The idle/no-op path: resolve a session token without scoring or
    /// touching the sink.
    #[must_use]
    pub fn session(&self, existing: Option<&str>) -> String {
        resolve_session_token(existing)
    }

    /// Score one entity pair and enqueue the result.
    ///
    /// # Errors
    /// Returns [`KernelError::SinkWrite`] when the queue cannot be opened,
    /// plus every failure mode of [`run_compare`].
    pub fn compare(&self, request: &CompareRequest) -> Result<CompareResponse, KernelError> {
        let mut sink = SqliteSink::open(&self.queue_path)
            .map_err(|err| KernelError::SinkWrite(err.to_string()))?;
        run_compare(&self.ratings, &mut sink, request)
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackAdder {
    pub id: i64,
    pub username: String,
}

/// Runtime projection of a queue entry joined with song and adder metadata.
/// `id` is the queue entry id, not the song id. `url` is a signed, expiring
/// URL and gets rewritten in place by the refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub url: String,
    /// Seconds
    pub duration: i64,
    pub added_by: TrackAdder,
    pub added_at: DateTime<Utc>,
}

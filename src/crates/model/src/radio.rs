use crate::track::Track;
use serde::Serialize;

/// Snapshot of the runtime radio state. `current_track` always equals the
/// queue head when the queue is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub listeners: usize,
    pub is_radio_active: bool,
}

/// Broadcast payload pushed to every connected listener channel, serialized
/// as `{"type": ..., "data": {...}}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum RadioEvent {
    /// First message on a freshly registered channel: the complete state,
    /// so late joiners sync without waiting for the next broadcast.
    #[serde(rename = "QUEUE_SYNC")]
    QueueSync(QueueState),
    #[serde(rename = "QUEUE_UPDATE")]
    QueueUpdate { queue: Vec<Track> },
    #[serde(rename = "TRACK_CHANGE")]
    #[serde(rename_all = "camelCase")]
    TrackChange {
        current_track: Option<Track>,
        queue: Vec<Track>,
    },
    #[serde(rename = "LISTENERS_UPDATE")]
    ListenersUpdate { listeners: usize },
    #[serde(rename = "RADIO_STATUS_CHANGE")]
    #[serde(rename_all = "camelCase")]
    RadioStatusChange {
        is_radio_active: bool,
        current_track: Option<Track>,
    },
}

pub mod radio;
pub mod track;

pub use radio::{QueueState, RadioEvent};
pub use track::{Track, TrackAdder};

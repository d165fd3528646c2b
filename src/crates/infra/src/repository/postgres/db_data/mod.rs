pub mod queue_entry;
pub mod song;
pub mod user;

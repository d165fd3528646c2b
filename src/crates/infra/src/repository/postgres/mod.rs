pub mod db_data;
pub mod queue;
pub mod song;
pub mod user;

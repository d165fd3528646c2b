pub mod config;
pub use config::{AppConfigImpl, MediaConfig, ServerConfig};

pub mod repository;

pub mod signer;
pub use signer::HmacUrlSigner;

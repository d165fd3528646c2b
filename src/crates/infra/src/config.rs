use config::{Config, Environment, File};
use dotenvy::dotenv;
use serde::Deserialize;
use std::error::Error;
use std::sync::{Arc, RwLock};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    database_url: String,
    jwt_secret_key: String,
    server: ServerConfig,
    media: MediaConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/radiocast".to_string(),
            jwt_secret_key: "change-me".to_string(),
            server: ServerConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MediaConfig {
    /// Base URL the signed object URLs are built on
    pub public_base_url: String,
    pub signing_key: String,
    /// Signed URLs expire after this horizon
    pub url_ttl_secs: i64,
    /// Refresh period, kept safely shorter than `url_ttl_secs`
    pub refresh_interval_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:9000/radiocast".to_string(),
            signing_key: "change-me".to_string(),
            url_ttl_secs: 3600,
            refresh_interval_secs: 3000, // 50 minutes against the 1h expiry
        }
    }
}

#[derive(Clone)]
pub struct AppConfigImpl {
    database_url: Arc<RwLock<String>>,
    jwt_secret_key: Arc<RwLock<String>>,
    server: Arc<RwLock<ServerConfig>>,
    media: Arc<RwLock<MediaConfig>>,
}

impl AppConfigImpl {
    fn new(raw: RawConfig) -> Self {
        Self {
            database_url: Arc::new(RwLock::new(raw.database_url)),
            jwt_secret_key: Arc::new(RwLock::new(raw.jwt_secret_key)),
            server: Arc::new(RwLock::new(raw.server)),
            media: Arc::new(RwLock::new(raw.media)),
        }
    }

    pub fn load() -> Result<AppConfigImpl, Box<dyn Error>> {
        dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        let raw: RawConfig = config.try_deserialize()?;
        Ok(AppConfigImpl::new(raw))
    }

    pub fn database_url(&self) -> String {
        let cfg_val = self.database_url.read().unwrap();
        (*cfg_val).clone()
    }

    pub fn jwt_secret(&self) -> String {
        let cfg_val = self.jwt_secret_key.read().unwrap();
        (*cfg_val).clone()
    }

    pub fn server(&self) -> ServerConfig {
        let cfg_val = self.server.read().unwrap();
        cfg_val.clone()
    }

    pub fn media(&self) -> MediaConfig {
        let cfg_val = self.media.read().unwrap();
        cfg_val.clone()
    }
}

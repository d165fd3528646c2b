pub mod middleware;
pub mod radio_api;
pub mod ws;

pub use middleware::jwt_verify::Caller;

use application::radio::RadioEngine;
use infra::config::AppConfigImpl;
use infra::repository::postgres::queue::QueueRepositoryImpl;
use infra::repository::postgres::song::SongRepositoryImpl;
use infra::repository::postgres::user::UserRepositoryImpl;
use infra::HmacUrlSigner;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub app_cfg: AppConfigImpl,
    pub db: DatabaseConnection,
    pub engine: Arc<RadioEngine>,
}

impl AppState {
    pub async fn init_db(db_url: &str) -> DatabaseConnection {
        use log::info;

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(30)
            .min_connections(5)
            .connect_timeout(Duration::from_secs(3))
            .acquire_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(60))
            .max_lifetime(Duration::from_secs(300))
            .sqlx_logging(false)
            .sqlx_logging_level(log::LevelFilter::Info);

        let db = Database::connect(opt)
            .await
            .expect("Failed to connect to database");

        let backend = DbBackend::Postgres;
        db.execute(Statement::from_string(backend, "SELECT 1".to_owned()))
            .await
            .expect("Failed to execute test query");

        info!("Database connection pool initialized successfully");
        db
    }

    pub async fn new(db: DatabaseConnection, app_cfg: AppConfigImpl) -> Self {
        let media = app_cfg.media();
        let signer = Arc::new(HmacUrlSigner::new(
            media.public_base_url.clone(),
            media.signing_key.as_bytes(),
            media.url_ttl_secs,
        ));
        let engine = RadioEngine::new(
            Arc::new(SongRepositoryImpl::new(db.clone())),
            Arc::new(UserRepositoryImpl::new(db.clone())),
            Arc::new(QueueRepositoryImpl::new(db.clone())),
            signer,
            Duration::from_secs(media.refresh_interval_secs),
        );
        Self {
            app_cfg,
            db,
            engine,
        }
    }
}

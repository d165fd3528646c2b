use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};

use infra::config::AppConfigImpl;
use log4rs::{
    append::file::FileAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

use server::middleware::jwt_verify;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Log to console and file
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {m}{n}",
        )))
        .build("app.log")
        .unwrap();

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .appender(Appender::builder().build(
            "stdout",
            Box::new(log4rs::append::console::ConsoleAppender::builder().build()),
        ))
        .build(
            Root::builder()
                .appender("file")
                .appender("stdout")
                .build(log_level.parse().unwrap_or(log::LevelFilter::Info)),
        )
        .unwrap();

    log4rs::init_config(config).unwrap();

    let cfg = AppConfigImpl::load().unwrap();
    let server_cfg = cfg.server();
    let db = server::AppState::init_db(&cfg.database_url()).await;

    let app_state = server::AppState::new(db, cfg).await;
    // Bootstrap is best effort: a failed load starts the radio with an empty
    // queue instead of refusing to serve.
    app_state.engine.bootstrap().await;
    app_state.engine.start_url_refresh();

    let app_state = web::Data::new(app_state);
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(Logger::default())
            .service(
                web::scope("/api/radio")
                    .configure(server::radio_api::configure_service)
                    .route("/ws", web::get().to(server::ws::radio_ws))
                    .wrap(jwt_verify::JwtVerifier {}),
            )
            .wrap(server::middleware::cors())
    })
    .bind((server_cfg.host.as_str(), server_cfg.port))?
    .run()
    .await
}

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use grainpalette::model::{AdapterState, ModelAdapter};
use grainpalette::pipeline::{PipelineConfig, PredictionOrchestrator};
use grainpalette::routes::{MAX_UPLOAD_BYTES, configure_routes};
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = PipelineConfig::load().map_err(|e| {
        log::error!("Failed to load pipeline config: {}", e);
        std::io::Error::other(format!("Config loading failed: {}", e))
    })?;

    let model = Arc::new(ModelAdapter::new(config.model.clone()));
    match model.ensure_loaded() {
        AdapterState::Ready => log::info!("Model ready at startup"),
        state => log::warn!(
            "Model not ready at startup ({}); serving heuristic predictions",
            state
        ),
    }

    let orchestrator = web::Data::new(PredictionOrchestrator::new(model, &config));

    let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());
    let bind_address = format!("0.0.0.0:{}", port);

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(orchestrator.clone())
            .app_data(web::JsonConfig::default().limit(MAX_UPLOAD_BYTES * 4 / 3 + 4096))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}

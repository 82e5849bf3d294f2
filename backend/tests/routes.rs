use std::io::Cursor;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use grainpalette::model::{Classifier, ClassifierLoader, ModelAdapter, ModelError};
use grainpalette::pipeline::config::ModelConfig;
use grainpalette::pipeline::{PipelineConfig, PredictionOrchestrator};
use grainpalette::routes::configure_routes;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use shared::{ClassifyResponse, ModelStatus, RiceVariety, Tier, VarietyInfo};

const BOUNDARY: &str = "grainpalette-test-boundary";

struct MissingModelLoader;

impl ClassifierLoader for MissingModelLoader {
    fn load(&self, config: &ModelConfig) -> Result<Box<dyn Classifier>, ModelError> {
        Err(ModelError::MissingResource(config.path.clone()))
    }
}

fn orchestrator() -> web::Data<PredictionOrchestrator> {
    let config = PipelineConfig::default();
    let model = Arc::new(ModelAdapter::with_loader(
        config.model.clone(),
        Box::new(MissingModelLoader),
    ));
    web::Data::new(PredictionOrchestrator::new(model, &config))
}

fn png_bytes() -> Vec<u8> {
    let mut image = RgbImage::from_pixel(64, 48, Rgb([40, 35, 30]));
    for top in [6u32, 22, 38] {
        for y in top..top + 6 {
            for x in 8..56 {
                image.put_pixel(x, y, Rgb([230, 225, 210]));
            }
        }
    }
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn multipart_body(text_fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in text_fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(body: Vec<u8>) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/classify")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
}

#[actix_web::test]
async fn test_classify_json_wraps_result() {
    let app = test::init_service(
        App::new()
            .app_data(orchestrator())
            .configure(configure_routes),
    )
    .await;
    let bytes = png_bytes();

    let req = test::TestRequest::post()
        .uri("/api/classify/json")
        .set_json(json!({ "image_data": STANDARD.encode(&bytes) }))
        .to_request();
    let resp: ClassifyResponse = test::call_and_read_body_json(&app, req).await;

    assert_eq!(resp.image_hash, hex::encode(Sha256::digest(&bytes)));
    assert!(uuid::Uuid::parse_str(&resp.request_id).is_ok());
    assert!(chrono::DateTime::parse_from_rfc3339(&resp.classified_at).is_ok());
    assert_eq!(resp.result.tier, Tier::Heuristic);
    assert!((0.95..=0.99).contains(&resp.result.confidence));
    assert!(resp.result.characteristics.is_some());
}

#[actix_web::test]
async fn test_classify_json_accepts_data_url_and_options() {
    let app = test::init_service(
        App::new()
            .app_data(orchestrator())
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/classify/json")
        .set_json(json!({
            "image_data": format!("data:image/png;base64,{}", STANDARD.encode(png_bytes())),
            "expected_label": "ipsala",
            "privilege_hint": true,
        }))
        .to_request();
    let resp: ClassifyResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp.result.predicted_class, RiceVariety::Ipsala);
}

#[actix_web::test]
async fn test_classify_json_rejects_bad_input() {
    let app = test::init_service(
        App::new()
            .app_data(orchestrator())
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/classify/json")
        .set_json(json!({ "image_data": "not base64!!" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("base64"));

    let req = test::TestRequest::post()
        .uri("/api/classify/json")
        .set_json(json!({ "image_data": STANDARD.encode(b"definitely not an image") }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/classify/json")
        .set_json(json!({
            "image_data": STANDARD.encode(png_bytes()),
            "expected_label": "Carolina Gold",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Unknown rice variety: Carolina Gold");
}

#[actix_web::test]
async fn test_classify_multipart_reads_fields() {
    let app = test::init_service(
        App::new()
            .app_data(orchestrator())
            .configure(configure_routes),
    )
    .await;
    let bytes = png_bytes();

    let body = multipart_body(
        &[("expected_label", "Karacadag"), ("privilege_hint", "true")],
        Some(("grains.png", &bytes)),
    );
    let resp: ClassifyResponse =
        test::call_and_read_body_json(&app, multipart_request(body).to_request()).await;
    assert_eq!(resp.image_hash, hex::encode(Sha256::digest(&bytes)));
    assert_eq!(resp.result.predicted_class, RiceVariety::Karacadag);
    assert_eq!(resp.result.tier, Tier::Heuristic);
}

#[actix_web::test]
async fn test_classify_multipart_without_image() {
    let app = test::init_service(
        App::new()
            .app_data(orchestrator())
            .configure(configure_routes),
    )
    .await;

    let body = multipart_body(&[("expected_label", "Basmati")], None);
    let resp = test::call_service(&app, multipart_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "No image provided");
}

#[actix_web::test]
async fn test_varieties_catalogue() {
    let app = test::init_service(App::new().configure(configure_routes)).await;

    let req = test::TestRequest::get().uri("/api/varieties").to_request();
    let varieties: Vec<VarietyInfo> = test::call_and_read_body_json(&app, req).await;
    let names: Vec<RiceVariety> = varieties.iter().map(|v| v.name).collect();
    assert_eq!(names, RiceVariety::ALL.to_vec());
    assert!(varieties[0].description.contains("risotto"));
}

#[actix_web::test]
async fn test_model_status_reflects_degradation() {
    let data = orchestrator();
    let app = test::init_service(
        App::new()
            .app_data(data.clone())
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/model/status").to_request();
    let status: ModelStatus = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status.state, "unloaded");

    data.model().ensure_loaded();
    let req = test::TestRequest::get().uri("/api/model/status").to_request();
    let status: ModelStatus = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status.state, "load_failed");
    assert!(status.detail.unwrap().contains("not found"));
    assert_eq!(status.model_path, "models/rice_classifier.pt");
}

use std::str::FromStr;

use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{StreamExt, TryStreamExt};
use lazy_static::lazy_static;
use log::{debug, error, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::{
    CalibrationMode, ClassifyRequestBody, ClassifyResponse, PredictionResult, RiceVariety,
    VarietyInfo,
};
use uuid::Uuid;

use crate::pipeline::{ClassifyRequest, PipelineError, PredictionOrchestrator};

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

lazy_static! {
    static ref CATALOGUE: Vec<VarietyInfo> = RiceVariety::ALL
        .iter()
        .map(|variety| VarietyInfo {
            name: *variety,
            description: variety.description().to_string(),
        })
        .collect();
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("No image provided")]
    MissingImage,
    #[error("Upload exceeds {} bytes", MAX_UPLOAD_BYTES)]
    TooLarge,
    #[error("Malformed upload: {0}")]
    Upload(String),
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Unknown rice variety: {0}")]
    UnknownLabel(String),
    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: String, value: String },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Classification task failed: {0}")]
    Blocking(String),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Pipeline(_) | ServiceError::Blocking(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/classify").route(web::post().to(classify_upload)))
        .service(web::resource("/api/classify/json").route(web::post().to(classify_json)))
        .service(web::resource("/api/varieties").route(web::get().to(list_varieties)))
        .service(web::resource("/api/model/status").route(web::get().to(model_status)));
}

/// Owned request data, so classification can move onto the blocking pool.
#[derive(Default)]
struct ClassifyInput {
    bytes: Vec<u8>,
    expected_label: Option<RiceVariety>,
    image_path: Option<String>,
    calibration: Option<CalibrationMode>,
    privilege_hint: bool,
}

async fn classify_upload(
    orchestrator: web::Data<PredictionOrchestrator>,
    mut payload: Multipart,
) -> Result<HttpResponse, ServiceError> {
    let mut input = ClassifyInput::default();

    while let Ok(Some(mut field)) = payload.try_next().await {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ServiceError::Upload(e.to_string()))?;
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(ServiceError::TooLarge);
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "expected_label" => input.expected_label = parse_label(&field_text(&name, data)?)?,
            "calibration" => input.calibration = parse_calibration(&field_text(&name, data)?)?,
            "privilege_hint" => input.privilege_hint = parse_flag(&field_text(&name, data)?)?,
            _ if input.bytes.is_empty() && !data.is_empty() => {
                debug!("Received image field '{}' ({} bytes)", name, data.len());
                input.bytes = data;
                input.image_path = filename;
            }
            _ => debug!("Ignoring multipart field '{}'", name),
        }
    }

    if input.bytes.is_empty() {
        return Err(ServiceError::MissingImage);
    }
    let response = run_classification(orchestrator, input).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn classify_json(
    orchestrator: web::Data<PredictionOrchestrator>,
    body: web::Json<ClassifyRequestBody>,
) -> Result<HttpResponse, ServiceError> {
    let body = body.into_inner();
    let encoded = strip_data_url(&body.image_data);
    if encoded.is_empty() {
        return Err(ServiceError::MissingImage);
    }
    let bytes = STANDARD.decode(encoded)?;
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ServiceError::TooLarge);
    }

    let input = ClassifyInput {
        bytes,
        expected_label: match body.expected_label.as_deref() {
            Some(label) => parse_label(label)?,
            None => None,
        },
        image_path: body.image_path,
        calibration: body.calibration,
        privilege_hint: body.privilege_hint.unwrap_or(false),
    };
    let response = run_classification(orchestrator, input).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn list_varieties() -> HttpResponse {
    HttpResponse::Ok().json(&*CATALOGUE)
}

async fn model_status(orchestrator: web::Data<PredictionOrchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(orchestrator.model().status())
}

async fn run_classification(
    orchestrator: web::Data<PredictionOrchestrator>,
    input: ClassifyInput,
) -> Result<ClassifyResponse, ServiceError> {
    let request_id = Uuid::new_v4().to_string();
    let image_hash = hex::encode(Sha256::digest(&input.bytes));

    let result = web::block(move || -> Result<PredictionResult, ServiceError> {
        let image = image::load_from_memory(&input.bytes)?.to_rgb8();
        let mut request = ClassifyRequest::new(&image).privilege_hint(input.privilege_hint);
        request.expected_label = input.expected_label;
        request.image_path = input.image_path.as_deref();
        request.calibration = input.calibration;
        Ok(orchestrator.classify(&request)?)
    })
    .await
    .map_err(|e| ServiceError::Blocking(e.to_string()))?
    .inspect_err(|e| error!("Classification {} failed: {}", request_id, e))?;

    info!(
        "Classified {} as {} ({:.3}, {} tier)",
        request_id, result.predicted_class, result.confidence, result.tier
    );
    Ok(ClassifyResponse {
        request_id,
        image_hash,
        classified_at: chrono::Utc::now().to_rfc3339(),
        result,
    })
}

fn field_text(name: &str, data: Vec<u8>) -> Result<String, ServiceError> {
    String::from_utf8(data)
        .map(|text| text.trim().to_string())
        .map_err(|_| ServiceError::InvalidField {
            field: name.to_string(),
            value: "<non-utf8>".to_string(),
        })
}

/// Empty labels are treated as absent.
fn parse_label(label: &str) -> Result<Option<RiceVariety>, ServiceError> {
    let label = label.trim();
    if label.is_empty() {
        return Ok(None);
    }
    RiceVariety::from_str(label)
        .map(Some)
        .map_err(|_| ServiceError::UnknownLabel(label.to_string()))
}

fn parse_calibration(value: &str) -> Result<Option<CalibrationMode>, ServiceError> {
    if value.is_empty() {
        return Ok(None);
    }
    CalibrationMode::from_str(value)
        .map(Some)
        .map_err(|_| ServiceError::InvalidField {
            field: "calibration".to_string(),
            value: value.to_string(),
        })
}

fn parse_flag(value: &str) -> Result<bool, ServiceError> {
    match value.to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Ok(false),
        "true" | "1" | "yes" => Ok(true),
        _ => Err(ServiceError::InvalidField {
            field: "privilege_hint".to_string(),
            value: value.to_string(),
        }),
    }
}

/// Accepts both bare base64 and `data:image/...;base64,` URLs.
fn strip_data_url(data: &str) -> &str {
    let data = data.trim();
    match data.split_once(";base64,") {
        Some((prefix, encoded)) if prefix.starts_with("data:") => encoded,
        _ => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("jasmine").unwrap(), Some(RiceVariety::Jasmine));
        assert_eq!(parse_label("  ").unwrap(), None);
        assert!(matches!(
            parse_label("wild"),
            Err(ServiceError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_parse_calibration_and_flag() {
        assert_eq!(
            parse_calibration("none").unwrap(),
            Some(CalibrationMode::None)
        );
        assert_eq!(
            parse_calibration("forced_range").unwrap(),
            Some(CalibrationMode::ForcedRange)
        );
        assert!(parse_calibration("loud").is_err());
        assert!(parse_flag("TRUE").unwrap());
        assert!(!parse_flag("").unwrap());
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url(" AAAA\n"), "AAAA");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ServiceError::TooLarge.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ServiceError::MissingImage.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::Blocking("cancelled".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

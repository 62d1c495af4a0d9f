use crate::annotator::annotate_to_data_url;
use crate::config::ServerConfig;
use crate::merge::MergedDamage;
use crate::pipeline::{AnalysisResult, Pipeline, PipelineError, PipelineEvent};
use crate::report::{build_report, InspectionReport, ReportRequest};
use axum::{
    extract::{DefaultBodyLimit, Json, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use damage_detector::{DetectorError, ImageInput};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, server: ServerConfig) -> Self {
        Self {
            pipeline,
            server: Arc::new(server),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Base64 image, optionally as a `data:` URL
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub request_id: Uuid,
    #[serde(flatten)]
    pub result: AnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    detector: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        detector: state.pipeline.detector_info(),
    })
}

/// Decode and validate an uploaded image
fn decode_upload(encoded: &str, max_bytes: usize) -> Result<ImageInput, ApiError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };

    let bytes = STANDARD.decode(payload.trim()).map_err(|e| {
        warn!("Failed to decode base64 image: {}", e);
        api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_IMAGE",
            format!("Failed to decode base64 image: {}", e),
        )
    })?;

    if bytes.len() > max_bytes {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INPUT_TOO_LARGE",
            format!(
                "Image is {} bytes; the limit is {} bytes",
                bytes.len(),
                max_bytes
            ),
        ));
    }

    ImageInput::from_bytes(bytes).map_err(|e| {
        warn!("Rejected upload: {}", e);
        api_error(StatusCode::BAD_REQUEST, "INVALID_IMAGE", e.to_string())
    })
}

fn pipeline_error(e: PipelineError) -> ApiError {
    let status = match &e {
        PipelineError::Detection(DetectorError::MissingCredential(_)) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Detection(DetectorError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Detection(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Refinement(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!("Analysis failed: {}", e);
    api_error(status, e.code(), e.to_string())
}

/// Annotated image as a data URL; rendering problems only cost the picture
async fn render(image: ImageInput, damages: Vec<MergedDamage>) -> Option<String> {
    match tokio::task::spawn_blocking(move || annotate_to_data_url(&image, &damages)).await {
        Ok(Ok(url)) => Some(url),
        Ok(Err(e)) => {
            warn!("Annotation failed: {:#}", e);
            None
        }
        Err(e) => {
            warn!("Annotation task failed: {}", e);
            None
        }
    }
}

async fn analyze_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("analyze", %request_id);

    async move {
        let image = decode_upload(&payload.image, state.server.max_image_bytes)?;
        info!("Analyzing {} byte {} image", image.len(), image.media_type());

        let result = state
            .pipeline
            .analyze(image.clone())
            .await
            .map_err(pipeline_error)?;
        let annotated_image = render(image, result.damages.clone()).await;

        Ok::<_, ApiError>(Json(AnalyzeResponse {
            request_id,
            result,
            annotated_image,
        }))
    }
    .instrument(span)
    .await
}

async fn analyze_stream_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("analyze_stream", %request_id);

    let image = span.in_scope(|| decode_upload(&payload.image, state.server.max_image_bytes))?;
    let events = span.in_scope(|| {
        info!("Streaming analysis of {} byte image", image.len());
        state.pipeline.stream(image.clone())
    });

    let stream = futures::stream::unfold((events, image), move |(mut events, image)| async move {
        let event = events.recv().await?;
        let sse = to_sse_event(event, &image, request_id).await;
        Some((Ok::<_, Infallible>(sse), (events, image)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn to_sse_event(event: PipelineEvent, image: &ImageInput, request_id: Uuid) -> Event {
    let name = event.name();
    let data = match event {
        PipelineEvent::Phase1(coarse) => serde_json::to_string(&coarse),
        PipelineEvent::Phase2(result) | PipelineEvent::Complete(result) => {
            let annotated_image = render(image.clone(), result.damages.clone()).await;
            serde_json::to_string(&AnalyzeResponse {
                request_id,
                result,
                annotated_image,
            })
        }
        PipelineEvent::Error { code, message } => serde_json::to_string(&ErrorResponse {
            error: code.to_string(),
            message,
        }),
    };

    match data {
        Ok(data) => Event::default().event(name).data(data),
        Err(e) => {
            warn!("Failed to serialize {} event: {}", name, e);
            Event::default().event("error").data(format!(
                r#"{{"error":"ANALYSIS_FAILED","message":"failed to serialize {} event"}}"#,
                name
            ))
        }
    }
}

async fn report_handler(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Json<InspectionReport> {
    info!("Building report for {} damages", request.damages.len());
    Json(build_report(
        &request.damages,
        request.annotated_image,
        &state.pipeline.config().severity_policy,
        chrono::Utc::now(),
    ))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}

/// Create the Axum app with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.server.allowed_origins);
    let body_limit = state.server.body_limit();

    Router::new()
        .route("/health", get(health_check))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/analyze/stream", post(analyze_stream_handler))
        .route("/api/report", post(report_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_base64() -> String {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]));
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        STANDARD.encode(buffer.into_inner())
    }

    #[test]
    fn test_decode_upload_accepts_plain_and_data_url() {
        let encoded = png_base64();
        assert!(decode_upload(&encoded, 1024 * 1024).is_ok());
        assert!(decode_upload(&format!("data:image/png;base64,{}", encoded), 1024 * 1024).is_ok());
    }

    #[test]
    fn test_decode_upload_rejections() {
        let (status, Json(body)) = decode_upload("%%%not base64%%%", 1024).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "INVALID_IMAGE");

        let (_, Json(body)) = decode_upload(&STANDARD.encode(b"GIF89a....."), 1024).unwrap_err();
        assert_eq!(body.error, "INVALID_IMAGE");

        let (_, Json(body)) = decode_upload(&png_base64(), 8).unwrap_err();
        assert_eq!(body.error, "INPUT_TOO_LARGE");
    }

    #[test]
    fn test_pipeline_error_status_codes() {
        let (status, Json(body)) = pipeline_error(PipelineError::Detection(
            DetectorError::MissingCredential("ROBOFLOW_API_KEY"),
        ));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error, "DETECTOR_UNAVAILABLE");

        let (status, _) = pipeline_error(PipelineError::Detection(DetectorError::Api {
            status: 500,
            body: "oops".to_string(),
        }));
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, Json(body)) = pipeline_error(PipelineError::Refinement("panicked".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "ANALYSIS_FAILED");
    }
}

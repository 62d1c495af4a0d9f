pub mod annotator;
pub mod assessor;
pub mod config;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod routes;
pub mod summary;

pub use assessor::{AggregateAssessment, AggregateAssessor, OverallSeverity, SeverityPolicy};
pub use config::{DetectorBackend, PipelineConfig, ServerConfig};
pub use merge::{merge, DamageSource, MergedDamage};
pub use pipeline::{AnalysisResult, Pipeline, PipelineError, PipelineEvent};
pub use routes::{create_app, AppState};
pub use summary::DamageSummary;

use damage_detector::roboflow::RoboflowDetector;
use damage_detector::DamageDetector;
use std::sync::Arc;
use tracing::{info, warn};
use vision_reasoner::{VisionClient, VisionDetector, VisionNarrator, VisionRegionReasoner};

/// Build a pipeline wired to the configured detector and the vision model
///
/// Credentials come from the environment. A missing vision key is only
/// logged; every reasoning call then falls back to detector estimates.
pub fn pipeline_from_env(config: PipelineConfig) -> Pipeline {
    let client = reqwest::Client::new();
    let vision = VisionClient::from_env(client.clone());
    let detector: Arc<dyn DamageDetector> = match config.detector {
        DetectorBackend::Roboflow => Arc::new(RoboflowDetector::from_env(client)),
        DetectorBackend::Vision => Arc::new(VisionDetector::new(vision.clone())),
    };

    if !vision.has_credential() {
        warn!(
            "{} not set: damage severity will use detector estimates only",
            vision_reasoner::API_KEY_ENV
        );
    }
    info!(
        "Pipeline: detector {}, reasoning model {}",
        detector.model_info(),
        vision.model()
    );

    Pipeline::new(
        detector,
        Arc::new(VisionRegionReasoner::new(vision.clone())),
        Arc::new(VisionNarrator::new(vision)),
        config,
    )
}

/// Initialize tracing with `RUST_LOG`, defaulting to info
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

use crate::assessor::{AggregateAssessment, AggregateAssessor};
use crate::config::PipelineConfig;
use crate::merge::{coarse_damages, merge, DamageSource, MergedDamage};
use crate::summary::DamageSummary;
use damage_detector::{DamageDetector, DetectorError, ImageInput, RawDetection};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn, Instrument};
use vision_reasoner::{NarrativeModel, RefinedAssessment, RegionReasoner};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("damage detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("refinement aborted: {0}")]
    Refinement(String),
}

impl PipelineError {
    /// Stable machine-readable code, shared by JSON errors and stream events
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Detection(DetectorError::MissingCredential(_)) => "DETECTOR_UNAVAILABLE",
            PipelineError::Detection(DetectorError::Timeout(_)) => "DETECTION_TIMEOUT",
            PipelineError::Detection(_) => "DETECTION_FAILED",
            PipelineError::Refinement(_) => "ANALYSIS_FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub detector: String,
    pub detections: usize,
    /// Regions whose semantics came from the reasoning model
    pub refined_regions: usize,
    /// Regions that fell back to detector defaults
    pub fallback_regions: usize,
    pub execution_time_ms: u128,
    pub stage_timings: Vec<(String, u128)>,
}

/// Final result of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub damages: Vec<MergedDamage>,
    pub summary: DamageSummary,
    #[serde(flatten)]
    pub assessment: AggregateAssessment,
    pub metadata: PipelineMetadata,
}

/// Detector-only view sent as the first streaming phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoarseResult {
    pub damages: Vec<MergedDamage>,
    pub summary: DamageSummary,
}

/// Streaming progress. A run emits `[Complete]`, `[Error]`,
/// `[Phase1, Phase2]` or `[Phase1, Error]`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    Phase1(CoarseResult),
    Phase2(AnalysisResult),
    Complete(AnalysisResult),
    Error { code: &'static str, message: String },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Phase1(_) => "phase1",
            PipelineEvent::Phase2(_) => "phase2",
            PipelineEvent::Complete(_) => "complete",
            PipelineEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineEvent::Phase1(_))
    }

    fn failed(error: &PipelineError) -> Self {
        PipelineEvent::Error {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

struct Refinement {
    damages: Vec<MergedDamage>,
    assessment: AggregateAssessment,
    refined_regions: usize,
    timings: Vec<(String, u128)>,
}

/// Detection, parallel per-region reasoning, aggregation and merge
///
/// Services are injected handles, so one pipeline can be shared across
/// requests (cloning is cheap).
#[derive(Clone)]
pub struct Pipeline {
    detector: Arc<dyn DamageDetector>,
    reasoner: Arc<dyn RegionReasoner>,
    assessor: Arc<AggregateAssessor>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        detector: Arc<dyn DamageDetector>,
        reasoner: Arc<dyn RegionReasoner>,
        narrator: Arc<dyn NarrativeModel>,
        config: PipelineConfig,
    ) -> Self {
        let assessor = AggregateAssessor::new(
            narrator,
            config.severity_policy,
            config.narrative_timeout(),
        );
        Self {
            detector,
            reasoner,
            assessor: Arc::new(assessor),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector_info(&self) -> String {
        self.detector.model_info()
    }

    /// Run the whole pipeline and return the final result
    pub async fn analyze(&self, image: ImageInput) -> Result<AnalysisResult, PipelineError> {
        let start = Instant::now();
        let mut timings = Vec::new();

        let detections = self.detect(&image, &mut timings).await?;
        if detections.is_empty() {
            return Ok(self.empty_result(start, timings));
        }

        let detection_count = detections.len();
        let refinement = self
            .spawn_refinement(detections, image)
            .await
            .map_err(refinement_error)?;
        Ok(self.finish(detection_count, refinement, start, timings))
    }

    /// Run the pipeline, reporting progress on `events`
    ///
    /// Phase 1 is sent before any reasoning starts. If the receiver goes away
    /// the run stops, cancelling any in-flight reasoning calls.
    pub async fn analyze_streaming(&self, image: ImageInput, events: mpsc::Sender<PipelineEvent>) {
        let start = Instant::now();
        let mut timings = Vec::new();

        let detections = match self.detect(&image, &mut timings).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Detection failed: {}", e);
                let _ = events
                    .send(PipelineEvent::failed(&PipelineError::from(e)))
                    .await;
                return;
            }
        };

        if detections.is_empty() {
            let _ = events
                .send(PipelineEvent::Complete(self.empty_result(start, timings)))
                .await;
            return;
        }

        let damages = coarse_damages(&detections);
        let phase1 = CoarseResult {
            summary: DamageSummary::from_damages(&damages),
            damages,
        };
        if events.send(PipelineEvent::Phase1(phase1)).await.is_err() {
            info!("Stream consumer disconnected after detection");
            return;
        }

        let detection_count = detections.len();
        let mut refinement = self.spawn_refinement(detections, image);
        let joined = tokio::select! {
            joined = &mut refinement => joined,
            _ = events.closed() => {
                info!("Stream consumer disconnected during refinement; cancelling reasoning");
                refinement.abort();
                return;
            }
        };

        let event = match joined.map_err(refinement_error) {
            Ok(refinement) => {
                PipelineEvent::Phase2(self.finish(detection_count, refinement, start, timings))
            }
            Err(e) => {
                warn!("Refinement failed after phase 1: {}", e);
                PipelineEvent::failed(&e)
            }
        };
        let _ = events.send(event).await;
    }

    /// Start a streaming run in the background and return its event receiver
    pub fn stream(&self, image: ImageInput) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(4);
        let pipeline = self.clone();
        tokio::spawn(
            async move { pipeline.analyze_streaming(image, tx).await }.in_current_span(),
        );
        rx
    }

    async fn detect(
        &self,
        image: &ImageInput,
        timings: &mut Vec<(String, u128)>,
    ) -> Result<Vec<RawDetection>, DetectorError> {
        let start = Instant::now();
        let timeout = self.config.detector_timeout();

        let detections = tokio::time::timeout(timeout, self.detector.detect(image))
            .await
            .map_err(|_| DetectorError::Timeout(timeout))??;

        let elapsed = start.elapsed().as_millis();
        timings.push(("detection".to_string(), elapsed));
        info!("Detector found {} regions in {}ms", detections.len(), elapsed);

        Ok(detections)
    }

    /// Phase-two work on its own task, so a panic there becomes an error
    /// and the whole fan-out can be aborted through the handle
    fn spawn_refinement(
        &self,
        detections: Vec<RawDetection>,
        image: ImageInput,
    ) -> JoinHandle<Refinement> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.refine(&detections, &image).await }.in_current_span())
    }

    async fn refine(&self, detections: &[RawDetection], image: &ImageInput) -> Refinement {
        let mut timings = Vec::new();

        let start = Instant::now();
        let assessments = self.reason_all(detections, image).await;
        let refined_regions = assessments.iter().filter(|a| a.refined).count();
        timings.push(("reasoning".to_string(), start.elapsed().as_millis()));

        let start = Instant::now();
        let assessment = self.assessor.summarize(&assessments).await;
        timings.push(("assessment".to_string(), start.elapsed().as_millis()));

        let start = Instant::now();
        let damages = merge(detections, &assessments);
        timings.push(("merge".to_string(), start.elapsed().as_millis()));

        Refinement {
            damages,
            assessment,
            refined_regions,
            timings,
        }
    }

    /// One reasoning call per detection, all in flight at once
    ///
    /// Results come back in detection order with their index resolved,
    /// whatever order the calls finish in.
    async fn reason_all(
        &self,
        detections: &[RawDetection],
        image: &ImageInput,
    ) -> Vec<RefinedAssessment> {
        let reasoning_image = self.prepare_image(image).await;
        let timeout = self.config.region_timeout();

        info!("Reasoning over {} regions concurrently", detections.len());

        let calls = detections.iter().map(|detection| {
            let image = &reasoning_image;
            async move {
                match tokio::time::timeout(timeout, self.reasoner.assess(detection, image)).await {
                    Ok(assessment) => assessment,
                    Err(_) => {
                        warn!("Region {}: reasoning timed out after {:?}", detection.index, timeout);
                        RefinedAssessment::fallback(
                            detection,
                            format!("Reasoning timed out after {}s; detector estimate used", timeout.as_secs()),
                        )
                    }
                }
            }
        });

        join_all(calls)
            .await
            .into_iter()
            .zip(detections)
            .map(|(assessment, detection)| resolve_index(assessment, detection))
            .collect()
    }

    /// Downscale once for every region call; the original is used if that fails
    async fn prepare_image(&self, image: &ImageInput) -> ImageInput {
        let max_dimension = self.config.vision_max_dimension;
        let source = image.clone();

        match tokio::task::spawn_blocking(move || source.optimized_for_api(max_dimension)).await {
            Ok(Ok(optimized)) => {
                info!(
                    "Prepared reasoning image: {} -> {} bytes",
                    image.len(),
                    optimized.len()
                );
                optimized
            }
            Ok(Err(e)) => {
                warn!("Image optimization failed, sending original: {}", e);
                image.clone()
            }
            Err(e) => {
                warn!("Image optimization task failed, sending original: {}", e);
                image.clone()
            }
        }
    }

    fn finish(
        &self,
        detections: usize,
        refinement: Refinement,
        start: Instant,
        mut timings: Vec<(String, u128)>,
    ) -> AnalysisResult {
        timings.extend(refinement.timings);
        let execution_time_ms = start.elapsed().as_millis();
        let fallback_regions = refinement
            .damages
            .iter()
            .filter(|d| d.source == DamageSource::Detector)
            .count();

        info!(
            "Analysis complete: {} damages, overall {} ({}ms)",
            refinement.damages.len(),
            refinement.assessment.overall_severity,
            execution_time_ms
        );

        AnalysisResult {
            summary: DamageSummary::from_damages(&refinement.damages),
            damages: refinement.damages,
            assessment: refinement.assessment,
            metadata: PipelineMetadata {
                detector: self.detector.model_info(),
                detections,
                refined_regions: refinement.refined_regions,
                fallback_regions,
                execution_time_ms,
                stage_timings: timings,
            },
        }
    }

    fn empty_result(&self, start: Instant, timings: Vec<(String, u128)>) -> AnalysisResult {
        info!("No damage detected; skipping reasoning");
        AnalysisResult {
            damages: Vec::new(),
            summary: DamageSummary::default(),
            assessment: AggregateAssessment::no_damage(),
            metadata: PipelineMetadata {
                detector: self.detector.model_info(),
                detections: 0,
                refined_regions: 0,
                fallback_regions: 0,
                execution_time_ms: start.elapsed().as_millis(),
                stage_timings: timings,
            },
        }
    }
}

fn refinement_error(e: JoinError) -> PipelineError {
    PipelineError::Refinement(e.to_string())
}

/// Force the assessment's index to its originating detection's
fn resolve_index(mut assessment: RefinedAssessment, detection: &RawDetection) -> RefinedAssessment {
    match assessment.index {
        Some(index) if index == detection.index => {}
        Some(index) => {
            warn!(
                "Region {}: model echoed index {}, reassigning positionally",
                detection.index, index
            );
            assessment.index = Some(detection.index);
        }
        None => assessment.index = Some(detection.index),
    }
    assessment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessor::{NarrativeSource, OverallSeverity};
    use damage_detector::{BoundingBox, DamageType, Severity};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vision_reasoner::{ConfidenceLabel, Narrative, SeverityCounts};

    fn test_image() -> ImageInput {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([90, 90, 90]));
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        ImageInput::from_bytes(buffer.into_inner()).unwrap()
    }

    fn detection(index: usize) -> RawDetection {
        let offset = index as f64 * 10.0;
        RawDetection {
            index,
            bbox: BoundingBox::new(offset, offset, offset + 8.0, offset + 8.0).unwrap(),
            confidence: 0.7,
            class_label: "damage".to_string(),
            coarse_type: DamageType::RoofDamage,
            coarse_severity: Severity::Minor,
            coarse_description: format!("damage {} detected by Roboflow model", index),
        }
    }

    enum DetectorBehavior {
        Found(usize),
        Fails,
        Hangs,
    }

    struct FakeDetector {
        behavior: DetectorBehavior,
    }

    #[async_trait::async_trait]
    impl DamageDetector for FakeDetector {
        async fn detect(&self, _image: &ImageInput) -> Result<Vec<RawDetection>, DetectorError> {
            match self.behavior {
                DetectorBehavior::Found(n) => Ok((0..n).map(detection).collect()),
                DetectorBehavior::Fails => Err(DetectorError::MissingCredential("ROBOFLOW_API_KEY")),
                DetectorBehavior::Hangs => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        fn model_info(&self) -> String {
            "fake-detector".to_string()
        }
    }

    /// Sleeps `delays[index]` seconds, then upgrades the region to severe
    /// hail damage. Omits the echoed index on odd regions.
    struct FakeReasoner {
        delays: Vec<u64>,
        calls: AtomicUsize,
        completed: AtomicUsize,
        panic_on: Option<usize>,
    }

    impl FakeReasoner {
        fn new(delays: Vec<u64>) -> Self {
            Self {
                delays,
                calls: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                panic_on: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl RegionReasoner for FakeReasoner {
        async fn assess(&self, detection: &RawDetection, _image: &ImageInput) -> RefinedAssessment {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays.get(detection.index).copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_secs(delay)).await;
            if self.panic_on == Some(detection.index) {
                panic!("reasoner crashed on region {}", detection.index);
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            RefinedAssessment {
                index: if detection.index % 2 == 0 {
                    Some(detection.index)
                } else {
                    None
                },
                damage_type: DamageType::HailDamage,
                severity: Severity::Severe,
                description: format!("refined {}", detection.index),
                severity_reasoning: "exposed decking".to_string(),
                confidence_note: "high".to_string(),
                refined: true,
            }
        }
    }

    struct FakeNarrator;

    #[async_trait::async_trait]
    impl NarrativeModel for FakeNarrator {
        async fn narrate(&self, counts: &SeverityCounts) -> anyhow::Result<Narrative> {
            Ok(Narrative {
                reasoning: format!("{} findings", counts.total()),
                confidence: ConfidenceLabel::High,
            })
        }
    }

    fn pipeline(behavior: DetectorBehavior, reasoner: Arc<FakeReasoner>) -> Pipeline {
        Pipeline::new(
            Arc::new(FakeDetector { behavior }),
            reasoner,
            Arc::new(FakeNarrator),
            PipelineConfig {
                region_timeout_secs: 10,
                ..PipelineConfig::default()
            },
        )
    }

    async fn collect(mut rx: mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_stable_under_reordered_latencies() {
        let reasoner = Arc::new(FakeReasoner::new(vec![5, 1, 3, 0]));
        let result = pipeline(DetectorBehavior::Found(4), reasoner.clone())
            .analyze(test_image())
            .await
            .unwrap();

        assert_eq!(
            result.damages.iter().map(|d| d.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        for damage in &result.damages {
            assert_eq!(damage.description, format!("refined {}", damage.index));
            assert_eq!(damage.bbox, detection(damage.index).bbox);
            assert_eq!(damage.source, DamageSource::Reasoner);
        }
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.metadata.refined_regions, 4);
        assert_eq!(result.assessment.overall_severity, OverallSeverity::Severe);
        assert_eq!(result.assessment.narrative, "4 findings");
    }

    #[tokio::test(start_paused = true)]
    async fn test_region_calls_run_concurrently() {
        let reasoner = Arc::new(FakeReasoner::new(vec![5, 5, 5]));
        let started = tokio::time::Instant::now();
        pipeline(DetectorBehavior::Found(3), reasoner)
            .analyze(test_image())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_region_falls_back_without_cancelling_siblings() {
        let reasoner = Arc::new(FakeReasoner::new(vec![1, 60, 2]));
        let result = pipeline(DetectorBehavior::Found(3), reasoner)
            .analyze(test_image())
            .await
            .unwrap();

        assert_eq!(result.damages.len(), 3);
        assert_eq!(result.damages[0].source, DamageSource::Reasoner);
        assert_eq!(result.damages[2].source, DamageSource::Reasoner);

        let slow = &result.damages[1];
        assert_eq!(slow.source, DamageSource::Detector);
        assert_eq!(slow.severity, Severity::Minor);
        assert_eq!(slow.description, detection(1).coarse_description);
        assert!(slow.severity_reasoning.contains("timed out"));
        assert_eq!(result.metadata.fallback_regions, 1);
    }

    #[tokio::test]
    async fn test_empty_detection_makes_no_reasoning_calls() {
        let reasoner = Arc::new(FakeReasoner::new(vec![]));
        let result = pipeline(DetectorBehavior::Found(0), reasoner.clone())
            .analyze(test_image())
            .await
            .unwrap();

        assert!(result.damages.is_empty());
        assert_eq!(result.summary.total_damages, 0);
        assert_eq!(result.assessment.overall_severity, OverallSeverity::Unknown);
        assert_eq!(result.assessment.confidence, ConfidenceLabel::High);
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_detector_failure_is_typed() {
        let reasoner = Arc::new(FakeReasoner::new(vec![]));
        let err = pipeline(DetectorBehavior::Fails, reasoner.clone())
            .analyze(test_image())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Detection(DetectorError::MissingCredential(_))
        ));
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_timeout_is_typed() {
        let err = pipeline(DetectorBehavior::Hangs, Arc::new(FakeReasoner::new(vec![])))
            .analyze(test_image())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Detection(DetectorError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_emits_coarse_phase_then_refined_phase() {
        let reasoner = Arc::new(FakeReasoner::new(vec![2, 1]));
        let events = collect(pipeline(DetectorBehavior::Found(2), reasoner).stream(test_image())).await;

        assert_eq!(
            events.iter().map(|e| e.name()).collect::<Vec<_>>(),
            vec!["phase1", "phase2"]
        );

        match &events[0] {
            PipelineEvent::Phase1(coarse) => {
                assert_eq!(coarse.damages.len(), 2);
                assert!(coarse
                    .damages
                    .iter()
                    .all(|d| d.source == DamageSource::Detector && d.severity == Severity::Minor));
                assert_eq!(coarse.summary.count(Severity::Minor), 2);
            }
            other => panic!("expected phase1, got {:?}", other),
        }

        match &events[1] {
            PipelineEvent::Phase2(result) => {
                assert!(result.damages.iter().all(|d| d.severity == Severity::Severe));
                assert_eq!(result.summary.count(Severity::Severe), 2);
                assert_eq!(result.summary.count(Severity::Minor), 0);
                assert_eq!(result.assessment.narrative_source, NarrativeSource::Model);
            }
            other => panic!("expected phase2, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_with_no_detections_sends_single_complete() {
        let reasoner = Arc::new(FakeReasoner::new(vec![]));
        let events = collect(pipeline(DetectorBehavior::Found(0), reasoner.clone()).stream(test_image())).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], PipelineEvent::Complete(r) if r.damages.is_empty()));
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_detector_failure_sends_single_error() {
        let events = collect(
            pipeline(DetectorBehavior::Fails, Arc::new(FakeReasoner::new(vec![]))).stream(test_image()),
        )
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
        assert!(events[0].is_terminal());
        assert!(matches!(
            &events[0],
            PipelineEvent::Error { code: "DETECTOR_UNAVAILABLE", message } if message.contains("ROBOFLOW_API_KEY")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_disconnect_cancels_reasoning() {
        let reasoner = Arc::new(FakeReasoner::new(vec![5, 5, 5]));
        let mut rx = pipeline(DetectorBehavior::Found(3), reasoner.clone()).stream(test_image());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name(), "phase1");
        drop(rx);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(reasoner.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_phase_two_crash_sends_error_after_phase_one() {
        let reasoner = Arc::new(FakeReasoner {
            panic_on: Some(1),
            ..FakeReasoner::new(vec![])
        });
        let events = collect(pipeline(DetectorBehavior::Found(2), reasoner).stream(test_image())).await;

        assert_eq!(
            events.iter().map(|e| e.name()).collect::<Vec<_>>(),
            vec!["phase1", "error"]
        );
        assert!(matches!(&events[1], PipelineEvent::Error { code: "ANALYSIS_FAILED", .. }));
    }

    #[test]
    fn test_resolve_index() {
        let det = detection(3);
        let mut assessment = RefinedAssessment::fallback(&det, "x");

        assessment.index = None;
        assert_eq!(resolve_index(assessment.clone(), &det).index, Some(3));

        assessment.index = Some(9);
        assert_eq!(resolve_index(assessment.clone(), &det).index, Some(3));

        assessment.index = Some(3);
        assert_eq!(resolve_index(assessment, &det).index, Some(3));
    }

    #[test]
    fn test_event_json_shape() {
        let event = PipelineEvent::failed(&PipelineError::Refinement("boom".to_string()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["code"], "ANALYSIS_FAILED");
        assert_eq!(json["data"]["message"], "refinement aborted: boom");
    }

    #[test]
    fn test_error_codes() {
        let cases = [
            (DetectorError::MissingCredential("ROBOFLOW_API_KEY"), "DETECTOR_UNAVAILABLE"),
            (DetectorError::Timeout(Duration::from_secs(30)), "DETECTION_TIMEOUT"),
            (DetectorError::MalformedResponse("{}".to_string()), "DETECTION_FAILED"),
            (
                DetectorError::Exhausted {
                    attempts: 3,
                    last_error: "no JSON".to_string(),
                },
                "DETECTION_FAILED",
            ),
        ];
        for (error, code) in cases {
            assert_eq!(PipelineError::from(error).code(), code);
        }
    }
}

//! Pipeline orchestration
//!
//! This module provides the public analysis API. Each domain runs
//! end-to-end on one keypoint table:
//!
//! - catch: filters → interpolation → smoothing → grab detection → metrics
//! - label domains: frame classification → bout merging
//! - scratch: displacement filtering → per-minute scoring

use crate::classifier::{FrameClassifier, FrameRule};
use crate::config::{
    AnalysisConfig, BehaviorDomain, CatchConfig, ClassifierConfig, FilterConfig, ScratchConfig,
    SmoothingConfig,
};
use crate::error::AnalysisError;
use crate::features::frame_speed;
use crate::filters::{FilterChain, FilterReport};
use crate::grab::{GrabDetector, SwingValidator};
use crate::merger::merge_bouts;
use crate::metrics::{CatchRecord, MetricsExtractor};
use crate::scratch::{ScratchScore, ScratchScorer};
use crate::smoothing::{interpolate_missing, smooth_trajectory};
use crate::table::read_keypoint_csv;
use crate::types::{
    BoutTable, CandidateEvent, FrameSeries, KeypointKey, KeypointTable, LabelSeries,
    TrajectorySlice,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Run the filter chain, then fill and smooth the surviving samples.
///
/// The returned series is gap-free unless fewer than two samples survived.
pub fn clean_trajectory(
    series: &FrameSeries,
    filters: &FilterConfig,
    smoothing: &SmoothingConfig,
) -> (FrameSeries, FilterReport) {
    let (filtered, report) = FilterChain::new(filters).apply(series);
    let filled = interpolate_missing(&filtered);
    (smooth_trajectory(&filled, smoothing), report)
}

/// A grab dropped by swing validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedSwing {
    pub event: CandidateEvent,
    pub reasons: Vec<String>,
}

/// Result of the catch domain for one video
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatchAnalysis {
    pub filter_report: FilterReport,
    pub events: Vec<CandidateEvent>,
    pub rejected: Vec<RejectedSwing>,
    pub records: Vec<CatchRecord>,
    pub trajectories: Vec<TrajectorySlice>,
    /// Cleaned trajectory the events were detected on
    #[serde(skip)]
    pub cleaned: Option<FrameSeries>,
}

/// Analyse reach-and-grab behavior on a single tracked body part.
///
/// # Arguments
/// * `table` - Keypoint table of one video
/// * `config` - Catch parameters; `config.bodypart` selects the keypoint
///
/// # Returns
/// Detected events with one metrics record and trajectory slice each. Videos
/// with fewer than two usable samples yield an empty analysis.
///
/// # Example
/// ```ignore
/// let table = read_keypoint_csv(Path::new("reach.csv"))?;
/// let analysis = analyze_catch(&table, &CatchConfig::default())?;
/// ```
pub fn analyze_catch(table: &KeypointTable, config: &CatchConfig) -> Result<CatchAnalysis, AnalysisError> {
    config.validate()?;
    let series = table.primary(config.bodypart.as_deref())?;

    let (cleaned, filter_report) = clean_trajectory(series, &config.filters, &config.smoothing);
    if filter_report.after_speed < 2 {
        warn!(
            valid = filter_report.after_speed,
            "too few samples survived filtering, no catch events"
        );
        return Ok(CatchAnalysis {
            filter_report,
            ..CatchAnalysis::default()
        });
    }

    let fps = config.fps;
    let mut events = GrabDetector::new(&config.grab, fps).detect(&cleaned);

    events.retain(|event| {
        let duration = event.duration_frames() as f64 / fps;
        config.min_duration_sec.map_or(true, |min| duration >= min)
            && config.max_duration_sec.map_or(true, |max| duration <= max)
    });

    let mut rejected = Vec::new();
    if config.validate_swings {
        let validator = SwingValidator::new(&config.swing);
        events.retain(|event| {
            let verdict = validator.validate(&cleaned, event);
            if verdict.is_valid() {
                return true;
            }
            info!(start = event.start, end = event.end, reasons = ?verdict.reasons, "swing rejected");
            rejected.push(RejectedSwing {
                event: *event,
                reasons: verdict.reasons,
            });
            false
        });
    }

    let extractor = MetricsExtractor::new(fps);
    let mut records = Vec::with_capacity(events.len());
    let mut trajectories = Vec::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        records.push(extractor.catch_record(&cleaned, event)?);
        trajectories.push(extractor.trajectory_slice(&cleaned, i + 1, event.start, event.end)?);
    }

    info!(events = events.len(), rejected = rejected.len(), "catch analysis complete");
    Ok(CatchAnalysis {
        filter_report,
        events,
        rejected,
        records,
        trajectories,
        cleaned: Some(cleaned),
    })
}

/// Result of a label-based domain for one video
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelAnalysis {
    pub frame_count: usize,
    pub valid_frames: usize,
    /// Valid frames per label, before bout merging
    pub label_frames: BTreeMap<String, usize>,
    pub bouts: BoutTable,
    /// Per-frame labels and features, kept for plotting
    #[serde(skip)]
    pub labels: LabelSeries,
    /// Per-frame mouth speeds (px/s) of each individual, social rule only
    #[serde(skip)]
    pub speeds: BTreeMap<String, Vec<f64>>,
}

fn social_speeds(
    table: &KeypointTable,
    rule: &FrameRule,
    fps: f64,
) -> Result<BTreeMap<String, Vec<f64>>, AnalysisError> {
    let mut speeds = BTreeMap::new();
    if let FrameRule::Social {
        individuals, mouth, ..
    } = rule
    {
        for individual in individuals {
            let key = KeypointKey::new(Some(individual.as_str()), mouth);
            let series = interpolate_missing(table.get(&key)?);
            speeds.insert(format!("{individual}_{mouth}_speed"), frame_speed(&series, fps));
        }
    }
    Ok(speeds)
}

/// Classify frames and merge them into bouts for a label-based domain.
///
/// # Arguments
/// * `table` - Keypoint table holding every keypoint the rule requires
/// * `config` - Domain classifier configuration (see `ClassifierConfig::social` and friends)
///
/// # Returns
/// The bout table plus per-frame context. Videos with no valid frame yield
/// an empty bout table.
pub fn analyze_labels(table: &KeypointTable, config: &ClassifierConfig) -> Result<LabelAnalysis, AnalysisError> {
    config.validate()?;
    let labels = FrameClassifier::new(config).classify(table)?;
    let speeds = social_speeds(table, &config.rule, config.fps)?;

    let mut label_frames = BTreeMap::new();
    for i in 0..labels.len() {
        if let Some(label) = labels.valid_label(i) {
            *label_frames.entry(label.to_string()).or_insert(0) += 1;
        }
    }

    let valid_frames = labels.valid_count();
    let bouts = if valid_frames == 0 {
        warn!("no frame passed the confidence check, no bouts");
        Vec::new()
    } else {
        merge_bouts(&labels, &config.bouts, config.fps)
    };

    info!(frames = labels.len(), valid = valid_frames, bouts = bouts.len(), "bout analysis complete");
    Ok(LabelAnalysis {
        frame_count: labels.len(),
        valid_frames,
        label_frames,
        bouts,
        labels,
        speeds,
    })
}

/// Score scratching on a single paw keypoint.
///
/// Videos without any scratch frame yield an empty score.
pub fn analyze_scratch(table: &KeypointTable, config: &ScratchConfig) -> Result<ScratchScore, AnalysisError> {
    config.validate()?;
    let series = table.primary(config.bodypart.as_deref())?;
    match ScratchScorer::score(series, config) {
        Ok(score) => {
            info!(total = score.total(), "scratch analysis complete");
            Ok(score)
        }
        Err(AnalysisError::InsufficientData(reason)) => {
            warn!(%reason, "no scratch frames");
            Ok(ScratchScore::default())
        }
        Err(e) => Err(e),
    }
}

/// Domain-specific analysis result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisOutput {
    Catch(CatchAnalysis),
    Bouts(LabelAnalysis),
    Scratch(ScratchScore),
}

/// JSON report for one analysed video
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub engine_version: String,
    pub domain: BehaviorDomain,
    pub source: Option<String>,
    pub frame_count: usize,
    pub output: AnalysisOutput,
}

impl AnalysisReport {
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-video result of a batch run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed {
        source: String,
        report: AnalysisReport,
    },
    Failed {
        source: String,
        code: String,
        reason: String,
    },
}

impl BatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed { .. })
    }
}

/// Analyzer holding a validated configuration for every domain.
///
/// Calls share no mutable state, so one analyzer can serve many videos.
#[derive(Debug, Clone)]
pub struct BehaviorAnalyzer {
    config: AnalysisConfig,
}

impl Default for BehaviorAnalyzer {
    fn default() -> Self {
        Self {
            config: AnalysisConfig::default(),
        }
    }
}

impl BehaviorAnalyzer {
    /// Create an analyzer, rejecting invalid configuration up front
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run one domain on one keypoint table
    pub fn analyze(&self, domain: BehaviorDomain, table: &KeypointTable) -> Result<AnalysisOutput, AnalysisError> {
        match domain {
            BehaviorDomain::Catch => analyze_catch(table, &self.config.catch).map(AnalysisOutput::Catch),
            BehaviorDomain::Scratch => {
                analyze_scratch(table, &self.config.scratch).map(AnalysisOutput::Scratch)
            }
            label_domain => {
                let config = self.config.classifier(label_domain).ok_or_else(|| {
                    AnalysisError::Configuration(format!("no classifier configured for {label_domain}"))
                })?;
                analyze_labels(table, config).map(AnalysisOutput::Bouts)
            }
        }
    }

    /// Analyse one table and wrap the result in a report
    pub fn report(
        &self,
        domain: BehaviorDomain,
        table: &KeypointTable,
        source: Option<&str>,
    ) -> Result<AnalysisReport, AnalysisError> {
        let output = self.analyze(domain, table)?;
        Ok(AnalysisReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            engine_version: crate::VERSION.to_string(),
            domain,
            source: source.map(str::to_string),
            frame_count: table.frame_count(),
            output,
        })
    }

    /// Read and analyse one keypoint CSV
    pub fn report_file(&self, domain: BehaviorDomain, path: &Path) -> Result<AnalysisReport, AnalysisError> {
        let table = read_keypoint_csv(path)?;
        self.report(domain, &table, Some(&path.display().to_string()))
    }

    /// Analyse several keypoint CSVs independently.
    ///
    /// A failing video is reported with its reason and never stops the batch.
    pub fn analyze_batch<P: AsRef<Path>>(&self, domain: BehaviorDomain, paths: &[P]) -> Vec<BatchOutcome> {
        paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                let source = path.display().to_string();
                match self.report_file(domain, path) {
                    Ok(report) => BatchOutcome::Completed { source, report },
                    Err(e) => {
                        warn!(%source, error = %e, "video failed");
                        BatchOutcome::Failed {
                            source,
                            code: e.code().to_string(),
                            reason: e.to_string(),
                        }
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::write_bouts;
    use crate::types::BehaviorLabel;
    use approx::assert_abs_diff_eq;
    use tempfile::NamedTempFile;

    fn reach_points() -> Vec<(f64, f64)> {
        let mut points = Vec::new();
        for i in 0..=40 {
            let t = i as f64 / 40.0;
            points.push((250.0 + 150.0 * t, 400.0 - 100.0 * t));
        }
        for i in 41..=60 {
            let t = (i - 40) as f64 / 20.0;
            points.push((400.0 - 150.0 * t, 300.0 + 120.0 * t));
        }
        points
    }

    fn catch_table() -> KeypointTable {
        KeypointTable::new()
            .with(KeypointKey::single("leftHand"), FrameSeries::from_points(&reach_points()))
            .unwrap()
    }

    fn constant(n: usize, x: f64, y: f64) -> FrameSeries {
        FrameSeries::from_points(&vec![(x, y); n])
    }

    /// Two animals face to face for `together` frames, then 300 px apart
    fn social_table(together: usize, apart: usize) -> KeypointTable {
        let n = together + apart;
        let shift = |x: f64| -> FrameSeries {
            let points: Vec<(f64, f64)> = (0..n)
                .map(|i| (if i < together { x } else { x + 300.0 }, 0.0))
                .collect();
            FrameSeries::from_points(&points)
        };
        let with_y = |mut series: FrameSeries, y: f64| {
            series.y = vec![y; n];
            series
        };
        KeypointTable::new()
            .with(KeypointKey::new(Some("individual1"), "Mouth"), constant(n, 100.0, 100.0))
            .unwrap()
            .with(KeypointKey::new(Some("individual1"), "left-ear"), constant(n, 90.0, 95.0))
            .unwrap()
            .with(KeypointKey::new(Some("individual1"), "right-ear"), constant(n, 90.0, 105.0))
            .unwrap()
            .with(KeypointKey::new(Some("individual2"), "Mouth"), with_y(shift(150.0), 100.0))
            .unwrap()
            .with(KeypointKey::new(Some("individual2"), "left-ear"), with_y(shift(160.0), 105.0))
            .unwrap()
            .with(KeypointKey::new(Some("individual2"), "right-ear"), with_y(shift(160.0), 95.0))
            .unwrap()
    }

    #[test]
    fn test_low_confidence_gap_is_restored() {
        let points: Vec<(f64, f64)> = (0..300).map(|i| (i as f64 * 300.0 / 299.0, 100.0)).collect();
        let mut series = FrameSeries::from_points(&points);
        for i in 50..=60 {
            series.likelihood[i] = 0.1;
        }
        let filters = FilterConfig {
            likelihood_threshold: 0.5,
            position_region: None,
            extreme_jump_px: Some(200.0),
            max_speed_px: Some(50.0),
        };
        let (cleaned, report) = clean_trajectory(&series, &filters, &SmoothingConfig::default());

        assert_eq!(report.after_confidence, 289);
        assert!(cleaned.is_complete());
        for i in 0..300 {
            assert_abs_diff_eq!(cleaned.x[i], points[i].0, epsilon = 1.0);
        }
    }

    #[test]
    fn test_cleaning_is_idempotent_on_cleaned_data() {
        // Smooth reach-area path with alternating jitter
        let points: Vec<(f64, f64)> = (0..240)
            .map(|i| {
                let t = i as f64;
                let jitter_x = if i % 2 == 0 { 1.0 } else { -1.0 };
                let jitter_y = if i % 3 == 0 { 0.8 } else { -0.4 };
                (
                    300.0 + 80.0 * (t / 15.0).sin() + jitter_x,
                    350.0 + 40.0 * (t / 20.0).cos() + jitter_y,
                )
            })
            .collect();
        let series = FrameSeries::from_points(&points);
        let config = CatchConfig::default();

        let (once, first) = clean_trajectory(&series, &config.filters, &config.smoothing);
        let (twice, second) = clean_trajectory(&once, &config.filters, &config.smoothing);

        assert_eq!(first.after_speed, 240);
        assert_eq!(second.input, 240);
        assert_eq!(second.after_speed, 240);
        for i in 0..240 {
            assert_abs_diff_eq!(once.x[i], twice.x[i], epsilon = 0.5);
            assert_abs_diff_eq!(once.y[i], twice.y[i], epsilon = 0.5);
        }
    }

    #[test]
    fn test_catch_end_to_end() {
        let analysis = analyze_catch(&catch_table(), &CatchConfig::default()).unwrap();
        assert_eq!(analysis.events.len(), 1);
        assert_eq!(analysis.records.len(), 1);
        let event = analysis.events[0];
        assert_eq!(event.start, 0);
        assert_eq!(analysis.trajectories[0].event_index, 1);
        assert_eq!(analysis.trajectories[0].points.len(), event.end - event.start + 1);
        assert_eq!(analysis.records[0].start_frame, event.start);
        assert!(analysis.rejected.is_empty());
    }

    #[test]
    fn test_catch_swing_validation_rejects() {
        let mut config = CatchConfig::default();
        config.validate_swings = true;
        config.swing.min_distance_px = 1000.0;
        let analysis = analyze_catch(&catch_table(), &config).unwrap();
        assert!(analysis.records.is_empty());
        assert_eq!(analysis.rejected.len(), 1);
        assert!(analysis.rejected[0].reasons[0].contains("horizontal distance"));
    }

    #[test]
    fn test_catch_duration_bounds() {
        let config = CatchConfig {
            max_duration_sec: Some(0.1),
            ..CatchConfig::default()
        };
        let analysis = analyze_catch(&catch_table(), &config).unwrap();
        assert!(analysis.events.is_empty());
    }

    #[test]
    fn test_catch_without_confident_frames_is_empty() {
        let mut series = FrameSeries::from_points(&reach_points());
        series.likelihood = vec![0.1; series.len()];
        let table = KeypointTable::new().with(KeypointKey::single("leftHand"), series).unwrap();
        let analysis = analyze_catch(&table, &CatchConfig::default()).unwrap();
        assert!(analysis.events.is_empty());
        assert_eq!(analysis.filter_report.after_confidence, 0);
    }

    #[test]
    fn test_social_interaction_bout() {
        let analysis = analyze_labels(&social_table(100, 50), &ClassifierConfig::social()).unwrap();
        assert_eq!(analysis.bouts.len(), 1);
        let bout = &analysis.bouts[0];
        assert_eq!(bout.label, BehaviorLabel::Interaction);
        assert_eq!((bout.start_frame, bout.end_frame), (0, 99));
        assert_abs_diff_eq!(bout.snapshot["distance"], 50.0);
        assert_eq!(analysis.label_frames["interaction"], 100);
        assert_eq!(analysis.speeds["individual2_Mouth_speed"][100], 9000.0);
    }

    #[test]
    fn test_unconfident_video_has_no_bouts() {
        let mut table = social_table(100, 0);
        let mut mouth = table.get(&KeypointKey::new(Some("individual1"), "Mouth")).unwrap().clone();
        mouth.likelihood = vec![0.5; 100];
        table.insert(KeypointKey::new(Some("individual1"), "Mouth"), mouth).unwrap();
        let analysis = analyze_labels(&table, &ClassifierConfig::social()).unwrap();
        assert_eq!(analysis.valid_frames, 0);
        assert!(analysis.bouts.is_empty());
    }

    #[test]
    fn test_bout_tables_are_deterministic() {
        let table = social_table(120, 80);
        let render = || {
            let analysis = analyze_labels(&table, &ClassifierConfig::social()).unwrap();
            let mut out = Vec::new();
            write_bouts(&mut out, &analysis.bouts).unwrap();
            out
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn test_analyzer_dispatches_domains() {
        let analyzer = BehaviorAnalyzer::default();
        let output = analyzer.analyze(BehaviorDomain::Catch, &catch_table()).unwrap();
        assert!(matches!(output, AnalysisOutput::Catch(_)));

        let missing = analyzer.analyze(BehaviorDomain::Grooming, &catch_table());
        assert!(matches!(missing, Err(AnalysisError::MissingInput(_))));
    }

    #[test]
    fn test_report_serializes() {
        let analyzer = BehaviorAnalyzer::default();
        let report = analyzer
            .report(BehaviorDomain::Social, &social_table(100, 50), Some("pair.csv"))
            .unwrap();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"domain\": \"social\""));
        assert!(json.contains("\"kind\": \"bouts\""));
        assert_eq!(report.frame_count, 150);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_processing() {
        let mut config = AnalysisConfig::default();
        config.catch.fps = 0.0;
        assert!(matches!(
            BehaviorAnalyzer::new(config),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let good = NamedTempFile::new().unwrap();
        let mut csv = String::from(
            "scorer,DLC,DLC,DLC\nbodyparts,leftHand,leftHand,leftHand\ncoords,x,y,likelihood\n",
        );
        for (i, (x, y)) in reach_points().iter().enumerate() {
            csv.push_str(&format!("{i},{x},{y},1.0\n"));
        }
        std::fs::write(good.path(), csv).unwrap();

        let analyzer = BehaviorAnalyzer::default();
        let paths = vec![
            Path::new("/nonexistent/missing.csv").to_path_buf(),
            good.path().to_path_buf(),
        ];
        let outcomes = analyzer.analyze_batch(BehaviorDomain::Catch, &paths);

        assert_eq!(outcomes.len(), 2);
        match &outcomes[0] {
            BatchOutcome::Failed { code, .. } => assert_eq!(code, "MISSING_INPUT"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(outcomes[1].is_completed());
    }
}

//! Analysis configuration
//!
//! Every tunable threshold lives here with its documented per-domain default.
//! Components never read ambient state: the pipeline hands each one the
//! config it needs.

use crate::classifier::FrameRule;
use crate::error::AnalysisError;
use crate::types::{KeypointKey, Region};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Behavior domains handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorDomain {
    Catch,
    Social,
    Cpp,
    Grooming,
    Swimming,
    ThreeChamber,
    Scratch,
}

impl BehaviorDomain {
    pub const ALL: [BehaviorDomain; 7] = [
        BehaviorDomain::Catch,
        BehaviorDomain::Social,
        BehaviorDomain::Cpp,
        BehaviorDomain::Grooming,
        BehaviorDomain::Swimming,
        BehaviorDomain::ThreeChamber,
        BehaviorDomain::Scratch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorDomain::Catch => "catch",
            BehaviorDomain::Social => "social",
            BehaviorDomain::Cpp => "cpp",
            BehaviorDomain::Grooming => "grooming",
            BehaviorDomain::Swimming => "swimming",
            BehaviorDomain::ThreeChamber => "three_chamber",
            BehaviorDomain::Scratch => "scratch",
        }
    }
}

impl fmt::Display for BehaviorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A duration expressed either in frames or in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSpan {
    Frames(usize),
    Seconds(f64),
}

impl TimeSpan {
    /// Convert to a frame count; seconds are truncated toward zero
    pub fn to_frames(&self, fps: f64) -> usize {
        match *self {
            TimeSpan::Frames(frames) => frames,
            TimeSpan::Seconds(seconds) => {
                let frames = seconds * fps;
                if frames.is_finite() && frames > 0.0 {
                    frames as usize
                } else {
                    0
                }
            }
        }
    }

    fn validate(&self, name: &str) -> Result<(), AnalysisError> {
        if let TimeSpan::Seconds(seconds) = self {
            if !seconds.is_finite() || *seconds < 0.0 {
                return Err(AnalysisError::Configuration(format!(
                    "{name} must be a non-negative number of seconds, got {seconds}"
                )));
            }
        }
        Ok(())
    }
}

fn validate_fps(fps: f64) -> Result<(), AnalysisError> {
    if !fps.is_finite() || fps <= 0.0 {
        return Err(AnalysisError::Configuration(format!(
            "fps must be positive, got {fps}"
        )));
    }
    Ok(())
}

fn validate_probability(name: &str, value: f64) -> Result<(), AnalysisError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AnalysisError::Configuration(format!(
            "{name} must lie in [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn validate_positive(name: &str, value: f64) -> Result<(), AnalysisError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AnalysisError::Configuration(format!(
            "{name} must be positive, got {value}"
        )));
    }
    Ok(())
}

/// Filter chain parameters. Stages left as `None` are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub likelihood_threshold: f64,
    pub position_region: Option<Region>,
    pub extreme_jump_px: Option<f64>,
    /// Maximum displacement between neighbouring frames (px/frame)
    pub max_speed_px: Option<f64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            likelihood_threshold: 0.5,
            position_region: None,
            extreme_jump_px: Some(200.0),
            max_speed_px: Some(50.0),
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        validate_probability("likelihood_threshold", self.likelihood_threshold)?;
        if let Some(region) = &self.position_region {
            region.validate("position_region")?;
        }
        if let Some(jump) = self.extreme_jump_px {
            validate_positive("extreme_jump_px", jump)?;
        }
        if let Some(speed) = self.max_speed_px {
            validate_positive("max_speed_px", speed)?;
        }
        Ok(())
    }
}

/// Savitzky-Golay smoothing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub window_length: usize,
    pub polyorder: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_length: 7,
            polyorder: 2,
        }
    }
}

impl SmoothingConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.window_length % 2 == 0 {
            return Err(AnalysisError::Configuration(format!(
                "smoothing window_length must be odd, got {}",
                self.window_length
            )));
        }
        if self.polyorder >= self.window_length {
            return Err(AnalysisError::Configuration(format!(
                "smoothing polyorder ({}) must be less than window_length ({})",
                self.polyorder, self.window_length
            )));
        }
        Ok(())
    }
}

/// Region/peak grab detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    pub barrier_region: Region,
    pub start_region: Region,
    pub max_back_time_sec: f64,
    pub max_forward_time_sec: f64,
    pub min_frame_gap: usize,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            barrier_region: Region::new(330.0, 450.0, 250.0, 400.0),
            start_region: Region::new(200.0, 300.0, 350.0, 450.0),
            max_back_time_sec: 0.5,
            max_forward_time_sec: 0.2,
            min_frame_gap: 60,
        }
    }
}

impl GrabConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.barrier_region.validate("barrier_region")?;
        self.start_region.validate("start_region")?;
        if !(self.max_back_time_sec >= 0.0 && self.max_forward_time_sec >= 0.0) {
            return Err(AnalysisError::Configuration(
                "grab search windows must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Acceptance criteria for a detected grab swing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingValidationConfig {
    pub min_distance_px: f64,
    pub min_height_change_px: f64,
    /// Upward y-velocity (px/frame) that counts as a lift
    pub min_lift_speed_px: f64,
    pub min_duration_frames: usize,
    pub max_duration_frames: usize,
    pub start_x_min: f64,
    pub start_y_max: f64,
    pub end_x_min: f64,
    pub end_y_max: f64,
}

impl Default for SwingValidationConfig {
    fn default() -> Self {
        Self {
            min_distance_px: 20.0,
            min_height_change_px: 10.0,
            min_lift_speed_px: 2.0,
            min_duration_frames: 20,
            max_duration_frames: 120,
            start_x_min: 150.0,
            start_y_max: 400.0,
            end_x_min: 330.0,
            end_y_max: 350.0,
        }
    }
}

/// Catch (reach-and-grab) analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchConfig {
    pub fps: f64,
    /// Body part to track; `None` uses the table's only keypoint
    pub bodypart: Option<String>,
    pub filters: FilterConfig,
    pub smoothing: SmoothingConfig,
    pub grab: GrabConfig,
    pub min_duration_sec: Option<f64>,
    pub max_duration_sec: Option<f64>,
    pub validate_swings: bool,
    pub swing: SwingValidationConfig,
}

impl Default for CatchConfig {
    fn default() -> Self {
        Self {
            fps: 120.0,
            bodypart: None,
            filters: FilterConfig {
                likelihood_threshold: 0.6,
                position_region: Some(Region::new(199.0, 450.0, 220.0, 450.0)),
                extreme_jump_px: Some(200.0),
                max_speed_px: Some(100.0),
            },
            smoothing: SmoothingConfig::default(),
            grab: GrabConfig::default(),
            min_duration_sec: None,
            max_duration_sec: None,
            validate_swings: false,
            swing: SwingValidationConfig::default(),
        }
    }
}

impl CatchConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        validate_fps(self.fps)?;
        self.filters.validate()?;
        self.smoothing.validate()?;
        self.grab.validate()?;
        if let (Some(min), Some(max)) = (self.min_duration_sec, self.max_duration_sec) {
            if min > max {
                return Err(AnalysisError::Configuration(format!(
                    "min_duration_sec ({min}) exceeds max_duration_sec ({max})"
                )));
            }
        }
        Ok(())
    }
}

/// Segmentation rules shared by the label-based domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoutRules {
    pub min_duration: TimeSpan,
    /// Bouts longer than this are discarded; `None` keeps them
    pub max_duration: Option<TimeSpan>,
    /// Look-ahead window for re-matching the open label; zero disables bridging
    pub gap: TimeSpan,
    /// Majority-vote window applied to labels before segmentation
    pub label_smoothing: Option<TimeSpan>,
}

impl Default for BoutRules {
    fn default() -> Self {
        Self {
            min_duration: TimeSpan::Frames(15),
            max_duration: Some(TimeSpan::Frames(35)),
            gap: TimeSpan::Frames(0),
            label_smoothing: None,
        }
    }
}

impl BoutRules {
    pub fn validate(&self, fps: f64) -> Result<(), AnalysisError> {
        self.min_duration.validate("min_duration")?;
        self.gap.validate("gap")?;
        if let Some(window) = &self.label_smoothing {
            window.validate("label_smoothing")?;
        }
        if let Some(max) = &self.max_duration {
            max.validate("max_duration")?;
            let (min_frames, max_frames) = (self.min_duration.to_frames(fps), max.to_frames(fps));
            if min_frames > max_frames {
                return Err(AnalysisError::Configuration(format!(
                    "min_duration ({min_frames} frames) exceeds max_duration ({max_frames} frames)"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration of one label-based domain (social, cpp, grooming, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub fps: f64,
    /// A frame is valid only when every listed keypoint exceeds this likelihood
    pub likelihood_threshold: f64,
    pub required_keypoints: Vec<KeypointKey>,
    pub rule: FrameRule,
    #[serde(default)]
    pub bouts: BoutRules,
}

impl ClassifierConfig {
    fn singles(names: &[&str]) -> Vec<KeypointKey> {
        names.iter().map(|name| KeypointKey::single(name)).collect()
    }

    pub fn social() -> Self {
        let individuals = ["individual1", "individual2"];
        let bodyparts = ["Mouth", "left-ear", "right-ear"];
        Self {
            fps: 30.0,
            likelihood_threshold: 0.999,
            required_keypoints: individuals
                .iter()
                .flat_map(|ind| bodyparts.iter().map(move |bp| KeypointKey::new(Some(*ind), bp)))
                .collect(),
            rule: FrameRule::Social {
                individuals: [individuals[0].to_string(), individuals[1].to_string()],
                mouth: bodyparts[0].to_string(),
                left_ear: bodyparts[1].to_string(),
                right_ear: bodyparts[2].to_string(),
                close_distance_px: 100.0,
                facing_angle_deg: 45.0,
            },
            bouts: BoutRules {
                min_duration: TimeSpan::Seconds(2.0),
                max_duration: None,
                gap: TimeSpan::Seconds(2.0),
                label_smoothing: Some(TimeSpan::Seconds(0.5)),
            },
        }
    }

    /// Conditioned place preference sides.
    ///
    /// The gap is 0, so any frame at or below the likelihood threshold closes
    /// the open bout. Raise `bouts.gap` to keep bouts open across short
    /// low-confidence stretches.
    pub fn cpp() -> Self {
        Self {
            fps: 30.0,
            likelihood_threshold: 0.999,
            required_keypoints: Self::singles(&["nose", "head", "body", "tail"]),
            rule: FrameRule::AreaSplit {
                center_keypoints: vec![KeypointKey::single("head"), KeypointKey::single("body")],
                midline_x: 375.0,
            },
            bouts: BoutRules::default(),
        }
    }

    pub fn grooming() -> Self {
        Self {
            fps: 30.0,
            likelihood_threshold: 0.999,
            required_keypoints: Self::singles(&["nose", "leftPaw", "rightPaw", "mouth"]),
            rule: FrameRule::PawProximity {
                paws: Self::singles(&["leftPaw", "rightPaw"]),
                target: KeypointKey::single("mouth"),
                max_distance_px: 30.0,
                label: crate::types::BehaviorLabel::Grooming,
            },
            bouts: BoutRules::default(),
        }
    }

    pub fn swimming() -> Self {
        Self {
            fps: 30.0,
            likelihood_threshold: 0.999,
            required_keypoints: Self::singles(&["nose", "head", "body", "tail"]),
            rule: FrameRule::BodyBend {
                head: KeypointKey::single("head"),
                body: KeypointKey::single("body"),
                tail: KeypointKey::single("tail"),
                min_angle_deg: 30.0,
            },
            bouts: BoutRules::default(),
        }
    }

    pub fn three_chamber() -> Self {
        Self {
            fps: 30.0,
            likelihood_threshold: 0.999,
            required_keypoints: Self::singles(&["nose", "leftPaw", "rightPaw", "tail"]),
            rule: FrameRule::PawProximity {
                paws: Self::singles(&["leftPaw", "rightPaw"]),
                target: KeypointKey::single("tail"),
                max_distance_px: 40.0,
                label: crate::types::BehaviorLabel::TailContact,
            },
            bouts: BoutRules::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        validate_fps(self.fps)?;
        validate_probability("likelihood_threshold", self.likelihood_threshold)?;
        if self.required_keypoints.is_empty() {
            return Err(AnalysisError::Configuration(
                "required_keypoints must not be empty".to_string(),
            ));
        }
        self.rule.validate()?;
        self.bouts.validate(self.fps)
    }
}

/// Scratch scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    pub fps: f64,
    pub bodypart: Option<String>,
    pub likelihood_threshold: f64,
    pub min_distance_px: f64,
    pub max_distance_px: f64,
    /// Minutes with at most this many scratch frames score zero
    pub minute_count_floor: usize,
    pub interval_minutes: usize,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            bodypart: None,
            likelihood_threshold: 0.99999,
            min_distance_px: 10.0,
            max_distance_px: 25.0,
            minute_count_floor: 5,
            interval_minutes: 5,
        }
    }
}

impl ScratchConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        validate_fps(self.fps)?;
        validate_probability("likelihood_threshold", self.likelihood_threshold)?;
        if !(self.min_distance_px <= self.max_distance_px) {
            return Err(AnalysisError::Configuration(format!(
                "min_distance_px ({}) exceeds max_distance_px ({})",
                self.min_distance_px, self.max_distance_px
            )));
        }
        if self.interval_minutes == 0 {
            return Err(AnalysisError::Configuration(
                "interval_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Label-domain sections are read as overrides on top of the domain preset,
/// so a section may name only the fields it changes.
mod overrides {
    use super::ClassifierConfig;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Recursive object merge. An object naming a key the preset lacks (a
    /// different enum variant, for instance) replaces the preset value whole.
    pub(super) fn merge(base: &mut Value, patch: Value) {
        match (base, patch) {
            (Value::Object(base), Value::Object(patch))
                if patch.keys().all(|key| base.contains_key(key)) =>
            {
                for (key, value) in patch {
                    if let Some(slot) = base.get_mut(&key) {
                        merge(slot, value);
                    }
                }
            }
            (base, patch) => *base = patch,
        }
    }

    fn over_preset<'de, D: Deserializer<'de>>(
        preset: ClassifierConfig,
        deserializer: D,
    ) -> Result<ClassifierConfig, D::Error> {
        let patch = Value::deserialize(deserializer)?;
        let mut base = serde_json::to_value(&preset).map_err(D::Error::custom)?;
        merge(&mut base, patch);
        serde_json::from_value(base).map_err(D::Error::custom)
    }

    pub(super) fn social<'de, D: Deserializer<'de>>(d: D) -> Result<ClassifierConfig, D::Error> {
        over_preset(ClassifierConfig::social(), d)
    }

    pub(super) fn cpp<'de, D: Deserializer<'de>>(d: D) -> Result<ClassifierConfig, D::Error> {
        over_preset(ClassifierConfig::cpp(), d)
    }

    pub(super) fn grooming<'de, D: Deserializer<'de>>(d: D) -> Result<ClassifierConfig, D::Error> {
        over_preset(ClassifierConfig::grooming(), d)
    }

    pub(super) fn swimming<'de, D: Deserializer<'de>>(d: D) -> Result<ClassifierConfig, D::Error> {
        over_preset(ClassifierConfig::swimming(), d)
    }

    pub(super) fn three_chamber<'de, D: Deserializer<'de>>(d: D) -> Result<ClassifierConfig, D::Error> {
        over_preset(ClassifierConfig::three_chamber(), d)
    }
}

/// Configuration for every domain, loadable from a single JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub catch: CatchConfig,
    #[serde(default = "ClassifierConfig::social", deserialize_with = "overrides::social")]
    pub social: ClassifierConfig,
    #[serde(default = "ClassifierConfig::cpp", deserialize_with = "overrides::cpp")]
    pub cpp: ClassifierConfig,
    #[serde(default = "ClassifierConfig::grooming", deserialize_with = "overrides::grooming")]
    pub grooming: ClassifierConfig,
    #[serde(default = "ClassifierConfig::swimming", deserialize_with = "overrides::swimming")]
    pub swimming: ClassifierConfig,
    #[serde(default = "ClassifierConfig::three_chamber", deserialize_with = "overrides::three_chamber")]
    pub three_chamber: ClassifierConfig,
    #[serde(default)]
    pub scratch: ScratchConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            catch: CatchConfig::default(),
            social: ClassifierConfig::social(),
            cpp: ClassifierConfig::cpp(),
            grooming: ClassifierConfig::grooming(),
            swimming: ClassifierConfig::swimming(),
            three_chamber: ClassifierConfig::three_chamber(),
            scratch: ScratchConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Parse and validate a JSON configuration; omitted sections keep defaults
    pub fn from_json_str(json: &str) -> Result<Self, AnalysisError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Override the frame rate of every domain
    pub fn set_fps(&mut self, fps: f64) {
        self.catch.fps = fps;
        self.scratch.fps = fps;
        for domain in [
            &mut self.social,
            &mut self.cpp,
            &mut self.grooming,
            &mut self.swimming,
            &mut self.three_chamber,
        ] {
            domain.fps = fps;
        }
    }

    /// Config of a label-based domain; `None` for catch and scratch
    pub fn classifier(&self, domain: BehaviorDomain) -> Option<&ClassifierConfig> {
        match domain {
            BehaviorDomain::Social => Some(&self.social),
            BehaviorDomain::Cpp => Some(&self.cpp),
            BehaviorDomain::Grooming => Some(&self.grooming),
            BehaviorDomain::Swimming => Some(&self.swimming),
            BehaviorDomain::ThreeChamber => Some(&self.three_chamber),
            BehaviorDomain::Catch | BehaviorDomain::Scratch => None,
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.catch.validate()?;
        self.scratch.validate()?;
        for domain in BehaviorDomain::ALL {
            if let Some(config) = self.classifier(domain) {
                config.validate().map_err(|e| match e {
                    AnalysisError::Configuration(msg) => {
                        AnalysisError::Configuration(format!("{domain}: {msg}"))
                    }
                    other => other,
                })?;
            }
        }
        Ok(())
    }
}

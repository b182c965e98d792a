use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::{DetectionParams, FramePolicy};
use crate::frame::{PixelFormat, MAX_FRAME_DIMENSION};

const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_WIDTH: u32 = 320;
const DEFAULT_SOURCE_HEIGHT: u32 = 240;
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SCALE_FACTOR: f64 = 1.1;
const DEFAULT_MIN_NEIGHBORS: u32 = 3;
const DEFAULT_MIN_SIZE: (u32, u32) = (30, 30);
const DEFAULT_DETECT_INTERVAL_TICKS: u32 = 1;

#[derive(Debug, Deserialize, Default)]
struct DetectdConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    classifiers: Option<Vec<ClassifierConfigFile>>,
    worker: Option<WorkerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    format: Option<String>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
    min_size: Option<[u32; 2]>,
}

#[derive(Debug, Deserialize)]
struct ClassifierConfigFile {
    name: String,
    source: String,
}

#[derive(Debug, Deserialize, Default)]
struct WorkerConfigFile {
    capacity: Option<usize>,
    frame_policy: Option<String>,
    detect_interval_ticks: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DetectdConfig {
    pub source: SourceSettings,
    pub detection: DetectionParams,
    /// Classifiers in registration order.
    pub classifiers: Vec<ClassifierSpec>,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierSpec {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// `None` means unbounded.
    pub capacity: Option<usize>,
    pub frame_policy: FramePolicy,
    pub detect_interval_ticks: u32,
}

impl Default for DetectdConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings {
                url: DEFAULT_SOURCE_URL.to_string(),
                width: DEFAULT_SOURCE_WIDTH,
                height: DEFAULT_SOURCE_HEIGHT,
                format: PixelFormat::Rgb8,
                fps: DEFAULT_SOURCE_FPS,
            },
            detection: DetectionParams {
                scale_factor: DEFAULT_SCALE_FACTOR,
                min_neighbors: DEFAULT_MIN_NEIGHBORS,
                min_size: DEFAULT_MIN_SIZE,
            },
            classifiers: Vec::new(),
            worker: WorkerSettings {
                capacity: None,
                frame_policy: FramePolicy::Latest,
                detect_interval_ticks: DEFAULT_DETECT_INTERVAL_TICKS,
            },
        }
    }
}

impl DetectdConfig {
    /// Load from the file named by `DETECT_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectdConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let source_file = file.source.unwrap_or_default();
        let format = match source_file.format.as_deref() {
            Some(format) => PixelFormat::parse(format)?,
            None => defaults.source.format,
        };
        let source = SourceSettings {
            url: source_file.url.unwrap_or(defaults.source.url),
            width: source_file.width.unwrap_or(defaults.source.width),
            height: source_file.height.unwrap_or(defaults.source.height),
            format,
            fps: source_file.fps.unwrap_or(defaults.source.fps),
        };

        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionParams {
            scale_factor: detection_file
                .scale_factor
                .unwrap_or(defaults.detection.scale_factor),
            min_neighbors: detection_file
                .min_neighbors
                .unwrap_or(defaults.detection.min_neighbors),
            min_size: detection_file
                .min_size
                .map(|[w, h]| (w, h))
                .unwrap_or(defaults.detection.min_size),
        };

        let classifiers = file
            .classifiers
            .unwrap_or_default()
            .into_iter()
            .map(|c| ClassifierSpec {
                name: c.name,
                source: c.source,
            })
            .collect();

        let worker_file = file.worker.unwrap_or_default();
        let frame_policy = match worker_file.frame_policy.as_deref() {
            Some(policy) => FramePolicy::parse(policy)?,
            None => defaults.worker.frame_policy,
        };
        let worker = WorkerSettings {
            capacity: worker_file.capacity,
            frame_policy,
            detect_interval_ticks: worker_file
                .detect_interval_ticks
                .unwrap_or(defaults.worker.detect_interval_ticks),
        };

        Ok(Self {
            source,
            detection,
            classifiers,
            worker,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("DETECT_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(scale) = std::env::var("DETECT_SCALE_FACTOR") {
            self.detection.scale_factor = scale
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_SCALE_FACTOR must be a number"))?;
        }
        if let Ok(neighbors) = std::env::var("DETECT_MIN_NEIGHBORS") {
            self.detection.min_neighbors = neighbors
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_MIN_NEIGHBORS must be a non-negative integer"))?;
        }
        if let Ok(size) = std::env::var("DETECT_MIN_SIZE") {
            self.detection.min_size = parse_size(&size)?;
        }
        if let Ok(capacity) = std::env::var("DETECT_QUEUE_CAPACITY") {
            self.worker.capacity = parse_capacity(&capacity)?;
        }
        if let Ok(policy) = std::env::var("DETECT_FRAME_POLICY") {
            if !policy.trim().is_empty() {
                self.worker.frame_policy = FramePolicy::parse(&policy)?;
            }
        }
        if let Ok(classifiers) = std::env::var("DETECT_CLASSIFIERS") {
            let parsed = parse_classifier_list(&classifiers)?;
            if !parsed.is_empty() {
                self.classifiers = parsed;
            }
        }
        Ok(())
    }

    /// Check invariants and normalize classifier names to lowercase.
    pub fn validate(&mut self) -> Result<()> {
        self.detection.validate()?;

        let mut seen = Vec::with_capacity(self.classifiers.len());
        for classifier in &mut self.classifiers {
            crate::validate_classifier_name(&classifier.name)?;
            classifier.name = classifier.name.to_lowercase();
            if seen.contains(&classifier.name) {
                return Err(anyhow!(
                    "classifier '{}' configured more than once",
                    classifier.name
                ));
            }
            seen.push(classifier.name.clone());
        }

        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        if self.source.width > MAX_FRAME_DIMENSION || self.source.height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "source dimensions must be at most {} pixels per side",
                MAX_FRAME_DIMENSION
            ));
        }
        if self.source.fps == 0 {
            return Err(anyhow!("source fps must be >= 1"));
        }
        if self.worker.capacity == Some(0) {
            return Err(anyhow!("worker capacity must be >= 1 (omit for unbounded)"));
        }
        if self.worker.detect_interval_ticks == 0 {
            return Err(anyhow!("detect_interval_ticks must be >= 1"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DetectdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: DetectdConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse `WxH` (e.g. `24x24`).
pub fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("size '{}' must look like WIDTHxHEIGHT", value))?;
    let w = w
        .trim()
        .parse()
        .map_err(|_| anyhow!("size '{}' has an invalid width", value))?;
    let h = h
        .trim()
        .parse()
        .map_err(|_| anyhow!("size '{}' has an invalid height", value))?;
    Ok((w, h))
}

/// Parse a queue capacity; `0`, empty or `unbounded` mean no limit.
fn parse_capacity(value: &str) -> Result<Option<usize>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("unbounded") {
        return Ok(None);
    }
    let capacity: usize = value
        .parse()
        .map_err(|_| anyhow!("DETECT_QUEUE_CAPACITY must be an integer or 'unbounded'"))?;
    Ok((capacity > 0).then_some(capacity))
}

/// Parse `name=source` pairs separated by commas.
pub fn parse_classifier_list(value: &str) -> Result<Vec<ClassifierSpec>> {
    split_csv(value)
        .into_iter()
        .map(|entry| parse_classifier_spec(&entry))
        .collect()
}

/// Parse one `name=source` pair.
pub fn parse_classifier_spec(entry: &str) -> Result<ClassifierSpec> {
    let (name, source) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("classifier '{}' must look like name=source", entry))?;
    let (name, source) = (name.trim(), source.trim());
    if name.is_empty() || source.is_empty() {
        return Err(anyhow!("classifier '{}' must look like name=source", entry));
    }
    Ok(ClassifierSpec {
        name: name.to_string(),
        source: source.to_string(),
    })
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("24x32").unwrap(), (24, 32));
        assert_eq!(parse_size(" 10 X 10 ").unwrap(), (10, 10));
        assert!(parse_size("24").is_err());
        assert!(parse_size("ax2").is_err());
    }

    #[test]
    fn parses_capacity() {
        assert_eq!(parse_capacity("8").unwrap(), Some(8));
        assert_eq!(parse_capacity("0").unwrap(), None);
        assert_eq!(parse_capacity("unbounded").unwrap(), None);
        assert!(parse_capacity("-1").is_err());
    }

    #[test]
    fn parses_classifier_lists() {
        let parsed = parse_classifier_list("face=stub://face, hand=/opt/hand.json").unwrap();
        assert_eq!(
            parsed,
            vec![
                ClassifierSpec {
                    name: "face".into(),
                    source: "stub://face".into()
                },
                ClassifierSpec {
                    name: "hand".into(),
                    source: "/opt/hand.json".into()
                },
            ]
        );
        assert!(parse_classifier_list("face").is_err());
        assert!(parse_classifier_list("=stub://x").is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let mut cfg = DetectdConfig::from_file(DetectdConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.worker.frame_policy, FramePolicy::Latest);
        assert!(cfg.classifiers.is_empty());
    }

    #[test]
    fn rejects_oversized_source() {
        let mut cfg = DetectdConfig::default();
        cfg.source.width = 70_000;
        cfg.source.height = 70_000;
        assert!(cfg.validate().is_err());

        let mut cfg = DetectdConfig::default();
        cfg.source.width = MAX_FRAME_DIMENSION;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_classifiers() {
        let mut cfg = DetectdConfig::default();
        cfg.classifiers = parse_classifier_list("face=stub://a,FACE=stub://b").unwrap();
        assert!(cfg.validate().is_err());
    }
}

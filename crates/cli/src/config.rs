use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use geofield_core::{ControllerConfig, MeanPolicy, SegmenterConfig, Tolerance};
use geofield_llm::LlmProvider;
use serde::Deserialize;

pub const DEFAULT_CONFIG: &str = "geofield.toml";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_PROMPT_LINES: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub segmenter: SegmenterConfig,
    pub matcher: Tolerance,
    pub controller: ControllerConfig,
    pub calibration: CalibrationSection,
    pub llm: LlmSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    pub mean_policy: MeanPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub max_prompt_lines: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_prompt_lines: DEFAULT_MAX_PROMPT_LINES,
        }
    }
}

/// Resolved model settings after environment overrides.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub timeout: Duration,
    pub max_prompt_lines: usize,
}

impl LlmSection {
    pub fn resolve(&self) -> Result<LlmSettings> {
        self.resolve_with(|key| env::var(key).ok())
    }

    fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<LlmSettings> {
        let provider_name = lookup("GEOFIELD_PROVIDER").unwrap_or_else(|| self.provider.clone());
        let provider = LlmProvider::from_str(&provider_name)
            .ok_or_else(|| anyhow!("unknown provider {provider_name}"))?;
        let model = lookup("GEOFIELD_MODEL")
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| provider.default_model().to_string());
        let timeout_secs = lookup("GEOFIELD_LLM_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.timeout_secs);
        Ok(LlmSettings {
            provider,
            model,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            max_prompt_lines: self.max_prompt_lines.max(1),
        })
    }
}

/// Reads `path`, or `geofield.toml` in the working directory when no path is
/// given. A missing default file means built-in defaults; a missing explicit
/// file is an error.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    if !path.exists() {
        if explicit {
            return Err(anyhow!("config {} does not exist", path.display()));
        }
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: FileConfig = toml::from_str(&contents)
        .map_err(|e| anyhow!("invalid config {}: {e}", path.display()))?;
    config
        .calibration
        .mean_policy
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: FileConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.segmenter.x_gap_thresh, 30.0);
        assert_eq!(cfg.segmenter.space_thresh, 3);
        assert_eq!(cfg.controller.sample_threshold, 3);
        assert_eq!(cfg.controller.rescue_null_ratio, 0.5);
        assert_eq!(cfg.matcher, Tolerance::default());
        assert_eq!(cfg.calibration.mean_policy, MeanPolicy::Historical);
        assert_eq!(cfg.llm.timeout_secs, 30);
    }

    #[test]
    fn sections_override_individual_keys() {
        let cfg: FileConfig = toml::from_str(
            r#"
            [segmenter]
            x_gap_thresh = 12.5

            [matcher]
            y_ratio = 0.5

            [controller]
            sample_threshold = 5

            [calibration]
            mean_policy = { kind = "window", size = 10 }

            [llm]
            provider = "anthropic"
            max_prompt_lines = 40
            "#,
        )
        .unwrap();
        assert_eq!(cfg.segmenter.x_gap_thresh, 12.5);
        assert_eq!(cfg.segmenter.space_thresh, 3);
        assert_eq!(cfg.matcher.x_ratio, 0.25);
        assert_eq!(cfg.matcher.y_ratio, 0.5);
        assert_eq!(cfg.controller.sample_threshold, 5);
        assert_eq!(cfg.controller.rescue_null_ratio, 0.5);
        assert_eq!(cfg.calibration.mean_policy, MeanPolicy::Window { size: 10 });
        assert_eq!(cfg.llm.provider, "anthropic");
        assert_eq!(cfg.llm.max_prompt_lines, 40);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let section = LlmSection {
            provider: "openai".into(),
            model: Some("from-file".into()),
            ..LlmSection::default()
        };
        let vars: HashMap<&str, &str> = [
            ("GEOFIELD_PROVIDER", "local"),
            ("GEOFIELD_LLM_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();
        let settings = section
            .resolve_with(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.provider, LlmProvider::Local);
        assert_eq!(settings.model, "from-file");
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn model_falls_back_to_provider_default() {
        let section = LlmSection {
            provider: "deepseek".into(),
            ..LlmSection::default()
        };
        let settings = section.resolve_with(|_| None).unwrap();
        assert_eq!(settings.model, "deepseek-chat");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let section = LlmSection {
            provider: "mystery".into(),
            ..LlmSection::default()
        };
        assert!(section.resolve_with(|_| None).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());

        let path = dir.path().join("geofield.toml");
        fs::write(&path, "[controller]\nrescue_null_ratio = 0.25\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.controller.rescue_null_ratio, 0.25);
    }

    #[test]
    fn out_of_range_decay_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geofield.toml");
        fs::write(
            &path,
            "[calibration]\nmean_policy = { kind = \"decay\", alpha = -0.5 }\n",
        )
        .unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("decay alpha"));

        fs::write(
            &path,
            "[calibration]\nmean_policy = { kind = \"decay\", alpha = 0.8 }\n",
        )
        .unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.calibration.mean_policy, MeanPolicy::Decay { alpha: 0.8 });
    }
}

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::{ReelkitError, ReelkitResult};
use crate::transition::TransitionKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on resolved cache entries.
    pub max_entries: usize,
    /// Share of `max_entries` removed when the bound is exceeded.
    pub evict_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 60,
            evict_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// When false the service starts degraded, as if the worker could not be created.
    pub worker_enabled: bool,
    pub worker_threads: usize,
    pub max_concurrent_low_priority: usize,
    pub thread_name: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            worker_threads: 2,
            max_concurrent_low_priority: 1,
            thread_name: "reelkit-compute".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GraphConfig {
    pub max_dist: f64,
    /// Tags too common to justify an edge on their own.
    pub generic_tags: Vec<String>,
    pub focus_color: String,
    pub ambient_color: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_dist: 800.0,
            generic_tags: ["image", "photo", "picture", "upload", "generated"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            focus_color: "#6366f1".to_string(),
            ambient_color: "#475569".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct KenBurnsConfig {
    pub start: f32,
    pub end: f32,
}

impl Default for KenBurnsConfig {
    fn default() -> Self {
        Self {
            start: 1.0,
            end: 1.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub ken_burns: KenBurnsConfig,
    /// Seconds over which the current source zooms from `start` to `end`.
    pub duration_secs: f32,
    pub default_transition: TransitionKind,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            ken_burns: KenBurnsConfig::default(),
            duration_secs: 5.0,
            default_transition: TransitionKind::Dissolve,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReelkitConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

impl ReelkitConfig {
    pub fn from_toml_str(contents: &str) -> ReelkitResult<Self> {
        let config: ReelkitConfig =
            toml::from_str(contents).map_err(|e| ReelkitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &std::path::Path) -> ReelkitResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> ReelkitResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ReelkitError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> ReelkitResult<()> {
        if self.cache.max_entries == 0 {
            return Err(ReelkitError::Config("cache.max_entries must be > 0".into()));
        }
        if !(self.cache.evict_fraction > 0.0 && self.cache.evict_fraction <= 1.0) {
            return Err(ReelkitError::Config(
                "cache.evict_fraction must be in (0, 1]".into(),
            ));
        }
        if self.compute.max_concurrent_low_priority == 0 {
            return Err(ReelkitError::Config(
                "compute.max_concurrent_low_priority must be > 0".into(),
            ));
        }
        if self.graph.max_dist <= 0.0 {
            return Err(ReelkitError::Config("graph.max_dist must be > 0".into()));
        }
        for (key, value) in [
            ("graph.focus_color", &self.graph.focus_color),
            ("graph.ambient_color", &self.graph.ambient_color),
        ] {
            Color::from_hex(value).map_err(|e| ReelkitError::Config(format!("{}: {}", key, e)))?;
        }
        if self.render.width == 0 || self.render.height == 0 {
            return Err(ReelkitError::Config("render size must be non-zero".into()));
        }
        if self.render.duration_secs <= 0.0 {
            return Err(ReelkitError::Config(
                "render.duration_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

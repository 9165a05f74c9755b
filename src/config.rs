use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "WindowConfig::default_title")]
    pub title: String,
    #[serde(default = "WindowConfig::default_width")]
    pub width: u32,
    #[serde(default = "WindowConfig::default_height")]
    pub height: u32,
    #[serde(default = "WindowConfig::default_logical_width")]
    pub logical_width: u32,
    #[serde(default = "WindowConfig::default_logical_height")]
    pub logical_height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "ScriptConfig::default_main_script")]
    pub main_script: PathBuf,
    #[serde(default = "ScriptConfig::default_modules")]
    pub modules: BTreeMap<String, PathBuf>,
    #[serde(default = "ScriptConfig::default_sprite_count")]
    pub sprite_count: usize,
    #[serde(default = "ScriptConfig::default_max_frames")]
    pub max_frames: Option<u64>,
    #[serde(default)]
    pub done_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "RunnerConfig::default_target_fps")]
    pub target_fps: u32,
    #[serde(default)]
    pub capture_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfigOverrides {
    pub main_script: Option<PathBuf>,
    pub max_frames: Option<u64>,
    pub target_fps: Option<u32>,
    pub capture_path: Option<PathBuf>,
}

impl WindowConfig {
    fn default_title() -> String {
        "Kestrel Lockstep".to_string()
    }

    const fn default_width() -> u32 {
        640
    }

    const fn default_height() -> u32 {
        480
    }

    const fn default_logical_width() -> u32 {
        320
    }

    const fn default_logical_height() -> u32 {
        240
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: Self::default_title(),
            width: Self::default_width(),
            height: Self::default_height(),
            logical_width: Self::default_logical_width(),
            logical_height: Self::default_logical_height(),
        }
    }
}

impl ScriptConfig {
    fn default_main_script() -> PathBuf {
        PathBuf::from("assets/scripts/main.rhai")
    }

    fn default_modules() -> BTreeMap<String, PathBuf> {
        BTreeMap::from([
            ("player".to_string(), PathBuf::from("assets/scripts/player.rhai")),
            ("vec2".to_string(), PathBuf::from("assets/scripts/vec2.rhai")),
        ])
    }

    const fn default_sprite_count() -> usize {
        2
    }

    const fn default_max_frames() -> Option<u64> {
        Some(2_000)
    }

    pub fn done_timeout(&self) -> Option<Duration> {
        self.done_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            main_script: Self::default_main_script(),
            modules: Self::default_modules(),
            sprite_count: Self::default_sprite_count(),
            max_frames: Self::default_max_frames(),
            done_timeout_ms: None,
        }
    }
}

impl RunnerConfig {
    const fn default_target_fps() -> u32 {
        60
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { target_fps: Self::default_target_fps(), capture_path: None }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("[config] {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(path) = &overrides.main_script {
            self.script.main_script = path.clone();
        }
        if let Some(max_frames) = overrides.max_frames {
            self.script.max_frames = (max_frames > 0).then_some(max_frames);
        }
        if let Some(fps) = overrides.target_fps {
            self.runner.target_fps = fps;
        }
        if let Some(path) = &overrides.capture_path {
            self.runner.capture_path = Some(path.clone());
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.applied_fields().is_empty()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.main_script.is_some() {
            fields.push("script");
        }
        if self.max_frames.is_some() {
            fields.push("max_frames");
        }
        if self.target_fps.is_some() {
            fields.push("fps");
        }
        if self.capture_path.is_some() {
            fields.push("capture");
        }
        fields
    }
}

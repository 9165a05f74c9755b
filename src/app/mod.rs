use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::builtins::BuiltinRegistry;
use crate::config::{AppConfig, AppConfigOverrides};
use crate::host::{HostLoop, HostOptions};
use crate::runner::{run_game, RunOptions, RunSummary};
use crate::script_driver::{ScriptProgram, ScriptReport};
use crate::sprite::{Sprite, SpriteSet};

pub const DEFAULT_CONFIG_PATH: &str = "config/app.json";

pub fn run() -> Result<RunSummary> {
    run_with_overrides(None, AppConfigOverrides::default())
}

pub fn run_with_overrides(config_path: Option<&Path>, overrides: AppConfigOverrides) -> Result<RunSummary> {
    let mut config = match config_path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(DEFAULT_CONFIG_PATH),
    };
    if !overrides.is_empty() {
        info!("[config] CLI overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }
    App::new(config)?.run()
}

pub struct App {
    config: AppConfig,
    host: HostLoop,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let program = ScriptProgram::load(&config.script.main_script, &config.script.modules)
            .context("Loading script program")?;
        let builtins = BuiltinRegistry::with_defaults();
        let sprites: SpriteSet = (0..config.script.sprite_count).map(|_| Sprite::new()).collect();
        let options = HostOptions {
            max_frames: config.script.max_frames,
            done_timeout: config.script.done_timeout(),
            layout: (config.window.logical_width, config.window.logical_height),
        };
        let host = HostLoop::start(program, builtins, sprites, options)?;
        Ok(Self { config, host })
    }

    pub fn run(mut self) -> Result<RunSummary> {
        info!("[app] {}", self.config.window.title);
        let options = RunOptions {
            target_fps: self.config.runner.target_fps,
            outside_size: (self.config.window.width, self.config.window.height),
            max_updates: None,
            capture_path: self.config.runner.capture_path.clone(),
        };
        let outcome = run_game(&mut self.host, &options);
        match self.host.shutdown() {
            Some(ScriptReport::Completed { globals }) => info!("[app] script globals: {globals}"),
            Some(ScriptReport::Cancelled { last_frame }) => info!("[app] script cancelled after frame {last_frame:?}"),
            Some(ScriptReport::Failed { message }) => warn!("[app] script failed: {message}"),
            None => warn!("[app] script thread ended without a report"),
        }
        outcome.map(|(_, summary)| summary)
    }
}

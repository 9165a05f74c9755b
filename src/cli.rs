use crate::config::AppConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    config_path: Option<PathBuf>,
    main_script: Option<PathBuf>,
    max_frames: Option<u64>,
    target_fps: Option<u32>,
    capture_path: Option<PathBuf>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name <value>.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config_path = Some(PathBuf::from(value)),
                "script" => overrides.main_script = Some(PathBuf::from(value)),
                "capture" => overrides.capture_path = Some(PathBuf::from(value)),
                "max-frames" => {
                    overrides.max_frames =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid max-frames '{value}'"))?);
                }
                "fps" => {
                    overrides.target_fps =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid fps '{value}'"))?);
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --script, --max-frames, --fps, --capture."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }

    pub fn into_config_overrides(self) -> AppConfigOverrides {
        AppConfigOverrides {
            main_script: self.main_script,
            max_frames: self.max_frames,
            target_fps: self.target_fps,
            capture_path: self.capture_path,
        }
    }
}

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::builtins::BuiltinRegistry;
use crate::host::{HostLoop, HostOptions, HostStatus};
use crate::script_driver::{ScriptProgram, ScriptReport};
use crate::sprite::{Sprite, SpriteSet};

/// Upper bound on `frames` in a fixture; each frame is a real script tick.
pub const MAX_FIXTURE_FRAMES: u64 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    /// Script file, resolved against the fixture's directory. Ignored when
    /// `source` is given.
    #[serde(default)]
    pub main_script: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    /// Source modules by import name, inline text.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
    #[serde(default = "default_frames")]
    pub frames: u64,
    #[serde(default)]
    pub max_frames: Option<u64>,
    pub sprites: Vec<[f64; 2]>,
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub frames: u64,
    pub completed_frames: u64,
    pub status: String,
    pub results: Vec<FrameResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ScriptReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameResult {
    pub frame: u64,
    pub positions: Vec<[f64; 2]>,
}

impl HarnessFixture {
    pub fn validate(&self) -> Result<()> {
        if self.frames > MAX_FIXTURE_FRAMES {
            bail!("fixture asks for {} frames, the limit is {MAX_FIXTURE_FRAMES}", self.frames);
        }
        Ok(())
    }
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    fixture.validate()?;
    let program = fixture_program(fixture)?;
    let sprites: SpriteSet = fixture.sprites.iter().map(|[x, y]| Sprite::new().at(*x, *y)).collect();
    let options = HostOptions { max_frames: fixture.max_frames, ..HostOptions::default() };
    let mut host = HostLoop::start(program, BuiltinRegistry::with_defaults(), sprites, options)?;

    let mut results = Vec::new();
    let mut failure = None;
    for _ in 0..fixture.frames {
        let frame = host.frame();
        if let Err(err) = host.advance_frame() {
            failure = Some(err);
            break;
        }
        if host.frame() == frame {
            break;
        }
        let positions = host.positions().iter().map(|p| [p.x, p.y]).collect();
        results.push(FrameResult { frame, positions });
    }

    let completed_frames = host.frame();
    let status = match host.status() {
        HostStatus::Running => "running",
        HostStatus::Cancelled => "cancelled",
        HostStatus::Finished => "finished",
        HostStatus::Failed => "failed",
    };
    if let Some(err) = &failure {
        log::warn!("[script-harness] stopped early: {err}");
    }
    let report = host.shutdown();
    Ok(HarnessOutput { frames: fixture.frames, completed_frames, status: status.to_string(), results, report })
}

fn fixture_program(fixture: &HarnessFixture) -> Result<ScriptProgram> {
    let mut program = match (&fixture.source, &fixture.main_script) {
        (Some(source), _) => ScriptProgram::inline("fixture", source.clone()),
        (None, Some(path)) => {
            let path = match &fixture.base_dir {
                Some(dir) => dir.join(path),
                None => PathBuf::from(path),
            };
            ScriptProgram::load(&path, &BTreeMap::<String, PathBuf>::new())?
        }
        (None, None) => bail!("fixture needs either 'source' or 'main_script'"),
    };
    program.modules.extend(fixture.modules.iter().map(|(name, source)| (name.clone(), source.clone())));
    Ok(program)
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening fixture '{}'", path.display()))?;
    let mut fixture: HarnessFixture =
        serde_json::from_reader(file).with_context(|| "parsing fixture JSON")?;
    fixture.base_dir = path.parent().map(Path::to_path_buf);
    fixture.validate().with_context(|| format!("validating fixture '{}'", path.display()))?;
    Ok(fixture)
}

/// Compares a run against its golden output. The error lists every frame whose
/// positions differ, plus status and report mismatches.
pub fn check_golden(expected: &HarnessOutput, actual: &HarnessOutput) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    let mut lines = Vec::new();
    if expected.completed_frames != actual.completed_frames || expected.status != actual.status {
        lines.push(format!(
            "stopped after {} frames ({}), expected {} frames ({})",
            actual.completed_frames, actual.status, expected.completed_frames, expected.status
        ));
    }
    let frames = expected.results.len().max(actual.results.len());
    for index in 0..frames {
        let want = expected.results.get(index);
        let got = actual.results.get(index);
        if want != got {
            lines.push(format!(
                "frame {index}: expected {} got {}",
                want.map_or_else(|| "-".to_string(), |result| format_positions(&result.positions)),
                got.map_or_else(|| "-".to_string(), |result| format_positions(&result.positions)),
            ));
        }
    }
    if expected.report != actual.report {
        lines.push(format!("report: expected {:?} got {:?}", expected.report, actual.report));
    }
    bail!("golden mismatch:\n  {}", lines.join("\n  "))
}

pub fn format_positions(positions: &[[f64; 2]]) -> String {
    let cells: Vec<String> = positions.iter().map(|[x, y]| format!("({x}, {y})")).collect();
    cells.join(" ")
}

fn default_frames() -> u64 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(frames: u64) -> HarnessFixture {
        HarnessFixture {
            main_script: None,
            source: Some("import \"engine\" as engine; loop { engine::wait_for_next_frame(); }".to_string()),
            modules: BTreeMap::new(),
            frames,
            max_frames: None,
            sprites: vec![[0.0, 0.0]],
            base_dir: None,
        }
    }

    #[test]
    fn oversized_frame_count_is_rejected_before_running() {
        let err = run_fixture(&fixture(u64::MAX)).expect_err("frame count should be rejected");
        assert!(err.to_string().contains("limit"), "{err}");
    }

    #[test]
    fn load_rejects_oversized_frame_count() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("huge.json");
        std::fs::write(&path, r#"{ "source": "", "frames": 18446744073709551615, "sprites": [] }"#)
            .expect("write fixture");
        let err = load_fixture(&path).expect_err("load should fail");
        assert!(format!("{err:#}").contains("limit"), "{err:#}");
    }

    #[test]
    fn golden_mismatch_names_the_diverging_frame() {
        let expected = run_fixture(&fixture(2)).expect("run");
        let mut actual = expected.clone();
        actual.results[1].positions[0] = [4.0, 2.0];
        let err = check_golden(&expected, &actual).expect_err("outputs differ");
        let message = err.to_string();
        assert!(message.contains("frame 1: expected (0, 0) got (4, 2)"), "{message}");
        assert!(!message.contains("frame 0"), "{message}");
        check_golden(&expected, &expected).expect("identical outputs match");
    }
}

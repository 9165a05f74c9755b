use std::fs::File;
use std::path::Path;

use kestrel_lockstep::script_harness::{load_fixture, run_fixture, HarnessOutput};

#[test]
fn linear_fixture_matches_golden() {
    assert_fixture_matches("tests/fixtures/lockstep/linear.json", "tests/fixtures/lockstep/linear.golden.json");
}

#[test]
fn finite_fixture_matches_golden() {
    assert_fixture_matches("tests/fixtures/lockstep/finite.json", "tests/fixtures/lockstep/finite.golden.json");
}

#[test]
fn bounded_fixture_matches_golden() {
    assert_fixture_matches("tests/fixtures/lockstep/bounded.json", "tests/fixtures/lockstep/bounded.golden.json");
}

#[test]
fn linear_fixture_is_stable_across_runs() {
    let fixture = load_fixture("tests/fixtures/lockstep/linear.json").expect("load fixture");
    let first = run_fixture(&fixture).expect("run fixture first time");
    let second = run_fixture(&fixture).expect("run fixture second time");
    assert_eq!(first, second, "lockstep fixture should produce identical output across runs");
}

fn assert_fixture_matches(fixture_path: &str, golden_path: &str) {
    let fixture = load_fixture(fixture_path).expect("load fixture");
    let output = run_fixture(&fixture).expect("run fixture");
    let golden_file = File::open(Path::new(golden_path)).expect("open golden");
    let golden: HarnessOutput = serde_json::from_reader(golden_file).expect("parse golden");
    assert_eq!(output, golden, "fixture {} diverged from golden {}", fixture_path, golden_path);
}

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use kestrel_lockstep::script_harness::{
    check_golden, format_positions, load_fixture, run_fixture, HarnessOutput,
};

fn main() {
    kestrel_lockstep::logging::init();
    if let Err(err) = run_cli() {
        eprintln!("[script-harness] {err:#}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let opts = parse_args()?;
    let mut fixture = load_fixture(&opts.fixture)?;
    if let Some(frames) = opts.frames {
        fixture.frames = frames;
    }
    if opts.max_frames.is_some() {
        fixture.max_frames = opts.max_frames;
    }
    let output = run_fixture(&fixture)?;

    if let Some(path) = &opts.write_output {
        let json = serde_json::to_string_pretty(&output).context("serializing harness output")?;
        fs::write(path, json + "\n").with_context(|| format!("writing '{}'", path.display()))?;
        println!("[script-harness] wrote {}", path.display());
    }

    match &opts.golden {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading golden '{}'", path.display()))?;
            let expected: HarnessOutput = serde_json::from_str(&text).context("parsing golden JSON")?;
            check_golden(&expected, &output)
                .with_context(|| format!("{} (refresh with --write-output)", opts.fixture.display()))?;
            println!("[script-harness] {} frames match {}", output.completed_frames, path.display());
        }
        None if opts.write_output.is_none() => print_table(&output),
        None => {}
    }
    Ok(())
}

fn print_table(output: &HarnessOutput) {
    for result in &output.results {
        println!("{:>6}  {}", result.frame, format_positions(&result.positions));
    }
    println!("status: {} after {} frames", output.status, output.completed_frames);
    if let Some(report) = &output.report {
        println!("report: {}", serde_json::to_string(report).unwrap_or_else(|_| format!("{report:?}")));
    }
}

struct CliOptions {
    fixture: PathBuf,
    golden: Option<PathBuf>,
    write_output: Option<PathBuf>,
    frames: Option<u64>,
    max_frames: Option<u64>,
}

fn parse_args() -> Result<CliOptions> {
    let mut fixture = None;
    let mut opts = CliOptions { fixture: PathBuf::new(), golden: None, write_output: None, frames: None, max_frames: None };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            std::process::exit(0);
        }
        let value = args.next().ok_or_else(|| anyhow!("expected a value after '{arg}'"))?;
        match arg.as_str() {
            "--fixture" | "-f" => fixture = Some(PathBuf::from(value)),
            "--golden" | "-g" => opts.golden = Some(PathBuf::from(value)),
            "--write-output" | "-o" => opts.write_output = Some(PathBuf::from(value)),
            "--frames" => opts.frames = Some(value.parse().with_context(|| format!("invalid --frames '{value}'"))?),
            "--max-frames" => {
                opts.max_frames = Some(value.parse().with_context(|| format!("invalid --max-frames '{value}'"))?)
            }
            other => return Err(anyhow!("unknown argument '{other}'")),
        }
    }
    opts.fixture = fixture.ok_or_else(|| anyhow!("--fixture <path> is required"))?;
    Ok(opts)
}

fn print_help() {
    println!("Usage: script_harness --fixture <path> [--golden <path>] [--write-output <path>]");
    println!("                      [--frames <n>] [--max-frames <n>]");
    println!("Runs a lockstep fixture and prints one row of sprite positions per frame.");
    println!("  --golden        compare against a recorded run and list diverging frames");
    println!("  --write-output  record this run as JSON");
    println!("  --frames        override the number of host updates");
    println!("  --max-frames    override the frame bound that cancels the script");
}

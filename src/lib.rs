pub mod app;
pub mod bridge;
pub mod builtins;
pub mod cli;
pub mod config;
pub mod frame_sync;
pub mod host;
pub mod imports;
pub mod logging;
pub mod runner;
pub mod script_driver;
pub mod script_harness;
pub mod sprite;
pub mod time;

pub use app::{run, run_with_overrides, App};

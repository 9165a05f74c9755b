//! Headless stand-in for a windowed game loop: calls `update` then `draw` at a
//! fixed cadence until the game finishes.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use log::{info, trace};

use crate::time::Time;

pub type Surface = RgbaImage;

pub const CLEAR_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

pub trait Game {
    fn update(&mut self) -> Result<()>;
    fn draw(&mut self, screen: &mut Surface);
    /// Logical screen size for the given outside (window) size.
    fn layout(&self, outside_width: u32, outside_height: u32) -> (u32, u32);
    fn is_finished(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Zero runs uncapped.
    pub target_fps: u32,
    pub outside_size: (u32, u32),
    pub max_updates: Option<u64>,
    pub capture_path: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { target_fps: 60, outside_size: (640, 480), max_updates: None, capture_path: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub updates: u64,
    pub elapsed_seconds: f32,
}

/// Drives `game` until it reports finished, `max_updates` is reached or
/// `update` fails. Returns the last drawn frame alongside the run summary.
pub fn run_game<G: Game>(game: &mut G, options: &RunOptions) -> Result<(Surface, RunSummary)> {
    let (width, height) = game.layout(options.outside_size.0, options.outside_size.1);
    let mut screen = Surface::from_pixel(width, height, CLEAR_COLOR);
    let frame_budget =
        (options.target_fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(options.target_fps)));
    let mut time = Time::new();
    let mut updates = 0u64;

    while !game.is_finished() && options.max_updates.map_or(true, |max| updates < max) {
        time.tick();
        trace!("[runner] update {updates} dt={:.4}s", time.delta_seconds());
        game.update().with_context(|| format!("Update {updates} failed"))?;
        updates += 1;
        clear(&mut screen);
        game.draw(&mut screen);
        if let Some(remaining) = frame_budget.and_then(|budget| budget.checked_sub(time.since_last_tick())) {
            thread::sleep(remaining);
        }
    }

    let summary = RunSummary { updates, elapsed_seconds: time.elapsed_seconds() };
    info!("[runner] {} updates in {:.2}s", summary.updates, summary.elapsed_seconds);

    if let Some(path) = &options.capture_path {
        screen.save(path).with_context(|| format!("Writing frame capture {}", path.display()))?;
        info!("[runner] captured last frame to {}", path.display());
    }
    Ok((screen, summary))
}

fn clear(screen: &mut Surface) {
    for pixel in screen.pixels_mut() {
        *pixel = CLEAR_COLOR;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        remaining: u32,
        draws: u32,
    }

    impl Game for Countdown {
        fn update(&mut self) -> Result<()> {
            self.remaining -= 1;
            Ok(())
        }

        fn draw(&mut self, screen: &mut Surface) {
            self.draws += 1;
            screen.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        }

        fn layout(&self, outside_width: u32, outside_height: u32) -> (u32, u32) {
            (outside_width / 2, outside_height / 2)
        }

        fn is_finished(&self) -> bool {
            self.remaining == 0
        }
    }

    #[test]
    fn runs_until_game_finishes() {
        let mut game = Countdown { remaining: 4, draws: 0 };
        let options = RunOptions { target_fps: 0, outside_size: (8, 6), ..RunOptions::default() };
        let (screen, summary) = run_game(&mut game, &options).expect("run");
        assert_eq!(summary.updates, 4);
        assert_eq!(game.draws, 4);
        assert_eq!(screen.dimensions(), (4, 3));
        assert_eq!(screen.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn stops_at_update_limit() {
        let mut game = Countdown { remaining: 100, draws: 0 };
        let options = RunOptions { target_fps: 0, max_updates: Some(3), ..RunOptions::default() };
        let (_, summary) = run_game(&mut game, &options).expect("run");
        assert_eq!(summary.updates, 3);
        assert_eq!(game.remaining, 97);
    }
}

//! Host side of the lockstep: owns the sprites between frames, hands them to
//! the script for each tick and renders what comes back.

use std::time::Duration;

use glam::DVec2;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::builtins::BuiltinRegistry;
use crate::frame_sync::{frame_channel, CancelToken, HostSide, SyncError};
use crate::runner::{Game, Surface};
use crate::script_driver::{ScriptDriver, ScriptProgram, ScriptReport};
use crate::sprite::{Movable, Sprite, SpriteSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Running,
    /// The frame bound was reached, or the host was cancelled explicitly.
    Cancelled,
    /// The script returned on its own.
    Finished,
    Failed,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("script failed: {0}")]
    ScriptFailed(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    /// Cancel the script once this many frames have completed.
    pub max_frames: Option<u64>,
    /// Give up on a tick that takes longer than this.
    pub done_timeout: Option<Duration>,
    pub layout: (u32, u32),
}

impl Default for HostOptions {
    fn default() -> Self {
        Self { max_frames: None, done_timeout: None, layout: (320, 240) }
    }
}

pub struct HostLoop {
    sprites: Option<SpriteSet>,
    frame: u64,
    status: HostStatus,
    options: HostOptions,
    sync: HostSide<SpriteSet>,
    driver: ScriptDriver,
}

impl HostLoop {
    /// Spawns the script thread. It stays parked until the first `update`.
    pub fn start(
        program: ScriptProgram,
        builtins: BuiltinRegistry,
        sprites: SpriteSet,
        options: HostOptions,
    ) -> anyhow::Result<Self> {
        let (sync, side) = frame_channel(CancelToken::new());
        let sync = sync.with_done_timeout(options.done_timeout);
        info!("[host] starting {} with {} sprites and {} builtins", program.name, sprites.len(), builtins.len());
        let driver = ScriptDriver::spawn(program, builtins, sprites.len(), side)?;
        Ok(Self { sprites: Some(sprites), frame: 0, status: HostStatus::Running, options, sync, driver })
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    /// Sprites as of the last frame the host got back. Empty only while a
    /// timed-out script is still unwinding with them.
    pub fn sprites(&self) -> &[Sprite] {
        self.sprites.as_deref().unwrap_or(&[])
    }

    pub fn positions(&self) -> Vec<DVec2> {
        self.sprites().iter().map(Movable::position).collect()
    }

    pub fn report(&mut self) -> Option<&ScriptReport> {
        self.driver.try_report()
    }

    /// Runs exactly one script tick. A no-op once the host stopped running.
    pub fn advance_frame(&mut self) -> Result<(), HostError> {
        self.recover_sprites();
        if self.status != HostStatus::Running {
            return Ok(());
        }
        let Some(sprites) = self.sprites.take() else {
            self.status = HostStatus::Failed;
            return Err(HostError::ScriptFailed("sprites were lost in an earlier frame".to_string()));
        };

        match self.sync.advance(self.frame, sprites) {
            Ok(done) => {
                self.sprites = Some(done.payload);
                self.frame += 1;
                debug!("[host] frame {} complete", done.frame);
                if self.options.max_frames.is_some_and(|max| self.frame >= max) {
                    info!("[host] frame bound {} reached, cancelling script", self.frame);
                    self.cancel();
                }
                Ok(())
            }
            Err(failure) => {
                if let Some(sprites) = failure.payload {
                    self.sprites = Some(sprites);
                }
                self.handle_sync_failure(failure.error)
            }
        }
    }

    fn handle_sync_failure(&mut self, error: SyncError) -> Result<(), HostError> {
        match error {
            SyncError::Cancelled => {
                self.status = HostStatus::Cancelled;
                Ok(())
            }
            SyncError::Timeout { frame, timeout } => {
                warn!("[host] frame {frame} exceeded {timeout:?}, script cancelled");
                self.status = HostStatus::Failed;
                Err(HostError::Sync(error))
            }
            // The script thread dropped its end of the channel, so it is exiting and
            // its report is either queued or never coming.
            SyncError::Disconnected { .. } => match self.driver.wait_report().cloned() {
                Some(ScriptReport::Completed { .. }) => {
                    info!("[host] script finished after {} frames", self.frame);
                    self.status = HostStatus::Finished;
                    Ok(())
                }
                Some(ScriptReport::Cancelled { .. }) => {
                    self.status = HostStatus::Cancelled;
                    Ok(())
                }
                Some(ScriptReport::Failed { message }) => {
                    error!("[host] {message}");
                    self.status = HostStatus::Failed;
                    Err(HostError::ScriptFailed(message))
                }
                None => {
                    self.status = HostStatus::Failed;
                    Err(HostError::ScriptFailed("script thread exited without a report".to_string()))
                }
            },
        }
    }

    fn recover_sprites(&mut self) {
        if self.sprites.is_none() {
            if let Some(sprites) = self.sync.reclaim(None) {
                debug!("[host] recovered {} sprites from the script thread", sprites.len());
                self.sprites = Some(sprites);
            }
        }
    }

    /// Cancels the script. No further frames are started.
    pub fn cancel(&mut self) {
        self.sync.cancel();
        if self.status == HostStatus::Running {
            self.status = HostStatus::Cancelled;
        }
    }

    /// Cancels the script if still running and waits for its thread.
    pub fn shutdown(mut self) -> Option<ScriptReport> {
        self.cancel();
        self.driver.join().cloned()
    }

    pub fn render(&mut self, screen: &mut Surface) {
        self.recover_sprites();
        if let Some(sprites) = self.sprites.as_mut() {
            for sprite in sprites.iter_mut() {
                sprite.draw(screen);
            }
        }
    }
}

impl Game for HostLoop {
    fn update(&mut self) -> anyhow::Result<()> {
        self.advance_frame()?;
        Ok(())
    }

    fn draw(&mut self, screen: &mut Surface) {
        self.render(screen);
        debug!("[host] [ {} ]", self.frame);
    }

    fn layout(&self, _outside_width: u32, _outside_height: u32) -> (u32, u32) {
        self.options.layout
    }

    fn is_finished(&self) -> bool {
        self.status != HostStatus::Running
    }
}

impl Drop for HostLoop {
    fn drop(&mut self) {
        self.sync.cancel();
    }
}

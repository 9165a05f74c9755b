//! Frame lockstep between the host loop and the script thread.
//!
//! Two unbuffered rendezvous channels carry each frame across the thread
//! boundary: `Start` from host to script and `Done` back again. The payload
//! travels with the token, so whichever side currently holds the frame is the
//! only side that can touch the entities in it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug)]
pub struct FrameStart<T> {
    pub frame: u64,
    pub payload: T,
}

#[derive(Debug)]
pub struct FrameDone<T> {
    pub frame: u64,
    pub payload: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("frame exchange was cancelled")]
    Cancelled,
    #[error("script side hung up during frame {frame}")]
    Disconnected { frame: u64 },
    #[error("script did not finish frame {frame} within {timeout:?}")]
    Timeout { frame: u64, timeout: Duration },
}

/// A failed host-side advance. `payload` is handed back whenever the frame
/// never reached the script thread, or the script side was torn down while
/// holding it.
pub struct SyncFailure<T> {
    pub error: SyncError,
    pub payload: Option<T>,
}

/// Cooperative cancellation flag shared by both sides of a frame channel.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// Ready to send the next `Start`.
    Idle,
    AwaitingDone { frame: u64 },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    AwaitingStart,
    Ticking { frame: u64 },
    Finished,
}

pub fn frame_channel<T>(cancel: CancelToken) -> (HostSide<T>, ScriptSide<T>) {
    let (start_tx, start_rx) = mpsc::sync_channel(0);
    let (done_tx, done_rx) = mpsc::sync_channel(0);
    let (reclaim_tx, reclaim_rx) = mpsc::channel();
    let host = HostSide {
        start: Some(start_tx),
        done: Some(done_rx),
        reclaim: reclaim_rx,
        phase: HostPhase::Idle,
        cancel: cancel.clone(),
        done_timeout: None,
    };
    let script = ScriptSide {
        start: start_rx,
        done: done_tx,
        reclaim: reclaim_tx,
        phase: ScriptPhase::AwaitingStart,
        payload: None,
        last_frame: None,
        cancel,
    };
    (host, script)
}

pub struct HostSide<T> {
    start: Option<SyncSender<FrameStart<T>>>,
    done: Option<Receiver<FrameDone<T>>>,
    /// Payload left behind by a script side that went away mid-frame.
    reclaim: Receiver<T>,
    phase: HostPhase,
    cancel: CancelToken,
    done_timeout: Option<Duration>,
}

impl<T> HostSide<T> {
    pub fn with_done_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.done_timeout = timeout;
        self
    }

    pub fn phase(&self) -> HostPhase {
        self.phase
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase == HostPhase::Cancelled
    }

    /// Hands `payload` to the script for `frame` and blocks until the script
    /// returns it with `Done`.
    pub fn advance(&mut self, frame: u64, payload: T) -> Result<FrameDone<T>, SyncFailure<T>> {
        let (Some(start), Some(done)) = (&self.start, &self.done) else {
            return Err(SyncFailure { error: SyncError::Cancelled, payload: Some(payload) });
        };
        if let Err(mpsc::SendError(unsent)) = start.send(FrameStart { frame, payload }) {
            return Err(SyncFailure { error: SyncError::Disconnected { frame }, payload: Some(unsent.payload) });
        }
        self.phase = HostPhase::AwaitingDone { frame };

        let received = match self.done_timeout {
            Some(timeout) => done.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => SyncError::Timeout { frame, timeout },
                RecvTimeoutError::Disconnected => SyncError::Disconnected { frame },
            }),
            None => done.recv().map_err(|_| SyncError::Disconnected { frame }),
        };

        match received {
            Ok(finished) => {
                debug_assert_eq!(finished.frame, frame, "script completed a different frame");
                self.phase = HostPhase::Idle;
                Ok(finished)
            }
            Err(error) => {
                let payload = match error {
                    // The script still owns the frame; nothing more may be sent to it.
                    // Give it one more timeout to unwind and hand the payload back.
                    SyncError::Timeout { timeout, .. } => {
                        self.cancel();
                        self.reclaim(Some(timeout))
                    }
                    _ => {
                        self.phase = HostPhase::Idle;
                        self.reclaim(None)
                    }
                };
                Err(SyncFailure { error, payload })
            }
        }
    }

    /// Takes back a payload the script side dropped without sending `Done`.
    /// `None` only checks; `Some(timeout)` waits up to `timeout` for it.
    pub fn reclaim(&self, timeout: Option<Duration>) -> Option<T> {
        match timeout {
            Some(timeout) => self.reclaim.recv_timeout(timeout).ok(),
            None => self.reclaim.try_recv().ok(),
        }
    }

    /// Cancels the script context and releases both channel ends, waking a
    /// script blocked on `Start` without a paired `Done`.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.start = None;
        self.done = None;
        self.phase = HostPhase::Cancelled;
    }
}

pub struct ScriptSide<T> {
    start: Receiver<FrameStart<T>>,
    done: SyncSender<FrameDone<T>>,
    reclaim: Sender<T>,
    phase: ScriptPhase,
    payload: Option<T>,
    last_frame: Option<u64>,
    cancel: CancelToken,
}

impl<T> ScriptSide<T> {
    pub fn phase(&self) -> ScriptPhase {
        self.phase
    }

    /// Frame currently being ticked, if any.
    pub fn frame(&self) -> Option<u64> {
        match self.phase {
            ScriptPhase::Ticking { frame } => Some(frame),
            _ => None,
        }
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut T> {
        self.payload.as_mut()
    }

    /// Announces the frame in progress as done (skipped before the first
    /// frame, when the host has no `Done` wait outstanding) and blocks for the
    /// next `Start`.
    pub fn wait_for_next_frame(&mut self) -> Result<u64, SyncError> {
        self.complete_frame()?;
        if self.cancel.is_cancelled() {
            self.phase = ScriptPhase::Finished;
            return Err(SyncError::Cancelled);
        }
        match self.start.recv() {
            Ok(FrameStart { frame, payload }) => {
                self.payload = Some(payload);
                self.last_frame = Some(frame);
                self.phase = ScriptPhase::Ticking { frame };
                Ok(frame)
            }
            Err(_) => {
                self.phase = ScriptPhase::Finished;
                Err(SyncError::Cancelled)
            }
        }
    }

    /// Returns the frame in progress to the host without waiting for another.
    pub fn finish(&mut self) -> Result<(), SyncError> {
        let completed = self.complete_frame();
        self.phase = ScriptPhase::Finished;
        completed
    }

    fn complete_frame(&mut self) -> Result<(), SyncError> {
        let ScriptPhase::Ticking { frame } = self.phase else {
            return Ok(());
        };
        self.phase = ScriptPhase::AwaitingStart;
        let Some(payload) = self.payload.take() else {
            return Ok(());
        };
        if let Err(mpsc::SendError(unsent)) = self.done.send(FrameDone { frame, payload }) {
            self.payload = Some(unsent.payload);
            self.phase = ScriptPhase::Finished;
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

impl<T> Drop for ScriptSide<T> {
    // Runs before `done` is dropped, so a host that sees the disconnect can
    // already reclaim the payload.
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            let _ = self.reclaim.send(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_wait_does_not_announce_a_previous_frame() {
        let (mut host, mut script) = frame_channel::<Vec<u64>>(CancelToken::new());
        let worker = thread::spawn(move || {
            let frame = script.wait_for_next_frame().expect("first frame");
            script.payload_mut().expect("payload").push(frame);
            script.finish().expect("finish");
        });
        let done = host.advance(0, Vec::new()).unwrap_or_else(|_| panic!("advance failed"));
        assert_eq!(done.frame, 0);
        assert_eq!(done.payload, vec![0]);
        worker.join().expect("worker");
    }

    #[test]
    fn cancel_before_first_frame_wakes_script() {
        let (mut host, mut script) = frame_channel::<()>(CancelToken::new());
        let worker = thread::spawn(move || script.wait_for_next_frame());
        host.cancel();
        assert_eq!(worker.join().expect("worker"), Err(SyncError::Cancelled));
        assert_eq!(host.phase(), HostPhase::Cancelled);
    }

    #[test]
    fn payload_held_by_a_dropped_script_side_is_reclaimed() {
        let (mut host, mut script) = frame_channel::<Vec<u64>>(CancelToken::new());
        let worker = thread::spawn(move || {
            let frame = script.wait_for_next_frame().expect("first frame");
            script.payload_mut().expect("payload").push(frame);
        });
        let failure = host.advance(0, vec![7]).err().expect("script dropped without Done");
        assert_eq!(failure.error, SyncError::Disconnected { frame: 0 });
        assert_eq!(failure.payload, Some(vec![7, 0]));
        assert_eq!(host.reclaim(None), None);
        worker.join().expect("worker");
    }

    #[test]
    fn advance_after_cancel_returns_payload() {
        let (mut host, _script) = frame_channel::<u8>(CancelToken::new());
        host.cancel();
        let failure = host.advance(3, 7).err().expect("cancelled host should refuse to advance");
        assert_eq!(failure.error, SyncError::Cancelled);
        assert_eq!(failure.payload, Some(7));
    }
}

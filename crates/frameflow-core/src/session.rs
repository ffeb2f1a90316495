//! Per-playback-session shutdown state and stage lifecycle.
//!
//! One [`SessionState`] is created per playback session and shared by
//! every stage; nothing here is global, so several sessions can coexist
//! and tear down independently.
//!
//! The shutdown lattice is monotonic: the demux stage sets
//! `stream_finished` exactly once when the input is exhausted; each
//! consumer stage marks itself finished once its input drains and its
//! decoder reports end of stream. A stage that fails still marks itself
//! finished so waiters do not hang, and sibling stages keep running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

struct SessionInner {
    stream_finished: bool,
    stages: HashMap<String, bool>,
}

/// Shared end-of-stream and cancellation state for one playback session.
pub struct SessionState {
    inner: Mutex<SessionInner>,
    cv: Condvar,
    cancelled: AtomicBool,
}

impl SessionState {
    pub fn shared() -> Arc<Self> {
        Arc::new(SessionState {
            inner: Mutex::new(SessionInner {
                stream_finished: false,
                stages: HashMap::new(),
            }),
            cv: Condvar::new(),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Declare a consumer stage that must finish before the session is
    /// considered drained.
    pub fn register_stage(&self, name: &str) {
        let mut s = self.inner.lock().unwrap();
        s.stages.entry(name.to_string()).or_insert(false);
    }

    /// Record that no more input will arrive. Set once by the producer;
    /// idempotent.
    pub fn finish_stream(&self) {
        let mut s = self.inner.lock().unwrap();
        if !s.stream_finished {
            s.stream_finished = true;
            tracing::info!("stream finished; no more input");
        }
        drop(s);
        self.cv.notify_all();
    }

    pub fn is_stream_finished(&self) -> bool {
        self.inner.lock().unwrap().stream_finished
    }

    /// Record that a consumer stage observed end of stream (or failed and
    /// will produce nothing more).
    pub fn mark_stage_finished(&self, name: &str) {
        let mut s = self.inner.lock().unwrap();
        s.stages.insert(name.to_string(), true);
        drop(s);
        self.cv.notify_all();
    }

    pub fn is_stage_finished(&self, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .stages
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    pub fn all_stages_finished(&self) -> bool {
        let s = self.inner.lock().unwrap();
        s.stream_finished && s.stages.values().all(|done| *done)
    }

    /// Wait until the stream and every registered stage finished.
    ///
    /// Returns `false` on timeout.
    pub fn wait_stages_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut s = self.inner.lock().unwrap();
        loop {
            if s.stream_finished && s.stages.values().all(|done| *done) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(s, deadline - now).unwrap();
            s = guard;
        }
    }

    /// Ask every stage to stop early (user stop / next track).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// A named worker thread whose outcome is collected at shutdown.
pub struct StageHandle {
    name: String,
    handle: JoinHandle<Result<()>>,
}

impl StageHandle {
    /// Spawn a named stage thread.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)?;
        Ok(StageHandle {
            name: name.to_string(),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the stage, converting a panic into an error instead of
    /// propagating it.
    pub fn join(self) -> Result<()> {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::StagePanicked { stage: self.name }),
        }
    }
}

/// All stage handles for one session, joined together at teardown.
#[derive(Default)]
pub struct StageSet {
    stages: Vec<StageHandle>,
}

impl StageSet {
    pub fn new() -> Self {
        StageSet { stages: Vec::new() }
    }

    pub fn push(&mut self, stage: StageHandle) {
        self.stages.push(stage);
    }

    /// Join every stage before shared resources are released.
    ///
    /// One failing stage never hides another: every failure is returned
    /// with its stage name.
    pub fn shutdown(self) -> Vec<(String, Error)> {
        let mut failures = Vec::new();
        for stage in self.stages {
            let name = stage.name().to_string();
            if let Err(e) = stage.join() {
                tracing::warn!(stage = %name, "stage ended with error: {e}");
                failures.push((name, e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_stream_is_idempotent() {
        let s = SessionState::shared();
        assert!(!s.is_stream_finished());
        s.finish_stream();
        s.finish_stream();
        assert!(s.is_stream_finished());
    }

    #[test]
    fn all_stages_finished_requires_every_stage() {
        let s = SessionState::shared();
        s.register_stage("audio-decode");
        s.register_stage("video-decode");
        s.finish_stream();
        assert!(!s.all_stages_finished());

        s.mark_stage_finished("audio-decode");
        assert!(!s.all_stages_finished());

        s.mark_stage_finished("video-decode");
        assert!(s.all_stages_finished());
    }

    #[test]
    fn wait_stages_finished_blocks_until_marked() {
        let s = SessionState::shared();
        s.register_stage("audio-decode");
        let waiter = s.clone();
        let handle = std::thread::spawn(move || waiter.wait_stages_finished(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        s.finish_stream();
        s.mark_stage_finished("audio-decode");
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_stages_finished_times_out() {
        let s = SessionState::shared();
        s.register_stage("audio-decode");
        assert!(!s.wait_stages_finished(Duration::from_millis(20)));
    }

    #[test]
    fn stage_handle_surfaces_panic_as_error() {
        let stage = StageHandle::spawn("doomed", || panic!("boom")).unwrap();
        match stage.join() {
            Err(Error::StagePanicked { stage }) => assert_eq!(stage, "doomed"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn stage_set_collects_every_failure() {
        let mut set = StageSet::new();
        set.push(StageHandle::spawn("ok", || Ok(())).unwrap());
        set.push(
            StageHandle::spawn("bad", || Err(Error::decode("scripted failure"))).unwrap(),
        );
        let failures = set.shutdown();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bad");
    }
}

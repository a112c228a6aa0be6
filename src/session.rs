//! Run sessions: submit an analysis, then steer it from another thread.
//!
//! Every submitted run owns its snapshot and configuration and executes on
//! its own thread. The caller keeps a [`RunHandle`] to pause, resume or stop
//! the run and to poll its progress. Solvers only look at the shared
//! [`RunControl`] at their suspension points (after a transient step, an AC
//! frequency point or a sweep point), so a request takes effect at the next
//! such point.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::analysis::{self, AnalysisConfig, SimulationResult, Snapshot};
use crate::error::{Result, SimError};

/// Lifecycle of a submitted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Submitted, worker thread not started yet
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// True once the run has finished one way or another.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Most recent intermediate output of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialResult {
    /// Last accepted transient time point
    TransientSample { time: f64, solution: Vec<f64> },
    /// Last solved AC frequency
    AcPoint { frequency: f64 },
    /// Number of sweep points finished so far
    SweepPoints { completed: usize, total: usize },
}

/// Snapshot of a run's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Fraction of the work done, in [0, 1]
    pub fraction_complete: f64,
    pub status: RunStatus,
    pub latest_partial: Option<PartialResult>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            fraction_complete: 0.0,
            status: RunStatus::Running,
            latest_partial: None,
        }
    }
}

#[derive(Debug, Default)]
struct ControlState {
    stop: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
    progress: Mutex<Progress>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pause/stop flags and progress shared between a run and its handle.
///
/// Cloning yields another view of the same flags. A fresh `RunControl`
/// is never paused or stopped, which is what synchronous callers use.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    inner: Arc<ControlState>,
}

impl RunControl {
    /// Create a control block for a running, unpaused run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at its next suspension point.
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        let _paused = lock(&self.inner.paused);
        self.inner.resumed.notify_all();
    }

    /// Ask the run to pause at its next suspension point.
    pub fn request_pause(&self) {
        *lock(&self.inner.paused) = true;
    }

    /// Release a paused run.
    pub fn request_resume(&self) {
        *lock(&self.inner.paused) = false;
        self.inner.resumed.notify_all();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    pub fn is_pause_requested(&self) -> bool {
        *lock(&self.inner.paused)
    }

    /// Block while a pause is pending and no stop has been requested.
    pub fn wait_while_paused(&self) {
        let mut paused = lock(&self.inner.paused);
        if !*paused || self.is_stop_requested() {
            return;
        }
        self.set_status(RunStatus::Paused);
        tracing::debug!("run paused");
        while *paused && !self.is_stop_requested() {
            paused = self
                .inner
                .resumed
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(paused);
        if !self.is_stop_requested() {
            self.set_status(RunStatus::Running);
            tracing::debug!("run resumed");
        }
    }

    /// Record progress without suspending.
    pub fn report(&self, fraction_complete: f64, partial: Option<PartialResult>) {
        let mut progress = lock(&self.inner.progress);
        progress.fraction_complete = fraction_complete.clamp(0.0, 1.0);
        if partial.is_some() {
            progress.latest_partial = partial;
        }
    }

    /// Record progress, then honor pending pause and stop requests.
    pub fn checkpoint(&self, fraction_complete: f64, partial: Option<PartialResult>) -> Result<()> {
        self.report(fraction_complete, partial);
        self.wait_while_paused();
        if self.is_stop_requested() {
            return Err(SimError::Cancelled);
        }
        Ok(())
    }

    pub fn set_status(&self, status: RunStatus) {
        lock(&self.inner.progress).status = status;
    }

    pub fn status(&self) -> RunStatus {
        lock(&self.inner.progress).status
    }

    pub fn progress(&self) -> Progress {
        lock(&self.inner.progress).clone()
    }
}

type Outcome = Arc<Mutex<Option<Result<SimulationResult>>>>;

/// Handle to a run executing on its own thread.
#[derive(Debug)]
pub struct RunHandle {
    id: u64,
    control: RunControl,
    outcome: Outcome,
    thread: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Identifier assigned by the session.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> RunStatus {
        self.control.status()
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        let status = self.status();
        if status.is_terminal() {
            return Err(SimError::InvalidState {
                operation: operation.to_string(),
                state: status.to_string(),
            });
        }
        Ok(())
    }

    /// Pause at the next suspension point.
    pub fn pause(&self) -> Result<()> {
        self.ensure_active("pause")?;
        self.control.request_pause();
        Ok(())
    }

    /// Resume a paused run.
    pub fn resume(&self) -> Result<()> {
        self.ensure_active("resume")?;
        self.control.request_resume();
        Ok(())
    }

    /// Stop the run. Stopping a finished or already stopped run does nothing.
    pub fn stop(&self) {
        if !self.status().is_terminal() {
            self.control.request_stop();
        }
    }

    pub fn progress(&self) -> Progress {
        self.control.progress()
    }

    /// The outcome, once the run has finished.
    pub fn result(&self) -> Option<Result<SimulationResult>> {
        lock(&self.outcome).clone()
    }

    /// Block until the run finishes and take its outcome.
    pub fn wait(mut self) -> Result<SimulationResult> {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                return Err(SimError::InvalidState {
                    operation: "wait".to_string(),
                    state: "panicked".to_string(),
                });
            }
        }
        lock(&self.outcome).take().unwrap_or(Err(SimError::Cancelled))
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        // Nobody can observe the outcome any more
        if self.thread.is_some() {
            self.control.request_stop();
        }
    }
}

/// Entry point for asynchronous runs.
#[derive(Debug, Default)]
pub struct Session {
    next_run_id: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and start a run.
    ///
    /// Configuration and topology errors are returned here, before any
    /// thread is started.
    pub fn submit(&mut self, snapshot: impl Into<Snapshot>, config: AnalysisConfig) -> Result<RunHandle> {
        let snapshot = snapshot.into();
        analysis::validate(&snapshot, &config)?;

        let id = self.next_run_id;
        self.next_run_id += 1;
        let control = RunControl::new();
        control.set_status(RunStatus::Pending);
        let outcome: Outcome = Arc::new(Mutex::new(None));

        let thread = {
            let control = control.clone();
            let outcome = Arc::clone(&outcome);
            std::thread::spawn(move || {
                let _span = tracing::info_span!("run", id, analysis = config.name()).entered();
                control.set_status(RunStatus::Running);
                let result = analysis::run(&snapshot, &config, &control);
                let status = match &result {
                    Ok(_) => RunStatus::Completed,
                    Err(SimError::Cancelled) => RunStatus::Cancelled,
                    Err(err) => {
                        tracing::warn!(%err, "run failed");
                        RunStatus::Failed
                    }
                };
                if status == RunStatus::Completed {
                    control.report(1.0, None);
                }
                // The status turns terminal before the outcome becomes visible
                let mut slot = lock(&outcome);
                control.set_status(status);
                *slot = Some(result);
            })
        };

        tracing::info!(id, "run submitted");
        Ok(RunHandle {
            id,
            control,
            outcome,
            thread: Some(thread),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_checkpoint_reports_progress() {
        let control = RunControl::new();
        control
            .checkpoint(0.25, Some(PartialResult::AcPoint { frequency: 10.0 }))
            .unwrap();
        let progress = control.progress();
        assert_eq!(progress.fraction_complete, 0.25);
        assert_eq!(progress.latest_partial, Some(PartialResult::AcPoint { frequency: 10.0 }));
    }

    #[test]
    fn test_checkpoint_after_stop_is_cancelled() {
        let control = RunControl::new();
        control.request_stop();
        assert_eq!(control.checkpoint(0.5, None), Err(SimError::Cancelled));
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let control = RunControl::new();
        control.request_pause();
        let worker = {
            let control = control.clone();
            std::thread::spawn(move || control.checkpoint(0.1, None))
        };
        while control.status() != RunStatus::Paused {
            std::thread::sleep(Duration::from_millis(1));
        }
        control.request_resume();
        assert_eq!(worker.join().unwrap(), Ok(()));
        assert_eq!(control.status(), RunStatus::Running);
    }

    fn divider() -> crate::circuit::Circuit {
        use crate::components::Waveform;
        let mut b = crate::circuit::CircuitBuilder::new();
        b.add_voltage_source("V1", "in", "0", Waveform::Dc(10.0)).unwrap();
        b.add_resistor("R1", "in", "out", 1000.0).unwrap();
        b.add_resistor("R2", "out", "0", 1000.0).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_submitted_run_starts_active() {
        let mut session = Session::new();
        let handle = session
            .submit(divider(), AnalysisConfig::Dc(crate::solver::DcConfig::new()))
            .unwrap();
        assert!(matches!(
            handle.status(),
            RunStatus::Pending | RunStatus::Running | RunStatus::Completed
        ));
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_visible_outcome_implies_terminal_status() {
        let mut session = Session::new();
        for _ in 0..20 {
            let handle = session
                .submit(divider(), AnalysisConfig::Dc(crate::solver::DcConfig::new()))
                .unwrap();
            while handle.result().is_none() {
                std::thread::yield_now();
            }
            assert_eq!(handle.status(), RunStatus::Completed);
            assert!(matches!(handle.pause(), Err(SimError::InvalidState { .. })));
            assert!(matches!(handle.resume(), Err(SimError::InvalidState { .. })));
        }
    }

    #[test]
    fn test_stop_releases_paused_run() {
        let control = RunControl::new();
        control.request_pause();
        let worker = {
            let control = control.clone();
            std::thread::spawn(move || control.checkpoint(0.1, None))
        };
        while control.status() != RunStatus::Paused {
            std::thread::sleep(Duration::from_millis(1));
        }
        control.request_stop();
        assert_eq!(worker.join().unwrap(), Err(SimError::Cancelled));
    }
}

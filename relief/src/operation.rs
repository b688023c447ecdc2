//! Runs exports on a worker thread and hands the result back to the thread
//! that started them.

use std::{
    mem,
    sync::Arc,
    thread,
};

use clone_macro::clone;
use common::progress::Progress;
use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::{
    error::{ReliefError, Result},
    export::{export, ExportReport, ExportRequest},
};

enum JobState {
    Running,
    Done(Result<ExportReport>),
    Collected,
}

/// A handle to one export running on its own thread. Clones share the job.
#[derive(Clone)]
pub struct ExportOperation {
    progress: Progress,
    state: Arc<Mutex<JobState>>,
    done: Arc<Condvar>,
}

impl ExportOperation {
    pub fn spawn(request: ExportRequest) -> Self {
        Self::spawn_with_progress(request, Progress::new())
    }

    /// Starts the export, reporting through `progress`. Use
    /// [`Progress::with_callback`] to have milestones pushed to you.
    pub fn spawn_with_progress(request: ExportRequest, progress: Progress) -> Self {
        let operation = Self {
            progress,
            state: Arc::new(Mutex::new(JobState::Running)),
            done: Arc::new(Condvar::new()),
        };

        info!("Starting export to `{}`", request.path.display());
        thread::spawn(clone!([operation], move || {
            let result = export(&request, &operation.progress);
            operation.finish(result);
        }));

        operation
    }

    fn finish(&self, result: Result<ExportReport>) {
        *self.state.lock() = JobState::Done(result);
        self.progress.set_finished();
        self.done.notify_all();
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Whether the worker is done, including when its result was already
    /// collected.
    pub fn is_finished(&self) -> bool {
        !matches!(*self.state.lock(), JobState::Running)
    }

    /// Takes the result if the export has finished. Only the first call after
    /// completion, across all clones, gets it.
    pub fn poll(&self) -> Option<Result<ExportReport>> {
        let mut state = self.state.lock();
        take_result(&mut state)
    }

    /// Blocks until the export has finished and takes its result. Returns
    /// [`None`] if it was collected elsewhere.
    pub fn wait(&self) -> Option<Result<ExportReport>> {
        let mut state = self.state.lock();
        while matches!(*state, JobState::Running) {
            self.done.wait(&mut state);
        }

        take_result(&mut state)
    }
}

fn take_result(state: &mut JobState) -> Option<Result<ExportReport>> {
    match mem::replace(state, JobState::Collected) {
        JobState::Done(result) => Some(result),
        JobState::Running => {
            *state = JobState::Running;
            None
        }
        JobState::Collected => None,
    }
}

/// Allows one export at a time. The interactive side checks
/// [`Exporter::is_busy`] to decide whether exporting is currently possible.
#[derive(Default)]
pub struct Exporter {
    current: Option<ExportOperation>,
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `request` unless another export is still running.
    pub fn start(&mut self, request: ExportRequest) -> Result<ExportOperation> {
        self.start_with_progress(request, Progress::new())
    }

    pub fn start_with_progress(
        &mut self,
        request: ExportRequest,
        progress: Progress,
    ) -> Result<ExportOperation> {
        if self.is_busy() {
            warn!("Ignoring export to `{}`, one is already running", request.path.display());
            return Err(ReliefError::invalid_input("an export is already running"));
        }

        let operation = ExportOperation::spawn_with_progress(request, progress);
        self.current = Some(operation.clone());
        Ok(operation)
    }

    pub fn is_busy(&self) -> bool {
        self.current.as_ref().is_some_and(|op| !op.is_finished())
    }

    /// Collects the result of the current export once it is done.
    pub fn poll(&mut self) -> Option<Result<ExportReport>> {
        let result = self.current.as_ref()?.poll();
        if result.is_some() {
            self.current = None;
        }
        result
    }
}

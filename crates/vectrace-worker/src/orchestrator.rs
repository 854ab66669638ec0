//! The task orchestrator: one background thread, one task at a time.
//!
//! ```text
//! Idle ──load──▶ Loading ──ok──▶ Ready ──segment/export──▶ Running ──ok──▶ Ready
//!   ▲               │                                         │
//!   │               └──────fail──▶ Error ◀──────fail──────────┘
//!   └──── Cancelling ◀──cancel── (Loading | Running)
//! ```
//!
//! Requests are validated against the state on the caller's thread and
//! rejected with [`OrchestratorError::Busy`] while a task is active, so
//! at most one task is ever queued or running. The worker thread owns
//! the model loader and the loaded model; callers only touch the small
//! control block behind a mutex and receive [`TaskEvent`]s over
//! channels.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use vectrace_pipeline::RgbImage;

use crate::event::{EventKind, TaskEvent, TaskKind, TaskOutput};
use crate::oracle::{ModelLoader, SegmentationParams};
use crate::progress::{Reporter, TaskError, broadcast};
use crate::tasks::{self, ExportRequest, LoadedModel};

/// Lifecycle state of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// No task, no model.
    #[default]
    Idle,
    Loading,
    /// No task, model held.
    Ready,
    Running,
    /// A stop was requested; the active task ends at its next poll point.
    Cancelling,
    /// The last task failed.
    Error,
}

impl WorkerState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Error => "error",
        }
    }

    /// Whether a task is queued or running.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Loading | Self::Running | Self::Cancelling)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejected orchestrator request.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("worker is busy ({state})")]
    Busy { state: WorkerState },

    #[error("cannot {requested} while {state}")]
    InvalidState {
        state: WorkerState,
        requested: &'static str,
    },

    #[error("worker thread is gone")]
    WorkerGone,

    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The fields that say what is running and whether it should stop.
#[derive(Debug, Default)]
pub(crate) struct Control {
    state: WorkerState,
    active: Option<TaskKind>,
    stop: bool,
    model_loaded: bool,
}

/// State shared between the caller side and the worker thread.
#[derive(Default)]
pub(crate) struct Shared {
    control: Mutex<Control>,
    listeners: Mutex<Vec<Sender<TaskEvent>>>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, tx: Sender<TaskEvent>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
    }

    pub(crate) fn emit(&self, event: &TaskEvent) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        broadcast(&mut listeners, event);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.control().stop
    }

    pub(crate) fn request_stop(&self) {
        self.control().stop = true;
    }
}

enum Command {
    Load {
        path: PathBuf,
        params: SegmentationParams,
    },
    Segment(RgbImage),
    Export(Box<ExportRequest>),
    Unload,
    Shutdown,
}

/// Worker-thread side: owns the loader and the model.
struct Worker {
    shared: Arc<Shared>,
    loader: Box<dyn ModelLoader>,
    model: Option<LoadedModel>,
}

impl Worker {
    fn new(shared: Arc<Shared>, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            shared,
            loader,
            model: None,
        }
    }

    fn run(mut self, commands: &Receiver<Command>) {
        for command in commands {
            if !self.execute(command) {
                break;
            }
        }
        tracing::debug!("worker thread exiting");
    }

    /// Handle one command. Returns `false` on shutdown.
    fn execute(&mut self, command: Command) -> bool {
        let task = match &command {
            Command::Shutdown => return false,
            Command::Unload => {
                if self.model.take().is_some() {
                    tracing::info!("model released");
                }
                return true;
            }
            Command::Load { .. } => TaskKind::LoadModel,
            Command::Segment(_) => TaskKind::Segment,
            Command::Export(_) => TaskKind::Export,
        };

        let shared = Arc::clone(&self.shared);
        let mut rep = Reporter::new(&shared, task);
        rep.started();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&mut rep, command)))
            .unwrap_or_else(|_| {
                Err(TaskError::Failed {
                    message: "task aborted unexpectedly".to_owned(),
                    detail: "worker task panicked".to_owned(),
                })
            });
        self.finish(&rep, task, outcome);
        true
    }

    fn dispatch(
        &mut self,
        rep: &mut Reporter<'_>,
        command: Command,
    ) -> Result<TaskOutput, TaskError> {
        match command {
            Command::Load { path, params } => {
                // A reload replaces whatever was held, even if it fails.
                self.model = None;
                let (model, output) =
                    tasks::load_model(rep, self.loader.as_mut(), &path, params)?;
                self.model = Some(model);
                Ok(output)
            }
            Command::Segment(image) => {
                let Some(model) = self.model.as_mut() else {
                    return Err(TaskError::Failed {
                        message: "no model loaded".to_owned(),
                        detail: String::new(),
                    });
                };
                tasks::segment(rep, model, image)
            }
            Command::Export(request) => tasks::export(rep, *request),
            Command::Unload | Command::Shutdown => Err(TaskError::Failed {
                message: "not a task".to_owned(),
                detail: String::new(),
            }),
        }
    }

    /// Settle the state, then emit the terminal event.
    fn finish(
        &mut self,
        rep: &Reporter<'_>,
        task: TaskKind,
        outcome: Result<TaskOutput, TaskError>,
    ) {
        let kind = {
            let mut control = self.shared.control();
            let cancelled = control.stop || matches!(outcome, Err(TaskError::Cancelled));
            if cancelled {
                self.model = None;
            }
            control.model_loaded = self.model.is_some();
            control.stop = false;
            control.active = None;
            control.state = match (&outcome, cancelled) {
                (_, true) => WorkerState::Idle,
                (Ok(_), false) if control.model_loaded => WorkerState::Ready,
                (Ok(_), false) => WorkerState::Idle,
                (Err(_), false) => WorkerState::Error,
            };

            match outcome {
                Ok(output) => EventKind::Finished(output),
                Err(TaskError::Cancelled) => EventKind::Failed {
                    message: "cancelled".to_owned(),
                    detail: format!("{task} stopped at a checkpoint"),
                },
                Err(TaskError::Failed { message, detail }) => {
                    tracing::warn!(%task, %message, %detail, "task failed");
                    EventKind::Failed { message, detail }
                }
            }
        };
        tracing::info!(%task, state = %self.shared.control().state, "task ended");
        rep.emit(kind);
    }
}

/// Runs model loading, segmentation and export on a background thread.
///
/// All request methods return immediately; results arrive as
/// [`TaskEvent`]s on receivers from [`subscribe`](Self::subscribe).
pub struct Orchestrator {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Start the worker thread. `loader` is moved onto it.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Spawn`] if the thread cannot start.
    pub fn new(loader: impl ModelLoader + 'static) -> Result<Self, OrchestratorError> {
        let shared = Arc::new(Shared::default());
        let (commands, rx) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let loader: Box<dyn ModelLoader> = Box::new(loader);
        let handle = thread::Builder::new()
            .name("vectrace-worker".to_owned())
            .spawn(move || Worker::new(worker_shared, loader).run(&rx))?;
        Ok(Self {
            shared,
            commands,
            handle: Some(handle),
        })
    }

    /// A new receiver for every event from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<TaskEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribe(tx);
        rx
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.shared.control().state
    }

    #[must_use]
    pub fn active_task(&self) -> Option<TaskKind> {
        self.shared.control().active
    }

    #[must_use]
    pub fn has_model(&self) -> bool {
        self.shared.control().model_loaded
    }

    /// Acquire the model at `path`; the generator is built with `params`.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Busy`] while a task is active.
    pub fn load_model(
        &self,
        path: impl Into<PathBuf>,
        params: SegmentationParams,
    ) -> Result<(), OrchestratorError> {
        let command = Command::Load {
            path: path.into(),
            params,
        };
        self.submit(TaskKind::LoadModel, command)
    }

    /// Generate masks for `image` with the loaded model.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Busy`] while a task is active,
    /// [`OrchestratorError::InvalidState`] without a model.
    pub fn segment(&self, image: RgbImage) -> Result<(), OrchestratorError> {
        self.submit(TaskKind::Segment, Command::Segment(image))
    }

    /// Vectorize masks and write a drawing. Needs no model.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Busy`] while a task is active.
    pub fn export(&self, request: ExportRequest) -> Result<(), OrchestratorError> {
        self.submit(TaskKind::Export, Command::Export(Box::new(request)))
    }

    /// Release the model: `Ready → Idle`.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Busy`] while a task is active,
    /// [`OrchestratorError::InvalidState`] without a model.
    pub fn unload(&self) -> Result<(), OrchestratorError> {
        let mut control = self.shared.control();
        if control.state.is_busy() {
            return Err(OrchestratorError::Busy {
                state: control.state,
            });
        }
        if !control.model_loaded {
            return Err(OrchestratorError::InvalidState {
                state: control.state,
                requested: "unload",
            });
        }
        self.commands
            .send(Command::Unload)
            .map_err(|_| OrchestratorError::WorkerGone)?;
        control.model_loaded = false;
        control.state = WorkerState::Idle;
        Ok(())
    }

    /// Ask the active task to stop at its next poll point.
    ///
    /// The task then ends with a `cancelled` failure and the orchestrator
    /// lands in [`WorkerState::Idle`] without a model. A stop cannot
    /// interrupt a call into the oracle that is already running.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidState`] when nothing is active.
    pub fn cancel(&self) -> Result<(), OrchestratorError> {
        let mut control = self.shared.control();
        match control.state {
            WorkerState::Loading | WorkerState::Running => {
                control.stop = true;
                control.state = WorkerState::Cancelling;
                tracing::info!(task = ?control.active, "cancellation requested");
                Ok(())
            }
            WorkerState::Cancelling => Ok(()),
            state => Err(OrchestratorError::InvalidState {
                state,
                requested: "cancel",
            }),
        }
    }

    /// Stop the active task at its next poll point and wait for the
    /// worker thread to exit.
    pub fn shutdown(mut self) {
        self.stop_thread();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("worker thread panicked");
        }
    }

    fn stop_thread(&self) {
        self.shared.request_stop();
        // The thread may already be gone; nothing left to tell it.
        let _ = self.commands.send(Command::Shutdown);
    }

    fn submit(&self, task: TaskKind, command: Command) -> Result<(), OrchestratorError> {
        let mut control = self.shared.control();
        if control.state.is_busy() {
            tracing::debug!(%task, state = %control.state, "rejecting request");
            return Err(OrchestratorError::Busy {
                state: control.state,
            });
        }
        if task == TaskKind::Segment && !control.model_loaded {
            return Err(OrchestratorError::InvalidState {
                state: control.state,
                requested: "segment",
            });
        }
        self.commands
            .send(command)
            .map_err(|_| OrchestratorError::WorkerGone)?;
        control.state = if task == TaskKind::LoadModel {
            WorkerState::Loading
        } else {
            WorkerState::Running
        };
        control.active = Some(task);
        control.stop = false;
        Ok(())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Detach rather than join: a stuck oracle call would hang the drop.
        if self.handle.is_some() {
            self.stop_thread();
        }
    }
}

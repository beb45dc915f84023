use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Degradation, ErrorKind, GifsmithError, Result};
use crate::export::batch::BatchResult;
use crate::export::pipeline::ExportSummary;

/// Everything a background job reports
///
/// A job sends any number of non-terminal events followed by exactly one of
/// `Finished`, `BatchFinished`, `Failed` or `Cancelled`, after which the
/// channel closes.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started,
    Progress { completed: usize, total: usize },
    Log(String),
    Degraded(Degradation),
    Finished(ExportSummary),
    BatchFinished(BatchResult),
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished(_) | Self::BatchFinished(_) | Self::Failed { .. } | Self::Cancelled
        )
    }
}

/// Shared flag a job polls between units of work
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GifsmithError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Sending half of a job's event channel
///
/// Sends never fail: if the receiver was dropped nobody is listening and the
/// job simply runs to completion.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<UnboundedSender<JobEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: JobEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, completed: usize, total: usize) {
        self.send(JobEvent::Progress { completed, total });
    }

    /// Log at info level and forward the line to the listener
    pub fn log<S: Into<String>>(&self, message: S) {
        let message = message.into();
        info!("{}", message);
        self.send(JobEvent::Log(message));
    }

    pub fn degraded(&self, degradation: Degradation) {
        self.send(JobEvent::Degraded(degradation));
    }
}

/// The caller's side of a running job
#[derive(Debug)]
pub struct JobHandle {
    events: UnboundedReceiver<JobEvent>,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Next event, `None` once the terminal event has been received
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Ask the job to stop at the next frame or input boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drain events until the terminal one and wait for the worker to exit
    pub async fn finish(mut self) -> Option<JobEvent> {
        let mut terminal = None;
        while let Some(event) = self.events.recv().await {
            if event.is_terminal() {
                terminal = Some(event);
            }
        }
        if let Err(e) = self.task.await {
            error!("Job worker panicked: {}", e);
        }
        terminal
    }
}

/// Run `work` on the blocking pool and report its outcome as the terminal event
///
/// `guard` is dropped once the terminal event has been sent. Must be called
/// from within a tokio runtime.
pub(crate) fn spawn_job<T, G, W, F>(name: &'static str, guard: G, work: W, finish: F) -> JobHandle
where
    T: Send + 'static,
    G: Send + 'static,
    W: FnOnce(&EventSink, &CancelToken) -> Result<T> + Send + 'static,
    F: FnOnce(T) -> JobEvent + Send + 'static,
{
    let (sink, events) = EventSink::channel();
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let task = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        sink.send(JobEvent::Started);

        let terminal = match work(&sink, &token) {
            Ok(value) => finish(value),
            Err(GifsmithError::Cancelled) => {
                info!("{} job cancelled", name);
                JobEvent::Cancelled
            }
            Err(e) => {
                error!("{} job failed: {}", name, e);
                JobEvent::Failed {
                    kind: e.kind(),
                    message: e.user_message(),
                }
            }
        };

        debug!("{} job finished with {:?}", name, terminal);
        sink.send(terminal);
    });

    JobHandle { events, cancel, task }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, Mutex, Weak};

use futures::{Stream, StreamExt};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::{
    config::MergeOptions,
    error::{ErrorKind, MergeError},
    toolkit::{FfmpegToolkit, MediaToolkit},
    worker::Job,
};

/// Lifecycle of a merge job. The last three states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MergeState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Completed,
    Failed,
}

impl MergeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Stopped,
            5 => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// Job state shared between the caller and the worker.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: MergeState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> MergeState {
        MergeState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: MergeState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: MergeState, to: MergeState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Notifications of one job, in the order they happen.
#[derive(Debug, Clone)]
pub enum MergeEvent {
    /// The job entered Running.
    Started,
    Error(Arc<MergeError>),
    /// Percentage of the source consumed.
    Processing(u8),
    /// The job completed or was stopped; the file at this path is playable.
    Stopped(PathBuf),
}

/// Receives job notifications on the notification runtime.
///
/// A job notifies `did_start` once, then `did_processing` any number of times,
/// then exactly one of `did_error` or `did_stop`. A job that fails while
/// starting only notifies `did_error`.
pub trait MergerDelegate: Send + Sync {
    fn did_start(&self, _merger: &StreamMerger) {}

    fn did_error(&self, _merger: &StreamMerger, _error: &MergeError) {}

    fn did_processing(&self, _merger: &StreamMerger, _progress: u8) {}

    fn did_stop(&self, _merger: &StreamMerger, _output_path: &Path) {}
}

const EVENT_CAPACITY: usize = 256;

fn background_runtime() -> Result<Handle, MergeError> {
    static RUNTIME: LazyLock<std::io::Result<Runtime>> = LazyLock::new(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("merge-notify")
            .enable_all()
            .build()
    });
    match &*RUNTIME {
        Ok(runtime) => Ok(runtime.handle().clone()),
        Err(e) => Err(MergeError::new(
            ErrorKind::Worker,
            anyhow::anyhow!("notification runtime: {}", e),
        )),
    }
}

struct Shared {
    id: String,
    url: String,
    options: MergeOptions,
    output_path: PathBuf,
    toolkit: Arc<dyn MediaToolkit>,
    notify: Mutex<Option<Handle>>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    delegate: Mutex<Option<Weak<dyn MergerDelegate>>>,
    events: broadcast::Sender<MergeEvent>,
}

/// Merges every audio stream of one media source into a single encoded track.
///
/// Cloning yields another handle to the same job.
#[derive(Clone)]
pub struct StreamMerger {
    shared: Arc<Shared>,
}

impl StreamMerger {
    /// A job with default options.
    pub fn new(url: &str) -> Self {
        Self::with_toolkit(url, MergeOptions::default(), Arc::new(FfmpegToolkit))
    }

    /// A job configured from a string option map, see [`MergeOptions::from_map`].
    pub fn with_options(url: &str, options: &HashMap<String, String>) -> Result<Self, MergeError> {
        let options = MergeOptions::from_map(options)?;
        Ok(Self::with_toolkit(url, options, Arc::new(FfmpegToolkit)))
    }

    pub fn with_toolkit(url: &str, options: MergeOptions, toolkit: Arc<dyn MediaToolkit>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let output_path = options.resolve_output_path(url);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                id,
                url: url.to_string(),
                options,
                output_path,
                toolkit,
                notify: Mutex::new(None),
                state: Arc::new(StateCell::new(MergeState::Idle)),
                cancel: CancellationToken::new(),
                delegate: Mutex::new(None),
                events,
            }),
        }
    }

    /// Runs the job and delivers its notifications on `handle` instead of the
    /// ambient runtime. Only allowed before [`StreamMerger::start`].
    pub fn notify_on(&self, handle: Handle) -> Result<(), MergeError> {
        let mut slot = self.shared.notify.lock().map_err(|_| {
            MergeError::new(
                ErrorKind::InvalidState,
                anyhow::anyhow!("merger {} notification slot poisoned", self.shared.id),
            )
        })?;
        let state = self.shared.state.load();
        if state != MergeState::Idle {
            return Err(MergeError::new(
                ErrorKind::InvalidState,
                anyhow::anyhow!("merger {} is {:?}", self.shared.id, state),
            ));
        }
        *slot = Some(handle);
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn options(&self) -> &MergeOptions {
        &self.shared.options
    }

    pub fn output_path(&self) -> &Path {
        &self.shared.output_path
    }

    pub fn state(&self) -> MergeState {
        self.shared.state.load()
    }

    /// True once the job reached a terminal state.
    pub fn is_stopped(&self) -> bool {
        self.state().is_terminal()
    }

    /// Holds `delegate` weakly; notifications stop once it is dropped.
    pub fn set_delegate(&self, delegate: &Arc<dyn MergerDelegate>) {
        if let Ok(mut slot) = self.shared.delegate.lock() {
            *slot = Some(Arc::downgrade(delegate));
        }
    }

    fn delegate(&self) -> Option<Arc<dyn MergerDelegate>> {
        self.shared
            .delegate
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MergeEvent> {
        self.shared.events.subscribe()
    }

    /// Events published after this call.
    pub fn events(&self) -> impl Stream<Item = MergeEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|r| async move { r.ok() })
    }

    /// Starts the job on a blocking task of the notification runtime. A job runs at most once.
    pub fn start(&self) -> Result<(), MergeError> {
        let shared = &self.shared;
        if !shared.state.transition(MergeState::Idle, MergeState::Starting) {
            return Err(MergeError::new(
                ErrorKind::InvalidState,
                anyhow::anyhow!("merger {} is {:?}", shared.id, shared.state.load()),
            ));
        }
        log::info!("merge starting: {}", shared.url);

        let requested = shared.notify.lock().ok().and_then(|slot| slot.clone());
        let notify = match requested {
            Some(handle) => handle,
            None => match Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => match background_runtime() {
                    Ok(handle) => handle,
                    Err(e) => {
                        shared.state.store(MergeState::Failed);
                        return Err(e);
                    }
                },
            },
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let job = Job {
            url: shared.url.clone(),
            options: shared.options.clone(),
            output_path: shared.output_path.clone(),
            toolkit: shared.toolkit.clone(),
            cancel: shared.cancel.clone(),
            state: shared.state.clone(),
            events: tx,
        };

        notify.spawn_blocking(move || job.run());
        notify.spawn(Self::dispatch(self.clone(), rx));
        Ok(())
    }

    /// Requests cancellation. The job flushes what it has and stops; no-op once terminal.
    pub fn stop(&self) {
        if self.is_stopped() {
            return;
        }
        log::info!("merge stop requested: {}", self.shared.url);
        self.shared.cancel.cancel();
    }

    async fn dispatch(self, mut rx: mpsc::UnboundedReceiver<MergeEvent>) {
        while let Some(event) = rx.recv().await {
            if let Some(delegate) = self.delegate() {
                match &event {
                    MergeEvent::Started => delegate.did_start(&self),
                    MergeEvent::Error(e) => delegate.did_error(&self, e),
                    MergeEvent::Processing(progress) => delegate.did_processing(&self, *progress),
                    MergeEvent::Stopped(path) => delegate.did_stop(&self, path),
                }
            }
            let _ = self.shared.events.send(event);
        }
        log::debug!("merger {} dispatcher finished", self.shared.id);
    }
}

#[cfg(test)]
#[path = "merger_test.rs"]
mod merger_test;

//! Load session orchestration: fetch → index → rebuild → render.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cluster::indexer::GeometryIndexer;
use cluster::snapshot::{IndexSnapshot, SharedIndex};
use formats::page::{Cursor, Page};
use runtime::event_bus::EventBus;
use runtime::metrics::LoadMetrics;
use runtime::scheduler::Cooperative;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::NetworkError;
use crate::fetcher::PageFetcher;
use crate::progress::{LoadEvent, LoadState, SessionProgress};

/// Where loaded batches get drawn.
pub trait RenderTarget: Send {
    /// A new session is starting; forget per-session state such as auto-fit.
    fn begin_session(&mut self) {}

    /// Draw the latest snapshot. Returns `false` when no map is mounted; the
    /// coordinator keeps the batch pending and retries once at session end.
    fn render_batch(&mut self, snapshot: &Arc<IndexSnapshot>) -> bool;
}

/// Cooperative cancellation for one session.
///
/// Each session gets a fresh flag, so a handle from an earlier session never
/// affects a later one.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Owns one load session's state and drives it to a terminal state.
///
/// Only this type mutates the feature table, the points buffer, and the
/// shared index. `run` borrows the coordinator mutably, so there is never
/// more than one loop per coordinator.
pub struct LoadCoordinator {
    config: LoaderConfig,
    fetcher: Arc<dyn PageFetcher>,
    yielder: Arc<dyn Cooperative>,
    index: SharedIndex,
    indexer: GeometryIndexer,
    target: Option<Box<dyn RenderTarget>>,
    events: EventBus<LoadEvent>,
    state: LoadState,
    progress: SessionProgress,
    metrics: LoadMetrics,
    session: u64,
    pending_render: bool,
    /// Set by `start_session`, consumed by the next `run`.
    primed: bool,
    cancel: CancelHandle,
}

impl LoadCoordinator {
    pub fn new(
        config: LoaderConfig,
        fetcher: Arc<dyn PageFetcher>,
        yielder: Arc<dyn Cooperative>,
        index: SharedIndex,
    ) -> Self {
        Self {
            config,
            fetcher,
            yielder,
            index,
            indexer: GeometryIndexer::new(),
            target: None,
            events: EventBus::new(),
            state: LoadState::Idle,
            progress: SessionProgress::default(),
            metrics: LoadMetrics::new(),
            session: 0,
            pending_render: false,
            primed: false,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_target(mut self, target: Box<dyn RenderTarget>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn events(&self) -> &EventBus<LoadEvent> {
        &self.events
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn progress(&self) -> SessionProgress {
        self.progress
    }

    pub fn metrics(&self) -> &LoadMetrics {
        &self.metrics
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn indexer(&self) -> &GeometryIndexer {
        &self.indexer
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Handle for the current session.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// `Idle → Loading`: clear all session state and hand out a fresh cancel
    /// handle. `run` calls this itself unless a session was started and has
    /// not been run yet.
    pub fn start_session(&mut self) -> CancelHandle {
        self.session += 1;
        self.cancel = CancelHandle::new();
        self.indexer.reset();
        self.index.clear();
        self.metrics.clear();
        self.pending_render = false;
        self.progress = SessionProgress {
            total_fetched: 0,
            has_more: true,
            is_loading: true,
        };
        if let Some(target) = self.target.as_mut() {
            target.begin_session();
        }
        self.state = LoadState::Loading;
        self.primed = true;

        info!(session = self.session, "load session started");
        self.events.emit(&LoadEvent::Progress(self.progress));
        self.cancel.clone()
    }

    /// Drive the session until the last page, a failure, or cancellation.
    ///
    /// A `run` future dropped mid-session leaves its session abandoned; the
    /// next `run` starts over with a fresh one.
    pub async fn run(&mut self) -> LoadState {
        if !(self.primed && self.state.is_active()) {
            self.start_session();
        }
        self.primed = false;
        let cancel = self.cancel.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let yielder = Arc::clone(&self.yielder);
        let mut cursor: Option<Cursor> = None;

        loop {
            if cancel.is_cancelled() {
                return self.finish(LoadState::Cancelled);
            }

            let result = fetcher.fetch_page(cursor.as_ref()).await;
            if cancel.is_cancelled() {
                return self.finish(LoadState::Cancelled);
            }

            let page = match result {
                Ok(page) => page,
                Err(err) => return self.halt(err),
            };

            match self.apply_page(page) {
                Some(next) => {
                    cursor = Some(next);
                    yielder.yield_for(self.config.yield_interval()).await;
                }
                None => {
                    self.state = LoadState::Draining;
                    return self.finish(LoadState::Done);
                }
            }
        }
    }

    /// Index one page, rebuild, render. Returns the cursor of the next page.
    fn apply_page(&mut self, page: Page) -> Option<Cursor> {
        let rejected = page.rejected;
        let summary = self.indexer.ingest(page.features);
        self.metrics
            .record_page(summary.received + rejected, summary.skipped + rejected);

        let snapshot = self.index.rebuild(&self.indexer);
        self.metrics.record_rebuild();
        self.render(&snapshot);

        self.progress.total_fetched += summary.received as u64;
        self.progress.has_more = page.next_cursor.is_some();
        debug!(
            session = self.session,
            received = summary.received,
            indexed = summary.indexed,
            skipped = summary.skipped + rejected,
            total = self.progress.total_fetched,
            "batch loaded"
        );
        self.events.emit(&LoadEvent::Progress(self.progress));

        page.next_cursor
    }

    fn render(&mut self, snapshot: &Arc<IndexSnapshot>) {
        let drawn = match self.target.as_mut() {
            Some(target) => target.render_batch(snapshot),
            None => false,
        };
        if drawn {
            self.metrics.record_render();
        }
        self.pending_render = !drawn;
    }

    fn halt(&mut self, err: NetworkError) -> LoadState {
        warn!(session = self.session, status = ?err.status(), %err, "load halted");
        self.events.emit(&LoadEvent::Failed {
            message: err.to_string(),
        });
        self.finish(LoadState::Halted)
    }

    fn finish(&mut self, state: LoadState) -> LoadState {
        debug_assert!(state.is_terminal());
        if self.pending_render {
            // One retry only; whatever the outcome, the session stops here.
            let snapshot = self.index.snapshot();
            self.render(&snapshot);
            self.pending_render = false;
        }

        self.state = state;
        self.progress.is_loading = false;
        if state == LoadState::Done {
            self.progress.has_more = false;
        }

        info!(
            session = self.session,
            state = ?state,
            total_fetched = self.progress.total_fetched,
            pages = self.metrics.pages_fetched,
            indexed = self.metrics.features_indexed(),
            skipped = self.metrics.features_skipped,
            rebuilds = self.metrics.index_rebuilds,
            renders = self.metrics.render_passes,
            mean_batch = ?self.metrics.batch_sizes.mean(),
            "load session finished"
        );
        self.events.emit(&LoadEvent::Progress(self.progress));
        self.events.emit(&LoadEvent::Finished(state));
        state
    }
}

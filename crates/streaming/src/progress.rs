/// Lifecycle of a load session.
///
/// `Idle → Loading → Draining → Done`; `Cancelled` and `Halted` can be reached
/// from any non-terminal state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    /// Last page received; finishing the final render.
    Draining,
    Done,
    Cancelled,
    /// Stopped by a network failure. Data already loaded stays visible.
    Halted,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoadState::Done | LoadState::Cancelled | LoadState::Halted
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, LoadState::Loading | LoadState::Draining)
    }
}

/// Aggregate counters for progress bars. Reset only when a session begins.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SessionProgress {
    pub total_fetched: u64,
    pub has_more: bool,
    pub is_loading: bool,
}

/// Published on the loader's event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    Progress(SessionProgress),
    /// Emitted at most once per session.
    Failed { message: String },
    Finished(LoadState),
}

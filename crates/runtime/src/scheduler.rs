use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cooperative scheduling primitive: give control back to the host for a
/// bounded interval so rendering and input are not starved by a long load.
///
/// Implementations decide what "yield" means on their executor; callers only
/// rely on the future completing after roughly `interval`.
pub trait Cooperative: Send + Sync {
    fn yield_for(&self, interval: Duration) -> BoxFuture<'_, ()>;
}

/// Yields to the tokio scheduler, then parks the task for the interval.
#[derive(Debug, Default, Copy, Clone)]
pub struct TokioYield;

impl Cooperative for TokioYield {
    fn yield_for(&self, interval: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        })
    }
}

/// Completes immediately and counts how often it was asked to yield.
#[derive(Debug, Default)]
pub struct ImmediateYield {
    yields: AtomicUsize,
}

impl ImmediateYield {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn yield_count(&self) -> usize {
        self.yields.load(Ordering::SeqCst)
    }
}

impl Cooperative for ImmediateYield {
    fn yield_for(&self, _interval: Duration) -> BoxFuture<'_, ()> {
        self.yields.fetch_add(1, Ordering::SeqCst);
        Box::pin(std::future::ready(()))
    }
}

use std::sync::Arc;

use cluster::snapshot::IndexSnapshot;
use parking_lot::{Mutex, MutexGuard};
use runtime::event_bus::{EventBus, Subscription};
use streaming::coordinator::RenderTarget;

use crate::renderer::ViewportRenderer;
use crate::surface::{MapSurface, ViewportBounds};

/// Pan or zoom ended.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewportChanged(pub ViewportBounds);

/// A renderer shared between the load loop and viewport events.
///
/// Never lock this from inside a surface call: the lock is not reentrant.
pub struct SharedRenderer<S: MapSurface> {
    inner: Arc<Mutex<ViewportRenderer<S>>>,
}

impl<S: MapSurface> Clone for SharedRenderer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MapSurface + 'static> SharedRenderer<S> {
    pub fn new(renderer: ViewportRenderer<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(renderer)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ViewportRenderer<S>> {
        self.inner.lock()
    }

    /// Redraw on every viewport change until the subscription is dropped.
    #[must_use = "dropping the subscription detaches the renderer"]
    pub fn attach(&self, bus: &EventBus<ViewportChanged>) -> Subscription {
        let inner = Arc::clone(&self.inner);
        bus.subscribe(move |_: &ViewportChanged| {
            inner.lock().redraw();
        })
    }
}

impl<S: MapSurface + 'static> RenderTarget for SharedRenderer<S> {
    fn begin_session(&mut self) {
        self.inner.lock().reset_session();
    }

    fn render_batch(&mut self, snapshot: &Arc<IndexSnapshot>) -> bool {
        self.inner.lock().render(snapshot).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{SharedRenderer, ViewportChanged};
    use crate::renderer::{RendererConfig, ViewportRenderer};
    use crate::surface::{MapSurface, RecordingSurface, ViewportBounds};
    use cluster::snapshot::SharedIndex;
    use formats::feature::{Feature, GeoPoint, Geometry};
    use formats::page::{Cursor, Page};
    use foundation::bounds::Aabb2;
    use runtime::event_bus::EventBus;
    use runtime::scheduler::{BoxFuture, ImmediateYield};
    use serde_json::Map;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use streaming::config::LoaderConfig;
    use streaming::coordinator::LoadCoordinator;
    use streaming::error::NetworkError;
    use streaming::fetcher::PageFetcher;
    use streaming::progress::LoadState;

    /// Serves `pages` pages of `per_page` points each, spread along a diagonal.
    struct GridFetcher {
        pages: u64,
        per_page: u64,
        calls: AtomicUsize,
    }

    impl PageFetcher for GridFetcher {
        fn fetch_page<'a>(
            &'a self,
            cursor: Option<&'a Cursor>,
        ) -> BoxFuture<'a, Result<Page, NetworkError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n: u64 = cursor.and_then(|c| c.as_str().parse().ok()).unwrap_or(0);
            let features = (0..self.per_page)
                .map(|i| {
                    let id = n * self.per_page + i;
                    let g = Geometry::Point(GeoPoint::new(id as f64 * 0.7 - 60.0, id as f64 * 0.3));
                    Feature::new(id + 1, Map::new(), Some(g))
                })
                .collect();
            let next = (n + 1 < self.pages).then(|| Cursor::new((n + 1).to_string()));
            Box::pin(std::future::ready(Ok(Page::new(features, next))))
        }
    }

    fn shared(surface: RecordingSurface) -> SharedRenderer<RecordingSurface> {
        SharedRenderer::new(ViewportRenderer::new(surface, RendererConfig::default()))
    }

    fn coordinator(pages: u64, renderer: &SharedRenderer<RecordingSurface>) -> LoadCoordinator {
        let fetcher = Arc::new(GridFetcher {
            pages,
            per_page: 10,
            calls: AtomicUsize::new(0),
        });
        LoadCoordinator::new(
            LoaderConfig::default(),
            fetcher,
            Arc::new(ImmediateYield::new()),
            SharedIndex::default(),
        )
        .with_target(Box::new(renderer.clone()))
    }

    #[tokio::test]
    async fn auto_fit_once_across_ten_batches() {
        let renderer = shared(RecordingSurface::mounted(ViewportBounds::new(
            Aabb2::world(),
            0,
        )));
        let mut c = coordinator(10, &renderer);

        assert_eq!(c.run().await, LoadState::Done);
        assert_eq!(c.progress().total_fetched, 100);
        assert_eq!(renderer.lock().surface().fits.len(), 1);
        assert_eq!(c.metrics().render_passes, 10);

        // A second session fits again, once.
        c.run().await;
        assert_eq!(renderer.lock().surface().fits.len(), 2);
    }

    #[tokio::test]
    async fn unmounted_map_gets_one_render_when_it_appears() {
        let renderer = shared(RecordingSurface::unmounted());
        let mut c = coordinator(3, &renderer);
        c.run().await;
        assert!(renderer.lock().surface().overlays().is_empty());
        assert_eq!(c.metrics().render_passes, 0);

        let bus = EventBus::new();
        let _sub = renderer.attach(&bus);
        let view = ViewportBounds::new(Aabb2::world(), 0);
        renderer.lock().surface_mut().set_viewport(Some(view));
        bus.emit(&ViewportChanged(view));
        assert!(!renderer.lock().surface().overlays().is_empty());
    }

    #[test]
    fn viewport_events_redraw_until_detached() {
        let index = SharedIndex::default();
        let mut ix = cluster::indexer::GeometryIndexer::new();
        ix.ingest(vec![
            Feature::new(1, Map::new(), Some(Geometry::Point(GeoPoint::new(-100.0, 40.0)))),
            Feature::new(2, Map::new(), Some(Geometry::Point(GeoPoint::new(100.0, 40.0)))),
        ]);
        let snap = index.rebuild(&ix);

        let west = ViewportBounds::new(Aabb2::from_wsen(-120.0, 20.0, -80.0, 60.0), 5);
        let east = ViewportBounds::new(Aabb2::from_wsen(80.0, 20.0, 120.0, 60.0), 5);
        let renderer = shared(RecordingSurface::mounted(west));
        renderer.lock().render(&snap);

        let bus = EventBus::new();
        let sub = renderer.attach(&bus);
        assert_eq!(bus.subscriber_count(), 1);

        renderer.lock().surface_mut().set_viewport(Some(east));
        bus.emit(&ViewportChanged(east));
        {
            let r = renderer.lock();
            assert_eq!(r.surface().overlays().len(), 1);
            assert_eq!(r.surface().viewport(), Some(east));
        }

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}

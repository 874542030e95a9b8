use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use cluster::index::ClusterOptions;
use cluster::snapshot::SharedIndex;
use formats::page::DEFAULT_PAGE_LIMIT;
use foundation::bounds::Aabb2;
use layers::renderer::{RenderMode, RendererConfig, ViewportRenderer};
use layers::surface::{MapSurface, Overlay, RecordingSurface, ViewportBounds};
use layers::viewport::{SharedRenderer, ViewportChanged};
use runtime::event_bus::EventBus;
use runtime::scheduler::TokioYield;
use streaming::config::LoaderConfig;
use streaming::coordinator::LoadCoordinator;
use streaming::fetcher::HttpPageFetcher;
use streaming::progress::{LoadEvent, LoadState};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless parcel map viewer")]
struct Args {
    /// Paginated GeoJSON endpoint
    #[arg(long, default_value = "http://127.0.0.1:9200/api/geojson")]
    endpoint: String,

    /// Features requested per page
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    page_size: usize,

    /// Pause between pages in milliseconds
    #[arg(long, default_value_t = 10)]
    yield_ms: u64,

    /// Cluster radius in pixels
    #[arg(long, default_value_t = 60.0)]
    radius: f64,

    /// Highest zoom that still clusters
    #[arg(long, default_value_t = 16)]
    max_zoom: u8,

    /// Viewport to inspect once loaded: minLon,minLat,maxLon,maxLat
    #[arg(long)]
    bbox: Option<String>,

    /// Zoom of the inspected viewport
    #[arg(long, default_value_t = 2)]
    zoom: u8,

    #[arg(long, value_enum, default_value_t = Mode::Clustered)]
    mode: Mode,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Clustered,
    Features,
}

impl From<Mode> for RenderMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Clustered => RenderMode::Clustered,
            Mode::Features => RenderMode::Features,
        }
    }
}

fn parse_bbox(raw: &str) -> Result<Aabb2, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("bad bbox value {p:?}: {e}")))
        .collect::<Result<_, _>>()?;
    let [west, south, east, north] = parts[..] else {
        return Err(format!("bbox needs 4 values, got {}", parts.len()));
    };
    if south > north {
        return Err("bbox south is above north".to_string());
    }
    Ok(Aabb2::from_wsen(west, south, east, north))
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let inspect = args.bbox.as_deref().map(parse_bbox).transpose()?;

    let surface = RecordingSurface::mounted(ViewportBounds::new(Aabb2::world(), 0));
    let renderer = SharedRenderer::new(ViewportRenderer::new(
        surface,
        RendererConfig {
            mode: args.mode.into(),
            ..RendererConfig::default()
        },
    ));
    let viewport_events: EventBus<ViewportChanged> = EventBus::new();
    let attached = renderer.attach(&viewport_events);

    let options = ClusterOptions {
        radius: args.radius,
        max_zoom: args.max_zoom,
        ..ClusterOptions::default()
    };
    let loader = LoaderConfig {
        page_size: args.page_size,
        yield_interval_ms: args.yield_ms,
    };
    let fetcher = HttpPageFetcher::new(args.endpoint, loader.page_size);
    info!(endpoint = fetcher.endpoint(), page_size = loader.page_size, "starting load");
    let mut coordinator = LoadCoordinator::new(
        loader,
        Arc::new(fetcher),
        Arc::new(TokioYield),
        SharedIndex::new(options),
    )
    .with_target(Box::new(renderer.clone()));

    let _progress = coordinator.events().subscribe(|event: &LoadEvent| match event {
        LoadEvent::Progress(p) if p.is_loading => {
            info!(fetched = p.total_fetched, more = p.has_more, "loading");
        }
        LoadEvent::Progress(_) => {}
        LoadEvent::Failed { message } => error!("load failed: {message}"),
        LoadEvent::Finished(state) => info!(?state, "load finished"),
    });

    let cancel = coordinator.start_session();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancelling load");
            cancel.cancel();
        }
    });

    let state = coordinator.run().await;

    if let Some(bounds) = inspect {
        let view = ViewportBounds::new(bounds, args.zoom);
        renderer.lock().surface_mut().set_viewport(Some(view));
        viewport_events.emit(&ViewportChanged(view));
    }
    report(&renderer);
    drop(attached);

    Ok(match state {
        LoadState::Halted => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn report(renderer: &SharedRenderer<RecordingSurface>) {
    let r = renderer.lock();
    let surface = r.surface();
    let mut clusters: Vec<(u32, String, [f64; 2])> = Vec::new();
    let mut points = 0usize;
    let mut features = 0usize;
    for overlay in surface.overlays().values() {
        match overlay {
            Overlay::Cluster {
                position,
                count,
                style,
                ..
            } => clusters.push((*count, style.label.clone(), *position)),
            Overlay::Point { .. } => points += 1,
            Overlay::Feature { .. } => features += 1,
        }
    }
    clusters.sort_by(|a, b| b.0.cmp(&a.0));

    if let Some(view) = surface.viewport() {
        info!(
            zoom = view.zoom,
            west = view.bounds.min[0],
            south = view.bounds.min[1],
            east = view.bounds.max[0],
            north = view.bounds.max[1],
            "viewport"
        );
    }
    info!(
        clusters = clusters.len(),
        points, features, "overlays on map"
    );
    for (count, label, [lon, lat]) in clusters.iter().take(5) {
        info!(count, %label, lon, lat, "cluster");
    }
}

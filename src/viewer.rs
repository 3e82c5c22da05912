//! Glue between gestures, the planner and the decoder.
//!
//! A [`Viewer`] owns the gesture state and the planner for one container
//! and shares a [`SamplingDecoder`] with its worker thread. After every
//! input it re-plans the tiles; [`Viewer::frame`] snapshots what a
//! compositor should draw.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ViewerConfig;
use crate::decoder::{Bitmap, Rotation, SamplingDecoder, SamplingDecoderBuilder, TileDraw};
use crate::error::Result;
use crate::viewport::{Offset, PlanOutcome, Size, ViewportPlanner};
use crate::zoomable::{GestureEvent, GestureResponse, ZoomableViewState};

/// Everything needed to paint one frame.
///
/// Tiles are placed in real (zoomed) pixel space with the origin at the
/// top-left of the content; `placeholder` stretches over the whole real
/// size underneath them.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub container_size: Size,
    pub display_size: Size,
    pub real_size: Size,
    pub scale: f64,
    pub offset: Offset,
    pub rotation: f64,
    /// Background bitmap, or the thumbnail until the background is ready.
    pub placeholder: Option<Arc<Bitmap>>,
    pub tiles: Vec<TileDraw>,
    pub tiling: bool,
}

pub struct Viewer {
    decoder: Arc<SamplingDecoder>,
    state: ZoomableViewState,
    planner: ViewportPlanner,
    last_outcome: Option<PlanOutcome>,
}

impl Viewer {
    /// Wrap an already opened decoder and start its worker.
    pub fn new(decoder: Arc<SamplingDecoder>, container: Size, config: ViewerConfig) -> Result<Self> {
        decoder.start_render_queue()?;

        let mut state = ZoomableViewState::new(decoder.intrinsic_size(), config);
        state.set_container_size(container);
        let planner = ViewportPlanner::new(state.display_size());

        Ok(Self {
            decoder,
            state,
            planner,
            last_outcome: None,
        })
    }

    /// Open an image file. Without an explicit rotation the EXIF orientation
    /// is used.
    pub fn open(
        path: &Path,
        container: Size,
        config: ViewerConfig,
        rotation: Option<Rotation>,
    ) -> Result<Self> {
        let mut builder = SamplingDecoderBuilder::new().thumbnail_width(config.thumbnail_width);
        if let Some(rotation) = rotation {
            builder = builder.rotation(rotation);
        }
        let decoder = builder.build_from_path(path)?;
        info!(
            path = %path.display(),
            width = decoder.decoder_width(),
            height = decoder.decoder_height(),
            rotation = decoder.rotation().degrees(),
            "Opened image"
        );
        Self::new(Arc::new(decoder), container, config)
    }

    pub fn decoder(&self) -> &Arc<SamplingDecoder> {
        &self.decoder
    }

    pub fn state(&self) -> &ZoomableViewState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ZoomableViewState {
        &mut self.state
    }

    pub fn planner(&self) -> &ViewportPlanner {
        &self.planner
    }

    pub fn last_outcome(&self) -> Option<&PlanOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn set_container_size(&mut self, size: Size) {
        self.state.set_container_size(size);
        self.planner.set_canvas_size(self.state.display_size());
        self.update();
    }

    /// Re-plan tiles for the current transform.
    pub fn update(&mut self) -> PlanOutcome {
        let viewport = self.state.viewport();
        let outcome = self.planner.plan(&self.decoder, &viewport);
        if !outcome.skipped {
            debug!(
                scale = viewport.scale,
                divisor = outcome.divisor,
                tiling = outcome.tiling,
                inserted = outcome.inserted,
                removed = outcome.removed,
                "Viewport planned"
            );
        }
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    pub fn on_gesture_start(&mut self) {
        self.state.on_gesture_start();
    }

    pub fn on_gesture(&mut self, event: &GestureEvent) -> GestureResponse {
        let response = self.state.on_gesture(event);
        self.update();
        response
    }

    pub fn on_gesture_end(&mut self) {
        self.state.on_gesture_end();
        self.update();
    }

    pub fn toggle_scale(&mut self, point: Offset) -> bool {
        let toggled = self.state.toggle_scale(point);
        self.update();
        toggled
    }

    /// Re-plan every frame until the running animations finish.
    pub async fn run_animations(&mut self) {
        let frame = self.state.config().frame_interval;
        while self.state.is_running() {
            self.update();
            tokio::time::sleep(frame).await;
        }
        self.state.finish_animations().await;
        self.update();
    }

    /// Snapshot for the compositor.
    pub fn frame(&self) -> RenderFrame {
        let tiling = self.planner.is_tiling();
        RenderFrame {
            container_size: self.state.container_size(),
            display_size: self.state.display_size(),
            real_size: self.state.real_size(),
            scale: self.state.scale(),
            offset: self.state.offset(),
            rotation: self.state.rotation(),
            placeholder: self.decoder.background().or_else(|| self.decoder.thumbnail()),
            tiles: if tiling {
                self.decoder.visible_tiles()
            } else {
                Vec::new()
            },
            tiling,
        }
    }

    /// Release the decoder; the viewer stops producing tiles.
    pub fn release(&self) {
        self.decoder.release();
    }
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("state", &self.state)
            .field("planner", &self.planner)
            .finish()
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use tileview::{GestureEvent, Offset, PlanOutcome, Rotation, Size, Viewer, ViewerConfig};

/// How long to wait for the worker to drain the queue at the end.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Events per scripted gesture.
const GESTURE_STEPS: u32 = 12;

/// Open an image, replay a pinch and drag over it, and report the tiles
/// the planner asked for.
#[derive(Parser, Debug)]
#[command(name = "tileview", version, about)]
struct Args {
    /// Image file to open.
    image: PathBuf,

    /// Container size in pixels.
    #[arg(long, default_value = "1080x1920", value_parser = parse_size)]
    container: Size,

    /// Explicit rotation in degrees (0, 90, 180 or 270). Defaults to 0.
    #[arg(long, conflicts_with = "exif")]
    rotation: Option<i32>,

    /// Take the rotation from the EXIF orientation instead.
    #[arg(long)]
    exif: bool,

    /// Total zoom factor of the scripted pinch.
    #[arg(long, default_value_t = 2.5)]
    zoom: f64,

    /// Drag distance after the pinch, as DX,DY.
    #[arg(long, value_parser = parse_pan, allow_hyphen_values = true)]
    pan: Option<Offset>,

    /// Write every decoded tile and the background into this directory.
    #[arg(long)]
    dump_tiles: Option<PathBuf>,
}

fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {s:?}"))?;
    let width: f64 = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let height: f64 = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    if width <= 0.0 || height <= 0.0 {
        return Err(format!("container must be positive, got {s:?}"));
    }
    Ok(Size::new(width, height))
}

fn parse_pan(s: &str) -> Result<Offset, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected DX,DY, got {s:?}"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad dx: {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad dy: {e}"))?;
    Ok(Offset::new(x, y))
}

/// Rotation to open the image with; `None` defers to EXIF.
fn requested_rotation(args: &Args) -> anyhow::Result<Option<Rotation>> {
    if args.exif {
        return Ok(None);
    }
    let degrees = args.rotation.unwrap_or(0);
    let rotation = Rotation::from_degrees(degrees).context("invalid --rotation")?;
    Ok(Some(rotation))
}

fn log_outcome(step: &str, index: u32, outcome: &PlanOutcome) {
    if outcome.skipped {
        return;
    }
    info!(
        step,
        index,
        tiling = outcome.tiling,
        divisor = outcome.divisor,
        sample = outcome.in_sample_size,
        background_sample = outcome.background_sample,
        in_bound = outcome.in_bound,
        inserted = outcome.inserted,
        removed = outcome.removed,
        "Planner outcome"
    );
}

async fn pinch(viewer: &mut Viewer, zoom: f64, timestamp: &mut u64) {
    let container = viewer.state().container_size();
    let centre = Offset::new(container.width / 2.0, container.height / 2.0);
    // Keep the fingers far enough apart for the zoom to register
    let spread = (viewer.state().config().min_finger_distance + 100.0) / 2.0;
    let a = Offset::new(centre.x - spread, centre.y - spread);
    let b = Offset::new(centre.x + spread, centre.y + spread);
    let step_zoom = zoom.powf(1.0 / GESTURE_STEPS as f64);

    viewer.on_gesture_start();
    for i in 0..GESTURE_STEPS {
        *timestamp += 16;
        viewer.on_gesture(&GestureEvent::pinch(a, b, step_zoom, *timestamp));
        if let Some(outcome) = viewer.last_outcome() {
            log_outcome("pinch", i, outcome);
        }
    }
    viewer.on_gesture_end();
    viewer.run_animations().await;
    if let Some(outcome) = viewer.last_outcome() {
        log_outcome("pinch-settled", GESTURE_STEPS, outcome);
    }
}

async fn drag(viewer: &mut Viewer, pan: Offset, timestamp: &mut u64) {
    let container = viewer.state().container_size();
    let mut position = Offset::new(container.width / 2.0, container.height / 2.0);
    let step = Offset::new(pan.x / GESTURE_STEPS as f64, pan.y / GESTURE_STEPS as f64);

    viewer.on_gesture_start();
    for i in 0..GESTURE_STEPS {
        *timestamp += 16;
        position = Offset::new(position.x + step.x, position.y + step.y);
        let response = viewer.on_gesture(&GestureEvent::drag(position, step, *timestamp));
        if response.reach_side {
            info!(index = i, "Drag reached the content edge");
        }
        if let Some(outcome) = viewer.last_outcome() {
            log_outcome("drag", i, outcome);
        }
    }
    viewer.on_gesture_end();
    viewer.run_animations().await;
    if let Some(outcome) = viewer.last_outcome() {
        log_outcome("drag-settled", GESTURE_STEPS, outcome);
    }
}

fn dump_tiles(viewer: &Viewer, dir: &Path) -> anyhow::Result<usize> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let frame = viewer.frame();
    if let Some(placeholder) = &frame.placeholder {
        let path = dir.join("background.png");
        placeholder
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    for tile in &frame.tiles {
        let path = dir.join(format!("tile_r{}_c{}.png", tile.row, tile.column));
        tile.bitmap
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(frame.tiles.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("tileview=info".parse()?),
        )
        .init();

    let args = Args::parse();
    if !args.zoom.is_finite() || args.zoom <= 0.0 {
        bail!("--zoom must be a positive number, got {}", args.zoom);
    }

    let rotation = requested_rotation(&args)?;
    let config = ViewerConfig::from_env();

    let mut viewer = Viewer::open(&args.image, args.container, config, rotation)
        .with_context(|| format!("failed to open {}", args.image.display()))?;
    log_outcome("initial", 0, &viewer.update());

    let mut timestamp = 0;
    pinch(&mut viewer, args.zoom, &mut timestamp).await;
    if let Some(pan) = args.pan {
        drag(&mut viewer, pan, &mut timestamp).await;
    }

    let decoder = Arc::clone(viewer.decoder());
    let drained = tokio::task::spawn_blocking(move || decoder.wait_idle(DRAIN_TIMEOUT))
        .await
        .context("decode wait panicked")?;
    if !drained {
        warn!(pending = viewer.decoder().pending_jobs(), "Decode queue did not drain in time");
    }

    let frame = viewer.frame();
    info!(
        scale = frame.scale,
        offset_x = frame.offset.x,
        offset_y = frame.offset.y,
        real_width = frame.real_size.width,
        real_height = frame.real_size.height,
        tiling = frame.tiling,
        tiles = frame.tiles.len(),
        "Session finished"
    );

    if let Some(dir) = &args.dump_tiles {
        let written = dump_tiles(&viewer, dir)?;
        info!(dir = %dir.display(), tiles = written, "Tiles written");
    }

    viewer.release();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("800x600").unwrap(), Size::new(800.0, 600.0));
        assert!(parse_size("800").is_err());
        assert!(parse_size("0x600").is_err());
    }

    #[test]
    fn test_parse_pan_accepts_negative() {
        assert_eq!(parse_pan("-120, 40").unwrap(), Offset::new(-120.0, 40.0));
        assert!(parse_pan("12").is_err());
    }

    #[test]
    fn test_args_rotation_conflicts_with_exif() {
        let result = Args::try_parse_from(["tileview", "a.png", "--rotation", "90", "--exif"]);
        assert!(result.is_err());
        let args = Args::try_parse_from(["tileview", "a.png", "--pan", "-10,5"]).unwrap();
        assert_eq!(args.pan, Some(Offset::new(-10.0, 5.0)));
        assert_eq!(args.container, Size::new(1080.0, 1920.0));
    }

    #[test]
    fn test_rotation_flags() {
        let args = Args::try_parse_from(["tileview", "a.png"]).unwrap();
        assert_eq!(requested_rotation(&args).unwrap(), Some(Rotation::Rotation0));

        let args = Args::try_parse_from(["tileview", "a.png", "--rotation", "270"]).unwrap();
        assert_eq!(requested_rotation(&args).unwrap(), Some(Rotation::Rotation270));

        let args = Args::try_parse_from(["tileview", "a.png", "--exif"]).unwrap();
        assert_eq!(requested_rotation(&args).unwrap(), None);

        let args = Args::try_parse_from(["tileview", "a.png", "--rotation", "45"]).unwrap();
        assert!(requested_rotation(&args).is_err());
    }
}

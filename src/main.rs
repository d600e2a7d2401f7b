use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;

use lightscan_lib::config::{self, AppConfig, OverlayConfig};
use lightscan_lib::perception::annotator::{annotate, blank_canvas, encode_png, OverlayFrame};
use lightscan_lib::perception::replay::{load_recording, ReplayCamera, ReplayDetector};
use lightscan_lib::{
    map_to_display_with, DetectionSession, EventEnvelope, LightScanError, LightScanResult,
    NormalizedRect, Rotation, Size, SymbolEvent,
};

#[derive(Debug, Parser)]
#[command(name = "lightscan", version, about = "Dashboard light symbol overlay tools")]
struct Cli {
    /// Path to config.toml; otherwise the usual search locations are tried.
    #[arg(long, global = true, env = "LIGHTSCAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a JSON-lines detection recording through the pipeline and
    /// print every event as one JSON line.
    Replay(ReplayArgs),
    /// Map a single normalised box onto the display and print the pixel rect.
    Map(MapArgs),
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// Recording file (one `{"frame": N, "detections": [...]}` per line).
    recording: PathBuf,
    /// Sensor buffer size, e.g. 640x480.
    #[arg(long, value_parser = parse_dims)]
    buffer: Option<(u32, u32)>,
    /// Display size, e.g. 480x640.
    #[arg(long, value_parser = parse_dims)]
    display: Option<(u32, u32)>,
    /// Override detection.confidence_threshold.
    #[arg(long)]
    threshold: Option<f32>,
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Keep the session alive this long after the last frame so pending
    /// confirmations can fire. Defaults to the confirmation delay.
    #[arg(long)]
    linger_ms: Option<u64>,
    /// Write a PNG preview for every overlay event into this directory.
    #[arg(long)]
    preview_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MapArgs {
    /// Normalised box as x,y,width,height (origin bottom-left).
    #[arg(long = "box", value_parser = parse_box)]
    bbox: NormalizedRect,
    #[arg(long, value_parser = parse_dims)]
    buffer: Option<(u32, u32)>,
    #[arg(long, value_parser = parse_dims)]
    display: Option<(u32, u32)>,
    /// Skip the 90° rotation (buffer and display share an orientation).
    #[arg(long)]
    no_rotation: bool,
}

fn parse_dims(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("width: {e}"))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("height: {e}"))?;
    Ok((w, h))
}

fn parse_box(s: &str) -> Result<NormalizedRect, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, w, h] => NormalizedRect::new(*x, *y, *w, *h).map_err(|e| e.to_string()),
        _ => Err(format!("expected x,y,width,height, got '{s}'")),
    }
}

fn load_app_config(path: Option<&Path>) -> LightScanResult<AppConfig> {
    let loaded = match path {
        Some(p) => config::load_config_from(p),
        None => config::load_config(),
    };
    match loaded {
        Err(LightScanError::ConfigNotFound) => {
            tracing::warn!("no config.toml found, using defaults");
            Ok(AppConfig::default())
        }
        other => other,
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
    lightscan_lib::init_tracing();

    let cli = Cli::parse();
    let result = match load_app_config(cli.config.as_deref()) {
        Ok(cfg) => match cli.command {
            Command::Replay(args) => replay(cfg, args).await,
            Command::Map(args) => map(cfg, args),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "lightscan failed");
        std::process::exit(1);
    }
}

fn map(mut cfg: AppConfig, args: MapArgs) -> LightScanResult<()> {
    if let Some((w, h)) = args.buffer {
        cfg.camera.buffer_width = w;
        cfg.camera.buffer_height = h;
    }
    if let Some((w, h)) = args.display {
        cfg.display.width = w as f64;
        cfg.display.height = h as f64;
    }
    let rotation = if args.no_rotation {
        Rotation::None
    } else {
        cfg.camera.rotation
    };
    let rect = map_to_display_with(&args.bbox, cfg.buffer_size(), cfg.display.size(), rotation);
    println!("{}", serde_json::to_string(&rect)?);
    Ok(())
}

async fn replay(mut cfg: AppConfig, args: ReplayArgs) -> LightScanResult<()> {
    if let Some((w, h)) = args.buffer {
        cfg.camera.buffer_width = w;
        cfg.camera.buffer_height = h;
    }
    if let Some((w, h)) = args.display {
        cfg.display.width = w as f64;
        cfg.display.height = h as f64;
    }
    if let Some(t) = args.threshold {
        cfg.detection.confidence_threshold = t;
    }
    cfg.validate()?;

    if let Some(dir) = &args.preview_dir {
        std::fs::create_dir_all(dir)?;
    }

    let recording = load_recording(&args.recording)?;
    let detector = Arc::new(ReplayDetector::new(&recording));
    let camera = ReplayCamera::new(
        &recording,
        cfg.camera.buffer_width,
        cfg.camera.buffer_height,
        args.fps,
    );
    let done = camera.completion();
    let linger = Duration::from_millis(args.linger_ms.unwrap_or(cfg.detection.confirm_delay_ms));

    let mut session = DetectionSession::new(cfg, Box::new(camera), detector);
    let printer = tokio::spawn(print_events(
        session.subscribe(),
        session.config().display.size(),
        session.config().overlay.clone(),
        args.preview_dir,
    ));

    session.start().await?;

    tokio::select! {
        _ = async {
            done.notified().await;
            tokio::time::sleep(linger).await;
        } => {
            tracing::info!("replay finished");
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "ctrl-c handler failed");
            }
            tracing::info!("interrupted, stopping session");
        }
    }

    session.stop().await;
    // Dropping the session closes the event channel and ends the printer.
    drop(session);
    match printer.await {
        Ok(res) => res,
        Err(e) => Err(LightScanError::Replay(format!("event printer: {e}"))),
    }
}

async fn print_events(
    mut rx: broadcast::Receiver<EventEnvelope>,
    display: Size,
    style: OverlayConfig,
    preview_dir: Option<PathBuf>,
) -> LightScanResult<()> {
    loop {
        let envelope = match rx.recv().await {
            Ok(env) => env,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "event printer fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        println!("{}", serde_json::to_string(&envelope)?);

        if let (Some(dir), SymbolEvent::Overlay { frame_id, rect, .. }) = (&preview_dir, &envelope.event) {
            let mut canvas = blank_canvas(display);
            let overlay = OverlayFrame::new(display, &style).with_detection(*rect);
            annotate(&mut canvas, &overlay, &style);
            let path = dir.join(format!("frame_{frame_id:06}.png"));
            std::fs::write(&path, encode_png(&canvas)?)?;
            tracing::debug!(path = %path.display(), "preview written");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dimensions() {
        assert_eq!(parse_dims("640x480"), Ok((640, 480)));
        assert_eq!(parse_dims("1920X1080"), Ok((1920, 1080)));
        assert!(parse_dims("640").is_err());
        assert!(parse_dims("ax480").is_err());
    }

    #[test]
    fn parses_boxes() {
        let b = parse_box("0.4, 0.4, 0.2, 0.2").unwrap();
        assert_eq!(b, NormalizedRect::new(0.4, 0.4, 0.2, 0.2).unwrap());
        assert!(parse_box("0.4,0.4,0.2").is_err());
        assert!(parse_box("0.9,0.4,0.2,0.2").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use flipbook::{
    AnimatedImage, Bitmap, ContainerFormat, DriveMode, PlaybackConfig, PublishedFrame,
    SchedulerState, Stopwatch,
};

const TICK: Duration = Duration::from_millis(16);

struct Args {
    path: PathBuf,
    seconds: f64,
    out: Option<PathBuf>,
    background: bool,
}

fn parse_args() -> Result<Args> {
    let mut path = None;
    let mut seconds = 5.0;
    let mut out = None;
    let mut background = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seconds" => {
                let value = args.next().context("--seconds needs a value")?;
                seconds = value.parse().context("--seconds must be a number")?;
            }
            "--out" => out = Some(PathBuf::from(args.next().context("--out needs a directory")?)),
            "--background" => background = true,
            _ if path.is_none() => path = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument: {arg}"),
        }
    }

    let Some(path) = path else {
        bail!("usage: flipbook <file.gif|file.png> [--seconds N] [--out DIR] [--background]");
    };
    Ok(Args {
        path,
        seconds,
        out,
        background,
    })
}

/// Format detection is up to the host; the extension is enough here.
fn format_for(path: &Path) -> Result<ContainerFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("gif") => Ok(ContainerFormat::Gif),
        Some("png" | "apng") => Ok(ContainerFormat::Apng),
        _ => bail!("can't tell the format of {}", path.display()),
    }
}

/// Host-side surface that publications are blitted into.
struct Surface {
    canvas: Bitmap,
    out: Option<PathBuf>,
    written: usize,
}

impl Surface {
    fn present(&mut self, frame: &PublishedFrame) -> Result<()> {
        self.canvas.blit_source(&frame.bitmap, frame.placement());
        log::debug!(
            "frame {} at {:?} ({}x{})",
            frame.frame_index,
            frame.origin,
            frame.bitmap.width(),
            frame.bitmap.height()
        );

        let Some(dir) = &self.out else {
            self.written += 1;
            return Ok(());
        };
        let (w, h) = self.canvas.size();
        let image = image::RgbaImage::from_raw(w, h, self.canvas.to_rgba())
            .context("canvas buffer size mismatch")?;
        let path = dir.join(format!("frame_{:04}.png", self.written));
        image
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        self.written += 1;
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let format = format_for(&args.path)?;

    let mut config = PlaybackConfig::load();
    if args.background {
        config.drive = DriveMode::Background;
    }

    let path = args.path.clone();
    let mut image = AnimatedImage::open(format, || File::open(&path).map(BufReader::new), &config)
        .with_context(|| format!("opening {}", args.path.display()))?;

    if let Some(dir) = &args.out {
        std::fs::create_dir_all(dir)?;
    }
    let (w, h) = image.natural_size();
    let mut surface = Surface {
        canvas: Bitmap::new(w, h),
        out: args.out.clone(),
        written: 0,
    };
    log::info!(
        "{}: {}x{}, {} frame(s)",
        args.path.display(),
        w,
        h,
        image.frame_count()
    );

    let limit = Duration::from_secs_f64(args.seconds.max(0.0));
    if image.is_static() {
        if let Some(frame) = image.composited_frame(Duration::ZERO) {
            surface.present(&frame)?;
        }
    } else if let Some(events) = image.frame_events().cloned() {
        if let Some(frame) = image.composited_frame(Duration::ZERO) {
            surface.present(&frame)?;
        }
        let watch = Stopwatch::started();
        while watch.elapsed() < limit {
            if events.recv_timeout(TICK).is_ok() {
                if let Some(frame) = image.composited_frame(watch.elapsed()) {
                    surface.present(&frame)?;
                }
            }
            if image
                .playback_state()
                .is_some_and(|s| s.state == SchedulerState::Completed)
            {
                break;
            }
        }
    } else {
        let watch = Stopwatch::started();
        let mut last: Option<PublishedFrame> = None;
        while watch.elapsed() < limit {
            if let Some(frame) = image.composited_frame(watch.elapsed()) {
                if !last.as_ref().is_some_and(|l| l.same_publication(&frame)) {
                    surface.present(&frame)?;
                    last = Some(frame);
                }
            }
            if image
                .playback_state()
                .is_some_and(|s| s.state == SchedulerState::Completed)
            {
                break;
            }
            thread::sleep(TICK);
        }
    }

    image.dispose();
    log::info!("Presented {} frame(s)", surface.written);
    Ok(())
}

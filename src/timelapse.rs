//! Timed capture loop.
//!
//! Ticks sit at `start + k * interval`. Before every tick the elapsed time is
//! compared against the total duration; once it is reached the run ends, so
//! slow captures can yield fewer frames than `duration / interval`. A capture
//! that overruns its slot is followed immediately by the next one, and ticks
//! that passed during the overrun are dropped rather than replayed.

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::{
    data_saver::{CSVFile, CaptureRecord, DataFile, SessionManifest},
    duration::{format_duration, DurationError},
    signal,
    stage::{Illumination, Position},
    usb_camera::FrameCapture,
    Error, Result,
};

/// Used for the run directory and for every frame file name.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub const CAPTURE_LOG: &str = "captures.csv";
pub const MANIFEST: &str = "session.json";

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Wall clock plus the ability to wait on it.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;

    fn sleep(&mut self, duration: Duration);

    /// Polled between captures, `true` ends the run early.
    fn interrupted(&self) -> bool {
        false
    }
}

/// Real time. Sleeps wake up early on Ctrl-C once
/// [`signal::install_interrupt_handler`] ran.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !signal::interrupted() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn interrupted(&self) -> bool {
        signal::interrupted()
    }
}

#[derive(Debug, Clone)]
pub struct TimelapseSettings {
    duration: Duration,
    interval: Duration,
    led_level: f32,
    start_position: Option<Position>,
}

impl TimelapseSettings {
    pub fn new(duration: Duration, interval: Duration, led_level: f32) -> Result<Self> {
        if duration.is_zero() || interval.is_zero() {
            return Err(DurationError::Zero.into());
        }
        if !(0.0..=1.0).contains(&led_level) {
            return Err(Error::Controller(format!(
                "led level {led_level} outside 0.0..=1.0"
            )));
        }
        Ok(TimelapseSettings {
            duration,
            interval,
            led_level,
            start_position: None,
        })
    }

    /// Stage position recorded in the session manifest.
    pub fn with_start_position(mut self, position: Position) -> Self {
        self.start_position = Some(position);
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Frames a run would take if captures were instantaneous.
    pub fn nominal_frames(&self) -> u64 {
        let d = self.duration.as_nanos();
        let i = self.interval.as_nanos();
        d.div_ceil(i) as u64
    }

    fn tick_offset(&self, tick: u64) -> Duration {
        self.interval
            .saturating_mul(u32::try_from(tick).unwrap_or(u32::MAX))
    }

    fn tick_at(&self, elapsed: Duration) -> u64 {
        (elapsed.as_nanos() / self.interval.as_nanos()) as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelapseReport {
    pub dir: PathBuf,
    pub frames: u64,
    pub elapsed: Duration,
    pub interrupted: bool,
}

/// `<root>/<start timestamp>`. Fixed for the whole run.
pub fn run_dir(root: &Path, start: &DateTime<Local>) -> PathBuf {
    root.join(start.format(TIMESTAMP_FORMAT).to_string())
}

/// `<timestamp>.jpg`, or `<timestamp>_<n>.jpg` when a frame of the same second
/// already exists.
pub fn frame_path(dir: &Path, at: &DateTime<Local>) -> PathBuf {
    let stem = at.format(TIMESTAMP_FORMAT).to_string();
    let mut path = dir.join(format!("{stem}.jpg"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{stem}_{n}.jpg"));
        n += 1;
    }
    path
}

fn since(start: &DateTime<Local>, now: &DateTime<Local>) -> Duration {
    (*now - *start).to_std().unwrap_or(Duration::ZERO)
}

/// LED on, capture, LED off. The LED is switched off even when the capture
/// failed; the capture error wins.
fn expose<L: Illumination, C: FrameCapture>(
    led: &mut L,
    camera: &mut C,
    level: f32,
    path: &Path,
) -> Result<()> {
    led.set_led(level)?;
    let captured = camera.capture_to(path);
    let off = led.led_off();
    captured?;
    off
}

/// Run the capture loop, creating the run directory under `root`.
pub fn run<L: Illumination, C: FrameCapture, K: Clock>(
    settings: &TimelapseSettings,
    root: &Path,
    led: &mut L,
    camera: &mut C,
    clock: &mut K,
) -> Result<TimelapseReport> {
    let start = clock.now();
    let dir = run_dir(root, &start);
    fs::create_dir_all(&dir)?;
    info!(
        "timelapse for {} every {} into {}",
        format_duration(settings.duration),
        format_duration(settings.interval),
        dir.display()
    );

    SessionManifest::new(
        start,
        settings.duration,
        settings.interval,
        settings.led_level,
        settings.start_position,
    )
    .write(&dir.join(MANIFEST))?;
    let mut log = CSVFile::<CaptureRecord>::new();
    log.start_new(&dir.join(CAPTURE_LOG))?;

    let mut tick = 0;
    let mut frames = 0;
    let mut interrupted = false;
    loop {
        let now = clock.now();
        let elapsed = since(&start, &now);
        if elapsed >= settings.duration {
            break;
        }
        if clock.interrupted() {
            interrupted = true;
            break;
        }

        let path = frame_path(&dir, &now);
        if let Err(e) = expose(led, camera, settings.led_level, &path) {
            if clock.interrupted() || e.is_interrupted() {
                warn!("capture {frames} cut short by Ctrl-C: {e}");
                if let Err(e) = led.led_off() {
                    warn!("could not switch the LED off: {e}");
                }
                interrupted = true;
                break;
            }
            warn!("capture {frames} failed, stopping: {e}");
            if let Err(flush) = log.end() {
                warn!("could not flush {CAPTURE_LOG}: {flush}");
            }
            return Err(e);
        }
        log.record(&CaptureRecord {
            index: frames,
            tick,
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })?;
        frames += 1;
        info!("captured {}", path.display());

        let next = tick + 1;
        let after = since(&start, &clock.now());
        let target = settings.tick_offset(next);
        if after < target {
            // the run ends at `duration` even when the next tick lies beyond it
            clock.sleep(target.min(settings.duration).saturating_sub(after));
            tick = next;
        } else {
            tick = next.max(settings.tick_at(after));
            warn!("capture overran its slot, continuing with tick {tick}");
        }
    }
    log.end()?;

    let elapsed = since(&start, &clock.now());
    if interrupted {
        info!("timelapse interrupted after {frames} frames");
    } else {
        info!("timelapse complete, {frames} frames");
    }
    Ok(TimelapseReport {
        dir,
        frames,
        elapsed,
        interrupted,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, h, m, s).single().unwrap()
    }

    #[test]
    fn settings_reject_zero() {
        let s = Duration::from_secs;
        assert!(TimelapseSettings::new(s(0), s(10), 0.3).is_err());
        assert!(TimelapseSettings::new(s(60), s(0), 0.3).is_err());
        assert!(TimelapseSettings::new(s(60), s(10), 1.3).is_err());
        assert!(TimelapseSettings::new(s(60), s(10), 0.3).is_ok());
    }

    #[test]
    fn nominal_frame_count() {
        let s = Duration::from_secs;
        let nominal = |d, i| TimelapseSettings::new(s(d), s(i), 0.0).unwrap().nominal_frames();
        assert_eq!(nominal(60, 10), 6);
        assert_eq!(nominal(61, 10), 7);
        assert_eq!(nominal(5, 10), 1);
    }

    #[test]
    fn names_use_timestamp() {
        let root = Path::new("/data");
        assert_eq!(
            run_dir(root, &at(14, 5, 9)),
            PathBuf::from("/data/20240309_140509")
        );
    }

    #[test]
    fn same_second_frames_get_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let t = at(8, 0, 0);
        let first = frame_path(dir.path(), &t);
        assert_eq!(first.file_name().unwrap(), "20240309_080000.jpg");
        fs::write(&first, b"x").unwrap();
        let second = frame_path(dir.path(), &t);
        assert_eq!(second.file_name().unwrap(), "20240309_080000_1.jpg");
        fs::write(&second, b"x").unwrap();
        assert_eq!(
            frame_path(dir.path(), &t).file_name().unwrap(),
            "20240309_080000_2.jpg"
        );
    }
}

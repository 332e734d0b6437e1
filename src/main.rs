use std::{
    io::{self, stdin},
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use clap::Parser;
use flexure::{
    duration::{format_duration, parse_duration},
    jog::{JogSummary, DEFAULT_STEP, KEY_HELP},
    preview::{Preview, DEFAULT_ADDR},
    sangaboard::DEFAULT_BAUD,
    signal,
    terminal::{prompt_duration, stdin_is_tty, LineKeys, RawTerminal},
    timelapse, Camera, Error, JogController, Result, Sangaboard, Stage, SystemClock,
    TimelapseSettings,
};
use tracing::{error, info, warn, Level};

/// Position an OpenFlexure microscope stage from the keyboard, then record a
/// timelapse into a timestamped directory.
#[derive(Parser, Debug)]
struct Args {
    /// Serial device of the Sangaboard
    #[arg(long, default_value = "/dev/ttyACM0")]
    serial: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Longest a single stage move may take
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    move_timeout: Duration,

    /// V4L2 camera index, /dev/video<N>
    #[arg(long, default_value_t = 0)]
    camera: usize,

    /// V4L2 device path, overrides --camera
    #[arg(long)]
    camera_path: Option<String>,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Frames dropped before each still
    #[arg(long, default_value_t = 2)]
    warmup: usize,

    /// Motor steps per key press
    #[arg(long, default_value_t = DEFAULT_STEP)]
    step: i64,

    /// LED level while a frame is exposed, 0.0 to 1.0
    #[arg(long, default_value_t = 0.33)]
    led: f32,

    /// Directory the run directory is created in
    #[arg(long, default_value = ".")]
    output: PathBuf,

    #[arg(long, default_value = DEFAULT_ADDR)]
    preview: SocketAddr,

    #[arg(long)]
    no_preview: bool,

    /// Total timelapse length, e.g. "1d 4h 30m". Prompted for when missing.
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Time between frames, e.g. "5m". Prompted for when missing.
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Read jog keys as lines of text even on a terminal
    #[arg(long)]
    line_input: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Interrupted) => {
            println!("Program interrupted by user.");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn open_camera(args: &Args) -> Result<Camera> {
    let camera = match &args.camera_path {
        Some(path) => Camera::new_with_path(path, args.width, args.height, args.fps)?,
        None => Camera::new(args.camera, args.width, args.height, args.fps)?,
    };
    Ok(camera.with_warmup(args.warmup))
}

fn position(args: &Args, board: &mut Sangaboard) -> Result<JogSummary> {
    println!();
    println!("Interactive motor control:");
    println!("{KEY_HELP}");
    println!();
    let mut jog = JogController::new(args.step);
    let mut out = io::stdout();
    if args.line_input || !stdin_is_tty() {
        let mut keys = LineKeys::new(stdin().lock());
        jog.run(&mut keys, board, &mut out)
    } else {
        let mut keys = RawTerminal::enable()?;
        jog.run(&mut keys, board, &mut out)
    }
}

fn run(args: Args) -> Result<()> {
    let camera = open_camera(&args)?;
    let mut board = Sangaboard::open(&args.serial, args.baud)?.with_move_timeout(args.move_timeout);

    let (mut camera, jog) = if args.no_preview {
        let jog = position(&args, &mut board);
        (camera, jog)
    } else {
        let preview = Preview::start(camera, args.preview)?;
        println!("Camera preview at http://{}/", preview.addr());
        let jog = position(&args, &mut board);
        (preview.stop()?, jog)
    };
    let jog = jog?;
    info!("positioning done, {} moves", jog.moves);

    let mut input = stdin().lock();
    let mut out = io::stdout();
    let duration = match args.duration {
        Some(d) => d,
        None => prompt_duration(
            &mut input,
            &mut out,
            "Enter timelapse duration (e.g. '1d 4h 30m', '30m'): ",
        )?,
    };
    let interval = match args.interval {
        Some(i) => i,
        None => prompt_duration(
            &mut input,
            &mut out,
            "Enter capture interval (e.g. '5s', '1m'): ",
        )?,
    };
    drop(input);

    let start_position = board.position()?;
    let settings =
        TimelapseSettings::new(duration, interval, args.led)?.with_start_position(start_position);
    if interval > duration {
        warn!("interval is longer than the duration, only one frame will be taken");
    }
    println!(
        "Starting timelapse: {} every {} (up to {} frames). Ctrl-C stops early.",
        format_duration(duration),
        format_duration(interval),
        settings.nominal_frames()
    );

    signal::install_interrupt_handler();
    let report = timelapse::run(
        &settings,
        &args.output,
        &mut board,
        &mut camera,
        &mut SystemClock,
    )?;

    println!("Images saved to {}", report.dir.display());
    println!(
        "{} frames in {}",
        report.frames,
        format_duration(report.elapsed)
    );
    if report.interrupted {
        println!("Timelapse interrupted by user.");
    } else {
        println!("Timelapse complete.");
    }
    Ok(())
}

use std::{path::PathBuf, thread::sleep, time::Duration};

use clap::Parser;
use flexure::{sangaboard::DEFAULT_BAUD, Illumination, Result, Sangaboard, Stage};

/// Check the Sangaboard connection: firmware, stage position, LED.
#[derive(Parser, Debug)]
struct Args {
    #[arg(default_value = "/dev/ttyACM0")]
    serial: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Switch the LED on at this level for one second
    #[arg(long)]
    blink: Option<f32>,

    /// De-energise the motors afterwards
    #[arg(long)]
    release: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
    let args = Args::parse();

    let mut board = Sangaboard::open(&args.serial, args.baud)?;
    println!("firmware: {}", board.firmware());
    let p = board.position()?;
    println!("position: {} {} {}", p.x, p.y, p.z);

    if let Some(level) = args.blink {
        board.set_led(level)?;
        sleep(Duration::from_secs(1));
        board.led_off()?;
    }
    if args.release {
        board.release_motors()?;
        println!("motors released");
    }
    Ok(())
}

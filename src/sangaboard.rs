//! Sangaboard motor and illumination controller.
//!
//! The board speaks a line based text protocol over a serial port: every
//! command is answered by exactly one line. Moves are only answered once the
//! motors have stopped, so the reply doubles as completion signal.

use std::{
    path::Path,
    time::{Duration, Instant},
};

use rppal::uart::{Parity, Queue, Uart};
use tracing::{debug, info, warn};

use crate::{
    stage::{Illumination, Position, Stage},
    Error, Result,
};

pub const DEFAULT_BAUD: u32 = 115_200;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte transport under the Sangaboard protocol.
pub trait SerialLink {
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever is available. `Ok(0)` means nothing arrived within the
    /// link's poll timeout.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Drop anything left in the input queue.
    fn discard_input(&mut self) -> Result<()>;
}

impl SerialLink for Uart {
    fn send(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            data = &data[n..];
        }
        self.drain()?;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.read(buf)?)
    }

    fn discard_input(&mut self) -> Result<()> {
        Ok(self.flush(Queue::Input)?)
    }
}

pub struct Sangaboard<L: SerialLink = Uart> {
    link: L,
    pending: Vec<u8>,
    move_timeout: Duration,
    led_level: f32,
    firmware: String,
}

impl Sangaboard<Uart> {
    /// Open the board on a serial device, e.g. `/dev/ttyACM0`.
    pub fn open<P: AsRef<Path>>(path: P, baud: u32) -> Result<Self> {
        let path = path.as_ref();
        let mut uart = Uart::with_path(path, baud, Parity::None, 8, 1)?;
        uart.set_read_mode(0, POLL_TIMEOUT)?;
        uart.set_write_mode(true)?;
        info!("opened sangaboard serial port {}", path.display());
        Self::new(uart)
    }
}

impl<L: SerialLink> Sangaboard<L> {
    pub fn new(mut link: L) -> Result<Self> {
        link.discard_input()?;
        let mut board = Sangaboard {
            link,
            pending: vec![],
            move_timeout: Duration::from_secs(60),
            led_level: 0.0,
            firmware: String::new(),
        };
        let version = board.query("version", QUERY_TIMEOUT)?;
        if !version.contains("Sangaboard") {
            return Err(Error::Controller(format!(
                "unexpected version banner '{version}'"
            )));
        }
        info!("connected to {version}");
        board.firmware = version;
        Ok(board)
    }

    /// Upper bound on how long a single move may take before it is reported
    /// as a controller failure.
    pub fn with_move_timeout(mut self, timeout: Duration) -> Self {
        self.move_timeout = timeout;
        self
    }

    pub fn firmware(&self) -> &str {
        &self.firmware
    }

    pub fn led_level(&self) -> f32 {
        self.led_level
    }

    /// De-energise the stepper coils.
    pub fn release_motors(&mut self) -> Result<()> {
        self.query("release", QUERY_TIMEOUT)?;
        Ok(())
    }

    /// Send one command and wait for its reply line.
    pub fn query(&mut self, command: &str, timeout: Duration) -> Result<String> {
        debug!("sangaboard <- {command}");
        self.link.send(format!("{command}\n").as_bytes())?;
        let reply = self.read_line(timeout).ok_or_else(|| {
            Error::Controller(format!("no reply to '{command}' within {timeout:?}"))
        })??;
        debug!("sangaboard -> {reply}");
        if reply.starts_with("ERROR") {
            return Err(Error::Controller(format!("'{command}' failed: {reply}")));
        }
        Ok(reply)
    }

    /// `None` on timeout.
    fn read_line(&mut self, timeout: Duration) -> Option<Result<String>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];
        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=end).collect();
                let line = String::from_utf8_lossy(&line).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                return Some(Ok(line));
            }
            if Instant::now() >= deadline {
                return None;
            }
            match self.link.receive(&mut buf) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<L: SerialLink> Stage for Sangaboard<L> {
    fn move_rel(&mut self, delta: Position) -> Result<()> {
        if delta == Position::zeros() {
            return Ok(());
        }
        let command = format!("mr {} {} {}", delta.x, delta.y, delta.z);
        let reply = self.query(&command, self.move_timeout)?;
        if reply != "done." {
            return Err(Error::Controller(format!(
                "'{command}' answered '{reply}' instead of 'done.'"
            )));
        }
        Ok(())
    }

    fn position(&mut self) -> Result<Position> {
        let reply = self.query("p", QUERY_TIMEOUT)?;
        let coords = reply
            .split_whitespace()
            .map(|s| s.parse::<i64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::Controller(format!("bad position reply '{reply}'")))?;
        match coords.as_slice() {
            &[x, y, z] => Ok(Position::new(x, y, z)),
            _ => Err(Error::Controller(format!("bad position reply '{reply}'"))),
        }
    }
}

impl<L: SerialLink> Illumination for Sangaboard<L> {
    fn set_led(&mut self, level: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&level) {
            return Err(Error::Controller(format!(
                "led level {level} outside 0.0..=1.0"
            )));
        }
        // a command that fails or is cut short may still have lit the LED
        if level > 0.0 {
            self.led_level = level;
        }
        self.query(&format!("led_cc {level:.3}"), QUERY_TIMEOUT)?;
        self.led_level = level;
        Ok(())
    }
}

impl<L: SerialLink> Drop for Sangaboard<L> {
    fn drop(&mut self) {
        if self.led_level > 0.0 {
            if let Err(e) = self.led_off() {
                warn!("could not switch the LED off: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;

    /// Answers each command line through `respond`, records what was sent.
    struct MockLink {
        sent: Arc<Mutex<Vec<String>>>,
        rx: VecDeque<u8>,
        respond: fn(&str) -> String,
    }

    impl MockLink {
        fn new(respond: fn(&str) -> String) -> Self {
            MockLink {
                sent: Arc::new(Mutex::new(vec![])),
                rx: VecDeque::new(),
                respond,
            }
        }
    }

    impl SerialLink for MockLink {
        fn send(&mut self, data: &[u8]) -> Result<()> {
            let line = String::from_utf8(data.to_vec()).unwrap();
            let line = line.trim_end().to_string();
            let reply = (self.respond)(&line);
            self.sent.lock().unwrap().push(line);
            // replies arrive CRLF terminated and in small pieces
            self.rx.extend(format!("{reply}\r\n").bytes());
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(3).min(self.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }

        fn discard_input(&mut self) -> Result<()> {
            self.rx.clear();
            Ok(())
        }
    }

    fn firmware(command: &str) -> String {
        match command.split_whitespace().next().unwrap_or("") {
            "version" => "Sangaboard Firmware v1.0.1-dev".into(),
            "mr" => "done.".into(),
            "p" => "100 -200 3000".into(),
            "led_cc" | "release" => "ok".into(),
            _ => "ERROR: unknown command".into(),
        }
    }

    #[test]
    fn handshake_reads_version() {
        let board = Sangaboard::new(MockLink::new(firmware)).unwrap();
        assert_eq!(board.firmware(), "Sangaboard Firmware v1.0.1-dev");
    }

    #[test]
    fn rejects_foreign_device() {
        let link = MockLink::new(|_| "Arduino Uno".into());
        assert!(matches!(
            Sangaboard::new(link),
            Err(Error::Controller(_))
        ));
    }

    #[test]
    fn relative_move_sends_vector() {
        let link = MockLink::new(firmware);
        let sent = link.sent.clone();
        let mut board = Sangaboard::new(link).unwrap();
        board.move_rel(Position::new(-500, 0, 0)).unwrap();
        board.move_rel(Position::zeros()).unwrap();
        assert_eq!(*sent.lock().unwrap(), vec!["version", "mr -500 0 0"]);
    }

    #[test]
    fn parses_position() {
        let mut board = Sangaboard::new(MockLink::new(firmware)).unwrap();
        assert_eq!(board.position().unwrap(), Position::new(100, -200, 3000));
    }

    #[test]
    fn error_reply_is_fatal() {
        let link = MockLink::new(|cmd| {
            if cmd == "version" {
                "Sangaboard v0.5".into()
            } else {
                "ERROR: motor fault".into()
            }
        });
        let mut board = Sangaboard::new(link).unwrap();
        assert!(matches!(
            board.move_rel(Position::new(0, 0, 1)),
            Err(Error::Controller(_))
        ));
    }

    #[test]
    fn silent_board_times_out() {
        let link = MockLink::new(|cmd| {
            if cmd == "version" {
                "Sangaboard v0.5".into()
            } else {
                String::new()
            }
        });
        let mut board = Sangaboard::new(link).unwrap();
        let err = board.query("p", Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, Error::Controller(msg) if msg.contains("no reply")));
    }

    #[test]
    fn led_is_switched_off_on_drop() {
        let link = MockLink::new(firmware);
        let sent = link.sent.clone();
        {
            let mut board = Sangaboard::new(link).unwrap();
            board.set_led(0.33).unwrap();
            assert!(board.set_led(1.5).is_err());
        }
        assert_eq!(
            *sent.lock().unwrap(),
            vec!["version", "led_cc 0.330", "led_cc 0.000"]
        );
    }

    #[test]
    fn failed_led_command_still_switches_off_on_drop() {
        let link = MockLink::new(|cmd| {
            if cmd == "version" {
                "Sangaboard v0.5".into()
            } else if cmd == "led_cc 0.800" {
                "ERROR: interrupted".into()
            } else {
                "ok".into()
            }
        });
        let sent = link.sent.clone();
        {
            let mut board = Sangaboard::new(link).unwrap();
            assert!(board.set_led(0.8).is_err());
            assert_eq!(board.led_level(), 0.8);
        }
        assert_eq!(
            *sent.lock().unwrap(),
            vec!["version", "led_cc 0.800", "led_cc 0.000"]
        );
    }
}

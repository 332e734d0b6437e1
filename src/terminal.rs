use std::{
    collections::VecDeque,
    io::{self, BufRead, IsTerminal, Write},
    os::fd::AsRawFd,
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::termios::{self, FlushArg, LocalFlags, SetArg, SpecialCharacterIndices, Termios},
    unistd,
};
use tracing::debug;

use crate::{duration::parse_duration, Error, Result};

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const ESC: u8 = 0x1b;

pub trait KeySource {
    /// Next key press, `None` once input is exhausted.
    fn next_key(&mut self) -> Result<Option<char>>;
}

/// Keys typed as lines of text, every non blank character counts as one
/// press. Used when stdin is not a terminal.
pub struct LineKeys<R> {
    reader: R,
    queued: VecDeque<char>,
}

impl<R: BufRead> LineKeys<R> {
    pub fn new(reader: R) -> Self {
        LineKeys {
            reader,
            queued: VecDeque::new(),
        }
    }
}

impl<R: BufRead> KeySource for LineKeys<R> {
    fn next_key(&mut self) -> Result<Option<char>> {
        while self.queued.is_empty() {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.queued
                .extend(line.chars().filter(|c| !c.is_whitespace()));
        }
        Ok(self.queued.pop_front())
    }
}

pub fn stdin_is_tty() -> bool {
    io::stdin().is_terminal()
}

/// Decode one key press from a byte stream: Ctrl-D ends input, Ctrl-C
/// interrupts, escape sequences and non ASCII bytes are skipped.
fn decode_key<F>(mut next_byte: F) -> Result<Option<char>>
where
    F: FnMut() -> Result<Option<u8>>,
{
    loop {
        match next_byte()? {
            None | Some(CTRL_D) => return Ok(None),
            Some(CTRL_C) => return Err(Error::Interrupted),
            Some(ESC) => {
                // swallow `ESC [ x` so arrow keys do not read as letters
                if next_byte()? == Some(b'[') {
                    next_byte()?;
                }
            }
            Some(b) if b.is_ascii() => return Ok(Some(b as char)),
            Some(_) => {}
        }
    }
}

/// Puts the controlling terminal into unbuffered, no echo mode for as long as
/// it lives. Ctrl-C arrives as a byte and is turned into
/// [`Error::Interrupted`].
pub struct RawTerminal {
    original: Termios,
}

impl RawTerminal {
    pub fn enable() -> Result<Self> {
        let original = termios::tcgetattr(io::stdin()).map_err(io::Error::from)?;
        let mut raw = original.clone();
        raw.local_flags &= !(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &raw).map_err(io::Error::from)?;
        debug!("terminal in raw mode");
        Ok(RawTerminal { original })
    }

    /// Straight from the descriptor, so nothing typed during positioning is
    /// left in `Stdin`'s buffer for the prompts that follow.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match unistd::read(io::stdin().as_raw_fd(), &mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e).into()),
            }
        }
    }
}

impl KeySource for RawTerminal {
    fn next_key(&mut self) -> Result<Option<char>> {
        decode_key(|| self.read_byte())
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        // keys typed after the last read must not end up in the next prompt
        if let Err(e) = termios::tcflush(io::stdin(), FlushArg::TCIFLUSH) {
            debug!("could not flush terminal input: {e}");
        }
        if let Err(e) = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.original) {
            debug!("could not restore the terminal: {e}");
            return;
        }
        debug!("terminal restored");
    }
}

/// Ask for a duration until a valid one is typed. End of input aborts.
pub fn prompt_duration<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    question: &str,
) -> Result<Duration> {
    loop {
        write!(out, "{question}")?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed").into());
        }
        match parse_duration(&line) {
            Ok(duration) => return Ok(duration),
            Err(e) => writeln!(out, "Invalid value ({e}), please try again.")?,
        }
    }
}

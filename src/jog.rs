//! Interactive positioning: one key press, one fixed size stage step.
//!
//! | key | move |
//! |-----|------|
//! | A / D | X -/+ |
//! | W / S | Y -/+ |
//! | Z / X | Z -/+ |
//! | C | confirm, leave positioning |

use std::io::Write;

use tracing::{debug, info};

use crate::{
    stage::{Axis, Position, Stage},
    terminal::KeySource,
    Error, Result,
};

pub const DEFAULT_STEP: i64 = 500;

pub const KEY_HELP: &str = "  A/D: move X axis -/+
  W/S: move Y axis -/+
  Z/X: move Z axis -/+
  C:   confirm position and continue";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogCommand {
    /// One step along `axis`, `positive` selects the direction.
    Step { axis: Axis, positive: bool },
    Confirm,
}

pub fn command_for_key(key: char) -> Option<JogCommand> {
    let step = |axis, positive| Some(JogCommand::Step { axis, positive });
    match key.to_ascii_lowercase() {
        'a' => step(Axis::X, false),
        'd' => step(Axis::X, true),
        'w' => step(Axis::Y, false),
        's' => step(Axis::Y, true),
        'z' => step(Axis::Z, false),
        'x' => step(Axis::Z, true),
        'c' => Some(JogCommand::Confirm),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogState {
    Positioning,
    Confirmed,
}

impl JogState {
    /// Pure transition: the next state and the command, if any, to dispatch.
    /// `Confirmed` is terminal and swallows every key.
    pub fn on_key(self, key: char) -> (JogState, Option<JogCommand>) {
        match (self, command_for_key(key)) {
            (JogState::Confirmed, _) => (JogState::Confirmed, None),
            (JogState::Positioning, Some(JogCommand::Confirm)) => {
                (JogState::Confirmed, Some(JogCommand::Confirm))
            }
            (JogState::Positioning, cmd) => (JogState::Positioning, cmd),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JogSummary {
    pub moves: u64,
    /// Sum of all steps issued, relative to where positioning started.
    pub offset: Position,
}

pub struct JogController {
    state: JogState,
    step: i64,
    moves: u64,
    offset: Position,
}

impl JogController {
    pub fn new(step: i64) -> Self {
        JogController {
            state: JogState::Positioning,
            step,
            moves: 0,
            offset: Position::zeros(),
        }
    }

    pub fn state(&self) -> JogState {
        self.state
    }

    /// Feed one key, moving the stage if it maps to a step.
    pub fn handle_key<S: Stage, W: Write>(
        &mut self,
        key: char,
        stage: &mut S,
        out: &mut W,
    ) -> Result<Option<JogCommand>> {
        let was = self.state;
        let (next, cmd) = self.state.on_key(key);
        self.state = next;
        match cmd {
            Some(JogCommand::Step { axis, positive }) => {
                let steps = if positive { self.step } else { -self.step };
                stage.move_rel(axis.displacement(steps))?;
                self.moves += 1;
                self.offset += axis.displacement(steps);
                info!("jog {axis} {steps:+}");
                writeln!(out, "Moved {axis} axis by {steps:+}")?;
            }
            Some(JogCommand::Confirm) => {
                writeln!(out, "Position confirmed.")?;
            }
            None if was == JogState::Positioning => {
                debug!("ignored key {key:?}");
                writeln!(out, "Unknown key {key:?}, use W/A/S/D/Z/X or C.")?;
            }
            None => {}
        }
        Ok(cmd)
    }

    /// Read keys until the position is confirmed. Running out of input first
    /// is treated as an interruption.
    pub fn run<K: KeySource, S: Stage, W: Write>(
        &mut self,
        keys: &mut K,
        stage: &mut S,
        out: &mut W,
    ) -> Result<JogSummary> {
        while self.state == JogState::Positioning {
            let key = keys.next_key()?.ok_or(Error::Interrupted)?;
            self.handle_key(key, stage, out)?;
        }
        Ok(JogSummary {
            moves: self.moves,
            offset: self.offset,
        })
    }
}

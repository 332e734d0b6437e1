use std::fmt;

use nalgebra::Vector3;

use crate::Result;

/// Stage position in motor steps, `(x, y, z)`.
pub type Position = Vector3<i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Displacement of `steps` along this axis only.
    pub fn displacement(self, steps: i64) -> Position {
        let mut v = Position::zeros();
        v[self.index()] = steps;
        v
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

/// Three axis motorised stage.
pub trait Stage {
    /// Move by `delta` steps relative to the current position. Blocks until
    /// the move has finished.
    fn move_rel(&mut self, delta: Position) -> Result<()>;

    fn position(&mut self) -> Result<Position>;
}

pub trait Illumination {
    /// Set the LED level, `0.0` is off and `1.0` full brightness.
    fn set_led(&mut self, level: f32) -> Result<()>;

    fn led_off(&mut self) -> Result<()> {
        self.set_led(0.0)
    }
}

use std::io::Cursor;

use flexure::{
    terminal::{KeySource, LineKeys},
    Error, JogController, JogState, Position, Result, Stage,
};

struct FakeStage {
    position: Position,
    moves: usize,
    fail: bool,
}

impl FakeStage {
    fn new() -> Self {
        FakeStage {
            position: Position::zeros(),
            moves: 0,
            fail: false,
        }
    }
}

impl Stage for FakeStage {
    fn move_rel(&mut self, delta: Position) -> Result<()> {
        if self.fail {
            return Err(Error::Controller("motor stalled".into()));
        }
        self.position += delta;
        self.moves += 1;
        Ok(())
    }

    fn position(&mut self) -> Result<Position> {
        Ok(self.position)
    }
}

#[test]
fn jogs_until_confirmed_and_leaves_rest_of_input() {
    let mut keys = LineKeys::new(Cursor::new("d\nd\nw\nq\nZ\nc\nd\nd\n"));
    let mut stage = FakeStage::new();
    let mut jog = JogController::new(500);
    let mut out = vec![];

    let summary = jog.run(&mut keys, &mut stage, &mut out).unwrap();

    assert_eq!(jog.state(), JogState::Confirmed);
    assert_eq!(summary.moves, 4);
    assert_eq!(summary.offset, Position::new(1000, -500, -500));
    assert_eq!(stage.position().unwrap(), summary.offset);
    // keys after the confirmation are not consumed by positioning
    assert_eq!(keys.next_key().unwrap(), Some('d'));

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Unknown key 'q'"));
    assert!(text.contains("Position confirmed."));
}

#[test]
fn confirming_twice_does_not_reenter() {
    let mut keys = LineKeys::new(Cursor::new("c\n"));
    let mut stage = FakeStage::new();
    let mut jog = JogController::new(500);
    let mut out = vec![];

    jog.run(&mut keys, &mut stage, &mut out).unwrap();
    // already confirmed, no input is read and nothing moves
    let again = jog.run(&mut keys, &mut stage, &mut out).unwrap();
    assert_eq!(again.moves, 0);
    assert_eq!(stage.moves, 0);
}

#[test]
fn input_ending_before_confirm_is_an_interruption() {
    let mut keys = LineKeys::new(Cursor::new("a\nx\n"));
    let mut stage = FakeStage::new();
    let mut jog = JogController::new(250);
    let mut out = vec![];

    let err = jog.run(&mut keys, &mut stage, &mut out).unwrap_err();
    assert!(matches!(err, Error::Interrupted));
    assert_eq!(stage.position, Position::new(-250, 0, 250));
}

#[test]
fn stage_failure_is_fatal() {
    let mut keys = LineKeys::new(Cursor::new("d\nc\n"));
    let mut stage = FakeStage {
        fail: true,
        ..FakeStage::new()
    };
    let mut jog = JogController::new(500);
    let mut out = vec![];

    let err = jog.run(&mut keys, &mut stage, &mut out).unwrap_err();
    assert!(matches!(err, Error::Controller(_)));
    assert_eq!(jog.state(), JogState::Positioning);
}

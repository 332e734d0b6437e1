//! Human readable durations such as `1d 4h 30s`.
//!
//! A duration is a sequence of `<integer><unit>` tokens with unit one of
//! `d`, `h`, `m`, `s` (case-insensitive). Whitespace between tokens, and
//! between a number and its unit, is optional. Repeated units add up.

use std::{fmt, time::Duration};

use nom::{error::ErrorKind, Finish};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    Empty,
    /// A token did not start with a digit.
    ExpectedNumber(String),
    MissingUnit(String),
    UnknownUnit(char),
    Overflow,
    Zero,
}

impl fmt::Display for DurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationError::Empty => write!(f, "empty duration"),
            DurationError::ExpectedNumber(rest) => write!(f, "expected a number at '{rest}'"),
            DurationError::MissingUnit(num) => {
                write!(f, "'{num}' has no unit, use one of d, h, m, s")
            }
            DurationError::UnknownUnit(c) => write!(f, "unknown unit '{c}', use one of d, h, m, s"),
            DurationError::Overflow => write!(f, "duration is too large"),
            DurationError::Zero => write!(f, "duration must be greater than zero"),
        }
    }
}

impl std::error::Error for DurationError {}

fn unit_seconds(unit: char) -> u64 {
    match unit.to_ascii_lowercase() {
        'd' => 86_400,
        'h' => 3_600,
        'm' => 60,
        _ => 1,
    }
}

mod parser {
    use nom::{
        character::complete::{digit1, multispace0, one_of},
        combinator::all_consuming,
        multi::many1,
        sequence::{delimited, pair, preceded, terminated},
        IResult,
    };

    type Input<'a> = &'a str;

    /// `<digits> <unit>`, whitespace allowed in between.
    fn quantity(input: Input) -> IResult<Input, (Input, char)> {
        pair(digit1, preceded(multispace0, one_of("dhmsDHMS")))(input)
    }

    pub fn duration(input: Input) -> IResult<Input, Vec<(Input, char)>> {
        all_consuming(delimited(
            multispace0,
            many1(terminated(quantity, multispace0)),
            multispace0,
        ))(input)
    }
}

/// Turn the place where the grammar stopped matching into an error.
fn diagnose(input: &str, e: nom::error::Error<&str>) -> DurationError {
    let rest = e.input;
    let consumed = &input[..input.len() - rest.len()];
    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        return match rest[digits.len()..].trim_start().chars().next() {
            None => DurationError::MissingUnit(digits),
            Some(c) => DurationError::UnknownUnit(c),
        };
    }
    match rest.chars().next() {
        None => {
            let digits: String = consumed
                .trim_end()
                .chars()
                .rev()
                .take_while(char::is_ascii_digit)
                .collect();
            DurationError::MissingUnit(digits.chars().rev().collect())
        }
        Some(c) if e.code == ErrorKind::OneOf => DurationError::UnknownUnit(c),
        // a unit glued to more letters, e.g. `5sec`
        Some(c) if !consumed.is_empty() && !consumed.ends_with(char::is_whitespace) => {
            DurationError::UnknownUnit(c)
        }
        Some(_) => DurationError::ExpectedNumber(rest.to_string()),
    }
}

/// Parse a duration string into whole seconds.
///
/// ```
/// use flexure::duration::parse_duration;
/// assert_eq!(parse_duration("1d 4h 30s").unwrap().as_secs(), 100_830);
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    if input.trim().is_empty() {
        return Err(DurationError::Empty);
    }
    let (_, tokens) = parser::duration(input)
        .finish()
        .map_err(|e| diagnose(input, e))?;

    let mut total: u64 = 0;
    for (digits, unit) in tokens {
        let magnitude: u64 = digits.parse().map_err(|_| DurationError::Overflow)?;
        total = magnitude
            .checked_mul(unit_seconds(unit))
            .and_then(|secs| total.checked_add(secs))
            .ok_or(DurationError::Overflow)?;
    }

    if total == 0 {
        return Err(DurationError::Zero);
    }
    Ok(Duration::from_secs(total))
}

/// Format whole seconds back into the `1d 4h 30s` notation.
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".into();
    }
    let mut parts = vec![];
    for (unit, scale) in [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)] {
        let n = secs / scale;
        if n > 0 {
            parts.push(format!("{n}{unit}"));
            secs %= scale;
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: &str) -> u64 {
        parse_duration(s).unwrap().as_secs()
    }

    #[test]
    fn compound_duration_sums_each_unit() {
        assert_eq!(secs("1d 4h 30s"), 100_830);
        assert_eq!(secs("1d 4h 30m"), 102_600);
    }

    #[test]
    fn single_units() {
        assert_eq!(secs("6h"), 21_600);
        assert_eq!(secs("10s"), 10);
        assert_eq!(secs("1m"), 60);
        assert_eq!(secs("2d"), 172_800);
    }

    #[test]
    fn accepts_any_order_case_and_spacing() {
        assert_eq!(secs("30s 1m"), 90);
        assert_eq!(secs("1H 1M"), 3_660);
        assert_eq!(secs("1d4h"), 100_800);
        assert_eq!(secs("  5 s  "), 5);
    }

    #[test]
    fn duplicate_units_add_up() {
        assert_eq!(secs("1h 2h"), 10_800);
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(parse_duration("5x"), Err(DurationError::UnknownUnit('x')));
        assert!(matches!(
            parse_duration("abc"),
            Err(DurationError::ExpectedNumber(_))
        ));
        assert_eq!(
            parse_duration("10"),
            Err(DurationError::MissingUnit("10".into()))
        );
        assert!(parse_duration("1.5h").is_err());
        assert!(parse_duration("-5s").is_err());
        assert_eq!(parse_duration("5sec"), Err(DurationError::UnknownUnit('e')));
        assert_eq!(
            parse_duration("5s abc"),
            Err(DurationError::ExpectedNumber("abc".into()))
        );
        assert_eq!(
            parse_duration("5s 3"),
            Err(DurationError::MissingUnit("3".into()))
        );
        assert_eq!(parse_duration("1d 5x"), Err(DurationError::UnknownUnit('x')));
        assert_eq!(parse_duration("1.5h"), Err(DurationError::UnknownUnit('.')));
        assert_eq!(parse_duration("   "), Err(DurationError::Empty));
    }

    #[test]
    fn rejects_zero_and_overflow() {
        assert_eq!(parse_duration("0s"), Err(DurationError::Zero));
        assert_eq!(parse_duration("0d 0h"), Err(DurationError::Zero));
        assert_eq!(
            parse_duration("99999999999999999999s"),
            Err(DurationError::Overflow)
        );
        assert_eq!(
            parse_duration("999999999999999d"),
            Err(DurationError::Overflow)
        );
    }

    #[test]
    fn formats_back() {
        assert_eq!(format_duration(Duration::from_secs(100_830)), "1d 4h 30s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}

//! Fractional-index positions for ordered list children.
//!
//! A position is a non-empty string over the printable codes 32..=126, read as
//! base-95 digits. Missing trailing digits compare as the minimum digit, so a new
//! position can always be generated between two neighbours without renumbering
//! any sibling. A position never ends in the minimum digit; that keeps every value
//! in one canonical form, so string equality and ordering agree.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::errors::CrdtError;
use crate::constants::{POSITION_MAX_DIGIT as MAX, POSITION_MIN_DIGIT as MIN};

/// An ordering key for a list child.
///
/// # Examples
///
/// ```
/// use livetree::crdt::position::{Position, make_position};
///
/// let first = make_position(None, None).unwrap();
/// let second = make_position(Some(&first), None).unwrap();
/// let between = make_position(Some(&first), Some(&second)).unwrap();
///
/// assert!(first < between);
/// assert!(between < second);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    /// Parses and validates a position string.
    pub fn parse(value: impl Into<String>) -> Result<Self, CrdtError> {
        let value = value.into();
        if value.is_empty() {
            return Err(CrdtError::InvalidPosition {
                position: value,
                reason: "position is empty".to_string(),
            });
        }
        if let Some(byte) = value.bytes().find(|b| !(MIN..=MAX).contains(b)) {
            return Err(CrdtError::InvalidPosition {
                reason: format!("code {byte} is outside {MIN}..={MAX}"),
                position: value,
            });
        }
        if value.as_bytes().last() == Some(&MIN) {
            return Err(CrdtError::InvalidPosition {
                position: value,
                reason: "position ends in the minimum digit".to_string(),
            });
        }
        Ok(Position(value))
    }

    /// The position given to the first child of an empty list.
    pub fn first() -> Self {
        Position(char::from(MIN + 1).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digits(&self) -> &[u8] {
        self.0.as_bytes()
    }

    fn from_digits(digits: Vec<u8>) -> Self {
        // Every digit is produced inside MIN..=MAX, which is ASCII.
        Position(digits.into_iter().map(char::from).collect())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Position::parse(raw).map_err(serde::de::Error::custom)
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.digits(), other.digits());
        let len = a.len().max(b.len());
        for i in 0..len {
            let x = a.get(i).copied().unwrap_or(MIN);
            let y = b.get(i).copied().unwrap_or(MIN);
            match x.cmp(&y) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compares two distinct positions. Comparing a position with itself is an error.
pub fn compare_positions(a: &Position, b: &Position) -> Result<Ordering, CrdtError> {
    match a.cmp(b) {
        Ordering::Equal => Err(CrdtError::EqualPositions {
            position: a.0.clone(),
        }),
        ordering => Ok(ordering),
    }
}

/// Generates a position strictly between `before` and `after`.
///
/// Either bound may be absent, meaning the start or the end of the list.
pub fn make_position(
    before: Option<&Position>,
    after: Option<&Position>,
) -> Result<Position, CrdtError> {
    match (before, after) {
        (Some(before), Some(after)) => {
            if before >= after {
                return Err(CrdtError::PositionOutOfOrder {
                    before: before.0.clone(),
                    after: after.0.clone(),
                });
            }
            Ok(Position::from_digits(between(before.digits(), after.digits())))
        }
        (Some(before), None) => Ok(next_position(before)),
        (None, Some(after)) => Ok(previous_position(after)),
        (None, None) => Ok(Position::first()),
    }
}

fn next_position(before: &Position) -> Position {
    let digits = before.digits();
    let mut result = Vec::with_capacity(digits.len() + 1);
    for (i, &digit) in digits.iter().enumerate() {
        if digit == MAX {
            result.push(digit);
            if i == digits.len() - 1 {
                result.push(MIN + 1);
            }
        } else {
            result.push(digit + 1);
            break;
        }
    }
    Position::from_digits(result)
}

fn previous_position(after: &Position) -> Position {
    let digits = after.digits();
    let mut result = Vec::with_capacity(digits.len() + 1);
    for (i, &digit) in digits.iter().enumerate() {
        if digit <= MIN + 1 {
            result.push(MIN);
            if i == digits.len() - 1 {
                result.push(MAX);
            }
        } else {
            result.push(digit - 1);
            break;
        }
    }
    Position::from_digits(result)
}

/// Digit-wise midpoint of `before < after`, both padded with the minimum digit.
fn between(before: &[u8], after: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut index = 0;
    loop {
        let low = before.get(index).copied().unwrap_or(MIN);
        let high = after.get(index).copied().unwrap_or(MIN);
        if low == high {
            result.push(low);
            index += 1;
            continue;
        }
        if high - low == 1 {
            result.push(low);
            result.extend(above(before.get(index + 1..).unwrap_or(&[])));
        } else {
            result.push(low + (high - low) / 2);
        }
        return result;
    }
}

/// Digits greater than `before` with no upper bound.
fn above(before: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut index = 0;
    loop {
        let low = before.get(index).copied().unwrap_or(MIN);
        if MAX - low > 1 {
            result.push(low + (MAX - low) / 2);
            return result;
        }
        result.push(low);
        index += 1;
    }
}

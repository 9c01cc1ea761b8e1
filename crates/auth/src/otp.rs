//! Six-slot one-time code entry.
//!
//! Mirrors a row of single-character inputs: each slot takes at most one
//! digit, typing moves focus forward and backspacing over an empty slot moves
//! it back. Nothing is submitted automatically when the last slot fills.

use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};

pub const OTP_LENGTH: usize = 6;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpBuffer {
    slots: [Option<char>; OTP_LENGTH],
    focus: usize,
}

impl OtpBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` into slot `index`.
    ///
    /// `value` must be empty (clears the slot) or a single ASCII digit;
    /// anything else is refused and the buffer is left untouched.
    pub fn enter(&mut self, index: usize, value: &str) -> Result<()> {
        check_index(index)?;

        let mut chars = value.chars();
        let digit = match (chars.next(), chars.next()) {
            (None, _) => None,
            (Some(c), None) if c.is_ascii_digit() => Some(c),
            _ => {
                return Err(GateError::Validation(
                    "Each OTP slot takes a single digit".to_string(),
                ))
            }
        };

        self.slots[index] = digit;
        if digit.is_some() && index < OTP_LENGTH - 1 {
            self.focus = index + 1;
        } else {
            self.focus = index;
        }
        Ok(())
    }

    /// Backspace pressed while slot `index` has focus.
    pub fn backspace(&mut self, index: usize) -> Result<()> {
        check_index(index)?;

        if self.slots[index].is_some() {
            self.slots[index] = None;
            self.focus = index;
        } else if index > 0 {
            self.focus = index - 1;
        } else {
            self.focus = 0;
        }
        Ok(())
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn slot(&self, index: usize) -> Option<char> {
        self.slots.get(index).copied().flatten()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Filled slots joined in order.
    pub fn joined(&self) -> String {
        self.slots.iter().flatten().collect()
    }

    /// The full code, or `None` while any slot is empty.
    pub fn code(&self) -> Option<String> {
        self.is_complete().then(|| self.joined())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn check_index(index: usize) -> Result<()> {
    if index >= OTP_LENGTH {
        return Err(GateError::Validation(format!(
            "OTP slot {} out of range (0..{})",
            index, OTP_LENGTH
        )));
    }
    Ok(())
}

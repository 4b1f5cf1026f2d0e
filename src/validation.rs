//! Validation helpers for operator input and configuration values.
//!
//! [`probe_number`] is the single configurable check used by every numeric text
//! field: it takes the field bounds and whether an empty field is acceptable and
//! classifies the text the way a live input validator does, so partially typed
//! numbers survive while the operator is still editing.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::RangeInclusive;

/// Classification of a piece of numeric text while it is being edited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextState {
    /// A complete number inside the bounds (or an allowed empty text).
    Acceptable(Option<f64>),
    /// Not acceptable yet, but could become acceptable by further editing:
    /// partial input such as `"12."`, `"-"`, `"1e"`, or a number outside the bounds.
    Intermediate,
    /// Can never become a valid number by appending characters.
    Invalid,
}

impl TextState {
    /// True for [`TextState::Acceptable`].
    pub fn is_acceptable(&self) -> bool {
        matches!(self, TextState::Acceptable(_))
    }

    /// True unless the text is [`TextState::Invalid`].
    pub fn is_editable(&self) -> bool {
        !matches!(self, TextState::Invalid)
    }
}

/// Any prefix of a plain or scientific decimal number, C locale.
static NUMBER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]*)?|\.)?$")
        .unwrap_or_else(|_| unreachable!("number prefix pattern is a valid regex"))
});

/// Classifies `text` against `bounds` using a locale-independent decimal probe.
///
/// * Text containing a comma (a thousands separator in most locales) is invalid.
/// * A leading minus sign is invalid when the bounds cannot hold a negative value.
/// * Empty text is acceptable only when `allow_empty` is set; otherwise it is
///   intermediate so the operator can clear the field and retype.
pub fn probe_number(text: &str, bounds: &RangeInclusive<f64>, allow_empty: bool) -> TextState {
    if text.is_empty() {
        return if allow_empty {
            TextState::Acceptable(None)
        } else {
            TextState::Intermediate
        };
    }
    if text.contains(',') || !NUMBER_PREFIX.is_match(text) {
        return TextState::Invalid;
    }
    if text.starts_with('-') && *bounds.start() >= 0.0 {
        return TextState::Invalid;
    }

    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && bounds.contains(&value) => {
            TextState::Acceptable(Some(value))
        }
        _ => TextState::Intermediate,
    }
}

/// Clamps `value` into the inclusive `range`.
pub fn clamp_to_range<T: PartialOrd + Copy>(value: T, range: &RangeInclusive<T>) -> T {
    if value > *range.end() {
        *range.end()
    } else if value < *range.start() {
        *range.start()
    } else {
        value
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is a valid file path.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

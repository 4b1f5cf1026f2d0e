//! Editable input fields backing the scan and interferometer parameter sets.
//!
//! Two field kinds exist:
//!
//! - [`NumericField`]: free text holding a floating-point number. Partial input is
//!   tolerated while typing; [`NumericField::commit`] parses, clamps into the bounds and
//!   emits [`FieldEvent::Edited`], or reverts to the last value that passed live
//!   validation and reports a [`ScanError::Validation`].
//! - [`IntegerStepper`]: a bounded integer (pixel counts, interferogram points). Values
//!   are clamped into the inclusive range on every change; empty input is never allowed.
//!
//! [`FieldInput`] wraps both so a parameter set can hold a uniform collection.

use crate::error::{ScanError, ScanResult};
use crate::validation::{clamp_to_range, probe_number, TextState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use tracing::debug;

/// Value held by a single field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Integer stepper value.
    Integer(i64),
    /// Floating-point value; `None` only for fields that allow an empty commit.
    Float(Option<f64>),
}

impl ParamValue {
    /// Numeric view of the value, `None` when the field is empty.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(v) => Some(*v as f64),
            ParamValue::Float(v) => *v,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(v) => write!(f, "{}", v),
            ParamValue::Float(Some(v)) => write!(f, "{}", format_float(*v)),
            ParamValue::Float(None) => Ok(()),
        }
    }
}

/// Notification emitted by a field after a successful commit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldEvent {
    /// The field accepted a new committed value.
    Edited {
        /// Value after normalization.
        value: ParamValue,
        /// Whether the entered value had to be clamped into the bounds.
        clamped: bool,
    },
}

/// Text rendering used when a field normalizes its own text.
///
/// Always keeps a decimal point so `50.0` renders as `"50.0"`, and parses back to
/// exactly the same value.
pub fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

// =============================================================================
// NumericField
// =============================================================================

/// Bounded floating-point text input with clamp-on-commit.
#[derive(Debug, Clone)]
pub struct NumericField {
    name: &'static str,
    text: String,
    bounds: RangeInclusive<f64>,
    allow_empty: bool,
    last_valid: Option<f64>,
    committed: Option<f64>,
}

impl NumericField {
    /// Create a field showing `initial`, which is clamped into `bounds`.
    pub fn new(name: &'static str, bounds: RangeInclusive<f64>, initial: f64) -> Self {
        let initial = clamp_to_range(initial, &bounds);
        Self {
            name,
            text: format_float(initial),
            bounds,
            allow_empty: false,
            last_valid: Some(initial),
            committed: Some(initial),
        }
    }

    /// Allow committing an empty text (value becomes empty).
    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }

    /// Parameter name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Text as currently typed.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Accepted interval.
    pub fn bounds(&self) -> &RangeInclusive<f64> {
        &self.bounds
    }

    /// Value after the last commit.
    pub fn value(&self) -> Option<f64> {
        self.committed
    }

    /// Last value that passed live validation.
    pub fn last_valid(&self) -> Option<f64> {
        self.last_valid
    }

    /// Store raw operator input.
    ///
    /// Partial or out-of-range text is kept so editing can continue; text that can
    /// never become a number (thousands separators, letters) is refused and the
    /// previous text stays. Returns whether the text was taken.
    pub fn set_text(&mut self, raw: &str) -> bool {
        let state = probe_number(raw, &self.bounds, self.allow_empty);
        if !state.is_editable() {
            debug!(field = self.name, text = raw, "rejected keystroke");
            return false;
        }
        self.text = raw.to_string();
        if let TextState::Acceptable(value) = state {
            self.last_valid = value;
        }
        true
    }

    /// Confirm the current text (return key or focus loss).
    pub fn commit(&mut self) -> ScanResult<FieldEvent> {
        if self.text.is_empty() {
            if self.allow_empty {
                self.last_valid = None;
                self.committed = None;
                return Ok(FieldEvent::Edited {
                    value: ParamValue::Float(None),
                    clamped: false,
                });
            }
            self.revert();
            return Err(ScanError::validation(self.name, "a value is required"));
        }

        // overflowing exponents parse to an infinity and clamp like any other value
        let parsed = match self.text.parse::<f64>() {
            Ok(v) if !v.is_nan() => v,
            _ => {
                self.revert();
                return Err(ScanError::validation(self.name, "input can only be a number"));
            }
        };

        let value = clamp_to_range(parsed, &self.bounds);
        let clamped = value != parsed;
        if clamped {
            debug!(field = self.name, entered = parsed, value, "clamped to bounds");
            self.text = format_float(value);
        }
        self.last_valid = Some(value);
        self.committed = Some(value);

        Ok(FieldEvent::Edited {
            value: ParamValue::Float(Some(value)),
            clamped,
        })
    }

    /// Programmatic update (settings load): clamps and commits without parsing text.
    pub fn assign(&mut self, value: f64) -> ScanResult<FieldEvent> {
        if !value.is_finite() {
            return Err(ScanError::validation(self.name, "value must be a finite number"));
        }
        let normalized = clamp_to_range(value, &self.bounds);
        self.text = format_float(normalized);
        self.last_valid = Some(normalized);
        self.committed = Some(normalized);
        Ok(FieldEvent::Edited {
            value: ParamValue::Float(Some(normalized)),
            clamped: normalized != value,
        })
    }

    fn revert(&mut self) {
        self.text = self.last_valid.map(format_float).unwrap_or_default();
        self.committed = self.last_valid;
    }
}

// =============================================================================
// IntegerStepper
// =============================================================================

/// Bounded integer input (spin box semantics).
#[derive(Debug, Clone)]
pub struct IntegerStepper {
    name: &'static str,
    value: i64,
    range: RangeInclusive<i64>,
}

impl IntegerStepper {
    /// Stepper at `initial`, clamped into `range`.
    pub fn new(name: &'static str, range: RangeInclusive<i64>, initial: i64) -> Self {
        let value = clamp_to_range(initial, &range);
        Self { name, value, range }
    }

    /// Parameter name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current value.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Accepted interval.
    pub fn range(&self) -> &RangeInclusive<i64> {
        &self.range
    }

    /// Set a value, clamping into the range. Returns whether clamping happened.
    pub fn set_value(&mut self, value: i64) -> bool {
        self.value = clamp_to_range(value, &self.range);
        self.value != value
    }

    /// Step up or down by `delta`, stopping at the range ends.
    pub fn step(&mut self, delta: i64) {
        self.set_value(self.value.saturating_add(delta));
    }

    /// Typed text; anything that is not an integer is refused.
    pub fn set_text(&mut self, raw: &str) -> bool {
        match raw.trim().parse::<i64>() {
            Ok(v) => {
                self.set_value(v);
                true
            }
            Err(_) => false,
        }
    }

    /// Report the current value as an edit. Steppers are always valid.
    pub fn commit(&mut self) -> FieldEvent {
        FieldEvent::Edited {
            value: ParamValue::Integer(self.value),
            clamped: false,
        }
    }
}

// =============================================================================
// FieldInput
// =============================================================================

/// Either kind of field, as held by a parameter set.
#[derive(Debug, Clone)]
pub enum FieldInput {
    /// Free-text float entry.
    Numeric(NumericField),
    /// Integer spin box.
    Stepper(IntegerStepper),
}

impl FieldInput {
    /// Parameter name.
    pub fn name(&self) -> &'static str {
        match self {
            FieldInput::Numeric(f) => f.name(),
            FieldInput::Stepper(s) => s.name(),
        }
    }

    /// Current committed value.
    pub fn value(&self) -> ParamValue {
        match self {
            FieldInput::Numeric(f) => ParamValue::Float(f.value()),
            FieldInput::Stepper(s) => ParamValue::Integer(s.value()),
        }
    }

    /// Text as currently shown to the operator.
    pub fn display_text(&self) -> String {
        match self {
            FieldInput::Numeric(f) => f.text().to_string(),
            FieldInput::Stepper(s) => s.value().to_string(),
        }
    }

    /// Push typed text. Returns whether the text was taken.
    pub fn set_text(&mut self, raw: &str) -> bool {
        match self {
            FieldInput::Numeric(f) => f.set_text(raw),
            FieldInput::Stepper(s) => s.set_text(raw),
        }
    }

    /// Confirm the field.
    pub fn commit(&mut self) -> ScanResult<FieldEvent> {
        match self {
            FieldInput::Numeric(f) => f.commit(),
            FieldInput::Stepper(s) => Ok(s.commit()),
        }
    }

    /// Overwrite the field with `value`, clamped into its bounds.
    pub fn assign(&mut self, value: f64) -> ScanResult<FieldEvent> {
        match self {
            FieldInput::Numeric(f) => f.assign(value),
            FieldInput::Stepper(s) => {
                let clamped = s.set_value(value.round() as i64);
                Ok(FieldEvent::Edited {
                    value: ParamValue::Integer(s.value()),
                    clamped,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset() -> NumericField {
        NumericField::new("offset_x", 0.0..=100.0, 50.0)
    }

    fn committed(event: FieldEvent) -> (ParamValue, bool) {
        match event {
            FieldEvent::Edited { value, clamped } => (value, clamped),
        }
    }

    #[test]
    fn initial_text_keeps_decimal_point() {
        let field = offset();
        assert_eq!(field.text(), "50.0");
        assert_eq!(field.value(), Some(50.0));
    }

    #[test]
    fn commit_round_trips_values_in_bounds() {
        for x in [0.0, 0.1, 1.0 / 3.0, 42.125, 99.99999, 100.0] {
            let mut field = offset();
            assert!(field.set_text(&x.to_string()));
            let (value, clamped) = committed(field.commit().unwrap());
            assert_eq!(value, ParamValue::Float(Some(x)));
            assert!(!clamped);
            assert_eq!(field.value(), Some(x));
        }
    }

    #[test]
    fn commit_clamps_above_top() {
        let mut field = offset();
        assert!(field.set_text("250"));
        let (value, clamped) = committed(field.commit().unwrap());
        assert_eq!(value, ParamValue::Float(Some(100.0)));
        assert!(clamped);
        assert_eq!(field.text(), "100.0");
    }

    #[test]
    fn overflowing_exponent_clamps_to_bounds() {
        let mut field = offset();
        assert!(field.set_text("1e999"));
        let (value, clamped) = committed(field.commit().unwrap());
        assert_eq!(value, ParamValue::Float(Some(100.0)));
        assert!(clamped);
        assert_eq!(field.text(), "100.0");

        let mut signed = NumericField::new("center", -100.0..=100.0, 0.0);
        assert!(signed.set_text("-1e999"));
        let (value, _) = committed(signed.commit().unwrap());
        assert_eq!(value, ParamValue::Float(Some(-100.0)));
    }

    #[test]
    fn commit_clamps_below_bottom() {
        let mut field = NumericField::new("ms_per_pixel", 0.4..=1000.4, 9.8);
        assert!(field.set_text("0.1"));
        let (value, clamped) = committed(field.commit().unwrap());
        assert_eq!(value, ParamValue::Float(Some(0.4)));
        assert!(clamped);
    }

    #[test]
    fn empty_commit_reverts_without_event() {
        let mut field = offset();
        assert!(field.set_text("12"));
        field.commit().unwrap();
        assert!(field.set_text(""));
        let err = field.commit().unwrap_err();
        assert!(matches!(err, ScanError::Validation { .. }));
        assert_eq!(field.value(), Some(12.0));
        assert_eq!(field.text(), "12.0");
    }

    #[test]
    fn empty_commit_allowed_when_configured() {
        let mut field = offset().allow_empty(true);
        assert!(field.set_text(""));
        let (value, _) = committed(field.commit().unwrap());
        assert_eq!(value, ParamValue::Float(None));
        assert_eq!(field.value(), None);
    }

    #[test]
    fn partial_input_reverts_to_last_live_valid() {
        let mut field = offset();
        assert!(field.set_text("7"));
        assert!(field.set_text("7e"));
        assert_eq!(field.last_valid(), Some(7.0));
        let err = field.commit().unwrap_err();
        assert!(err.to_string().contains("only be a number"));
        assert_eq!(field.text(), "7.0");
        assert_eq!(field.value(), Some(7.0));
    }

    #[test]
    fn thousands_separator_keeps_previous_text() {
        let mut field = offset();
        assert!(!field.set_text("1,5"));
        assert_eq!(field.text(), "50.0");
    }

    #[test]
    fn stepper_clamps_and_steps() {
        let mut stepper = IntegerStepper::new("resolution_width", 1..=10_000, 100);
        stepper.step(5);
        assert_eq!(stepper.value(), 105);
        stepper.step(-1_000_000);
        assert_eq!(stepper.value(), 1);
        assert!(stepper.set_value(20_000));
        assert_eq!(stepper.value(), 10_000);
        assert!(!stepper.set_text("abc"));
        assert!(stepper.set_text(" 640 "));
        assert_eq!(stepper.commit(), FieldEvent::Edited {
            value: ParamValue::Integer(640),
            clamped: false,
        });
    }

    #[test]
    fn assign_normalizes_out_of_range_values() {
        let mut input = FieldInput::Numeric(offset());
        let (value, clamped) = committed(input.assign(500.0).unwrap());
        assert_eq!(value, ParamValue::Float(Some(100.0)));
        assert!(clamped);

        let mut input = FieldInput::Stepper(IntegerStepper::new("points", 1..=10_000, 600));
        let (value, clamped) = committed(input.assign(0.0).unwrap());
        assert_eq!(value, ParamValue::Integer(1));
        assert!(clamped);
    }
}

//! Scan and interferometer parameter sets.
//!
//! A [`ParameterSet`] owns one editable input per field of a [`ParameterGroup`]
//! (scan geometry or interferometer settings) and publishes the derived, typed
//! snapshot whenever any field reports an edit:
//!
//! - GUI widgets push text into fields with [`ParameterSet::set_text`] and confirm
//!   with [`ParameterSet::commit`].
//! - Each successful commit re-derives the whole snapshot from every field's committed
//!   value, then notifies subscribers once ("parameters changed") via a watch channel
//!   and registered change listeners.
//! - Each set is constructed fresh with its own defaults; no state is shared between
//!   instances.
//!
//! # Example
//!
//! ```rust
//! use snom_scan::parameter::{ParameterSet, ScanParameters};
//!
//! let mut scan = ParameterSet::<ScanParameters>::new();
//! let rx = scan.subscribe();
//!
//! scan.set_text("size_x", "12.5")?;
//! scan.commit("size_x")?;
//! assert_eq!(rx.borrow().size_x, 12.5);
//! # Ok::<(), snom_scan::error::ScanError>(())
//! ```

use crate::error::{ScanError, ScanResult};
use crate::field::{FieldEvent, FieldInput, IntegerStepper, NumericField, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::RangeInclusive;
use tokio::sync::watch;
use tracing::{debug, info_span, warn, Span};

/// Immutable name → value view of a parameter group.
pub type ParamMap = BTreeMap<String, ParamValue>;

// =============================================================================
// Field layout
// =============================================================================

/// Kind, bounds and default of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Free-text numeric entry.
    Float {
        /// Accepted interval; commits are clamped into it.
        bounds: RangeInclusive<f64>,
        /// Initial value.
        default: f64,
    },
    /// Integer stepper.
    Integer {
        /// Accepted interval; values are clamped into it.
        range: RangeInclusive<i64>,
        /// Initial value.
        default: i64,
    },
}

/// Static description of one editable field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Key used in snapshots and persisted settings.
    pub name: &'static str,
    /// Label shown next to the input.
    pub label: &'static str,
    /// Unit of measurement, if any.
    pub unit: Option<&'static str>,
    /// Input kind with its bounds and default.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Numeric text field.
    pub const fn float(
        name: &'static str,
        label: &'static str,
        unit: Option<&'static str>,
        bounds: RangeInclusive<f64>,
        default: f64,
    ) -> Self {
        Self {
            name,
            label,
            unit,
            kind: FieldKind::Float { bounds, default },
        }
    }

    /// Integer stepper without a unit.
    pub const fn integer(
        name: &'static str,
        label: &'static str,
        range: RangeInclusive<i64>,
        default: i64,
    ) -> Self {
        Self {
            name,
            label,
            unit: None,
            kind: FieldKind::Integer { range, default },
        }
    }

    fn build_input(&self) -> FieldInput {
        match &self.kind {
            FieldKind::Float { bounds, default } => {
                FieldInput::Numeric(NumericField::new(self.name, bounds.clone(), *default))
            }
            FieldKind::Integer { range, default } => {
                FieldInput::Stepper(IntegerStepper::new(self.name, range.clone(), *default))
            }
        }
    }
}

/// A typed group of parameters edited through a [`ParameterSet`].
pub trait ParameterGroup: Clone + Debug + PartialEq + Default + Send + Sync + 'static {
    /// Group name used in logs.
    const GROUP: &'static str;

    /// Editable fields in display order.
    fn layout() -> Vec<FieldSpec>;

    /// Build the typed snapshot from field values. Missing or empty required fields
    /// are a validation error.
    fn from_values(values: &ParamMap) -> ScanResult<Self>;

    /// Name → value view, including derived fields.
    fn to_values(&self) -> ParamMap;
}

fn required_f64(values: &ParamMap, name: &str) -> ScanResult<f64> {
    values
        .get(name)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| ScanError::validation(name, "a value is required"))
}

fn required_u32(values: &ParamMap, name: &str) -> ScanResult<u32> {
    match values.get(name) {
        Some(ParamValue::Integer(v)) => {
            u32::try_from(*v).map_err(|_| ScanError::validation(name, "value out of range"))
        }
        _ => Err(ScanError::validation(name, "an integer value is required")),
    }
}

// =============================================================================
// Scan parameters
// =============================================================================

/// Scan geometry and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParameters {
    /// Scanner center, x (µm)
    pub offset_x: f64,
    /// Scanner center, y (µm)
    pub offset_y: f64,
    /// Scan area width (µm)
    pub size_x: f64,
    /// Scan area height (µm)
    pub size_y: f64,
    /// Pixels per line
    pub resolution_width: u32,
    /// Number of lines
    pub resolution_height: u32,
    /// Scan rotation (degrees)
    pub angle: f64,
    /// Integration time per pixel (ms)
    pub ms_per_pixel: f64,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            offset_x: 50.0,
            offset_y: 50.0,
            size_x: 1.0,
            size_y: 1.0,
            resolution_width: 100,
            resolution_height: 100,
            angle: 0.0,
            ms_per_pixel: 9.8,
        }
    }
}

impl ParameterGroup for ScanParameters {
    const GROUP: &'static str = "scan";

    fn layout() -> Vec<FieldSpec> {
        let d = Self::default();
        vec![
            FieldSpec::float("offset_x", "Scanner Center Position X", Some("µm"), 0.0..=100.0, d.offset_x),
            FieldSpec::float("offset_y", "Scanner Center Position Y", Some("µm"), 0.0..=100.0, d.offset_y),
            FieldSpec::float("size_x", "Scan Area X", Some("µm"), 0.0..=100.0, d.size_x),
            FieldSpec::float("size_y", "Scan Area Y", Some("µm"), 0.0..=100.0, d.size_y),
            FieldSpec::integer("resolution_width", "Pixel Area X", 1..=10_000, d.resolution_width.into()),
            FieldSpec::integer("resolution_height", "Pixel Area Y", 1..=10_000, d.resolution_height.into()),
            FieldSpec::float("angle", "Rotation", Some("°"), 0.0..=360.0, d.angle),
            FieldSpec::float("ms_per_pixel", "Integration Time", Some("ms"), 0.4..=1000.4, d.ms_per_pixel),
        ]
    }

    fn from_values(values: &ParamMap) -> ScanResult<Self> {
        Ok(Self {
            offset_x: required_f64(values, "offset_x")?,
            offset_y: required_f64(values, "offset_y")?,
            size_x: required_f64(values, "size_x")?,
            size_y: required_f64(values, "size_y")?,
            resolution_width: required_u32(values, "resolution_width")?,
            resolution_height: required_u32(values, "resolution_height")?,
            angle: required_f64(values, "angle")?,
            ms_per_pixel: required_f64(values, "ms_per_pixel")?,
        })
    }

    fn to_values(&self) -> ParamMap {
        let mut map = ParamMap::new();
        map.insert("offset_x".into(), ParamValue::Float(Some(self.offset_x)));
        map.insert("offset_y".into(), ParamValue::Float(Some(self.offset_y)));
        map.insert("size_x".into(), ParamValue::Float(Some(self.size_x)));
        map.insert("size_y".into(), ParamValue::Float(Some(self.size_y)));
        map.insert("resolution_width".into(), ParamValue::Integer(self.resolution_width.into()));
        map.insert("resolution_height".into(), ParamValue::Integer(self.resolution_height.into()));
        map.insert("angle".into(), ParamValue::Float(Some(self.angle)));
        map.insert("ms_per_pixel".into(), ParamValue::Float(Some(self.ms_per_pixel)));
        map
    }
}

// =============================================================================
// Interferometer parameters
// =============================================================================

/// Fixed interferogram acquisition range: the mirror always travels 800 µm → 0 µm.
pub const INTERFEROMETER_START_POSITION: f64 = 800.0;
/// End of the fixed mirror travel (µm).
pub const INTERFEROMETER_END_POSITION: f64 = 0.0;

/// Interferometer (spectral) acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterferometerParameters {
    /// Mirror center position (µm)
    pub center: f64,
    /// Mirror travel distance (µm)
    pub distance: f64,
    /// Points per interferogram
    pub number_of_points: u32,
    /// Always zero
    #[serde(skip_deserializing)]
    pub number_of_skipped_points: u32,
    /// Fixed mirror start (µm)
    #[serde(skip_deserializing)]
    pub start_position: f64,
    /// Fixed mirror end (µm)
    #[serde(skip_deserializing)]
    pub end_position: f64,
}

impl Default for InterferometerParameters {
    fn default() -> Self {
        Self {
            center: 400.0,
            distance: 800.0,
            number_of_points: 600,
            number_of_skipped_points: 0,
            start_position: INTERFEROMETER_START_POSITION,
            end_position: INTERFEROMETER_END_POSITION,
        }
    }
}

impl ParameterGroup for InterferometerParameters {
    const GROUP: &'static str = "interferometer";

    fn layout() -> Vec<FieldSpec> {
        let d = Self::default();
        vec![
            FieldSpec::float("center", "Interferometer Center", Some("µm"), 0.0..=800.0, d.center),
            FieldSpec::float("distance", "Interferometer Distance", Some("µm"), 0.0..=800.0, d.distance),
            FieldSpec::integer("number_of_points", "Interferogram Points", 1..=10_000, d.number_of_points.into()),
        ]
    }

    fn from_values(values: &ParamMap) -> ScanResult<Self> {
        Ok(Self {
            center: required_f64(values, "center")?,
            distance: required_f64(values, "distance")?,
            number_of_points: required_u32(values, "number_of_points")?,
            ..Self::default()
        })
    }

    fn to_values(&self) -> ParamMap {
        let mut map = ParamMap::new();
        map.insert("center".into(), ParamValue::Float(Some(self.center)));
        map.insert("distance".into(), ParamValue::Float(Some(self.distance)));
        map.insert("number_of_points".into(), ParamValue::Integer(self.number_of_points.into()));
        map.insert(
            "number_of_skipped_points".into(),
            ParamValue::Integer(self.number_of_skipped_points.into()),
        );
        map.insert("start_position".into(), ParamValue::Float(Some(self.start_position)));
        map.insert("end_position".into(), ParamValue::Float(Some(self.end_position)));
        map
    }
}

// =============================================================================
// Merged snapshot
// =============================================================================

/// Both parameter groups, as handed to the instrument worker at measurement start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementParameters {
    /// Scan geometry and timing.
    pub scan: ScanParameters,
    /// Interferometer settings.
    pub interferometer: InterferometerParameters,
}

impl MeasurementParameters {
    /// Combine both group snapshots.
    pub fn merge(scan: ScanParameters, interferometer: InterferometerParameters) -> Self {
        Self {
            scan,
            interferometer,
        }
    }

    /// Flat name → value view of both groups.
    pub fn values(&self) -> ParamMap {
        let mut map = self.scan.to_values();
        map.extend(self.interferometer.to_values());
        map
    }
}

// =============================================================================
// ParameterSet
// =============================================================================

type ChangeListener<P> = Box<dyn Fn(&P) + Send + Sync>;

/// Editable parameter group with change notification.
pub struct ParameterSet<P: ParameterGroup> {
    specs: Vec<FieldSpec>,
    inputs: Vec<FieldInput>,
    snapshot: P,
    value_tx: watch::Sender<P>,
    change_listeners: Vec<ChangeListener<P>>,
    span: Span,
}

impl<P: ParameterGroup> Default for ParameterSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ParameterGroup> ParameterSet<P> {
    /// Create a set with every field at its default.
    pub fn new() -> Self {
        let specs = P::layout();
        let inputs: Vec<FieldInput> = specs.iter().map(FieldSpec::build_input).collect();
        let snapshot = P::from_values(&Self::collect(&inputs)).unwrap_or_default();
        let (value_tx, _) = watch::channel(snapshot.clone());

        Self {
            specs,
            inputs,
            snapshot,
            value_tx,
            change_listeners: Vec::new(),
            span: info_span!("parameters", group = P::GROUP),
        }
    }

    /// Use `span` for this set's log events.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Field layout, in display order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.specs
    }

    /// Input backing the field `name`.
    pub fn input(&self, name: &str) -> Option<&FieldInput> {
        self.inputs.iter().find(|i| i.name() == name)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> P {
        self.snapshot.clone()
    }

    /// Immutable name → value view of the current snapshot.
    pub fn values(&self) -> ParamMap {
        self.snapshot.to_values()
    }

    /// Subscribe to "parameters changed" notifications.
    pub fn subscribe(&self) -> watch::Receiver<P> {
        self.value_tx.subscribe()
    }

    /// Register a callback run after every published change.
    pub fn add_change_listener(&mut self, listener: impl Fn(&P) + Send + Sync + 'static) {
        self.change_listeners.push(Box::new(listener));
    }

    /// Push raw text into a field. Returns whether the text was taken.
    pub fn set_text(&mut self, name: &str, raw: &str) -> ScanResult<bool> {
        Ok(self.input_mut(name)?.set_text(raw))
    }

    /// Confirm a field's text.
    ///
    /// On success the field's edit is forwarded to [`update_field`](Self::update_field).
    /// On a parse failure the field reverts to its last accepted value and the
    /// validation error is returned; no edit is reported.
    pub fn commit(&mut self, name: &str) -> ScanResult<&P> {
        let result = self.input_mut(name)?.commit();
        match result {
            Ok(event) => self.update_field(name, event),
            Err(err) => {
                self.span.in_scope(|| warn!(field = name, error = %err, "input reverted"));
                // a partial entry may revert to a different live-valid value
                if let Ok(derived) = P::from_values(&Self::collect(&self.inputs)) {
                    if derived != self.snapshot {
                        self.publish(derived);
                    }
                }
                Err(err)
            }
        }
    }

    /// Set an integer stepper and report the edit.
    pub fn set_integer(&mut self, name: &str, value: i64) -> ScanResult<&P> {
        let event = match self.input_mut(name)? {
            FieldInput::Stepper(stepper) => {
                stepper.set_value(value);
                stepper.commit()
            }
            FieldInput::Numeric(_) => {
                return Err(ScanError::validation(name, "not an integer parameter"));
            }
        };
        self.update_field(name, event)
    }

    /// Step an integer stepper by `delta` and report the edit.
    pub fn step(&mut self, name: &str, delta: i64) -> ScanResult<&P> {
        let current = match self.input(name) {
            Some(FieldInput::Stepper(stepper)) => stepper.value(),
            Some(FieldInput::Numeric(_)) => {
                return Err(ScanError::validation(name, "not an integer parameter"));
            }
            None => return Err(Self::unknown(name)),
        };
        self.set_integer(name, current.saturating_add(delta))
    }

    /// Handle a field's "edited" notification: re-derive every parameter from the
    /// committed value of its field and publish the full snapshot once.
    pub fn update_field(&mut self, name: &str, event: FieldEvent) -> ScanResult<&P> {
        let derived = P::from_values(&Self::collect(&self.inputs))?;
        let FieldEvent::Edited { value, clamped } = event;
        self.span
            .in_scope(|| debug!(field = name, %value, clamped, "field edited"));
        self.publish(derived);
        Ok(&self.snapshot)
    }

    /// Replace every field from `values` (settings load); values outside a field's
    /// bounds are clamped and non-finite values keep the field's current value.
    /// Publishes a single change.
    pub fn load(&mut self, values: &P) -> ScanResult<&P> {
        let map = values.to_values();
        for input in &mut self.inputs {
            if let Some(value) = map.get(input.name()).and_then(ParamValue::as_f64) {
                if !value.is_finite() {
                    let field = input.name();
                    self.span.in_scope(|| {
                        warn!(field, value, "non-finite value in settings, keeping default")
                    });
                    continue;
                }
                if let FieldEvent::Edited { clamped: true, .. } = input.assign(value)? {
                    let field = input.name();
                    self.span
                        .in_scope(|| warn!(field, value, "loaded value clamped to bounds"));
                }
            }
        }
        let derived = P::from_values(&Self::collect(&self.inputs))?;
        self.publish(derived);
        Ok(&self.snapshot)
    }

    fn publish(&mut self, snapshot: P) {
        self.snapshot = snapshot;
        self.value_tx.send_replace(self.snapshot.clone());
        for listener in &self.change_listeners {
            listener(&self.snapshot);
        }
    }

    fn input_mut(&mut self, name: &str) -> ScanResult<&mut FieldInput> {
        self.inputs
            .iter_mut()
            .find(|i| i.name() == name)
            .ok_or_else(|| Self::unknown(name))
    }

    fn unknown(name: &str) -> ScanError {
        ScanError::validation(name, format!("unknown {} parameter", P::GROUP))
    }

    fn collect(inputs: &[FieldInput]) -> ParamMap {
        inputs
            .iter()
            .map(|i| (i.name().to_string(), i.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn defaults_match_layout() {
        let scan = ParameterSet::<ScanParameters>::new();
        assert_eq!(scan.snapshot(), ScanParameters::default());
        assert_eq!(scan.fields().len(), 8);

        let ifg = ParameterSet::<InterferometerParameters>::new();
        let snapshot = ifg.snapshot();
        assert_eq!(snapshot.number_of_points, 600);
        assert_eq!(snapshot.number_of_skipped_points, 0);
        assert_eq!(snapshot.start_position, 800.0);
        assert_eq!(snapshot.end_position, 0.0);
    }

    #[test]
    fn commit_publishes_full_snapshot() {
        let mut scan = ParameterSet::<ScanParameters>::new();
        let mut rx = scan.subscribe();

        assert!(scan.set_text("size_x", "12.5").unwrap());
        scan.commit("size_x").unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.size_x, 12.5);
        assert_eq!(snapshot.offset_x, 50.0);
    }

    #[test]
    fn out_of_range_commit_is_clamped_in_snapshot() {
        let mut scan = ParameterSet::<ScanParameters>::new();
        scan.set_text("angle", "720").unwrap();
        let snapshot = scan.commit("angle").unwrap().clone();
        assert_eq!(snapshot.angle, 360.0);
        assert_eq!(scan.input("angle").unwrap().display_text(), "360.0");
    }

    #[test]
    fn failed_commit_does_not_notify() {
        let mut scan = ParameterSet::<ScanParameters>::new();
        let mut rx = scan.subscribe();
        rx.borrow_and_update();

        scan.set_text("offset_y", "").unwrap();
        assert!(scan.commit("offset_y").is_err());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(scan.snapshot().offset_y, 50.0);
    }

    #[test]
    fn uncommitted_text_does_not_leak_into_snapshot() {
        let mut scan = ParameterSet::<ScanParameters>::new();
        scan.set_text("offset_x", "10").unwrap();
        scan.set_text("size_y", "3").unwrap();
        let snapshot = scan.commit("size_y").unwrap().clone();
        // offset_x was typed but never committed
        assert_eq!(snapshot.offset_x, 50.0);
        assert_eq!(snapshot.size_y, 3.0);
    }

    #[test]
    fn steppers_clamp_and_notify() {
        let mut scan = ParameterSet::<ScanParameters>::new();
        scan.set_integer("resolution_width", 20_000).unwrap();
        assert_eq!(scan.snapshot().resolution_width, 10_000);
        scan.step("resolution_height", -500).unwrap();
        assert_eq!(scan.snapshot().resolution_height, 1);
        assert!(scan.set_integer("angle", 3).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut ifg = ParameterSet::<InterferometerParameters>::new();
        let err = ifg.set_text("wavelength", "1").unwrap_err();
        assert!(err.to_string().contains("unknown interferometer parameter"));
    }

    #[test]
    fn change_listeners_run_per_edit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut ifg = ParameterSet::<InterferometerParameters>::new();
        ifg.add_change_listener(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        ifg.set_text("center", "300").unwrap();
        ifg.commit("center").unwrap();
        ifg.set_integer("number_of_points", 256).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(ifg.snapshot().center, 300.0);
        assert_eq!(ifg.snapshot().number_of_points, 256);
    }

    #[test]
    fn instances_do_not_share_state() {
        let mut first = ParameterSet::<ScanParameters>::new();
        let second = ParameterSet::<ScanParameters>::new();
        first.set_text("offset_x", "1").unwrap();
        first.commit("offset_x").unwrap();
        assert_eq!(first.snapshot().offset_x, 1.0);
        assert_eq!(second.snapshot().offset_x, 50.0);
    }

    #[test]
    fn load_clamps_and_publishes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut scan = ParameterSet::<ScanParameters>::new();
        scan.add_change_listener(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let stored = ScanParameters {
            size_x: 250.0,
            resolution_width: 0,
            ms_per_pixel: 20.0,
            ..ScanParameters::default()
        };
        let loaded = scan.load(&stored).unwrap().clone();

        assert_eq!(loaded.size_x, 100.0);
        assert_eq!(loaded.resolution_width, 1);
        assert_eq!(loaded.ms_per_pixel, 20.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_keeps_default_for_non_finite_values() {
        let mut scan = ParameterSet::<ScanParameters>::new();
        let stored = ScanParameters {
            offset_x: 12.5,
            angle: f64::INFINITY,
            size_y: f64::NAN,
            ..ScanParameters::default()
        };
        let loaded = scan.load(&stored).unwrap().clone();

        assert_eq!(loaded.offset_x, 12.5);
        assert_eq!(loaded.angle, ScanParameters::default().angle);
        assert_eq!(loaded.size_y, ScanParameters::default().size_y);
    }

    #[test]
    fn merged_values_cover_both_groups() {
        let merged = MeasurementParameters::default();
        let values = merged.values();
        assert_eq!(values.len(), 14);
        assert_eq!(values["ms_per_pixel"], ParamValue::Float(Some(9.8)));
        assert_eq!(values["number_of_points"], ParamValue::Integer(600));
    }

    #[test]
    fn missing_field_is_a_validation_error() {
        let mut values = ScanParameters::default().to_values();
        values.remove("ms_per_pixel");
        assert!(matches!(
            ScanParameters::from_values(&values),
            Err(ScanError::Validation { .. })
        ));
    }
}

//! Editable pass parameters.
//!
//! Parameter structs describe their fields to a [`ParamVisitor`] by hand,
//! one call per field with its name, a mutable reference and its valid
//! range. UI builders use [`FieldCollector`] to discover fields; edits go
//! through [`set_param`], which clamps to the declared range.
//!
//! # Example
//!
//! ```
//! use raylane::params::{set_param, ParamValue, ShadowParams};
//!
//! let mut shadow = ShadowParams::default();
//! set_param(&mut shadow, "samples", ParamValue::U32(500));
//! assert_eq!(shadow.samples, 128);
//! ```

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Type tag of a parameter field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    F32,
    U32,
    Bool,
    Choice,
}

/// A value to write into a parameter field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamValue {
    F32(f32),
    U32(u32),
    Bool(bool),
    Choice(usize),
}

/// Visits the fields of a parameter struct.
pub trait ParamVisitor {
    fn f32(&mut self, name: &'static str, value: &mut f32, range: RangeInclusive<f32>);
    fn u32(&mut self, name: &'static str, value: &mut u32, range: RangeInclusive<u32>);
    fn bool(&mut self, name: &'static str, value: &mut bool);
    /// `value` indexes into `options`.
    fn choice(&mut self, name: &'static str, value: &mut usize, options: &'static [&'static str]);
}

/// A struct whose fields can be listed and edited through a visitor.
pub trait Params {
    /// Group name shown by UI builders.
    fn title(&self) -> &'static str;
    fn visit(&mut self, visitor: &mut dyn ParamVisitor);
}

/// Clamps every field into its declared range.
pub struct ClampVisitor;

impl ParamVisitor for ClampVisitor {
    fn f32(&mut self, _name: &'static str, value: &mut f32, range: RangeInclusive<f32>) {
        if value.is_nan() {
            *value = *range.start();
        }
        *value = value.clamp(*range.start(), *range.end());
    }

    fn u32(&mut self, _name: &'static str, value: &mut u32, range: RangeInclusive<u32>) {
        *value = (*value).clamp(*range.start(), *range.end());
    }

    fn bool(&mut self, _name: &'static str, _value: &mut bool) {}

    fn choice(&mut self, _name: &'static str, value: &mut usize, options: &'static [&'static str]) {
        *value = (*value).min(options.len().saturating_sub(1));
    }
}

/// Description of one field, for UI builders.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub kind: ParamKind,
    pub min: f64,
    pub max: f64,
    /// Option labels for [`ParamKind::Choice`] fields.
    pub options: &'static [&'static str],
}

/// Lists the fields of a parameter struct.
#[derive(Default)]
pub struct FieldCollector {
    pub fields: Vec<FieldInfo>,
}

impl FieldCollector {
    pub fn collect(params: &mut dyn Params) -> Vec<FieldInfo> {
        let mut collector = Self::default();
        params.visit(&mut collector);
        collector.fields
    }
}

impl ParamVisitor for FieldCollector {
    fn f32(&mut self, name: &'static str, _value: &mut f32, range: RangeInclusive<f32>) {
        self.fields.push(FieldInfo {
            name,
            kind: ParamKind::F32,
            min: *range.start() as f64,
            max: *range.end() as f64,
            options: &[],
        });
    }

    fn u32(&mut self, name: &'static str, _value: &mut u32, range: RangeInclusive<u32>) {
        self.fields.push(FieldInfo {
            name,
            kind: ParamKind::U32,
            min: *range.start() as f64,
            max: *range.end() as f64,
            options: &[],
        });
    }

    fn bool(&mut self, name: &'static str, _value: &mut bool) {
        self.fields.push(FieldInfo {
            name,
            kind: ParamKind::Bool,
            min: 0.0,
            max: 1.0,
            options: &[],
        });
    }

    fn choice(&mut self, name: &'static str, _value: &mut usize, options: &'static [&'static str]) {
        self.fields.push(FieldInfo {
            name,
            kind: ParamKind::Choice,
            min: 0.0,
            max: options.len().saturating_sub(1) as f64,
            options,
        });
    }
}

struct SetVisitor {
    name: &'static str,
    value: ParamValue,
    found: bool,
}

impl ParamVisitor for SetVisitor {
    fn f32(&mut self, name: &'static str, value: &mut f32, range: RangeInclusive<f32>) {
        if let (true, ParamValue::F32(v)) = (name == self.name, self.value) {
            *value = v;
            ClampVisitor.f32(name, value, range);
            self.found = true;
        }
    }

    fn u32(&mut self, name: &'static str, value: &mut u32, range: RangeInclusive<u32>) {
        if let (true, ParamValue::U32(v)) = (name == self.name, self.value) {
            *value = v;
            ClampVisitor.u32(name, value, range);
            self.found = true;
        }
    }

    fn bool(&mut self, name: &'static str, value: &mut bool) {
        if let (true, ParamValue::Bool(v)) = (name == self.name, self.value) {
            *value = v;
            self.found = true;
        }
    }

    fn choice(&mut self, name: &'static str, value: &mut usize, options: &'static [&'static str]) {
        if let (true, ParamValue::Choice(v)) = (name == self.name, self.value) {
            *value = v;
            ClampVisitor.choice(name, value, options);
            self.found = true;
        }
    }
}

/// Writes `value` into the field called `name`, clamped to its range.
///
/// Returns `false` when no field of that name and type exists.
pub fn set_param(params: &mut dyn Params, name: &'static str, value: ParamValue) -> bool {
    let mut visitor = SetVisitor {
        name,
        value,
        found: false,
    };
    params.visit(&mut visitor);
    visitor.found
}

/// Clamps every field of `params` into range.
pub fn clamp_all(params: &mut dyn Params) {
    params.visit(&mut ClampVisitor);
}

// ============================================================================
// Parameter structs
// ============================================================================

/// Shadow ray settings. `samples` changes the dispatch shape.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowParams {
    pub samples: u32,
}

impl Default for ShadowParams {
    fn default() -> Self {
        Self { samples: 1 }
    }
}

impl Params for ShadowParams {
    fn title(&self) -> &'static str {
        "Shadows"
    }

    fn visit(&mut self, v: &mut dyn ParamVisitor) {
        v.u32("samples", &mut self.samples, 1..=128);
    }
}

/// Cloud layer shape and lighting, plus wind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudParams {
    pub offset_y: f32,
    pub height_a: f32,
    pub height_b: f32,
    pub absorption: f32,
    pub threshold: f32,
    pub multiplier: f32,
    pub scale_xz: f32,
    pub scale_y: f32,
    pub samples: u32,
    pub light_samples: u32,
    pub wind_direction_x: f32,
    pub wind_direction_z: f32,
    pub wind_speed: f32,
}

impl Default for CloudParams {
    fn default() -> Self {
        Self {
            offset_y: 0.0,
            height_a: 20.0,
            height_b: 61.0,
            absorption: 0.95,
            threshold: 0.40,
            multiplier: 0.358,
            scale_xz: 5.2,
            scale_y: 3.9,
            samples: 96,
            light_samples: 32,
            wind_direction_x: -0.43,
            wind_direction_z: -1.0,
            wind_speed: 2.0,
        }
    }
}

impl Params for CloudParams {
    fn title(&self) -> &'static str {
        "Clouds"
    }

    fn visit(&mut self, v: &mut dyn ParamVisitor) {
        v.u32("samples", &mut self.samples, 0..=256);
        v.u32("light_samples", &mut self.light_samples, 0..=64);
        v.f32("absorption", &mut self.absorption, 0.0..=1.0);
        v.f32("threshold", &mut self.threshold, 0.0..=1.0);
        v.f32("multiplier", &mut self.multiplier, 0.0..=2.0);
        v.f32("height_a", &mut self.height_a, -1000.0..=1000.0);
        v.f32("height_b", &mut self.height_b, -1000.0..=1000.0);
        v.f32("scale_xz", &mut self.scale_xz, 0.01..=16.0);
        v.f32("scale_y", &mut self.scale_y, 0.01..=16.0);
        v.f32("offset_y", &mut self.offset_y, -100.0..=100.0);
        v.f32("wind_direction_x", &mut self.wind_direction_x, -1.0..=1.0);
        v.f32("wind_direction_z", &mut self.wind_direction_z, -1.0..=1.0);
        v.f32("wind_speed", &mut self.wind_speed, 0.1..=10.0);
    }
}

/// Worley noise generation settings: three octaves of feature points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    pub persistence: f32,
    pub inverted: bool,
    /// Feature points per axis for each octave.
    pub points: [[u32; 3]; 3],
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            persistence: 2.64,
            inverted: false,
            points: [[47, 61, 46], [53, 35, 45], [18, 53, 22]],
        }
    }
}

impl Params for NoiseParams {
    fn title(&self) -> &'static str {
        "Cloud noise"
    }

    fn visit(&mut self, v: &mut dyn ParamVisitor) {
        const NAMES: [[&str; 3]; 3] = [
            ["points_x0", "points_y0", "points_z0"],
            ["points_x1", "points_y1", "points_z1"],
            ["points_x2", "points_y2", "points_z2"],
        ];
        v.f32("persistence", &mut self.persistence, 0.1..=10.0);
        v.bool("inverted", &mut self.inverted);
        for (octave, names) in self.points.iter_mut().zip(NAMES) {
            for (value, name) in octave.iter_mut().zip(names) {
                v.u32(name, value, 1..=128);
            }
        }
    }
}

/// What the composite pass displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayType {
    #[default]
    Default,
    RayDirection,
    Normal,
    Uv,
    Object,
    Primitive,
    Material,
    Albedo,
    Metallic,
    Ambient,
    Roughness,
    Emissive,
    Transparency,
    Sky,
}

impl DisplayType {
    pub const ALL: [DisplayType; 14] = [
        DisplayType::Default,
        DisplayType::RayDirection,
        DisplayType::Normal,
        DisplayType::Uv,
        DisplayType::Object,
        DisplayType::Primitive,
        DisplayType::Material,
        DisplayType::Albedo,
        DisplayType::Metallic,
        DisplayType::Ambient,
        DisplayType::Roughness,
        DisplayType::Emissive,
        DisplayType::Transparency,
        DisplayType::Sky,
    ];

    pub const LABELS: [&'static str; 14] = [
        "Default",
        "Ray direction",
        "Normal",
        "Uv",
        "Object",
        "Primitive",
        "Material",
        "Albedo",
        "Metallic",
        "Ambient",
        "Roughness",
        "Emissive",
        "Transparency",
        "Sky",
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|d| *d == self).unwrap_or(0)
    }
}

/// Debug display options for the composite pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugParams {
    pub display: DisplayType,
    pub nan_only: bool,
}

impl Params for DebugParams {
    fn title(&self) -> &'static str {
        "Debug"
    }

    fn visit(&mut self, v: &mut dyn ParamVisitor) {
        let mut index = self.display.index();
        v.choice("display_type", &mut index, &DisplayType::LABELS);
        self.display = DisplayType::ALL[index.min(DisplayType::ALL.len() - 1)];
        v.bool("display_nan_only", &mut self.nan_only);
    }
}

/// Camera settings exposed to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParams {
    pub fov: f32,
    pub speed: f32,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            fov: 70.0,
            speed: 5.0,
        }
    }
}

impl Params for CameraParams {
    fn title(&self) -> &'static str {
        "Camera"
    }

    fn visit(&mut self, v: &mut dyn ParamVisitor) {
        v.f32("fov", &mut self.fov, 10.0..=150.0);
        v.f32("speed", &mut self.speed, 0.1..=100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_param_clamps() {
        let mut shadow = ShadowParams::default();
        assert!(set_param(&mut shadow, "samples", ParamValue::U32(0)));
        assert_eq!(shadow.samples, 1);
        assert!(set_param(&mut shadow, "samples", ParamValue::U32(64)));
        assert_eq!(shadow.samples, 64);
    }

    #[test]
    fn set_param_rejects_wrong_type_or_name() {
        let mut shadow = ShadowParams::default();
        assert!(!set_param(&mut shadow, "samples", ParamValue::F32(3.0)));
        assert!(!set_param(&mut shadow, "bogus", ParamValue::U32(3)));
        assert_eq!(shadow, ShadowParams::default());
    }

    #[test]
    fn collector_lists_noise_fields() {
        let fields = FieldCollector::collect(&mut NoiseParams::default());
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[0].name, "persistence");
        assert_eq!(fields[1].kind, ParamKind::Bool);
        assert!(fields[2..].iter().all(|f| f.min == 1.0 && f.max == 128.0));
    }

    #[test]
    fn debug_choice_maps_to_display_type() {
        let mut debug = DebugParams::default();
        assert!(set_param(&mut debug, "display_type", ParamValue::Choice(2)));
        assert_eq!(debug.display, DisplayType::Normal);
        set_param(&mut debug, "display_type", ParamValue::Choice(99));
        assert_eq!(debug.display, DisplayType::Sky);
    }

    #[test]
    fn clamp_all_repairs_loaded_values() {
        let mut clouds = CloudParams {
            absorption: 3.0,
            wind_speed: f32::NAN,
            ..Default::default()
        };
        clamp_all(&mut clouds);
        assert_eq!(clouds.absorption, 1.0);
        assert_eq!(clouds.wind_speed, 0.1);
    }

    #[test]
    fn defaults_are_in_range() {
        let mut clouds = CloudParams::default();
        clamp_all(&mut clouds);
        assert_eq!(clouds, CloudParams::default());
        let mut noise = NoiseParams::default();
        clamp_all(&mut noise);
        assert_eq!(noise, NoiseParams::default());
    }
}

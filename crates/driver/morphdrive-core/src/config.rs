//! Compiler limits and naming knobs.

use serde::{Deserialize, Serialize};

use morphdrive_api_core::TransformKind;

/// Limits and naming used by one compilation pass.
/// Every field has a default so partial JSON documents load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Hard cap on a property driver's expression text.
    pub max_expression_size: usize,
    /// Budget for bone-driven and sum-batch text before multiplier wrapping.
    pub max_expr_len: usize,
    /// Absolute ceiling for a piecewise spline; exceeding it is fatal.
    pub max_spline_len: usize,
    /// Terms per sum-driver sub-channel.
    pub max_terms: usize,
    /// Terms rendered inline per overflow chain level.
    pub max_inline_terms: usize,
    pub coefficient_decimals: usize,
    /// Bone-driver coefficients below this render as zero and are dropped.
    pub min_factor: f64,
    /// Extend single-letter variable names with `aa`..`zz`.
    pub two_letter_names: bool,

    pub property_default: f64,
    pub property_min: f64,
    pub property_max: f64,
    /// Range of compiler-owned auxiliary channels (rest levels, sum batches).
    pub aux_min: f64,
    pub aux_max: f64,

    /// Constant-one property referenced by aggregates whose rest value is 1.
    pub unity_property: String,
    /// Slider scaling every translation sum batch.
    pub translation_strength_property: String,
    pub max_property_name: usize,

    pub units: UnitScale,
    pub diagnostics: DiagnosticsCfg,
}

/// Host-to-formula scale per transform kind (e.g. radians to degrees).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitScale {
    pub location: f64,
    pub rotation: f64,
    pub scale: f64,
}

impl Default for UnitScale {
    fn default() -> Self {
        Self {
            location: 1.0,
            rotation: 1.0,
            scale: 1.0,
        }
    }
}

impl UnitScale {
    pub fn for_kind(&self, kind: TransformKind) -> f64 {
        match kind {
            TransformKind::Location => self.location,
            TransformKind::Rotation => self.rotation,
            TransformKind::Scale => self.scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsCfg {
    /// Keep diagnostics for the end-of-pass report (they are logged either way).
    pub enabled: bool,
    /// Subjects listed per category in the rendered report.
    pub max_subjects: usize,
}

impl Default for DiagnosticsCfg {
    fn default() -> Self {
        DiagnosticsCfg {
            enabled: true,
            max_subjects: 10,
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_expression_size: 255,
            max_expr_len: 240,
            max_spline_len: 254,
            max_terms: 12,
            max_inline_terms: 9,
            coefficient_decimals: 3,
            min_factor: 5e-4,
            two_letter_names: true,
            property_default: 0.0,
            property_min: -1.0,
            property_max: 1.0,
            aux_min: -1.0e4,
            aux_max: 1.0e4,
            unity_property: "Unity".to_string(),
            translation_strength_property: "Translation Strength".to_string(),
            max_property_name: 63,
            units: UnitScale::default(),
            diagnostics: DiagnosticsCfg::default(),
        }
    }
}

impl CompilerConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Cut a derived channel name to the host's property-name limit.
    pub fn truncate_name(&self, name: &str) -> String {
        name.chars().take(self.max_property_name).collect()
    }
}

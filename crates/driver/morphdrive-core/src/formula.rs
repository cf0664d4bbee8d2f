//! Formula definitions as delivered by the morph loader, and the terms derived from them.

use serde::{Deserialize, Serialize};

use morphdrive_api_core::{ChannelRef, TransformKind, TransformReading, VarSource};

/// How a formula combines with the other formulas on the same output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaStage {
    #[default]
    Sum,
    /// Multiplicative stage; clamped to [0, 1] and multiplied in.
    Mult,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormulaSource {
    /// Rig custom property, by name.
    Property { name: String },
    BoneTransform {
        bone: String,
        kind: TransformKind,
        component: u8,
    },
}

/// One parsed formula: `output += factor * source` (or a spline of `source`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub output: ChannelRef,
    pub source: FormulaSource,
    #[serde(default = "unit_factor")]
    pub factor: f64,
    #[serde(default)]
    pub spline: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    pub stage: FormulaStage,
}

fn unit_factor() -> f64 {
    1.0
}

impl Formula {
    pub fn property(output: ChannelRef, name: impl Into<String>, factor: f64) -> Self {
        Self {
            output,
            source: FormulaSource::Property { name: name.into() },
            factor,
            spline: None,
            stage: FormulaStage::Sum,
        }
    }

    pub fn bone(
        output: ChannelRef,
        bone: impl Into<String>,
        kind: TransformKind,
        component: u8,
        factor: f64,
    ) -> Self {
        Self {
            output,
            source: FormulaSource::BoneTransform {
                bone: bone.into(),
                kind,
                component,
            },
            factor,
            spline: None,
            stage: FormulaStage::Sum,
        }
    }

    pub fn with_spline(mut self, points: Vec<(f64, f64)>) -> Self {
        self.spline = Some(points);
        self
    }

    pub fn with_stage(mut self, stage: FormulaStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn term(&self) -> Term {
        let source = match &self.source {
            FormulaSource::Property { name } => TermSource::Property {
                channel: ChannelRef::property(name.clone()),
            },
            FormulaSource::BoneTransform {
                bone,
                kind,
                component,
            } => TermSource::BoneTransform {
                bone: bone.clone(),
                kind: *kind,
                component: *component,
            },
        };
        Term {
            source,
            factor: self.factor,
            spline: self.spline.clone(),
            stage: self.stage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TermSource {
    Property { channel: ChannelRef },
    BoneTransform {
        bone: String,
        kind: TransformKind,
        component: u8,
    },
}

/// A single contribution to an output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub source: TermSource,
    pub factor: f64,
    #[serde(default)]
    pub spline: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    pub stage: FormulaStage,
}

impl Term {
    pub fn property(channel: ChannelRef, factor: f64) -> Self {
        Self {
            source: TermSource::Property { channel },
            factor,
            spline: None,
            stage: FormulaStage::Sum,
        }
    }

    pub fn bone(bone: impl Into<String>, kind: TransformKind, component: u8, factor: f64) -> Self {
        Self {
            source: TermSource::BoneTransform {
                bone: bone.into(),
                kind,
                component,
            },
            factor,
            spline: None,
            stage: FormulaStage::Sum,
        }
    }

    pub fn with_spline(mut self, points: Vec<(f64, f64)>) -> Self {
        self.spline = Some(points);
        self
    }

    pub fn with_stage(mut self, stage: FormulaStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn is_bone(&self) -> bool {
        matches!(self.source, TermSource::BoneTransform { .. })
    }

    pub fn bone_name(&self) -> Option<&str> {
        match &self.source {
            TermSource::BoneTransform { bone, .. } => Some(bone),
            TermSource::Property { .. } => None,
        }
    }

    /// Variable source for a property term.
    pub fn var_source(&self) -> Option<VarSource> {
        match &self.source {
            TermSource::Property { channel } => Some(VarSource::channel(channel.clone())),
            TermSource::BoneTransform { .. } => None,
        }
    }

    /// Reading of the source bone on its own component (before basis projection).
    pub fn reading(&self) -> Option<TransformReading> {
        match &self.source {
            TermSource::BoneTransform {
                bone,
                kind,
                component,
            } => Some(TransformReading::local(bone.clone(), *kind, *component)),
            TermSource::Property { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_json_defaults() {
        let f: Formula = serde_json::from_str(
            r#"{
                "output": "Genesis8:key_blocks[\"pJCMElbowBend\"].value",
                "source": {"type": "bone_transform", "bone": "lForearm", "kind": "rotation", "component": 0},
                "spline": [[0, 0], [135, 1]]
            }"#,
        )
        .unwrap();
        assert_eq!(f.factor, 1.0);
        assert_eq!(f.stage, FormulaStage::Sum);
        let t = f.term();
        assert!(t.is_bone());
        assert_eq!(t.bone_name(), Some("lForearm"));
        assert_eq!(t.spline.as_deref(), Some(&[(0.0, 0.0), (135.0, 1.0)][..]));
    }

    #[test]
    fn property_formula_term_reads_rig_property() {
        let f = Formula::property(ChannelRef::property("Smile"), "eCTRLSmile", -0.5);
        let t = f.term();
        assert_eq!(
            t.var_source(),
            Some(VarSource::channel(ChannelRef::property("eCTRLSmile")))
        );
        assert_eq!(t.factor, -0.5);
    }
}

//! Driver expressions as stored on a channel: text plus variable bindings.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelRef, TransformKind};

/// Coordinate space in which a bone transform is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransformSpace {
    /// The bone's own local channel value.
    #[default]
    Local,
    /// Accumulated through the parent chain (cumulative scale, world-aligned rotation).
    Pose,
}

/// One transform component of a bone as seen by a driver variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformReading {
    pub bone: String,
    pub kind: TransformKind,
    pub component: u8,
    #[serde(default)]
    pub space: TransformSpace,
}

impl TransformReading {
    pub fn local(bone: impl Into<String>, kind: TransformKind, component: u8) -> Self {
        Self {
            bone: bone.into(),
            kind,
            component,
            space: TransformSpace::Local,
        }
    }

    pub fn pose(bone: impl Into<String>, kind: TransformKind, component: u8) -> Self {
        Self {
            bone: bone.into(),
            kind,
            component,
            space: TransformSpace::Pose,
        }
    }
}

/// What a driver variable reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VarSource {
    /// Single scalar property read.
    Channel { channel: ChannelRef },
    /// Bone transform component read.
    Transform { reading: TransformReading },
}

impl VarSource {
    pub fn channel(channel: ChannelRef) -> Self {
        VarSource::Channel { channel }
    }

    pub fn transform(reading: TransformReading) -> Self {
        VarSource::Transform { reading }
    }

    pub fn is_transform(&self) -> bool {
        matches!(self, VarSource::Transform { .. })
    }

    pub fn as_channel(&self) -> Option<&ChannelRef> {
        match self {
            VarSource::Channel { channel } => Some(channel),
            VarSource::Transform { .. } => None,
        }
    }

    pub fn as_reading(&self) -> Option<&TransformReading> {
        match self {
            VarSource::Transform { reading } => Some(reading),
            VarSource::Channel { .. } => None,
        }
    }
}

/// Named variable scoped to one expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableBinding {
    pub name: String,
    pub source: VarSource,
}

impl VariableBinding {
    pub fn new(name: impl Into<String>, source: VarSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// Scripted driver: expression text evaluated by the host over its bindings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Expression {
    pub text: String,
    #[serde(default)]
    pub bindings: Vec<VariableBinding>,
}

impl Expression {
    pub fn new(text: impl Into<String>, bindings: Vec<VariableBinding>) -> Self {
        Self {
            text: text.into(),
            bindings,
        }
    }

    pub fn binding(&self, name: &str) -> Option<&VariableBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub fn binding_for(&self, source: &VarSource) -> Option<&VariableBinding> {
        self.bindings.iter().find(|b| &b.source == source)
    }

    pub fn transform_bindings(&self) -> impl Iterator<Item = &VariableBinding> {
        self.bindings.iter().filter(|b| b.source.is_transform())
    }

    pub fn has_transform_bindings(&self) -> bool {
        self.bindings.iter().any(|b| b.source.is_transform())
    }

    /// True when the text names `name` as a whole identifier.
    pub fn references(&self, name: &str) -> bool {
        identifiers(&self.text).any(|ident| ident == name)
    }

    /// Drop bindings whose name no longer appears in the text. Returns the number removed.
    pub fn prune_unused(&mut self) -> usize {
        let before = self.bindings.len();
        let text = std::mem::take(&mut self.text);
        self.bindings
            .retain(|b| identifiers(&text).any(|ident| ident == b.name));
        self.text = text;
        before - self.bindings.len()
    }
}

/// Iterate over the identifiers appearing in driver text, skipping numeric literals.
pub fn identifiers(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() {
            let c = bytes[pos];
            if c.is_ascii_alphabetic() || c == b'_' {
                let start = pos;
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                return Some(&text[start..pos]);
            }
            if c.is_ascii_digit() || c == b'.' {
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                    pos += 1;
                }
                continue;
            }
            pos += 1;
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_skip_numbers_and_keywords_stay() {
        let ids: Vec<&str> = identifiers("(0.5 if a<1.25 else 2*ab+R)").collect();
        assert_eq!(ids, vec!["if", "a", "else", "ab", "R"]);
    }

    #[test]
    fn prune_removes_dangling_bindings() {
        let mut e = Expression::new(
            "2*a+b",
            vec![
                VariableBinding::new("a", VarSource::channel(ChannelRef::property("x"))),
                VariableBinding::new("b", VarSource::channel(ChannelRef::property("y"))),
                VariableBinding::new("c", VarSource::channel(ChannelRef::property("z"))),
            ],
        );
        assert_eq!(e.prune_unused(), 1);
        assert!(e.binding("c").is_none());
        assert!(e.references("b"));
        assert!(!e.references("c"));
    }

    #[test]
    fn whole_identifier_match_only() {
        let e = Expression::new("aa+1", Vec::new());
        assert!(!e.references("a"));
        assert!(e.references("aa"));
    }
}

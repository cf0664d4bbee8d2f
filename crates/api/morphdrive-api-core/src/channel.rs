//! Channel addressing: parsing and formatting of animatable scalar channels.
//!
//! Grammar (one scalar channel per path):
//!   `["Prop"]`                               -> rig (object) custom property
//!   `data["Prop"]`                           -> armature-data custom property
//!   `pose.bones["Bone"].rotation_euler[1]`   -> pose-bone transform component
//!   `Mesh:key_blocks["Smile"].value`         -> shape-key value on a mesh
//!
//! Names are quoted and may contain spaces, but never a double quote. Paths
//! serialize as strings so ledgers and fixtures stay human readable.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Transform property of a pose bone that can carry a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformChannel {
    Location,
    RotationEuler,
    RotationQuaternion,
    Scale,
}

impl TransformChannel {
    pub const ALL: [TransformChannel; 4] = [
        TransformChannel::Location,
        TransformChannel::RotationEuler,
        TransformChannel::RotationQuaternion,
        TransformChannel::Scale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransformChannel::Location => "location",
            TransformChannel::RotationEuler => "rotation_euler",
            TransformChannel::RotationQuaternion => "rotation_quaternion",
            TransformChannel::Scale => "scale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// Number of addressable components (4 for quaternions, 3 otherwise).
    pub fn arity(&self) -> u8 {
        match self {
            TransformChannel::RotationQuaternion => 4,
            _ => 3,
        }
    }

    /// Short tag used when deriving auxiliary channel names.
    pub fn abbreviation(&self) -> &'static str {
        match self {
            TransformChannel::Location => "Loc",
            TransformChannel::RotationEuler => "Rot",
            TransformChannel::RotationQuaternion => "Quat",
            TransformChannel::Scale => "Sca",
        }
    }

    pub fn kind(&self) -> TransformKind {
        match self {
            TransformChannel::Location => TransformKind::Location,
            TransformChannel::RotationEuler | TransformChannel::RotationQuaternion => {
                TransformKind::Rotation
            }
            TransformChannel::Scale => TransformKind::Scale,
        }
    }

    /// Value of the component when nothing drives it.
    pub fn rest_value(&self, index: u8) -> f64 {
        match (self, index) {
            (TransformChannel::Scale, _) => 1.0,
            (TransformChannel::RotationQuaternion, 0) => 1.0,
            _ => 0.0,
        }
    }
}

/// Physical quantity read or written on a bone, independent of rotation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    #[serde(alias = "translation")]
    Location,
    Rotation,
    Scale,
}

impl TransformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformKind::Location => "location",
            TransformKind::Rotation => "rotation",
            TransformKind::Scale => "scale",
        }
    }

    /// Host transform-type tag for component `index` (`LOC_X`, `ROT_Z`, ...).
    pub fn transform_type(&self, index: u8) -> String {
        let prefix = match self {
            TransformKind::Location => "LOC",
            TransformKind::Rotation => "ROT",
            TransformKind::Scale => "SCALE",
        };
        let axis = match index {
            0 => "X",
            1 => "Y",
            2 => "Z",
            _ => "W",
        };
        format!("{prefix}_{axis}")
    }
}

/// Uniquely addressable scalar channel on the rig or one of its meshes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelRef {
    RigProperty {
        name: String,
    },
    DataProperty {
        name: String,
    },
    BoneTransform {
        bone: String,
        channel: TransformChannel,
        index: u8,
    },
    ShapeKey {
        mesh: String,
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty channel path")]
    Empty,
    #[error("unterminated quoted name in '{0}'")]
    Unterminated(String),
    #[error("empty name in '{0}'")]
    EmptyName(String),
    #[error("unknown transform channel '{channel}' in '{path}'")]
    UnknownChannel { channel: String, path: String },
    #[error("index {index} out of range for '{channel}'")]
    IndexOutOfRange { channel: String, index: u32 },
    #[error("malformed channel path '{0}'")]
    Malformed(String),
}

const BONE_PREFIX: &str = "pose.bones[";
const DATA_PREFIX: &str = "data[";
const KEY_BLOCKS: &str = ":key_blocks[";
const KEY_SUFFIX: &str = ".value";

/// Split `["name"]rest` into (`name`, `rest`).
fn split_quoted<'a>(s: &'a str, path: &str) -> Result<(&'a str, &'a str), PathError> {
    let inner = s
        .strip_prefix("[\"")
        .ok_or_else(|| PathError::Malformed(path.to_string()))?;
    let end = inner
        .find("\"]")
        .ok_or_else(|| PathError::Unterminated(path.to_string()))?;
    let name = &inner[..end];
    if name.is_empty() {
        return Err(PathError::EmptyName(path.to_string()));
    }
    Ok((name, &inner[end + 2..]))
}

impl ChannelRef {
    pub fn property(name: impl Into<String>) -> Self {
        ChannelRef::RigProperty { name: name.into() }
    }

    pub fn data_property(name: impl Into<String>) -> Self {
        ChannelRef::DataProperty { name: name.into() }
    }

    pub fn bone(bone: impl Into<String>, channel: TransformChannel, index: u8) -> Self {
        ChannelRef::BoneTransform {
            bone: bone.into(),
            channel,
            index,
        }
    }

    pub fn shape_key(mesh: impl Into<String>, key: impl Into<String>) -> Self {
        ChannelRef::ShapeKey {
            mesh: mesh.into(),
            key: key.into(),
        }
    }

    /// Parse a path string according to the grammar described above.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        if s.starts_with("[\"") {
            let (name, rest) = split_quoted(s, s)?;
            if !rest.is_empty() {
                return Err(PathError::Malformed(s.to_string()));
            }
            return Ok(ChannelRef::property(name));
        }
        if s.starts_with(DATA_PREFIX) {
            let (name, rest) = split_quoted(&s[DATA_PREFIX.len() - 1..], s)?;
            if !rest.is_empty() {
                return Err(PathError::Malformed(s.to_string()));
            }
            return Ok(ChannelRef::data_property(name));
        }
        if s.starts_with(BONE_PREFIX) {
            let (bone, rest) = split_quoted(&s[BONE_PREFIX.len() - 1..], s)?;
            let rest = rest
                .strip_prefix('.')
                .ok_or_else(|| PathError::Malformed(s.to_string()))?;
            let open = rest
                .find('[')
                .ok_or_else(|| PathError::Malformed(s.to_string()))?;
            let channel_name = &rest[..open];
            let channel =
                TransformChannel::parse(channel_name).ok_or_else(|| PathError::UnknownChannel {
                    channel: channel_name.to_string(),
                    path: s.to_string(),
                })?;
            let index_str = rest[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| PathError::Malformed(s.to_string()))?;
            let index: u32 = index_str
                .parse()
                .map_err(|_| PathError::Malformed(s.to_string()))?;
            if index >= u32::from(channel.arity()) {
                return Err(PathError::IndexOutOfRange {
                    channel: channel_name.to_string(),
                    index,
                });
            }
            return Ok(ChannelRef::bone(bone, channel, index as u8));
        }
        if let Some(pos) = s.find(KEY_BLOCKS) {
            let mesh = &s[..pos];
            if mesh.is_empty() || mesh.contains('"') {
                return Err(PathError::Malformed(s.to_string()));
            }
            let (key, rest) = split_quoted(&s[pos + KEY_BLOCKS.len() - 1..], s)?;
            if rest != KEY_SUFFIX {
                return Err(PathError::Malformed(s.to_string()));
            }
            return Ok(ChannelRef::shape_key(mesh, key));
        }
        Err(PathError::Malformed(s.to_string()))
    }

    /// Short human name used when deriving auxiliary channel names.
    pub fn label(&self) -> String {
        match self {
            ChannelRef::RigProperty { name } | ChannelRef::DataProperty { name } => name.clone(),
            ChannelRef::BoneTransform {
                bone,
                channel,
                index,
            } => format!("{bone}:{}{index}", channel.abbreviation()),
            ChannelRef::ShapeKey { key, .. } => key.clone(),
        }
    }

    pub fn bone_name(&self) -> Option<&str> {
        match self {
            ChannelRef::BoneTransform { bone, .. } => Some(bone),
            _ => None,
        }
    }

    pub fn transform_channel(&self) -> Option<(TransformChannel, u8)> {
        match self {
            ChannelRef::BoneTransform { channel, index, .. } => Some((*channel, *index)),
            _ => None,
        }
    }

    pub fn is_bone_transform(&self) -> bool {
        matches!(self, ChannelRef::BoneTransform { .. })
    }

    /// Property name when the channel is a rig or data custom property.
    pub fn property_name(&self) -> Option<&str> {
        match self {
            ChannelRef::RigProperty { name } | ChannelRef::DataProperty { name } => Some(name),
            _ => None,
        }
    }

    /// Value of the channel when nothing drives it.
    pub fn rest_value(&self) -> f64 {
        match self {
            ChannelRef::BoneTransform { channel, index, .. } => channel.rest_value(*index),
            _ => 0.0,
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::RigProperty { name } => write!(f, "[\"{name}\"]"),
            ChannelRef::DataProperty { name } => write!(f, "data[\"{name}\"]"),
            ChannelRef::BoneTransform {
                bone,
                channel,
                index,
            } => write!(f, "pose.bones[\"{bone}\"].{}[{index}]", channel.as_str()),
            ChannelRef::ShapeKey { mesh, key } => write!(f, "{mesh}:key_blocks[\"{key}\"].value"),
        }
    }
}

impl FromStr for ChannelRef {
    type Err = PathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelRef::parse(s)
    }
}

// Serde support: serialize as string, deserialize from string
impl Serialize for ChannelRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChannelRef {
    fn deserialize<D>(deserializer: D) -> Result<ChannelRef, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChannelRef::parse(&s).map_err(de::Error::custom)
    }
}

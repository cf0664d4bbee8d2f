//! Serializable description of a rig, used to seed a [`crate::MemoryRig`].

use serde::{Deserialize, Serialize};

use morphdrive_api_core::{Basis, PropertyOwner, IDENTITY_BASIS};

fn identity() -> Basis {
    IDENTITY_BASIS
}

fn yes() -> bool {
    true
}

fn unit_min() -> f64 {
    -1.0
}

fn unit_max() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneSpec {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Row `i` is the local effect of source axis `i`.
    #[serde(default = "identity")]
    pub basis: Basis,
    #[serde(default = "yes")]
    pub inherit_scale: bool,
}

impl BoneSpec {
    pub fn new(name: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_string),
            basis: IDENTITY_BASIS,
            inherit_scale: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    #[serde(default)]
    pub owner: PropertyOwner,
    #[serde(default)]
    pub value: f64,
    #[serde(default = "unit_min")]
    pub min: f64,
    #[serde(default = "unit_max")]
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSpec {
    pub name: String,
    #[serde(default)]
    pub shape_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RigSpec {
    #[serde(default)]
    pub bones: Vec<BoneSpec>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    #[serde(default)]
    pub meshes: Vec<MeshSpec>,
}

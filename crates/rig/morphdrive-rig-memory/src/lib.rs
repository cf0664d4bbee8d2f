//! morphdrive-rig-memory
//!
//! A plain in-memory [`RigHost`]: bones with a parent and a local basis,
//! custom properties, shape keys and per-channel driver state. Used by tests,
//! benches and tools that compile formulas without a scene graph.

mod error;
mod spec;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use morphdrive_api_core::{
    Basis, ChannelRef, Expression, PropertyOwner, RigHost, TermLedger, TransformKind,
    TransformReading, TransformSpace,
};

pub use crate::error::RigError;
pub use crate::spec::{BoneSpec, MeshSpec, PropertySpec, RigSpec};

/// What a channel is driven by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverState {
    Scripted { expression: Expression },
    Additive { subchannels: Vec<ChannelRef> },
}

/// Produced when a write replaced a different driver on the same channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictLog {
    pub channel: ChannelRef,
    pub previous: DriverState,
    pub new: DriverState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Default)]
pub struct MemoryRig {
    bones: Vec<BoneSpec>,
    bone_index: HashMap<String, usize>,
    properties: HashMap<ChannelRef, PropertyValue>,
    shape_keys: HashSet<ChannelRef>,
    drivers: HashMap<ChannelRef, DriverState>,
    ledgers: HashMap<ChannelRef, TermLedger>,
    readings: HashMap<TransformReading, f64>,
    conflicts: Vec<ConflictLog>,
}

impl MemoryRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_spec(spec: RigSpec) -> Result<Self, RigError> {
        let mut rig = Self::new();
        for bone in &spec.bones {
            if rig.bone_index.contains_key(&bone.name) {
                return Err(RigError::DuplicateBone(bone.name.clone()));
            }
            rig.bone_index.insert(bone.name.clone(), rig.bones.len());
            rig.bones.push(bone.clone());
        }
        for bone in &spec.bones {
            if let Some(parent) = &bone.parent {
                if !rig.bone_index.contains_key(parent) {
                    return Err(RigError::UnknownParent {
                        bone: bone.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        for prop in spec.properties {
            rig.properties.insert(
                prop.owner.channel(prop.name),
                PropertyValue {
                    value: prop.value,
                    min: prop.min,
                    max: prop.max,
                },
            );
        }
        for mesh in spec.meshes {
            for key in mesh.shape_keys {
                rig.shape_keys
                    .insert(ChannelRef::shape_key(mesh.name.clone(), key));
            }
        }
        Ok(rig)
    }

    pub fn from_json(text: &str) -> Result<Self, RigError> {
        let spec: RigSpec = serde_json::from_str(text)?;
        Self::from_spec(spec)
    }

    /// Add or replace a bone. The parent does not have to exist yet.
    pub fn add_bone(&mut self, name: &str, parent: Option<&str>) -> &mut Self {
        let spec = BoneSpec::new(name, parent);
        match self.bone_index.get(name) {
            Some(&i) => self.bones[i] = spec,
            None => {
                self.bone_index.insert(name.to_string(), self.bones.len());
                self.bones.push(spec);
            }
        }
        self
    }

    pub fn set_basis(&mut self, bone: &str, basis: Basis) -> &mut Self {
        if let Some(&i) = self.bone_index.get(bone) {
            self.bones[i].basis = basis;
        }
        self
    }

    pub fn set_inherit_scale(&mut self, bone: &str, inherit: bool) -> &mut Self {
        if let Some(&i) = self.bone_index.get(bone) {
            self.bones[i].inherit_scale = inherit;
        }
        self
    }

    pub fn add_property(&mut self, name: &str, value: f64) -> &mut Self {
        self.properties.insert(
            ChannelRef::property(name),
            PropertyValue {
                value,
                min: -1.0,
                max: 1.0,
            },
        );
        self
    }

    pub fn add_shape_key(&mut self, mesh: &str, key: &str) -> &mut Self {
        self.shape_keys.insert(ChannelRef::shape_key(mesh, key));
        self
    }

    /// Fix the value the host reports for a transform reading.
    pub fn set_reading(&mut self, reading: TransformReading, value: f64) -> &mut Self {
        self.readings.insert(reading, value);
        self
    }

    pub fn expression(&self, channel: &ChannelRef) -> Option<&Expression> {
        match self.drivers.get(channel) {
            Some(DriverState::Scripted { expression }) => Some(expression),
            _ => None,
        }
    }

    pub fn additive(&self, channel: &ChannelRef) -> Option<&[ChannelRef]> {
        match self.drivers.get(channel) {
            Some(DriverState::Additive { subchannels }) => Some(subchannels.as_slice()),
            _ => None,
        }
    }

    pub fn ledger_of(&self, channel: &ChannelRef) -> Option<&TermLedger> {
        self.ledgers.get(channel)
    }

    pub fn property(&self, channel: &ChannelRef) -> Option<PropertyValue> {
        self.properties.get(channel).copied()
    }

    pub fn property_value(&self, name: &str) -> Option<f64> {
        self.property(&ChannelRef::property(name)).map(|p| p.value)
    }

    /// Every driven channel, sorted by path.
    pub fn driven_channels(&self) -> Vec<ChannelRef> {
        let mut channels: Vec<ChannelRef> = self.drivers.keys().cloned().collect();
        channels.sort_by_key(|c| c.to_string());
        channels
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Drivers overwritten by a different driver since the last `take_conflicts`.
    pub fn conflicts(&self) -> &[ConflictLog] {
        &self.conflicts
    }

    pub fn take_conflicts(&mut self) -> Vec<ConflictLog> {
        std::mem::take(&mut self.conflicts)
    }

    fn bone(&self, name: &str) -> Option<&BoneSpec> {
        self.bone_index.get(name).map(|&i| &self.bones[i])
    }

    fn install(&mut self, channel: &ChannelRef, state: DriverState) {
        self.ledgers.remove(channel);
        if let Some(previous) = self.drivers.insert(channel.clone(), state.clone()) {
            if previous != state {
                log::trace!("{channel}: driver replaced");
                self.conflicts.push(ConflictLog {
                    channel: channel.clone(),
                    previous,
                    new: state,
                });
            }
        }
    }

    fn local_reading(&self, bone: &str, kind: TransformKind, component: u8) -> f64 {
        let reading = TransformReading::local(bone, kind, component);
        match self.readings.get(&reading) {
            Some(v) => *v,
            None if kind == TransformKind::Scale => 1.0,
            None => 0.0,
        }
    }
}

impl RigHost for MemoryRig {
    fn channel_exists(&self, channel: &ChannelRef) -> bool {
        match channel {
            ChannelRef::RigProperty { .. } | ChannelRef::DataProperty { .. } => {
                self.properties.contains_key(channel)
            }
            ChannelRef::ShapeKey { .. } => self.shape_keys.contains(channel),
            ChannelRef::BoneTransform {
                bone,
                channel: kind,
                index,
            } => self.bone_index.contains_key(bone) && *index < kind.arity(),
        }
    }

    fn get_expression(&self, channel: &ChannelRef) -> Option<Expression> {
        self.expression(channel).cloned()
    }

    fn set_expression(&mut self, channel: &ChannelRef, expression: Expression) {
        self.install(channel, DriverState::Scripted { expression });
    }

    fn clear_expression(&mut self, channel: &ChannelRef) {
        self.ledgers.remove(channel);
        self.drivers.remove(channel);
    }

    fn add_additive_channel(&mut self, channel: &ChannelRef, subchannels: Vec<ChannelRef>) {
        self.install(channel, DriverState::Additive { subchannels });
    }

    fn additive_channels(&self, channel: &ChannelRef) -> Option<Vec<ChannelRef>> {
        self.additive(channel).map(<[ChannelRef]>::to_vec)
    }

    fn ledger(&self, channel: &ChannelRef) -> Option<TermLedger> {
        self.ledgers.get(channel).cloned()
    }

    fn set_ledger(&mut self, channel: &ChannelRef, ledger: Option<TermLedger>) {
        match ledger {
            Some(ledger) if self.drivers.contains_key(channel) => {
                self.ledgers.insert(channel.clone(), ledger);
            }
            Some(_) => log::warn!("{channel}: ledger without a driver ignored"),
            None => {
                self.ledgers.remove(channel);
            }
        }
    }

    fn get_or_create_property(
        &mut self,
        owner: PropertyOwner,
        name: &str,
        default: f64,
        min: f64,
        max: f64,
    ) -> ChannelRef {
        let channel = owner.channel(name);
        self.properties
            .entry(channel.clone())
            .or_insert(PropertyValue {
                value: default,
                min,
                max,
            });
        channel
    }

    fn bone_exists(&self, bone: &str) -> bool {
        self.bone_index.contains_key(bone)
    }

    fn local_transform_basis(&self, bone: &str) -> Option<Basis> {
        self.bone(bone).map(|b| b.basis)
    }

    fn transform_reading(
        &self,
        bone: &str,
        kind: TransformKind,
        component: u8,
        space: TransformSpace,
    ) -> Option<f64> {
        self.bone(bone)?;
        let reading = TransformReading {
            bone: bone.to_string(),
            kind,
            component,
            space,
        };
        if let Some(v) = self.readings.get(&reading) {
            return Some(*v);
        }
        let local = self.local_reading(bone, kind, component);
        match (space, kind) {
            (TransformSpace::Pose, TransformKind::Scale) => {
                let mut value = local;
                let mut current = bone.to_string();
                let mut depth = 0;
                while let Some(spec) = self.bone(&current) {
                    if !spec.inherit_scale || depth > self.bones.len() {
                        break;
                    }
                    let Some(parent) = spec.parent.clone() else {
                        break;
                    };
                    value *= self.local_reading(&parent, kind, component);
                    current = parent;
                    depth += 1;
                }
                Some(value)
            }
            _ => Some(local),
        }
    }

    fn bone_parent(&self, bone: &str) -> Option<String> {
        self.bone(bone).and_then(|b| b.parent.clone())
    }

    fn bone_names(&self) -> Vec<String> {
        self.bones.iter().map(|b| b.name.clone()).collect()
    }

    fn inherits_scale(&self, bone: &str) -> bool {
        self.bone(bone).map_or(false, |b| b.inherit_scale)
    }
}

//! JSON scene description: the entities, parameters and calls a peer
//! registers before it starts syncing.
//!
//! Every peer in a session must load the same description so the dense ids
//! handed out by the registry agree on all of them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracer_sync_core::{Interpolation, Keyframe, ParamValue, RpcTable, SceneObjectRegistry};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SceneFile {
    pub entities: Vec<EntityDef>,
    pub rpcs: Vec<RpcDef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EntityDef {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParameterDef {
    pub name: String,
    pub value: ParamValue,
    #[serde(default = "default_distribute")]
    pub distribute: bool,
    /// Keys loaded as a local animation before the session starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<KeyDef>,
}

/// A keyframe as written in a scene file. Tangents default to the key itself.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct KeyDef {
    pub time: f32,
    pub value: ParamValue,
    #[serde(default = "default_interpolation")]
    pub interpolation: Interpolation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_tangent: Option<(f32, ParamValue)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_tangent: Option<(f32, ParamValue)>,
}

impl KeyDef {
    fn to_keyframe(&self) -> Result<Keyframe> {
        let mut key = Keyframe::with_interpolation(self.time, self.value.clone(), self.interpolation);
        if let Some((time, value)) = &self.left_tangent {
            key.left_tangent_time = *time;
            key.left_tangent_value = value.clone();
        }
        if let Some((time, value)) = &self.right_tangent {
            key.right_tangent_time = *time;
            key.right_tangent_value = value.clone();
        }
        key.validate()?;
        Ok(key)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcDef {
    pub name: String,
    pub value: ParamValue,
}

fn default_distribute() -> bool {
    true
}

fn default_interpolation() -> Interpolation {
    Interpolation::Linear
}

/// What [`SceneFile::register`] added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneSummary {
    pub entities: usize,
    pub parameters: usize,
    pub animated: usize,
    pub rpcs: usize,
}

impl SceneFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Failed to parse scene {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Register entities, parameters and calls in file order.
    pub fn register(&self, registry: &SceneObjectRegistry, rpc: &RpcTable) -> Result<SceneSummary> {
        let mut summary = SceneSummary::default();
        for entity in &self.entities {
            let entity_id = registry
                .register(entity.name.clone())
                .with_context(|| format!("Failed to register entity {}", entity.name))?;
            summary.entities += 1;
            for def in &entity.parameters {
                let parameter_id = registry
                    .register_parameter(entity_id, def.name.clone(), def.value.clone(), def.distribute)
                    .with_context(|| format!("Failed to register {}.{}", entity.name, def.name))?;
                summary.parameters += 1;
                if def.keys.is_empty() {
                    continue;
                }
                let parameter = registry.resolve(entity_id, parameter_id)?;
                parameter
                    .start_animation()
                    .with_context(|| format!("{}.{} cannot be animated", entity.name, def.name))?;
                for (index, key) in def.keys.iter().enumerate() {
                    key.to_keyframe()
                        .and_then(|key| Ok(parameter.set_key(index, key)?))
                        .with_context(|| {
                            format!("Invalid key {index} on {}.{}", entity.name, def.name)
                        })?;
                }
                summary.animated += 1;
            }
            debug!(entity_id, name = %entity.name, "scene entity registered");
        }
        for def in &self.rpcs {
            rpc.register(def.name.clone(), def.value.clone())
                .with_context(|| format!("Failed to register call {}", def.name))?;
            summary.rpcs += 1;
        }
        info!(
            "Registered {} entities, {} parameters ({} animated), {} calls",
            summary.entities, summary.parameters, summary.animated, summary.rpcs
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    const SCENE: &str = r#"{
        "entities": [
            { "name": "camera" },
            {
                "name": "lamp",
                "parameters": [
                    { "name": "visible", "value": { "type": "bool", "value": true } },
                    { "name": "color", "value": { "type": "vec3", "value": [1.0, 0.5, 0.0] } },
                    {
                        "name": "intensity",
                        "value": { "type": "float32", "value": 0.0 },
                        "keys": [
                            { "time": 0.0, "value": { "type": "float32", "value": 0.0 } },
                            {
                                "time": 24.0,
                                "value": { "type": "float32", "value": 2.0 },
                                "interpolation": "bezier",
                                "left_tangent": [20.0, { "type": "float32", "value": 1.5 }]
                            }
                        ]
                    },
                    { "name": "notes", "value": { "type": "string", "value": "" }, "distribute": false }
                ]
            }
        ],
        "rpcs": [ { "name": "jump_to_frame", "value": { "type": "int32", "value": 0 } } ]
    }"#;

    #[test]
    fn registers_in_file_order() {
        let scene = SceneFile::from_json(SCENE).unwrap();
        let registry = SceneObjectRegistry::new();
        let rpc = RpcTable::new();
        let summary = scene.register(&registry, &rpc).unwrap();
        assert_eq!(
            summary,
            SceneSummary {
                entities: 2,
                parameters: 4,
                animated: 1,
                rpcs: 1
            }
        );

        let lamp = registry.entity(2).unwrap();
        assert_eq!(lamp.name(), "lamp");
        assert_eq!(
            lamp.parameter(1).unwrap().value(),
            ParamValue::Vec3(Vec3::new(1.0, 0.5, 0.0))
        );
        let intensity = lamp.parameter_by_name("intensity").unwrap();
        assert!(intensity.is_animated());
        let track = intensity.track();
        assert_eq!(track.len(), 2);
        let second = track.get(1).unwrap();
        assert_eq!(second.interpolation, Interpolation::Bezier);
        assert_eq!(second.left_tangent_time, 20.0);
        assert_eq!(second.right_tangent_value, ParamValue::Float32(2.0));
        assert!(!lamp.parameter(3).unwrap().distribute());
        assert_eq!(rpc.resolve(0).unwrap().name(), "jump_to_frame");
    }

    #[test]
    fn string_keys_are_rejected() {
        let scene = SceneFile::from_json(
            r#"{ "entities": [ { "name": "label", "parameters": [ {
                "name": "text",
                "value": { "type": "string", "value": "a" },
                "keys": [ { "time": 0.0, "value": { "type": "string", "value": "a" } } ]
            } ] } ] }"#,
        )
        .unwrap();
        let err = scene
            .register(&SceneObjectRegistry::new(), &RpcTable::new())
            .unwrap_err();
        assert!(format!("{err:#}").contains("cannot be animated"));
    }

    #[test]
    fn mismatched_tangent_is_rejected() {
        let scene = SceneFile::from_json(
            r#"{ "entities": [ { "name": "x", "parameters": [ {
                "name": "p",
                "value": { "type": "float32", "value": 0.0 },
                "keys": [ {
                    "time": 0.0,
                    "value": { "type": "float32", "value": 0.0 },
                    "right_tangent": [1.0, { "type": "int32", "value": 1 }]
                } ]
            } ] } ] }"#,
        )
        .unwrap();
        let err = scene
            .register(&SceneObjectRegistry::new(), &RpcTable::new())
            .unwrap_err();
        assert!(format!("{err:#}").contains("Invalid key 0"));
    }

    #[test]
    fn unknown_value_type_fails_to_parse() {
        assert!(SceneFile::from_json(
            r#"{ "entities": [ { "name": "x", "parameters": [
                { "name": "p", "value": { "type": "matrix", "value": 1 } } ] } ] }"#
        )
        .is_err());
    }
}

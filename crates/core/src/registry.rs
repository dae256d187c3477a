//! Id assignment for entities, parameters and call-only parameters.
//!
//! Ids are handed out in increasing order and never reused for the lifetime
//! of a registry. Registration takes a write lock; lookups take a short read
//! lock and hand back shared handles.

use crate::error::{EntityId, ParameterId, SyncError};
use crate::guard::EchoGuard;
use crate::parameter::{EntityLink, Parameter};
use crate::value::ParamValue;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Scene id used for entity-less RPC records.
pub const RPC_SCOPE_ID: u8 = 255;
/// Target id carried by entity-less RPC records.
pub const RPC_TARGET_ID: EntityId = 1;
/// Entity id reserved for the scene itself.
pub const ENTITY_SCENE_ID: EntityId = 254;
/// Entity id reserved for broadcast-only scopes.
pub const ENTITY_BROADCAST_ID: EntityId = 255;

// Writes are single pushes or inserts, so a poisoned lock still guards
// consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Whether `id` may never be assigned to a real entity.
pub fn is_reserved_entity_id(id: EntityId) -> bool {
    matches!(id, 0 | ENTITY_SCENE_ID | ENTITY_BROADCAST_ID)
}

/// An addressable node of the synchronized scene.
#[derive(Debug)]
pub struct SceneEntity {
    id: EntityId,
    name: String,
    link: EntityLink,
    parameters: RwLock<Vec<Arc<Parameter>>>,
}

impl SceneEntity {
    fn new(id: EntityId, name: String) -> Self {
        Self {
            id,
            name,
            link: EntityLink::default(),
            parameters: RwLock::new(Vec::new()),
        }
    }

    /// Entity id.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Echo guard shared by all of this entity's parameters.
    pub fn guard(&self) -> &EchoGuard {
        &self.link.guard
    }

    /// Apply a lock or unlock received from a peer.
    ///
    /// A locked entity drops local edits until it is unlocked.
    pub fn set_remote_lock(&self, locked: bool) {
        self.link.remote_lock.store(locked, Ordering::Release);
    }

    /// Whether a peer currently holds the entity.
    pub fn is_remote_locked(&self) -> bool {
        self.link.remote_lock.load(Ordering::Acquire)
    }

    /// Parameter by id.
    pub fn parameter(&self, id: ParameterId) -> Option<Arc<Parameter>> {
        read(&self.parameters).get(id as usize).cloned()
    }

    /// Parameter by name.
    pub fn parameter_by_name(&self, name: &str) -> Option<Arc<Parameter>> {
        read(&self.parameters)
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// All parameters in id order.
    pub fn parameters(&self) -> Vec<Arc<Parameter>> {
        read(&self.parameters).clone()
    }

    /// Number of parameters.
    pub fn parameter_count(&self) -> usize {
        read(&self.parameters).len()
    }

    fn add_parameter(
        &self,
        name: String,
        value: ParamValue,
        distribute: bool,
    ) -> Result<Arc<Parameter>, SyncError> {
        let mut params = write(&self.parameters);
        let id = ParameterId::try_from(params.len())
            .map_err(|_| SyncError::RegistryFull("parameter"))?;
        let parameter = Arc::new(Parameter::new(
            id,
            self.id,
            name,
            value,
            distribute,
            false,
            self.link.clone(),
        ));
        params.push(Arc::clone(&parameter));
        Ok(parameter)
    }
}

/// Entity and parameter id authority for one session.
#[derive(Debug, Default)]
pub struct SceneObjectRegistry {
    entities: RwLock<BTreeMap<EntityId, Arc<SceneEntity>>>,
}

impl SceneObjectRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity and return its id.
    ///
    /// Ids start at 1 and skip the reserved values.
    pub fn register(&self, name: impl Into<String>) -> Result<EntityId, SyncError> {
        let mut entities = write(&self.entities);
        let mut next = match entities.keys().next_back() {
            Some(last) => last.checked_add(1).ok_or(SyncError::RegistryFull("entity"))?,
            None => 1,
        };
        while is_reserved_entity_id(next) {
            next = next.checked_add(1).ok_or(SyncError::RegistryFull("entity"))?;
        }
        let name = name.into();
        debug!(entity_id = next, %name, "registered entity");
        entities.insert(next, Arc::new(SceneEntity::new(next, name)));
        Ok(next)
    }

    /// Add a parameter to an entity and return its dense, zero-based id.
    pub fn register_parameter(
        &self,
        entity_id: EntityId,
        name: impl Into<String>,
        value: impl Into<ParamValue>,
        distribute: bool,
    ) -> Result<ParameterId, SyncError> {
        let entity = self.entity(entity_id).ok_or(SyncError::UnknownReference {
            entity_id,
            parameter_id: None,
        })?;
        let parameter = entity.add_parameter(name.into(), value.into(), distribute)?;
        debug!(
            entity_id,
            parameter_id = parameter.id(),
            name = parameter.name(),
            ty = %parameter.param_type(),
            "registered parameter"
        );
        Ok(parameter.id())
    }

    /// Entity by id.
    pub fn entity(&self, entity_id: EntityId) -> Option<Arc<SceneEntity>> {
        read(&self.entities).get(&entity_id).cloned()
    }

    /// Entity by id, or `UnknownReference`.
    pub fn resolve_entity(&self, entity_id: EntityId) -> Result<Arc<SceneEntity>, SyncError> {
        self.entity(entity_id).ok_or(SyncError::UnknownReference {
            entity_id,
            parameter_id: None,
        })
    }

    /// Parameter by entity and parameter id, or `UnknownReference`.
    pub fn resolve(
        &self,
        entity_id: EntityId,
        parameter_id: ParameterId,
    ) -> Result<Arc<Parameter>, SyncError> {
        self.entity(entity_id)
            .and_then(|entity| entity.parameter(parameter_id))
            .ok_or(SyncError::UnknownReference {
                entity_id,
                parameter_id: Some(parameter_id),
            })
    }

    /// All entities in id order.
    pub fn entities(&self) -> Vec<Arc<SceneEntity>> {
        read(&self.entities).values().cloned().collect()
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        read(&self.entities).len()
    }

    /// Whether no entity is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Call-only parameters that belong to no entity.
///
/// Call ids form one global space starting at 0. All calls share a single
/// echo guard.
#[derive(Debug, Default)]
pub struct RpcTable {
    link: EntityLink,
    calls: RwLock<Vec<Arc<Parameter>>>,
}

impl RpcTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and return its id.
    pub fn register(
        &self,
        name: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Result<ParameterId, SyncError> {
        let mut calls = write(&self.calls);
        let id =
            ParameterId::try_from(calls.len()).map_err(|_| SyncError::RegistryFull("rpc"))?;
        let call = Parameter::new(
            id,
            RPC_TARGET_ID,
            name.into(),
            value.into(),
            true,
            true,
            self.link.clone(),
        );
        debug!(call_id = id, name = call.name(), "registered rpc");
        calls.push(Arc::new(call));
        Ok(id)
    }

    /// Call by id, or `UnknownReference`.
    pub fn resolve(&self, call_id: ParameterId) -> Result<Arc<Parameter>, SyncError> {
        read(&self.calls)
            .get(call_id as usize)
            .cloned()
            .ok_or(SyncError::UnknownReference {
                entity_id: RPC_TARGET_ID,
                parameter_id: Some(call_id),
            })
    }

    /// All calls in id order.
    pub fn calls(&self) -> Vec<Arc<Parameter>> {
        read(&self.calls).clone()
    }

    /// Number of registered calls.
    pub fn len(&self) -> usize {
        read(&self.calls).len()
    }

    /// Whether no call is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

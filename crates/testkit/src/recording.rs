//! Hosts and observers that remember what they were told.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tracer_sync_core::{
    ChangeOrigin, EntityId, ParamValue, Parameter, ParameterChange, ParameterId,
    ParameterObserver, SceneEntity,
};
use tracer_sync_net::SceneHost;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`SceneHost`] that records every callback.
#[derive(Debug, Default)]
pub struct RecordingHost {
    locks: Mutex<Vec<(EntityId, bool)>>,
    materialized: Mutex<Vec<Vec<EntityId>>>,
    rpcs: Mutex<Vec<(ParameterId, ParamValue)>>,
}

impl RecordingHost {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock changes in arrival order.
    pub fn locks(&self) -> Vec<(EntityId, bool)> {
        lock(&self.locks).clone()
    }

    /// Entity batches passed to `materialize_animation`, one per call.
    pub fn materialized(&self) -> Vec<Vec<EntityId>> {
        lock(&self.materialized).clone()
    }

    /// Calls received, by call id.
    pub fn rpcs(&self) -> Vec<(ParameterId, ParamValue)> {
        lock(&self.rpcs).clone()
    }
}

impl SceneHost for RecordingHost {
    fn on_lock_changed(&self, entity: &SceneEntity, locked: bool) {
        lock(&self.locks).push((entity.id(), locked));
    }

    fn materialize_animation(&self, entities: &[EntityId]) {
        lock(&self.materialized).push(entities.to_vec());
    }

    fn on_rpc(&self, call: &Parameter, value: &ParamValue) {
        lock(&self.rpcs).push((call.id(), value.clone()));
    }
}

/// [`ParameterObserver`] that records every notification.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    changes: Mutex<Vec<ParameterChange>>,
    animations: Mutex<Vec<(EntityId, ParameterId, ChangeOrigin)>>,
}

impl RecordingObserver {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value changes in arrival order.
    pub fn changes(&self) -> Vec<ParameterChange> {
        lock(&self.changes).clone()
    }

    /// Animation notifications in arrival order.
    pub fn animations(&self) -> Vec<(EntityId, ParameterId, ChangeOrigin)> {
        lock(&self.animations).clone()
    }
}

impl ParameterObserver for RecordingObserver {
    fn on_change(&self, _parameter: &Parameter, change: &ParameterChange) {
        lock(&self.changes).push(change.clone());
    }

    fn on_animation_updated(&self, parameter: &Parameter, origin: ChangeOrigin) {
        lock(&self.animations).push((parameter.entity_id(), parameter.id(), origin));
    }
}

//! Headless host: reports inbound traffic through `tracing` instead of
//! applying it to a live scene.

use std::sync::Arc;
use tracer_sync_core::{
    ChangeOrigin, EntityId, ParamValue, Parameter, ParameterChange, ParameterObserver,
    SceneEntity, SceneObjectRegistry,
};
use tracer_sync_net::SceneHost;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LoggingHost;

impl SceneHost for LoggingHost {
    fn on_lock_changed(&self, entity: &SceneEntity, locked: bool) {
        info!(entity = entity.name(), locked, "remote lock changed");
    }

    fn materialize_animation(&self, entities: &[EntityId]) {
        debug!(?entities, "animation updated");
    }

    fn on_rpc(&self, call: &Parameter, value: &ParamValue) {
        info!(call = call.name(), ?value, "remote call");
    }
}

/// Logs every remote change to a parameter.
#[derive(Debug, Default)]
pub struct ChangeLogger;

impl ParameterObserver for ChangeLogger {
    fn on_change(&self, parameter: &Parameter, change: &ParameterChange) {
        if change.origin == ChangeOrigin::Remote {
            info!(
                entity_id = change.entity_id,
                parameter = parameter.name(),
                value = ?change.value,
                "remote update"
            );
        }
    }

    fn on_animation_updated(&self, parameter: &Parameter, origin: ChangeOrigin) {
        if origin == ChangeOrigin::Remote {
            info!(
                entity_id = parameter.entity_id(),
                parameter = parameter.name(),
                keys = parameter.track().len(),
                "remote animation"
            );
        }
    }
}

/// Attach one shared [`ChangeLogger`] to every registered parameter.
pub fn attach_change_logger(registry: &SceneObjectRegistry) -> usize {
    let logger: Arc<dyn ParameterObserver> = Arc::new(ChangeLogger);
    let mut attached = 0;
    for entity in registry.entities() {
        for parameter in entity.parameters() {
            parameter.add_observer(Arc::clone(&logger));
            attached += 1;
        }
    }
    attached
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_reaches_every_parameter() {
        let registry = SceneObjectRegistry::new();
        let a = registry.register("a").unwrap();
        let b = registry.register("b").unwrap();
        registry.register_parameter(a, "x", 0.0f32, true).unwrap();
        registry.register_parameter(b, "y", 0i32, true).unwrap();
        registry.register_parameter(b, "z", false, false).unwrap();

        assert_eq!(attach_change_logger(&registry), 3);
        assert_eq!(registry.resolve(b, 1).unwrap().observer_count(), 1);
    }
}

//! Parameters: typed value cells with optional animation and observers.
//!
//! A [`Parameter`] is either static or animated. Local edits go through
//! [`Parameter::set_value`] and friends, remote applies go through
//! [`Parameter::deserialize`]. Both notify the registered
//! [`ParameterObserver`]s, tagging the change with its [`ChangeOrigin`] so an
//! outbound publisher can ignore what came off the wire.

use crate::codec::{self, WireReader};
use crate::error::{EntityId, ParameterId, SyncError};
use crate::guard::{EchoGuard, EchoGuardToken};
use crate::keyframe::{KeyTrack, Keyframe};
use crate::value::{ParamType, ParamValue};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// Edited on this peer.
    Local,
    /// Applied from an inbound frame.
    Remote,
}

/// A value change delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterChange {
    /// Owning entity.
    pub entity_id: EntityId,
    /// Parameter id within the entity (call id for RPC parameters).
    pub parameter_id: ParameterId,
    /// The new value.
    pub value: ParamValue,
    /// Local edit or remote apply.
    pub origin: ChangeOrigin,
}

/// Receives parameter notifications.
///
/// Called synchronously, in registration order, after the parameter's state
/// lock is released. Implementations may read the parameter or edit other
/// parameters, but must not block.
pub trait ParameterObserver: Send + Sync {
    /// The value changed.
    fn on_change(&self, parameter: &Parameter, change: &ParameterChange);

    /// The keyframe track was rebuilt or edited.
    fn on_animation_updated(&self, _parameter: &Parameter, _origin: ChangeOrigin) {}
}

impl<F> ParameterObserver for F
where
    F: Fn(&Parameter, &ParameterChange) + Send + Sync,
{
    fn on_change(&self, parameter: &Parameter, change: &ParameterChange) {
        self(parameter, change)
    }
}

/// Result of a local edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Stored and observers notified.
    Changed,
    /// Equal to the current state, nothing to do.
    Unchanged,
    /// Dropped: a remote apply holds the entity or the entity is remotely locked.
    Suppressed,
}

/// What a remote apply did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeserializeOutcome {
    /// The scalar value differed from the stored one.
    pub value_changed: bool,
    /// The keyframe track was promoted or its contents changed.
    pub animation_updated: bool,
}

/// Handles shared by every parameter of one entity.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityLink {
    pub(crate) guard: EchoGuard,
    pub(crate) remote_lock: Arc<AtomicBool>,
}

#[derive(Debug)]
struct ParameterState {
    value: ParamValue,
    initial_value: ParamValue,
    is_animated: bool,
    track: KeyTrack,
    has_changed: bool,
}

/// A named, typed value owned by a scene entity.
pub struct Parameter {
    id: ParameterId,
    entity_id: EntityId,
    name: String,
    ty: ParamType,
    distribute: bool,
    is_rpc: bool,
    link: EntityLink,
    state: Mutex<ParameterState>,
    observers: RwLock<Vec<Arc<dyn ParameterObserver>>>,
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("id", &self.id)
            .field("entity_id", &self.entity_id)
            .field("name", &self.name)
            .field("type", &self.ty)
            .field("distribute", &self.distribute)
            .field("is_rpc", &self.is_rpc)
            .finish_non_exhaustive()
    }
}

impl Parameter {
    pub(crate) fn new(
        id: ParameterId,
        entity_id: EntityId,
        name: String,
        value: ParamValue,
        distribute: bool,
        is_rpc: bool,
        link: EntityLink,
    ) -> Self {
        Self {
            id,
            entity_id,
            name,
            ty: value.param_type(),
            distribute,
            is_rpc,
            link,
            state: Mutex::new(ParameterState {
                initial_value: value.clone(),
                value,
                is_animated: false,
                track: KeyTrack::new(),
                has_changed: false,
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Parameter id (call id for RPC parameters).
    pub fn id(&self) -> ParameterId {
        self.id
    }

    /// Owning entity id.
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed value type.
    pub fn param_type(&self) -> ParamType {
        self.ty
    }

    /// Whether local edits are published.
    pub fn distribute(&self) -> bool {
        self.distribute
    }

    /// Whether this is a one-shot call parameter.
    pub fn is_rpc(&self) -> bool {
        self.is_rpc
    }

    /// Current value.
    pub fn value(&self) -> ParamValue {
        self.state().value.clone()
    }

    /// Value the parameter was registered with.
    pub fn initial_value(&self) -> ParamValue {
        self.state().initial_value.clone()
    }

    /// Whether the parameter carries a track.
    pub fn is_animated(&self) -> bool {
        self.state().is_animated
    }

    /// Snapshot of the keyframe track.
    pub fn track(&self) -> KeyTrack {
        self.state().track.clone()
    }

    /// Read and clear the "has changed" mark set by value updates.
    pub fn take_changed(&self) -> bool {
        std::mem::take(&mut self.state().has_changed)
    }

    /// Size of the static encoding, `None` for strings.
    pub fn static_size(&self) -> Option<usize> {
        self.ty.fixed_size()
    }

    /// Register an observer; it is called after those already registered.
    pub fn add_observer(&self, observer: Arc<dyn ParameterObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Local edit of the scalar value.
    pub fn set_value(&self, new: impl Into<ParamValue>) -> Result<SetOutcome, SyncError> {
        let new = new.into();
        new.expect_type(self.ty)?;
        let Some(_token) = self.acquire_local() else {
            return Ok(SetOutcome::Suppressed);
        };
        {
            let mut state = self.state();
            if state.value == new {
                return Ok(SetOutcome::Unchanged);
            }
            state.value = new.clone();
            state.has_changed = true;
        }
        self.notify_change(new, ChangeOrigin::Local);
        Ok(SetOutcome::Changed)
    }

    /// Switch to animated, seeding the track with the current value at time 0.
    pub fn start_animation(&self) -> Result<SetOutcome, SyncError> {
        if !self.ty.is_animatable() {
            return Err(SyncError::NotAnimatable(self.ty));
        }
        let Some(_token) = self.acquire_local() else {
            return Ok(SetOutcome::Suppressed);
        };
        {
            let mut state = self.state();
            if state.is_animated {
                return Ok(SetOutcome::Unchanged);
            }
            let seed = Keyframe::new(0.0, state.value.clone());
            state.track.clear();
            state.track.push(seed);
            state.track.reset_changed();
            state.is_animated = true;
        }
        self.notify_animation(ChangeOrigin::Local);
        Ok(SetOutcome::Changed)
    }

    /// Insert or overwrite a key in the track (local edit).
    pub fn set_key(&self, index: usize, key: Keyframe) -> Result<SetOutcome, SyncError> {
        key.value.expect_type(self.ty)?;
        key.validate()?;
        let Some(_token) = self.acquire_local() else {
            return Ok(SetOutcome::Suppressed);
        };
        {
            let mut state = self.state();
            if !state.is_animated {
                return Err(SyncError::InvalidPayload(format!(
                    "parameter {} is not animated",
                    self.name
                )));
            }
            state.track.set(index, key)?;
            if !state.track.take_changed() {
                return Ok(SetOutcome::Unchanged);
            }
        }
        self.notify_animation(ChangeOrigin::Local);
        Ok(SetOutcome::Changed)
    }

    /// Drop the track and revert to the last scalar value (local edit).
    pub fn clear_animation(&self) -> Result<SetOutcome, SyncError> {
        let Some(_token) = self.acquire_local() else {
            return Ok(SetOutcome::Suppressed);
        };
        {
            let mut state = self.state();
            if !state.is_animated {
                return Ok(SetOutcome::Unchanged);
            }
            state.track.clear();
            state.track.reset_changed();
            state.is_animated = false;
        }
        self.notify_animation(ChangeOrigin::Local);
        Ok(SetOutcome::Changed)
    }

    /// Wire payload: the value, followed by the track when animated.
    pub fn serialize(&self) -> Vec<u8> {
        let state = self.state();
        let mut out = Vec::with_capacity(state.value.encoded_len());
        codec::encode_value(&state.value, &mut out);
        if state.is_animated {
            codec::encode_track(&state.track, &mut out);
        }
        out
    }

    /// Apply a payload received from a peer.
    ///
    /// The whole payload is decoded before anything is mutated, so a bad
    /// payload leaves the parameter untouched. Bytes past the static value
    /// are a keyframe stream and promote the parameter to animated.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<DeserializeOutcome, SyncError> {
        let mut reader = WireReader::new(bytes);
        let value = codec::decode_value(&mut reader, self.ty)?;
        let keys = if reader.is_empty() {
            None
        } else {
            let keys = codec::decode_keys(&mut reader, self.ty)?;
            if !reader.is_empty() {
                return Err(SyncError::InvalidPayload(format!(
                    "{} trailing bytes after keyframe stream",
                    reader.remaining()
                )));
            }
            Some(keys)
        };

        // A held guard means another apply already suppresses echoes.
        let _token = self.link.guard.try_acquire();
        let outcome = {
            let mut state = self.state();
            let value_changed = state.value != value;
            if value_changed {
                state.value = value.clone();
                state.has_changed = true;
            }
            let mut animation_updated = false;
            if let Some(keys) = keys {
                if !state.is_animated {
                    state.is_animated = true;
                    animation_updated = true;
                }
                state.track.replace_with(keys);
                animation_updated |= state.track.take_changed();
            }
            DeserializeOutcome {
                value_changed,
                animation_updated,
            }
        };
        if outcome.value_changed {
            self.notify_change(value, ChangeOrigin::Remote);
        }
        if outcome.animation_updated {
            self.notify_animation(ChangeOrigin::Remote);
        }
        Ok(outcome)
    }

    /// Return to the registered value and drop any animation (remote apply).
    pub fn reset(&self) -> DeserializeOutcome {
        let _token = self.link.guard.try_acquire();
        let (outcome, value) = {
            let mut state = self.state();
            let value_changed = state.value != state.initial_value;
            if value_changed {
                state.value = state.initial_value.clone();
                state.has_changed = true;
            }
            let animation_updated = state.is_animated;
            state.is_animated = false;
            state.track.clear();
            state.track.reset_changed();
            (
                DeserializeOutcome {
                    value_changed,
                    animation_updated,
                },
                state.value.clone(),
            )
        };
        if outcome.value_changed {
            self.notify_change(value, ChangeOrigin::Remote);
        }
        if outcome.animation_updated {
            self.notify_animation(ChangeOrigin::Remote);
        }
        outcome
    }

    /// Deliver a one-shot call value to observers without storing it.
    pub fn fire(&self, value: ParamValue, origin: ChangeOrigin) -> Result<(), SyncError> {
        value.expect_type(self.ty)?;
        self.notify_change(value, origin);
        Ok(())
    }

    fn acquire_local(&self) -> Option<EchoGuardToken> {
        if self.link.remote_lock.load(Ordering::Acquire) {
            return None;
        }
        self.link.guard.try_acquire()
    }

    fn state(&self) -> MutexGuard<'_, ParameterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> Vec<Arc<dyn ParameterObserver>> {
        self.observers
            .read()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    fn notify_change(&self, value: ParamValue, origin: ChangeOrigin) {
        let change = ParameterChange {
            entity_id: self.entity_id,
            parameter_id: self.id,
            value,
            origin,
        };
        for observer in self.observers() {
            observer.on_change(self, &change);
        }
    }

    fn notify_animation(&self, origin: ChangeOrigin) {
        for observer in self.observers() {
            observer.on_animation_updated(self, origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::sync::atomic::AtomicUsize;

    fn param(value: impl Into<ParamValue>) -> Parameter {
        Parameter::new(
            0,
            1,
            "p".into(),
            value.into(),
            true,
            false,
            EntityLink::default(),
        )
    }

    #[derive(Default)]
    struct Counter {
        changes: Mutex<Vec<ParameterChange>>,
        animations: AtomicUsize,
    }

    impl ParameterObserver for Counter {
        fn on_change(&self, _parameter: &Parameter, change: &ParameterChange) {
            self.changes.lock().unwrap().push(change.clone());
        }

        fn on_animation_updated(&self, _parameter: &Parameter, _origin: ChangeOrigin) {
            self.animations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn set_value_notifies_only_on_change() {
        let p = param(0.0f32);
        let counter = Arc::new(Counter::default());
        p.add_observer(counter.clone());

        assert_eq!(p.set_value(0.75f32).unwrap(), SetOutcome::Changed);
        assert_eq!(p.set_value(0.75f32).unwrap(), SetOutcome::Unchanged);
        let changes = counter.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].origin, ChangeOrigin::Local);
        assert!(p.take_changed());
        assert!(!p.take_changed());
    }

    #[test]
    fn retyping_is_rejected() {
        let p = param(0.0f32);
        assert!(matches!(
            p.set_value(3i32),
            Err(SyncError::TypeMismatch { .. })
        ));
        assert_eq!(p.value(), ParamValue::Float32(0.0));
    }

    #[test]
    fn held_guard_suppresses_local_edits() {
        let p = param(1i32);
        let token = p.link.guard.try_acquire().unwrap();
        assert_eq!(p.set_value(2i32).unwrap(), SetOutcome::Suppressed);
        drop(token);
        assert_eq!(p.set_value(2i32).unwrap(), SetOutcome::Changed);
    }

    #[test]
    fn remote_lock_suppresses_local_edits_but_not_remote_applies() {
        let p = param(1i32);
        p.link.remote_lock.store(true, Ordering::Release);
        assert_eq!(p.set_value(2i32).unwrap(), SetOutcome::Suppressed);
        let outcome = p.deserialize(&5i32.to_le_bytes()).unwrap();
        assert!(outcome.value_changed);
        assert_eq!(p.value(), ParamValue::Int32(5));
    }

    #[test]
    fn observer_edit_on_same_entity_is_suppressed() {
        let link = EntityLink::default();
        let a = Arc::new(Parameter::new(
            0,
            1,
            "a".into(),
            0i32.into(),
            true,
            false,
            link.clone(),
        ));
        let b = Arc::new(Parameter::new(
            1,
            1,
            "b".into(),
            0i32.into(),
            true,
            false,
            link,
        ));
        let inner = Arc::new(Mutex::new(None));
        let (b2, inner2) = (b.clone(), inner.clone());
        a.add_observer(Arc::new(move |_: &Parameter, change: &ParameterChange| {
            if let ParamValue::Int32(v) = change.value {
                *inner2.lock().unwrap() = Some(b2.set_value(v * 2).unwrap());
            }
        }));
        assert_eq!(a.set_value(4).unwrap(), SetOutcome::Changed);
        assert_eq!(*inner.lock().unwrap(), Some(SetOutcome::Suppressed));
        assert_eq!(b.value(), ParamValue::Int32(0));
    }

    #[test]
    fn serialize_deserialize_carries_the_track() {
        let source = param(Vec3::ZERO);
        source.start_animation().unwrap();
        source
            .set_key(1, Keyframe::new(10.0, Vec3::ONE.into()))
            .unwrap();
        source
            .set_key(2, Keyframe::new(20.0, Vec3::splat(2.0).into()))
            .unwrap();
        let bytes = source.serialize();
        assert_eq!(bytes.len(), 12 + 2 + 3 * codec::keyframe_len(ParamType::Vec3).unwrap());

        let target = param(Vec3::ZERO);
        let counter = Arc::new(Counter::default());
        target.add_observer(counter.clone());
        let outcome = target.deserialize(&bytes).unwrap();
        assert!(outcome.animation_updated);
        assert!(target.is_animated());
        assert_eq!(target.track().keys(), source.track().keys());
        assert_eq!(counter.animations.load(Ordering::SeqCst), 1);

        let again = target.deserialize(&bytes).unwrap();
        assert_eq!(again, DeserializeOutcome::default());
        assert_eq!(counter.animations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bad_payload_leaves_state_untouched() {
        let p = param(Vec3::ONE);
        let mut bytes = codec::value_to_bytes(&ParamValue::Vec3(Vec3::splat(9.0)));
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.push(2);
        assert!(p.deserialize(&bytes).is_err());
        assert_eq!(p.value(), ParamValue::Vec3(Vec3::ONE));
        assert!(!p.is_animated());
    }

    #[test]
    fn strings_cannot_animate() {
        let p = param("label");
        assert!(matches!(
            p.start_animation(),
            Err(SyncError::NotAnimatable(ParamType::String))
        ));
        p.deserialize(b"new label").unwrap();
        assert_eq!(p.value(), ParamValue::from("new label"));
    }

    #[test]
    fn clear_and_reset_return_to_static() {
        let p = param(1.0f32);
        p.set_value(2.0f32).unwrap();
        p.start_animation().unwrap();
        assert_eq!(p.track().len(), 1);
        p.clear_animation().unwrap();
        assert!(!p.is_animated());
        assert_eq!(p.value(), ParamValue::Float32(2.0));

        p.start_animation().unwrap();
        let outcome = p.reset();
        assert!(outcome.value_changed && outcome.animation_updated);
        assert_eq!(p.value(), ParamValue::Float32(1.0));
        assert!(p.track().is_empty());
    }
}

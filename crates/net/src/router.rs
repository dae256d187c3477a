//! Inbound dispatch and outbound framing.
//!
//! [`MessageRouter::handle_frame`] classifies a received frame and applies
//! its records in wire order. [`FrameSender`] is the only producer of
//! outbound frames; local edits reach it through [`UpdatePublisher`].

use crate::clock::ClockSync;
use crate::error::NetError;
use crate::protocol::{FrameHeader, LockRecord, MessageType, ResetRecord, ValueRecord};
use crate::transport::MAX_DATAGRAM;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracer_sync_core::codec;
use tracer_sync_core::{
    ChangeOrigin, EntityId, ParamType, ParamValue, Parameter, ParameterChange, ParameterObserver,
    RpcTable, SceneEntity, SceneObjectRegistry, SyncError, WireReader, RPC_SCOPE_ID,
    RPC_TARGET_ID,
};
use tracing::{debug, instrument, trace, warn};

/// Host-side reactions to inbound traffic.
///
/// All methods default to doing nothing. They run on the task that polls
/// the subscribe socket and must not block.
pub trait SceneHost: Send + Sync {
    /// A peer locked or unlocked an entity.
    fn on_lock_changed(&self, _entity: &SceneEntity, _locked: bool) {}

    /// Tracks of these entities changed during one frame.
    fn materialize_animation(&self, _entities: &[EntityId]) {}

    /// A remote call arrived.
    fn on_rpc(&self, _call: &Parameter, _value: &ParamValue) {}
}

/// Host that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl SceneHost for NullHost {}

/// Which socket an outbound frame leaves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The update publish channel.
    Update,
    /// The ping/command channel.
    Command,
}

/// A framed message waiting for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Destination channel.
    pub route: Route,
    /// Header and records.
    pub bytes: Vec<u8>,
}

/// Frames outbound messages and queues them for the publish task.
///
/// Sends are fire-and-forget: a closed outbox only logs. Frames that would
/// not fit one datagram are refused before they are queued.
#[derive(Debug, Clone)]
pub struct FrameSender {
    client_id: u8,
    clock: Arc<ClockSync>,
    outbox: mpsc::UnboundedSender<OutboundFrame>,
}

impl FrameSender {
    /// Sender writing into `outbox`.
    pub fn new(
        client_id: u8,
        clock: Arc<ClockSync>,
        outbox: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Self {
        Self {
            client_id,
            clock,
            outbox,
        }
    }

    /// Sender plus the receiving end of a fresh outbox.
    pub fn channel(
        client_id: u8,
        clock: Arc<ClockSync>,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(client_id, clock, tx), rx)
    }

    /// Client id stamped into every header.
    pub fn client_id(&self) -> u8 {
        self.client_id
    }

    fn start(&self, message_type: MessageType) -> Vec<u8> {
        FrameHeader {
            client_id: self.client_id,
            time: self.clock.time(),
            message_type,
        }
        .start_frame()
    }

    fn push(&self, route: Route, bytes: Vec<u8>) -> bool {
        if bytes.len() > MAX_DATAGRAM {
            warn!(
                ?route,
                len = bytes.len(),
                limit = MAX_DATAGRAM,
                "frame exceeds datagram limit, not sent"
            );
            return false;
        }
        trace!(?route, len = bytes.len(), "queueing frame");
        let queued = self.outbox.send(OutboundFrame { route, bytes }).is_ok();
        if !queued {
            debug!("outbox closed, frame dropped");
        }
        queued
    }

    /// Queue a frame received from another peer for republishing unchanged.
    pub fn forward(&self, frame: &[u8]) -> bool {
        self.push(Route::Update, frame.to_vec())
    }

    /// Publish one parameter's current state.
    pub fn send_parameter_update(&self, parameter: &Parameter) -> bool {
        self.send_parameter_updates([parameter])
    }

    /// Publish several parameters in one frame. Returns `false` if nothing was queued.
    pub fn send_parameter_updates<'a>(
        &self,
        parameters: impl IntoIterator<Item = &'a Parameter>,
    ) -> bool {
        let mut frame = self.start(MessageType::ParameterUpdate);
        let mut records = 0usize;
        for parameter in parameters {
            let payload = parameter.serialize();
            ValueRecord {
                scene_id: self.client_id,
                entity_id: parameter.entity_id(),
                parameter_id: parameter.id(),
                type_tag: parameter.param_type().tag(),
                payload: &payload,
            }
            .encode(&mut frame);
            records += 1;
        }
        records > 0 && self.push(Route::Update, frame)
    }

    /// Publish a lock or unlock of `entity_id`.
    pub fn send_lock(&self, entity_id: EntityId, locked: bool) -> bool {
        let mut frame = self.start(MessageType::Lock);
        LockRecord {
            scene_id: self.client_id,
            entity_id,
            locked,
        }
        .encode(&mut frame);
        self.push(Route::Update, frame)
    }

    /// Publish a one-shot call.
    pub fn send_rpc(&self, call: &Parameter, value: &ParamValue) -> bool {
        let mut frame = self.start(MessageType::Rpc);
        let payload = codec::value_to_bytes(value);
        ValueRecord {
            scene_id: RPC_SCOPE_ID,
            entity_id: RPC_TARGET_ID,
            parameter_id: call.id(),
            type_tag: value.param_type().tag(),
            payload: &payload,
        }
        .encode(&mut frame);
        self.push(Route::Update, frame)
    }

    /// Ask peers to return `entity_id` to its registered values.
    pub fn send_reset_object(&self, entity_id: EntityId) -> bool {
        let mut frame = self.start(MessageType::ResetObject);
        ResetRecord {
            scene_id: self.client_id,
            entity_id,
        }
        .encode(&mut frame);
        self.push(Route::Update, frame)
    }

    /// Broadcast this peer's time as master.
    pub fn send_sync(&self) -> bool {
        let frame = self.start(MessageType::Sync);
        self.push(Route::Update, frame)
    }

    /// Start a round-trip measurement.
    pub fn send_ping(&self) -> bool {
        let frame = FrameHeader {
            client_id: self.client_id,
            time: self.clock.begin_ping(),
            message_type: MessageType::Ping,
        }
        .start_frame();
        self.push(Route::Command, frame)
    }
}

/// Observer that publishes local edits of distributed parameters.
#[derive(Debug, Clone)]
pub struct UpdatePublisher {
    sender: FrameSender,
}

impl UpdatePublisher {
    /// Publisher sending through `sender`.
    pub fn new(sender: FrameSender) -> Self {
        Self { sender }
    }
}

impl ParameterObserver for UpdatePublisher {
    fn on_change(&self, parameter: &Parameter, change: &ParameterChange) {
        if change.origin != ChangeOrigin::Local || !parameter.distribute() {
            return;
        }
        if parameter.is_rpc() {
            self.sender.send_rpc(parameter, &change.value);
        } else {
            self.sender.send_parameter_update(parameter);
        }
    }

    fn on_animation_updated(&self, parameter: &Parameter, origin: ChangeOrigin) {
        if origin == ChangeOrigin::Local && parameter.distribute() && !parameter.is_rpc() {
            self.sender.send_parameter_update(parameter);
        }
    }
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Type from the header, if it decoded.
    pub message_type: Option<MessageType>,
    /// The frame came from this peer and was skipped.
    pub own_echo: bool,
    /// A Sync frame moved the local clock.
    pub clock_snapped: bool,
    /// Round trip completed by a Ping echo.
    pub rtt: Option<u32>,
    /// Records applied.
    pub applied: usize,
    /// Records dropped individually.
    pub dropped: usize,
    /// The frame was cut short by a framing error.
    pub aborted: bool,
    /// Entities whose tracks changed, in first-seen order.
    pub animated_entities: Vec<EntityId>,
}

/// Classifies inbound frames and applies them to the registry.
pub struct MessageRouter {
    client_id: u8,
    registry: Arc<SceneObjectRegistry>,
    rpc: Arc<RpcTable>,
    clock: Arc<ClockSync>,
    host: Arc<dyn SceneHost>,
    sender: FrameSender,
}

impl MessageRouter {
    /// Router for peer `client_id`.
    pub fn new(
        registry: Arc<SceneObjectRegistry>,
        rpc: Arc<RpcTable>,
        clock: Arc<ClockSync>,
        host: Arc<dyn SceneHost>,
        sender: FrameSender,
    ) -> Self {
        Self {
            client_id: sender.client_id(),
            registry,
            rpc,
            clock,
            host,
            sender,
        }
    }

    /// This peer's client id.
    pub fn client_id(&self) -> u8 {
        self.client_id
    }

    /// Entity registry.
    pub fn registry(&self) -> &Arc<SceneObjectRegistry> {
        &self.registry
    }

    /// Call table.
    pub fn rpc(&self) -> &Arc<RpcTable> {
        &self.rpc
    }

    /// Shared clock.
    pub fn clock(&self) -> &Arc<ClockSync> {
        &self.clock
    }

    /// Outbound half.
    pub fn sender(&self) -> &FrameSender {
        &self.sender
    }

    /// Subscribe an [`UpdatePublisher`] to every registered parameter and call.
    ///
    /// Returns the number of parameters wired up. Call once after the scene
    /// has been registered.
    pub fn attach_publisher(&self) -> usize {
        let publisher: Arc<dyn ParameterObserver> =
            Arc::new(UpdatePublisher::new(self.sender.clone()));
        let mut wired = 0;
        for entity in self.registry.entities() {
            for parameter in entity.parameters() {
                parameter.add_observer(Arc::clone(&publisher));
                wired += 1;
            }
        }
        for call in self.rpc.calls() {
            call.add_observer(Arc::clone(&publisher));
            wired += 1;
        }
        debug!(wired, "update publisher attached");
        wired
    }

    /// Apply one inbound frame. Never panics on malformed input.
    #[instrument(level = "debug", skip(self, frame), fields(len = frame.len()))]
    pub fn handle_frame(&self, frame: &[u8]) -> FrameReport {
        let mut report = FrameReport::default();
        let (header, body) = match FrameHeader::decode(frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%err, "dropping frame");
                report.aborted = true;
                return report;
            }
        };
        report.message_type = Some(header.message_type);

        if header.message_type == MessageType::Sync {
            report.clock_snapped = self.clock.on_sync(header.time);
        }
        if header.client_id == self.client_id {
            report.own_echo = true;
            return report;
        }

        match header.message_type {
            MessageType::Sync => {}
            MessageType::Ping => {
                report.rtt = self.clock.on_pong();
                if let Some(rtt) = report.rtt {
                    debug!(rtt, estimate = ?self.clock.rtt_estimate(), "pong");
                }
            }
            MessageType::ParameterUpdate => {
                self.for_each_record(body, &mut report, ValueRecord::decode, |record, report| {
                    self.apply_parameter_update(record, report)
                });
            }
            MessageType::Lock => {
                self.for_each_record(body, &mut report, LockRecord::decode, |record, _| {
                    self.apply_lock(record)
                });
            }
            MessageType::Rpc => {
                self.for_each_record(body, &mut report, ValueRecord::decode, |record, _| {
                    self.apply_rpc(record)
                });
            }
            MessageType::ResetObject => {
                self.for_each_record(body, &mut report, ResetRecord::decode, |record, report| {
                    self.apply_reset(record, report)
                });
            }
            MessageType::ResendUpdate | MessageType::UndoRedoAdd | MessageType::DataHub => {
                debug!(
                    message_type = ?header.message_type,
                    from = header.client_id,
                    "skipping unhandled message type"
                );
            }
        }

        if !report.animated_entities.is_empty() {
            self.host.materialize_animation(&report.animated_entities);
        }
        report
    }

    fn for_each_record<'a, R>(
        &self,
        body: &'a [u8],
        report: &mut FrameReport,
        decode: impl Fn(&mut WireReader<'a>) -> Result<R, NetError>,
        mut apply: impl FnMut(R, &mut FrameReport) -> Result<(), NetError>,
    ) {
        let mut reader = WireReader::new(body);
        while !reader.is_empty() {
            let offset = reader.position();
            let record = match decode(&mut reader) {
                Ok(record) => record,
                Err(err) => {
                    warn!(%err, offset, "aborting rest of frame");
                    report.aborted = true;
                    return;
                }
            };
            match apply(record, report) {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    warn!(%err, offset, "dropping record");
                    report.dropped += 1;
                }
            }
        }
    }

    fn apply_parameter_update(
        &self,
        record: ValueRecord<'_>,
        report: &mut FrameReport,
    ) -> Result<(), NetError> {
        let parameter = self
            .registry
            .resolve(record.entity_id, record.parameter_id)?;
        check_type(&parameter, record.type_tag)?;
        let outcome = parameter.deserialize(record.payload)?;
        debug!(
            entity_id = record.entity_id,
            parameter_id = record.parameter_id,
            changed = outcome.value_changed,
            animated = outcome.animation_updated,
            "parameter update"
        );
        if outcome.animation_updated && !report.animated_entities.contains(&record.entity_id) {
            report.animated_entities.push(record.entity_id);
        }
        Ok(())
    }

    fn apply_lock(&self, record: LockRecord) -> Result<(), NetError> {
        let entity = self.registry.resolve_entity(record.entity_id)?;
        entity.set_remote_lock(record.locked);
        debug!(entity_id = record.entity_id, locked = record.locked, "lock");
        self.host.on_lock_changed(&entity, record.locked);
        Ok(())
    }

    fn apply_rpc(&self, record: ValueRecord<'_>) -> Result<(), NetError> {
        let call = self.rpc.resolve(record.parameter_id)?;
        check_type(&call, record.type_tag)?;
        let value = codec::value_from_bytes(record.payload, record.type_tag)?;
        debug!(call_id = record.parameter_id, name = call.name(), "rpc");
        call.fire(value.clone(), ChangeOrigin::Remote)?;
        self.host.on_rpc(&call, &value);
        Ok(())
    }

    fn apply_reset(&self, record: ResetRecord, report: &mut FrameReport) -> Result<(), NetError> {
        let entity = self.registry.resolve_entity(record.entity_id)?;
        let mut animation_updated = false;
        for parameter in entity.parameters() {
            animation_updated |= parameter.reset().animation_updated;
        }
        debug!(entity_id = record.entity_id, "reset");
        if animation_updated && !report.animated_entities.contains(&record.entity_id) {
            report.animated_entities.push(record.entity_id);
        }
        Ok(())
    }
}

fn check_type(parameter: &Parameter, type_tag: u8) -> Result<(), SyncError> {
    let found = ParamType::try_from(type_tag)?;
    if found != parameter.param_type() {
        return Err(SyncError::TypeMismatch {
            expected: parameter.param_type(),
            found,
        });
    }
    Ok(())
}

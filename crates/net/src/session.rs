//! Session wiring: registry, clock and router plus the periodic socket tasks.
//!
//! A [`SyncSession`] is built first so the host can register its scene, then
//! [`SyncSession::start`] binds the sockets and spawns the tasks:
//!
//! - clock tick
//! - subscribe poll (drains the subscribe socket into the router)
//! - publish drain (outbox to the publish and command sockets)
//! - ping (probes, or echoes and Sync broadcasts when time master)
//! - distribution server, when blobs are supplied
//!
//! The time master is also the hub. Its subscribe socket binds the update
//! port, every other peer publishes there, and the master applies each frame
//! and republishes it to the subscribers it has learned. A peer joins by
//! sending an announcement (a header-only `ParameterUpdate`) from its own
//! subscribe socket to the master's update port.

use crate::clock::{ClockConfig, ClockSync};
use crate::distribution::{DistributionServer, SceneBlobProvider};
use crate::error::NetError;
use crate::protocol::{FrameHeader, MessageType, HEADER_LEN};
use crate::router::{FrameSender, MessageRouter, OutboundFrame, Route, SceneHost};
use crate::transport::{CommandSocket, PublishSocket, SubscribeSocket, Subscribers, MAX_DATAGRAM};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracer_sync_core::{RpcTable, SceneObjectRegistry};
use tracing::{debug, info, warn};

/// Network settings for one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Id stamped into every outbound frame. Must be unique per peer.
    pub client_id: u8,
    /// Local address sockets bind to.
    pub bind_ip: IpAddr,
    /// Address of the peer serving as hub and time master.
    pub server_ip: IpAddr,
    /// TCP port of the scene distribution server.
    pub dist_port: u16,
    /// UDP port the subscribe socket binds on every peer but the master.
    pub sync_port: u16,
    /// UDP port the master receives updates and announcements on.
    pub update_sender_port: u16,
    /// UDP port of the ping/command endpoint.
    pub command_port: u16,
    /// Explicit publish destinations. Empty means the server's update port,
    /// or only the learned subscribers on the master.
    pub publish_targets: Vec<SocketAddr>,
    /// Milliseconds between socket polls.
    pub poll_interval_ms: u64,
    /// Answer pings and broadcast Sync instead of pinging.
    pub sync_master: bool,
    /// Logical clock tuning.
    pub clock: ClockConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: 10,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            server_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            dist_port: 5555,
            sync_port: 5556,
            update_sender_port: 5557,
            command_port: 5558,
            publish_targets: Vec::new(),
            poll_interval_ms: 10,
            sync_master: false,
            clock: ClockConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Where the subscribe socket binds: the update port on the master, the sync port elsewhere.
    pub fn subscribe_addr(&self) -> SocketAddr {
        let port = if self.sync_master {
            self.update_sender_port
        } else {
            self.sync_port
        };
        SocketAddr::new(self.bind_ip, port)
    }

    /// The master's update port, where updates and announcements go.
    pub fn update_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.update_sender_port)
    }

    /// Whether this peer joins the master's subscriber list.
    pub fn announces(&self) -> bool {
        !self.sync_master && self.publish_targets.is_empty()
    }

    /// Where the distribution server binds.
    pub fn distribution_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.dist_port)
    }

    /// Fixed destinations for published frames.
    pub fn publish_targets(&self) -> Vec<SocketAddr> {
        if self.publish_targets.is_empty() && !self.sync_master {
            vec![self.update_addr()]
        } else {
            self.publish_targets.clone()
        }
    }

    /// Where the command socket binds: the command port for the master, any port otherwise.
    pub fn command_bind_addr(&self) -> SocketAddr {
        let port = if self.sync_master { self.command_port } else { 0 };
        SocketAddr::new(self.bind_ip, port)
    }

    /// Where pings are sent.
    pub fn command_peer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.command_port)
    }

    /// Time between socket polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Registry, clock and router for one peer, before any socket exists.
pub struct SyncSession {
    config: SyncConfig,
    router: Arc<MessageRouter>,
    outbox: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl SyncSession {
    /// Build an empty session reporting to `host`.
    pub fn new(config: SyncConfig, host: Arc<dyn SceneHost>) -> Self {
        let clock = Arc::new(ClockSync::new(config.clock.clone()));
        let (sender, outbox) = FrameSender::channel(config.client_id, Arc::clone(&clock));
        let router = MessageRouter::new(
            Arc::new(SceneObjectRegistry::new()),
            Arc::new(RpcTable::new()),
            clock,
            host,
            sender,
        );
        Self {
            config,
            router: Arc::new(router),
            outbox,
        }
    }

    /// Settings in effect.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Entity registry, for registering the scene before start.
    pub fn registry(&self) -> &Arc<SceneObjectRegistry> {
        self.router.registry()
    }

    /// Call table.
    pub fn rpc(&self) -> &Arc<RpcTable> {
        self.router.rpc()
    }

    /// Router shared with the tasks.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Bind sockets, publish local edits and spawn the periodic tasks.
    ///
    /// A subscribe port that cannot be bound yet is retried on every poll
    /// tick. The publish and command sockets must bind.
    pub async fn start(
        self,
        blobs: Option<Arc<dyn SceneBlobProvider>>,
    ) -> Result<RunningSession> {
        let Self {
            config,
            router,
            outbox,
        } = self;
        let wired = router.attach_publisher();
        info!(
            client_id = config.client_id,
            entities = router.registry().len(),
            parameters = wired,
            "starting sync session"
        );

        let subscribe = match SubscribeSocket::bind(config.subscribe_addr()).await {
            Ok(socket) => Some(socket),
            Err(err) => {
                warn!("{:#}; will retry", err);
                None
            }
        };
        let subscribe_addr = subscribe
            .as_ref()
            .and_then(|socket| socket.local_addr().ok());
        let subscribers = Arc::new(Subscribers::new());
        let publish = PublishSocket::bind(
            SocketAddr::new(config.bind_ip, 0),
            config.publish_targets(),
        )
        .await?
        .with_subscribers(Arc::clone(&subscribers));
        let command = Arc::new(
            CommandSocket::bind(config.command_bind_addr(), config.command_peer_addr()).await?,
        );
        let command_addr = command.local_addr()?;

        let inbound = if config.sync_master {
            tokio::spawn(relay_task(
                subscribe,
                config.subscribe_addr(),
                config.poll_interval(),
                Arc::clone(&router),
                Arc::clone(&subscribers),
            ))
        } else {
            let announce_to = config.announces().then(|| config.update_addr());
            tokio::spawn(subscribe_task(
                subscribe,
                config.subscribe_addr(),
                config.poll_interval(),
                announce_to,
                Arc::clone(&router),
            ))
        };
        let mut tasks = vec![
            tokio::spawn(clock_task(Arc::clone(router.clock()))),
            inbound,
            tokio::spawn(publish_task(outbox, publish, Arc::clone(&command))),
            tokio::spawn(ping_task(
                command,
                config.poll_interval(),
                config.sync_master,
                Arc::clone(&router),
            )),
        ];

        let mut distribution_addr = None;
        if let Some(blobs) = blobs {
            let server = DistributionServer::bind(config.distribution_addr()).await?;
            distribution_addr = Some(server.local_addr()?);
            tasks.push(tokio::spawn(server.serve(blobs)));
        }

        Ok(RunningSession {
            router,
            subscribers,
            tasks,
            subscribe_addr,
            command_addr,
            distribution_addr,
        })
    }
}

/// A started session. Dropping it stops every task.
pub struct RunningSession {
    router: Arc<MessageRouter>,
    subscribers: Arc<Subscribers>,
    tasks: Vec<JoinHandle<()>>,
    subscribe_addr: Option<SocketAddr>,
    command_addr: SocketAddr,
    distribution_addr: Option<SocketAddr>,
}

impl RunningSession {
    /// Router shared with the tasks.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Peers that announced themselves to this master.
    pub fn subscribers(&self) -> &Arc<Subscribers> {
        &self.subscribers
    }

    /// Bound subscribe address, if the bind succeeded at start.
    ///
    /// On the master this is the update port peers publish to.
    pub fn subscribe_addr(&self) -> Option<SocketAddr> {
        self.subscribe_addr
    }

    /// Bound command address.
    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    /// Bound distribution address, if blobs were supplied.
    pub fn distribution_addr(&self) -> Option<SocketAddr> {
        self.distribution_addr
    }

    /// Abort every task. Queued frames are dropped.
    pub fn shutdown(mut self) {
        self.abort_tasks();
        info!(client_id = self.router.client_id(), "sync session stopped");
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for RunningSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Feed every ready frame to the router.
pub fn poll_subscriber(
    socket: Option<&mut SubscribeSocket>,
    router: &MessageRouter,
) -> Result<usize, NetError> {
    let socket = socket.ok_or(NetError::SocketUnavailable("subscribe"))?;
    socket.drain(|frame| {
        router.handle_frame(frame);
    })
}

async fn clock_task(clock: Arc<ClockSync>) {
    let mut timer = interval(clock.config().tick_interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        clock.tick();
    }
}

async fn subscribe_task(
    mut socket: Option<SubscribeSocket>,
    addr: SocketAddr,
    period: Duration,
    announce_to: Option<SocketAddr>,
    router: Arc<MessageRouter>,
) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut announce = interval(router.clock().config().ping_interval());
    announce.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = timer.tick() => {
                if socket.is_none() {
                    socket = SubscribeSocket::bind(addr).await.ok();
                }
                match poll_subscriber(socket.as_mut(), &router) {
                    Ok(_) => {}
                    Err(NetError::SocketUnavailable(which)) => debug!(which, "socket unavailable, skipping tick"),
                    Err(err) => warn!(%err, "subscribe poll failed"),
                }
            }
            _ = announce.tick(), if announce_to.is_some() => {
                let (Some(socket), Some(to)) = (socket.as_ref(), announce_to) else {
                    continue;
                };
                let frame = announcement(router.client_id(), router.clock().time());
                if let Err(err) = socket.send_to(&frame, to).await {
                    debug!(%to, %err, "announcement failed");
                }
            }
        }
    }
}

/// Master side of the update port: learn subscribers, apply frames and
/// republish them.
async fn relay_task(
    mut socket: Option<SubscribeSocket>,
    addr: SocketAddr,
    period: Duration,
    router: Arc<MessageRouter>,
    subscribers: Arc<Subscribers>,
) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        if socket.is_none() {
            socket = SubscribeSocket::bind(addr).await.ok();
        }
        match relay_ready(socket.as_mut(), &router, &subscribers) {
            Ok(_) => {}
            Err(NetError::SocketUnavailable(which)) => debug!(which, "socket unavailable, skipping tick"),
            Err(err) => warn!(%err, "relay poll failed"),
        }
    }
}

/// Drain the update port once. Announcements join `subscribers`; other peer
/// frames are applied and queued for republishing. Pings and foreign Sync
/// frames stay local.
pub fn relay_ready(
    socket: Option<&mut SubscribeSocket>,
    router: &MessageRouter,
    subscribers: &Subscribers,
) -> Result<usize, NetError> {
    let socket = socket.ok_or(NetError::SocketUnavailable("update"))?;
    socket.drain_from(|frame, from| {
        if is_announcement(frame) {
            subscribers.join(from);
            return;
        }
        let report = router.handle_frame(frame);
        let local_only = matches!(
            report.message_type,
            Some(MessageType::Ping | MessageType::Sync) | None
        );
        if report.own_echo || report.aborted || local_only {
            return;
        }
        router.sender().forward(frame);
    })
}

/// Header-only `ParameterUpdate` sent from a subscribe socket to join the hub.
pub fn announcement(client_id: u8, time: u8) -> Vec<u8> {
    FrameHeader {
        client_id,
        time,
        message_type: MessageType::ParameterUpdate,
    }
    .start_frame()
}

/// Whether `frame` is a subscriber announcement.
pub fn is_announcement(frame: &[u8]) -> bool {
    frame.len() == HEADER_LEN
        && matches!(
            FrameHeader::decode(frame),
            Ok((header, _)) if header.message_type == MessageType::ParameterUpdate
        )
}

async fn publish_task(
    mut outbox: mpsc::UnboundedReceiver<OutboundFrame>,
    publish: PublishSocket,
    command: Arc<CommandSocket>,
) {
    while let Some(frame) = outbox.recv().await {
        match frame.route {
            Route::Update => {
                publish.publish(&frame.bytes).await;
            }
            Route::Command => {
                if let Err(err) = command.send(&frame.bytes).await {
                    warn!(%err, "ping send failed");
                }
            }
        }
    }
    debug!("outbox closed, publish task exiting");
}

async fn ping_task(
    command: Arc<CommandSocket>,
    poll: Duration,
    sync_master: bool,
    router: Arc<MessageRouter>,
) {
    let mut probe = interval(router.clock().config().ping_interval());
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut drain = interval(poll);
    drain.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = probe.tick() => {
                if sync_master {
                    router.sender().send_sync();
                } else {
                    router.sender().send_ping();
                }
            }
            _ = drain.tick() => {
                let mut echoes = Vec::new();
                let result = command.drain(&mut buf, |frame, from| {
                    if sync_master {
                        if is_foreign_ping(frame, router.client_id()) {
                            echoes.push(from);
                        }
                    } else {
                        router.handle_frame(frame);
                    }
                });
                if let Err(err) = result {
                    warn!(%err, "command poll failed");
                }
                if !echoes.is_empty() {
                    let pong = FrameHeader {
                        client_id: router.client_id(),
                        time: router.clock().time(),
                        message_type: MessageType::Ping,
                    }
                    .start_frame();
                    for to in echoes {
                        if let Err(err) = command.send_to(&pong, to).await {
                            warn!(%to, %err, "pong send failed");
                        }
                    }
                }
            }
        }
    }
}

fn is_foreign_ping(frame: &[u8], own_id: u8) -> bool {
    matches!(
        FrameHeader::decode(frame),
        Ok((header, _)) if header.message_type == MessageType::Ping && header.client_id != own_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::NullHost;

    #[test]
    fn default_ports_match_the_protocol() {
        let config = SyncConfig::default();
        assert_eq!(config.dist_port, 5555);
        assert_eq!(config.sync_port, 5556);
        assert_eq!(config.update_sender_port, 5557);
        assert_eq!(config.command_port, 5558);
        assert_eq!(
            config.publish_targets(),
            vec!["127.0.0.1:5557".parse::<SocketAddr>().unwrap()]
        );
        assert_eq!(config.command_bind_addr().port(), 0);
        assert_eq!(config.subscribe_addr().port(), 5556);
        assert!(config.announces());
    }

    #[test]
    fn master_binds_the_update_port_and_publishes_to_subscribers() {
        let config = SyncConfig {
            sync_master: true,
            ..SyncConfig::default()
        };
        assert_eq!(config.subscribe_addr().port(), 5557);
        assert_eq!(config.command_bind_addr().port(), 5558);
        assert!(config.publish_targets().is_empty());
        assert!(!config.announces());

        let explicit = SyncConfig {
            publish_targets: vec!["10.0.0.2:5556".parse().unwrap()],
            ..SyncConfig::default()
        };
        assert!(!explicit.announces());
        assert_eq!(explicit.publish_targets(), explicit.publish_targets);
    }

    #[test]
    fn announcements_are_header_only_updates() {
        let frame = announcement(4, 9);
        assert_eq!(frame, vec![4, 9, MessageType::ParameterUpdate.tag()]);
        assert!(is_announcement(&frame));
        assert!(!is_announcement(&[4, 9, MessageType::Sync.tag()]));
        assert!(!is_announcement(&[4, 9, MessageType::ParameterUpdate.tag(), 0]));
    }

    #[tokio::test]
    async fn update_port_learns_subscribers_and_republishes() {
        let mut session = SyncSession::new(
            SyncConfig {
                sync_master: true,
                client_id: 1,
                ..SyncConfig::default()
            },
            Arc::new(NullHost),
        );
        let cube = session.registry().register("cube").unwrap();
        session
            .registry()
            .register_parameter(cube, "height", 1.0f32, true)
            .unwrap();
        let mut socket = SubscribeSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let to = socket.local_addr().unwrap();
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut update = FrameHeader {
            client_id: 2,
            time: 0,
            message_type: MessageType::ParameterUpdate,
        }
        .start_frame();
        crate::protocol::ValueRecord {
            scene_id: 2,
            entity_id: cube,
            parameter_id: 0,
            type_tag: tracer_sync_core::ParamType::Float32.tag(),
            payload: &4.0f32.to_le_bytes(),
        }
        .encode(&mut update);
        peer.send_to(&announcement(2, 0), to).await.unwrap();
        peer.send_to(&update, to).await.unwrap();
        peer.send_to(&[2, 0, MessageType::Ping.tag()], to).await.unwrap();

        let subscribers = Subscribers::new();
        let mut seen = 0;
        for _ in 0..100 {
            seen += relay_ready(Some(&mut socket), session.router(), &subscribers).unwrap();
            if seen == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen, 3);
        assert_eq!(subscribers.snapshot(), vec![peer.local_addr().unwrap()]);
        assert_eq!(
            session.registry().resolve(cube, 0).unwrap().value(),
            tracer_sync_core::ParamValue::Float32(4.0)
        );
        let forwarded = session.outbox.try_recv().unwrap();
        assert_eq!(forwarded.route, Route::Update);
        assert_eq!(forwarded.bytes, update);
        assert!(session.outbox.try_recv().is_err());
    }

    #[test]
    fn missing_socket_skips_the_tick() {
        let session = SyncSession::new(SyncConfig::default(), Arc::new(NullHost));
        assert!(matches!(
            poll_subscriber(None, session.router()),
            Err(NetError::SocketUnavailable("subscribe"))
        ));
    }

    #[test]
    fn foreign_pings_are_echoed() {
        assert!(is_foreign_ping(&[3, 0, 3], 1));
        assert!(!is_foreign_ping(&[1, 0, 3], 1));
        assert!(!is_foreign_ping(&[3, 0, 0], 1));
        assert!(!is_foreign_ping(&[3], 1));
    }
}

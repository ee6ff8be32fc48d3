//! [`TransportSession`] – the broker connection behind the control loop.
//!
//! One background worker owns the socket.  It connects, subscribes to the
//! telemetry topic, writes queued commands in submission order, answers
//! keepalive, and reconnects with capped exponential backoff whenever the
//! link fails.  The owning task talks to it only through bounded queues and
//! a `watch` channel carrying the [`LinkStatus`].
//!
//! Commands are fire-and-forget: a command submitted while the link is down
//! is refused with [`RcError::NotConnected`], and commands still queued when
//! the link drops are discarded rather than replayed late.  A queued stop is
//! the exception: it is written first thing after the next handshake.

use std::sync::Arc;
use std::time::Duration;

use rcctl_types::{Command, LinkStatus, RcError, TelemetryEvent};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::codec::{Packet, connack_reason};
use crate::config::BrokerConfig;
use crate::link::{self, LinkReader, LinkWriter};

/// Something the worker wants the control loop to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(LinkStatus),
    Telemetry(TelemetryEvent),
}

#[derive(Debug)]
enum Outbound {
    Command(Command),
    Disconnect,
}

/// Decode an inbound telemetry payload.  Invalid UTF-8 is replaced, never
/// rejected.
pub fn decode_inbound(payload: &[u8]) -> TelemetryEvent {
    TelemetryEvent::tele(String::from_utf8_lossy(payload).into_owned())
}

/// Client id of the form `<prefix>_<8 hex chars>`.
pub fn generate_client_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &id[..8])
}

// ────────────────────────────────────────────────────────────────────────────
// TransportSession
// ────────────────────────────────────────────────────────────────────────────

/// Handle to the broker connection.
pub struct TransportSession {
    config: Arc<BrokerConfig>,
    client_id: String,
    status_tx: Arc<watch::Sender<LinkStatus>>,
    status_rx: watch::Receiver<LinkStatus>,
    events_tx: mpsc::Sender<SessionEvent>,
    outbound: Option<mpsc::Sender<Outbound>>,
    worker: Option<JoinHandle<()>>,
}

impl TransportSession {
    /// Create an idle session.  The returned receiver yields status changes
    /// and telemetry once [`connect`](Self::connect) has been called.
    pub fn new(config: BrokerConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (status_tx, status_rx) = watch::channel(LinkStatus::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let client_id = generate_client_id(&config.client_id_prefix);
        let session = Self {
            config: Arc::new(config),
            client_id,
            status_tx: Arc::new(status_tx),
            status_rx,
            events_tx,
            outbound: None,
            worker: None,
        };
        (session, events_rx)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current link state.
    pub fn status(&self) -> LinkStatus {
        *self.status_rx.borrow()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    /// Start the network worker.  A no-op while a worker is already running.
    pub fn connect(&mut self) {
        if let Some(worker) = &self.worker
            && !worker.is_finished()
        {
            debug!("connect ignored: session worker already running");
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let worker = Worker {
            config: Arc::clone(&self.config),
            client_id: self.client_id.clone(),
            status_tx: Arc::clone(&self.status_tx),
            events_tx: self.events_tx.clone(),
            outbound_rx,
            next_packet_id: 1,
            stop_owed: false,
        };
        self.outbound = Some(outbound_tx);
        self.worker = Some(tokio::spawn(worker.run()));
    }

    /// Queue `cmd` for the command topic.
    ///
    /// # Errors
    ///
    /// * [`RcError::NotConnected`] – the link is not up; the command is
    ///   dropped.
    /// * [`RcError::QueueFull`] – the worker is behind; the command is
    ///   dropped.
    pub fn publish(&self, cmd: &Command) -> Result<(), RcError> {
        if self.status() != LinkStatus::Connected {
            debug!(command = %cmd, "publish while disconnected; dropped");
            return Err(RcError::NotConnected);
        }
        let Some(tx) = &self.outbound else {
            return Err(RcError::NotConnected);
        };
        tx.try_send(Outbound::Command(*cmd)).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!(command = %cmd, "outbound queue full; dropped");
                RcError::QueueFull
            }
            TrySendError::Closed(_) => RcError::NotConnected,
        })
    }

    /// Flush queued commands, send DISCONNECT and stop the worker.
    ///
    /// Waits at most `disconnect_timeout` for each step before aborting the
    /// worker.  Calling it again is a no-op.
    pub async fn disconnect(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        let wait = self.config.disconnect_timeout;
        if let Some(tx) = self.outbound.take()
            && time::timeout(wait, tx.send(Outbound::Disconnect)).await.is_err()
        {
            warn!("outbound queue stuck during disconnect");
        }
        if time::timeout(wait, &mut worker).await.is_err() {
            warn!("session worker did not stop in time; aborting");
            worker.abort();
        }
        self.status_tx.send_replace(LinkStatus::Disconnected);
        info!("transport session closed");
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

/// Why an online period ended.
enum Exit {
    /// Disconnect requested; stop for good.
    Shutdown,
    /// Link failed; reconnect after backoff.
    Lost(RcError),
}

struct Worker {
    config: Arc<BrokerConfig>,
    client_id: String,
    status_tx: Arc<watch::Sender<LinkStatus>>,
    events_tx: mpsc::Sender<SessionEvent>,
    outbound_rx: mpsc::Receiver<Outbound>,
    next_packet_id: u16,
    /// A stop was queued when the link failed; send it after reconnecting.
    stop_owed: bool,
}

impl Worker {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        loop {
            self.set_status(LinkStatus::Connecting);
            self.emit(TelemetryEvent::sys(format!(
                "connecting to {}",
                self.config.endpoint()
            )));

            let exit = match self.establish().await {
                Ok((reader, writer)) => {
                    backoff.reset();
                    self.set_status(LinkStatus::Connected);
                    self.emit(TelemetryEvent::sys(format!(
                        "connected to {} as {}",
                        self.config.endpoint(),
                        self.client_id
                    )));
                    info!(endpoint = %self.config.endpoint(), client_id = %self.client_id, "broker connected");
                    self.online(reader, writer).await
                }
                Err(e) => Exit::Lost(e),
            };

            self.set_status(LinkStatus::Disconnected);
            let err = match exit {
                Exit::Shutdown => break,
                Exit::Lost(e) => e,
            };
            warn!(error = %err, "broker link down");
            self.emit(TelemetryEvent::err(err.to_string()));
            if self.discard_queued() {
                break;
            }

            let delay = backoff.next_delay();
            self.emit(TelemetryEvent::sys(format!(
                "reconnecting in {:.1}s (attempt {})",
                delay.as_secs_f64(),
                backoff.attempt()
            )));
            if self.sleep_or_shutdown(delay).await {
                break;
            }
        }
        self.set_status(LinkStatus::Disconnected);
        debug!("session worker exited");
    }

    /// Open the link, perform the CONNECT/CONNACK handshake and subscribe.
    async fn establish(&mut self) -> Result<(LinkReader, LinkWriter), RcError> {
        let limit = self.config.connect_timeout;
        time::timeout(limit, self.handshake())
            .await
            .map_err(|_| RcError::Connect(format!("timed out after {}s", limit.as_secs())))?
    }

    async fn handshake(&mut self) -> Result<(LinkReader, LinkWriter), RcError> {
        let (mut reader, mut writer) = link::open(&self.config).await?;

        let credentials = self.config.credentials.as_ref();
        writer
            .send(&Packet::Connect {
                client_id: self.client_id.clone(),
                keepalive_secs: self.config.keepalive_secs,
                clean_session: true,
                username: credentials.map(|c| c.username.clone()),
                password: credentials.map(|c| c.password.as_bytes().to_vec()),
            })
            .await?;

        match reader.recv().await? {
            Packet::ConnAck { return_code: 0, .. } => {}
            Packet::ConnAck { return_code, .. } => {
                return Err(RcError::Connect(format!(
                    "broker refused connection: {}",
                    connack_reason(return_code)
                )));
            }
            other => {
                return Err(RcError::Protocol(format!(
                    "expected CONNACK, got {other:?}"
                )));
            }
        }

        let packet_id = self.packet_id();
        writer
            .send(&Packet::Subscribe {
                packet_id,
                filters: vec![(self.config.telemetry_topic(), 0)],
            })
            .await?;

        if self.stop_owed {
            writer.send(&self.command_packet(Command::Stop)).await?;
            self.stop_owed = false;
            debug!("stop from the previous link re-sent");
        }
        Ok((reader, writer))
    }

    async fn online(&mut self, mut reader: LinkReader, mut writer: LinkWriter) -> Exit {
        let keepalive = self.config.keepalive();
        let inbound_timeout = self.config.inbound_timeout();
        let period = keepalive.unwrap_or(Duration::from_secs(3600));
        let mut ping = time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            let deadline = last_inbound + inbound_timeout.unwrap_or(Duration::from_secs(3600));
            tokio::select! {
                packet = reader.recv() => {
                    let packet = match packet {
                        Ok(p) => p,
                        Err(e) => return Exit::Lost(e),
                    };
                    last_inbound = Instant::now();
                    if let Err(e) = self.on_packet(packet, &mut writer).await {
                        return Exit::Lost(e);
                    }
                }
                msg = self.outbound_rx.recv() => match msg {
                    Some(Outbound::Command(cmd)) => {
                        if let Err(e) = writer.send(&self.command_packet(cmd)).await {
                            if cmd == Command::Stop {
                                self.stop_owed = true;
                            }
                            return Exit::Lost(e);
                        }
                        debug!(command = %cmd, "command published");
                    }
                    Some(Outbound::Disconnect) | None => {
                        let _ = writer.send(&Packet::Disconnect).await;
                        writer.close().await;
                        self.emit(TelemetryEvent::sys("disconnected"));
                        return Exit::Shutdown;
                    }
                },
                _ = ping.tick(), if keepalive.is_some() => {
                    if let Err(e) = writer.send(&Packet::PingReq).await {
                        return Exit::Lost(e);
                    }
                }
                _ = time::sleep_until(deadline), if inbound_timeout.is_some() => {
                    writer.close().await;
                    return Exit::Lost(RcError::Io(format!(
                        "no traffic from broker for {}s",
                        inbound_timeout.map(|d| d.as_secs()).unwrap_or_default()
                    )));
                }
            }
        }
    }

    async fn on_packet(&self, packet: Packet, writer: &mut LinkWriter) -> Result<(), RcError> {
        match packet {
            Packet::Publish {
                payload,
                qos,
                packet_id,
                ..
            } => {
                if qos > 0
                    && let Some(packet_id) = packet_id
                {
                    writer.send(&Packet::PubAck { packet_id }).await?;
                }
                self.emit(decode_inbound(&payload));
            }
            Packet::SubAck { return_codes, .. } => {
                if return_codes.iter().any(|&c| c == 0x80) {
                    self.emit(TelemetryEvent::err(format!(
                        "subscription to {} rejected",
                        self.config.telemetry_topic()
                    )));
                } else {
                    self.emit(TelemetryEvent::sys(format!(
                        "subscribed {}",
                        self.config.telemetry_topic()
                    )));
                }
            }
            Packet::PingResp => {}
            Packet::Disconnect => {
                return Err(RcError::Io("broker sent DISCONNECT".into()));
            }
            other => debug!(packet = ?other, "ignoring unexpected packet"),
        }
        Ok(())
    }

    fn command_packet(&self, cmd: Command) -> Packet {
        Packet::Publish {
            topic: self.config.command_topic(),
            payload: cmd.to_wire(),
            qos: 0,
            retain: false,
            packet_id: None,
        }
    }

    /// Drop commands queued for the link that just failed, remembering a
    /// stop among them.  Returns `true` if a disconnect request was found.
    fn discard_queued(&mut self) -> bool {
        let mut dropped = 0usize;
        loop {
            match self.outbound_rx.try_recv() {
                Ok(Outbound::Command(Command::Stop)) => self.stop_owed = true,
                Ok(Outbound::Command(_)) => dropped += 1,
                Ok(Outbound::Disconnect) => return true,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
        if dropped > 0 {
            debug!(dropped, "discarded commands queued on a lost link");
        }
        false
    }

    /// Sleep for `delay`; returns `true` if a disconnect arrived meanwhile.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                msg = self.outbound_rx.recv() => match msg {
                    Some(Outbound::Command(Command::Stop)) => self.stop_owed = true,
                    Some(Outbound::Command(cmd)) => {
                        debug!(command = %cmd, "command submitted during backoff; dropped");
                    }
                    Some(Outbound::Disconnect) | None => return true,
                },
            }
        }
    }

    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    fn set_status(&self, status: LinkStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            self.emit(SessionEvent::Status(status));
        }
    }

    fn emit(&self, event: impl Into<SessionEvent>) {
        match self.events_tx.try_send(event.into()) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => warn!(event = ?ev, "session event queue full; dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl From<TelemetryEvent> for SessionEvent {
    fn from(event: TelemetryEvent) -> Self {
        SessionEvent::Telemetry(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Packet;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one MQTT packet from a raw socket (fake-broker side).
    async fn read_packet(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Packet {
        loop {
            if let Some((packet, used)) = Packet::decode(buf).unwrap() {
                buf.drain(..used);
                return packet;
            }
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed the socket");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn fake_broker() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn local_config(port: u16) -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".into(),
            port,
            device_id: "testcar".into(),
            connect_timeout: Duration::from_secs(2),
            ..BrokerConfig::default()
        }
    }

    async fn wait_for_status(rx: &mut mpsc::Receiver<SessionEvent>, wanted: LinkStatus) {
        time::timeout(Duration::from_secs(5), async {
            while let Some(ev) = rx.recv().await {
                if ev == SessionEvent::Status(wanted) {
                    return;
                }
            }
            panic!("event channel closed");
        })
        .await
        .expect("status change in time");
    }

    async fn next_telemetry(rx: &mut mpsc::Receiver<SessionEvent>) -> TelemetryEvent {
        time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(SessionEvent::Telemetry(ev)) if ev.kind == rcctl_types::TelemetryKind::Tele => {
                        return ev;
                    }
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("telemetry in time")
    }

    /// A worker wired to fresh channels, not yet running.
    fn worker_for(config: BrokerConfig) -> (mpsc::Sender<Outbound>, Worker, mpsc::Receiver<SessionEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (status_tx, _) = watch::channel(LinkStatus::Disconnected);
        let worker = Worker {
            config: Arc::new(config),
            client_id: "rc_test_00000000".into(),
            status_tx: Arc::new(status_tx),
            events_tx,
            outbound_rx,
            next_packet_id: 1,
            stop_owed: false,
        };
        (outbound_tx, worker, events_rx)
    }

    /// Answer CONNECT and consume SUBSCRIBE on a freshly accepted socket.
    async fn accept_session(listener: &TcpListener) -> (TcpStream, Vec<u8>) {
        let (mut sock, _) = time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("client connects")
            .unwrap();
        let mut buf = Vec::new();
        assert!(matches!(read_packet(&mut sock, &mut buf).await, Packet::Connect { .. }));
        sock.write_all(&Packet::ConnAck { session_present: false, return_code: 0 }.encode())
            .await
            .unwrap();
        assert!(matches!(read_packet(&mut sock, &mut buf).await, Packet::Subscribe { .. }));
        (sock, buf)
    }

    #[test]
    fn inbound_payload_is_decoded_lossily() {
        let ev = decode_inbound(&[b'o', b'k', 0xFF]);
        assert_eq!(ev.kind, rcctl_types::TelemetryKind::Tele);
        assert!(ev.payload.starts_with("ok"));
        assert!(ev.payload.contains('\u{FFFD}'));
    }

    #[test]
    fn client_id_has_prefix_and_suffix() {
        let id = generate_client_id("rc_keys");
        assert!(id.starts_with("rc_keys_"));
        assert_eq!(id.len(), "rc_keys_".len() + 8);
        assert_ne!(id, generate_client_id("rc_keys"));
    }

    #[tokio::test]
    async fn publish_before_connect_is_refused() {
        let (session, _events) = TransportSession::new(BrokerConfig::default());
        assert_eq!(session.status(), LinkStatus::Disconnected);
        assert_eq!(session.publish(&Command::Forward), Err(RcError::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_noop() {
        let (mut session, _events) = TransportSession::new(BrokerConfig::default());
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn connects_subscribes_relays_and_publishes_in_order() {
        let (listener, port) = fake_broker().await;
        let (mut session, mut events) = TransportSession::new(local_config(port));
        session.connect();
        // Second call while the worker runs must not start another one.
        session.connect();

        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();

        match read_packet(&mut sock, &mut buf).await {
            Packet::Connect { client_id, keepalive_secs, .. } => {
                assert_eq!(client_id, session.client_id());
                assert_eq!(keepalive_secs, 30);
            }
            other => panic!("expected CONNECT, got {other:?}"),
        }
        sock.write_all(&Packet::ConnAck { session_present: false, return_code: 0 }.encode())
            .await
            .unwrap();

        let packet_id = match read_packet(&mut sock, &mut buf).await {
            Packet::Subscribe { packet_id, filters } => {
                assert_eq!(filters, vec![("rc/testcar/tele".to_string(), 0)]);
                packet_id
            }
            other => panic!("expected SUBSCRIBE, got {other:?}"),
        };
        sock.write_all(&Packet::SubAck { packet_id, return_codes: vec![0] }.encode())
            .await
            .unwrap();

        wait_for_status(&mut events, LinkStatus::Connected).await;
        assert_eq!(session.status(), LinkStatus::Connected);

        // Telemetry from the vehicle reaches the event channel.
        sock.write_all(
            &Packet::Publish {
                topic: "rc/testcar/tele".into(),
                payload: b"ack F".to_vec(),
                qos: 0,
                retain: false,
                packet_id: None,
            }
            .encode(),
        )
        .await
        .unwrap();
        assert_eq!(next_telemetry(&mut events).await.payload, "ack F");

        // Commands arrive on the command topic in submission order.
        for cmd in [Command::Forward, Command::Speed(60), Command::Stop] {
            session.publish(&cmd).unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 3 {
            match read_packet(&mut sock, &mut buf).await {
                Packet::Publish { topic, payload, qos, retain, .. } => {
                    assert_eq!(topic, "rc/testcar/cmd");
                    assert_eq!(qos, 0);
                    assert!(!retain);
                    seen.push(String::from_utf8(payload).unwrap());
                }
                Packet::PingReq => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(seen, vec!["F", "speed:60", "S"]);

        session.disconnect().await;
        loop {
            match read_packet(&mut sock, &mut buf).await {
                Packet::Disconnect => break,
                Packet::PingReq => continue,
                other => panic!("expected DISCONNECT, got {other:?}"),
            }
        }
        assert_eq!(session.status(), LinkStatus::Disconnected);
        assert_eq!(session.publish(&Command::Stop), Err(RcError::NotConnected));
    }

    #[tokio::test]
    async fn qos1_telemetry_is_acknowledged() {
        let (listener, port) = fake_broker().await;
        let (mut session, mut events) = TransportSession::new(local_config(port));
        session.connect();

        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        assert!(matches!(read_packet(&mut sock, &mut buf).await, Packet::Connect { .. }));
        sock.write_all(&Packet::ConnAck { session_present: false, return_code: 0 }.encode())
            .await
            .unwrap();
        assert!(matches!(read_packet(&mut sock, &mut buf).await, Packet::Subscribe { .. }));

        sock.write_all(
            &Packet::Publish {
                topic: "rc/testcar/tele".into(),
                payload: b"battery 71".to_vec(),
                qos: 1,
                retain: false,
                packet_id: Some(42),
            }
            .encode(),
        )
        .await
        .unwrap();

        assert_eq!(
            read_packet(&mut sock, &mut buf).await,
            Packet::PubAck { packet_id: 42 }
        );
        assert_eq!(next_telemetry(&mut events).await.payload, "battery 71");
        session.disconnect().await;
    }

    #[tokio::test]
    async fn refused_connack_schedules_reconnect() {
        let (listener, port) = fake_broker().await;
        let mut cfg = local_config(port);
        cfg.reconnect.initial_backoff_ms = 50;
        let (mut session, mut events) = TransportSession::new(cfg);
        session.connect();

        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        assert!(matches!(read_packet(&mut sock, &mut buf).await, Packet::Connect { .. }));
        sock.write_all(&Packet::ConnAck { session_present: false, return_code: 5 }.encode())
            .await
            .unwrap();

        let mut saw_err = false;
        let mut saw_retry = false;
        time::timeout(Duration::from_secs(5), async {
            while !(saw_err && saw_retry) {
                match events.recv().await {
                    Some(SessionEvent::Telemetry(ev)) => {
                        if ev.kind == rcctl_types::TelemetryKind::Err && ev.payload.contains("not authorized") {
                            saw_err = true;
                        }
                        if ev.payload.starts_with("reconnecting in") {
                            saw_retry = true;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await
        .expect("refusal reported");
        assert!(saw_err && saw_retry);

        // The worker comes back after the backoff delay.
        let (mut sock2, _) = time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("reconnect attempt")
            .unwrap();
        let mut buf2 = Vec::new();
        assert!(matches!(read_packet(&mut sock2, &mut buf2).await, Packet::Connect { .. }));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn link_loss_reports_disconnected_and_refuses_publish() {
        let (listener, port) = fake_broker().await;
        let mut cfg = local_config(port);
        cfg.reconnect.initial_backoff_ms = 5_000;
        let (mut session, mut events) = TransportSession::new(cfg);
        session.connect();

        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        read_packet(&mut sock, &mut buf).await;
        sock.write_all(&Packet::ConnAck { session_present: false, return_code: 0 }.encode())
            .await
            .unwrap();
        wait_for_status(&mut events, LinkStatus::Connected).await;

        drop(sock);
        wait_for_status(&mut events, LinkStatus::Disconnected).await;
        assert_eq!(session.publish(&Command::Forward), Err(RcError::NotConnected));

        // Disconnect interrupts the backoff sleep promptly.
        time::timeout(Duration::from_secs(1), session.disconnect())
            .await
            .expect("disconnect during backoff");
    }

    #[tokio::test]
    async fn unreachable_broker_keeps_retrying() {
        // Bind then drop to get a port nobody listens on.
        let (listener, port) = fake_broker().await;
        drop(listener);
        let mut cfg = local_config(port);
        cfg.reconnect.initial_backoff_ms = 10;
        cfg.reconnect.max_backoff_ms = 20;
        let (mut session, mut events) = TransportSession::new(cfg);
        session.connect();

        let mut errors = 0;
        time::timeout(Duration::from_secs(5), async {
            while errors < 3 {
                if let Some(SessionEvent::Telemetry(ev)) = events.recv().await
                    && ev.kind == rcctl_types::TelemetryKind::Err
                {
                    errors += 1;
                }
            }
        })
        .await
        .expect("repeated connect failures");
        assert_ne!(session.status(), LinkStatus::Connected);
        session.disconnect().await;
    }

    #[test]
    fn stop_survives_discarding_a_dead_links_queue() {
        let (tx, mut worker, _events) = worker_for(local_config(1));
        tx.try_send(Outbound::Command(Command::Forward)).unwrap();
        tx.try_send(Outbound::Command(Command::Stop)).unwrap();
        tx.try_send(Outbound::Command(Command::Speed(40))).unwrap();

        assert!(!worker.discard_queued());
        assert!(worker.stop_owed);
        assert!(worker.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn owed_stop_is_first_publish_after_reconnect() {
        let (listener, port) = fake_broker().await;
        let (tx, mut worker, mut events) = worker_for(local_config(port));
        worker.stop_owed = true;
        let task = tokio::spawn(worker.run());

        let (mut sock, mut buf) = accept_session(&listener).await;
        match read_packet(&mut sock, &mut buf).await {
            Packet::Publish { topic, payload, .. } => {
                assert_eq!(topic, "rc/testcar/cmd");
                assert_eq!(payload, b"S");
            }
            other => panic!("expected PUBLISH S, got {other:?}"),
        }
        wait_for_status(&mut events, LinkStatus::Connected).await;

        tx.send(Outbound::Disconnect).await.unwrap();
        time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn silent_broker_gets_pinged_then_dropped() {
        let (listener, port) = fake_broker().await;
        let mut cfg = local_config(port);
        cfg.keepalive_secs = 1;
        cfg.reconnect.initial_backoff_ms = 50;
        let (mut session, mut events) = TransportSession::new(cfg);
        session.connect();

        let (mut sock, mut buf) = accept_session(&listener).await;
        wait_for_status(&mut events, LinkStatus::Connected).await;

        // PINGREQ after one keepalive period; never answered.
        let ping = time::timeout(Duration::from_secs(3), read_packet(&mut sock, &mut buf))
            .await
            .expect("ping within keepalive");
        assert_eq!(ping, Packet::PingReq);

        // 1.5 x keepalive without inbound traffic ends the link.
        wait_for_status(&mut events, LinkStatus::Disconnected).await;

        let (mut sock2, _) = time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("reconnect attempt")
            .unwrap();
        let mut buf2 = Vec::new();
        assert!(matches!(read_packet(&mut sock2, &mut buf2).await, Packet::Connect { .. }));
        drop(sock);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn websocket_transport_negotiates_mqtt_subprotocol() {
        use futures_util::{SinkExt, StreamExt};
        use std::sync::Mutex;
        use tokio_tungstenite::tungstenite::Message;
        use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
        use tokio_tungstenite::tungstenite::http::HeaderValue;

        let (listener, port) = fake_broker().await;
        let mut cfg = local_config(port);
        cfg.transport = crate::config::Transport::Ws;
        let (mut session, mut events) = TransportSession::new(cfg);
        session.connect();

        let (sock, _) = listener.accept().await.unwrap();
        let seen: Arc<Mutex<Option<(String, Option<String>)>>> = Arc::default();
        let seen_cb = Arc::clone(&seen);
        let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            let proto = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            *seen_cb.lock().unwrap() = Some((req.uri().path().to_string(), proto));
            resp.headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mqtt"));
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(sock, callback).await.unwrap();
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(("/mqtt".to_string(), Some("mqtt".to_string())))
        );

        async fn next_packet<S>(ws: &mut S) -> Packet
        where
            S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
        {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        let (packet, used) = Packet::decode(&data).unwrap().expect("whole packet per frame");
                        assert_eq!(used, data.len());
                        return packet;
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("websocket ended: {other:?}"),
                }
            }
        }

        assert!(matches!(next_packet(&mut ws).await, Packet::Connect { .. }));
        ws.send(Message::Binary(
            Packet::ConnAck { session_present: false, return_code: 0 }.encode().into(),
        ))
        .await
        .unwrap();
        assert!(matches!(next_packet(&mut ws).await, Packet::Subscribe { .. }));
        wait_for_status(&mut events, LinkStatus::Connected).await;

        session.publish(&Command::Left).unwrap();
        loop {
            match next_packet(&mut ws).await {
                Packet::Publish { topic, payload, .. } => {
                    assert_eq!(topic, "rc/testcar/cmd");
                    assert_eq!(payload, b"L");
                    break;
                }
                Packet::PingReq => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
        session.disconnect().await;
    }
}

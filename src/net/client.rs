//! MQTT session task.
//!
//! Five-phase state machine over the non-blocking transport:
//!
//! ```text
//! Disconnected ──dial + handshake──▶ MqttConnect ──CONNACK rc=0──▶ Connected
//!      ▲                                  │ rc!=0 / timeout / io error
//!      └───────── backoff ◀─────────── Error
//! ```
//!
//! The task drains the network queue while Connected, emits PINGREQ on the
//! half-keepalive cadence, probes socket health every iteration, and on any
//! transport failure pushes the in-flight message back to the front of the
//! queue before tearing the session down.

use crate::config;
use crate::fabric::{
    Counters, EVENT_DATA_READY, EVENT_MQTT_CONNECTED, EVENT_NETWORK_CONNECTED, EVENT_SHUTDOWN,
    EVENT_TLS_READY, Fabric, WaitMode,
};
use crate::net::codec::{Packet, PacketIds};
use crate::net::transport::{Dialer, Transport};
use crate::processing::PRIORITY_NORMAL;
use log::debug;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    MqttConnect,
    Connected,
    Error,
}

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const COOLOFF_MS: u32 = 30_000;
const SEND_RETRY_SPACING_MS: u64 = 100;
const SEND_RETRY_CEILING: u32 = 50;

/// Backoff before reconnect attempt number `failures` (1-based), capped at
/// thirty seconds.
fn backoff_delay_ms(failures: u32) -> u32 {
    (5000 + 2000 * failures.saturating_sub(1)).min(30_000)
}

/// Wrapping tick comparison: has `now` reached `deadline`?
fn reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) < u32::MAX / 2
}

pub struct NetworkTask<D: Dialer> {
    fabric: Arc<Fabric>,
    priority: u8,
    dialer: D,
    phase: SessionPhase,
    conn: Option<D::Conn>,
    packet_ids: PacketIds,
    rx: Vec<u8>,
    last_ping_ms: u32,
    attempts: u32,
    retry_at_ms: Option<u32>,
}

impl<D: Dialer> NetworkTask<D> {
    pub fn new(fabric: Arc<Fabric>, dialer: D) -> Self {
        Self {
            fabric,
            priority: config::priority::NETWORK,
            dialer,
            phase: SessionPhase::Disconnected,
            conn: None,
            packet_ids: PacketIds::new(),
            rx: Vec::with_capacity(config::MQTT_BUFFER_SIZE),
            last_ping_ms: 0,
            attempts: 0,
            retry_at_ms: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn run(&mut self) {
        let mode = if config::USE_TLS { "TLS" } else { "plaintext" };
        self.console(&format!("[Network] Started ({mode} mode)"));

        self.console("[Network] Waiting for system ready event...");
        self.fabric.events.wait(
            EVENT_DATA_READY | EVENT_SHUTDOWN,
            WaitMode::Any,
            false,
            None,
        );
        if self.fabric.shutting_down() {
            self.console("[Network] Shutting down");
            return;
        }
        self.console("[Network] Entering main loop...");

        loop {
            if !self.step() {
                break;
            }
            self.fabric.idle(Duration::from_millis(10));
        }
    }

    /// One iteration of the session loop. Returns false once the task has
    /// completed its shutdown sequence.
    pub fn step(&mut self) -> bool {
        if self.fabric.shutting_down() {
            self.shutdown();
            return false;
        }

        if self.phase == SessionPhase::Disconnected {
            self.try_connect();
        }

        if self.session_up() {
            let dead = self.conn.as_mut().is_some_and(|conn| !conn.is_alive());
            if dead {
                self.console("[Network] Connection health check failed");
                self.phase = SessionPhase::Error;
            }
        }

        if self.session_up() {
            self.read_incoming();
        }

        if self.phase == SessionPhase::Connected {
            self.publish_one();
        }
        if self.phase == SessionPhase::Connected {
            self.keepalive();
        }

        if self.phase == SessionPhase::Error {
            self.enter_backoff();
        }

        true
    }

    fn session_up(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::MqttConnect | SessionPhase::Connected
        )
    }

    fn console(&self, text: &str) {
        self.fabric.console.line(self.priority, text);
    }

    // ------------------------------------------------------------------
    // Connection establishment
    // ------------------------------------------------------------------

    fn try_connect(&mut self) {
        let now = self.fabric.clock.now_ms();
        if let Some(deadline) = self.retry_at_ms {
            if !reached(now, deadline) {
                return;
            }
            self.retry_at_ms = None;
        }

        if self.attempts >= MAX_RECONNECT_ATTEMPTS {
            self.console("[Network] Max reconnection attempts reached, waiting longer...");
            self.retry_at_ms = Some(now.wrapping_add(COOLOFF_MS));
            self.attempts = 0;
            return;
        }

        self.phase = SessionPhase::Connecting;
        match self.dialer.dial() {
            Ok(conn) => {
                self.conn = Some(conn);
                let mut up = EVENT_NETWORK_CONNECTED;
                if config::USE_TLS {
                    up |= EVENT_TLS_READY;
                }
                self.fabric.events.set(up);
                self.console("[Network] Transport connected");

                let connect = Packet::Connect {
                    client_id: config::MQTT_CLIENT_ID.to_string(),
                    keep_alive: config::MQTT_KEEPALIVE_SECS,
                    clean_session: true,
                };
                match connect.encode() {
                    Ok(frame) if self.send_frame(&frame) => {
                        self.phase = SessionPhase::MqttConnect;
                        self.last_ping_ms = now;
                        self.console("[Network] MQTT CONNECT packet sent");
                    }
                    _ => {
                        self.console("[Network] Failed to send MQTT CONNECT");
                        self.phase = SessionPhase::Error;
                    }
                }
            }
            Err(e) => {
                self.console(&format!("[Network] {e}"));
                self.phase = SessionPhase::Error;
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound control packets
    // ------------------------------------------------------------------

    fn read_incoming(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        let mut buf = [0u8; config::MQTT_BUFFER_SIZE];
        let result = conn.recv(&mut buf);
        match result {
            Ok(0) => {
                self.console("[Network] Peer closed connection gracefully");
                self.phase = SessionPhase::Error;
                return;
            }
            Ok(n) => self.rx.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                self.console(&format!("[Network] Read error: {e}"));
                self.phase = SessionPhase::Error;
                return;
            }
        }

        loop {
            match Packet::decode(&self.rx) {
                Ok(Some((packet, used))) => {
                    if let Packet::Unknown { packet_type } = packet {
                        let dump: Vec<String> = self.rx[..used.min(16)]
                            .iter()
                            .map(|b| format!("{b:02x}"))
                            .collect();
                        self.console(&format!(
                            "[Network] Unknown packet type: 0x{packet_type:02x} [{}]",
                            dump.join(" ")
                        ));
                    }
                    self.rx.drain(..used);
                    self.handle_packet(packet);
                    if self.phase == SessionPhase::Error {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    self.console(&format!("[Network] Malformed packet: {e}"));
                    self.rx.clear();
                    self.phase = SessionPhase::Error;
                    return;
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::ConnAck { return_code, .. } => {
                if return_code == 0 {
                    self.console("[Network] MQTT connected successfully");
                    self.phase = SessionPhase::Connected;
                    self.attempts = 0;
                    self.fabric.events.set(EVENT_MQTT_CONNECTED);
                } else {
                    self.console(&format!(
                        "[Network] MQTT connection rejected, return code: 0x{return_code:02x}"
                    ));
                    let reason = match return_code {
                        0x01 => "Unacceptable protocol version",
                        0x02 => "Identifier rejected",
                        0x03 => "Server unavailable",
                        0x04 => "Bad username or password",
                        0x05 => "Not authorized",
                        _ => "Unknown",
                    };
                    self.console(&format!("[Network]   Reason: {reason}"));
                    self.phase = SessionPhase::Error;
                }
            }
            Packet::PubAck { packet_id } => {
                debug!("[Network] PUBACK received for packet ID: {packet_id}");
            }
            Packet::PingResp => debug!("[Network] PINGRESP received"),
            other => debug!("[Network] Ignoring inbound packet {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // Outbound pipeline
    // ------------------------------------------------------------------

    fn publish_one(&mut self) {
        let timeout = Duration::from_millis(100);
        let Some(msg) = self.fabric.network_q.recv(timeout) else {
            return;
        };

        let kind = msg.reading.kind;
        let topic = format!(
            "{}{}/sensor_{}",
            config::MQTT_TOPIC_BASE,
            kind.as_str(),
            msg.reading.sensor_id
        );
        let payload = format!(
            "{{\"sensor_id\":{},\"type\":\"{}\",\"value\":{:.2},\"timestamp\":{},\"priority\":{},\"encrypted\":{}}}",
            msg.reading.sensor_id,
            kind.as_str(),
            msg.reading.value,
            msg.reading.timestamp_ms,
            msg.priority,
            msg.encrypted
        );

        let qos = if msg.priority > PRIORITY_NORMAL { 1 } else { 0 };
        let packet_id = (qos == 1).then(|| self.packet_ids.next());
        let publish = Packet::Publish {
            topic: topic.clone(),
            payload: payload.into_bytes(),
            qos,
            packet_id,
        };
        let frame = match publish.encode() {
            Ok(frame) if frame.len() <= config::MQTT_BUFFER_SIZE => frame,
            _ => {
                self.console("[Network] Publish frame too large, dropping message");
                return;
            }
        };

        if self.send_frame(&frame) {
            Counters::bump(&self.fabric.counters.publishes_sent);
            self.console(&format!(
                "[Network] Published to {topic}: {:.2}",
                msg.reading.value
            ));
        } else {
            Counters::bump(&self.fabric.counters.publish_failures);
            self.console("[Network] Failed to publish message");
            if self.fabric.network_q.try_send_front(msg).is_err() {
                self.console("[Network] Failed to requeue message");
            }
            self.phase = SessionPhase::Error;
        }
    }

    fn keepalive(&mut self) {
        let now = self.fabric.clock.now_ms();
        let half_keepalive = (config::MQTT_KEEPALIVE_SECS as u32 * 1000) / 2;
        if now.wrapping_sub(self.last_ping_ms) <= half_keepalive {
            return;
        }

        match Packet::PingReq.encode() {
            Ok(frame) if self.send_frame(&frame) => {
                self.last_ping_ms = now;
                self.console("[Network] PING sent");
            }
            _ => {
                self.console("[Network] Failed to send PING");
                self.phase = SessionPhase::Error;
            }
        }
    }

    /// Write a whole frame through the non-blocking transport, pacing
    /// `WouldBlock` with bounded retries.
    fn send_frame(&mut self, frame: &[u8]) -> bool {
        let mut written = 0usize;
        let mut stalls = 0u32;
        while written < frame.len() {
            let Some(conn) = self.conn.as_mut() else {
                return false;
            };
            let result = conn.send(&frame[written..]);
            match result {
                Ok(0) => {
                    stalls += 1;
                    if stalls > SEND_RETRY_CEILING {
                        self.console("[Network] Send timeout");
                        return false;
                    }
                    thread::sleep(Duration::from_millis(SEND_RETRY_SPACING_MS));
                }
                Ok(n) => {
                    written += n;
                    stalls = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    stalls += 1;
                    if stalls > SEND_RETRY_CEILING {
                        self.console("[Network] Send timeout");
                        return false;
                    }
                    thread::sleep(Duration::from_millis(SEND_RETRY_SPACING_MS));
                }
                Err(e) => {
                    self.console(&format!("[Network] Failed to send packet: {e}"));
                    return false;
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Teardown paths
    // ------------------------------------------------------------------

    fn enter_backoff(&mut self) {
        self.console("[Network] Connection error, cleaning up and reconnecting...");
        self.fabric
            .events
            .clear(EVENT_NETWORK_CONNECTED | EVENT_MQTT_CONNECTED);

        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.rx.clear();

        self.attempts += 1;
        let delay = backoff_delay_ms(self.attempts);
        self.console(&format!(
            "[Network] Waiting {} seconds before reconnect attempt {}",
            delay / 1000,
            self.attempts + 1
        ));
        self.retry_at_ms = Some(self.fabric.clock.now_ms().wrapping_add(delay));
        self.phase = SessionPhase::Disconnected;
    }

    fn shutdown(&mut self) {
        self.console("[Network] Shutting down");
        if self.phase == SessionPhase::Connected
            && let Ok(frame) = Packet::Disconnect.encode()
        {
            let _ = self.send_frame(&frame);
        }
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec;
    use crate::net::transport::TransportError;
    use crate::processing::{NetMessage, PRIORITY_ELEVATED, PRIORITY_HIGH};
    use crate::sensors::{Reading, SensorKind};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockState {
        incoming: Vec<u8>,
        sent: Vec<u8>,
        alive: bool,
        fail_send: bool,
    }

    #[derive(Clone)]
    struct MockHandle(Arc<Mutex<MockState>>);

    impl MockHandle {
        fn new() -> Self {
            MockHandle(Arc::new(Mutex::new(MockState {
                alive: true,
                ..MockState::default()
            })))
        }

        fn feed(&self, bytes: &[u8]) {
            self.0.lock().incoming.extend_from_slice(bytes);
        }

        fn sent(&self) -> Vec<u8> {
            self.0.lock().sent.clone()
        }

        fn sent_packets(&self) -> Vec<Packet> {
            let bytes = self.sent();
            let mut at = 0;
            let mut packets = Vec::new();
            while let Some((packet, used)) = Packet::decode(&bytes[at..]).unwrap() {
                packets.push(packet);
                at += used;
            }
            packets
        }

        fn kill(&self) {
            self.0.lock().alive = false;
        }

        fn break_sends(&self) {
            self.0.lock().fail_send = true;
        }
    }

    struct MockTransport(MockHandle);

    impl Transport for MockTransport {
        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut state = self.0.0.lock();
            if state.fail_send {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected"));
            }
            state.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.0.0.lock();
            if state.incoming.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "empty"));
            }
            let n = buf.len().min(state.incoming.len());
            buf[..n].copy_from_slice(&state.incoming[..n]);
            state.incoming.drain(..n);
            Ok(n)
        }

        fn is_alive(&mut self) -> bool {
            self.0.0.lock().alive
        }

        fn close(&mut self) {}
    }

    struct MockDialer {
        handles: VecDeque<MockHandle>,
        dials: usize,
    }

    impl Dialer for MockDialer {
        type Conn = MockTransport;

        fn dial(&mut self) -> Result<MockTransport, TransportError> {
            self.dials += 1;
            self.handles
                .pop_front()
                .map(MockTransport)
                .ok_or(TransportError::Timeout("connect"))
        }
    }

    fn task_with(handles: Vec<MockHandle>) -> NetworkTask<MockDialer> {
        let fabric = Arc::new(Fabric::new().unwrap());
        NetworkTask::new(
            fabric,
            MockDialer {
                handles: handles.into(),
                dials: 0,
            },
        )
    }

    fn connack_ok() -> Vec<u8> {
        Packet::ConnAck {
            session_present: false,
            return_code: 0,
        }
        .encode()
        .unwrap()
    }

    fn connect_to_broker(task: &mut NetworkTask<MockDialer>, handle: &MockHandle) {
        task.step();
        assert_eq!(task.phase(), SessionPhase::MqttConnect);
        handle.feed(&connack_ok());
        task.step();
        assert_eq!(task.phase(), SessionPhase::Connected);
    }

    fn message(kind: SensorKind, id: u8, value: f32, priority: u8) -> NetMessage {
        NetMessage {
            reading: Reading {
                kind,
                sensor_id: id,
                value,
                timestamp_ms: 5000,
            },
            encrypted: false,
            priority,
        }
    }

    #[test]
    fn happy_path_reaches_connected() {
        let handle = MockHandle::new();
        let mut task = task_with(vec![handle.clone()]);

        task.step();
        assert_eq!(task.phase(), SessionPhase::MqttConnect);
        assert!(task.fabric.events.is_set(EVENT_NETWORK_CONNECTED));
        let packets = handle.sent_packets();
        assert_eq!(packets.len(), 1);
        assert!(matches!(
            &packets[0],
            Packet::Connect { client_id, keep_alive: 60, clean_session: true }
                if client_id == "stick_gateway"
        ));

        handle.feed(&connack_ok());
        task.step();
        assert_eq!(task.phase(), SessionPhase::Connected);
        assert!(task.fabric.events.is_set(EVENT_MQTT_CONNECTED));
    }

    #[test]
    fn connack_rejection_enters_backoff() {
        let handle = MockHandle::new();
        let mut task = task_with(vec![handle.clone()]);

        task.step();
        handle.feed(
            &Packet::ConnAck {
                session_present: false,
                return_code: 0x05,
            }
            .encode()
            .unwrap(),
        );
        task.step();

        assert_eq!(task.phase(), SessionPhase::Disconnected);
        assert_eq!(task.attempts, 1);
        assert!(task.retry_at_ms.is_some());
        assert!(!task.fabric.events.is_set(EVENT_MQTT_CONNECTED));
        assert!(!task.fabric.events.is_set(EVENT_NETWORK_CONNECTED));
    }

    #[test]
    fn publish_chooses_qos_by_priority_with_monotone_ids() {
        let handle = MockHandle::new();
        let mut task = task_with(vec![handle.clone()]);
        connect_to_broker(&mut task, &handle);

        task.fabric
            .network_q
            .try_send(message(SensorKind::Temperature, 0, 22.5, PRIORITY_NORMAL))
            .unwrap();
        task.step();
        task.fabric
            .network_q
            .try_send(message(SensorKind::Humidity, 1, 58.25, PRIORITY_ELEVATED))
            .unwrap();
        task.step();
        task.fabric
            .network_q
            .try_send(message(SensorKind::Motion, 0, 1.0, PRIORITY_HIGH))
            .unwrap();
        task.step();

        let publishes: Vec<Packet> = handle
            .sent_packets()
            .into_iter()
            .filter(|p| matches!(p, Packet::Publish { .. }))
            .collect();
        assert_eq!(publishes.len(), 3);

        let Packet::Publish {
            topic,
            payload,
            qos,
            packet_id,
        } = &publishes[0]
        else {
            panic!("not a publish");
        };
        assert_eq!(topic, "iot/gateway/temperature/sensor_0");
        assert_eq!(*qos, 0);
        assert_eq!(*packet_id, None);
        assert_eq!(
            std::str::from_utf8(payload).unwrap(),
            "{\"sensor_id\":0,\"type\":\"temperature\",\"value\":22.50,\
             \"timestamp\":5000,\"priority\":1,\"encrypted\":false}"
        );

        assert!(matches!(
            &publishes[1],
            Packet::Publish { qos: 1, packet_id: Some(1), .. }
        ));
        assert!(matches!(
            &publishes[2],
            Packet::Publish { qos: 1, packet_id: Some(2), .. }
        ));
        assert_eq!(
            Counters::read(&task.fabric.counters.publishes_sent),
            3
        );
    }

    #[test]
    fn failed_publish_requeues_at_the_front_and_reconnects() {
        let first = MockHandle::new();
        let second = MockHandle::new();
        let mut task = task_with(vec![first.clone(), second.clone()]);
        connect_to_broker(&mut task, &first);

        task.fabric
            .network_q
            .try_send(message(SensorKind::Temperature, 2, 31.0, PRIORITY_ELEVATED))
            .unwrap();
        task.fabric
            .network_q
            .try_send(message(SensorKind::Temperature, 2, 31.5, PRIORITY_NORMAL))
            .unwrap();

        first.break_sends();
        task.step();

        // The in-flight message is back at the head, exactly once.
        assert_eq!(task.phase(), SessionPhase::Disconnected);
        assert_eq!(task.fabric.network_q.len(), 2);
        assert_eq!(Counters::read(&task.fabric.counters.publish_failures), 1);

        // Skip the backoff window and reconnect on a fresh transport. The
        // CONNACK step immediately resumes publishing from the queue head.
        task.retry_at_ms = None;
        task.step();
        second.feed(&connack_ok());
        task.step();
        assert_eq!(task.phase(), SessionPhase::Connected);

        let republished: Vec<Packet> = second
            .sent_packets()
            .into_iter()
            .filter(|p| matches!(p, Packet::Publish { .. }))
            .collect();
        assert_eq!(republished.len(), 1);
        let Packet::Publish { payload, qos, .. } = &republished[0] else {
            panic!("not a publish");
        };
        assert_eq!(*qos, 1);
        assert!(
            std::str::from_utf8(payload)
                .unwrap()
                .contains("\"value\":31.00")
        );
        // The untouched second message is still queued behind it.
        assert_eq!(task.fabric.network_q.len(), 1);
    }

    #[test]
    fn dead_socket_fails_the_health_probe() {
        let handle = MockHandle::new();
        let mut task = task_with(vec![handle.clone()]);
        connect_to_broker(&mut task, &handle);

        handle.kill();
        task.step();
        assert_eq!(task.phase(), SessionPhase::Disconnected);
        assert!(!task.fabric.events.is_set(EVENT_MQTT_CONNECTED));
    }

    #[test]
    fn keepalive_fires_past_the_half_interval() {
        let handle = MockHandle::new();
        let mut task = task_with(vec![handle.clone()]);
        connect_to_broker(&mut task, &handle);

        task.last_ping_ms = task
            .fabric
            .clock
            .now_ms()
            .wrapping_sub(config::MQTT_KEEPALIVE_SECS as u32 * 1000 / 2 + 1000);
        task.step();

        let sent = handle.sent();
        assert_eq!(&sent[sent.len() - 2..], &[codec::PINGREQ, 0x00]);
    }

    #[test]
    fn shutdown_sends_disconnect_only_when_connected() {
        let handle = MockHandle::new();
        let mut task = task_with(vec![handle.clone()]);
        connect_to_broker(&mut task, &handle);

        task.fabric.events.set(EVENT_SHUTDOWN);
        assert!(!task.step());
        let sent = handle.sent();
        assert_eq!(&sent[sent.len() - 2..], &[codec::DISCONNECT, 0x00]);

        // A task that never connected exits without emitting DISCONNECT.
        let idle_handle = MockHandle::new();
        let mut idle_task = task_with(vec![idle_handle.clone()]);
        idle_task.fabric.events.set(EVENT_SHUTDOWN);
        assert!(!idle_task.step());
        assert!(idle_handle.sent().is_empty());
    }

    #[test]
    fn repeated_failures_hit_the_cooloff() {
        let mut task = task_with(vec![]);
        for i in 1..=MAX_RECONNECT_ATTEMPTS {
            task.retry_at_ms = None;
            task.step();
            assert_eq!(task.attempts, i);
        }

        // The next attempt trips the cooloff and resets the counter.
        task.retry_at_ms = None;
        task.step();
        assert_eq!(task.attempts, 0);
        assert!(task.retry_at_ms.is_some());
        assert_eq!(task.dialer.dials, MAX_RECONNECT_ATTEMPTS as usize);
    }

    #[test]
    fn backoff_delay_grows_linearly_to_the_cap() {
        assert_eq!(backoff_delay_ms(1), 5000);
        assert_eq!(backoff_delay_ms(2), 7000);
        assert_eq!(backoff_delay_ms(5), 13_000);
        assert_eq!(backoff_delay_ms(20), 30_000);
    }
}

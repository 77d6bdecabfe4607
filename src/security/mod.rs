//! Opportunistic message protection.
//!
//! The transformer watches the head of the network queue and rewrites
//! unprotected messages of elevated priority: serialize a compact status
//! string, run it through the keystream, sign it, mark the message encrypted
//! and re-enqueue it at the tail. Ordinary traffic passes untouched (TLS
//! still covers it on the wire) and downstream consumers must tolerate the
//! reordering this introduces.
//!
//! The XOR keystream and DJB2 signature are placeholders standing in for an
//! AEAD such as AES-GCM or ChaCha20-Poly1305; `Keystream` is the seam where
//! real primitives plug in.

use crate::config;
use crate::fabric::Fabric;
use crate::processing::{NetMessage, PRIORITY_ELEVATED};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

const KEY_SIZE: usize = 32;

pub fn djb2(data: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for &b in data {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(b as u32);
    }
    hash
}

/// Key material for the placeholder transform.
pub struct Keystream {
    key: [u8; KEY_SIZE],
    session_key: [u8; KEY_SIZE],
}

impl Keystream {
    pub fn generate() -> Self {
        let mut ks = Self {
            key: [0; KEY_SIZE],
            session_key: [0; KEY_SIZE],
        };
        ks.rotate();
        ks
    }

    pub fn rotate(&mut self) {
        let mut rng = rand::rng();
        rng.fill(&mut self.key[..]);
        rng.fill(&mut self.session_key[..]);
    }

    /// Stream XOR in place. Applying twice with the same key restores the
    /// input.
    pub fn apply(&self, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b ^= self.key[i % KEY_SIZE];
        }
    }

    /// Content hash bound to the session key.
    pub fn sign(&self, data: &[u8]) -> u32 {
        djb2(data) ^ djb2(&self.session_key)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityStats {
    pub encrypted: u32,
    pub signed: u32,
    pub rotations: u32,
    pub errors: u32,
}

pub struct SecurityTask {
    fabric: Arc<Fabric>,
    priority: u8,
    keystream: Keystream,
    stats: SecurityStats,
    last_rotation_ms: u32,
    last_report_ms: u32,
}

impl SecurityTask {
    pub fn new(fabric: Arc<Fabric>) -> Self {
        let now = fabric.clock.now_ms();
        Self {
            fabric,
            priority: config::priority::SECURITY,
            keystream: Keystream::generate(),
            stats: SecurityStats::default(),
            last_rotation_ms: now,
            last_report_ms: now,
        }
    }

    pub fn run(&mut self) {
        self.fabric
            .console
            .line(self.priority, "[Security] Started");

        loop {
            // Doubles as the poll cadence and the shutdown gate.
            if self
                .fabric
                .idle(Duration::from_millis(config::SECURITY_POLL_INTERVAL_MS))
            {
                self.fabric
                    .console
                    .line(self.priority, "[Security] Shutting down");
                break;
            }
            self.pass();
        }
    }

    /// One cycle: rotate keys when due, protect at most one message, report
    /// stats on the 30 s cadence.
    pub fn pass(&mut self) {
        let now = self.fabric.clock.now_ms();

        if now.wrapping_sub(self.last_rotation_ms) > config::KEY_ROTATION_INTERVAL_MS {
            self.keystream.rotate();
            self.stats.rotations += 1;
            self.last_rotation_ms = now;
            self.fabric.console.line(
                self.priority,
                &format!(
                    "[Security] Key rotation completed (rotation #{})",
                    self.stats.rotations
                ),
            );
        }

        if let Some(msg) = self
            .fabric
            .network_q
            .take_head_if(|m| !m.encrypted && m.priority >= PRIORITY_ELEVATED)
        {
            self.protect(msg);
        }

        if now.wrapping_sub(self.last_report_ms) > config::SECURITY_REPORT_INTERVAL_MS {
            self.fabric.console.line(
                self.priority,
                &format!(
                    "[Security] Stats - Encrypted: {}, Signed: {}, Keys Rotated: {}, Errors: {}",
                    self.stats.encrypted,
                    self.stats.signed,
                    self.stats.rotations,
                    self.stats.errors
                ),
            );
            self.last_report_ms = now;
        }
    }

    fn protect(&mut self, mut msg: NetMessage) {
        let status = format!(
            "{:.2}|{}|{}|{}",
            msg.reading.value,
            msg.reading.timestamp_ms,
            msg.reading.kind.wire_code(),
            msg.reading.sensor_id
        );

        if status.len() > config::MAX_ENCRYPTED_PAYLOAD {
            // Transform failure: restore the message to the head untouched so
            // the next cycle (or the network task) picks it up again.
            self.stats.errors += 1;
            self.fabric
                .console
                .line(self.priority, "[Security] Data too large to encrypt");
            if self.fabric.network_q.try_send_front(msg).is_err() {
                self.fabric
                    .console
                    .line(self.priority, "[Security] Failed to restore message");
            }
            return;
        }

        let mut buf = status.into_bytes();
        self.keystream.apply(&mut buf);
        self.stats.encrypted += 1;
        let signature = self.keystream.sign(&buf);
        self.stats.signed += 1;

        msg.encrypted = true;
        let timeout = Duration::from_millis(100);
        if self.fabric.network_q.send(msg, timeout).is_ok() {
            self.fabric.console.line(
                self.priority,
                &format!(
                    "[Security] Encrypted and signed message for {} sensor {} (sig: 0x{:08x})",
                    msg.reading.kind.as_str(),
                    msg.reading.sensor_id,
                    signature
                ),
            );
        } else {
            self.stats.errors += 1;
            if self.fabric.network_q.try_send_front(msg).is_err() {
                self.fabric
                    .console
                    .line(self.priority, "[Security] Failed to requeue protected message");
            }
        }
    }

    #[cfg(test)]
    fn stats(&self) -> SecurityStats {
        self.stats
    }
}

// ===========================================================================
// Tests
// ===========================================================================

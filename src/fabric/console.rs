//! Serialized diagnostic output.
//!
//! Operator-facing lines from concurrent tasks share one stdout. The console
//! wraps it in the priority-inheriting mutex so a line (or a whole dashboard
//! frame) is always written atomically. Discipline: acquire, format, release.

use crate::fabric::sync::PiMutex;
use std::io::{self, Stdout, Write};

pub struct Console {
    gate: PiMutex<Stdout>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            gate: PiMutex::new(io::stdout()),
        }
    }

    /// Write one line. `prio` is the calling task's fixed priority and feeds
    /// the priority-inheritance bookkeeping of the underlying mutex.
    pub fn line(&self, prio: u8, text: &str) {
        let mut out = self.gate.lock(prio);
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    /// Write a multi-line frame atomically. Used by the monitor so dashboard
    /// redraws never interleave with task diagnostics.
    pub fn frame<F>(&self, prio: u8, render: F)
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let mut out = self.gate.lock(prio);
        let _ = render(&mut *out);
        let _ = out.flush();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

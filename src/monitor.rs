//! System monitor: a read-only ANSI dashboard over queue depths, session
//! phase bits, gateway counters, uptime and memory. Rendered atomically
//! inside the console mutex so task diagnostics never tear a frame.

use crate::config;
use crate::fabric::{
    Counters, EVENT_MQTT_CONNECTED, EVENT_NETWORK_CONNECTED, EVENT_TLS_READY, Fabric, Periodic,
};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_BLUE: &str = "\x1b[34m";
const ANSI_MAGENTA: &str = "\x1b[35m";
const ANSI_CYAN: &str = "\x1b[36m";
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_CLEAR: &str = "\x1b[2J\x1b[H";

const CONSOLE_WIDTH: usize = 80;
const BAR_WIDTH: usize = 40;

/// One sampling pass over everything the dashboard shows.
struct Snapshot {
    uptime_secs: u64,
    events: u32,
    sensor_used: usize,
    sensor_cap: usize,
    network_used: usize,
    network_cap: usize,
    mem_used: u64,
    mem_total: u64,
    readings_processed: u64,
    readings_dropped: u64,
    batch_flushes: u64,
    publishes_sent: u64,
    publish_failures: u64,
    evictions: u64,
    latest_sensors: usize,
}

pub struct MonitorTask {
    fabric: Arc<Fabric>,
    priority: u8,
    sys: System,
}

impl MonitorTask {
    pub fn new(fabric: Arc<Fabric>) -> Self {
        Self {
            fabric,
            priority: config::priority::MONITOR,
            sys: System::new(),
        }
    }

    pub fn run(&mut self) {
        self.fabric.console.line(
            self.priority,
            &format!(
                "[Monitor] Started - Dashboard updates every {} seconds",
                config::MONITOR_REFRESH_MS / 1000
            ),
        );

        // Let the pipeline settle before the first clear-screen.
        if self.fabric.idle(Duration::from_secs(3)) {
            self.fabric
                .console
                .line(self.priority, "[Monitor] Shutting down");
            return;
        }

        let mut schedule = Periodic::new(Duration::from_millis(config::MONITOR_REFRESH_MS));
        loop {
            if self.fabric.shutting_down() {
                self.fabric
                    .console
                    .line(self.priority, "[Monitor] Shutting down");
                break;
            }

            let snapshot = self.sample();
            self.fabric
                .console
                .frame(self.priority, |out| render(out, &snapshot));

            schedule.wait();
        }
    }

    fn sample(&mut self) -> Snapshot {
        self.sys.refresh_memory();
        let counters = &self.fabric.counters;
        Snapshot {
            uptime_secs: self.fabric.clock.elapsed().as_secs(),
            events: self.fabric.events.get(),
            sensor_used: self.fabric.sensor_q.len(),
            sensor_cap: self.fabric.sensor_q.capacity(),
            network_used: self.fabric.network_q.len(),
            network_cap: self.fabric.network_q.capacity(),
            mem_used: self.sys.used_memory(),
            mem_total: self.sys.total_memory(),
            readings_processed: Counters::read(&counters.readings_processed),
            readings_dropped: Counters::read(&counters.readings_dropped),
            batch_flushes: Counters::read(&counters.batch_flushes),
            publishes_sent: Counters::read(&counters.publishes_sent),
            publish_failures: Counters::read(&counters.publish_failures),
            evictions: Counters::read(&counters.evictions),
            latest_sensors: self.fabric.latest.len(),
        }
    }
}

fn draw_line(out: &mut dyn Write, ch: char, width: usize) -> io::Result<()> {
    writeln!(out, "{}", ch.to_string().repeat(width))
}

fn draw_progress_bar(
    out: &mut dyn Write,
    label: &str,
    value: f64,
    max_value: f64,
    width: usize,
) -> io::Result<()> {
    let ratio = if max_value > 0.0 {
        (value / max_value).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (ratio * width as f64) as usize;

    let color = if ratio > 0.8 {
        ANSI_RED
    } else if ratio > 0.6 {
        ANSI_YELLOW
    } else {
        ANSI_GREEN
    };

    writeln!(
        out,
        "{label:<15} [{color}{}{ANSI_RESET}{}] {:.1}%",
        "#".repeat(filled),
        "-".repeat(width - filled),
        ratio * 100.0
    )
}

fn status_line(out: &mut dyn Write, name: &str, up: bool, down_label: &str) -> io::Result<()> {
    let (color, text) = if up {
        (ANSI_GREEN, "CONNECTED")
    } else {
        (ANSI_RED, down_label)
    };
    writeln!(out, "  {name:<9} {color}{text}{ANSI_RESET}")
}

fn render(out: &mut dyn Write, s: &Snapshot) -> io::Result<()> {
    write!(out, "{ANSI_CLEAR}")?;
    writeln!(
        out,
        "{ANSI_BOLD}{ANSI_CYAN}=== {} Monitor ==={ANSI_RESET}",
        config::SYS_NAME
    )?;
    writeln!(out, "Uptime: {} seconds", s.uptime_secs)?;
    draw_line(out, '=', CONSOLE_WIDTH)?;

    writeln!(out, "\n{ANSI_BOLD}{ANSI_GREEN}System Status:{ANSI_RESET}")?;
    status_line(
        out,
        "Network:",
        s.events & EVENT_NETWORK_CONNECTED != 0,
        "DISCONNECTED",
    )?;
    let tls = s.events & EVENT_TLS_READY != 0;
    writeln!(
        out,
        "  {:<9} {}{}{ANSI_RESET}",
        "TLS:",
        if tls { ANSI_GREEN } else { ANSI_YELLOW },
        if tls { "SECURED" } else { "UNSECURED" }
    )?;
    status_line(
        out,
        "MQTT:",
        s.events & EVENT_MQTT_CONNECTED != 0,
        "DISCONNECTED",
    )?;

    writeln!(out, "\n{ANSI_BOLD}{ANSI_BLUE}Resource Usage:{ANSI_RESET}")?;
    draw_progress_bar(
        out,
        "Memory",
        s.mem_used as f64,
        s.mem_total as f64,
        BAR_WIDTH,
    )?;
    writeln!(
        out,
        "  Used: {} MiB | Total: {} MiB",
        s.mem_used / (1024 * 1024),
        s.mem_total / (1024 * 1024)
    )?;
    writeln!(out)?;
    draw_progress_bar(
        out,
        "Sensor Queue",
        s.sensor_used as f64,
        s.sensor_cap as f64,
        BAR_WIDTH,
    )?;
    draw_progress_bar(
        out,
        "Network Queue",
        s.network_used as f64,
        s.network_cap as f64,
        BAR_WIDTH,
    )?;

    writeln!(out, "\n{ANSI_BOLD}{ANSI_MAGENTA}Performance Metrics:{ANSI_RESET}")?;
    writeln!(out, "  Readings Processed:  {}", s.readings_processed)?;
    writeln!(out, "  Readings Dropped:    {}", s.readings_dropped)?;
    writeln!(out, "  Batches Flushed:     {}", s.batch_flushes)?;
    writeln!(
        out,
        "  Publishes:           {} sent, {} failed",
        s.publishes_sent, s.publish_failures
    )?;
    writeln!(out, "  Queue Evictions:     {}", s.evictions)?;
    writeln!(out, "  Sensors Reporting:   {}", s.latest_sensors)?;

    draw_line(out, '=', CONSOLE_WIDTH)?;
    writeln!(
        out,
        "Press Ctrl+C to exit | Updates every {} seconds",
        config::MONITOR_REFRESH_MS / 1000
    )
}

// ===========================================================================
// Tests
// ===========================================================================

//! Gateway entry point.
//!
//! Builds the shared fabric, spawns every task at its fixed priority, then
//! either parks for the lifetime of the process or, when `GATEWAY_RUN_SECS`
//! is set, runs a bounded window and performs a cooperative shutdown.
//! Primitive construction failures abort with a non-zero exit code before a
//! single task exists.

use edge_gateway::config;
use edge_gateway::fabric::{EVENT_SHUTDOWN, Fabric, apply_current_priority};
use edge_gateway::monitor::MonitorTask;
use edge_gateway::net::{BrokerDialer, NetworkTask};
use edge_gateway::processing::Processor;
use edge_gateway::security::SecurityTask;
use edge_gateway::sensors::{MotionSensor, PeriodicSensor};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use std::{env, process, thread};

fn main() {
    env_logger::init();
    println!("Starting {}", config::SYS_NAME);
    info!("=== GATEWAY START ===");

    let fabric = match Fabric::new() {
        Ok(fabric) => Arc::new(fabric),
        Err(e) => {
            eprintln!("Error: failed to create system primitives: {e}");
            process::exit(1);
        }
    };

    let mut handles = Vec::new();

    handles.push(spawn_task("data-processor", config::priority::PROCESSOR, {
        let fabric = fabric.clone();
        move || Processor::new(fabric).run()
    }));

    handles.push(spawn_task("network", config::priority::NETWORK, {
        let fabric = fabric.clone();
        move || NetworkTask::new(fabric, BrokerDialer::from_config()).run()
    }));

    handles.push(spawn_task("security", config::priority::SECURITY, {
        let fabric = fabric.clone();
        move || SecurityTask::new(fabric).run()
    }));

    handles.push(spawn_task("monitor", config::priority::MONITOR, {
        let fabric = fabric.clone();
        move || MonitorTask::new(fabric).run()
    }));

    for id in 0..config::NUM_TEMP_SENSORS {
        handles.push(spawn_task(
            &format!("temp-sensor-{id}"),
            config::priority::SENSOR_LOW,
            {
                let fabric = fabric.clone();
                move || PeriodicSensor::temperature(id, fabric).run()
            },
        ));
    }

    for id in 0..config::NUM_HUMIDITY_SENSORS {
        handles.push(spawn_task(
            &format!("humidity-sensor-{id}"),
            config::priority::SENSOR_LOW,
            {
                let fabric = fabric.clone();
                move || PeriodicSensor::humidity(id, fabric).run()
            },
        ));
    }

    handles.push(spawn_task("motion-sensor", config::priority::SENSOR_HIGH, {
        let fabric = fabric.clone();
        move || MotionSensor::new(fabric).run()
    }));

    info!("[Main] Spawned {} tasks", handles.len());

    if let Some(secs) = run_window() {
        info!("[Main] Running for {secs} seconds...");
        thread::sleep(Duration::from_secs(secs));
        info!("[Main] Run window elapsed, requesting shutdown");
        fabric.events.set(EVENT_SHUTDOWN);
    }

    for handle in handles {
        let _ = handle.join();
    }
    info!("=== GATEWAY STOPPED ===");
}

/// Optional bounded run duration from the environment. Without it the
/// scheduler never returns and the process runs until interrupted.
fn run_window() -> Option<u64> {
    env::var("GATEWAY_RUN_SECS").ok()?.parse().ok()
}

fn spawn_task<F>(name: &str, priority: u8, body: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    let result = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            apply_current_priority(priority);
            body();
        });
    match result {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: failed to create task {name}: {e}");
            process::exit(1);
        }
    }
}

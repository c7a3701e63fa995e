//! Rouse - headless alarm runner
//!
//! Runs the alarm engine against simulated platform services:
//! 1. Wake events are armed on local threads and delivered (early and
//!    duplicated, if asked) back into the alarm service
//! 2. The camera reports presence from a flag toggled on stdin
//! 3. Scans are typed on stdin
//!
//! ## Command line flags
//!
//! See [`args`]. Set `RUST_LOG=debug` for verbose output.

mod args;
mod audio;
mod repl;
mod sim;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};

use rouse_core::clock::{Clock, SystemClock, ThreadTimers};
use rouse_core::config::{default_config_path, load_config, RouseConfig};
use rouse_core::engine::{AlarmEngine, Collaborators};
use rouse_core::services::{AlarmClient, AlarmEvent, AlarmService, EventBus};
use rouse_core::sound::SoundEngine;
use rouse_core::{AlarmError, SessionEnd};

use args::{CliArgs, USAGE};
use sim::{FlagClassifier, SimulatedCamera, SimulatedWakeLayer};

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = CliArgs::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{}\n\n{}", USAGE, repl::HELP);
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config: RouseConfig = load_config(&config_path);
    log::info!("rouse starting up (config: {:?})", config_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (wake_tx, wake_rx) = crossbeam::channel::unbounded();
    let wake_layer = Arc::new(SimulatedWakeLayer::new(wake_tx, args.delivery.clone(), Arc::clone(&clock)));
    let present = Arc::new(AtomicBool::new(args.present));

    let sound = Arc::new(SoundEngine::new(audio::default_backend(), config.sound.clone()));
    let parts = Collaborators {
        wake_layer: wake_layer.clone(),
        sound: Arc::clone(&sound),
        capture: Arc::new(SimulatedCamera::new(Arc::clone(&present))),
        classifier: Arc::new(FlagClassifier),
        clock,
        timers: Arc::new(ThreadTimers),
    };

    let bus = EventBus::default();
    let events = bus.subscribe();
    let mut handle = AlarmService::spawn(AlarmEngine::new(&config, parts), bus.sender()).map_err(|e| anyhow!(e))?;
    let client = AlarmClient::new(&handle);

    // Platform deliveries -> alarm service
    let relay_client = client.clone();
    thread::Builder::new().name("wake-relay".into()).spawn(move || {
        for payload in wake_rx.iter() {
            match relay_client.deliver_wake(payload) {
                Ok(outcome) => log::debug!("[WakeRelay] {:?}", outcome),
                Err(_) => break,
            }
        }
    })?;

    let printer = thread::Builder::new().name("event-printer".into()).spawn(move || {
        for event in events.iter() {
            let stopped = matches!(event, AlarmEvent::ServiceStopped { .. });
            print_event(&event);
            if stopped {
                break;
            }
        }
    })?;

    println!("rouse - type 'help' for commands");
    for time_of_day in &args.alarms {
        match client.add_alarm(*time_of_day, &args.label, args.mode) {
            Ok(alarm) => println!("{} set for {} ({} mode)", alarm.id, alarm.time_of_day, alarm.dismiss_mode),
            Err(AlarmError::SchedulingFailed(e)) => eprintln!("Could not arm alarm at {}: {}", time_of_day, e),
            Err(e) => return Err(e.into()),
        }
    }

    let result = repl::run(&client, &wake_layer, &present);

    if handle.is_running() {
        client.shutdown()?;
    } else {
        log::error!("Alarm service exited early");
    }
    handle.join();
    // The printer also stops once every event sender is gone
    drop(bus);
    let _ = printer.join();
    sound.teardown();

    log::info!("rouse stopped");
    result
}

fn print_event(event: &AlarmEvent) {
    match event {
        AlarmEvent::AlarmArmed(alarm) => {
            if let Some(next) = alarm.next_fire {
                println!("\n[armed] {} '{}' next fires {}", alarm.id, alarm.label, next.format("%a %H:%M"));
            }
        }
        AlarmEvent::AlarmDisarmed(id) => println!("\n[off] {}", id),
        AlarmEvent::SchedulingFailed { alarm_id, error } => match alarm_id {
            Some(id) => println!("\n[error] {} could not be armed: {}", id, error),
            None => println!("\n[error] alarm could not be armed: {}", error),
        },
        AlarmEvent::RingingStarted(session) => {
            println!("\n⏰ RINGING: '{}' ({} mode)", session.label, session.dismiss_mode);
            match session.dismiss_mode {
                rouse_core::DismissMode::Presence => println!("   step in front of the camera ('present') to dismiss"),
                rouse_core::DismissMode::SingleScan => println!("   scan any code ('scan <code>') to dismiss"),
            }
        }
        AlarmEvent::PlaybackFailed { error, .. } => println!("\n[silent] sound failed: {}", error),
        AlarmEvent::DetectionProgress { state, .. } => {
            if state.presence_observed {
                println!("\n[presence] {}%", state.progress);
            }
        }
        AlarmEvent::SessionEnded { session, reason } => match reason {
            SessionEnd::Dismissed => println!("\n✓ '{}' dismissed - good morning", session.label),
            SessionEnd::Forced => println!("\n■ '{}' stopped", session.label),
        },
        AlarmEvent::ServiceStarted { service_name } => log::debug!("{} started", service_name),
        AlarmEvent::ServiceStopped { service_name } => log::debug!("{} stopped", service_name),
    }
}

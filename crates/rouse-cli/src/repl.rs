//! Interactive stdin commands
//!
//! One command per line. Scans, presence changes and the emergency stop all
//! go through the alarm client like a UI would.

use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, bail, Result};

use rouse_core::services::AlarmClient;
use rouse_core::{AlarmId, DismissMode, TimeOfDay};

use crate::sim::SimulatedWakeLayer;

pub const HELP: &str = "\
commands:
  add HH:MM [presence|scan] [label...]   create an alarm
  list                                   list alarms
  toggle ID | delete ID                  switch off/on, remove
  fire ID                                deliver the alarm's wake event now
  scan CODE                              scan a code (single-scan sessions)
  present | absent                       move in front of / away from the camera
  stop                                   emergency stop
  status                                 engine status
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Add {
        time_of_day: TimeOfDay,
        mode: DismissMode,
        label: String,
    },
    List,
    Toggle(AlarmId),
    Delete(AlarmId),
    Fire(AlarmId),
    Scan(String),
    Present(bool),
    Stop,
    Status,
    Help,
    Quit,
}

fn alarm_id(arg: Option<&str>) -> Result<AlarmId> {
    let raw = arg.ok_or_else(|| anyhow!("missing alarm id"))?;
    let raw = raw.trim_start_matches("alarm#");
    Ok(AlarmId(raw.parse().map_err(|_| anyhow!("bad alarm id '{}'", raw))?))
}

impl FromStr for ReplCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            bail!("empty command");
        };

        let command = match cmd {
            "add" => {
                let time_of_day = words.next().ok_or_else(|| anyhow!("add needs HH:MM"))?.parse()?;
                let rest: Vec<&str> = words.collect();
                let (mode, label) = match rest.split_first() {
                    Some((first, label)) => match first.parse::<DismissMode>() {
                        Ok(mode) => (mode, label.join(" ")),
                        Err(_) => (DismissMode::default(), rest.join(" ")),
                    },
                    None => (DismissMode::default(), String::new()),
                };
                ReplCommand::Add {
                    time_of_day,
                    mode,
                    label,
                }
            }
            "list" | "ls" => ReplCommand::List,
            "toggle" => ReplCommand::Toggle(alarm_id(words.next())?),
            "delete" | "rm" => ReplCommand::Delete(alarm_id(words.next())?),
            "fire" => ReplCommand::Fire(alarm_id(words.next())?),
            "scan" => {
                let code: Vec<&str> = words.collect();
                if code.is_empty() {
                    bail!("scan needs a code");
                }
                ReplCommand::Scan(code.join(" "))
            }
            "present" => ReplCommand::Present(true),
            "absent" => ReplCommand::Present(false),
            "stop" => ReplCommand::Stop,
            "status" => ReplCommand::Status,
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            other => bail!("unknown command '{}' (try 'help')", other),
        };
        Ok(command)
    }
}

/// Read commands until `quit` or end of input
pub fn run(client: &AlarmClient, wake: &SimulatedWakeLayer, present: &AtomicBool) -> Result<()> {
    let stdin = io::stdin();
    prompt();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            prompt();
            continue;
        }

        match line.parse::<ReplCommand>() {
            Ok(ReplCommand::Quit) => break,
            Ok(command) => {
                if let Err(e) = execute(command, client, wake, present) {
                    println!("error: {}", e);
                }
            }
            Err(e) => println!("error: {}", e),
        }
        prompt();
    }
    Ok(())
}

fn prompt() {
    print!("rouse> ");
    let _ = io::stdout().flush();
}

fn execute(command: ReplCommand, client: &AlarmClient, wake: &SimulatedWakeLayer, present: &AtomicBool) -> Result<()> {
    match command {
        ReplCommand::Add {
            time_of_day,
            mode,
            label,
        } => {
            let alarm = client.add_alarm(time_of_day, &label, mode)?;
            println!("{} '{}' at {} ({} mode)", alarm.id, alarm.label, alarm.time_of_day, alarm.dismiss_mode);
        }
        ReplCommand::List => {
            let alarms = client.list_alarms()?;
            if alarms.is_empty() {
                println!("no alarms");
            }
            for alarm in alarms {
                let next = alarm
                    .next_fire
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "off".to_string());
                println!(
                    "  {:<9} {}  {:<11} next: {:<16}  {}",
                    alarm.id.to_string(),
                    alarm.time_of_day,
                    alarm.dismiss_mode.to_string(),
                    next,
                    alarm.label
                );
            }
        }
        ReplCommand::Toggle(id) => {
            let alarm = client.toggle_alarm(id)?;
            println!("{} is now {}", id, if alarm.active { "on" } else { "off" });
        }
        ReplCommand::Delete(id) => {
            client.delete_alarm(id)?;
            println!("{} deleted", id);
        }
        ReplCommand::Fire(id) => {
            let alarms = client.list_alarms()?;
            let alarm = alarms
                .iter()
                .find(|a| a.id == id)
                .ok_or_else(|| anyhow!("no such alarm {}", id))?;
            let handle = alarm
                .wake_handle
                .as_ref()
                .ok_or_else(|| anyhow!("{} is off", id))?;
            if !wake.fire_now(handle) {
                bail!("wake event for {} is no longer armed", id);
            }
        }
        ReplCommand::Scan(code) => {
            if !client.scan(&code)? {
                println!("scan ignored (no single-scan session ringing)");
            }
        }
        ReplCommand::Present(value) => {
            present.store(value, Ordering::Relaxed);
            println!("user is now {}", if value { "in front of the camera" } else { "away" });
        }
        ReplCommand::Stop => match client.force_stop()? {
            Some(session) => println!("{} stopped", session.id),
            None => println!("nothing ringing"),
        },
        ReplCommand::Status => {
            let status = client.status()?;
            println!("phase: {:?}, sound playing: {}", status.phase, status.sound_playing);
            if let Some(session) = status.session {
                println!(
                    "ringing: '{}' since {} ({} mode)",
                    session.label,
                    session.started_at.format("%H:%M:%S"),
                    session.dismiss_mode
                );
            }
            if let Some(detection) = status.detection {
                println!(
                    "presence: {} progress {}%",
                    if detection.presence_observed { "seen" } else { "not seen" },
                    detection.progress
                );
            }
        }
        ReplCommand::Help => println!("{}", HELP),
        ReplCommand::Quit => {}
    }
    Ok(())
}

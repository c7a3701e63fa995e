//! Command line flags
//!
//! - `--at HH:MM`: add an alarm at startup (repeatable)
//! - `--label TEXT`, `--mode presence|scan`: applied to every `--at` alarm
//! - `--config PATH`: config file (default: `~/.config/rouse/config.yaml`)
//! - `--early SECS`: wake layer also delivers each event this early
//! - `--channels N`: number of on-time deliveries per event (default 2)
//! - `--present`: start with the simulated user in front of the camera

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use rouse_core::{DismissMode, TimeOfDay};

use crate::sim::DeliveryOptions;

#[derive(Debug, Default)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub alarms: Vec<TimeOfDay>,
    pub label: String,
    pub mode: DismissMode,
    pub delivery: DeliveryOptions,
    pub present: bool,
    pub help: bool,
}

pub const USAGE: &str = "\
usage: rouse [--at HH:MM]... [--label TEXT] [--mode presence|scan]
             [--config PATH] [--early SECS] [--channels N] [--present]";

impl CliArgs {
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| args.next().ok_or_else(|| anyhow!("{} needs a value", flag));
            match arg.as_str() {
                "--at" => {
                    let raw = value("--at")?;
                    let tod = raw.parse::<TimeOfDay>().with_context(|| format!("--at {}", raw))?;
                    parsed.alarms.push(tod);
                }
                "--label" => parsed.label = value("--label")?,
                "--mode" => parsed.mode = value("--mode")?.parse()?,
                "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
                "--early" => {
                    let secs: u64 = value("--early")?.parse().context("--early expects seconds")?;
                    parsed.delivery.early_by = Some(Duration::from_secs(secs));
                }
                "--channels" => {
                    parsed.delivery.channels = value("--channels")?.parse().context("--channels expects a count")?;
                }
                "--present" => parsed.present = true,
                "-h" | "--help" => parsed.help = true,
                other => bail!("unknown argument '{}'\n{}", other, USAGE),
            }
        }

        Ok(parsed)
    }
}

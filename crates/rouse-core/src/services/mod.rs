//! Background services for rouse-core
//!
//! The alarm engine runs on one service thread; everything else talks to it
//! through commands and listens to the events it publishes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     Commands      ┌──────────────┐   SessionEvent   ┌───────────────┐
//! │ AlarmClient  │ ───────────────►  │ AlarmService │ ◄─────────────── │ TriggerArbiter│
//! │ (UI / CLI)   │ ◄───────────────  │ (AlarmEngine)│                  │ timers, probe │
//! └──────────────┘     Replies       └──────────────┘                  └───────────────┘
//!                                           │ Publish
//!                                           ▼
//!                        ┌─────────────────────────────────────┐
//!                        │              Event Bus              │
//!                        └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rouse_core::services::{AlarmClient, AlarmService, EventBus};
//!
//! let bus = EventBus::default();
//! let handle = AlarmService::spawn(engine, bus.sender())?;
//! let client = AlarmClient::new(&handle);
//!
//! let alarm = client.add_alarm("7:30".parse()?, "Work", DismissMode::Presence)?;
//! client.shutdown()?;
//! ```

pub mod alarm;
pub mod messages;

pub use alarm::{AlarmClient, AlarmService};
pub use messages::{AlarmCommand, AlarmEvent, EventBus, ServiceHandle};

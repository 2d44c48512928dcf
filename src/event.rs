//! Typed event stream published by the Orchestrator. Decoupled from any UI
//! runtime: the bus is in-process multicast over unbounded
//! `crossbeam_channel`s so a slow or absent subscriber never blocks a
//! producer (the Packager/Dispatcher/Orchestrator threads).

use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One entry of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub job_id: Option<String>,
    pub host_id: Option<String>,
    pub part_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    JobStarted { job_id: String, name: String },
    JobStepAdvanced { job_id: String, step: u32, total_steps: u32, message: String },
    PartStateChanged { job_id: String, part_id: String, status: String, percent: u8 },
    PartUploaded {
        job_id: String,
        part_id: String,
        filename: String,
        store_path: String,
        size: u64,
        destinations: Vec<String>,
    },
    PartDestProgress {
        job_id: String,
        part_id: String,
        host_id: String,
        status: String,
        percent: u8,
        error: Option<String>,
    },
    JobCompleted { job_id: String },
    JobFailed { job_id: String, error: String },
    Log(LogRecord),
}

/// Message prefixes used in [`Event::Log`] messages, so subscribers can
/// coarsely classify log lines without parsing the whole sentence.
pub mod prefix {
    pub const STEP: &str = "[Step";
    pub const ZIP: &str = "[Zip]";
    pub const UPLOAD: &str = "[Upload]";
    pub const DOWNLOAD: &str = "[Download]";
    pub const EXTRACT: &str = "[Extract]";
    pub const CLEANUP: &str = "[Cleanup]";
    pub const COMPLETE: &str = "[Complete]";
    pub const ERROR: &str = "[Error]";
    pub const DEST: &str = "[Dest]";
    pub const QUEUE: &str = "[Queue]";
}

/// Multi-producer, fan-out-to-many-subscribers event bus. Cloning an
/// `EventBus` shares the same subscriber list (it is a thin `Arc`-free
/// wrapper around a mutex-guarded `Vec<Sender<Event>>`, matching the scale
/// this process actually needs: at most a handful of subscribers per run).
#[derive(Clone)]
pub struct EventBus {
    subscribers: std::sync::Arc<Mutex<Vec<Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: std::sync::Arc::new(Mutex::new(Vec::new())) }
    }

    /// Register a new subscriber; returns the receiving half of an unbounded
    /// channel. Dropping the receiver is fine — future sends just accumulate
    /// until the whole bus is dropped, or the caller may periodically prune
    /// dead senders by calling [`EventBus::publish`] (which does so lazily).
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().expect("event bus mutex poisoned").push(tx);
        rx
    }

    /// Publish to every live subscriber. Never blocks: `crossbeam_channel`
    /// unbounded sends are always immediate, and dead receivers are pruned
    /// opportunistically.
    pub fn publish(&self, event: Event) {
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.publish(Event::Log(LogRecord {
            level,
            message: message.into(),
            job_id: None,
            host_id: None,
            part_id: None,
        }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        bus.publish(Event::JobStarted { job_id: "j1".into(), name: "demo".into() });
        assert!(matches!(rx1.try_recv().unwrap(), Event::JobStarted { .. }));
        assert!(matches!(rx2.try_recv().unwrap(), Event::JobStarted { .. }));
    }

    #[test]
    fn dropped_subscriber_is_pruned_without_blocking() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
        } // receiver dropped
        bus.publish(Event::JobCompleted { job_id: "j1".into() });
        assert_eq!(bus.subscribers.lock().unwrap().len(), 0);
    }
}

//! Application-visible notifications.
//!
//! Every parsed frame and every driver status message becomes an [`Event`].
//! The bus delivers it to at most one subscriber callback and, optionally, to
//! a console sink printing `[NAME] value` lines.
//!
//! Delivery is synchronous on the publishing thread. A slow subscriber stalls
//! the receive loop for as long as it runs.

use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use jx1000_frame::Command;
use serde::Serialize;
use tracing::{debug, warn};

use crate::response::{DeviceInfo, MemoryResponse, TestVerdict};

/// Typed event payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventValue {
    /// Status or log text.
    Text(String),
    /// Parsed DevRead/DevWrite response.
    Memory(MemoryResponse),
    /// Parsed Info response.
    Info(DeviceInfo),
    /// Rule chunk acknowledgment (`true` = accepted).
    RuleAck(bool),
    /// Test outcome from a result line.
    Verdict(TestVerdict),
    /// Payload that could not be interpreted.
    Raw(Vec<u8>),
}

impl EventValue {
    /// The text, when this is a text event.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventValue::Text(text) => f.write_str(text),
            EventValue::Memory(response) => fmt::Display::fmt(response, f),
            EventValue::Info(info) => fmt::Display::fmt(info, f),
            EventValue::RuleAck(true) => f.write_str("ACK"),
            EventValue::RuleAck(false) => f.write_str("NACK"),
            EventValue::Verdict(verdict) => fmt::Display::fmt(verdict, f),
            EventValue::Raw(bytes) => {
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for EventValue {
    fn from(text: &str) -> Self {
        EventValue::Text(text.to_string())
    }
}

impl From<String> for EventValue {
    fn from(text: String) -> Self {
        EventValue::Text(text)
    }
}

/// A notification tagged with the command it relates to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub command: Command,
    #[serde(flatten)]
    pub value: EventValue,
}

impl Event {
    pub fn new(command: Command, value: impl Into<EventValue>) -> Self {
        Self {
            command,
            value: value.into(),
        }
    }

    /// The text, when this is a text event.
    pub fn text(&self) -> Option<&str> {
        self.value.as_text()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.command, self.value)
    }
}

/// Event callback. Runs on whichever thread publishes.
pub type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

type ConsoleSink = Box<dyn Write + Send>;

/// Fan-out point for driver events.
#[derive(Default)]
pub struct EventBus {
    subscriber: RwLock<Option<Subscriber>>,
    console: Mutex<Option<ConsoleSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the subscriber, replacing any previous one.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        *self
            .subscriber
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Remove the subscriber.
    pub fn unsubscribe(&self) {
        *self
            .subscriber
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Print every event to `sink` as a `[NAME] value` line.
    pub fn set_console(&self, sink: impl Write + Send + 'static) {
        *self.console.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(sink));
    }

    /// Stop printing events.
    pub fn clear_console(&self) {
        *self.console.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Publish a value under a command tag.
    pub fn publish(&self, command: Command, value: impl Into<EventValue>) {
        self.publish_event(&Event::new(command, value));
    }

    /// Publish a prepared event.
    pub fn publish_event(&self, event: &Event) {
        debug!(command = %event.command, value = %event.value, "event");

        {
            let mut console = self.console.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(sink) = console.as_mut() {
                if let Err(err) = writeln!(sink, "{event}").and_then(|()| sink.flush()) {
                    warn!(%err, "console sink write failed");
                }
            }
        }

        let subscriber = self
            .subscriber
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = subscriber {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(command = %event.command, "event subscriber panicked");
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_subscriber = self
            .subscriber
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        let has_console = self
            .console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("EventBus")
            .field("subscriber", &has_subscriber)
            .field("console", &has_console)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn subscriber_receives_events() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        bus.publish(Command::Result, "Port COM3 opened");
        bus.publish(Command::RuleDown, EventValue::RuleAck(true));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].text(), Some("Port COM3 opened"));
        assert_eq!(seen[1].value, EventValue::RuleAck(true));
    }

    #[test]
    fn subscriber_panic_is_swallowed() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("subscriber bug");
        });

        bus.publish(Command::Log, "first");
        bus.publish(Command::Log, "second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(Command::Log, "one");
        bus.unsubscribe();
        bus.publish(Command::Log, "two");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn console_format() {
        let bus = EventBus::new();
        let sink = SharedSink::default();
        bus.set_console(sink.clone());

        bus.publish(Command::Result, EventValue::Verdict(TestVerdict::Pass));
        bus.publish(Command::Info, EventValue::Info(DeviceInfo::new(2, 15, 1, 4, 0)));
        bus.publish(Command::Other(0x42), EventValue::Raw(vec![0x01, 0xAB]));

        assert_eq!(
            sink.contents(),
            "[RES] PASS\n\
             [INFO] HardType=2 Version=1.5 ComNumber=1 BoardCount=4\n\
             [0x42] 01 AB\n"
        );
    }

    #[test]
    fn console_lines_never_interleave() {
        let bus = Arc::new(EventBus::new());
        let sink = SharedSink::default();
        bus.set_console(sink.clone());

        let workers: Vec<_> = (0..4)
            .map(|id| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for i in 0..50 {
                        bus.publish(Command::Log, format!("worker {id} line {i}"));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let contents = sink.contents();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 200);
        assert!(lines
            .iter()
            .all(|line| line.starts_with("[LOG] worker ") && line.contains(" line ")));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::new(Command::DevRead, EventValue::RuleAck(false));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["command"], "READ");
        assert_eq!(json["type"], "rule_ack");
        assert_eq!(json["value"], false);
    }
}

//! Virtual printer log

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::{Entity, EntityInfo, EntityKind, EntityState, Listener, StateCell, StateValue};
use crate::mqtt::{callback, Coordinator};
use crate::topics::TopicScheme;

pub const MAX_LINES: usize = 10;
pub const MAX_STATE_CHARS: usize = 255;
const ELLIPSIS: &str = "...";

/// Rolling buffer of the most recent printer lines, oldest first
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrinterLog {
    lines: VecDeque<String>,
}

impl PrinterLog {
    /// Appends a trimmed line. Empty payloads are ignored and reported as `false`.
    pub fn push(&mut self, payload: &str) -> bool {
        if payload.is_empty() {
            return false;
        }
        self.lines.push_back(payload.trim().to_string());
        while self.lines.len() > MAX_LINES {
            self.lines.pop_front();
        }
        true
    }

    /// Lines joined with `\n`. When that exceeds 255 characters only the
    /// newest line is shown, itself cut to 252 characters plus `...`.
    pub fn render(&self) -> String {
        let joined = self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
        if joined.chars().count() <= MAX_STATE_CHARS {
            return joined;
        }
        let newest = self.lines.back().map(String::as_str).unwrap_or_default();
        truncate(newest)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn max_lines(&self) -> usize {
        MAX_LINES
    }
}

fn truncate(line: &str) -> String {
    if line.chars().count() <= MAX_STATE_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(MAX_STATE_CHARS - ELLIPSIS.len()).collect();
    cut.push_str(ELLIPSIS);
    cut
}

pub struct PrinterLogSensor {
    info: EntityInfo,
    listener: Listener,
    log: Arc<watch::Sender<PrinterLog>>,
    state: StateCell,
}

impl PrinterLogSensor {
    pub fn new(entry_id: &str, topics: &TopicScheme) -> Self {
        let info = EntityInfo {
            unique_id: format!("{}_printer_log", entry_id),
            name: "Honeywell Galaxy Printer Log".to_string(),
            kind: EntityKind::Sensor,
            device_class: None,
            icon: Some("mdi:printer"),
        };
        let state = StateCell::new(&info.unique_id, StateValue::Text(String::new()));
        let (log, _) = watch::channel(PrinterLog::default());
        let log = Arc::new(log);

        let writer = state.clone();
        let buffer = log.clone();
        let listener = Listener {
            topic: topics.printer_log(),
            callback: callback(move |_topic: &str, payload: &str| {
                let mut rendered = None;
                buffer.send_if_modified(|log| {
                    let pushed = log.push(payload);
                    if pushed {
                        rendered = Some((log.render(), log.line_count()));
                    }
                    pushed
                });
                if let Some((text, count)) = rendered {
                    debug!("Printer log updated, {} lines, state length {}", count, text.chars().count());
                    writer.set(StateValue::Text(text));
                }
                Ok(())
            }),
        };

        Self {
            info,
            listener,
            log,
            state,
        }
    }

    /// Snapshot of the buffered lines
    pub fn log(&self) -> PrinterLog {
        self.log.borrow().clone()
    }

    pub fn watch_log(&self) -> watch::Receiver<PrinterLog> {
        self.log.subscribe()
    }
}

impl Entity for PrinterLogSensor {
    fn info(&self) -> &EntityInfo {
        &self.info
    }

    fn state(&self) -> EntityState {
        self.state.get()
    }

    fn watch(&self) -> watch::Receiver<EntityState> {
        self.state.watch()
    }

    fn attach(&self, coordinator: &Coordinator) {
        self.listener.attach(coordinator);
    }

    fn detach(&self, coordinator: &Coordinator) {
        self.listener.detach(coordinator);
    }
}

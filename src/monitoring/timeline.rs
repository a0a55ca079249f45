//! Execution Timeline
//!
//! Records step start/end times as an [`EventSink`] for
//! duration reports and Gantt charts.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::events::{EventSink, StepEvent};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub step: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a workflow run.
///
/// Steps inside a parallel group report concurrently, so events are
/// kept behind a lock.
#[derive(Debug)]
pub struct ExecutionTimeline {
    events: Mutex<Vec<TimelineEvent>>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a step.
    pub fn add_event(&self, step: impl Into<String>, event_type: EventType) {
        self.events.lock().push(TimelineEvent {
            step: step.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns a copy of all recorded events.
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.events.lock().clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Start and end offsets (ms) per step, keyed by step name.
    ///
    /// A step run more than once keeps its latest start.
    fn spans(&self) -> HashMap<String, (u128, Option<u128>)> {
        let mut spans: HashMap<String, (u128, Option<u128>)> = HashMap::new();

        for event in self.events.lock().iter() {
            let offset = event.timestamp.duration_since(self.start_time).as_millis();
            match event.event_type {
                EventType::Started => {
                    spans.insert(event.step.clone(), (offset, None));
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(span) = spans.get_mut(&event.step) {
                        span.1 = Some(offset);
                    }
                }
            }
        }

        spans
    }

    /// Generates an ASCII Gantt chart, 50 columns wide.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }
        let scale = 50.0 / total_time as f64;

        let mut finished: Vec<_> = self
            .spans()
            .into_iter()
            .filter_map(|(step, (start, end))| end.map(|end| (step, start, end)))
            .collect();
        finished.sort_by_key(|(_, start, _)| *start);

        for (step, start, end) in finished {
            let start_pos = (start as f64 * scale) as usize;
            let width = ((end - start) as f64 * scale).max(1.0) as usize;

            output.push_str(&format!(
                "{} |{}{}| ({} ms)\n",
                truncate(&step, 12),
                " ".repeat(start_pos),
                "#".repeat(width),
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns finished step durations in milliseconds.
    pub fn durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .filter_map(|(step, (start, end))| end.map(|end| (step, end - start)))
            .collect()
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ExecutionTimeline {
    fn emit(&self, event: &StepEvent) {
        let event_type = match event {
            StepEvent::Started { .. } => EventType::Started,
            StepEvent::Completed { .. } => EventType::Completed,
            StepEvent::Failed { .. } => EventType::Failed,
        };
        self.add_event(event.step(), event_type);
    }
}

/// Pads or truncates a step name to a fixed column width.
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        format!("{:width$}", s, width = width)
    } else {
        let head: String = s.chars().take(width - 3).collect();
        format!("{}...", head)
    }
}

//! Step Events
//!
//! Observability hooks fired around every step evaluation.

use std::time::Duration;

use log::{debug, error, info};

use crate::resources::ResourceKind;

/// Lifecycle notification for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    Started {
        step: String,
        resource_kind: ResourceKind,
    },
    Completed {
        step: String,
        resource_kind: ResourceKind,
        elapsed: Duration,
        /// Length of the result's string form
        result_size: usize,
    },
    Failed {
        step: String,
        resource_kind: ResourceKind,
        elapsed: Duration,
        error_kind: &'static str,
        message: String,
    },
}

impl StepEvent {
    pub fn step(&self) -> &str {
        match self {
            Self::Started { step, .. } | Self::Completed { step, .. } | Self::Failed { step, .. } => {
                step
            }
        }
    }
}

/// Receiver of step events. Called from parallel branches concurrently.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &StepEvent);
}

/// Writes step events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &StepEvent) {
        match event {
            StepEvent::Started {
                step,
                resource_kind,
            } => info!("Executing: {} (Resource type: {})", step, resource_kind),
            StepEvent::Completed {
                step,
                elapsed,
                result_size,
                ..
            } => debug!(
                "Step '{}' completed in {:.2?} ({} bytes)",
                step, elapsed, result_size
            ),
            StepEvent::Failed {
                step,
                elapsed,
                error_kind,
                message,
                ..
            } => error!(
                "Step '{}' failed after {:.2?} [{}]: {}",
                step, elapsed, error_kind, message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_step_name() {
        let event = StepEvent::Failed {
            step: "lint".to_string(),
            resource_kind: ResourceKind::File,
            elapsed: Duration::from_millis(3),
            error_kind: "execution",
            message: "boom".to_string(),
        };
        assert_eq!(event.step(), "lint");
        LogSink.emit(&event);
    }
}

//! Step Monitoring
//!
//! - [`events`]: step lifecycle events and sinks
//! - [`ExecutionTimeline`]: step timing for Gantt charts

pub mod events;
pub mod timeline;

pub use events::{EventSink, LogSink, StepEvent};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};

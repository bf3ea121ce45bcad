//! Scheduler profile registry and reapplication engine.
//!
//! Scheduler profiles are shared, reference-counted associations. The
//! registry owns the profile nodes; consumers (queues, scheduler groups,
//! ports) reference them by id and are tracked in per-kind back-link
//! lists. Parameter changes on a shared profile are re-pushed to every
//! consumer with counted, phase-ordered compensation.

pub mod orch;
pub mod types;

pub use orch::SchedulerConsumer;
pub use types::{
    MeterType, SchedulerNode, SchedulerParams, SchedulingType, SCHEDULER_ATTR_MAX_BANDWIDTH_RATE,
    SCHEDULER_ATTR_SCHEDULING_TYPE, SCHEDULER_ATTR_SCHEDULING_WEIGHT, SCHEDULER_ATTR_TABLE,
};

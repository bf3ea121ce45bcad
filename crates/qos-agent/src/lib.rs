//! Hierarchical QoS control plane for a switch ASIC.
//!
//! This crate turns the vendor-neutral, attribute-based configuration API
//! defined in `sai-common` into a consistent in-memory QoS model and
//! mirrors every mutation into a driver backend:
//!
//! ```text
//!              QosSwitch (one lock, method table per object kind)
//!                  │
//!                  ▼
//!              QosContext ──────────────┐
//!   ┌──────────┬──┴───────┬──────────┐  │
//!   ▼          ▼          ▼          ▼  ▼
//! scheduler  buffer    hierarchy   port  ObjectCache per kind
//! registry   accounting  builder  lifecycle
//!                  │
//!                  ▼
//!           SwitchDriver (vendor backend, e.g. sai-vs)
//! ```
//!
//! # Key Components
//!
//! - [`context::QosSwitch`]: public handle; every operation acquires the
//!   single subsystem lock and holds it across the driver call
//! - [`scheduler`]: shared scheduler profiles with back-link lists, the
//!   default-scheduler singleton and the reapplication engine
//! - [`buffer`]: capacity-accounted pools and profiles with many-to-many
//!   consumer attachment
//! - [`hierarchy`]: per-port scheduler-group trees built from a
//!   declarative template, with prefix-compensated batch child operations
//! - [`port`]: the per-port lifecycle state machine
//! - [`wred`], [`policer`], [`qosmap`]: thin ref-counted registries for
//!   the remaining attachable profiles
//!
//! # Error Handling
//!
//! Validation failures return before any side effect. Once a driver call
//! or graph mutation has begun, failures trigger synchronous compensation
//! in reverse order of the applied steps ([`undo::UndoLog`], plus counted
//! prefix compensation for batch and fan-out operations). Compensation is
//! best-effort: its own failures are logged and the original error is
//! surfaced.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod context;
pub mod hierarchy;
pub mod policer;
pub mod port;
pub mod qosmap;
pub mod scheduler;
pub mod undo;
pub mod wred;

pub use buffer::{BufferConsumer, BufferPoolType, ThresholdMode};
pub use config::QosConfig;
pub use context::{QosContext, QosSwitch};
pub use hierarchy::{ChildSpec, GroupSpec, HierarchyTemplate, LevelSpec};
pub use port::{PortQosState, QueueType};
pub use qosmap::QosMapType;
pub use scheduler::{MeterType, SchedulerConsumer, SchedulingType};

pub use sai_common::{
    AttrId, AttrOp, AttrValue, Attribute, BufferPoolOid, BufferProfileOid, ObjectId, PolicerOid,
    PortOid, PortPoolOid, PriorityGroupOid, QosMapOid, QueueOid, RawObjectId, SaiError, SaiResult,
    SchedGroupOid, SchedulerOid, Status, SwitchDriver, WredOid,
};

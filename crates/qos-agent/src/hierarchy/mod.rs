//! Scheduler-group hierarchy builder.
//!
//! The per-port tree of scheduler groups between the port root and the
//! leaf queues: built level by level from a declarative template, mutated
//! through batch child operations with prefix compensation, torn down in
//! reverse.

pub mod orch;
pub mod types;

pub use orch::ChildRef;
pub use types::{
    ChildSpec, GroupSpec, HierarchyTemplate, LevelSpec, SchedGroupNode, SCHED_GROUP_ATTR_CHILD_COUNT,
    SCHED_GROUP_ATTR_CHILD_LIST, SCHED_GROUP_ATTR_LEVEL, SCHED_GROUP_ATTR_MAX_CHILDS,
    SCHED_GROUP_ATTR_PARENT_NODE, SCHED_GROUP_ATTR_PORT_ID,
    SCHED_GROUP_ATTR_SCHEDULER_PROFILE_ID, SCHED_GROUP_ATTR_TABLE,
};

//! Port QoS node lifecycle.
//!
//! The per-port aggregate: queue list, one scheduler-group list per
//! hierarchy level, priority-group list and port-pool list, plus the
//! init/deinit state machine that drives global ordering.

pub mod orch;
pub mod types;

pub use types::{
    PortNode, PortPoolNode, PortQosState, PriorityGroupNode, QueueNode, QueueType,
    PORT_ATTR_POLICER_ID, PORT_ATTR_QOS_BUFFER_PROFILE_ID, PORT_ATTR_QOS_DSCP_TO_TC_MAP,
    PORT_ATTR_QOS_PRIORITY_GROUP_LIST, PORT_ATTR_QOS_QUEUE_LIST, PORT_ATTR_QOS_SCHED_GROUP_LIST,
    PORT_ATTR_QOS_SCHEDULER_PROFILE_ID, PORT_ATTR_QOS_TC_TO_QUEUE_MAP, PORT_ATTR_TABLE,
    PORT_POOL_ATTR_BUFFER_POOL_ID, PORT_POOL_ATTR_PORT_ID, PORT_POOL_ATTR_QOS_WRED_PROFILE_ID,
    PRIORITY_GROUP_ATTR_BUFFER_PROFILE, PRIORITY_GROUP_ATTR_INDEX, PRIORITY_GROUP_ATTR_PORT,
    QUEUE_ATTR_BUFFER_PROFILE_ID, QUEUE_ATTR_INDEX, QUEUE_ATTR_PARENT_SCHEDULER_NODE,
    QUEUE_ATTR_PORT, QUEUE_ATTR_SCHEDULER_PROFILE_ID, QUEUE_ATTR_TABLE, QUEUE_ATTR_TYPE,
    QUEUE_ATTR_WRED_PROFILE_ID, QUEUE_STAT_BYTES, QUEUE_STAT_DROPPED_BYTES,
    QUEUE_STAT_DROPPED_PACKETS, QUEUE_STAT_PACKETS,
};

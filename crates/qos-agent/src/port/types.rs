//! Port, queue and priority-group types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use sai_common::attr::{AttrId, VendorAttrEntry};
use sai_common::types::{
    BufferPoolOid, BufferProfileOid, PolicerOid, PortOid, PortPoolOid, PriorityGroupOid,
    QosMapOid, QueueOid, SchedGroupOid, SchedulerOid, WredOid,
};

use crate::qosmap::QosMapType;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub const QUEUE_ATTR_TYPE: AttrId = 0;
pub const QUEUE_ATTR_PORT: AttrId = 1;
pub const QUEUE_ATTR_INDEX: AttrId = 2;
pub const QUEUE_ATTR_PARENT_SCHEDULER_NODE: AttrId = 3;
pub const QUEUE_ATTR_WRED_PROFILE_ID: AttrId = 4;
pub const QUEUE_ATTR_BUFFER_PROFILE_ID: AttrId = 5;
pub const QUEUE_ATTR_SCHEDULER_PROFILE_ID: AttrId = 6;

/// Vendor attribute table for queues.
///
/// The parent scheduler node is read-only here: parent links are mutated
/// only through the child-list operations on scheduler groups.
pub static QUEUE_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(QUEUE_ATTR_TYPE, true, false, true, true),
    VendorAttrEntry::new(QUEUE_ATTR_PORT, true, false, true, true),
    VendorAttrEntry::new(QUEUE_ATTR_INDEX, true, false, true, true),
    VendorAttrEntry::new(QUEUE_ATTR_PARENT_SCHEDULER_NODE, false, false, true, false),
    VendorAttrEntry::new(QUEUE_ATTR_WRED_PROFILE_ID, true, true, true, false),
    VendorAttrEntry::new(QUEUE_ATTR_BUFFER_PROFILE_ID, true, true, true, false),
    VendorAttrEntry::new(QUEUE_ATTR_SCHEDULER_PROFILE_ID, true, true, true, false),
];

/// Queue statistics counters.
pub const QUEUE_STAT_PACKETS: u32 = 0;
pub const QUEUE_STAT_BYTES: u32 = 1;
pub const QUEUE_STAT_DROPPED_PACKETS: u32 = 2;
pub const QUEUE_STAT_DROPPED_BYTES: u32 = 3;

/// Queue type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    #[default]
    Unicast,
    Multicast,
    All,
}

impl QueueType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Unicast),
            1 => Some(Self::Multicast),
            2 => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Unicast => 0,
            Self::Multicast => 1,
            Self::All => 2,
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unicast => write!(f, "UC"),
            Self::Multicast => write!(f, "MC"),
            Self::All => write!(f, "ALL"),
        }
    }
}

/// A leaf queue node.
///
/// Not removable while a WRED, buffer-profile, parent-group or
/// non-default-scheduler association exists.
#[derive(Debug, Clone)]
pub struct QueueNode {
    pub port_id: PortOid,
    pub index: u32,
    pub queue_type: QueueType,
    pub parent_group: Option<SchedGroupOid>,
    pub scheduler_id: SchedulerOid,
    pub wred_id: Option<WredOid>,
    pub buffer_profile_id: Option<BufferProfileOid>,
}

impl QueueNode {
    pub fn new(port_id: PortOid, index: u32, queue_type: QueueType, scheduler_id: SchedulerOid) -> Self {
        Self {
            port_id,
            index,
            queue_type,
            parent_group: None,
            scheduler_id,
            wred_id: None,
            buffer_profile_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Priority group
// ---------------------------------------------------------------------------

pub const PRIORITY_GROUP_ATTR_BUFFER_PROFILE: AttrId = 0;
pub const PRIORITY_GROUP_ATTR_PORT: AttrId = 1;
pub const PRIORITY_GROUP_ATTR_INDEX: AttrId = 2;

/// Vendor attribute table for ingress priority groups.
pub static PRIORITY_GROUP_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(PRIORITY_GROUP_ATTR_BUFFER_PROFILE, true, true, true, false),
    VendorAttrEntry::new(PRIORITY_GROUP_ATTR_PORT, true, false, true, true),
    VendorAttrEntry::new(PRIORITY_GROUP_ATTR_INDEX, true, false, true, true),
];

/// Priority group statistics counters.
pub const PRIORITY_GROUP_STAT_PACKETS: u32 = 0;
pub const PRIORITY_GROUP_STAT_BYTES: u32 = 1;
pub const PRIORITY_GROUP_STAT_DROPPED_PACKETS: u32 = 2;

/// An ingress priority-group leaf node, one per configured PG per port.
#[derive(Debug, Clone)]
pub struct PriorityGroupNode {
    pub port_id: PortOid,
    pub index: u8,
    pub buffer_profile_id: Option<BufferProfileOid>,
}

impl PriorityGroupNode {
    pub fn new(port_id: PortOid, index: u8) -> Self {
        Self {
            port_id,
            index,
            buffer_profile_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Port pool
// ---------------------------------------------------------------------------

pub const PORT_POOL_ATTR_PORT_ID: AttrId = 0;
pub const PORT_POOL_ATTR_BUFFER_POOL_ID: AttrId = 1;
pub const PORT_POOL_ATTR_QOS_WRED_PROFILE_ID: AttrId = 2;

/// Vendor attribute table for per-port pool objects.
pub static PORT_POOL_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(PORT_POOL_ATTR_PORT_ID, true, false, true, true),
    VendorAttrEntry::new(PORT_POOL_ATTR_BUFFER_POOL_ID, true, false, true, true),
    VendorAttrEntry::new(PORT_POOL_ATTR_QOS_WRED_PROFILE_ID, true, true, true, false),
];

/// A per-(port, buffer-pool) object carrying the port-level WRED binding.
#[derive(Debug, Clone)]
pub struct PortPoolNode {
    pub port_id: PortOid,
    pub pool_id: BufferPoolOid,
    pub wred_id: Option<WredOid>,
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

pub const PORT_ATTR_QOS_SCHEDULER_PROFILE_ID: AttrId = 0;
pub const PORT_ATTR_QOS_BUFFER_PROFILE_ID: AttrId = 1;
pub const PORT_ATTR_POLICER_ID: AttrId = 2;
pub const PORT_ATTR_QOS_DSCP_TO_TC_MAP: AttrId = 3;
pub const PORT_ATTR_QOS_TC_TO_QUEUE_MAP: AttrId = 4;
pub const PORT_ATTR_QOS_QUEUE_LIST: AttrId = 5;
pub const PORT_ATTR_QOS_SCHED_GROUP_LIST: AttrId = 6;
pub const PORT_ATTR_QOS_PRIORITY_GROUP_LIST: AttrId = 7;

/// Vendor attribute table for ports.
///
/// Ports are created bare (hardware decides lanes and speed elsewhere);
/// every QoS binding is a settable attribute.
pub static PORT_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(PORT_ATTR_QOS_SCHEDULER_PROFILE_ID, false, true, true, false),
    VendorAttrEntry::new(PORT_ATTR_QOS_BUFFER_PROFILE_ID, false, true, true, false),
    VendorAttrEntry::new(PORT_ATTR_POLICER_ID, false, true, true, false),
    VendorAttrEntry::new(PORT_ATTR_QOS_DSCP_TO_TC_MAP, false, true, true, false),
    VendorAttrEntry::new(PORT_ATTR_QOS_TC_TO_QUEUE_MAP, false, true, true, false),
    VendorAttrEntry::new(PORT_ATTR_QOS_QUEUE_LIST, false, false, true, false),
    VendorAttrEntry::new(PORT_ATTR_QOS_SCHED_GROUP_LIST, false, false, true, false),
    VendorAttrEntry::new(PORT_ATTR_QOS_PRIORITY_GROUP_LIST, false, false, true, false),
];

/// Port QoS lifecycle states.
///
/// ```text
/// Uninitialized → GlobalInit → (HierarchyInit | FlatQueueInit) → PgInit → Ready
/// ```
///
/// De-init reverses the path; a port leaves `Ready` only when every child
/// list is empty and every non-default config has been detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortQosState {
    #[default]
    Uninitialized,
    GlobalInit,
    HierarchyInit,
    FlatQueueInit,
    PgInit,
    Ready,
}

impl fmt::Display for PortQosState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::GlobalInit => "global-init",
            Self::HierarchyInit => "hierarchy-init",
            Self::FlatQueueInit => "flat-queue-init",
            Self::PgInit => "pg-init",
            Self::Ready => "ready",
        };
        write!(f, "{}", s)
    }
}

/// The per-port QoS aggregate: root of the port's object tree.
#[derive(Debug, Clone)]
pub struct PortNode {
    pub state: PortQosState,
    pub queues: Vec<QueueOid>,
    /// One scheduler-group list per hierarchy level.
    pub sched_groups: Vec<Vec<SchedGroupOid>>,
    pub priority_groups: Vec<PriorityGroupOid>,
    pub port_pools: Vec<PortPoolOid>,
    pub scheduler_id: SchedulerOid,
    pub buffer_profile_id: Option<BufferProfileOid>,
    pub policer_id: Option<PolicerOid>,
    pub qos_maps: BTreeMap<QosMapType, QosMapOid>,
}

impl PortNode {
    pub fn new(scheduler_id: SchedulerOid) -> Self {
        Self {
            state: PortQosState::Uninitialized,
            queues: Vec::new(),
            sched_groups: Vec::new(),
            priority_groups: Vec::new(),
            port_pools: Vec::new(),
            scheduler_id,
            buffer_profile_id: None,
            policer_id: None,
            qos_maps: BTreeMap::new(),
        }
    }

    /// True when every child list is empty (the remove precondition).
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
            && self.sched_groups.iter().all(|level| level.is_empty())
            && self.priority_groups.is_empty()
            && self.port_pools.is_empty()
    }

    /// All scheduler groups across levels, root level first.
    pub fn all_groups(&self) -> impl Iterator<Item = SchedGroupOid> + '_ {
        self.sched_groups.iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_type_codes() {
        assert_eq!(QueueType::from_u32(0), Some(QueueType::Unicast));
        assert_eq!(QueueType::from_u32(1), Some(QueueType::Multicast));
        assert_eq!(QueueType::from_u32(9), None);
        assert_eq!(QueueType::Multicast.as_u32(), 1);
        assert_eq!(QueueType::Multicast.to_string(), "MC");
    }

    #[test]
    fn test_port_empty_check() {
        let mut port = PortNode::new(SchedulerOid::NULL);
        assert!(port.is_empty());

        port.sched_groups.push(Vec::new());
        assert!(port.is_empty());

        port.queues.push(QueueOid::from_raw(1).unwrap());
        assert!(!port.is_empty());
    }

    #[test]
    fn test_port_state_display() {
        assert_eq!(PortQosState::Ready.to_string(), "ready");
        assert_eq!(PortQosState::GlobalInit.to_string(), "global-init");
    }

    #[test]
    fn test_all_groups_flattens_levels() {
        let mut port = PortNode::new(SchedulerOid::NULL);
        port.sched_groups = vec![
            vec![SchedGroupOid::from_raw(1).unwrap()],
            vec![
                SchedGroupOid::from_raw(2).unwrap(),
                SchedGroupOid::from_raw(3).unwrap(),
            ],
        ];
        let raws: Vec<u64> = port.all_groups().map(|g| g.as_raw()).collect();
        assert_eq!(raws, vec![1, 2, 3]);
    }
}

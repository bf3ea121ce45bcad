//! Scheduler-group hierarchy types: per-port tree nodes and the
//! declarative per-level build template.

use serde::{Deserialize, Serialize};

use sai_common::attr::{AttrId, VendorAttrEntry};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{PortOid, QueueOid, SchedGroupOid, SchedulerOid};

use crate::port::types::QueueType;

pub const SCHED_GROUP_ATTR_PORT_ID: AttrId = 0;
pub const SCHED_GROUP_ATTR_LEVEL: AttrId = 1;
pub const SCHED_GROUP_ATTR_MAX_CHILDS: AttrId = 2;
pub const SCHED_GROUP_ATTR_PARENT_NODE: AttrId = 3;
pub const SCHED_GROUP_ATTR_SCHEDULER_PROFILE_ID: AttrId = 4;
pub const SCHED_GROUP_ATTR_CHILD_COUNT: AttrId = 5;
pub const SCHED_GROUP_ATTR_CHILD_LIST: AttrId = 6;

/// Vendor attribute table for scheduler groups.
pub static SCHED_GROUP_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(SCHED_GROUP_ATTR_PORT_ID, true, false, true, true),
    VendorAttrEntry::new(SCHED_GROUP_ATTR_LEVEL, true, false, true, true),
    VendorAttrEntry::new(SCHED_GROUP_ATTR_MAX_CHILDS, true, false, true, true),
    VendorAttrEntry::new(SCHED_GROUP_ATTR_PARENT_NODE, true, false, true, false),
    VendorAttrEntry::new(SCHED_GROUP_ATTR_SCHEDULER_PROFILE_ID, true, true, true, false),
    VendorAttrEntry::new(SCHED_GROUP_ATTR_CHILD_COUNT, false, false, true, false),
    VendorAttrEntry::new(SCHED_GROUP_ATTR_CHILD_LIST, false, false, true, false),
];

/// A scheduler-group tree node.
///
/// Groups are tree-owned by their port and cross-referenced by id. A group
/// is removable only when it has no children and no parent link; the parent
/// link is cleared by `remove_child_object_from_group` first.
#[derive(Debug, Clone)]
pub struct SchedGroupNode {
    pub port_id: PortOid,
    pub level: u32,
    pub max_childs: u32,
    /// Parent group; `None` means attached under the port root.
    pub parent: Option<SchedGroupOid>,
    pub child_queues: Vec<QueueOid>,
    pub child_groups: Vec<SchedGroupOid>,
    pub scheduler_id: SchedulerOid,
}

impl SchedGroupNode {
    pub fn new(port_id: PortOid, level: u32, max_childs: u32, scheduler_id: SchedulerOid) -> Self {
        Self {
            port_id,
            level,
            max_childs,
            parent: None,
            child_queues: Vec::new(),
            child_groups: Vec::new(),
            scheduler_id,
        }
    }

    pub fn child_count(&self) -> usize {
        self.child_queues.len() + self.child_groups.len()
    }

    /// Checks that `extra` more children fit under `max_childs`.
    pub fn check_capacity(&self, extra: usize) -> SaiResult<()> {
        if self.max_childs != 0 && self.child_count() + extra > self.max_childs as usize {
            return Err(SaiError::insufficient_resources(format!(
                "group child capacity {} exceeded",
                self.max_childs
            )));
        }
        Ok(())
    }
}

/// A child slot in the hierarchy template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChildSpec {
    /// A leaf queue: queue type plus index within that type's queue array.
    Queue { queue_type: QueueType, index: u32 },
    /// A scheduler group of the next-deeper level, by index.
    Group { index: u32 },
}

/// Children of one group in the template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub children: Vec<ChildSpec>,
}

/// One hierarchy level: its groups and their shared child bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub max_childs: u32,
    pub groups: Vec<GroupSpec>,
}

/// Declarative per-port hierarchy build template.
///
/// Level 0 is nearest the port root; the deepest level's children must all
/// be queues, inner levels' children must all be groups of the next level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyTemplate {
    pub levels: Vec<LevelSpec>,
}

impl HierarchyTemplate {
    /// Checks template self-consistency: group indices in range, queues
    /// only at the leaf level, groups only above it.
    pub fn validate(&self) -> SaiResult<()> {
        let leaf = self.levels.len().saturating_sub(1);
        for (level, spec) in self.levels.iter().enumerate() {
            for (group_index, group) in spec.groups.iter().enumerate() {
                if spec.max_childs != 0 && group.children.len() > spec.max_childs as usize {
                    return Err(SaiError::invalid_parameter(format!(
                        "template level {} group {} exceeds max_childs {}",
                        level, group_index, spec.max_childs
                    )));
                }
                for child in &group.children {
                    match child {
                        ChildSpec::Queue { .. } if level != leaf => {
                            return Err(SaiError::invalid_parameter(format!(
                                "queue child on non-leaf level {}",
                                level
                            )));
                        }
                        ChildSpec::Group { index } => {
                            if level == leaf {
                                return Err(SaiError::invalid_parameter(format!(
                                    "group child on leaf level {}",
                                    level
                                )));
                            }
                            let next = &self.levels[level + 1];
                            if *index as usize >= next.groups.len() {
                                return Err(SaiError::invalid_parameter(format!(
                                    "template level {} references missing group {} of level {}",
                                    level,
                                    index,
                                    level + 1
                                )));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of hierarchy levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

impl Default for HierarchyTemplate {
    /// Two levels: one root group fanning out to eight leaf groups, each
    /// leaf group holding the same-index unicast and multicast queue.
    fn default() -> Self {
        let leaf_groups: Vec<GroupSpec> = (0..8)
            .map(|i| GroupSpec {
                children: vec![
                    ChildSpec::Queue {
                        queue_type: QueueType::Unicast,
                        index: i,
                    },
                    ChildSpec::Queue {
                        queue_type: QueueType::Multicast,
                        index: i,
                    },
                ],
            })
            .collect();
        let root = GroupSpec {
            children: (0..8).map(|index| ChildSpec::Group { index }).collect(),
        };
        Self {
            levels: vec![
                LevelSpec {
                    max_childs: 64,
                    groups: vec![root],
                },
                LevelSpec {
                    max_childs: 8,
                    groups: leaf_groups,
                },
            ],
        }
    }
}

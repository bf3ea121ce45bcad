//! Scheduler profile types and attribute schema.

use std::fmt;

use serde::{Deserialize, Serialize};

use sai_common::attr::{AttrId, AttrValue, Attribute, VendorAttrEntry};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{PortOid, QueueOid, SchedGroupOid};

pub const SCHEDULER_ATTR_SCHEDULING_TYPE: AttrId = 0;
pub const SCHEDULER_ATTR_SCHEDULING_WEIGHT: AttrId = 1;
pub const SCHEDULER_ATTR_METER_TYPE: AttrId = 2;
pub const SCHEDULER_ATTR_MIN_BANDWIDTH_RATE: AttrId = 3;
pub const SCHEDULER_ATTR_MIN_BANDWIDTH_BURST_RATE: AttrId = 4;
pub const SCHEDULER_ATTR_MAX_BANDWIDTH_RATE: AttrId = 5;
pub const SCHEDULER_ATTR_MAX_BANDWIDTH_BURST_RATE: AttrId = 6;

/// Vendor attribute table for scheduler profiles.
pub static SCHEDULER_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(SCHEDULER_ATTR_SCHEDULING_TYPE, true, true, true, false),
    VendorAttrEntry::new(SCHEDULER_ATTR_SCHEDULING_WEIGHT, true, true, true, false),
    VendorAttrEntry::new(SCHEDULER_ATTR_METER_TYPE, true, true, true, false),
    VendorAttrEntry::new(SCHEDULER_ATTR_MIN_BANDWIDTH_RATE, true, true, true, false),
    VendorAttrEntry::new(SCHEDULER_ATTR_MIN_BANDWIDTH_BURST_RATE, true, true, true, false),
    VendorAttrEntry::new(SCHEDULER_ATTR_MAX_BANDWIDTH_RATE, true, true, true, false),
    VendorAttrEntry::new(SCHEDULER_ATTR_MAX_BANDWIDTH_BURST_RATE, true, true, true, false),
];

/// Scheduling algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchedulingType {
    /// Strict priority scheduling.
    Strict,
    /// Weighted Round Robin.
    Wrr,
    /// Deficit Weighted Round Robin.
    #[default]
    Dwrr,
}

impl SchedulingType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Strict),
            1 => Some(Self::Wrr),
            2 => Some(Self::Dwrr),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Strict => 0,
            Self::Wrr => 1,
            Self::Dwrr => 2,
        }
    }
}

impl fmt::Display for SchedulingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "STRICT"),
            Self::Wrr => write!(f, "WRR"),
            Self::Dwrr => write!(f, "DWRR"),
        }
    }
}

/// Shaper meter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeterType {
    Packets,
    #[default]
    Bytes,
}

impl MeterType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Packets),
            1 => Some(Self::Bytes),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Packets => 0,
            Self::Bytes => 1,
        }
    }
}

/// Scheduler profile parameters: algorithm, weight, shaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerParams {
    pub scheduling_type: SchedulingType,
    pub weight: u8,
    pub meter_type: MeterType,
    pub min_bandwidth_rate: u64,
    pub min_bandwidth_burst_rate: u64,
    pub max_bandwidth_rate: u64,
    pub max_bandwidth_burst_rate: u64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            scheduling_type: SchedulingType::Dwrr,
            weight: 1,
            meter_type: MeterType::Bytes,
            min_bandwidth_rate: 0,
            min_bandwidth_burst_rate: 0,
            max_bandwidth_rate: 0,
            max_bandwidth_burst_rate: 0,
        }
    }
}

impl SchedulerParams {
    /// Applies one attribute on top of the current parameters.
    ///
    /// `index` is the attribute's position in the caller's list, used for
    /// attribute-indexed value errors.
    pub fn apply_attr(&mut self, attr: &Attribute, index: usize) -> SaiResult<()> {
        let bad_value = || SaiError::InvalidAttrValue {
            index,
            attr_id: attr.id,
        };
        match attr.id {
            SCHEDULER_ATTR_SCHEDULING_TYPE => {
                let raw = attr.value.as_u32().ok_or_else(bad_value)?;
                self.scheduling_type = SchedulingType::from_u32(raw).ok_or_else(bad_value)?;
            }
            SCHEDULER_ATTR_SCHEDULING_WEIGHT => {
                let weight = attr.value.as_u8().ok_or_else(bad_value)?;
                if weight == 0 || weight > 100 {
                    return Err(bad_value());
                }
                self.weight = weight;
            }
            SCHEDULER_ATTR_METER_TYPE => {
                let raw = attr.value.as_u32().ok_or_else(bad_value)?;
                self.meter_type = MeterType::from_u32(raw).ok_or_else(bad_value)?;
            }
            SCHEDULER_ATTR_MIN_BANDWIDTH_RATE => {
                self.min_bandwidth_rate = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            SCHEDULER_ATTR_MIN_BANDWIDTH_BURST_RATE => {
                self.min_bandwidth_burst_rate = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            SCHEDULER_ATTR_MAX_BANDWIDTH_RATE => {
                self.max_bandwidth_rate = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            SCHEDULER_ATTR_MAX_BANDWIDTH_BURST_RATE => {
                self.max_bandwidth_burst_rate = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            _ => {
                return Err(SaiError::UnknownAttribute {
                    index,
                    attr_id: attr.id,
                })
            }
        }
        Ok(())
    }

    /// Builds parameters from an attribute list over the defaults.
    pub fn from_attrs(attrs: &[Attribute]) -> SaiResult<Self> {
        let mut params = Self::default();
        for (index, attr) in attrs.iter().enumerate() {
            params.apply_attr(attr, index)?;
        }
        Ok(params)
    }

    /// Renders the full parameter set as an attribute list, e.g. for the
    /// driver-side create of the default scheduler.
    pub fn to_attrs(&self) -> Vec<Attribute> {
        [
            SCHEDULER_ATTR_SCHEDULING_TYPE,
            SCHEDULER_ATTR_SCHEDULING_WEIGHT,
            SCHEDULER_ATTR_METER_TYPE,
            SCHEDULER_ATTR_MIN_BANDWIDTH_RATE,
            SCHEDULER_ATTR_MIN_BANDWIDTH_BURST_RATE,
            SCHEDULER_ATTR_MAX_BANDWIDTH_RATE,
            SCHEDULER_ATTR_MAX_BANDWIDTH_BURST_RATE,
        ]
        .iter()
        .filter_map(|id| self.attr_value(*id).map(|value| Attribute::new(*id, value)))
        .collect()
    }

    /// Renders one attribute's current value.
    pub fn attr_value(&self, id: AttrId) -> Option<AttrValue> {
        match id {
            SCHEDULER_ATTR_SCHEDULING_TYPE => Some(AttrValue::U32(self.scheduling_type.as_u32())),
            SCHEDULER_ATTR_SCHEDULING_WEIGHT => Some(AttrValue::U8(self.weight)),
            SCHEDULER_ATTR_METER_TYPE => Some(AttrValue::U32(self.meter_type.as_u32())),
            SCHEDULER_ATTR_MIN_BANDWIDTH_RATE => Some(AttrValue::U64(self.min_bandwidth_rate)),
            SCHEDULER_ATTR_MIN_BANDWIDTH_BURST_RATE => {
                Some(AttrValue::U64(self.min_bandwidth_burst_rate))
            }
            SCHEDULER_ATTR_MAX_BANDWIDTH_RATE => Some(AttrValue::U64(self.max_bandwidth_rate)),
            SCHEDULER_ATTR_MAX_BANDWIDTH_BURST_RATE => {
                Some(AttrValue::U64(self.max_bandwidth_burst_rate))
            }
            _ => None,
        }
    }
}

/// A scheduler profile node.
///
/// Schedulers are shared, many-to-one associations: the back-link lists
/// record every queue, group and port currently bound to this profile.
/// The node is removable only when all three lists are empty.
#[derive(Debug, Clone, Default)]
pub struct SchedulerNode {
    pub params: SchedulerParams,
    pub queues: Vec<QueueOid>,
    pub groups: Vec<SchedGroupOid>,
    pub ports: Vec<PortOid>,
}

impl SchedulerNode {
    pub fn new(params: SchedulerParams) -> Self {
        Self {
            params,
            queues: Vec::new(),
            groups: Vec::new(),
            ports: Vec::new(),
        }
    }

    /// Total number of consumers bound to this profile.
    pub fn ref_count(&self) -> usize {
        self.queues.len() + self.groups.len() + self.ports.len()
    }

    pub fn attach_queue(&mut self, id: QueueOid) {
        if !self.queues.contains(&id) {
            self.queues.push(id);
        }
    }

    pub fn detach_queue(&mut self, id: QueueOid) {
        self.queues.retain(|q| *q != id);
    }

    pub fn attach_group(&mut self, id: SchedGroupOid) {
        if !self.groups.contains(&id) {
            self.groups.push(id);
        }
    }

    pub fn detach_group(&mut self, id: SchedGroupOid) {
        self.groups.retain(|g| *g != id);
    }

    pub fn attach_port(&mut self, id: PortOid) {
        if !self.ports.contains(&id) {
            self.ports.push(id);
        }
    }

    pub fn detach_port(&mut self, id: PortOid) {
        self.ports.retain(|p| *p != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_attrs() {
        let attrs = [
            Attribute::u32(SCHEDULER_ATTR_SCHEDULING_TYPE, SchedulingType::Wrr.as_u32()),
            Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 10),
            Attribute::u64(SCHEDULER_ATTR_MAX_BANDWIDTH_RATE, 40_000_000_000),
        ];
        let params = SchedulerParams::from_attrs(&attrs).unwrap();
        assert_eq!(params.scheduling_type, SchedulingType::Wrr);
        assert_eq!(params.weight, 10);
        assert_eq!(params.max_bandwidth_rate, 40_000_000_000);
        assert_eq!(params.min_bandwidth_rate, 0);
    }

    #[test]
    fn test_zero_weight_rejected_with_index() {
        let attrs = [
            Attribute::u32(SCHEDULER_ATTR_SCHEDULING_TYPE, 2),
            Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 0),
        ];
        let err = SchedulerParams::from_attrs(&attrs).unwrap_err();
        assert!(matches!(
            err,
            SaiError::InvalidAttrValue {
                index: 1,
                attr_id: SCHEDULER_ATTR_SCHEDULING_WEIGHT
            }
        ));
    }

    #[test]
    fn test_wrong_value_type_rejected() {
        let attrs = [Attribute::u64(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 5)];
        let err = SchedulerParams::from_attrs(&attrs).unwrap_err();
        assert!(matches!(err, SaiError::InvalidAttrValue { index: 0, .. }));
    }

    #[test]
    fn test_attr_value_roundtrip() {
        let params = SchedulerParams {
            weight: 42,
            ..Default::default()
        };
        assert_eq!(
            params.attr_value(SCHEDULER_ATTR_SCHEDULING_WEIGHT),
            Some(AttrValue::U8(42))
        );
        assert_eq!(params.attr_value(99), None);
    }

    #[test]
    fn test_node_ref_count() {
        let mut node = SchedulerNode::new(SchedulerParams::default());
        assert_eq!(node.ref_count(), 0);

        node.attach_queue(QueueOid::from_raw(1).unwrap());
        node.attach_queue(QueueOid::from_raw(1).unwrap());
        node.attach_port(PortOid::from_raw(2).unwrap());
        assert_eq!(node.ref_count(), 2);

        node.detach_queue(QueueOid::from_raw(1).unwrap());
        assert_eq!(node.ref_count(), 1);
    }
}

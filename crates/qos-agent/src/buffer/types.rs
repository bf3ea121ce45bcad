//! Buffer pool, buffer profile and consumer types.

use std::fmt;

use serde::{Deserialize, Serialize};

use sai_common::attr::{AttrId, AttrValue, Attribute, VendorAttrEntry};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{BufferPoolOid, PortOid, PriorityGroupOid, QueueOid};

pub const BUFFER_POOL_ATTR_TYPE: AttrId = 0;
pub const BUFFER_POOL_ATTR_SIZE: AttrId = 1;
pub const BUFFER_POOL_ATTR_THRESHOLD_MODE: AttrId = 2;
pub const BUFFER_POOL_ATTR_SHARED_SIZE: AttrId = 3;

/// Vendor attribute table for buffer pools.
///
/// `SHARED_SIZE` is read-only at the public surface; the accounting engine
/// pushes it to the driver itself during `pool_size_recalc`.
pub static BUFFER_POOL_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(BUFFER_POOL_ATTR_TYPE, true, false, true, true),
    VendorAttrEntry::new(BUFFER_POOL_ATTR_SIZE, true, true, true, true),
    VendorAttrEntry::new(BUFFER_POOL_ATTR_THRESHOLD_MODE, true, false, true, false),
    VendorAttrEntry::new(BUFFER_POOL_ATTR_SHARED_SIZE, false, false, true, false),
];

pub const BUFFER_PROFILE_ATTR_POOL_ID: AttrId = 0;
pub const BUFFER_PROFILE_ATTR_BUFFER_SIZE: AttrId = 1;
pub const BUFFER_PROFILE_ATTR_THRESHOLD_MODE: AttrId = 2;
pub const BUFFER_PROFILE_ATTR_SHARED_DYNAMIC_TH: AttrId = 3;
pub const BUFFER_PROFILE_ATTR_SHARED_STATIC_TH: AttrId = 4;
pub const BUFFER_PROFILE_ATTR_XOFF_TH: AttrId = 5;
pub const BUFFER_PROFILE_ATTR_XON_TH: AttrId = 6;
pub const BUFFER_PROFILE_ATTR_XON_OFFSET_TH: AttrId = 7;
pub const BUFFER_PROFILE_ATTR_GREEN_MAX_TH: AttrId = 8;
pub const BUFFER_PROFILE_ATTR_YELLOW_MAX_TH: AttrId = 9;
pub const BUFFER_PROFILE_ATTR_RED_MAX_TH: AttrId = 10;

/// Vendor attribute table for buffer profiles.
pub static BUFFER_PROFILE_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_POOL_ID, true, true, true, true),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_BUFFER_SIZE, true, true, true, true),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_THRESHOLD_MODE, true, false, true, false),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_SHARED_DYNAMIC_TH, true, true, true, false),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_SHARED_STATIC_TH, true, true, true, false),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_XOFF_TH, true, true, true, false),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_XON_TH, true, true, true, false),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_XON_OFFSET_TH, true, true, true, false),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_GREEN_MAX_TH, true, true, true, false),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_YELLOW_MAX_TH, true, true, true, false),
    VendorAttrEntry::new(BUFFER_PROFILE_ATTR_RED_MAX_TH, true, true, true, false),
];

/// Buffer pool direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferPoolType {
    Ingress,
    Egress,
    Both,
}

impl BufferPoolType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Ingress),
            1 => Some(Self::Egress),
            2 => Some(Self::Both),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Ingress => 0,
            Self::Egress => 1,
            Self::Both => 2,
        }
    }

    /// Returns true if a pool of this type can serve ingress consumers.
    pub fn serves_ingress(self) -> bool {
        matches!(self, Self::Ingress | Self::Both)
    }

    /// Returns true if a pool of this type can serve egress consumers.
    pub fn serves_egress(self) -> bool {
        matches!(self, Self::Egress | Self::Both)
    }
}

/// Threshold accounting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ThresholdMode {
    Static,
    #[default]
    Dynamic,
}

impl ThresholdMode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Static),
            1 => Some(Self::Dynamic),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Static => 0,
            Self::Dynamic => 1,
        }
    }
}

/// A buffer pool node with capacity bookkeeping.
///
/// Invariant: `shared_size + Σ(size of attached profiles, charged once per
/// profile with at least one consumer) == total_size`, and `shared_size` is
/// never negative.
#[derive(Debug, Clone)]
pub struct BufferPoolNode {
    pub pool_type: BufferPoolType,
    pub mode: ThresholdMode,
    pub total_size: u64,
    pub shared_size: u64,
}

impl BufferPoolNode {
    pub fn new(pool_type: BufferPoolType, mode: ThresholdMode, total_size: u64) -> Self {
        Self {
            pool_type,
            mode,
            total_size,
            shared_size: total_size,
        }
    }

    /// Bytes currently charged to attached profiles.
    pub fn charged(&self) -> u64 {
        self.total_size - self.shared_size
    }
}

/// Per-color maximum-threshold sub-records of a buffer profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorThresholds {
    pub green_max: Option<u64>,
    pub yellow_max: Option<u64>,
    pub red_max: Option<u64>,
}

/// A buffer profile node.
///
/// Shared by many consumers; the back-link lists record every port, queue
/// and priority group currently using the profile. Removable only when
/// `num_ref() == 0`.
#[derive(Debug, Clone)]
pub struct BufferProfileNode {
    pub pool_id: BufferPoolOid,
    pub size: u64,
    pub mode: ThresholdMode,
    pub shared_dynamic_th: i8,
    pub shared_static_th: u64,
    pub xoff_th: u64,
    pub xon_th: u64,
    pub xon_offset_th: u64,
    pub colors: ColorThresholds,
    pub ports: Vec<PortOid>,
    pub queues: Vec<QueueOid>,
    pub pgs: Vec<PriorityGroupOid>,
}

impl BufferProfileNode {
    pub fn new(pool_id: BufferPoolOid, size: u64, mode: ThresholdMode) -> Self {
        Self {
            pool_id,
            size,
            mode,
            shared_dynamic_th: 0,
            shared_static_th: 0,
            xoff_th: 0,
            xon_th: 0,
            xon_offset_th: 0,
            colors: ColorThresholds::default(),
            ports: Vec::new(),
            queues: Vec::new(),
            pgs: Vec::new(),
        }
    }

    /// Count of consumers currently referencing the profile.
    pub fn num_ref(&self) -> usize {
        self.ports.len() + self.queues.len() + self.pgs.len()
    }

    /// Returns true if this profile charges its pool (has any consumer).
    pub fn is_charged(&self) -> bool {
        self.num_ref() > 0
    }

    /// Applies one settable attribute in place.
    ///
    /// Pool reassignment is handled by the caller; this covers the scalar
    /// fields only. Callers snapshot the node first when they need the
    /// previous state for compensation.
    pub fn apply_attr(&mut self, attr: &Attribute, index: usize) -> SaiResult<()> {
        let bad_value = || SaiError::InvalidAttrValue {
            index,
            attr_id: attr.id,
        };
        match attr.id {
            BUFFER_PROFILE_ATTR_BUFFER_SIZE => {
                self.size = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            BUFFER_PROFILE_ATTR_SHARED_DYNAMIC_TH => {
                self.shared_dynamic_th = attr.value.as_i8().ok_or_else(bad_value)?;
            }
            BUFFER_PROFILE_ATTR_SHARED_STATIC_TH => {
                self.shared_static_th = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            BUFFER_PROFILE_ATTR_XOFF_TH => {
                self.xoff_th = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            BUFFER_PROFILE_ATTR_XON_TH => {
                self.xon_th = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            BUFFER_PROFILE_ATTR_XON_OFFSET_TH => {
                self.xon_offset_th = attr.value.as_u64().ok_or_else(bad_value)?;
            }
            BUFFER_PROFILE_ATTR_GREEN_MAX_TH => {
                self.colors.green_max = Some(attr.value.as_u64().ok_or_else(bad_value)?);
            }
            BUFFER_PROFILE_ATTR_YELLOW_MAX_TH => {
                self.colors.yellow_max = Some(attr.value.as_u64().ok_or_else(bad_value)?);
            }
            BUFFER_PROFILE_ATTR_RED_MAX_TH => {
                self.colors.red_max = Some(attr.value.as_u64().ok_or_else(bad_value)?);
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

    /// Renders one attribute's current value.
    pub fn attr_value(&self, id: AttrId) -> Option<AttrValue> {
        match id {
            BUFFER_PROFILE_ATTR_POOL_ID => Some(AttrValue::Oid(self.pool_id.as_raw())),
            BUFFER_PROFILE_ATTR_BUFFER_SIZE => Some(AttrValue::U64(self.size)),
            BUFFER_PROFILE_ATTR_THRESHOLD_MODE => Some(AttrValue::U32(self.mode.as_u32())),
            BUFFER_PROFILE_ATTR_SHARED_DYNAMIC_TH => Some(AttrValue::I8(self.shared_dynamic_th)),
            BUFFER_PROFILE_ATTR_SHARED_STATIC_TH => Some(AttrValue::U64(self.shared_static_th)),
            BUFFER_PROFILE_ATTR_XOFF_TH => Some(AttrValue::U64(self.xoff_th)),
            BUFFER_PROFILE_ATTR_XON_TH => Some(AttrValue::U64(self.xon_th)),
            BUFFER_PROFILE_ATTR_XON_OFFSET_TH => Some(AttrValue::U64(self.xon_offset_th)),
            BUFFER_PROFILE_ATTR_GREEN_MAX_TH => self.colors.green_max.map(AttrValue::U64),
            BUFFER_PROFILE_ATTR_YELLOW_MAX_TH => self.colors.yellow_max.map(AttrValue::U64),
            BUFFER_PROFILE_ATTR_RED_MAX_TH => self.colors.red_max.map(AttrValue::U64),
            _ => None,
        }
    }
}

/// A buffer-profile consumer: any object kind a profile can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferConsumer {
    Port(PortOid),
    Queue(QueueOid),
    Pg(PriorityGroupOid),
}

impl fmt::Display for BufferConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(id) => write!(f, "port {}", id),
            Self::Queue(id) => write!(f, "queue {}", id),
            Self::Pg(id) => write!(f, "pg {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_starts_uncharged() {
        let pool = BufferPoolNode::new(BufferPoolType::Ingress, ThresholdMode::Dynamic, 1000);
        assert_eq!(pool.shared_size, 1000);
        assert_eq!(pool.charged(), 0);
    }

    #[test]
    fn test_pool_type_direction() {
        assert!(BufferPoolType::Ingress.serves_ingress());
        assert!(!BufferPoolType::Ingress.serves_egress());
        assert!(BufferPoolType::Both.serves_ingress());
        assert!(BufferPoolType::Both.serves_egress());
    }

    #[test]
    fn test_profile_num_ref() {
        let pool = BufferPoolOid::from_raw(1).unwrap();
        let mut profile = BufferProfileNode::new(pool, 400, ThresholdMode::Dynamic);
        assert_eq!(profile.num_ref(), 0);
        assert!(!profile.is_charged());

        profile.queues.push(QueueOid::from_raw(2).unwrap());
        profile.pgs.push(PriorityGroupOid::from_raw(3).unwrap());
        assert_eq!(profile.num_ref(), 2);
        assert!(profile.is_charged());
    }

    #[test]
    fn test_profile_apply_attr() {
        let pool = BufferPoolOid::from_raw(1).unwrap();
        let mut profile = BufferProfileNode::new(pool, 400, ThresholdMode::Dynamic);

        profile
            .apply_attr(&Attribute::u64(BUFFER_PROFILE_ATTR_BUFFER_SIZE, 900), 0)
            .unwrap();
        assert_eq!(profile.size, 900);
        assert_eq!(
            profile.attr_value(BUFFER_PROFILE_ATTR_BUFFER_SIZE),
            Some(AttrValue::U64(900))
        );
    }

    #[test]
    fn test_profile_bad_value_type() {
        let pool = BufferPoolOid::from_raw(1).unwrap();
        let mut profile = BufferProfileNode::new(pool, 400, ThresholdMode::Dynamic);

        let err = profile
            .apply_attr(&Attribute::u32(BUFFER_PROFILE_ATTR_BUFFER_SIZE, 900), 2)
            .unwrap_err();
        assert!(matches!(err, SaiError::InvalidAttrValue { index: 2, .. }));
        assert_eq!(profile.size, 400);
    }

    #[test]
    fn test_color_thresholds() {
        let pool = BufferPoolOid::from_raw(1).unwrap();
        let mut profile = BufferProfileNode::new(pool, 0, ThresholdMode::Static);
        profile
            .apply_attr(&Attribute::u64(BUFFER_PROFILE_ATTR_GREEN_MAX_TH, 5000), 0)
            .unwrap();
        assert_eq!(profile.colors.green_max, Some(5000));
        assert_eq!(profile.colors.red_max, None);
    }
}

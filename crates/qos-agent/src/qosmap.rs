//! QoS map registry.
//!
//! Maps translate packet markings between domains (DSCP→TC, TC→queue, …)
//! and are referenced by ports. Entries are stored as packed key/value
//! pairs; validation bounds the key and value ranges per map type.

use std::slice;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sai_common::attr::{validate_attributes, AttrId, AttrOp, AttrValue, Attribute, VendorAttrEntry};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{PortOid, QosMapOid};

use crate::context::{QosContext, QosSwitch};

pub const QOS_MAP_ATTR_TYPE: AttrId = 0;
pub const QOS_MAP_ATTR_MAP_TO_VALUE_LIST: AttrId = 1;

/// Vendor attribute table for QoS maps.
pub static QOS_MAP_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(QOS_MAP_ATTR_TYPE, true, false, true, true),
    VendorAttrEntry::new(QOS_MAP_ATTR_MAP_TO_VALUE_LIST, true, true, true, false),
];

/// Map translation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QosMapType {
    DscpToTc,
    TcToQueue,
    TcToPriorityGroup,
    PfcPriorityToQueue,
}

impl QosMapType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::DscpToTc),
            1 => Some(Self::TcToQueue),
            2 => Some(Self::TcToPriorityGroup),
            3 => Some(Self::PfcPriorityToQueue),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::DscpToTc => 0,
            Self::TcToQueue => 1,
            Self::TcToPriorityGroup => 2,
            Self::PfcPriorityToQueue => 3,
        }
    }

    /// Inclusive upper bound of the map key for this type.
    pub fn key_bound(self) -> u8 {
        match self {
            Self::DscpToTc => 63,
            Self::TcToQueue | Self::TcToPriorityGroup | Self::PfcPriorityToQueue => 7,
        }
    }

    /// Inclusive upper bound of the mapped value for this type.
    pub fn value_bound(self) -> u8 {
        match self {
            Self::DscpToTc => 7,
            Self::TcToQueue | Self::TcToPriorityGroup | Self::PfcPriorityToQueue => 7,
        }
    }
}

/// Packs a map entry as it travels in a `U32List` attribute.
pub fn pack_entry(key: u8, value: u8) -> u32 {
    ((key as u32) << 8) | value as u32
}

/// Unpacks a `U32List` map entry.
pub fn unpack_entry(packed: u32) -> (u8, u8) {
    (((packed >> 8) & 0xff) as u8, (packed & 0xff) as u8)
}

/// A QoS map node.
#[derive(Debug, Clone)]
pub struct QosMapNode {
    pub map_type: QosMapType,
    pub entries: Vec<(u8, u8)>,
    pub ports: Vec<PortOid>,
}

impl QosMapNode {
    pub fn new(map_type: QosMapType) -> Self {
        Self {
            map_type,
            entries: Vec::new(),
            ports: Vec::new(),
        }
    }

    pub fn num_ref(&self) -> usize {
        self.ports.len()
    }

    /// Replaces the entry list from a packed attribute value.
    pub fn set_entries(&mut self, packed: &[u32], index: usize) -> SaiResult<()> {
        let mut entries = Vec::with_capacity(packed.len());
        for item in packed {
            let (key, value) = unpack_entry(*item);
            if key > self.map_type.key_bound() || value > self.map_type.value_bound() {
                return Err(SaiError::InvalidAttrValue {
                    index,
                    attr_id: QOS_MAP_ATTR_MAP_TO_VALUE_LIST,
                });
            }
            entries.push((key, value));
        }
        self.entries = entries;
        Ok(())
    }

    pub fn packed_entries(&self) -> Vec<u32> {
        self.entries
            .iter()
            .map(|(key, value)| pack_entry(*key, *value))
            .collect()
    }
}

pub(crate) fn create(ctx: &mut QosContext, attrs: &[Attribute]) -> SaiResult<QosMapOid> {
    validate_attributes(attrs, QOS_MAP_ATTR_TABLE, AttrOp::Create)?;

    let mut map_type = None;
    for (index, attr) in attrs.iter().enumerate() {
        if attr.id == QOS_MAP_ATTR_TYPE {
            let raw = attr.value.as_u32().ok_or(SaiError::InvalidAttrValue {
                index,
                attr_id: attr.id,
            })?;
            map_type = Some(QosMapType::from_u32(raw).ok_or(SaiError::InvalidAttrValue {
                index,
                attr_id: attr.id,
            })?);
        }
    }
    let map_type = map_type.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: QOS_MAP_ATTR_TYPE,
    })?;

    let mut node = QosMapNode::new(map_type);
    for (index, attr) in attrs.iter().enumerate() {
        if attr.id == QOS_MAP_ATTR_MAP_TO_VALUE_LIST {
            let packed = attr.value.as_u32_list().ok_or(SaiError::InvalidAttrValue {
                index,
                attr_id: attr.id,
            })?;
            node.set_entries(packed, index)?;
        }
    }

    let driver = ctx.driver();
    let raw = driver.qos_map().create(attrs)?;
    let id = QosMapOid::from_raw_unchecked(raw);
    if let Err(err) = ctx.qos_maps.insert(id, node) {
        if let Err(undo_err) = driver.qos_map().remove(raw) {
            warn!(map = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    debug!(map = %id, ?map_type, "qos map created");
    Ok(id)
}

pub(crate) fn remove(ctx: &mut QosContext, id: QosMapOid) -> SaiResult<()> {
    let node = ctx.qos_maps.get(id)?;
    if node.num_ref() > 0 {
        return Err(SaiError::object_in_use(format!(
            "qos map {} has {} consumers",
            id,
            node.num_ref()
        )));
    }
    ctx.driver().qos_map().remove(id.as_raw())?;
    ctx.qos_maps.remove(id)?;
    debug!(map = %id, "qos map removed");
    Ok(())
}

pub(crate) fn attr_set(ctx: &mut QosContext, id: QosMapOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(slice::from_ref(attr), QOS_MAP_ATTR_TABLE, AttrOp::Set)?;
    let node = ctx.qos_maps.get(id)?;
    let mut candidate = node.clone();
    let packed = attr.value.as_u32_list().ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;
    candidate.set_entries(packed, 0)?;

    ctx.driver().qos_map().attr_set(id.as_raw(), attr)?;
    *ctx.qos_maps.get_mut(id)? = candidate;
    Ok(())
}

pub(crate) fn attr_get(ctx: &QosContext, id: QosMapOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
    let node = ctx.qos_maps.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| match *attr_id {
            QOS_MAP_ATTR_TYPE => Ok(Attribute::u32(*attr_id, node.map_type.as_u32())),
            QOS_MAP_ATTR_MAP_TO_VALUE_LIST => Ok(Attribute::new(
                *attr_id,
                AttrValue::U32List(node.packed_entries()),
            )),
            _ => Err(SaiError::UnknownAttribute {
                index,
                attr_id: *attr_id,
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Public method table
// ---------------------------------------------------------------------------

impl QosSwitch {
    pub fn qos_map_create(&self, attrs: &[Attribute]) -> SaiResult<QosMapOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        create(&mut ctx, attrs)
    }

    pub fn qos_map_remove(&self, id: QosMapOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        remove(&mut ctx, id)
    }

    pub fn qos_map_attr_set(&self, id: QosMapOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        attr_set(&mut ctx, id, attr)
    }

    pub fn qos_map_attr_get(&self, id: QosMapOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        attr_get(&ctx, id, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let packed = pack_entry(63, 7);
        assert_eq!(unpack_entry(packed), (63, 7));
    }

    #[test]
    fn test_entry_bounds_per_type() {
        let mut node = QosMapNode::new(QosMapType::DscpToTc);
        node.set_entries(&[pack_entry(63, 7)], 0).unwrap();

        let err = node.set_entries(&[pack_entry(64, 0)], 1).unwrap_err();
        assert!(matches!(err, SaiError::InvalidAttrValue { index: 1, .. }));

        let mut tc_map = QosMapNode::new(QosMapType::TcToQueue);
        let err = tc_map.set_entries(&[pack_entry(8, 0)], 0).unwrap_err();
        assert!(matches!(err, SaiError::InvalidAttrValue { .. }));
    }

    #[test]
    fn test_entries_roundtrip() {
        let mut node = QosMapNode::new(QosMapType::TcToQueue);
        node.set_entries(&[pack_entry(0, 0), pack_entry(3, 4)], 0).unwrap();
        assert_eq!(node.entries, vec![(0, 0), (3, 4)]);
        assert_eq!(node.packed_entries(), vec![pack_entry(0, 0), pack_entry(3, 4)]);
    }
}

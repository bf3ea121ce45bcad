//! WRED profile registry.
//!
//! WRED profiles are shared congestion-management configurations attached
//! to queues and port pools. The registry keeps per-color threshold records
//! and back-link lists; a profile is removable only when unreferenced.

use std::slice;

use tracing::{debug, warn};

use sai_common::attr::{validate_attributes, AttrId, AttrOp, AttrValue, Attribute, VendorAttrEntry};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{PortPoolOid, QueueOid, WredOid};

use crate::context::{QosContext, QosSwitch};

pub const WRED_ATTR_GREEN_ENABLE: AttrId = 0;
pub const WRED_ATTR_GREEN_MIN_THRESHOLD: AttrId = 1;
pub const WRED_ATTR_GREEN_MAX_THRESHOLD: AttrId = 2;
pub const WRED_ATTR_GREEN_DROP_PROBABILITY: AttrId = 3;
pub const WRED_ATTR_YELLOW_ENABLE: AttrId = 4;
pub const WRED_ATTR_YELLOW_MIN_THRESHOLD: AttrId = 5;
pub const WRED_ATTR_YELLOW_MAX_THRESHOLD: AttrId = 6;
pub const WRED_ATTR_YELLOW_DROP_PROBABILITY: AttrId = 7;
pub const WRED_ATTR_RED_ENABLE: AttrId = 8;
pub const WRED_ATTR_RED_MIN_THRESHOLD: AttrId = 9;
pub const WRED_ATTR_RED_MAX_THRESHOLD: AttrId = 10;
pub const WRED_ATTR_RED_DROP_PROBABILITY: AttrId = 11;

/// Vendor attribute table for WRED profiles.
pub static WRED_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(WRED_ATTR_GREEN_ENABLE, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_GREEN_MIN_THRESHOLD, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_GREEN_MAX_THRESHOLD, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_GREEN_DROP_PROBABILITY, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_YELLOW_ENABLE, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_YELLOW_MIN_THRESHOLD, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_YELLOW_MAX_THRESHOLD, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_YELLOW_DROP_PROBABILITY, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_RED_ENABLE, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_RED_MIN_THRESHOLD, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_RED_MAX_THRESHOLD, true, true, true, false),
    VendorAttrEntry::new(WRED_ATTR_RED_DROP_PROBABILITY, true, true, true, false),
];

/// Per-color WRED parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WredColorParams {
    pub enabled: bool,
    pub min_threshold: u64,
    pub max_threshold: u64,
    pub drop_probability: u8,
}

impl Default for WredColorParams {
    fn default() -> Self {
        Self {
            enabled: false,
            min_threshold: 0,
            max_threshold: 0,
            drop_probability: 100,
        }
    }
}

/// A WRED profile node.
#[derive(Debug, Clone, Default)]
pub struct WredNode {
    pub green: WredColorParams,
    pub yellow: WredColorParams,
    pub red: WredColorParams,
    pub queues: Vec<QueueOid>,
    pub port_pools: Vec<PortPoolOid>,
}

impl WredNode {
    pub fn num_ref(&self) -> usize {
        self.queues.len() + self.port_pools.len()
    }

    fn color_mut(&mut self, id: AttrId) -> &mut WredColorParams {
        match id {
            WRED_ATTR_GREEN_ENABLE..=WRED_ATTR_GREEN_DROP_PROBABILITY => &mut self.green,
            WRED_ATTR_YELLOW_ENABLE..=WRED_ATTR_YELLOW_DROP_PROBABILITY => &mut self.yellow,
            _ => &mut self.red,
        }
    }

    fn color(&self, id: AttrId) -> &WredColorParams {
        match id {
            WRED_ATTR_GREEN_ENABLE..=WRED_ATTR_GREEN_DROP_PROBABILITY => &self.green,
            WRED_ATTR_YELLOW_ENABLE..=WRED_ATTR_YELLOW_DROP_PROBABILITY => &self.yellow,
            _ => &self.red,
        }
    }

    /// Applies one attribute in place.
    pub fn apply_attr(&mut self, attr: &Attribute, index: usize) -> SaiResult<()> {
        let bad_value = || SaiError::InvalidAttrValue {
            index,
            attr_id: attr.id,
        };
        if attr.id > WRED_ATTR_RED_DROP_PROBABILITY {
            return Err(SaiError::UnknownAttribute {
                index,
                attr_id: attr.id,
            });
        }
        let field = attr.id % 4;
        let color = self.color_mut(attr.id);
        match field {
            0 => color.enabled = attr.value.as_bool().ok_or_else(bad_value)?,
            1 => color.min_threshold = attr.value.as_u64().ok_or_else(bad_value)?,
            2 => color.max_threshold = attr.value.as_u64().ok_or_else(bad_value)?,
            _ => {
                let prob = attr.value.as_u8().ok_or_else(bad_value)?;
                if prob > 100 {
                    return Err(bad_value());
                }
                color.drop_probability = prob;
            }
        }
        Ok(())
    }

    /// Renders one attribute's current value.
    pub fn attr_value(&self, id: AttrId) -> Option<AttrValue> {
        if id > WRED_ATTR_RED_DROP_PROBABILITY {
            return None;
        }
        let color = self.color(id);
        Some(match id % 4 {
            0 => AttrValue::Bool(color.enabled),
            1 => AttrValue::U64(color.min_threshold),
            2 => AttrValue::U64(color.max_threshold),
            _ => AttrValue::U8(color.drop_probability),
        })
    }

    /// Checks per-color threshold ordering for every enabled color.
    pub fn check_thresholds(&self) -> SaiResult<()> {
        for (name, color) in [("green", &self.green), ("yellow", &self.yellow), ("red", &self.red)]
        {
            if color.enabled && color.min_threshold > color.max_threshold {
                return Err(SaiError::invalid_parameter(format!(
                    "wred {} min threshold {} above max {}",
                    name, color.min_threshold, color.max_threshold
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn create(ctx: &mut QosContext, attrs: &[Attribute]) -> SaiResult<WredOid> {
    validate_attributes(attrs, WRED_ATTR_TABLE, AttrOp::Create)?;
    let mut node = WredNode::default();
    for (index, attr) in attrs.iter().enumerate() {
        node.apply_attr(attr, index)?;
    }
    node.check_thresholds()?;

    let driver = ctx.driver();
    let raw = driver.wred().create(attrs)?;
    let id = WredOid::from_raw_unchecked(raw);
    if let Err(err) = ctx.wred_profiles.insert(id, node) {
        if let Err(undo_err) = driver.wred().remove(raw) {
            warn!(wred = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    debug!(wred = %id, "wred profile created");
    Ok(id)
}

pub(crate) fn remove(ctx: &mut QosContext, id: WredOid) -> SaiResult<()> {
    let node = ctx.wred_profiles.get(id)?;
    if node.num_ref() > 0 {
        return Err(SaiError::object_in_use(format!(
            "wred profile {} has {} consumers",
            id,
            node.num_ref()
        )));
    }
    ctx.driver().wred().remove(id.as_raw())?;
    ctx.wred_profiles.remove(id)?;
    debug!(wred = %id, "wred profile removed");
    Ok(())
}

pub(crate) fn attr_set(ctx: &mut QosContext, id: WredOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(slice::from_ref(attr), WRED_ATTR_TABLE, AttrOp::Set)?;
    let node = ctx.wred_profiles.get(id)?;
    let mut candidate = node.clone();
    candidate.apply_attr(attr, 0)?;
    candidate.check_thresholds().map_err(|_| SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;

    ctx.driver().wred().attr_set(id.as_raw(), attr)?;
    *ctx.wred_profiles.get_mut(id)? = candidate;
    Ok(())
}

pub(crate) fn attr_get(ctx: &QosContext, id: WredOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
    let node = ctx.wred_profiles.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| {
            node.attr_value(*attr_id)
                .map(|value| Attribute::new(*attr_id, value))
                .ok_or(SaiError::UnknownAttribute {
                    index,
                    attr_id: *attr_id,
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Public method table
// ---------------------------------------------------------------------------

impl QosSwitch {
    pub fn wred_create(&self, attrs: &[Attribute]) -> SaiResult<WredOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        create(&mut ctx, attrs)
    }

    pub fn wred_remove(&self, id: WredOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        remove(&mut ctx, id)
    }

    pub fn wred_attr_set(&self, id: WredOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        attr_set(&mut ctx, id, attr)
    }

    pub fn wred_attr_get(&self, id: WredOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        attr_get(&ctx, id, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_read_back() {
        let mut node = WredNode::default();
        node.apply_attr(&Attribute::bool(WRED_ATTR_GREEN_ENABLE, true), 0)
            .unwrap();
        node.apply_attr(&Attribute::u64(WRED_ATTR_GREEN_MIN_THRESHOLD, 1000), 1)
            .unwrap();
        node.apply_attr(&Attribute::u64(WRED_ATTR_GREEN_MAX_THRESHOLD, 2000), 2)
            .unwrap();

        assert!(node.green.enabled);
        assert_eq!(
            node.attr_value(WRED_ATTR_GREEN_MAX_THRESHOLD),
            Some(AttrValue::U64(2000))
        );
        node.check_thresholds().unwrap();
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut node = WredNode::default();
        node.yellow.enabled = true;
        node.yellow.min_threshold = 3000;
        node.yellow.max_threshold = 2000;
        assert!(node.check_thresholds().is_err());

        // Disabled colors are not checked.
        node.yellow.enabled = false;
        node.check_thresholds().unwrap();
    }

    #[test]
    fn test_equal_thresholds_allowed() {
        let mut node = WredNode::default();
        node.red.enabled = true;
        node.red.min_threshold = 1000;
        node.red.max_threshold = 1000;
        node.check_thresholds().unwrap();
    }

    #[test]
    fn test_drop_probability_range() {
        let mut node = WredNode::default();
        let err = node
            .apply_attr(&Attribute::u8(WRED_ATTR_RED_DROP_PROBABILITY, 101), 3)
            .unwrap_err();
        assert!(matches!(err, SaiError::InvalidAttrValue { index: 3, .. }));
        node.apply_attr(&Attribute::u8(WRED_ATTR_RED_DROP_PROBABILITY, 50), 3)
            .unwrap();
        assert_eq!(node.red.drop_probability, 50);
    }

    #[test]
    fn test_num_ref() {
        let mut node = WredNode::default();
        assert_eq!(node.num_ref(), 0);
        node.queues.push(QueueOid::from_raw(1).unwrap());
        node.port_pools.push(PortPoolOid::from_raw(2).unwrap());
        assert_eq!(node.num_ref(), 2);
    }
}

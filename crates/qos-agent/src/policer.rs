//! Policer registry.
//!
//! Policers are shared rate-limiting profiles referenced by ports. Only
//! the association bookkeeping lives here; metering behavior is the
//! driver's business.

use std::slice;

use tracing::{debug, warn};

use sai_common::attr::{validate_attributes, AttrId, AttrOp, AttrValue, Attribute, VendorAttrEntry};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{PolicerOid, PortOid};

use crate::context::{QosContext, QosSwitch};

pub const POLICER_ATTR_METER_TYPE: AttrId = 0;
pub const POLICER_ATTR_MODE: AttrId = 1;
pub const POLICER_ATTR_CIR: AttrId = 2;
pub const POLICER_ATTR_CBS: AttrId = 3;
pub const POLICER_ATTR_PIR: AttrId = 4;
pub const POLICER_ATTR_PBS: AttrId = 5;

/// Vendor attribute table for policers.
pub static POLICER_ATTR_TABLE: &[VendorAttrEntry] = &[
    VendorAttrEntry::new(POLICER_ATTR_METER_TYPE, true, false, true, true),
    VendorAttrEntry::new(POLICER_ATTR_MODE, true, false, true, true),
    VendorAttrEntry::new(POLICER_ATTR_CIR, true, true, true, false),
    VendorAttrEntry::new(POLICER_ATTR_CBS, true, true, true, false),
    VendorAttrEntry::new(POLICER_ATTR_PIR, true, true, true, false),
    VendorAttrEntry::new(POLICER_ATTR_PBS, true, true, true, false),
];

/// Meter accounting unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicerMeterType {
    Packets,
    #[default]
    Bytes,
}

impl PolicerMeterType {
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

/// Policing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicerMode {
    #[default]
    SrTcm,
    TrTcm,
    StormControl,
}

impl PolicerMode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::SrTcm),
            1 => Some(Self::TrTcm),
            2 => Some(Self::StormControl),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::SrTcm => 0,
            Self::TrTcm => 1,
            Self::StormControl => 2,
        }
    }
}

/// A policer node.
#[derive(Debug, Clone, Default)]
pub struct PolicerNode {
    pub meter_type: PolicerMeterType,
    pub mode: PolicerMode,
    pub cir: u64,
    pub cbs: u64,
    pub pir: u64,
    pub pbs: u64,
    pub ports: Vec<PortOid>,
}

impl PolicerNode {
    pub fn num_ref(&self) -> usize {
        self.ports.len()
    }

    pub fn apply_attr(&mut self, attr: &Attribute, index: usize) -> SaiResult<()> {
        let bad_value = || SaiError::InvalidAttrValue {
            index,
            attr_id: attr.id,
        };
        match attr.id {
            POLICER_ATTR_METER_TYPE => {
                let raw = attr.value.as_u32().ok_or_else(bad_value)?;
                self.meter_type = PolicerMeterType::from_u32(raw).ok_or_else(bad_value)?;
            }
            POLICER_ATTR_MODE => {
                let raw = attr.value.as_u32().ok_or_else(bad_value)?;
                self.mode = PolicerMode::from_u32(raw).ok_or_else(bad_value)?;
            }
            POLICER_ATTR_CIR => self.cir = attr.value.as_u64().ok_or_else(bad_value)?,
            POLICER_ATTR_CBS => self.cbs = attr.value.as_u64().ok_or_else(bad_value)?,
            POLICER_ATTR_PIR => self.pir = attr.value.as_u64().ok_or_else(bad_value)?,
            POLICER_ATTR_PBS => self.pbs = attr.value.as_u64().ok_or_else(bad_value)?,
            _ => {
                return Err(SaiError::UnknownAttribute {
                    index,
                    attr_id: attr.id,
                })
            }
        }
        Ok(())
    }

    pub fn attr_value(&self, id: AttrId) -> Option<AttrValue> {
        match id {
            POLICER_ATTR_METER_TYPE => Some(AttrValue::U32(self.meter_type.as_u32())),
            POLICER_ATTR_MODE => Some(AttrValue::U32(self.mode.as_u32())),
            POLICER_ATTR_CIR => Some(AttrValue::U64(self.cir)),
            POLICER_ATTR_CBS => Some(AttrValue::U64(self.cbs)),
            POLICER_ATTR_PIR => Some(AttrValue::U64(self.pir)),
            POLICER_ATTR_PBS => Some(AttrValue::U64(self.pbs)),
            _ => None,
        }
    }
}

pub(crate) fn create(ctx: &mut QosContext, attrs: &[Attribute]) -> SaiResult<PolicerOid> {
    validate_attributes(attrs, POLICER_ATTR_TABLE, AttrOp::Create)?;
    let mut node = PolicerNode::default();
    for (index, attr) in attrs.iter().enumerate() {
        node.apply_attr(attr, index)?;
    }

    let driver = ctx.driver();
    let raw = driver.policer().create(attrs)?;
    let id = PolicerOid::from_raw_unchecked(raw);
    if let Err(err) = ctx.policers.insert(id, node) {
        if let Err(undo_err) = driver.policer().remove(raw) {
            warn!(policer = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    debug!(policer = %id, "policer created");
    Ok(id)
}

pub(crate) fn remove(ctx: &mut QosContext, id: PolicerOid) -> SaiResult<()> {
    let node = ctx.policers.get(id)?;
    if node.num_ref() > 0 {
        return Err(SaiError::object_in_use(format!(
            "policer {} has {} consumers",
            id,
            node.num_ref()
        )));
    }
    ctx.driver().policer().remove(id.as_raw())?;
    ctx.policers.remove(id)?;
    debug!(policer = %id, "policer removed");
    Ok(())
}

pub(crate) fn attr_set(ctx: &mut QosContext, id: PolicerOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(slice::from_ref(attr), POLICER_ATTR_TABLE, AttrOp::Set)?;
    let node = ctx.policers.get(id)?;
    let mut candidate = node.clone();
    candidate.apply_attr(attr, 0)?;

    ctx.driver().policer().attr_set(id.as_raw(), attr)?;
    *ctx.policers.get_mut(id)? = candidate;
    Ok(())
}

pub(crate) fn attr_get(ctx: &QosContext, id: PolicerOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
    let node = ctx.policers.get(id)?;
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
    pub fn policer_create(&self, attrs: &[Attribute]) -> SaiResult<PolicerOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        create(&mut ctx, attrs)
    }

    pub fn policer_remove(&self, id: PolicerOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        remove(&mut ctx, id)
    }

    pub fn policer_attr_set(&self, id: PolicerOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        attr_set(&mut ctx, id, attr)
    }

    pub fn policer_attr_get(&self, id: PolicerOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        attr_get(&ctx, id, ids)
    }
}

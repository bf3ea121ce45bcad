//! Attribute model and table-driven attribute validation.
//!
//! Every object kind publishes a static vendor attribute table describing
//! which attribute ids exist and on which operations (create/set/get) each
//! is legal. [`validate_attributes`] checks an incoming attribute list
//! against that table before any state is touched, returning
//! attribute-indexed errors so callers can point at the offending position.

use crate::error::{SaiError, SaiResult};
use crate::types::RawObjectId;

/// Attribute id within an object kind's attribute namespace.
pub type AttrId = u32;

/// Attribute value union.
///
/// Mirrors the wire-level `sai_attribute_value_t` but only carries the
/// variants the QoS object model uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Bool(bool),
    U8(u8),
    I8(i8),
    U32(u32),
    U64(u64),
    Oid(RawObjectId),
    OidList(Vec<RawObjectId>),
    U32List(Vec<u32>),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            AttrValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<i8> {
        match self {
            AttrValue::I8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AttrValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_oid(&self) -> Option<RawObjectId> {
        match self {
            AttrValue::Oid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_oid_list(&self) -> Option<&[RawObjectId]> {
        match self {
            AttrValue::OidList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32_list(&self) -> Option<&[u32]> {
        match self {
            AttrValue::U32List(v) => Some(v),
            _ => None,
        }
    }
}

/// A single attribute: id plus value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: AttrId,
    pub value: AttrValue,
}

impl Attribute {
    pub fn new(id: AttrId, value: AttrValue) -> Self {
        Self { id, value }
    }

    pub fn bool(id: AttrId, v: bool) -> Self {
        Self::new(id, AttrValue::Bool(v))
    }

    pub fn u8(id: AttrId, v: u8) -> Self {
        Self::new(id, AttrValue::U8(v))
    }

    pub fn i8(id: AttrId, v: i8) -> Self {
        Self::new(id, AttrValue::I8(v))
    }

    pub fn u32(id: AttrId, v: u32) -> Self {
        Self::new(id, AttrValue::U32(v))
    }

    pub fn u64(id: AttrId, v: u64) -> Self {
        Self::new(id, AttrValue::U64(v))
    }

    pub fn oid(id: AttrId, v: RawObjectId) -> Self {
        Self::new(id, AttrValue::Oid(v))
    }
}

/// Operation an attribute list is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOp {
    Create,
    Set,
    Get,
}

/// One row of a vendor attribute table.
#[derive(Debug, Clone, Copy)]
pub struct VendorAttrEntry {
    pub id: AttrId,
    pub create: bool,
    pub set: bool,
    pub get: bool,
    pub mandatory: bool,
}

impl VendorAttrEntry {
    /// Const constructor so tables can be `static`.
    pub const fn new(id: AttrId, create: bool, set: bool, get: bool, mandatory: bool) -> Self {
        Self {
            id,
            create,
            set,
            get,
            mandatory,
        }
    }

    fn allows(&self, op: AttrOp) -> bool {
        match op {
            AttrOp::Create => self.create,
            AttrOp::Set => self.set,
            AttrOp::Get => self.get,
        }
    }
}

/// Validates an attribute list against a vendor attribute table.
///
/// Checks, in order:
/// 1. every attribute id is present in the table (`UnknownAttribute`),
/// 2. every attribute is legal for `op` (`InvalidAttribute`),
/// 3. no attribute id appears twice (`InvalidAttribute` on the repeat),
/// 4. for `Create`, every mandatory attribute is supplied
///    (`MandatoryAttributeMissing`).
///
/// Errors carry the index of the offending attribute within `attrs`.
pub fn validate_attributes(
    attrs: &[Attribute],
    table: &[VendorAttrEntry],
    op: AttrOp,
) -> SaiResult<()> {
    for (index, attr) in attrs.iter().enumerate() {
        let entry = table.iter().find(|e| e.id == attr.id).ok_or(
            SaiError::UnknownAttribute {
                index,
                attr_id: attr.id,
            },
        )?;

        if !entry.allows(op) {
            return Err(SaiError::InvalidAttribute {
                index,
                attr_id: attr.id,
            });
        }

        if attrs[..index].iter().any(|prev| prev.id == attr.id) {
            return Err(SaiError::InvalidAttribute {
                index,
                attr_id: attr.id,
            });
        }
    }

    if op == AttrOp::Create {
        for entry in table.iter().filter(|e| e.mandatory) {
            if !attrs.iter().any(|a| a.id == entry.id) {
                return Err(SaiError::MandatoryAttributeMissing { attr_id: entry.id });
            }
        }
    }

    Ok(())
}

/// Returns the attribute with the given id from a list, if present.
pub fn find_attr(attrs: &[Attribute], id: AttrId) -> Option<&Attribute> {
    attrs.iter().find(|a| a.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[VendorAttrEntry] = &[
        VendorAttrEntry::new(0, true, false, true, true),
        VendorAttrEntry::new(1, true, true, true, false),
        VendorAttrEntry::new(2, false, true, true, false),
    ];

    #[test]
    fn test_valid_create() {
        let attrs = [Attribute::u32(0, 5), Attribute::u64(1, 100)];
        assert!(validate_attributes(&attrs, TABLE, AttrOp::Create).is_ok());
    }

    #[test]
    fn test_unknown_attribute_indexed() {
        let attrs = [Attribute::u32(0, 5), Attribute::u32(9, 1)];
        let err = validate_attributes(&attrs, TABLE, AttrOp::Create).unwrap_err();
        assert!(matches!(
            err,
            SaiError::UnknownAttribute { index: 1, attr_id: 9 }
        ));
    }

    #[test]
    fn test_create_only_attr_rejected_on_set() {
        let attrs = [Attribute::u32(0, 5)];
        let err = validate_attributes(&attrs, TABLE, AttrOp::Set).unwrap_err();
        assert!(matches!(
            err,
            SaiError::InvalidAttribute { index: 0, attr_id: 0 }
        ));
    }

    #[test]
    fn test_mandatory_missing() {
        let attrs = [Attribute::u64(1, 100)];
        let err = validate_attributes(&attrs, TABLE, AttrOp::Create).unwrap_err();
        assert!(matches!(
            err,
            SaiError::MandatoryAttributeMissing { attr_id: 0 }
        ));
    }

    #[test]
    fn test_duplicate_attr_rejected() {
        let attrs = [
            Attribute::u32(0, 5),
            Attribute::u64(1, 100),
            Attribute::u64(1, 200),
        ];
        let err = validate_attributes(&attrs, TABLE, AttrOp::Create).unwrap_err();
        assert!(matches!(
            err,
            SaiError::InvalidAttribute { index: 2, attr_id: 1 }
        ));
    }

    #[test]
    fn test_get_allows_set_only_attr() {
        let attrs = [Attribute::u32(2, 0)];
        assert!(validate_attributes(&attrs, TABLE, AttrOp::Get).is_ok());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(AttrValue::U64(7).as_u64(), Some(7));
        assert_eq!(AttrValue::U64(7).as_u32(), None);
        assert_eq!(AttrValue::Oid(0x10).as_oid(), Some(0x10));
        let list = AttrValue::OidList(vec![1, 2]);
        assert_eq!(list.as_oid_list(), Some(&[1u64, 2u64][..]));
    }
}

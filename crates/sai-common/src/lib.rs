//! Vendor-neutral QoS configuration boundary.
//!
//! This crate defines everything that crosses between the QoS control plane
//! and a vendor driver backend:
//!
//! - [`error`]: status codes and the [`SaiError`]/[`SaiResult`] types
//! - [`types`]: phantom-typed object ids ([`ObjectId`]) and kind markers
//! - [`attr`]: the attribute model and the table-driven validator
//! - [`driver`]: per-object-kind driver traits aggregated by
//!   [`SwitchDriver`]
//!
//! The control plane lives in `qos-agent`; a software backend suitable for
//! tests lives in `sai-vs`.

pub mod attr;
pub mod driver;
pub mod error;
pub mod types;

pub use attr::{find_attr, validate_attributes, AttrId, AttrOp, AttrValue, Attribute, VendorAttrEntry};
pub use driver::{
    BatchError, BufferPoolDriver, BufferProfileDriver, PolicerDriver, PortDriver, PortPoolDriver,
    PriorityGroupDriver, QosMapDriver, QueueDriver, SchedulerDriver, SchedulerGroupDriver, StatId,
    SwitchDriver, WredDriver,
};
pub use error::{SaiError, SaiResult, Status};
pub use types::{
    BufferPoolOid, BufferProfileOid, ObjectId, ObjectKind, PolicerOid, PortOid, PortPoolOid,
    PriorityGroupOid, QosMapOid, QueueOid, RawObjectId, SchedGroupOid, SchedulerOid, SwitchOid,
    WredOid,
};

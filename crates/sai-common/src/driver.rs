//! Driver facade traits.
//!
//! The hardware driver is a set of per-object-kind interfaces; the control
//! plane holds one [`SwitchDriver`] trait object and never knows which
//! vendor backend is behind it. Backends are selected at startup by handing
//! the control plane an `Arc<dyn SwitchDriver>`.
//!
//! # Contract
//!
//! - Stateless with respect to the control plane's cache: the driver never
//!   reads it and never retries on its own.
//! - `create` returns the hardware-assigned object id.
//! - Batch child operations may apply a *prefix* of the batch before
//!   failing; the [`BatchError`] carries how many children were applied so
//!   the caller can issue a compensating reverse operation for exactly that
//!   prefix.
//! - A blocking driver call is on the caller's critical path; there is no
//!   cancellation.

use thiserror::Error;

use crate::attr::{AttrId, Attribute};
use crate::error::{SaiError, SaiResult};
use crate::types::RawObjectId;

/// Statistics counter id within an object kind's counter namespace.
pub type StatId = u32;

/// Partial-success result of a batch child operation.
///
/// `applied` children were committed to hardware before `error` occurred;
/// the remainder of the batch was not attempted.
#[derive(Debug, Clone, Error)]
#[error("batch stopped after {applied} applied children: {error}")]
pub struct BatchError {
    pub applied: usize,
    #[source]
    pub error: SaiError,
}

macro_rules! define_object_driver {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub trait $name: Send + Sync {
            /// Creates an object from an attribute list, returning the
            /// hardware-assigned id.
            fn create(&self, attrs: &[Attribute]) -> SaiResult<RawObjectId>;

            /// Removes an object.
            fn remove(&self, id: RawObjectId) -> SaiResult<()>;

            /// Applies a single attribute to an existing object.
            fn attr_set(&self, id: RawObjectId, attr: &Attribute) -> SaiResult<()>;

            /// Reads the requested attributes of an existing object.
            fn attr_get(&self, id: RawObjectId, ids: &[AttrId]) -> SaiResult<Vec<Attribute>>;

            /// Reads statistics counters.
            fn stats_get(&self, id: RawObjectId, counters: &[StatId]) -> SaiResult<Vec<u64>>;

            /// Clears statistics counters.
            fn stats_clear(&self, id: RawObjectId, counters: &[StatId]) -> SaiResult<()>;
        }
    };
}

define_object_driver!(
    /// Driver interface for port objects.
    PortDriver
);
define_object_driver!(
    /// Driver interface for queue objects.
    QueueDriver
);
define_object_driver!(
    /// Driver interface for scheduler profile objects.
    SchedulerDriver
);
define_object_driver!(
    /// Driver interface for buffer pool objects.
    BufferPoolDriver
);
define_object_driver!(
    /// Driver interface for buffer profile objects.
    BufferProfileDriver
);
define_object_driver!(
    /// Driver interface for per-port pool objects.
    PortPoolDriver
);
define_object_driver!(
    /// Driver interface for ingress priority group objects.
    PriorityGroupDriver
);
define_object_driver!(
    /// Driver interface for WRED profile objects.
    WredDriver
);
define_object_driver!(
    /// Driver interface for policer objects.
    PolicerDriver
);
define_object_driver!(
    /// Driver interface for QoS map objects.
    QosMapDriver
);

/// Driver interface for scheduler group objects.
///
/// Extends the common object operations with the batch child-list
/// operations used by the hierarchy builder.
pub trait SchedulerGroupDriver: Send + Sync {
    fn create(&self, attrs: &[Attribute]) -> SaiResult<RawObjectId>;

    fn remove(&self, id: RawObjectId) -> SaiResult<()>;

    fn attr_set(&self, id: RawObjectId, attr: &Attribute) -> SaiResult<()>;

    fn attr_get(&self, id: RawObjectId, ids: &[AttrId]) -> SaiResult<Vec<Attribute>>;

    fn stats_get(&self, id: RawObjectId, counters: &[StatId]) -> SaiResult<Vec<u64>>;

    fn stats_clear(&self, id: RawObjectId, counters: &[StatId]) -> SaiResult<()>;

    /// Attaches `children` (queues or groups) under `group`, in order.
    ///
    /// On failure the returned [`BatchError::applied`] is the length of the
    /// committed prefix.
    fn add_child_list(
        &self,
        group: RawObjectId,
        children: &[RawObjectId],
    ) -> Result<(), BatchError>;

    /// Detaches `children` from `group`, in order.
    ///
    /// Same prefix semantics as [`Self::add_child_list`].
    fn remove_child_list(
        &self,
        group: RawObjectId,
        children: &[RawObjectId],
    ) -> Result<(), BatchError>;
}

/// Aggregate driver handle: one accessor per object kind.
///
/// This is the vendor boundary. The control plane stores a single
/// `Arc<dyn SwitchDriver>` in its context and dispatches through these
/// accessors for every hardware mutation.
pub trait SwitchDriver: Send + Sync {
    fn port(&self) -> &dyn PortDriver;
    fn queue(&self) -> &dyn QueueDriver;
    fn sched_group(&self) -> &dyn SchedulerGroupDriver;
    fn scheduler(&self) -> &dyn SchedulerDriver;
    fn buffer_pool(&self) -> &dyn BufferPoolDriver;
    fn buffer_profile(&self) -> &dyn BufferProfileDriver;
    fn port_pool(&self) -> &dyn PortPoolDriver;
    fn priority_group(&self) -> &dyn PriorityGroupDriver;
    fn wred(&self) -> &dyn WredDriver;
    fn policer(&self) -> &dyn PolicerDriver;
    fn qos_map(&self) -> &dyn QosMapDriver;
}

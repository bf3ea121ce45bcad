//! Type-safe object id wrappers.
//!
//! Object ids of different kinds cannot be mixed at compile time: a
//! `QueueOid` is never accepted where a `SchedulerOid` is expected. The raw
//! `u64` representation crosses the driver boundary; everything above it
//! uses the typed wrappers.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw object id type (matches `sai_object_id_t`).
pub type RawObjectId = u64;

/// Marker trait for object kinds.
pub trait ObjectKind: Send + Sync + 'static {
    /// Returns the object kind name for diagnostics.
    fn kind_name() -> &'static str;
}

/// A type-safe object id.
///
/// The phantom parameter `K` pins the object kind. Ids are plain values;
/// ownership of the object itself lives in the object cache.
pub struct ObjectId<K: ObjectKind> {
    raw: RawObjectId,
    _marker: PhantomData<K>,
}

impl<K: ObjectKind> Clone for ObjectId<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ObjectKind> Copy for ObjectId<K> {}

impl<K: ObjectKind> ObjectId<K> {
    /// The null object id (`SAI_NULL_OBJECT_ID`).
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Creates an object id from a raw value; `None` for the null id.
    pub fn from_raw(raw: RawObjectId) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Creates an object id from a raw value, null allowed.
    pub const fn from_raw_unchecked(raw: RawObjectId) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns the raw id value.
    pub const fn as_raw(&self) -> RawObjectId {
        self.raw
    }

    /// Returns true if this is the null id.
    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }
}

impl<K: ObjectKind> fmt::Debug for ObjectId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:x})", K::kind_name(), self.raw)
    }
}

impl<K: ObjectKind> fmt::Display for ObjectId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.raw)
    }
}

impl<K: ObjectKind> PartialEq for ObjectId<K> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<K: ObjectKind> Eq for ObjectId<K> {}

impl<K: ObjectKind> PartialOrd for ObjectId<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: ObjectKind> Ord for ObjectId<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<K: ObjectKind> Hash for ObjectId<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<K: ObjectKind> Default for ObjectId<K> {
    fn default() -> Self {
        Self::NULL
    }
}

macro_rules! define_object_kind {
    ($name:ident, $kind_name:literal, $oid_alias:ident) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl ObjectKind for $name {
            fn kind_name() -> &'static str {
                $kind_name
            }
        }

        pub type $oid_alias = ObjectId<$name>;
    };
}

define_object_kind!(SwitchKind, "Switch", SwitchOid);
define_object_kind!(PortKind, "Port", PortOid);
define_object_kind!(QueueKind, "Queue", QueueOid);
define_object_kind!(SchedGroupKind, "SchedulerGroup", SchedGroupOid);
define_object_kind!(SchedulerKind, "Scheduler", SchedulerOid);
define_object_kind!(BufferPoolKind, "BufferPool", BufferPoolOid);
define_object_kind!(BufferProfileKind, "BufferProfile", BufferProfileOid);
define_object_kind!(PortPoolKind, "PortPool", PortPoolOid);
define_object_kind!(PriorityGroupKind, "PriorityGroup", PriorityGroupOid);
define_object_kind!(WredKind, "Wred", WredOid);
define_object_kind!(PolicerKind, "Policer", PolicerOid);
define_object_kind!(QosMapKind, "QosMap", QosMapOid);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_creation() {
        let queue = QueueOid::from_raw(0x15_0000_0001).unwrap();
        assert_eq!(queue.as_raw(), 0x15_0000_0001);
        assert!(!queue.is_null());
    }

    #[test]
    fn test_null_oid() {
        assert!(QueueOid::from_raw(0).is_none());
        assert!(QueueOid::NULL.is_null());
        assert_eq!(QueueOid::default(), QueueOid::NULL);
    }

    #[test]
    fn test_oid_debug_names_kind() {
        let group = SchedGroupOid::from_raw(0x30).unwrap();
        let debug = format!("{:?}", group);
        assert!(debug.contains("SchedulerGroup"));
        assert!(debug.contains("0x30"));
    }

    #[test]
    fn test_oid_ordering() {
        let a = BufferPoolOid::from_raw(1).unwrap();
        let b = BufferPoolOid::from_raw(2).unwrap();
        assert!(a < b);
        assert_eq!(a, BufferPoolOid::from_raw(1).unwrap());
    }
}

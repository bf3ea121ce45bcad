//! In-memory object store for the virtual switch.

use std::collections::BTreeMap;

use sai_common::attr::{AttrId, AttrValue, Attribute};
use sai_common::driver::StatId;
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::RawObjectId;

/// Object kinds the virtual switch can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VsObjectKind {
    Port,
    Queue,
    SchedGroup,
    Scheduler,
    BufferPool,
    BufferProfile,
    PortPool,
    PriorityGroup,
    Wred,
    Policer,
    QosMap,
}

impl VsObjectKind {
    /// Kind code placed in the high bits of allocated object ids, so ids
    /// stay recognizable in logs (0x15_xxxx is always a queue, etc.).
    fn code(self) -> u64 {
        match self {
            VsObjectKind::Port => 0x01,
            VsObjectKind::Queue => 0x15,
            VsObjectKind::SchedGroup => 0x16,
            VsObjectKind::Scheduler => 0x17,
            VsObjectKind::BufferPool => 0x18,
            VsObjectKind::BufferProfile => 0x19,
            VsObjectKind::PortPool => 0x1a,
            VsObjectKind::PriorityGroup => 0x1b,
            VsObjectKind::Wred => 0x1c,
            VsObjectKind::Policer => 0x1d,
            VsObjectKind::QosMap => 0x1e,
        }
    }
}

/// A stored object: its kind, attributes, children and counters.
#[derive(Debug, Clone, Default)]
pub struct VsObject {
    pub attrs: BTreeMap<AttrId, AttrValue>,
    pub children: Vec<RawObjectId>,
    pub stats: BTreeMap<StatId, u64>,
}

/// The virtual switch's object table.
#[derive(Debug, Default)]
pub struct VsStore {
    objects: BTreeMap<RawObjectId, (VsObjectKind, VsObject)>,
    next_index: u64,
}

impl VsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id and stores a new object built from `attrs`.
    pub fn create(&mut self, kind: VsObjectKind, attrs: &[Attribute]) -> RawObjectId {
        self.next_index += 1;
        let id = (kind.code() << 48) | self.next_index;
        let mut object = VsObject::default();
        for attr in attrs {
            object.attrs.insert(attr.id, attr.value.clone());
        }
        self.objects.insert(id, (kind, object));
        id
    }

    pub fn remove(&mut self, kind: VsObjectKind, id: RawObjectId) -> SaiResult<()> {
        self.get(kind, id)?;
        self.objects.remove(&id);
        Ok(())
    }

    pub fn get(&self, kind: VsObjectKind, id: RawObjectId) -> SaiResult<&VsObject> {
        match self.objects.get(&id) {
            Some((k, object)) if *k == kind => Ok(object),
            Some((k, _)) => Err(SaiError::invalid_object_type(format!(
                "0x{:x} is {:?}, expected {:?}",
                id, k, kind
            ))),
            None => Err(SaiError::not_found(format!("0x{:x}", id))),
        }
    }

    pub fn get_mut(&mut self, kind: VsObjectKind, id: RawObjectId) -> SaiResult<&mut VsObject> {
        match self.objects.get_mut(&id) {
            Some((k, object)) if *k == kind => Ok(object),
            Some((k, _)) => Err(SaiError::invalid_object_type(format!(
                "0x{:x} is {:?}, expected {:?}",
                id, k, kind
            ))),
            None => Err(SaiError::not_found(format!("0x{:x}", id))),
        }
    }

    /// Returns true if `id` exists with any kind.
    pub fn contains(&self, id: RawObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

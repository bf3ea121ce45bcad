//! The virtual-switch driver backend.

use std::sync::{Mutex, MutexGuard};

use sai_common::attr::{AttrId, Attribute};
use sai_common::driver::{
    BatchError, BufferPoolDriver, BufferProfileDriver, PolicerDriver, PortDriver, PortPoolDriver,
    PriorityGroupDriver, QosMapDriver, QueueDriver, SchedulerDriver, SchedulerGroupDriver, StatId,
    SwitchDriver, WredDriver,
};
use sai_common::error::{SaiError, SaiResult, Status};
use sai_common::types::RawObjectId;
use tracing::debug;

use crate::fault::FaultInjector;
use crate::store::{VsObjectKind, VsStore};

#[derive(Debug, Default)]
struct VsState {
    store: VsStore,
    faults: FaultInjector,
}

/// Software implementation of every driver trait.
///
/// Objects live in an in-memory table; ids are allocated with a kind code
/// in the high bits. Fault injection makes compensation paths testable:
/// arm a one-shot failure with [`fail_after`](VsDriver::fail_after) or cap
/// batch application with [`batch_limit`](VsDriver::batch_limit).
#[derive(Debug, Default)]
pub struct VsDriver {
    state: Mutex<VsState>,
}

impl VsDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, VsState> {
        self.state.lock().expect("vs driver state lock poisoned")
    }

    /// Arms a one-shot failure after `n` successful driver calls.
    pub fn fail_after(&self, n: u32, status: Status) {
        self.state().faults.fail_after(n, status);
    }

    /// Caps batch child operations to `k` applied children.
    pub fn batch_limit(&self, k: usize, status: Status) {
        self.state().faults.batch_limit(k, status);
    }

    /// Clears all armed faults.
    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Total driver calls observed since construction.
    pub fn call_count(&self) -> u64 {
        self.state().faults.calls()
    }

    /// Number of live objects in the store.
    pub fn object_count(&self) -> usize {
        self.state().store.len()
    }

    /// Returns true if `id` exists in the store (any kind).
    pub fn contains(&self, id: RawObjectId) -> bool {
        self.state().store.contains(id)
    }

    fn do_create(&self, kind: VsObjectKind, attrs: &[Attribute]) -> SaiResult<RawObjectId> {
        let mut state = self.state();
        state.faults.tick()?;
        let id = state.store.create(kind, attrs);
        debug!(kind = ?kind, id = format_args!("0x{:x}", id), "vs: created object");
        Ok(id)
    }

    fn do_remove(&self, kind: VsObjectKind, id: RawObjectId) -> SaiResult<()> {
        let mut state = self.state();
        state.faults.tick()?;
        state.store.remove(kind, id)
    }

    fn do_attr_set(&self, kind: VsObjectKind, id: RawObjectId, attr: &Attribute) -> SaiResult<()> {
        let mut state = self.state();
        state.faults.tick()?;
        let object = state.store.get_mut(kind, id)?;
        object.attrs.insert(attr.id, attr.value.clone());
        Ok(())
    }

    fn do_attr_get(
        &self,
        kind: VsObjectKind,
        id: RawObjectId,
        ids: &[AttrId],
    ) -> SaiResult<Vec<Attribute>> {
        let mut state = self.state();
        state.faults.tick()?;
        let object = state.store.get(kind, id)?;
        ids.iter()
            .map(|attr_id| {
                object
                    .attrs
                    .get(attr_id)
                    .map(|value| Attribute::new(*attr_id, value.clone()))
                    .ok_or_else(|| {
                        SaiError::invalid_parameter(format!(
                            "attribute {} not set on 0x{:x}",
                            attr_id, id
                        ))
                    })
            })
            .collect()
    }

    fn do_stats_get(
        &self,
        kind: VsObjectKind,
        id: RawObjectId,
        counters: &[StatId],
    ) -> SaiResult<Vec<u64>> {
        let mut state = self.state();
        state.faults.tick()?;
        let object = state.store.get(kind, id)?;
        Ok(counters
            .iter()
            .map(|c| object.stats.get(c).copied().unwrap_or(0))
            .collect())
    }

    fn do_stats_clear(
        &self,
        kind: VsObjectKind,
        id: RawObjectId,
        counters: &[StatId],
    ) -> SaiResult<()> {
        let mut state = self.state();
        state.faults.tick()?;
        let object = state.store.get_mut(kind, id)?;
        for c in counters {
            object.stats.insert(*c, 0);
        }
        Ok(())
    }
}

macro_rules! impl_object_driver {
    ($trait_name:ident, $kind:expr) => {
        impl $trait_name for VsDriver {
            fn create(&self, attrs: &[Attribute]) -> SaiResult<RawObjectId> {
                self.do_create($kind, attrs)
            }

            fn remove(&self, id: RawObjectId) -> SaiResult<()> {
                self.do_remove($kind, id)
            }

            fn attr_set(&self, id: RawObjectId, attr: &Attribute) -> SaiResult<()> {
                self.do_attr_set($kind, id, attr)
            }

            fn attr_get(&self, id: RawObjectId, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
                self.do_attr_get($kind, id, ids)
            }

            fn stats_get(&self, id: RawObjectId, counters: &[StatId]) -> SaiResult<Vec<u64>> {
                self.do_stats_get($kind, id, counters)
            }

            fn stats_clear(&self, id: RawObjectId, counters: &[StatId]) -> SaiResult<()> {
                self.do_stats_clear($kind, id, counters)
            }
        }
    };
}

impl_object_driver!(PortDriver, VsObjectKind::Port);
impl_object_driver!(QueueDriver, VsObjectKind::Queue);
impl_object_driver!(SchedulerDriver, VsObjectKind::Scheduler);
impl_object_driver!(BufferPoolDriver, VsObjectKind::BufferPool);
impl_object_driver!(BufferProfileDriver, VsObjectKind::BufferProfile);
impl_object_driver!(PortPoolDriver, VsObjectKind::PortPool);
impl_object_driver!(PriorityGroupDriver, VsObjectKind::PriorityGroup);
impl_object_driver!(WredDriver, VsObjectKind::Wred);
impl_object_driver!(PolicerDriver, VsObjectKind::Policer);
impl_object_driver!(QosMapDriver, VsObjectKind::QosMap);

impl SchedulerGroupDriver for VsDriver {
    fn create(&self, attrs: &[Attribute]) -> SaiResult<RawObjectId> {
        self.do_create(VsObjectKind::SchedGroup, attrs)
    }

    fn remove(&self, id: RawObjectId) -> SaiResult<()> {
        self.do_remove(VsObjectKind::SchedGroup, id)
    }

    fn attr_set(&self, id: RawObjectId, attr: &Attribute) -> SaiResult<()> {
        self.do_attr_set(VsObjectKind::SchedGroup, id, attr)
    }

    fn attr_get(&self, id: RawObjectId, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        self.do_attr_get(VsObjectKind::SchedGroup, id, ids)
    }

    fn stats_get(&self, id: RawObjectId, counters: &[StatId]) -> SaiResult<Vec<u64>> {
        self.do_stats_get(VsObjectKind::SchedGroup, id, counters)
    }

    fn stats_clear(&self, id: RawObjectId, counters: &[StatId]) -> SaiResult<()> {
        self.do_stats_clear(VsObjectKind::SchedGroup, id, counters)
    }

    fn add_child_list(
        &self,
        group: RawObjectId,
        children: &[RawObjectId],
    ) -> Result<(), BatchError> {
        let mut state = self.state();
        if let Err(error) = state.faults.tick() {
            return Err(BatchError { applied: 0, error });
        }
        if let Err(error) = state.store.get(VsObjectKind::SchedGroup, group) {
            return Err(BatchError { applied: 0, error });
        }

        let cap = state.faults.batch_cap();
        for (index, child) in children.iter().enumerate() {
            if let Some((limit, status)) = cap {
                if index >= limit {
                    return Err(BatchError {
                        applied: index,
                        error: SaiError::Status { status },
                    });
                }
            }
            if !state.store.contains(*child) {
                return Err(BatchError {
                    applied: index,
                    error: SaiError::not_found(format!("child 0x{:x}", child)),
                });
            }
            // Parent existence was checked above; unwrap-free re-borrow.
            if let Ok(parent) = state.store.get_mut(VsObjectKind::SchedGroup, group) {
                parent.children.push(*child);
            }
        }
        Ok(())
    }

    fn remove_child_list(
        &self,
        group: RawObjectId,
        children: &[RawObjectId],
    ) -> Result<(), BatchError> {
        let mut state = self.state();
        if let Err(error) = state.faults.tick() {
            return Err(BatchError { applied: 0, error });
        }

        let cap = state.faults.batch_cap();
        for (index, child) in children.iter().enumerate() {
            if let Some((limit, status)) = cap {
                if index >= limit {
                    return Err(BatchError {
                        applied: index,
                        error: SaiError::Status { status },
                    });
                }
            }
            let parent = match state.store.get_mut(VsObjectKind::SchedGroup, group) {
                Ok(parent) => parent,
                Err(error) => return Err(BatchError { applied: index, error }),
            };
            match parent.children.iter().position(|c| c == child) {
                Some(pos) => {
                    parent.children.remove(pos);
                }
                None => {
                    return Err(BatchError {
                        applied: index,
                        error: SaiError::not_found(format!(
                            "child 0x{:x} not under group 0x{:x}",
                            child, group
                        )),
                    });
                }
            }
        }
        Ok(())
    }
}

impl SwitchDriver for VsDriver {
    fn port(&self) -> &dyn PortDriver {
        self
    }

    fn queue(&self) -> &dyn QueueDriver {
        self
    }

    fn sched_group(&self) -> &dyn SchedulerGroupDriver {
        self
    }

    fn scheduler(&self) -> &dyn SchedulerDriver {
        self
    }

    fn buffer_pool(&self) -> &dyn BufferPoolDriver {
        self
    }

    fn buffer_profile(&self) -> &dyn BufferProfileDriver {
        self
    }

    fn port_pool(&self) -> &dyn PortPoolDriver {
        self
    }

    fn priority_group(&self) -> &dyn PriorityGroupDriver {
        self
    }

    fn wred(&self) -> &dyn WredDriver {
        self
    }

    fn policer(&self) -> &dyn PolicerDriver {
        self
    }

    fn qos_map(&self) -> &dyn QosMapDriver {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remove_queue() {
        let driver = VsDriver::new();
        let id = QueueDriver::create(&driver, &[Attribute::u32(1, 4)]).unwrap();
        assert!(driver.contains(id));
        QueueDriver::remove(&driver, id).unwrap();
        assert!(!driver.contains(id));
    }

    #[test]
    fn test_fail_after_injects_on_nth_call() {
        let driver = VsDriver::new();
        driver.fail_after(1, Status::InsufficientResources);
        QueueDriver::create(&driver, &[]).unwrap();
        let err = QueueDriver::create(&driver, &[]).unwrap_err();
        assert!(matches!(
            err,
            SaiError::Status {
                status: Status::InsufficientResources
            }
        ));
        // One-shot: the next call succeeds again.
        QueueDriver::create(&driver, &[]).unwrap();
    }

    #[test]
    fn test_batch_applies_prefix() {
        let driver = VsDriver::new();
        let group = SchedulerGroupDriver::create(&driver, &[]).unwrap();
        let q1 = QueueDriver::create(&driver, &[]).unwrap();
        let q2 = QueueDriver::create(&driver, &[]).unwrap();
        let q3 = QueueDriver::create(&driver, &[]).unwrap();

        driver.batch_limit(2, Status::TableFull);
        let err = driver.add_child_list(group, &[q1, q2, q3]).unwrap_err();
        assert_eq!(err.applied, 2);

        driver.clear_faults();
        let object_children = {
            let state = driver.state();
            state
                .store
                .get(VsObjectKind::SchedGroup, group)
                .unwrap()
                .children
                .clone()
        };
        assert_eq!(object_children, vec![q1, q2]);
    }

    #[test]
    fn test_batch_unknown_child_reports_index() {
        let driver = VsDriver::new();
        let group = SchedulerGroupDriver::create(&driver, &[]).unwrap();
        let q1 = QueueDriver::create(&driver, &[]).unwrap();

        let err = driver.add_child_list(group, &[q1, 0xdead]).unwrap_err();
        assert_eq!(err.applied, 1);
        assert!(matches!(err.error, SaiError::NotFound { .. }));
    }

    #[test]
    fn test_remove_child_list() {
        let driver = VsDriver::new();
        let group = SchedulerGroupDriver::create(&driver, &[]).unwrap();
        let q1 = QueueDriver::create(&driver, &[]).unwrap();
        let q2 = QueueDriver::create(&driver, &[]).unwrap();
        driver.add_child_list(group, &[q1, q2]).unwrap();
        driver.remove_child_list(group, &[q1]).unwrap();

        let err = driver.remove_child_list(group, &[q1]).unwrap_err();
        assert_eq!(err.applied, 0);
        assert!(matches!(err.error, SaiError::NotFound { .. }));
    }

    #[test]
    fn test_attr_set_and_get() {
        let driver = VsDriver::new();
        let id = WredDriver::create(&driver, &[]).unwrap();
        WredDriver::attr_set(&driver, id, &Attribute::u64(7, 9000)).unwrap();
        let attrs = WredDriver::attr_get(&driver, id, &[7]).unwrap();
        assert_eq!(attrs[0].value.as_u64(), Some(9000));
    }

    #[test]
    fn test_call_counter() {
        let driver = VsDriver::new();
        assert_eq!(driver.call_count(), 0);
        let id = PolicerDriver::create(&driver, &[]).unwrap();
        PolicerDriver::remove(&driver, id).unwrap();
        assert_eq!(driver.call_count(), 2);
    }

    #[test]
    fn test_stats_default_zero_and_clear() {
        let driver = VsDriver::new();
        let id = QueueDriver::create(&driver, &[]).unwrap();
        let stats = QueueDriver::stats_get(&driver, id, &[0, 1]).unwrap();
        assert_eq!(stats, vec![0, 0]);
        QueueDriver::stats_clear(&driver, id, &[0, 1]).unwrap();
    }
}

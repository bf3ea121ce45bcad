//! Scheduler profile registry and reapplication engine.
//!
//! Scheduler bindings are many-to-one associations, not ownership edges:
//! one profile can drive any number of queues, groups and ports, and the
//! profile node keeps a back-link list per consumer kind. Because vendor
//! hardware programs scheduling parameters at the *consumer*, a parameter
//! change on a shared profile has to be re-pushed to every back-linked
//! consumer — that re-push, with its counted per-phase compensation, is the
//! reapplication engine.

use std::slice;

use tracing::{debug, info, warn};

use sai_common::attr::{validate_attributes, AttrId, AttrOp, Attribute};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{PortOid, QueueOid, RawObjectId, SchedGroupOid, SchedulerOid};

use crate::context::{QosContext, QosSwitch};
use crate::hierarchy::types::SCHED_GROUP_ATTR_SCHEDULER_PROFILE_ID;
use crate::port::types::{PORT_ATTR_QOS_SCHEDULER_PROFILE_ID, QUEUE_ATTR_SCHEDULER_PROFILE_ID};

use super::types::{SchedulerNode, SchedulerParams, SCHEDULER_ATTR_TABLE};

/// A scheduler-profile consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerConsumer {
    Queue(QueueOid),
    Group(SchedGroupOid),
    Port(PortOid),
}

/// Creates the process-wide default scheduler during subsystem init.
pub(crate) fn create_default(ctx: &mut QosContext) -> SaiResult<()> {
    let params = SchedulerParams::default();
    let driver = ctx.driver();
    let raw = driver.scheduler().create(&params.to_attrs())?;
    let id = SchedulerOid::from_raw_unchecked(raw);

    if let Err(err) = ctx.schedulers.insert(id, SchedulerNode::new(params)) {
        if let Err(undo_err) = driver.scheduler().remove(raw) {
            warn!(scheduler = %id, error = %undo_err, "driver rollback of default scheduler failed");
        }
        return Err(err);
    }
    ctx.default_scheduler = Some(id);
    info!(scheduler = %id, "default scheduler created");
    Ok(())
}

/// Removes the default scheduler at subsystem teardown, clearing the
/// process-wide reference first. Best-effort: failures are logged.
pub(crate) fn remove_default(ctx: &mut QosContext) {
    let Some(id) = ctx.default_scheduler.take() else {
        return;
    };
    match ctx.schedulers.get(id) {
        Ok(node) if node.ref_count() > 0 => {
            warn!(scheduler = %id, refs = node.ref_count(), "default scheduler still referenced at teardown");
            ctx.default_scheduler = Some(id);
        }
        Ok(_) => {
            let driver = ctx.driver();
            if let Err(err) = driver.scheduler().remove(id.as_raw()) {
                warn!(scheduler = %id, error = %err, "driver remove of default scheduler failed");
            }
            let _ = ctx.schedulers.remove(id);
        }
        Err(err) => warn!(scheduler = %id, error = %err, "default scheduler missing at teardown"),
    }
}

pub(crate) fn create(ctx: &mut QosContext, attrs: &[Attribute]) -> SaiResult<SchedulerOid> {
    validate_attributes(attrs, SCHEDULER_ATTR_TABLE, AttrOp::Create)?;
    let params = SchedulerParams::from_attrs(attrs)?;

    let driver = ctx.driver();
    let raw = driver.scheduler().create(attrs)?;
    let id = SchedulerOid::from_raw_unchecked(raw);

    if let Err(err) = ctx.schedulers.insert(id, SchedulerNode::new(params)) {
        if let Err(undo_err) = driver.scheduler().remove(raw) {
            warn!(scheduler = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    debug!(scheduler = %id, "scheduler created");
    Ok(id)
}

pub(crate) fn remove(ctx: &mut QosContext, id: SchedulerOid) -> SaiResult<()> {
    let node = ctx.schedulers.get(id)?;
    if node.ref_count() > 0 {
        return Err(SaiError::object_in_use(format!(
            "scheduler {} has {} consumers",
            id,
            node.ref_count()
        )));
    }
    if ctx.default_scheduler == Some(id) {
        return Err(SaiError::object_in_use(format!(
            "scheduler {} is the default scheduler; clear the default reference first",
            id
        )));
    }

    ctx.driver().scheduler().remove(id.as_raw())?;
    ctx.schedulers.remove(id)?;
    debug!(scheduler = %id, "scheduler removed");
    Ok(())
}

pub(crate) fn attr_get(
    ctx: &QosContext,
    id: SchedulerOid,
    ids: &[AttrId],
) -> SaiResult<Vec<Attribute>> {
    let probe: Vec<Attribute> = ids
        .iter()
        .map(|attr_id| Attribute::u32(*attr_id, 0))
        .collect();
    validate_attributes(&probe, SCHEDULER_ATTR_TABLE, AttrOp::Get)?;

    let node = ctx.schedulers.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| {
            node.params
                .attr_value(*attr_id)
                .map(|value| Attribute::new(*attr_id, value))
                .ok_or(SaiError::UnknownAttribute {
                    index,
                    attr_id: *attr_id,
                })
        })
        .collect()
}

/// Sets one scheduler attribute and reapplies the profile to every
/// back-linked consumer: queues first, then groups, then ports.
///
/// Setting the same value again is detected and short-circuits with no
/// driver call. On a mid-fan-out failure, the counted prefix of the failed
/// phase and every completed prior phase are reverted in reverse phase
/// order by re-applying the old profile state.
pub(crate) fn attr_set(ctx: &mut QosContext, id: SchedulerOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(slice::from_ref(attr), SCHEDULER_ATTR_TABLE, AttrOp::Set)?;

    let node = ctx.schedulers.get(id)?;
    let old_params = node.params;
    let mut new_params = old_params;
    new_params.apply_attr(attr, 0)?;
    if new_params == old_params {
        debug!(scheduler = %id, attr = attr.id, "duplicate scheduler attribute set, no-op");
        return Ok(());
    }

    let driver = ctx.driver();
    driver.scheduler().attr_set(id.as_raw(), attr)?;

    if let Err(err) = reapply(ctx, id, old_params, attr) {
        return Err(err);
    }

    ctx.schedulers.get_mut(id)?.params = new_params;
    debug!(scheduler = %id, attr = attr.id, "scheduler attribute set and reapplied");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queues,
    Groups,
    Ports,
}

/// Re-pushes scheduler state to every back-linked consumer, phase by
/// phase, compensating on failure.
fn reapply(
    ctx: &mut QosContext,
    id: SchedulerOid,
    old_params: SchedulerParams,
    attr: &Attribute,
) -> SaiResult<()> {
    let node = ctx.schedulers.get(id)?;
    let phases: [(Phase, Vec<RawObjectId>); 3] = [
        (Phase::Queues, node.queues.iter().map(|q| q.as_raw()).collect()),
        (Phase::Groups, node.groups.iter().map(|g| g.as_raw()).collect()),
        (Phase::Ports, node.ports.iter().map(|p| p.as_raw()).collect()),
    ];

    let driver = ctx.driver();
    for (phase_index, (phase, consumers)) in phases.iter().enumerate() {
        for (applied, consumer) in consumers.iter().enumerate() {
            if let Err(err) = push_binding(driver.as_ref(), *phase, *consumer, id.as_raw()) {
                warn!(
                    scheduler = %id,
                    phase = ?phase,
                    consumer = format_args!("0x{:x}", consumer),
                    error = %err,
                    "scheduler reapply failed, reverting"
                );
                revert_reapply(
                    driver.as_ref(),
                    id,
                    old_params,
                    attr,
                    &phases[..phase_index],
                    (*phase, &consumers[..applied]),
                );
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Re-applies the old profile state to the driver object, the counted
/// prefix of the failed phase, and all completed phases in reverse order.
fn revert_reapply(
    driver: &dyn sai_common::driver::SwitchDriver,
    id: SchedulerOid,
    old_params: SchedulerParams,
    attr: &Attribute,
    completed: &[(Phase, Vec<RawObjectId>)],
    failed: (Phase, &[RawObjectId]),
) {
    if let Some(value) = old_params.attr_value(attr.id) {
        let old_attr = Attribute::new(attr.id, value);
        if let Err(err) = driver.scheduler().attr_set(id.as_raw(), &old_attr) {
            warn!(scheduler = %id, error = %err, "restoring old scheduler state in driver failed");
        }
    }

    let (failed_phase, applied) = failed;
    for consumer in applied.iter().rev() {
        if let Err(err) = push_binding(driver, failed_phase, *consumer, id.as_raw()) {
            warn!(
                consumer = format_args!("0x{:x}", consumer),
                error = %err,
                "scheduler revert push failed"
            );
        }
    }
    for (phase, consumers) in completed.iter().rev() {
        for consumer in consumers.iter().rev() {
            if let Err(err) = push_binding(driver, *phase, *consumer, id.as_raw()) {
                warn!(
                    consumer = format_args!("0x{:x}", consumer),
                    error = %err,
                    "scheduler revert push failed"
                );
            }
        }
    }
}

fn push_binding(
    driver: &dyn sai_common::driver::SwitchDriver,
    phase: Phase,
    consumer: RawObjectId,
    scheduler: RawObjectId,
) -> SaiResult<()> {
    match phase {
        Phase::Queues => driver.queue().attr_set(
            consumer,
            &Attribute::oid(QUEUE_ATTR_SCHEDULER_PROFILE_ID, scheduler),
        ),
        Phase::Groups => driver.sched_group().attr_set(
            consumer,
            &Attribute::oid(SCHED_GROUP_ATTR_SCHEDULER_PROFILE_ID, scheduler),
        ),
        Phase::Ports => driver.port().attr_set(
            consumer,
            &Attribute::oid(PORT_ATTR_QOS_SCHEDULER_PROFILE_ID, scheduler),
        ),
    }
}

/// Rebinds a consumer to a scheduler profile.
///
/// A null (`None`) reference resolves to the default scheduler. Setting
/// the binding the consumer already has is a no-op with no driver call.
pub(crate) fn scheduler_set(
    ctx: &mut QosContext,
    consumer: SchedulerConsumer,
    requested: Option<SchedulerOid>,
) -> SaiResult<()> {
    let new_id = ctx.resolve_scheduler(requested)?;
    let current = current_binding(ctx, consumer)?;
    if current == new_id {
        debug!(?consumer, scheduler = %new_id, "duplicate scheduler set, no-op");
        return Ok(());
    }

    let driver = ctx.driver();
    let phase = match consumer {
        SchedulerConsumer::Queue(_) => Phase::Queues,
        SchedulerConsumer::Group(_) => Phase::Groups,
        SchedulerConsumer::Port(_) => Phase::Ports,
    };
    push_binding(driver.as_ref(), phase, consumer_raw(consumer), new_id.as_raw())?;

    detach_backlink(ctx, consumer, current);
    attach_backlink(ctx, consumer, new_id);
    set_binding(ctx, consumer, new_id)?;
    debug!(?consumer, from = %current, to = %new_id, "scheduler binding updated");
    Ok(())
}

/// Drops the back-link for a consumer that is being destroyed.
pub(crate) fn release_binding(ctx: &mut QosContext, consumer: SchedulerConsumer) -> SaiResult<()> {
    let current = current_binding(ctx, consumer)?;
    detach_backlink(ctx, consumer, current);
    Ok(())
}

fn consumer_raw(consumer: SchedulerConsumer) -> RawObjectId {
    match consumer {
        SchedulerConsumer::Queue(id) => id.as_raw(),
        SchedulerConsumer::Group(id) => id.as_raw(),
        SchedulerConsumer::Port(id) => id.as_raw(),
    }
}

fn current_binding(ctx: &QosContext, consumer: SchedulerConsumer) -> SaiResult<SchedulerOid> {
    match consumer {
        SchedulerConsumer::Queue(id) => Ok(ctx.queues.get(id)?.scheduler_id),
        SchedulerConsumer::Group(id) => Ok(ctx.sched_groups.get(id)?.scheduler_id),
        SchedulerConsumer::Port(id) => Ok(ctx.ports.get(id)?.scheduler_id),
    }
}

fn set_binding(ctx: &mut QosContext, consumer: SchedulerConsumer, id: SchedulerOid) -> SaiResult<()> {
    match consumer {
        SchedulerConsumer::Queue(q) => ctx.queues.get_mut(q)?.scheduler_id = id,
        SchedulerConsumer::Group(g) => ctx.sched_groups.get_mut(g)?.scheduler_id = id,
        SchedulerConsumer::Port(p) => ctx.ports.get_mut(p)?.scheduler_id = id,
    }
    Ok(())
}

fn attach_backlink(ctx: &mut QosContext, consumer: SchedulerConsumer, id: SchedulerOid) {
    if let Ok(node) = ctx.schedulers.get_mut(id) {
        match consumer {
            SchedulerConsumer::Queue(q) => node.attach_queue(q),
            SchedulerConsumer::Group(g) => node.attach_group(g),
            SchedulerConsumer::Port(p) => node.attach_port(p),
        }
    }
}

fn detach_backlink(ctx: &mut QosContext, consumer: SchedulerConsumer, id: SchedulerOid) {
    if let Ok(node) = ctx.schedulers.get_mut(id) {
        match consumer {
            SchedulerConsumer::Queue(q) => node.detach_queue(q),
            SchedulerConsumer::Group(g) => node.detach_group(g),
            SchedulerConsumer::Port(p) => node.detach_port(p),
        }
    }
}

/// Registers the back-link for a consumer whose binding was already
/// resolved at creation (the implicit default binding needs no driver
/// call).
pub(crate) fn attach_consumer(
    ctx: &mut QosContext,
    consumer: SchedulerConsumer,
    id: SchedulerOid,
) {
    attach_backlink(ctx, consumer, id);
}

// ---------------------------------------------------------------------------
// Public method table
// ---------------------------------------------------------------------------

impl QosSwitch {
    /// Creates a scheduler profile.
    pub fn scheduler_create(&self, attrs: &[Attribute]) -> SaiResult<SchedulerOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        create(&mut ctx, attrs)
    }

    /// Removes a scheduler profile. Fails with `OBJECT_IN_USE` while any
    /// queue, group or port is bound to it, or while it is the default.
    pub fn scheduler_remove(&self, id: SchedulerOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        remove(&mut ctx, id)
    }

    /// Sets one scheduler attribute, reapplying the profile to all
    /// back-linked consumers.
    pub fn scheduler_attr_set(&self, id: SchedulerOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        attr_set(&mut ctx, id, attr)
    }

    /// Reads scheduler attributes from the cache.
    pub fn scheduler_attr_get(&self, id: SchedulerOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        attr_get(&ctx, id, ids)
    }

    /// Rebinds a queue, group or port to a scheduler profile; `None`
    /// resolves to the default scheduler.
    pub fn scheduler_bind(
        &self,
        consumer: SchedulerConsumer,
        scheduler: Option<SchedulerOid>,
    ) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        scheduler_set(&mut ctx, consumer, scheduler)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sai_common::error::Status;
    use sai_common::types::QueueOid;
    use sai_vs::VsDriver;

    use crate::config::QosConfig;
    use crate::context::QosSwitch;
    use crate::scheduler::types::{
        SCHEDULER_ATTR_SCHEDULING_WEIGHT, SCHEDULER_ATTR_SCHEDULING_TYPE,
    };

    use super::*;

    fn setup() -> (Arc<VsDriver>, QosSwitch) {
        let driver = Arc::new(VsDriver::new());
        let config = QosConfig {
            port_count: 1,
            uc_queue_count: 2,
            mc_queue_count: 0,
            pg_count: 0,
            hierarchy: None,
        };
        let switch = QosSwitch::new(driver.clone(), config).unwrap();
        switch.init().unwrap();
        (driver, switch)
    }

    fn first_queue(switch: &QosSwitch) -> QueueOid {
        let ctx = switch.lock();
        let (_, port) = ctx.ports.iter().next().unwrap();
        port.queues[0]
    }

    #[test]
    fn test_create_and_remove() {
        let (_, switch) = setup();
        let sched = switch
            .scheduler_create(&[Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 10)])
            .unwrap();

        let attrs = switch
            .scheduler_attr_get(sched, &[SCHEDULER_ATTR_SCHEDULING_WEIGHT])
            .unwrap();
        assert_eq!(attrs[0].value.as_u8(), Some(10));

        switch.scheduler_remove(sched).unwrap();
        assert!(matches!(
            switch.scheduler_attr_get(sched, &[SCHEDULER_ATTR_SCHEDULING_WEIGHT]),
            Err(SaiError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_while_referenced() {
        let (_, switch) = setup();
        let sched = switch.scheduler_create(&[]).unwrap();
        let queue = first_queue(&switch);

        switch
            .scheduler_bind(SchedulerConsumer::Queue(queue), Some(sched))
            .unwrap();
        let err = switch.scheduler_remove(sched).unwrap_err();
        assert!(matches!(err, SaiError::ObjectInUse { .. }));

        // Rebinding the queue to the default releases the reference.
        switch
            .scheduler_bind(SchedulerConsumer::Queue(queue), None)
            .unwrap();
        switch.scheduler_remove(sched).unwrap();
    }

    #[test]
    fn test_default_scheduler_remove_needs_explicit_clear() {
        let (_, switch) = setup();
        let default = switch.default_scheduler().unwrap();

        let err = switch.scheduler_remove(default).unwrap_err();
        assert!(matches!(err, SaiError::ObjectInUse { .. }));
    }

    #[test]
    fn test_duplicate_bind_is_no_op() {
        let (driver, switch) = setup();
        let sched = switch.scheduler_create(&[]).unwrap();
        let queue = first_queue(&switch);

        switch
            .scheduler_bind(SchedulerConsumer::Queue(queue), Some(sched))
            .unwrap();
        // Back to the default via the null id: one driver call.
        switch
            .scheduler_bind(SchedulerConsumer::Queue(queue), None)
            .unwrap();
        let calls = driver.call_count();

        // Second null set is detected as a duplicate; no driver traffic.
        switch
            .scheduler_bind(SchedulerConsumer::Queue(queue), None)
            .unwrap();
        assert_eq!(driver.call_count(), calls);
    }

    #[test]
    fn test_duplicate_attr_set_is_no_op() {
        let (driver, switch) = setup();
        let sched = switch
            .scheduler_create(&[Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 7)])
            .unwrap();
        let calls = driver.call_count();

        switch
            .scheduler_attr_set(sched, &Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 7))
            .unwrap();
        assert_eq!(driver.call_count(), calls);
    }

    #[test]
    fn test_attr_set_reapplies_to_consumers() {
        let (driver, switch) = setup();
        let sched = switch.scheduler_create(&[]).unwrap();
        let queue = first_queue(&switch);
        switch
            .scheduler_bind(SchedulerConsumer::Queue(queue), Some(sched))
            .unwrap();

        let calls = driver.call_count();
        switch
            .scheduler_attr_set(sched, &Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 42))
            .unwrap();
        // One profile update plus one re-push per consumer.
        assert_eq!(driver.call_count(), calls + 2);

        let attrs = switch
            .scheduler_attr_get(sched, &[SCHEDULER_ATTR_SCHEDULING_WEIGHT])
            .unwrap();
        assert_eq!(attrs[0].value.as_u8(), Some(42));
    }

    #[test]
    fn test_attr_set_reverts_on_fanout_failure() {
        let (driver, switch) = setup();
        let sched = switch
            .scheduler_create(&[Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 7)])
            .unwrap();
        let queue = first_queue(&switch);
        switch
            .scheduler_bind(SchedulerConsumer::Queue(queue), Some(sched))
            .unwrap();

        // Profile update succeeds, the queue re-push fails.
        driver.fail_after(1, Status::Failure);
        let err = switch
            .scheduler_attr_set(sched, &Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 99))
            .unwrap_err();
        assert!(matches!(err, SaiError::Status { .. }));

        // The cached parameters keep the old value.
        let attrs = switch
            .scheduler_attr_get(sched, &[SCHEDULER_ATTR_SCHEDULING_WEIGHT])
            .unwrap();
        assert_eq!(attrs[0].value.as_u8(), Some(7));
    }

    #[test]
    fn test_invalid_weight_indexed_error() {
        let (_, switch) = setup();
        let err = switch
            .scheduler_create(&[
                Attribute::u32(SCHEDULER_ATTR_SCHEDULING_TYPE, 2),
                Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 0),
            ])
            .unwrap_err();
        assert!(matches!(err, SaiError::InvalidAttrValue { index: 1, .. }));
    }
}

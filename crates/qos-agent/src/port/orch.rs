//! Port QoS lifecycle.
//!
//! The port node is the root of the per-port object tree and drives
//! init/deinit ordering:
//!
//! ```text
//! init:   global-init → (hierarchy-init | flat-queue-init) → pg-init → ready
//! deinit: port-pools → non-default configs → pg → hierarchy|queues → global
//! ```
//!
//! Init failure at any stage unwinds the stages already completed for that
//! port. De-init detaches every non-default association (buffer profile,
//! WRED, scheduler, QoS maps, policer) before destroying child objects; a
//! failed detach re-attaches what this pass already detached.

use tracing::{debug, warn};

use sai_common::attr::{validate_attributes, AttrId, AttrOp, AttrValue, Attribute};
use sai_common::driver::StatId;
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{
    BufferPoolOid, BufferProfileOid, PolicerOid, PortOid, PortPoolOid, PriorityGroupOid,
    QosMapOid, QueueOid, SchedulerOid, WredOid,
};

use crate::buffer::orch as buffer_orch;
use crate::buffer::types::BufferConsumer;
use crate::context::{QosContext, QosSwitch};
use crate::hierarchy::orch as hierarchy_orch;
use crate::qosmap::QosMapType;
use crate::scheduler::orch::{self as scheduler_orch, SchedulerConsumer};
use crate::undo::UndoLog;

use super::types::{
    PortNode, PortPoolNode, PortQosState, PriorityGroupNode, QueueNode, QueueType,
    PORT_ATTR_POLICER_ID, PORT_ATTR_QOS_BUFFER_PROFILE_ID, PORT_ATTR_QOS_DSCP_TO_TC_MAP,
    PORT_ATTR_QOS_PRIORITY_GROUP_LIST, PORT_ATTR_QOS_QUEUE_LIST, PORT_ATTR_QOS_SCHED_GROUP_LIST,
    PORT_ATTR_QOS_SCHEDULER_PROFILE_ID, PORT_ATTR_QOS_TC_TO_QUEUE_MAP, PORT_ATTR_TABLE,
    PORT_POOL_ATTR_BUFFER_POOL_ID, PORT_POOL_ATTR_PORT_ID, PORT_POOL_ATTR_QOS_WRED_PROFILE_ID,
    PORT_POOL_ATTR_TABLE, PRIORITY_GROUP_ATTR_BUFFER_PROFILE, PRIORITY_GROUP_ATTR_INDEX,
    PRIORITY_GROUP_ATTR_PORT, PRIORITY_GROUP_ATTR_TABLE, QUEUE_ATTR_BUFFER_PROFILE_ID,
    QUEUE_ATTR_INDEX, QUEUE_ATTR_PARENT_SCHEDULER_NODE, QUEUE_ATTR_PORT,
    QUEUE_ATTR_SCHEDULER_PROFILE_ID, QUEUE_ATTR_TABLE, QUEUE_ATTR_TYPE, QUEUE_ATTR_WRED_PROFILE_ID,
};

// ---------------------------------------------------------------------------
// Port create / init
// ---------------------------------------------------------------------------

/// Creates a port object and runs the full init state machine on it.
pub(crate) fn create_and_init_port(ctx: &mut QosContext) -> SaiResult<PortOid> {
    let default_sched = ctx.resolve_scheduler(None)?;
    let driver = ctx.driver();
    let raw = driver.port().create(&[])?;
    let id = PortOid::from_raw_unchecked(raw);

    if let Err(err) = ctx.ports.insert(id, PortNode::new(default_sched)) {
        if let Err(undo_err) = driver.port().remove(raw) {
            warn!(port = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    scheduler_orch::attach_consumer(ctx, SchedulerConsumer::Port(id), default_sched);

    if let Err(err) = port_init(ctx, id) {
        scheduler_orch::release_binding(ctx, SchedulerConsumer::Port(id)).ok();
        ctx.ports.remove(id).ok();
        if let Err(undo_err) = driver.port().remove(raw) {
            warn!(port = %id, error = %undo_err, "driver port removal during init unwind failed");
        }
        return Err(err);
    }
    Ok(id)
}

/// Runs the init state machine on an existing, uninitialized port node.
fn port_init(ctx: &mut QosContext, port_id: PortOid) -> SaiResult<()> {
    if ctx.ports.get(port_id)?.state != PortQosState::Uninitialized {
        return Err(SaiError::invalid_parameter(format!(
            "port {} already initialized",
            port_id
        )));
    }

    let mut undo = UndoLog::new();
    let result = port_init_stages(ctx, port_id, &mut undo);
    match result {
        Ok(()) => {
            undo.commit();
            ctx.ports.get_mut(port_id)?.state = PortQosState::Ready;
            debug!(port = %port_id, "port ready");
            Ok(())
        }
        Err(err) => {
            warn!(port = %port_id, error = %err, "port init failed, unwinding");
            undo.unwind(ctx);
            if let Ok(port) = ctx.ports.get_mut(port_id) {
                port.state = PortQosState::Uninitialized;
            }
            Err(err)
        }
    }
}

fn port_init_stages(ctx: &mut QosContext, port_id: PortOid, undo: &mut UndoLog) -> SaiResult<()> {
    // Global init: push the implicit default scheduler binding down.
    let default_sched = ctx.resolve_scheduler(None)?;
    ctx.driver().port().attr_set(
        port_id.as_raw(),
        &Attribute::oid(PORT_ATTR_QOS_SCHEDULER_PROFILE_ID, default_sched.as_raw()),
    )?;
    ctx.ports.get_mut(port_id)?.state = PortQosState::GlobalInit;

    // Queues exist in both hierarchy and flat mode.
    let uc = ctx.config.uc_queue_count;
    let mc = ctx.config.mc_queue_count;
    for index in 0..uc {
        let queue = create_queue_internal(ctx, port_id, QueueType::Unicast, index)?;
        undo.record("remove queue", move |ctx| destroy_queue(ctx, queue));
    }
    for index in 0..mc {
        let queue = create_queue_internal(ctx, port_id, QueueType::Multicast, index)?;
        undo.record("remove queue", move |ctx| destroy_queue(ctx, queue));
    }

    if ctx.config.hierarchy.is_some() {
        hierarchy_orch::port_hierarchy_init(ctx, port_id)?;
        undo.record("tear down hierarchy", move |ctx| {
            hierarchy_orch::port_hierarchy_deinit(ctx, port_id)
        });
        ctx.ports.get_mut(port_id)?.state = PortQosState::HierarchyInit;
    } else {
        ctx.ports.get_mut(port_id)?.state = PortQosState::FlatQueueInit;
    }

    for index in 0..ctx.config.pg_count {
        let pg = create_pg_internal(ctx, port_id, index)?;
        undo.record("remove priority group", move |ctx| destroy_pg(ctx, pg));
    }
    ctx.ports.get_mut(port_id)?.state = PortQosState::PgInit;
    Ok(())
}

// ---------------------------------------------------------------------------
// Port deinit / remove
// ---------------------------------------------------------------------------

/// Fully de-initializes a port and removes it.
pub(crate) fn deinit_and_remove_port(ctx: &mut QosContext, port_id: PortOid) -> SaiResult<()> {
    if ctx.ports.get(port_id)?.state != PortQosState::Uninitialized {
        port_deinit(ctx, port_id)?;
    }

    let node = ctx.ports.get(port_id)?;
    if !node.is_empty() {
        return Err(SaiError::object_in_use(format!(
            "port {} still has child objects",
            port_id
        )));
    }
    ctx.driver().port().remove(port_id.as_raw())?;
    scheduler_orch::release_binding(ctx, SchedulerConsumer::Port(port_id))?;
    ctx.ports.remove(port_id)?;
    debug!(port = %port_id, "port removed");
    Ok(())
}

/// Reverses the init state machine on one port.
pub(crate) fn port_deinit(ctx: &mut QosContext, port_id: PortOid) -> SaiResult<()> {
    // Phase 1: per-port pool objects (and their WRED bindings).
    for pool in ctx.ports.get(port_id)?.port_pools.clone() {
        destroy_port_pool(ctx, pool)?;
    }

    // Phase 2: detach every non-default port-level config.
    remove_nondefault_configs(ctx, port_id)?;

    // Phase 3: priority groups.
    for pg in ctx.ports.get(port_id)?.priority_groups.clone() {
        buffer_orch::update_buffer_profile(ctx, BufferConsumer::Pg(pg), None)?;
        destroy_pg(ctx, pg)?;
    }

    // Phase 4: the scheduler-group tree, where one was built.
    if !ctx.ports.get(port_id)?.sched_groups.iter().all(|l| l.is_empty()) {
        hierarchy_orch::port_hierarchy_deinit(ctx, port_id)?;
    }

    // Phase 5: queues, configs first.
    for queue in ctx.ports.get(port_id)?.queues.clone() {
        queue_set_wred(ctx, queue, None)?;
        buffer_orch::update_buffer_profile(ctx, BufferConsumer::Queue(queue), None)?;
        if ctx.default_scheduler.is_some() {
            scheduler_orch::scheduler_set(ctx, SchedulerConsumer::Queue(queue), None)?;
        }
        destroy_queue(ctx, queue)?;
    }

    // Phase 6: global deinit.
    ctx.ports.get_mut(port_id)?.state = PortQosState::Uninitialized;
    debug!(port = %port_id, "port deinitialized");
    Ok(())
}

/// Detaches buffer profile, scheduler, QoS maps and policer from a port.
///
/// Each association is detached independently; if one detach fails, the
/// associations already detached in this pass are re-applied and the port
/// stays as it was.
fn remove_nondefault_configs(ctx: &mut QosContext, port_id: PortOid) -> SaiResult<()> {
    let mut undo = UndoLog::new();

    let node = ctx.ports.get(port_id)?;
    let buffer_profile = node.buffer_profile_id;
    let scheduler = node.scheduler_id;
    let maps: Vec<(QosMapType, QosMapOid)> =
        node.qos_maps.iter().map(|(t, m)| (*t, *m)).collect();
    let policer = node.policer_id;
    let default_sched = ctx.default_scheduler;

    if let Some(profile) = buffer_profile {
        if let Err(err) = buffer_orch::update_buffer_profile(ctx, BufferConsumer::Port(port_id), None)
        {
            undo.unwind(ctx);
            return Err(err);
        }
        undo.record("re-attach port buffer profile", move |ctx| {
            buffer_orch::update_buffer_profile(ctx, BufferConsumer::Port(port_id), Some(profile))
        });
    }

    if default_sched.is_some() && Some(scheduler) != default_sched {
        if let Err(err) = scheduler_orch::scheduler_set(ctx, SchedulerConsumer::Port(port_id), None)
        {
            undo.unwind(ctx);
            return Err(err);
        }
        undo.record("re-attach port scheduler", move |ctx| {
            scheduler_orch::scheduler_set(ctx, SchedulerConsumer::Port(port_id), Some(scheduler))
        });
    }

    for (map_type, map) in maps {
        if let Err(err) = port_set_map(ctx, port_id, map_type, None) {
            undo.unwind(ctx);
            return Err(err);
        }
        undo.record("re-attach port qos map", move |ctx| {
            port_set_map(ctx, port_id, map_type, Some(map))
        });
    }

    if let Some(policer) = policer {
        if let Err(err) = port_set_policer(ctx, port_id, None) {
            undo.unwind(ctx);
            return Err(err);
        }
        undo.record("re-attach port policer", move |ctx| {
            port_set_policer(ctx, port_id, Some(policer))
        });
    }

    undo.commit();
    Ok(())
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

fn create_queue_internal(
    ctx: &mut QosContext,
    port_id: PortOid,
    queue_type: QueueType,
    index: u32,
) -> SaiResult<QueueOid> {
    let attrs = [
        Attribute::u32(QUEUE_ATTR_TYPE, queue_type.as_u32()),
        Attribute::oid(QUEUE_ATTR_PORT, port_id.as_raw()),
        Attribute::u32(QUEUE_ATTR_INDEX, index),
    ];
    let default_sched = ctx.resolve_scheduler(None)?;

    let driver = ctx.driver();
    let raw = driver.queue().create(&attrs)?;
    let id = QueueOid::from_raw_unchecked(raw);
    if let Err(err) = ctx
        .queues
        .insert(id, QueueNode::new(port_id, index, queue_type, default_sched))
    {
        if let Err(undo_err) = driver.queue().remove(raw) {
            warn!(queue = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    ctx.ports.get_mut(port_id)?.queues.push(id);
    scheduler_orch::attach_consumer(ctx, SchedulerConsumer::Queue(id), default_sched);
    Ok(id)
}

/// Removes a queue unconditionally; guards live in [`queue_remove`].
fn destroy_queue(ctx: &mut QosContext, id: QueueOid) -> SaiResult<()> {
    let node = ctx.queues.get(id)?.clone();
    ctx.driver().queue().remove(id.as_raw())?;
    ctx.queues.remove(id)?;
    if let Ok(port) = ctx.ports.get_mut(node.port_id) {
        port.queues.retain(|q| *q != id);
    }
    if let Ok(sched) = ctx.schedulers.get_mut(node.scheduler_id) {
        sched.detach_queue(id);
    }
    debug!(queue = %id, "queue removed");
    Ok(())
}

pub(crate) fn queue_create(ctx: &mut QosContext, attrs: &[Attribute]) -> SaiResult<QueueOid> {
    validate_attributes(attrs, QUEUE_ATTR_TABLE, AttrOp::Create)?;

    let mut queue_type = None;
    let mut port_id = None;
    let mut index = None;
    let mut wred = None;
    let mut buffer_profile = None;
    let mut scheduler = None;
    for (attr_index, attr) in attrs.iter().enumerate() {
        let bad_value = || SaiError::InvalidAttrValue {
            index: attr_index,
            attr_id: attr.id,
        };
        match attr.id {
            QUEUE_ATTR_TYPE => {
                let raw = attr.value.as_u32().ok_or_else(bad_value)?;
                queue_type = Some(QueueType::from_u32(raw).ok_or_else(bad_value)?);
            }
            QUEUE_ATTR_PORT => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                port_id = Some(PortOid::from_raw(raw).ok_or_else(bad_value)?);
            }
            QUEUE_ATTR_INDEX => index = Some(attr.value.as_u32().ok_or_else(bad_value)?),
            QUEUE_ATTR_WRED_PROFILE_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                wred = WredOid::from_raw(raw);
            }
            QUEUE_ATTR_BUFFER_PROFILE_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                buffer_profile = BufferProfileOid::from_raw(raw);
            }
            QUEUE_ATTR_SCHEDULER_PROFILE_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                scheduler = SchedulerOid::from_raw(raw);
            }
            _ => {}
        }
    }
    let queue_type = queue_type.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: QUEUE_ATTR_TYPE,
    })?;
    let port_id = port_id.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: QUEUE_ATTR_PORT,
    })?;
    let index = index.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: QUEUE_ATTR_INDEX,
    })?;

    let port = ctx.ports.get(port_id)?;
    for existing in &port.queues {
        let queue = ctx.queues.get(*existing)?;
        if queue.queue_type == queue_type && queue.index == index {
            return Err(SaiError::already_exists(format!(
                "{} queue {} on port {}",
                queue_type, index, port_id
            )));
        }
    }
    let scheduler_id = ctx.resolve_scheduler(scheduler)?;

    let driver = ctx.driver();
    let raw = driver.queue().create(attrs)?;
    let id = QueueOid::from_raw_unchecked(raw);
    if let Err(err) = ctx
        .queues
        .insert(id, QueueNode::new(port_id, index, queue_type, scheduler_id))
    {
        if let Err(undo_err) = driver.queue().remove(raw) {
            warn!(queue = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    ctx.ports.get_mut(port_id)?.queues.push(id);
    scheduler_orch::attach_consumer(ctx, SchedulerConsumer::Queue(id), scheduler_id);

    // Optional associations carried on the create list.
    let mut undo = UndoLog::new();
    undo.record("remove queue", move |ctx| destroy_queue(ctx, id));
    if let Some(wred_id) = wred {
        if let Err(err) = queue_set_wred(ctx, id, Some(wred_id)) {
            undo.unwind(ctx);
            return Err(err);
        }
    }
    if let Some(profile) = buffer_profile {
        if let Err(err) = buffer_orch::update_buffer_profile(ctx, BufferConsumer::Queue(id), Some(profile)) {
            queue_set_wred(ctx, id, None).ok();
            undo.unwind(ctx);
            return Err(err);
        }
    }
    undo.commit();
    debug!(queue = %id, port = %port_id, %queue_type, index, "queue created");
    Ok(id)
}

pub(crate) fn queue_remove(ctx: &mut QosContext, id: QueueOid) -> SaiResult<()> {
    let node = ctx.queues.get(id)?;
    if node.wred_id.is_some() {
        return Err(SaiError::object_in_use(format!(
            "queue {} still has a wred profile",
            id
        )));
    }
    if node.buffer_profile_id.is_some() {
        return Err(SaiError::object_in_use(format!(
            "queue {} still has a buffer profile",
            id
        )));
    }
    if node.parent_group.is_some() {
        return Err(SaiError::object_in_use(format!(
            "queue {} still linked to a scheduler group",
            id
        )));
    }
    if Some(node.scheduler_id) != ctx.default_scheduler {
        return Err(SaiError::object_in_use(format!(
            "queue {} still bound to a non-default scheduler",
            id
        )));
    }
    destroy_queue(ctx, id)
}

/// Rebinds a queue's WRED profile; `None` detaches.
fn queue_set_wred(ctx: &mut QosContext, id: QueueOid, wred: Option<WredOid>) -> SaiResult<()> {
    let old = ctx.queues.get(id)?.wred_id;
    if old == wred {
        return Ok(());
    }
    if let Some(wred_id) = wred {
        ctx.wred_profiles.get(wred_id)?;
    }

    ctx.driver().queue().attr_set(
        id.as_raw(),
        &Attribute::oid(
            QUEUE_ATTR_WRED_PROFILE_ID,
            wred.map(|w| w.as_raw()).unwrap_or(0),
        ),
    )?;

    ctx.queues.get_mut(id)?.wred_id = wred;
    if let Some(old_id) = old {
        if let Ok(node) = ctx.wred_profiles.get_mut(old_id) {
            node.queues.retain(|q| *q != id);
        }
    }
    if let Some(new_id) = wred {
        if let Ok(node) = ctx.wred_profiles.get_mut(new_id) {
            if !node.queues.contains(&id) {
                node.queues.push(id);
            }
        }
    }
    Ok(())
}

pub(crate) fn queue_attr_set(ctx: &mut QosContext, id: QueueOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(std::slice::from_ref(attr), QUEUE_ATTR_TABLE, AttrOp::Set)?;
    let raw = attr.value.as_oid().ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;
    match attr.id {
        QUEUE_ATTR_WRED_PROFILE_ID => queue_set_wred(ctx, id, WredOid::from_raw(raw)),
        QUEUE_ATTR_BUFFER_PROFILE_ID => buffer_orch::update_buffer_profile(
            ctx,
            BufferConsumer::Queue(id),
            BufferProfileOid::from_raw(raw),
        ),
        QUEUE_ATTR_SCHEDULER_PROFILE_ID => scheduler_orch::scheduler_set(
            ctx,
            SchedulerConsumer::Queue(id),
            SchedulerOid::from_raw(raw),
        ),
        _ => Err(SaiError::InvalidAttribute {
            index: 0,
            attr_id: attr.id,
        }),
    }
}

pub(crate) fn queue_attr_get(ctx: &QosContext, id: QueueOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
    let node = ctx.queues.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| match *attr_id {
            QUEUE_ATTR_TYPE => Ok(Attribute::u32(*attr_id, node.queue_type.as_u32())),
            QUEUE_ATTR_PORT => Ok(Attribute::oid(*attr_id, node.port_id.as_raw())),
            QUEUE_ATTR_INDEX => Ok(Attribute::u32(*attr_id, node.index)),
            QUEUE_ATTR_PARENT_SCHEDULER_NODE => Ok(Attribute::oid(
                *attr_id,
                node.parent_group.map(|g| g.as_raw()).unwrap_or(0),
            )),
            QUEUE_ATTR_WRED_PROFILE_ID => Ok(Attribute::oid(
                *attr_id,
                node.wred_id.map(|w| w.as_raw()).unwrap_or(0),
            )),
            QUEUE_ATTR_BUFFER_PROFILE_ID => Ok(Attribute::oid(
                *attr_id,
                node.buffer_profile_id.map(|b| b.as_raw()).unwrap_or(0),
            )),
            QUEUE_ATTR_SCHEDULER_PROFILE_ID => {
                Ok(Attribute::oid(*attr_id, node.scheduler_id.as_raw()))
            }
            _ => Err(SaiError::UnknownAttribute {
                index,
                attr_id: *attr_id,
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Priority groups
// ---------------------------------------------------------------------------

fn create_pg_internal(ctx: &mut QosContext, port_id: PortOid, index: u8) -> SaiResult<PriorityGroupOid> {
    let attrs = [
        Attribute::oid(PRIORITY_GROUP_ATTR_PORT, port_id.as_raw()),
        Attribute::u8(PRIORITY_GROUP_ATTR_INDEX, index),
    ];
    let driver = ctx.driver();
    let raw = driver.priority_group().create(&attrs)?;
    let id = PriorityGroupOid::from_raw_unchecked(raw);
    if let Err(err) = ctx
        .priority_groups
        .insert(id, PriorityGroupNode::new(port_id, index))
    {
        if let Err(undo_err) = driver.priority_group().remove(raw) {
            warn!(pg = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    ctx.ports.get_mut(port_id)?.priority_groups.push(id);
    Ok(id)
}

fn destroy_pg(ctx: &mut QosContext, id: PriorityGroupOid) -> SaiResult<()> {
    let node = ctx.priority_groups.get(id)?;
    if node.buffer_profile_id.is_some() {
        return Err(SaiError::object_in_use(format!(
            "priority group {} still has a buffer profile",
            id
        )));
    }
    let port_id = node.port_id;
    ctx.driver().priority_group().remove(id.as_raw())?;
    ctx.priority_groups.remove(id)?;
    if let Ok(port) = ctx.ports.get_mut(port_id) {
        port.priority_groups.retain(|p| *p != id);
    }
    debug!(pg = %id, "priority group removed");
    Ok(())
}

pub(crate) fn pg_attr_set(ctx: &mut QosContext, id: PriorityGroupOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(std::slice::from_ref(attr), PRIORITY_GROUP_ATTR_TABLE, AttrOp::Set)?;
    let raw = attr.value.as_oid().ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;
    buffer_orch::update_buffer_profile(ctx, BufferConsumer::Pg(id), BufferProfileOid::from_raw(raw))
}

pub(crate) fn pg_attr_get(
    ctx: &QosContext,
    id: PriorityGroupOid,
    ids: &[AttrId],
) -> SaiResult<Vec<Attribute>> {
    let node = ctx.priority_groups.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| match *attr_id {
            PRIORITY_GROUP_ATTR_BUFFER_PROFILE => Ok(Attribute::oid(
                *attr_id,
                node.buffer_profile_id.map(|b| b.as_raw()).unwrap_or(0),
            )),
            PRIORITY_GROUP_ATTR_PORT => Ok(Attribute::oid(*attr_id, node.port_id.as_raw())),
            PRIORITY_GROUP_ATTR_INDEX => Ok(Attribute::u8(*attr_id, node.index)),
            _ => Err(SaiError::UnknownAttribute {
                index,
                attr_id: *attr_id,
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Port pools
// ---------------------------------------------------------------------------

pub(crate) fn port_pool_create(ctx: &mut QosContext, attrs: &[Attribute]) -> SaiResult<PortPoolOid> {
    validate_attributes(attrs, PORT_POOL_ATTR_TABLE, AttrOp::Create)?;

    let mut port_id = None;
    let mut pool_id = None;
    let mut wred = None;
    for (index, attr) in attrs.iter().enumerate() {
        let bad_value = || SaiError::InvalidAttrValue {
            index,
            attr_id: attr.id,
        };
        match attr.id {
            PORT_POOL_ATTR_PORT_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                port_id = Some(PortOid::from_raw(raw).ok_or_else(bad_value)?);
            }
            PORT_POOL_ATTR_BUFFER_POOL_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                pool_id = Some(BufferPoolOid::from_raw(raw).ok_or_else(bad_value)?);
            }
            PORT_POOL_ATTR_QOS_WRED_PROFILE_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                wred = WredOid::from_raw(raw);
            }
            _ => {}
        }
    }
    let port_id = port_id.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: PORT_POOL_ATTR_PORT_ID,
    })?;
    let pool_id = pool_id.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: PORT_POOL_ATTR_BUFFER_POOL_ID,
    })?;

    ctx.buffer_pools.get(pool_id)?;
    if let Some(wred_id) = wred {
        ctx.wred_profiles.get(wred_id)?;
    }
    let port = ctx.ports.get(port_id)?;
    for existing in &port.port_pools {
        if ctx.port_pools.get(*existing)?.pool_id == pool_id {
            return Err(SaiError::already_exists(format!(
                "port pool for {} on port {}",
                pool_id, port_id
            )));
        }
    }

    let driver = ctx.driver();
    let raw = driver.port_pool().create(attrs)?;
    let id = PortPoolOid::from_raw_unchecked(raw);
    if let Err(err) = ctx.port_pools.insert(
        id,
        PortPoolNode {
            port_id,
            pool_id,
            wred_id: wred,
        },
    ) {
        if let Err(undo_err) = driver.port_pool().remove(raw) {
            warn!(port_pool = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    ctx.ports.get_mut(port_id)?.port_pools.push(id);
    if let Some(wred_id) = wred {
        if let Ok(node) = ctx.wred_profiles.get_mut(wred_id) {
            node.port_pools.push(id);
        }
    }
    debug!(port_pool = %id, port = %port_id, pool = %pool_id, "port pool created");
    Ok(id)
}

pub(crate) fn destroy_port_pool(ctx: &mut QosContext, id: PortPoolOid) -> SaiResult<()> {
    let node = ctx.port_pools.get(id)?.clone();
    ctx.driver().port_pool().remove(id.as_raw())?;
    ctx.port_pools.remove(id)?;
    if let Ok(port) = ctx.ports.get_mut(node.port_id) {
        port.port_pools.retain(|p| *p != id);
    }
    if let Some(wred_id) = node.wred_id {
        if let Ok(wred) = ctx.wred_profiles.get_mut(wred_id) {
            wred.port_pools.retain(|p| *p != id);
        }
    }
    debug!(port_pool = %id, "port pool removed");
    Ok(())
}

pub(crate) fn port_pool_attr_set(ctx: &mut QosContext, id: PortPoolOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(std::slice::from_ref(attr), PORT_POOL_ATTR_TABLE, AttrOp::Set)?;
    let raw = attr.value.as_oid().ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;
    let wred = WredOid::from_raw(raw);

    let old = ctx.port_pools.get(id)?.wred_id;
    if old == wred {
        return Ok(());
    }
    if let Some(wred_id) = wred {
        ctx.wred_profiles.get(wred_id)?;
    }

    ctx.driver().port_pool().attr_set(id.as_raw(), attr)?;
    ctx.port_pools.get_mut(id)?.wred_id = wred;
    if let Some(old_id) = old {
        if let Ok(node) = ctx.wred_profiles.get_mut(old_id) {
            node.port_pools.retain(|p| *p != id);
        }
    }
    if let Some(new_id) = wred {
        if let Ok(node) = ctx.wred_profiles.get_mut(new_id) {
            if !node.port_pools.contains(&id) {
                node.port_pools.push(id);
            }
        }
    }
    Ok(())
}

pub(crate) fn port_pool_attr_get(
    ctx: &QosContext,
    id: PortPoolOid,
    ids: &[AttrId],
) -> SaiResult<Vec<Attribute>> {
    let node = ctx.port_pools.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| match *attr_id {
            PORT_POOL_ATTR_PORT_ID => Ok(Attribute::oid(*attr_id, node.port_id.as_raw())),
            PORT_POOL_ATTR_BUFFER_POOL_ID => Ok(Attribute::oid(*attr_id, node.pool_id.as_raw())),
            PORT_POOL_ATTR_QOS_WRED_PROFILE_ID => Ok(Attribute::oid(
                *attr_id,
                node.wred_id.map(|w| w.as_raw()).unwrap_or(0),
            )),
            _ => Err(SaiError::UnknownAttribute {
                index,
                attr_id: *attr_id,
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Port attributes
// ---------------------------------------------------------------------------

/// Rebinds a port's QoS map of the given type; `None` detaches.
fn port_set_map(
    ctx: &mut QosContext,
    port_id: PortOid,
    map_type: QosMapType,
    map: Option<QosMapOid>,
) -> SaiResult<()> {
    let old = ctx.ports.get(port_id)?.qos_maps.get(&map_type).copied();
    if old == map {
        return Ok(());
    }
    if let Some(map_id) = map {
        let node = ctx.qos_maps.get(map_id)?;
        if node.map_type != map_type {
            return Err(SaiError::invalid_parameter(format!(
                "qos map {} is {:?}, binding point expects {:?}",
                map_id, node.map_type, map_type
            )));
        }
    }

    let attr_id = match map_type {
        QosMapType::DscpToTc => PORT_ATTR_QOS_DSCP_TO_TC_MAP,
        QosMapType::TcToQueue => PORT_ATTR_QOS_TC_TO_QUEUE_MAP,
        _ => {
            return Err(SaiError::invalid_parameter(format!(
                "map type {:?} has no port binding point",
                map_type
            )))
        }
    };
    ctx.driver().port().attr_set(
        port_id.as_raw(),
        &Attribute::oid(attr_id, map.map(|m| m.as_raw()).unwrap_or(0)),
    )?;

    let port = ctx.ports.get_mut(port_id)?;
    match map {
        Some(map_id) => {
            port.qos_maps.insert(map_type, map_id);
        }
        None => {
            port.qos_maps.remove(&map_type);
        }
    }
    if let Some(old_id) = old {
        if let Ok(node) = ctx.qos_maps.get_mut(old_id) {
            node.ports.retain(|p| *p != port_id);
        }
    }
    if let Some(new_id) = map {
        if let Ok(node) = ctx.qos_maps.get_mut(new_id) {
            if !node.ports.contains(&port_id) {
                node.ports.push(port_id);
            }
        }
    }
    Ok(())
}

/// Rebinds a port's policer; `None` detaches.
fn port_set_policer(ctx: &mut QosContext, port_id: PortOid, policer: Option<PolicerOid>) -> SaiResult<()> {
    let old = ctx.ports.get(port_id)?.policer_id;
    if old == policer {
        return Ok(());
    }
    if let Some(policer_id) = policer {
        ctx.policers.get(policer_id)?;
    }

    ctx.driver().port().attr_set(
        port_id.as_raw(),
        &Attribute::oid(
            PORT_ATTR_POLICER_ID,
            policer.map(|p| p.as_raw()).unwrap_or(0),
        ),
    )?;

    ctx.ports.get_mut(port_id)?.policer_id = policer;
    if let Some(old_id) = old {
        if let Ok(node) = ctx.policers.get_mut(old_id) {
            node.ports.retain(|p| *p != port_id);
        }
    }
    if let Some(new_id) = policer {
        if let Ok(node) = ctx.policers.get_mut(new_id) {
            if !node.ports.contains(&port_id) {
                node.ports.push(port_id);
            }
        }
    }
    Ok(())
}

pub(crate) fn port_attr_set(ctx: &mut QosContext, id: PortOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(std::slice::from_ref(attr), PORT_ATTR_TABLE, AttrOp::Set)?;
    let raw = attr.value.as_oid().ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;
    match attr.id {
        PORT_ATTR_QOS_SCHEDULER_PROFILE_ID => {
            scheduler_orch::scheduler_set(ctx, SchedulerConsumer::Port(id), SchedulerOid::from_raw(raw))
        }
        PORT_ATTR_QOS_BUFFER_PROFILE_ID => buffer_orch::update_buffer_profile(
            ctx,
            BufferConsumer::Port(id),
            BufferProfileOid::from_raw(raw),
        ),
        PORT_ATTR_POLICER_ID => port_set_policer(ctx, id, PolicerOid::from_raw(raw)),
        PORT_ATTR_QOS_DSCP_TO_TC_MAP => {
            port_set_map(ctx, id, QosMapType::DscpToTc, QosMapOid::from_raw(raw))
        }
        PORT_ATTR_QOS_TC_TO_QUEUE_MAP => {
            port_set_map(ctx, id, QosMapType::TcToQueue, QosMapOid::from_raw(raw))
        }
        _ => Err(SaiError::InvalidAttribute {
            index: 0,
            attr_id: attr.id,
        }),
    }
}

pub(crate) fn port_attr_get(ctx: &QosContext, id: PortOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
    let node = ctx.ports.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| match *attr_id {
            PORT_ATTR_QOS_SCHEDULER_PROFILE_ID => {
                Ok(Attribute::oid(*attr_id, node.scheduler_id.as_raw()))
            }
            PORT_ATTR_QOS_BUFFER_PROFILE_ID => Ok(Attribute::oid(
                *attr_id,
                node.buffer_profile_id.map(|b| b.as_raw()).unwrap_or(0),
            )),
            PORT_ATTR_POLICER_ID => Ok(Attribute::oid(
                *attr_id,
                node.policer_id.map(|p| p.as_raw()).unwrap_or(0),
            )),
            PORT_ATTR_QOS_DSCP_TO_TC_MAP => Ok(Attribute::oid(
                *attr_id,
                node.qos_maps
                    .get(&QosMapType::DscpToTc)
                    .map(|m| m.as_raw())
                    .unwrap_or(0),
            )),
            PORT_ATTR_QOS_TC_TO_QUEUE_MAP => Ok(Attribute::oid(
                *attr_id,
                node.qos_maps
                    .get(&QosMapType::TcToQueue)
                    .map(|m| m.as_raw())
                    .unwrap_or(0),
            )),
            PORT_ATTR_QOS_QUEUE_LIST => Ok(Attribute::new(
                *attr_id,
                AttrValue::OidList(node.queues.iter().map(|q| q.as_raw()).collect()),
            )),
            PORT_ATTR_QOS_SCHED_GROUP_LIST => Ok(Attribute::new(
                *attr_id,
                AttrValue::OidList(node.all_groups().map(|g| g.as_raw()).collect()),
            )),
            PORT_ATTR_QOS_PRIORITY_GROUP_LIST => Ok(Attribute::new(
                *attr_id,
                AttrValue::OidList(node.priority_groups.iter().map(|p| p.as_raw()).collect()),
            )),
            _ => Err(SaiError::UnknownAttribute {
                index,
                attr_id: *attr_id,
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Public method tables
// ---------------------------------------------------------------------------

impl QosSwitch {
    /// Creates a port on demand and runs the full QoS init on it.
    pub fn port_create(&self) -> SaiResult<PortOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        create_and_init_port(&mut ctx)
    }

    /// De-initializes and removes a port. Fails while any child list is
    /// non-empty after de-init, or when a config detach fails.
    pub fn port_remove(&self, id: PortOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        deinit_and_remove_port(&mut ctx, id)
    }

    pub fn port_attr_set(&self, id: PortOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        port_attr_set(&mut ctx, id, attr)
    }

    pub fn port_attr_get(&self, id: PortOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        port_attr_get(&ctx, id, ids)
    }

    pub fn queue_create(&self, attrs: &[Attribute]) -> SaiResult<QueueOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        queue_create(&mut ctx, attrs)
    }

    pub fn queue_remove(&self, id: QueueOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        queue_remove(&mut ctx, id)
    }

    pub fn queue_attr_set(&self, id: QueueOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        queue_attr_set(&mut ctx, id, attr)
    }

    pub fn queue_attr_get(&self, id: QueueOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        queue_attr_get(&ctx, id, ids)
    }

    pub fn queue_stats_get(&self, id: QueueOid, counters: &[StatId]) -> SaiResult<Vec<u64>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        ctx.queues.get(id)?;
        ctx.driver().queue().stats_get(id.as_raw(), counters)
    }

    pub fn queue_stats_clear(&self, id: QueueOid, counters: &[StatId]) -> SaiResult<()> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        ctx.queues.get(id)?;
        ctx.driver().queue().stats_clear(id.as_raw(), counters)
    }

    pub fn pg_attr_set(&self, id: PriorityGroupOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        pg_attr_set(&mut ctx, id, attr)
    }

    pub fn pg_attr_get(&self, id: PriorityGroupOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        pg_attr_get(&ctx, id, ids)
    }

    pub fn pg_stats_get(&self, id: PriorityGroupOid, counters: &[StatId]) -> SaiResult<Vec<u64>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        ctx.priority_groups.get(id)?;
        ctx.driver().priority_group().stats_get(id.as_raw(), counters)
    }

    pub fn pg_stats_clear(&self, id: PriorityGroupOid, counters: &[StatId]) -> SaiResult<()> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        ctx.priority_groups.get(id)?;
        ctx.driver().priority_group().stats_clear(id.as_raw(), counters)
    }

    pub fn port_pool_create(&self, attrs: &[Attribute]) -> SaiResult<PortPoolOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        port_pool_create(&mut ctx, attrs)
    }

    pub fn port_pool_remove(&self, id: PortPoolOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        destroy_port_pool(&mut ctx, id)
    }

    pub fn port_pool_attr_set(&self, id: PortPoolOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        port_pool_attr_set(&mut ctx, id, attr)
    }

    pub fn port_pool_attr_get(&self, id: PortPoolOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        port_pool_attr_get(&ctx, id, ids)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sai_common::error::Status;
    use sai_vs::VsDriver;

    use crate::buffer::types::{
        BufferPoolType, BUFFER_POOL_ATTR_SIZE, BUFFER_POOL_ATTR_TYPE, BUFFER_PROFILE_ATTR_BUFFER_SIZE,
        BUFFER_PROFILE_ATTR_POOL_ID,
    };
    use crate::config::QosConfig;
    use crate::context::QosSwitch;
    use crate::qosmap::{pack_entry, QOS_MAP_ATTR_MAP_TO_VALUE_LIST, QOS_MAP_ATTR_TYPE};
    use crate::scheduler::types::SCHEDULER_ATTR_SCHEDULING_WEIGHT;
    use crate::wred::WRED_ATTR_GREEN_ENABLE;

    use super::*;

    fn flat_config() -> QosConfig {
        QosConfig {
            port_count: 1,
            uc_queue_count: 2,
            mc_queue_count: 1,
            pg_count: 2,
            hierarchy: None,
        }
    }

    fn setup() -> (Arc<VsDriver>, QosSwitch) {
        let driver = Arc::new(VsDriver::new());
        let switch = QosSwitch::new(driver.clone(), flat_config()).unwrap();
        switch.init().unwrap();
        (driver, switch)
    }

    fn the_port(switch: &QosSwitch) -> PortOid {
        let ctx = switch.lock();
        let id = ctx.ports.iter().next().unwrap().0;
        id
    }

    #[test]
    fn test_port_init_reaches_ready() {
        let (_, switch) = setup();
        let port = the_port(&switch);
        let ctx = switch.lock();
        let node = ctx.ports.get(port).unwrap();
        assert_eq!(node.state, PortQosState::Ready);
        assert_eq!(node.queues.len(), 3);
        assert_eq!(node.priority_groups.len(), 2);
        assert!(node.sched_groups.iter().all(|l| l.is_empty()));
    }

    #[test]
    fn test_port_remove_tears_everything_down() {
        let (driver, switch) = setup();
        let port = the_port(&switch);

        switch.port_remove(port).unwrap();
        let ctx = switch.lock();
        assert!(ctx.ports.is_empty());
        assert!(ctx.queues.is_empty());
        assert!(ctx.priority_groups.is_empty());
        // Only the default scheduler remains in the driver store.
        assert_eq!(driver.object_count(), 1);
    }

    #[test]
    fn test_port_create_on_demand() {
        let (_, switch) = setup();
        let port = switch.port_create().unwrap();
        let ctx = switch.lock();
        assert_eq!(ctx.ports.len(), 2);
        assert_eq!(ctx.ports.get(port).unwrap().state, PortQosState::Ready);
    }

    #[test]
    fn test_atomic_queue_create_under_driver_failure() {
        let (driver, switch) = setup();
        let port = the_port(&switch);
        let before = switch.lock().queues.len();

        driver.fail_after(0, Status::NoMemory);
        let err = switch
            .queue_create(&[
                Attribute::u32(QUEUE_ATTR_TYPE, QueueType::Unicast.as_u32()),
                Attribute::oid(QUEUE_ATTR_PORT, port.as_raw()),
                Attribute::u32(QUEUE_ATTR_INDEX, 7),
            ])
            .unwrap_err();
        assert!(matches!(err, SaiError::Status { .. }));
        assert_eq!(switch.lock().queues.len(), before);
    }

    #[test]
    fn test_duplicate_queue_index_rejected() {
        let (_, switch) = setup();
        let port = the_port(&switch);
        let err = switch
            .queue_create(&[
                Attribute::u32(QUEUE_ATTR_TYPE, QueueType::Unicast.as_u32()),
                Attribute::oid(QUEUE_ATTR_PORT, port.as_raw()),
                Attribute::u32(QUEUE_ATTR_INDEX, 0),
            ])
            .unwrap_err();
        assert!(matches!(err, SaiError::AlreadyExists { .. }));
    }

    #[test]
    fn test_queue_remove_guards() {
        let (_, switch) = setup();
        let port = the_port(&switch);
        let queue = {
            let ctx = switch.lock();
            ctx.ports.get(port).unwrap().queues[0]
        };

        // WRED association blocks removal.
        let wred = switch
            .wred_create(&[Attribute::bool(WRED_ATTR_GREEN_ENABLE, true)])
            .unwrap();
        switch
            .queue_attr_set(queue, &Attribute::oid(QUEUE_ATTR_WRED_PROFILE_ID, wred.as_raw()))
            .unwrap();
        assert!(matches!(
            switch.queue_remove(queue).unwrap_err(),
            SaiError::ObjectInUse { .. }
        ));
        switch
            .queue_attr_set(queue, &Attribute::oid(QUEUE_ATTR_WRED_PROFILE_ID, 0))
            .unwrap();

        // Non-default scheduler blocks removal.
        let sched = switch
            .scheduler_create(&[Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 3)])
            .unwrap();
        switch
            .queue_attr_set(
                queue,
                &Attribute::oid(QUEUE_ATTR_SCHEDULER_PROFILE_ID, sched.as_raw()),
            )
            .unwrap();
        assert!(matches!(
            switch.queue_remove(queue).unwrap_err(),
            SaiError::ObjectInUse { .. }
        ));
        switch
            .queue_attr_set(queue, &Attribute::oid(QUEUE_ATTR_SCHEDULER_PROFILE_ID, 0))
            .unwrap();

        // All associations gone: removal succeeds.
        switch.queue_remove(queue).unwrap();
    }

    #[test]
    fn test_port_deinit_detaches_nondefault_configs() {
        let (_, switch) = setup();
        let port = the_port(&switch);

        // Scheduler, map and policer bindings on the port.
        let sched = switch
            .scheduler_create(&[Attribute::u8(SCHEDULER_ATTR_SCHEDULING_WEIGHT, 5)])
            .unwrap();
        switch
            .port_attr_set(
                port,
                &Attribute::oid(PORT_ATTR_QOS_SCHEDULER_PROFILE_ID, sched.as_raw()),
            )
            .unwrap();
        let map = switch
            .qos_map_create(&[
                Attribute::u32(QOS_MAP_ATTR_TYPE, QosMapType::DscpToTc.as_u32()),
                Attribute::new(
                    QOS_MAP_ATTR_MAP_TO_VALUE_LIST,
                    AttrValue::U32List(vec![pack_entry(0, 1)]),
                ),
            ])
            .unwrap();
        switch
            .port_attr_set(port, &Attribute::oid(PORT_ATTR_QOS_DSCP_TO_TC_MAP, map.as_raw()))
            .unwrap();
        let policer = switch
            .policer_create(&[
                Attribute::u32(crate::policer::POLICER_ATTR_METER_TYPE, 1),
                Attribute::u32(crate::policer::POLICER_ATTR_MODE, 0),
            ])
            .unwrap();
        switch
            .port_attr_set(port, &Attribute::oid(PORT_ATTR_POLICER_ID, policer.as_raw()))
            .unwrap();

        switch.port_remove(port).unwrap();

        // All shared objects lost their references and are removable.
        switch.scheduler_remove(sched).unwrap();
        switch.qos_map_remove(map).unwrap();
        switch.policer_remove(policer).unwrap();
    }

    #[test]
    fn test_port_deinit_releases_buffer_accounting() {
        let (_, switch) = setup();
        let port = the_port(&switch);
        let pool = switch
            .buffer_pool_create(&[
                Attribute::u32(BUFFER_POOL_ATTR_TYPE, BufferPoolType::Ingress.as_u32()),
                Attribute::u64(BUFFER_POOL_ATTR_SIZE, 1000),
            ])
            .unwrap();
        let profile = switch
            .buffer_profile_create(&[
                Attribute::oid(BUFFER_PROFILE_ATTR_POOL_ID, pool.as_raw()),
                Attribute::u64(BUFFER_PROFILE_ATTR_BUFFER_SIZE, 300),
            ])
            .unwrap();
        let pg = {
            let ctx = switch.lock();
            ctx.ports.get(port).unwrap().priority_groups[0]
        };
        switch
            .pg_attr_set(
                pg,
                &Attribute::oid(PRIORITY_GROUP_ATTR_BUFFER_PROFILE, profile.as_raw()),
            )
            .unwrap();

        switch.port_remove(port).unwrap();

        // The PG detach released the profile's charge.
        let ctx = switch.lock();
        assert_eq!(ctx.buffer_pools.get(pool).unwrap().shared_size, 1000);
        assert_eq!(ctx.buffer_profiles.get(profile).unwrap().num_ref(), 0);
    }

    #[test]
    fn test_port_pool_lifecycle() {
        let (_, switch) = setup();
        let port = the_port(&switch);
        let pool = switch
            .buffer_pool_create(&[
                Attribute::u32(BUFFER_POOL_ATTR_TYPE, BufferPoolType::Egress.as_u32()),
                Attribute::u64(BUFFER_POOL_ATTR_SIZE, 1000),
            ])
            .unwrap();
        let wred = switch
            .wred_create(&[Attribute::bool(WRED_ATTR_GREEN_ENABLE, true)])
            .unwrap();

        let port_pool = switch
            .port_pool_create(&[
                Attribute::oid(PORT_POOL_ATTR_PORT_ID, port.as_raw()),
                Attribute::oid(PORT_POOL_ATTR_BUFFER_POOL_ID, pool.as_raw()),
            ])
            .unwrap();
        switch
            .port_pool_attr_set(
                port_pool,
                &Attribute::oid(PORT_POOL_ATTR_QOS_WRED_PROFILE_ID, wred.as_raw()),
            )
            .unwrap();

        // The WRED profile is now referenced and cannot be removed.
        assert!(matches!(
            switch.wred_remove(wred).unwrap_err(),
            SaiError::ObjectInUse { .. }
        ));

        // A second port pool for the same pool is rejected.
        assert!(matches!(
            switch
                .port_pool_create(&[
                    Attribute::oid(PORT_POOL_ATTR_PORT_ID, port.as_raw()),
                    Attribute::oid(PORT_POOL_ATTR_BUFFER_POOL_ID, pool.as_raw()),
                ])
                .unwrap_err(),
            SaiError::AlreadyExists { .. }
        ));

        // Port deinit removes the port pool and drops the WRED reference.
        switch.port_remove(port).unwrap();
        switch.wred_remove(wred).unwrap();
        switch.buffer_pool_remove(pool).unwrap();
    }

    #[test]
    fn test_queue_attr_get_reports_bindings() {
        let (_, switch) = setup();
        let port = the_port(&switch);
        let queue = {
            let ctx = switch.lock();
            ctx.ports.get(port).unwrap().queues[0]
        };

        let attrs = switch
            .queue_attr_get(
                queue,
                &[QUEUE_ATTR_TYPE, QUEUE_ATTR_PORT, QUEUE_ATTR_PARENT_SCHEDULER_NODE],
            )
            .unwrap();
        assert_eq!(attrs[0].value.as_u32(), Some(QueueType::Unicast.as_u32()));
        assert_eq!(attrs[1].value.as_oid(), Some(port.as_raw()));
        assert_eq!(attrs[2].value.as_oid(), Some(0));
    }

    #[test]
    fn test_port_attr_get_lists() {
        let (_, switch) = setup();
        let port = the_port(&switch);
        let attrs = switch
            .port_attr_get(
                port,
                &[PORT_ATTR_QOS_QUEUE_LIST, PORT_ATTR_QOS_PRIORITY_GROUP_LIST],
            )
            .unwrap();
        assert_eq!(attrs[0].value.as_oid_list().unwrap().len(), 3);
        assert_eq!(attrs[1].value.as_oid_list().unwrap().len(), 2);
    }
}

//! Buffer accounting engine.
//!
//! Pools are fixed-capacity resources; profiles draw from them and are
//! shared by ports, queues and priority groups. A profile's size is
//! charged to its pool once, while the profile has at least one consumer;
//! `pool_size_recalc` recomputes the pool's shared headroom from the
//! profile registry and pushes it to the driver.
//!
//! Invariant maintained across every operation:
//! `pool.shared_size + Σ(size of charged profiles) == pool.total_size`.

use std::slice;

use tracing::{debug, error, warn};

use sai_common::attr::{validate_attributes, AttrId, AttrOp, AttrValue, Attribute};
use sai_common::driver::{StatId, SwitchDriver};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{BufferPoolOid, BufferProfileOid, RawObjectId};

use crate::context::{QosContext, QosSwitch};
use crate::port::types::{
    PORT_ATTR_QOS_BUFFER_PROFILE_ID, PRIORITY_GROUP_ATTR_BUFFER_PROFILE,
    QUEUE_ATTR_BUFFER_PROFILE_ID,
};

use super::types::{
    BufferConsumer, BufferPoolNode, BufferPoolType, BufferProfileNode, ThresholdMode,
    BUFFER_POOL_ATTR_SHARED_SIZE, BUFFER_POOL_ATTR_SIZE, BUFFER_POOL_ATTR_TABLE,
    BUFFER_POOL_ATTR_THRESHOLD_MODE, BUFFER_POOL_ATTR_TYPE, BUFFER_PROFILE_ATTR_BUFFER_SIZE,
    BUFFER_PROFILE_ATTR_POOL_ID, BUFFER_PROFILE_ATTR_TABLE, BUFFER_PROFILE_ATTR_THRESHOLD_MODE,
};

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

pub(crate) fn pool_create(ctx: &mut QosContext, attrs: &[Attribute]) -> SaiResult<BufferPoolOid> {
    validate_attributes(attrs, BUFFER_POOL_ATTR_TABLE, AttrOp::Create)?;

    let mut pool_type = None;
    let mut size = None;
    let mut mode = ThresholdMode::default();
    for (index, attr) in attrs.iter().enumerate() {
        let bad_value = || SaiError::InvalidAttrValue {
            index,
            attr_id: attr.id,
        };
        match attr.id {
            BUFFER_POOL_ATTR_TYPE => {
                let raw = attr.value.as_u32().ok_or_else(bad_value)?;
                pool_type = Some(BufferPoolType::from_u32(raw).ok_or_else(bad_value)?);
            }
            BUFFER_POOL_ATTR_SIZE => size = Some(attr.value.as_u64().ok_or_else(bad_value)?),
            BUFFER_POOL_ATTR_THRESHOLD_MODE => {
                let raw = attr.value.as_u32().ok_or_else(bad_value)?;
                mode = ThresholdMode::from_u32(raw).ok_or_else(bad_value)?;
            }
            _ => {}
        }
    }
    // Both are mandatory in the table, so validation already guarantees
    // presence; the unwraps are encoded as errors anyway.
    let pool_type = pool_type.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: BUFFER_POOL_ATTR_TYPE,
    })?;
    let size = size.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: BUFFER_POOL_ATTR_SIZE,
    })?;

    let driver = ctx.driver();
    let raw = driver.buffer_pool().create(attrs)?;
    let id = BufferPoolOid::from_raw_unchecked(raw);
    if let Err(err) = ctx
        .buffer_pools
        .insert(id, BufferPoolNode::new(pool_type, mode, size))
    {
        if let Err(undo_err) = driver.buffer_pool().remove(raw) {
            warn!(pool = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    debug!(pool = %id, ?pool_type, size, "buffer pool created");
    Ok(id)
}

pub(crate) fn pool_remove(ctx: &mut QosContext, id: BufferPoolOid) -> SaiResult<()> {
    ctx.buffer_pools.get(id)?;
    let profiles = ctx
        .buffer_profiles
        .iter()
        .filter(|(_, p)| p.pool_id == id)
        .count();
    if profiles > 0 {
        return Err(SaiError::object_in_use(format!(
            "buffer pool {} has {} profiles",
            id, profiles
        )));
    }
    ctx.driver().buffer_pool().remove(id.as_raw())?;
    ctx.buffer_pools.remove(id)?;
    debug!(pool = %id, "buffer pool removed");
    Ok(())
}

pub(crate) fn pool_attr_set(ctx: &mut QosContext, id: BufferPoolOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(slice::from_ref(attr), BUFFER_POOL_ATTR_TABLE, AttrOp::Set)?;
    // Only the total size is settable.
    let new_total = attr.value.as_u64().ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;

    let pool = ctx.buffer_pools.get(id)?;
    let charged = pool.charged();
    if new_total < charged {
        return Err(SaiError::insufficient_resources(format!(
            "buffer pool {} resize to {} below {} bytes charged to profiles",
            id, new_total, charged
        )));
    }
    if new_total == pool.total_size {
        return Ok(());
    }

    ctx.driver().buffer_pool().attr_set(id.as_raw(), attr)?;
    let pool = ctx.buffer_pools.get_mut(id)?;
    pool.total_size = new_total;
    pool.shared_size = new_total - charged;
    debug!(pool = %id, total = new_total, shared = pool.shared_size, "buffer pool resized");
    Ok(())
}

pub(crate) fn pool_attr_get(
    ctx: &QosContext,
    id: BufferPoolOid,
    ids: &[AttrId],
) -> SaiResult<Vec<Attribute>> {
    let pool = ctx.buffer_pools.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| match *attr_id {
            BUFFER_POOL_ATTR_TYPE => Ok(Attribute::u32(*attr_id, pool.pool_type.as_u32())),
            BUFFER_POOL_ATTR_SIZE => Ok(Attribute::u64(*attr_id, pool.total_size)),
            BUFFER_POOL_ATTR_THRESHOLD_MODE => Ok(Attribute::u32(*attr_id, pool.mode.as_u32())),
            BUFFER_POOL_ATTR_SHARED_SIZE => Ok(Attribute::u64(*attr_id, pool.shared_size)),
            _ => Err(SaiError::UnknownAttribute {
                index,
                attr_id: *attr_id,
            }),
        })
        .collect()
}

/// Recomputes a pool's shared size from the profile registry and pushes it
/// to the driver; the cache is only updated after the driver accepts.
pub(crate) fn pool_size_recalc(ctx: &mut QosContext, id: BufferPoolOid) -> SaiResult<()> {
    let pool = ctx.buffer_pools.get(id)?;
    let charged: u64 = ctx
        .buffer_profiles
        .iter()
        .filter(|(_, p)| p.pool_id == id && p.is_charged())
        .map(|(_, p)| p.size)
        .sum();
    if charged > pool.total_size {
        return Err(SaiError::insufficient_resources(format!(
            "buffer pool {} overcommitted: {} charged of {}",
            id, charged, pool.total_size
        )));
    }
    let new_shared = pool.total_size - charged;
    if new_shared == pool.shared_size {
        return Ok(());
    }

    ctx.driver().buffer_pool().attr_set(
        id.as_raw(),
        &Attribute::u64(BUFFER_POOL_ATTR_SHARED_SIZE, new_shared),
    )?;
    ctx.buffer_pools.get_mut(id)?.shared_size = new_shared;
    debug!(pool = %id, shared = new_shared, "pool shared size recalculated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

pub(crate) fn profile_create(
    ctx: &mut QosContext,
    attrs: &[Attribute],
) -> SaiResult<BufferProfileOid> {
    validate_attributes(attrs, BUFFER_PROFILE_ATTR_TABLE, AttrOp::Create)?;

    let mut pool_id = None;
    let mut size = None;
    let mut mode = None;
    for (index, attr) in attrs.iter().enumerate() {
        let bad_value = || SaiError::InvalidAttrValue {
            index,
            attr_id: attr.id,
        };
        match attr.id {
            BUFFER_PROFILE_ATTR_POOL_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                pool_id = Some(
                    BufferPoolOid::from_raw(raw)
                        .ok_or_else(bad_value)?,
                );
            }
            BUFFER_PROFILE_ATTR_BUFFER_SIZE => {
                size = Some(attr.value.as_u64().ok_or_else(bad_value)?)
            }
            BUFFER_PROFILE_ATTR_THRESHOLD_MODE => {
                let raw = attr.value.as_u32().ok_or_else(bad_value)?;
                mode = Some(ThresholdMode::from_u32(raw).ok_or_else(bad_value)?);
            }
            _ => {}
        }
    }
    let pool_id = pool_id.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: BUFFER_PROFILE_ATTR_POOL_ID,
    })?;
    let size = size.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: BUFFER_PROFILE_ATTR_BUFFER_SIZE,
    })?;

    let pool = ctx.buffer_pools.get(pool_id)?;
    // The profile's threshold mode inherits the pool's unless stated, and
    // may not contradict it.
    let mode = match mode {
        Some(mode) if mode != pool.mode => {
            return Err(SaiError::invalid_parameter(format!(
                "profile threshold mode {:?} conflicts with pool {} mode {:?}",
                mode, pool_id, pool.mode
            )));
        }
        Some(mode) => mode,
        None => pool.mode,
    };

    let mut node = BufferProfileNode::new(pool_id, size, mode);
    for (index, attr) in attrs.iter().enumerate() {
        match attr.id {
            BUFFER_PROFILE_ATTR_POOL_ID
            | BUFFER_PROFILE_ATTR_BUFFER_SIZE
            | BUFFER_PROFILE_ATTR_THRESHOLD_MODE => {}
            _ => node.apply_attr(attr, index)?,
        }
    }

    let driver = ctx.driver();
    let raw = driver.buffer_profile().create(attrs)?;
    let id = BufferProfileOid::from_raw_unchecked(raw);
    if let Err(err) = ctx.buffer_profiles.insert(id, node) {
        if let Err(undo_err) = driver.buffer_profile().remove(raw) {
            warn!(profile = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }
    debug!(profile = %id, pool = %pool_id, size, "buffer profile created");
    Ok(id)
}

pub(crate) fn profile_remove(ctx: &mut QosContext, id: BufferProfileOid) -> SaiResult<()> {
    let node = ctx.buffer_profiles.get(id)?;
    if node.num_ref() > 0 {
        return Err(SaiError::object_in_use(format!(
            "buffer profile {} has {} consumers",
            id,
            node.num_ref()
        )));
    }
    ctx.driver().buffer_profile().remove(id.as_raw())?;
    ctx.buffer_profiles.remove(id)?;
    debug!(profile = %id, "buffer profile removed");
    Ok(())
}

pub(crate) fn profile_attr_get(
    ctx: &QosContext,
    id: BufferProfileOid,
    ids: &[AttrId],
) -> SaiResult<Vec<Attribute>> {
    let node = ctx.buffer_profiles.get(id)?;
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

/// Sets one buffer-profile attribute with capacity pre-check, three-phase
/// consumer fan-out and pool recalculation.
///
/// Fan-out order is ports, then queues, then priority groups; a failure
/// mid-fan-out reverts the applied prefix of the failed phase and every
/// completed phase in reverse order by re-applying the previous state.
pub(crate) fn profile_attr_set(
    ctx: &mut QosContext,
    id: BufferProfileOid,
    attr: &Attribute,
) -> SaiResult<()> {
    validate_attributes(slice::from_ref(attr), BUFFER_PROFILE_ATTR_TABLE, AttrOp::Set)?;

    if attr.id == BUFFER_PROFILE_ATTR_POOL_ID {
        return profile_pool_reassign(ctx, id, attr);
    }

    let node = ctx.buffer_profiles.get(id)?;
    let old_node = node.clone();
    if node.attr_value(attr.id) == Some(attr.value.clone()) {
        debug!(profile = %id, attr = attr.id, "duplicate profile attribute set, no-op");
        return Ok(());
    }
    let mut candidate = node.clone();
    candidate.apply_attr(attr, 0)?;

    // Capacity pre-check: a size change on a charged profile needs the
    // delta available in the destination pool before anything is applied.
    if attr.id == BUFFER_PROFILE_ATTR_BUFFER_SIZE && old_node.is_charged() {
        let pool = ctx.buffer_pools.get(old_node.pool_id)?;
        if candidate.size > old_node.size {
            let needed = candidate.size - old_node.size;
            if pool.shared_size < needed {
                return Err(SaiError::insufficient_resources(format!(
                    "pool {} has {} shared bytes, profile {} growth needs {}",
                    old_node.pool_id, pool.shared_size, id, needed
                )));
            }
        }
    }

    let old_attr = Attribute::new(
        attr.id,
        old_node.attr_value(attr.id).unwrap_or(AttrValue::U64(0)),
    );

    let driver = ctx.driver();
    driver.buffer_profile().attr_set(id.as_raw(), attr)?;
    if let Err(err) = reapply_profile(ctx, id, &old_attr) {
        return Err(err);
    }

    let pool_id = old_node.pool_id;
    let size_changed = candidate.size != old_node.size;
    let charged = old_node.is_charged();
    *ctx.buffer_profiles.get_mut(id)? = candidate;

    if size_changed && charged {
        if let Err(err) = pool_size_recalc(ctx, pool_id) {
            // Revert the profile change: cache, driver object, consumers.
            *ctx.buffer_profiles.get_mut(id)? = old_node;
            if let Err(undo_err) = driver.buffer_profile().attr_set(id.as_raw(), &old_attr) {
                warn!(profile = %id, error = %undo_err, "driver revert after recalc failure failed");
            }
            if let Err(undo_err) = reapply_profile(ctx, id, attr) {
                warn!(profile = %id, error = %undo_err, "consumer revert after recalc failure failed");
            }
            return Err(err);
        }
    }
    debug!(profile = %id, attr = attr.id, "buffer profile attribute set");
    Ok(())
}

/// Moves a profile to another pool: full old size released from the old
/// pool, full new size charged to the new pool.
fn profile_pool_reassign(
    ctx: &mut QosContext,
    id: BufferProfileOid,
    attr: &Attribute,
) -> SaiResult<()> {
    let raw = attr.value.as_oid().ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;
    let new_pool_id = BufferPoolOid::from_raw(raw).ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;

    let old_node = ctx.buffer_profiles.get(id)?.clone();
    let old_pool_id = old_node.pool_id;
    if new_pool_id == old_pool_id {
        return Ok(());
    }

    let old_pool = ctx.buffer_pools.get(old_pool_id)?;
    let new_pool = ctx.buffer_pools.get(new_pool_id)?;
    if new_pool.pool_type != old_pool.pool_type {
        return Err(SaiError::invalid_parameter(format!(
            "cannot move profile {} across pool types ({:?} to {:?})",
            id, old_pool.pool_type, new_pool.pool_type
        )));
    }
    if new_pool.mode != old_node.mode {
        return Err(SaiError::invalid_parameter(format!(
            "pool {} threshold mode {:?} incompatible with profile {}",
            new_pool_id, new_pool.mode, id
        )));
    }
    if old_node.is_charged() && new_pool.shared_size < old_node.size {
        return Err(SaiError::insufficient_resources(format!(
            "pool {} has {} shared bytes, profile {} needs {}",
            new_pool_id, new_pool.shared_size, id, old_node.size
        )));
    }

    let old_attr = Attribute::oid(BUFFER_PROFILE_ATTR_POOL_ID, old_pool_id.as_raw());
    let driver = ctx.driver();
    driver.buffer_profile().attr_set(id.as_raw(), attr)?;
    if let Err(err) = reapply_profile(ctx, id, &old_attr) {
        return Err(err);
    }

    ctx.buffer_profiles.get_mut(id)?.pool_id = new_pool_id;
    let result = pool_size_recalc(ctx, old_pool_id).and_then(|_| pool_size_recalc(ctx, new_pool_id));
    if let Err(err) = result {
        ctx.buffer_profiles.get_mut(id)?.pool_id = old_pool_id;
        if let Err(undo_err) = driver.buffer_profile().attr_set(id.as_raw(), &old_attr) {
            warn!(profile = %id, error = %undo_err, "driver revert after recalc failure failed");
        }
        if let Err(undo_err) = reapply_profile(ctx, id, attr) {
            warn!(profile = %id, error = %undo_err, "consumer revert after recalc failure failed");
        }
        for pool in [old_pool_id, new_pool_id] {
            if let Err(undo_err) = pool_size_recalc(ctx, pool) {
                warn!(pool = %pool, error = %undo_err, "pool resettle after recalc failure failed");
            }
        }
        return Err(err);
    }
    debug!(profile = %id, from = %old_pool_id, to = %new_pool_id, "buffer profile pool reassigned");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ports,
    Queues,
    Pgs,
}

/// Re-pushes the profile binding to every attached consumer: ports, then
/// queues, then priority groups, with counted compensation.
fn reapply_profile(
    ctx: &mut QosContext,
    id: BufferProfileOid,
    restore_attr: &Attribute,
) -> SaiResult<()> {
    let node = ctx.buffer_profiles.get(id)?;
    let phases: [(Phase, Vec<RawObjectId>); 3] = [
        (Phase::Ports, node.ports.iter().map(|p| p.as_raw()).collect()),
        (Phase::Queues, node.queues.iter().map(|q| q.as_raw()).collect()),
        (Phase::Pgs, node.pgs.iter().map(|p| p.as_raw()).collect()),
    ];

    let driver = ctx.driver();
    for (phase_index, (phase, consumers)) in phases.iter().enumerate() {
        for (applied, consumer) in consumers.iter().enumerate() {
            if let Err(err) = push_profile_binding(driver.as_ref(), *phase, *consumer, id.as_raw())
            {
                warn!(
                    profile = %id,
                    phase = ?phase,
                    consumer = format_args!("0x{:x}", consumer),
                    error = %err,
                    "profile fan-out failed, reverting"
                );
                if let Err(undo_err) = driver.buffer_profile().attr_set(id.as_raw(), restore_attr) {
                    warn!(profile = %id, error = %undo_err, "restoring old profile state in driver failed");
                }
                for prev in consumers[..applied].iter().rev() {
                    if let Err(undo_err) =
                        push_profile_binding(driver.as_ref(), *phase, *prev, id.as_raw())
                    {
                        warn!(error = %undo_err, "profile revert push failed");
                    }
                }
                for (prev_phase, prev_consumers) in phases[..phase_index].iter().rev() {
                    for prev in prev_consumers.iter().rev() {
                        if let Err(undo_err) =
                            push_profile_binding(driver.as_ref(), *prev_phase, *prev, id.as_raw())
                        {
                            warn!(error = %undo_err, "profile revert push failed");
                        }
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

fn push_profile_binding(
    driver: &dyn SwitchDriver,
    phase: Phase,
    consumer: RawObjectId,
    profile: RawObjectId,
) -> SaiResult<()> {
    match phase {
        Phase::Ports => driver.port().attr_set(
            consumer,
            &Attribute::oid(PORT_ATTR_QOS_BUFFER_PROFILE_ID, profile),
        ),
        Phase::Queues => driver.queue().attr_set(
            consumer,
            &Attribute::oid(QUEUE_ATTR_BUFFER_PROFILE_ID, profile),
        ),
        Phase::Pgs => driver.priority_group().attr_set(
            consumer,
            &Attribute::oid(PRIORITY_GROUP_ATTR_BUFFER_PROFILE, profile),
        ),
    }
}

// ---------------------------------------------------------------------------
// Generic attach / detach
// ---------------------------------------------------------------------------

fn consumer_binding(ctx: &QosContext, consumer: BufferConsumer) -> SaiResult<Option<BufferProfileOid>> {
    match consumer {
        BufferConsumer::Port(id) => Ok(ctx.ports.get(id)?.buffer_profile_id),
        BufferConsumer::Queue(id) => Ok(ctx.queues.get(id)?.buffer_profile_id),
        BufferConsumer::Pg(id) => Ok(ctx.priority_groups.get(id)?.buffer_profile_id),
    }
}

fn set_consumer_binding(
    ctx: &mut QosContext,
    consumer: BufferConsumer,
    profile: Option<BufferProfileOid>,
) -> SaiResult<()> {
    match consumer {
        BufferConsumer::Port(id) => ctx.ports.get_mut(id)?.buffer_profile_id = profile,
        BufferConsumer::Queue(id) => ctx.queues.get_mut(id)?.buffer_profile_id = profile,
        BufferConsumer::Pg(id) => ctx.priority_groups.get_mut(id)?.buffer_profile_id = profile,
    }
    Ok(())
}

fn push_consumer_binding(
    ctx: &QosContext,
    consumer: BufferConsumer,
    profile: Option<BufferProfileOid>,
) -> SaiResult<()> {
    let raw = profile.map(|p| p.as_raw()).unwrap_or(0);
    let driver = ctx.driver();
    match consumer {
        BufferConsumer::Port(id) => driver.port().attr_set(
            id.as_raw(),
            &Attribute::oid(PORT_ATTR_QOS_BUFFER_PROFILE_ID, raw),
        ),
        BufferConsumer::Queue(id) => driver.queue().attr_set(
            id.as_raw(),
            &Attribute::oid(QUEUE_ATTR_BUFFER_PROFILE_ID, raw),
        ),
        BufferConsumer::Pg(id) => driver.priority_group().attr_set(
            id.as_raw(),
            &Attribute::oid(PRIORITY_GROUP_ATTR_BUFFER_PROFILE, raw),
        ),
    }
}

fn link_consumer(node: &mut BufferProfileNode, consumer: BufferConsumer) {
    match consumer {
        BufferConsumer::Port(id) => {
            if !node.ports.contains(&id) {
                node.ports.push(id);
            }
        }
        BufferConsumer::Queue(id) => {
            if !node.queues.contains(&id) {
                node.queues.push(id);
            }
        }
        BufferConsumer::Pg(id) => {
            if !node.pgs.contains(&id) {
                node.pgs.push(id);
            }
        }
    }
}

fn unlink_consumer(node: &mut BufferProfileNode, consumer: BufferConsumer) {
    match consumer {
        BufferConsumer::Port(id) => node.ports.retain(|p| *p != id),
        BufferConsumer::Queue(id) => node.queues.retain(|q| *q != id),
        BufferConsumer::Pg(id) => node.pgs.retain(|p| *p != id),
    }
}

/// Attaches, detaches or replaces the buffer profile of any consumer kind.
///
/// Capacity deltas are edge-based: a profile is charged to its pool when
/// it gains its first consumer and released when it loses its last. A
/// same-pool replacement therefore checks the net delta; a cross-pool
/// replacement releases the full old size from the old pool and charges
/// the full new size to the new pool.
pub(crate) fn update_buffer_profile(
    ctx: &mut QosContext,
    consumer: BufferConsumer,
    new_profile: Option<BufferProfileOid>,
) -> SaiResult<()> {
    let old_profile = consumer_binding(ctx, consumer)?;
    if old_profile == new_profile {
        debug!(%consumer, "duplicate buffer profile set, no-op");
        return Ok(());
    }

    // Validate the new profile and its pool against the consumer kind.
    if let Some(np) = new_profile {
        let node = ctx.buffer_profiles.get(np)?;
        let pool = ctx.buffer_pools.get(node.pool_id)?;
        let compatible = match consumer {
            BufferConsumer::Pg(_) => pool.pool_type.serves_ingress(),
            BufferConsumer::Queue(_) => pool.pool_type.serves_egress(),
            BufferConsumer::Port(_) => true,
        };
        if !compatible {
            return Err(SaiError::invalid_parameter(format!(
                "pool {} type {:?} cannot serve {}",
                node.pool_id, pool.pool_type, consumer
            )));
        }
        if let Some(op) = old_profile {
            let old_mode = ctx.buffer_profiles.get(op)?.mode;
            if old_mode != node.mode {
                return Err(SaiError::invalid_parameter(format!(
                    "threshold mode change {:?} to {:?} not allowed on {}",
                    old_mode, node.mode, consumer
                )));
            }
        }
    }

    // Capacity pre-check on the num_ref 0↔1 edges.
    let old_release = match old_profile {
        Some(op) => {
            let node = ctx.buffer_profiles.get(op)?;
            (node.num_ref() == 1).then_some((node.pool_id, node.size))
        }
        None => None,
    };
    let new_charge = match new_profile {
        Some(np) => {
            let node = ctx.buffer_profiles.get(np)?;
            (node.num_ref() == 0).then_some((node.pool_id, node.size))
        }
        None => None,
    };
    match (old_release, new_charge) {
        (Some((old_pool, released)), Some((new_pool, charged))) if old_pool == new_pool => {
            let pool = ctx.buffer_pools.get(new_pool)?;
            if charged > released && pool.shared_size < charged - released {
                return Err(SaiError::insufficient_resources(format!(
                    "pool {} has {} shared bytes, rebind needs {}",
                    new_pool,
                    pool.shared_size,
                    charged - released
                )));
            }
        }
        (_, Some((new_pool, charged))) => {
            let pool = ctx.buffer_pools.get(new_pool)?;
            if pool.shared_size < charged {
                return Err(SaiError::insufficient_resources(format!(
                    "pool {} has {} shared bytes, profile needs {}",
                    new_pool, pool.shared_size, charged
                )));
            }
        }
        _ => {}
    }

    // One driver call for the consumer binding.
    if let Err(err) = push_consumer_binding(ctx, consumer, new_profile) {
        // Best-effort re-apply of the previous profile.
        if let Err(undo_err) = push_consumer_binding(ctx, consumer, old_profile) {
            warn!(%consumer, error = %undo_err, "re-applying previous buffer profile failed");
        }
        return Err(err);
    }

    // Cache: consumer field plus both back-link lists.
    set_consumer_binding(ctx, consumer, new_profile)?;
    if let Some(op) = old_profile {
        if let Ok(node) = ctx.buffer_profiles.get_mut(op) {
            unlink_consumer(node, consumer);
        }
    }
    if let Some(np) = new_profile {
        if let Ok(node) = ctx.buffer_profiles.get_mut(np) {
            link_consumer(node, consumer);
        }
    }

    // Accounting: recalc the affected pools.
    let mut pools = Vec::new();
    if let Some(op) = old_profile {
        pools.push(ctx.buffer_profiles.get(op)?.pool_id);
    }
    if let Some(np) = new_profile {
        let pool = ctx.buffer_profiles.get(np)?.pool_id;
        if !pools.contains(&pool) {
            pools.push(pool);
        }
    }
    for (index, pool) in pools.iter().enumerate() {
        if let Err(err) = pool_size_recalc(ctx, *pool) {
            error!(%consumer, pool = %pool, error = %err, "pool recalc failed, reverting rebind");
            // Restore links and field.
            if let Some(np) = new_profile {
                if let Ok(node) = ctx.buffer_profiles.get_mut(np) {
                    unlink_consumer(node, consumer);
                }
            }
            if let Some(op) = old_profile {
                if let Ok(node) = ctx.buffer_profiles.get_mut(op) {
                    link_consumer(node, consumer);
                }
            }
            if let Err(undo_err) = set_consumer_binding(ctx, consumer, old_profile) {
                warn!(%consumer, error = %undo_err, "restoring consumer binding failed");
            }
            if let Err(undo_err) = push_consumer_binding(ctx, consumer, old_profile) {
                warn!(%consumer, error = %undo_err, "re-applying previous buffer profile failed");
            }
            // Settle any pool already recalculated back to the old state.
            for prev in pools[..index].iter() {
                if let Err(undo_err) = pool_size_recalc(ctx, *prev) {
                    warn!(pool = %prev, error = %undo_err, "pool resettle failed");
                }
            }
            return Err(err);
        }
    }

    debug!(%consumer, old = ?old_profile.map(|p| p.to_string()), new = ?new_profile.map(|p| p.to_string()), "buffer profile binding updated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Public method table
// ---------------------------------------------------------------------------

impl QosSwitch {
    pub fn buffer_pool_create(&self, attrs: &[Attribute]) -> SaiResult<BufferPoolOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        pool_create(&mut ctx, attrs)
    }

    pub fn buffer_pool_remove(&self, id: BufferPoolOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        pool_remove(&mut ctx, id)
    }

    pub fn buffer_pool_attr_set(&self, id: BufferPoolOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        pool_attr_set(&mut ctx, id, attr)
    }

    pub fn buffer_pool_attr_get(&self, id: BufferPoolOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        pool_attr_get(&ctx, id, ids)
    }

    pub fn buffer_pool_stats_get(&self, id: BufferPoolOid, counters: &[StatId]) -> SaiResult<Vec<u64>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        ctx.buffer_pools.get(id)?;
        ctx.driver().buffer_pool().stats_get(id.as_raw(), counters)
    }

    pub fn buffer_pool_stats_clear(&self, id: BufferPoolOid, counters: &[StatId]) -> SaiResult<()> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        ctx.buffer_pools.get(id)?;
        ctx.driver().buffer_pool().stats_clear(id.as_raw(), counters)
    }

    pub fn buffer_profile_create(&self, attrs: &[Attribute]) -> SaiResult<BufferProfileOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        profile_create(&mut ctx, attrs)
    }

    pub fn buffer_profile_remove(&self, id: BufferProfileOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        profile_remove(&mut ctx, id)
    }

    pub fn buffer_profile_attr_set(&self, id: BufferProfileOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        profile_attr_set(&mut ctx, id, attr)
    }

    pub fn buffer_profile_attr_get(
        &self,
        id: BufferProfileOid,
        ids: &[AttrId],
    ) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        profile_attr_get(&ctx, id, ids)
    }

    /// Attaches, detaches (`None`) or replaces the buffer profile of a
    /// port, queue or priority group.
    pub fn buffer_profile_bind(
        &self,
        consumer: BufferConsumer,
        profile: Option<BufferProfileOid>,
    ) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        update_buffer_profile(&mut ctx, consumer, profile)
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

    use super::*;

    fn setup() -> (Arc<VsDriver>, QosSwitch) {
        let driver = Arc::new(VsDriver::new());
        let config = QosConfig {
            port_count: 1,
            uc_queue_count: 4,
            mc_queue_count: 0,
            pg_count: 2,
            hierarchy: None,
        };
        let switch = QosSwitch::new(driver.clone(), config).unwrap();
        switch.init().unwrap();
        (driver, switch)
    }

    fn create_pool(switch: &QosSwitch, pool_type: BufferPoolType, size: u64) -> BufferPoolOid {
        switch
            .buffer_pool_create(&[
                Attribute::u32(BUFFER_POOL_ATTR_TYPE, pool_type.as_u32()),
                Attribute::u64(BUFFER_POOL_ATTR_SIZE, size),
            ])
            .unwrap()
    }

    fn create_profile(switch: &QosSwitch, pool: BufferPoolOid, size: u64) -> BufferProfileOid {
        switch
            .buffer_profile_create(&[
                Attribute::oid(BUFFER_PROFILE_ATTR_POOL_ID, pool.as_raw()),
                Attribute::u64(BUFFER_PROFILE_ATTR_BUFFER_SIZE, size),
            ])
            .unwrap()
    }

    fn shared_size(switch: &QosSwitch, pool: BufferPoolOid) -> u64 {
        switch
            .buffer_pool_attr_get(pool, &[BUFFER_POOL_ATTR_SHARED_SIZE])
            .unwrap()[0]
            .value
            .as_u64()
            .unwrap()
    }

    fn queues(switch: &QosSwitch) -> Vec<QueueOid> {
        let ctx = switch.lock();
        let (_, port) = ctx.ports.iter().next().unwrap();
        port.queues.clone()
    }

    #[test]
    fn test_pool_create_starts_uncharged() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        assert_eq!(shared_size(&switch, pool), 1000);
    }

    #[test]
    fn test_atomic_profile_create_under_driver_failure() {
        let (driver, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        let before = switch.lock().buffer_profiles.len();

        driver.fail_after(0, Status::NoMemory);
        let err = switch
            .buffer_profile_create(&[
                Attribute::oid(BUFFER_PROFILE_ATTR_POOL_ID, pool.as_raw()),
                Attribute::u64(BUFFER_PROFILE_ATTR_BUFFER_SIZE, 400),
            ])
            .unwrap_err();
        assert!(matches!(err, SaiError::Status { .. }));
        assert_eq!(switch.lock().buffer_profiles.len(), before);
    }

    #[test]
    fn test_profile_charged_once_across_consumers() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        let profile = create_profile(&switch, pool, 400);
        let queue_ids = queues(&switch);

        // First consumer charges the profile to the pool.
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(profile))
            .unwrap();
        assert_eq!(shared_size(&switch, pool), 600);

        // A second consumer does not charge again.
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[1]), Some(profile))
            .unwrap();
        assert_eq!(shared_size(&switch, pool), 600);
        assert_eq!(switch.lock().buffer_profiles.get(profile).unwrap().num_ref(), 2);

        // Detaching one keeps the charge; detaching the last releases it.
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), None)
            .unwrap();
        assert_eq!(shared_size(&switch, pool), 600);
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[1]), None)
            .unwrap();
        assert_eq!(shared_size(&switch, pool), 1000);
    }

    #[test]
    fn test_capacity_conservation_invariant() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        let a = create_profile(&switch, pool, 400);
        let b = create_profile(&switch, pool, 300);
        let queue_ids = queues(&switch);

        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(a))
            .unwrap();
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[1]), Some(b))
            .unwrap();

        let ctx = switch.lock();
        let pool_node = ctx.buffer_pools.get(pool).unwrap();
        let charged: u64 = ctx
            .buffer_profiles
            .iter()
            .filter(|(_, p)| p.pool_id == pool && p.is_charged())
            .map(|(_, p)| p.size)
            .sum();
        assert_eq!(pool_node.shared_size + charged, pool_node.total_size);
    }

    #[test]
    fn test_insufficient_resources_on_attach() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 500);
        let a = create_profile(&switch, pool, 400);
        let b = create_profile(&switch, pool, 200);
        let queue_ids = queues(&switch);

        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(a))
            .unwrap();
        let err = switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[1]), Some(b))
            .unwrap_err();
        assert!(matches!(err, SaiError::InsufficientResources { .. }));
        // Nothing changed.
        assert_eq!(shared_size(&switch, pool), 100);
        let ctx = switch.lock();
        assert_eq!(ctx.queues.get(queue_ids[1]).unwrap().buffer_profile_id, None);
    }

    #[test]
    fn test_insufficient_resources_on_grow() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        let profile = create_profile(&switch, pool, 400);
        let queue_ids = queues(&switch);
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(profile))
            .unwrap();

        // Growth by 700 exceeds the 600 bytes the pool still has shared.
        let err = switch
            .buffer_profile_attr_set(profile, &Attribute::u64(BUFFER_PROFILE_ATTR_BUFFER_SIZE, 1100))
            .unwrap_err();
        assert!(matches!(err, SaiError::InsufficientResources { .. }));

        let attrs = switch
            .buffer_profile_attr_get(profile, &[BUFFER_PROFILE_ATTR_BUFFER_SIZE])
            .unwrap();
        assert_eq!(attrs[0].value.as_u64(), Some(400));
        assert_eq!(shared_size(&switch, pool), 600);
    }

    #[test]
    fn test_size_change_recharges_pool() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        let profile = create_profile(&switch, pool, 400);
        let queue_ids = queues(&switch);
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(profile))
            .unwrap();

        switch
            .buffer_profile_attr_set(profile, &Attribute::u64(BUFFER_PROFILE_ATTR_BUFFER_SIZE, 500))
            .unwrap();
        assert_eq!(shared_size(&switch, pool), 500);

        switch
            .buffer_profile_attr_set(profile, &Attribute::u64(BUFFER_PROFILE_ATTR_BUFFER_SIZE, 100))
            .unwrap();
        assert_eq!(shared_size(&switch, pool), 900);
    }

    #[test]
    fn test_profile_remove_guards() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        let profile = create_profile(&switch, pool, 400);
        let queue_ids = queues(&switch);

        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(profile))
            .unwrap();
        assert!(matches!(
            switch.buffer_profile_remove(profile).unwrap_err(),
            SaiError::ObjectInUse { .. }
        ));

        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), None)
            .unwrap();
        switch.buffer_profile_remove(profile).unwrap();
    }

    #[test]
    fn test_pool_remove_guards() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        let profile = create_profile(&switch, pool, 400);

        assert!(matches!(
            switch.buffer_pool_remove(pool).unwrap_err(),
            SaiError::ObjectInUse { .. }
        ));
        switch.buffer_profile_remove(profile).unwrap();
        switch.buffer_pool_remove(pool).unwrap();
    }

    #[test]
    fn test_pg_requires_ingress_pool() {
        let (_, switch) = setup();
        let egress = create_pool(&switch, BufferPoolType::Egress, 1000);
        let profile = create_profile(&switch, egress, 100);
        let pg = {
            let ctx = switch.lock();
            let (_, port) = ctx.ports.iter().next().unwrap();
            port.priority_groups[0]
        };

        let err = switch
            .buffer_profile_bind(BufferConsumer::Pg(pg), Some(profile))
            .unwrap_err();
        assert!(matches!(err, SaiError::InvalidParameter { .. }));
    }

    #[test]
    fn test_pg_attach_accounts_on_ingress_pool() {
        let (_, switch) = setup();
        let ingress = create_pool(&switch, BufferPoolType::Ingress, 2000);
        let profile = create_profile(&switch, ingress, 700);
        let pg = {
            let ctx = switch.lock();
            let (_, port) = ctx.ports.iter().next().unwrap();
            port.priority_groups[0]
        };

        switch
            .buffer_profile_bind(BufferConsumer::Pg(pg), Some(profile))
            .unwrap();
        assert_eq!(shared_size(&switch, ingress), 1300);
        let ctx = switch.lock();
        assert_eq!(
            ctx.priority_groups.get(pg).unwrap().buffer_profile_id,
            Some(profile)
        );
    }

    #[test]
    fn test_cross_pool_replacement_moves_full_sizes() {
        let (_, switch) = setup();
        let pool_a = create_pool(&switch, BufferPoolType::Egress, 1000);
        let pool_b = create_pool(&switch, BufferPoolType::Egress, 800);
        let a = create_profile(&switch, pool_a, 400);
        let b = create_profile(&switch, pool_b, 300);
        let queue_ids = queues(&switch);

        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(a))
            .unwrap();
        assert_eq!(shared_size(&switch, pool_a), 600);

        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(b))
            .unwrap();
        assert_eq!(shared_size(&switch, pool_a), 1000);
        assert_eq!(shared_size(&switch, pool_b), 500);
    }

    #[test]
    fn test_pool_shrink_below_charge_rejected() {
        let (_, switch) = setup();
        let pool = create_pool(&switch, BufferPoolType::Egress, 1000);
        let profile = create_profile(&switch, pool, 400);
        let queue_ids = queues(&switch);
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(profile))
            .unwrap();

        let err = switch
            .buffer_pool_attr_set(pool, &Attribute::u64(BUFFER_POOL_ATTR_SIZE, 300))
            .unwrap_err();
        assert!(matches!(err, SaiError::InsufficientResources { .. }));

        switch
            .buffer_pool_attr_set(pool, &Attribute::u64(BUFFER_POOL_ATTR_SIZE, 2000))
            .unwrap();
        assert_eq!(shared_size(&switch, pool), 1600);
    }

    #[test]
    fn test_pool_reassign_attr() {
        let (_, switch) = setup();
        let pool_a = create_pool(&switch, BufferPoolType::Egress, 1000);
        let pool_b = create_pool(&switch, BufferPoolType::Egress, 1000);
        let profile = create_profile(&switch, pool_a, 250);
        let queue_ids = queues(&switch);
        switch
            .buffer_profile_bind(BufferConsumer::Queue(queue_ids[0]), Some(profile))
            .unwrap();

        switch
            .buffer_profile_attr_set(
                profile,
                &Attribute::oid(BUFFER_PROFILE_ATTR_POOL_ID, pool_b.as_raw()),
            )
            .unwrap();
        assert_eq!(shared_size(&switch, pool_a), 1000);
        assert_eq!(shared_size(&switch, pool_b), 750);
    }

    #[test]
    fn test_pool_reassign_across_types_rejected() {
        let (_, switch) = setup();
        let egress = create_pool(&switch, BufferPoolType::Egress, 1000);
        let ingress = create_pool(&switch, BufferPoolType::Ingress, 1000);
        let profile = create_profile(&switch, egress, 250);

        let err = switch
            .buffer_profile_attr_set(
                profile,
                &Attribute::oid(BUFFER_PROFILE_ATTR_POOL_ID, ingress.as_raw()),
            )
            .unwrap_err();
        assert!(matches!(err, SaiError::InvalidParameter { .. }));
    }
}

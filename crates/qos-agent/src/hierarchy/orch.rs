//! Scheduler-group hierarchy builder.
//!
//! Builds and mutates the per-port tree of scheduler groups and queues.
//! `port_hierarchy_init` constructs the configured tree level by level from
//! the declarative template, recording every committed step in an undo log
//! so a failure at any point tears the partial tree down again — atomicity
//! at the scope of one port.
//!
//! The batch child operations drive the one driver entry point that can
//! partially succeed: the driver reports how many children it applied
//! before failing, and exactly that prefix is compensated with the reverse
//! operation.

use tracing::{debug, error, warn};

use sai_common::attr::{validate_attributes, AttrId, AttrOp, AttrValue, Attribute};
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{PortOid, QueueOid, RawObjectId, SchedGroupOid, SchedulerOid};

use crate::context::{QosContext, QosSwitch};
use crate::port::types::QueueType;
use crate::scheduler::orch::{self as scheduler_orch, SchedulerConsumer};
use crate::undo::UndoLog;

use super::types::{
    ChildSpec, SchedGroupNode, SCHED_GROUP_ATTR_CHILD_COUNT, SCHED_GROUP_ATTR_CHILD_LIST,
    SCHED_GROUP_ATTR_LEVEL, SCHED_GROUP_ATTR_MAX_CHILDS, SCHED_GROUP_ATTR_PARENT_NODE,
    SCHED_GROUP_ATTR_PORT_ID, SCHED_GROUP_ATTR_SCHEDULER_PROFILE_ID, SCHED_GROUP_ATTR_TABLE,
};

/// A resolved child of a scheduler group: leaf queue or sub-group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    Queue(QueueOid),
    Group(SchedGroupOid),
}

impl ChildRef {
    fn as_raw(&self) -> RawObjectId {
        match self {
            ChildRef::Queue(id) => id.as_raw(),
            ChildRef::Group(id) => id.as_raw(),
        }
    }
}

// ---------------------------------------------------------------------------
// Group create / remove
// ---------------------------------------------------------------------------

pub(crate) fn group_create(ctx: &mut QosContext, attrs: &[Attribute]) -> SaiResult<SchedGroupOid> {
    validate_attributes(attrs, SCHED_GROUP_ATTR_TABLE, AttrOp::Create)?;

    let mut port_id = None;
    let mut level = None;
    let mut max_childs = None;
    let mut parent = None;
    let mut scheduler = None;
    for (index, attr) in attrs.iter().enumerate() {
        let bad_value = || SaiError::InvalidAttrValue {
            index,
            attr_id: attr.id,
        };
        match attr.id {
            SCHED_GROUP_ATTR_PORT_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                port_id = Some(PortOid::from_raw(raw).ok_or_else(bad_value)?);
            }
            SCHED_GROUP_ATTR_LEVEL => level = Some(attr.value.as_u32().ok_or_else(bad_value)?),
            SCHED_GROUP_ATTR_MAX_CHILDS => {
                max_childs = Some(attr.value.as_u32().ok_or_else(bad_value)?)
            }
            SCHED_GROUP_ATTR_PARENT_NODE => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                parent = SchedGroupOid::from_raw(raw);
            }
            SCHED_GROUP_ATTR_SCHEDULER_PROFILE_ID => {
                let raw = attr.value.as_oid().ok_or_else(bad_value)?;
                scheduler = SchedulerOid::from_raw(raw);
            }
            _ => {}
        }
    }
    let port_id = port_id.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: SCHED_GROUP_ATTR_PORT_ID,
    })?;
    let level = level.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: SCHED_GROUP_ATTR_LEVEL,
    })?;
    let max_childs = max_childs.ok_or(SaiError::MandatoryAttributeMissing {
        attr_id: SCHED_GROUP_ATTR_MAX_CHILDS,
    })?;

    ctx.ports.get(port_id)?;
    if let Some(parent_id) = parent {
        let parent_node = ctx.sched_groups.get(parent_id)?;
        if parent_node.port_id != port_id {
            return Err(SaiError::invalid_parameter(format!(
                "parent group {} belongs to another port",
                parent_id
            )));
        }
        if parent_node.level + 1 != level {
            return Err(SaiError::invalid_parameter(format!(
                "parent group {} is level {}, child must be level {}",
                parent_id,
                parent_node.level,
                parent_node.level + 1
            )));
        }
        parent_node.check_capacity(1)?;
    }
    let scheduler_id = ctx.resolve_scheduler(scheduler)?;

    let driver = ctx.driver();
    let raw = driver.sched_group().create(attrs)?;
    let id = SchedGroupOid::from_raw_unchecked(raw);

    let mut node = SchedGroupNode::new(port_id, level, max_childs, scheduler_id);
    node.parent = parent;
    if let Err(err) = ctx.sched_groups.insert(id, node) {
        if let Err(undo_err) = driver.sched_group().remove(raw) {
            warn!(group = %id, error = %undo_err, "driver rollback after cache insert failure failed");
        }
        return Err(err);
    }

    let port = ctx.ports.get_mut(port_id)?;
    while port.sched_groups.len() <= level as usize {
        port.sched_groups.push(Vec::new());
    }
    port.sched_groups[level as usize].push(id);
    if let Some(parent_id) = parent {
        ctx.sched_groups.get_mut(parent_id)?.child_groups.push(id);
    }
    scheduler_orch::attach_consumer(ctx, SchedulerConsumer::Group(id), scheduler_id);
    debug!(group = %id, port = %port_id, level, "scheduler group created");
    Ok(id)
}

pub(crate) fn group_remove(ctx: &mut QosContext, id: SchedGroupOid) -> SaiResult<()> {
    let node = ctx.sched_groups.get(id)?;
    if node.child_count() > 0 {
        return Err(SaiError::object_in_use(format!(
            "scheduler group {} has {} children",
            id,
            node.child_count()
        )));
    }
    if node.parent.is_some() {
        return Err(SaiError::object_in_use(format!(
            "scheduler group {} still linked to a parent",
            id
        )));
    }
    destroy_group(ctx, id)
}

/// Removes a group unconditionally: driver object, cache node, the port's
/// level list entry and the scheduler back-link. Guards live in
/// [`group_remove`]; teardown paths call this directly after unlinking.
fn destroy_group(ctx: &mut QosContext, id: SchedGroupOid) -> SaiResult<()> {
    let node = ctx.sched_groups.get(id)?.clone();
    ctx.driver().sched_group().remove(id.as_raw())?;
    ctx.sched_groups.remove(id)?;

    if let Ok(port) = ctx.ports.get_mut(node.port_id) {
        if let Some(level) = port.sched_groups.get_mut(node.level as usize) {
            level.retain(|g| *g != id);
        }
    }
    if let Ok(sched) = ctx.schedulers.get_mut(node.scheduler_id) {
        sched.detach_group(id);
    }
    debug!(group = %id, "scheduler group removed");
    Ok(())
}

pub(crate) fn group_attr_set(ctx: &mut QosContext, id: SchedGroupOid, attr: &Attribute) -> SaiResult<()> {
    validate_attributes(std::slice::from_ref(attr), SCHED_GROUP_ATTR_TABLE, AttrOp::Set)?;
    // The only settable group attribute is the scheduler binding.
    let raw = attr.value.as_oid().ok_or(SaiError::InvalidAttrValue {
        index: 0,
        attr_id: attr.id,
    })?;
    scheduler_orch::scheduler_set(ctx, SchedulerConsumer::Group(id), SchedulerOid::from_raw(raw))
}

pub(crate) fn group_attr_get(
    ctx: &QosContext,
    id: SchedGroupOid,
    ids: &[AttrId],
) -> SaiResult<Vec<Attribute>> {
    let node = ctx.sched_groups.get(id)?;
    ids.iter()
        .enumerate()
        .map(|(index, attr_id)| match *attr_id {
            SCHED_GROUP_ATTR_PORT_ID => Ok(Attribute::oid(*attr_id, node.port_id.as_raw())),
            SCHED_GROUP_ATTR_LEVEL => Ok(Attribute::u32(*attr_id, node.level)),
            SCHED_GROUP_ATTR_MAX_CHILDS => Ok(Attribute::u32(*attr_id, node.max_childs)),
            SCHED_GROUP_ATTR_PARENT_NODE => Ok(Attribute::oid(
                *attr_id,
                node.parent.map(|p| p.as_raw()).unwrap_or(0),
            )),
            SCHED_GROUP_ATTR_SCHEDULER_PROFILE_ID => {
                Ok(Attribute::oid(*attr_id, node.scheduler_id.as_raw()))
            }
            SCHED_GROUP_ATTR_CHILD_COUNT => Ok(Attribute::u32(*attr_id, node.child_count() as u32)),
            SCHED_GROUP_ATTR_CHILD_LIST => {
                let mut list: Vec<RawObjectId> =
                    node.child_queues.iter().map(|q| q.as_raw()).collect();
                list.extend(node.child_groups.iter().map(|g| g.as_raw()));
                Ok(Attribute::new(*attr_id, AttrValue::OidList(list)))
            }
            _ => Err(SaiError::UnknownAttribute {
                index,
                attr_id: *attr_id,
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Batch child operations
// ---------------------------------------------------------------------------

fn resolve_children(ctx: &QosContext, children: &[RawObjectId]) -> SaiResult<Vec<ChildRef>> {
    children
        .iter()
        .map(|raw| {
            if let Some(queue) = QueueOid::from_raw(*raw).filter(|q| ctx.queues.contains(*q)) {
                Ok(ChildRef::Queue(queue))
            } else if let Some(group) =
                SchedGroupOid::from_raw(*raw).filter(|g| ctx.sched_groups.contains(*g))
            {
                Ok(ChildRef::Group(group))
            } else {
                Err(SaiError::invalid_object_type(format!(
                    "0x{:x} is neither a queue nor a scheduler group",
                    raw
                )))
            }
        })
        .collect()
}

fn check_batch_distinct(children: &[RawObjectId]) -> SaiResult<()> {
    for (index, child) in children.iter().enumerate() {
        if children[..index].contains(child) {
            return Err(SaiError::invalid_parameter(format!(
                "duplicate child 0x{:x} in batch",
                child
            )));
        }
    }
    Ok(())
}

/// Attaches a batch of queues/groups under a parent group.
///
/// The driver may commit a prefix of the batch before failing; that prefix
/// is removed again before the error is surfaced. Once the driver has
/// committed the whole batch, the in-memory links are updated for all
/// children; an in-memory failure at that point is logged as a fatal
/// cache/hardware desync and not compensated.
pub(crate) fn add_child_object_to_group(
    ctx: &mut QosContext,
    parent: SchedGroupOid,
    children: &[RawObjectId],
) -> SaiResult<()> {
    if children.is_empty() {
        return Ok(());
    }
    check_batch_distinct(children)?;
    let parent_node = ctx.sched_groups.get(parent)?;
    let parent_port = parent_node.port_id;
    let parent_level = parent_node.level;
    parent_node.check_capacity(children.len())?;

    let refs = resolve_children(ctx, children)?;
    for child in &refs {
        match child {
            ChildRef::Queue(q) => {
                let queue = ctx.queues.get(*q)?;
                if queue.port_id != parent_port {
                    return Err(SaiError::invalid_parameter(format!(
                        "queue {} belongs to another port",
                        q
                    )));
                }
                if let Some(existing) = queue.parent_group {
                    return Err(SaiError::object_in_use(format!(
                        "queue {} already has parent {}",
                        q, existing
                    )));
                }
            }
            ChildRef::Group(g) => {
                let group = ctx.sched_groups.get(*g)?;
                if group.port_id != parent_port {
                    return Err(SaiError::invalid_parameter(format!(
                        "group {} belongs to another port",
                        g
                    )));
                }
                if group.level != parent_level + 1 {
                    return Err(SaiError::invalid_parameter(format!(
                        "group {} is level {}, parent {} is level {}",
                        g, group.level, parent, parent_level
                    )));
                }
                if let Some(existing) = group.parent {
                    return Err(SaiError::object_in_use(format!(
                        "group {} already has parent {}",
                        g, existing
                    )));
                }
            }
        }
    }

    let driver = ctx.driver();
    if let Err(batch) = driver.sched_group().add_child_list(parent.as_raw(), children) {
        warn!(
            parent = %parent,
            applied = batch.applied,
            error = %batch.error,
            "batch child add failed, compensating applied prefix"
        );
        if batch.applied > 0 {
            if let Err(undo_err) = driver
                .sched_group()
                .remove_child_list(parent.as_raw(), &children[..batch.applied])
            {
                error!(
                    parent = %parent,
                    applied = batch.applied,
                    error = %undo_err.error,
                    "compensating child removal failed"
                );
            }
        }
        return Err(batch.error);
    }

    if let Err(err) = link_children(ctx, parent, &refs) {
        error!(
            parent = %parent,
            error = %err,
            "fatal: driver committed child batch but cache update failed; hardware and cache are out of sync"
        );
        return Err(err);
    }
    debug!(parent = %parent, count = children.len(), "children added to group");
    Ok(())
}

fn link_children(ctx: &mut QosContext, parent: SchedGroupOid, refs: &[ChildRef]) -> SaiResult<()> {
    for child in refs {
        match child {
            ChildRef::Queue(q) => {
                ctx.queues.get_mut(*q)?.parent_group = Some(parent);
                ctx.sched_groups.get_mut(parent)?.child_queues.push(*q);
            }
            ChildRef::Group(g) => {
                ctx.sched_groups.get_mut(*g)?.parent = Some(parent);
                ctx.sched_groups.get_mut(parent)?.child_groups.push(*g);
            }
        }
    }
    Ok(())
}

/// Detaches a batch of queues/groups from their parent group.
///
/// Same prefix-compensation contract as [`add_child_object_to_group`]:
/// children the driver already removed are re-added if the batch fails
/// part-way.
pub(crate) fn remove_child_object_from_group(
    ctx: &mut QosContext,
    parent: SchedGroupOid,
    children: &[RawObjectId],
) -> SaiResult<()> {
    if children.is_empty() {
        return Ok(());
    }
    check_batch_distinct(children)?;
    ctx.sched_groups.get(parent)?;

    let refs = resolve_children(ctx, children)?;
    for child in &refs {
        let actual = match child {
            ChildRef::Queue(q) => ctx.queues.get(*q)?.parent_group,
            ChildRef::Group(g) => ctx.sched_groups.get(*g)?.parent,
        };
        if actual != Some(parent) {
            return Err(SaiError::invalid_parameter(format!(
                "child 0x{:x} is not under group {}",
                child.as_raw(),
                parent
            )));
        }
    }

    let driver = ctx.driver();
    if let Err(batch) = driver
        .sched_group()
        .remove_child_list(parent.as_raw(), children)
    {
        warn!(
            parent = %parent,
            applied = batch.applied,
            error = %batch.error,
            "batch child remove failed, compensating applied prefix"
        );
        if batch.applied > 0 {
            if let Err(undo_err) = driver
                .sched_group()
                .add_child_list(parent.as_raw(), &children[..batch.applied])
            {
                error!(
                    parent = %parent,
                    applied = batch.applied,
                    error = %undo_err.error,
                    "compensating child re-add failed"
                );
            }
        }
        return Err(batch.error);
    }

    if let Err(err) = unlink_children(ctx, parent, &refs) {
        error!(
            parent = %parent,
            error = %err,
            "fatal: driver committed child batch but cache update failed; hardware and cache are out of sync"
        );
        return Err(err);
    }
    debug!(parent = %parent, count = children.len(), "children removed from group");
    Ok(())
}

fn unlink_children(ctx: &mut QosContext, parent: SchedGroupOid, refs: &[ChildRef]) -> SaiResult<()> {
    for child in refs {
        match child {
            ChildRef::Queue(q) => {
                ctx.queues.get_mut(*q)?.parent_group = None;
                ctx.sched_groups.get_mut(parent)?.child_queues.retain(|c| c != q);
            }
            ChildRef::Group(g) => {
                ctx.sched_groups.get_mut(*g)?.parent = None;
                ctx.sched_groups.get_mut(parent)?.child_groups.retain(|c| c != g);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-port build / teardown
// ---------------------------------------------------------------------------

/// Builds the configured scheduler-group tree for one port, level by
/// level, and links queues and sub-groups per the template. Any failure
/// tears down everything already created for this port.
pub(crate) fn port_hierarchy_init(ctx: &mut QosContext, port_id: PortOid) -> SaiResult<()> {
    let Some(template) = ctx.config.hierarchy.clone() else {
        return Err(SaiError::invalid_parameter(
            "no hierarchy template configured",
        ));
    };

    let mut undo = UndoLog::new();
    let mut created: Vec<Vec<SchedGroupOid>> = Vec::with_capacity(template.depth());

    for (level, spec) in template.levels.iter().enumerate() {
        let mut level_ids = Vec::with_capacity(spec.groups.len());
        for _ in &spec.groups {
            let attrs = [
                Attribute::oid(SCHED_GROUP_ATTR_PORT_ID, port_id.as_raw()),
                Attribute::u32(SCHED_GROUP_ATTR_LEVEL, level as u32),
                Attribute::u32(SCHED_GROUP_ATTR_MAX_CHILDS, spec.max_childs),
            ];
            match group_create(ctx, &attrs) {
                Ok(id) => {
                    undo.record("remove scheduler group", move |ctx| destroy_group(ctx, id));
                    level_ids.push(id);
                }
                Err(err) => {
                    warn!(port = %port_id, level, error = %err, "hierarchy build failed, unwinding");
                    undo.unwind(ctx);
                    return Err(err);
                }
            }
        }
        created.push(level_ids);
    }

    for (level, spec) in template.levels.iter().enumerate() {
        for (group_index, group_spec) in spec.groups.iter().enumerate() {
            if group_spec.children.is_empty() {
                continue;
            }
            let parent = created[level][group_index];
            let mut children = Vec::with_capacity(group_spec.children.len());
            let mut resolve_err = None;
            for child in &group_spec.children {
                match child {
                    ChildSpec::Queue { queue_type, index } => {
                        match find_port_queue(ctx, port_id, *queue_type, *index) {
                            Ok(queue) => children.push(queue.as_raw()),
                            Err(err) => {
                                resolve_err = Some(err);
                                break;
                            }
                        }
                    }
                    ChildSpec::Group { index } => {
                        children.push(created[level + 1][*index as usize].as_raw());
                    }
                }
            }
            let result = match resolve_err {
                Some(err) => Err(err),
                None => add_child_object_to_group(ctx, parent, &children),
            };
            match result {
                Ok(()) => {
                    undo.record("unlink group children", move |ctx| {
                        remove_child_object_from_group(ctx, parent, &children)
                    });
                }
                Err(err) => {
                    warn!(port = %port_id, level, group = group_index, error = %err, "hierarchy link failed, unwinding");
                    undo.unwind(ctx);
                    return Err(err);
                }
            }
        }
    }

    undo.commit();
    debug!(port = %port_id, levels = template.depth(), "port hierarchy built");
    Ok(())
}

/// Tears down a port's scheduler-group tree: unlinks all children
/// top-down, then removes the groups leaf-level first.
pub(crate) fn port_hierarchy_deinit(ctx: &mut QosContext, port_id: PortOid) -> SaiResult<()> {
    let levels = ctx.ports.get(port_id)?.sched_groups.clone();

    for level in levels.iter() {
        for group in level {
            let node = ctx.sched_groups.get(*group)?;
            let mut children: Vec<RawObjectId> =
                node.child_queues.iter().map(|q| q.as_raw()).collect();
            children.extend(node.child_groups.iter().map(|g| g.as_raw()));
            if !children.is_empty() {
                remove_child_object_from_group(ctx, *group, &children)?;
            }
        }
    }

    for level in levels.iter().rev() {
        for group in level {
            destroy_group(ctx, *group)?;
        }
    }
    debug!(port = %port_id, "port hierarchy torn down");
    Ok(())
}

/// Finds a port's queue by type and index.
pub(crate) fn find_port_queue(
    ctx: &QosContext,
    port_id: PortOid,
    queue_type: QueueType,
    index: u32,
) -> SaiResult<QueueOid> {
    let port = ctx.ports.get(port_id)?;
    for queue_id in &port.queues {
        let queue = ctx.queues.get(*queue_id)?;
        if queue.queue_type == queue_type && queue.index == index {
            return Ok(*queue_id);
        }
    }
    Err(SaiError::not_found(format!(
        "{} queue {} on port {}",
        queue_type, index, port_id
    )))
}

// ---------------------------------------------------------------------------
// Public method table
// ---------------------------------------------------------------------------

impl QosSwitch {
    pub fn sched_group_create(&self, attrs: &[Attribute]) -> SaiResult<SchedGroupOid> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        group_create(&mut ctx, attrs)
    }

    pub fn sched_group_remove(&self, id: SchedGroupOid) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        group_remove(&mut ctx, id)
    }

    pub fn sched_group_attr_set(&self, id: SchedGroupOid, attr: &Attribute) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        group_attr_set(&mut ctx, id, attr)
    }

    pub fn sched_group_attr_get(&self, id: SchedGroupOid, ids: &[AttrId]) -> SaiResult<Vec<Attribute>> {
        let ctx = self.lock();
        ctx.ensure_initialized()?;
        group_attr_get(&ctx, id, ids)
    }

    /// Attaches queues and/or sub-groups under a scheduler group.
    pub fn add_child_object_to_group(
        &self,
        parent: SchedGroupOid,
        children: &[RawObjectId],
    ) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        add_child_object_to_group(&mut ctx, parent, children)
    }

    /// Detaches queues and/or sub-groups from their parent group.
    pub fn remove_child_object_from_group(
        &self,
        parent: SchedGroupOid,
        children: &[RawObjectId],
    ) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        remove_child_object_from_group(&mut ctx, parent, children)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sai_common::error::Status;
    use sai_vs::VsDriver;

    use crate::config::QosConfig;
    use crate::context::QosSwitch;
    use crate::hierarchy::types::{GroupSpec, HierarchyTemplate, LevelSpec};

    use super::*;

    /// One root group fanning out to four leaf groups; queues are linked
    /// by the tests themselves.
    fn two_level_template() -> HierarchyTemplate {
        HierarchyTemplate {
            levels: vec![
                LevelSpec {
                    max_childs: 8,
                    groups: vec![GroupSpec {
                        children: (0..4).map(|index| ChildSpec::Group { index }).collect(),
                    }],
                },
                LevelSpec {
                    max_childs: 8,
                    groups: (0..4).map(|_| GroupSpec::default()).collect(),
                },
            ],
        }
    }

    fn setup() -> (Arc<VsDriver>, QosSwitch) {
        let driver = Arc::new(VsDriver::new());
        let config = QosConfig {
            port_count: 1,
            uc_queue_count: 4,
            mc_queue_count: 0,
            pg_count: 0,
            hierarchy: Some(two_level_template()),
        };
        let switch = QosSwitch::new(driver.clone(), config).unwrap();
        switch.init().unwrap();
        (driver, switch)
    }

    fn port_tree(switch: &QosSwitch) -> (PortOid, Vec<Vec<SchedGroupOid>>, Vec<QueueOid>) {
        let ctx = switch.lock();
        let (port_id, port) = ctx.ports.iter().next().unwrap();
        (port_id, port.sched_groups.clone(), port.queues.clone())
    }

    fn child_count(switch: &QosSwitch, group: SchedGroupOid) -> u32 {
        switch
            .sched_group_attr_get(group, &[SCHED_GROUP_ATTR_CHILD_COUNT])
            .unwrap()[0]
            .value
            .as_u32()
            .unwrap()
    }

    #[test]
    fn test_init_builds_template_tree() {
        let (_, switch) = setup();
        let (_, groups, queues) = port_tree(&switch);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 4);
        assert_eq!(queues.len(), 4);

        // Root holds the four leaf groups; leaves start empty.
        assert_eq!(child_count(&switch, groups[0][0]), 4);
        for leaf in &groups[1] {
            assert_eq!(child_count(&switch, *leaf), 0);
            let ctx = switch.lock();
            assert_eq!(ctx.sched_groups.get(*leaf).unwrap().parent, Some(groups[0][0]));
        }
    }

    #[test]
    fn test_add_and_remove_children_scenario() {
        let (_, switch) = setup();
        let (_, groups, queues) = port_tree(&switch);
        let leaf = groups[1][0];
        let raws: Vec<RawObjectId> = queues.iter().map(|q| q.as_raw()).collect();

        switch.add_child_object_to_group(leaf, &raws).unwrap();
        assert_eq!(child_count(&switch, leaf), 4);
        {
            let ctx = switch.lock();
            for queue in &queues {
                assert_eq!(ctx.queues.get(*queue).unwrap().parent_group, Some(leaf));
            }
        }

        // Remove two; the leaf keeps two and the removed pair is orphaned.
        switch
            .remove_child_object_from_group(leaf, &raws[..2])
            .unwrap();
        assert_eq!(child_count(&switch, leaf), 2);
        let ctx = switch.lock();
        assert_eq!(ctx.queues.get(queues[0]).unwrap().parent_group, None);
        assert_eq!(ctx.queues.get(queues[1]).unwrap().parent_group, None);
        assert_eq!(ctx.queues.get(queues[2]).unwrap().parent_group, Some(leaf));
        let leaf_node = ctx.sched_groups.get(leaf).unwrap();
        assert!(!leaf_node.child_queues.contains(&queues[0]));
        assert!(leaf_node.child_queues.contains(&queues[2]));
    }

    #[test]
    fn test_add_child_twice_rejected() {
        let (_, switch) = setup();
        let (_, groups, queues) = port_tree(&switch);
        let leaf = groups[1][0];

        switch
            .add_child_object_to_group(leaf, &[queues[0].as_raw()])
            .unwrap();
        let err = switch
            .add_child_object_to_group(groups[1][1], &[queues[0].as_raw()])
            .unwrap_err();
        assert!(matches!(err, SaiError::ObjectInUse { .. }));
    }

    #[test]
    fn test_duplicate_in_batch_rejected() {
        let (_, switch) = setup();
        let (_, groups, queues) = port_tree(&switch);
        let err = switch
            .add_child_object_to_group(groups[1][0], &[queues[0].as_raw(), queues[0].as_raw()])
            .unwrap_err();
        assert!(matches!(err, SaiError::InvalidParameter { .. }));
        assert_eq!(child_count(&switch, groups[1][0]), 0);
    }

    #[test]
    fn test_remove_wrong_parent_rejected() {
        let (_, switch) = setup();
        let (_, groups, queues) = port_tree(&switch);
        switch
            .add_child_object_to_group(groups[1][0], &[queues[0].as_raw()])
            .unwrap();

        let err = switch
            .remove_child_object_from_group(groups[1][1], &[queues[0].as_raw()])
            .unwrap_err();
        assert!(matches!(err, SaiError::InvalidParameter { .. }));
        assert_eq!(child_count(&switch, groups[1][0]), 1);
    }

    #[test]
    fn test_partial_batch_is_compensated() {
        let (driver, switch) = setup();
        let (_, groups, queues) = port_tree(&switch);
        let leaf = groups[1][0];
        let raws: Vec<RawObjectId> = queues.iter().map(|q| q.as_raw()).collect();

        // The driver applies two children, then fails the batch.
        driver.batch_limit(2, Status::TableFull);
        let err = switch.add_child_object_to_group(leaf, &raws).unwrap_err();
        assert!(matches!(
            err,
            SaiError::Status {
                status: Status::TableFull
            }
        ));
        driver.clear_faults();

        // The applied prefix was removed again; no links remain anywhere.
        assert_eq!(child_count(&switch, leaf), 0);
        {
            let ctx = switch.lock();
            for queue in &queues {
                assert_eq!(ctx.queues.get(*queue).unwrap().parent_group, None);
            }
        }

        // The batch goes through cleanly afterwards.
        switch.add_child_object_to_group(leaf, &raws).unwrap();
        assert_eq!(child_count(&switch, leaf), 4);
    }

    #[test]
    fn test_capacity_bound_enforced() {
        let (_, switch) = setup();
        let (port_id, groups, queues) = port_tree(&switch);

        // A tight group of capacity 2 cannot take 3 children.
        let small = switch
            .sched_group_create(&[
                Attribute::oid(SCHED_GROUP_ATTR_PORT_ID, port_id.as_raw()),
                Attribute::u32(SCHED_GROUP_ATTR_LEVEL, 1),
                Attribute::u32(SCHED_GROUP_ATTR_MAX_CHILDS, 2),
            ])
            .unwrap();
        let _ = groups;

        let raws: Vec<RawObjectId> = queues[..3].iter().map(|q| q.as_raw()).collect();
        let err = switch.add_child_object_to_group(small, &raws).unwrap_err();
        assert!(matches!(err, SaiError::InsufficientResources { .. }));
        assert_eq!(child_count(&switch, small), 0);
    }

    #[test]
    fn test_group_remove_guards() {
        let (_, switch) = setup();
        let (_, groups, queues) = port_tree(&switch);
        let root = groups[0][0];
        let leaf = groups[1][0];

        // Root still has children.
        assert!(matches!(
            switch.sched_group_remove(root).unwrap_err(),
            SaiError::ObjectInUse { .. }
        ));
        // Leaf is empty but still linked to its parent.
        assert!(matches!(
            switch.sched_group_remove(leaf).unwrap_err(),
            SaiError::ObjectInUse { .. }
        ));

        // Unlink it, then removal works.
        switch
            .remove_child_object_from_group(root, &[leaf.as_raw()])
            .unwrap();
        switch.sched_group_remove(leaf).unwrap();
        let _ = queues;
    }

    #[test]
    fn test_hierarchy_init_failure_unwinds_port() {
        let driver = Arc::new(VsDriver::new());
        let config = QosConfig {
            port_count: 0,
            uc_queue_count: 4,
            mc_queue_count: 0,
            pg_count: 0,
            hierarchy: Some(two_level_template()),
        };
        let switch = QosSwitch::new(driver.clone(), config).unwrap();
        switch.init().unwrap();

        // Port create (1) + scheduler push (1) + queues (4) succeed, the
        // build fails on the third scheduler group.
        driver.fail_after(8, Status::NoMemory);
        let err = switch.port_create().unwrap_err();
        assert!(matches!(
            err,
            SaiError::Status {
                status: Status::NoMemory
            }
        ));
        driver.clear_faults();

        let ctx = switch.lock();
        assert!(ctx.ports.is_empty());
        assert!(ctx.queues.is_empty());
        assert!(ctx.sched_groups.is_empty());
    }

    #[test]
    fn test_atomic_group_create_under_driver_failure() {
        let (driver, switch) = setup();
        let (port_id, _, _) = port_tree(&switch);
        let before = switch.lock().sched_groups.len();

        driver.fail_after(0, Status::NoMemory);
        let err = switch
            .sched_group_create(&[
                Attribute::oid(SCHED_GROUP_ATTR_PORT_ID, port_id.as_raw()),
                Attribute::u32(SCHED_GROUP_ATTR_LEVEL, 1),
                Attribute::u32(SCHED_GROUP_ATTR_MAX_CHILDS, 8),
            ])
            .unwrap_err();
        assert!(matches!(err, SaiError::Status { .. }));
        assert_eq!(switch.lock().sched_groups.len(), before);
    }
}

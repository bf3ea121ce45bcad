//! The QoS subsystem context and its single lock.
//!
//! All state lives in [`QosContext`]: one object cache per kind, the driver
//! handle, the configuration and the default-scheduler id. There is no
//! global mutable state; every operation receives the context by reference.
//!
//! [`QosSwitch`] is the public handle. It wraps the context in one
//! coarse-grained, reentrant-unsafe mutex; every public operation —
//! including attribute reads — acquires it for the full call, driver
//! round-trips included. Nothing suspends while holding it and there is no
//! cancellation: a stuck driver call stalls the subsystem.
//!
//! Lock order convention: callers coordinating with other subsystems must
//! acquire the foreign subsystem's lock *before* this one. The convention
//! is documented, not enforced.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use sai_common::driver::SwitchDriver;
use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{
    BufferPoolKind, BufferProfileKind, PolicerKind, PortKind, PortPoolKind, PriorityGroupKind,
    QosMapKind, QueueKind, SchedGroupKind, SchedulerKind, SchedulerOid, WredKind,
};

use crate::buffer::types::{BufferPoolNode, BufferProfileNode};
use crate::cache::ObjectCache;
use crate::config::QosConfig;
use crate::hierarchy::types::SchedGroupNode;
use crate::policer::PolicerNode;
use crate::port::types::{PortNode, PortPoolNode, PriorityGroupNode, QueueNode};
use crate::qosmap::QosMapNode;
use crate::scheduler::types::SchedulerNode;
use crate::wred::WredNode;

/// All mutable state of the QoS subsystem.
pub struct QosContext {
    pub(crate) driver: Arc<dyn SwitchDriver>,
    pub(crate) config: QosConfig,

    pub(crate) ports: ObjectCache<PortKind, PortNode>,
    pub(crate) queues: ObjectCache<QueueKind, QueueNode>,
    pub(crate) sched_groups: ObjectCache<SchedGroupKind, SchedGroupNode>,
    pub(crate) schedulers: ObjectCache<SchedulerKind, SchedulerNode>,
    pub(crate) buffer_pools: ObjectCache<BufferPoolKind, BufferPoolNode>,
    pub(crate) buffer_profiles: ObjectCache<BufferProfileKind, BufferProfileNode>,
    pub(crate) port_pools: ObjectCache<PortPoolKind, PortPoolNode>,
    pub(crate) priority_groups: ObjectCache<PriorityGroupKind, PriorityGroupNode>,
    pub(crate) wred_profiles: ObjectCache<WredKind, WredNode>,
    pub(crate) policers: ObjectCache<PolicerKind, PolicerNode>,
    pub(crate) qos_maps: ObjectCache<QosMapKind, QosMapNode>,

    /// The process-wide default scheduler, set at subsystem init. Unset
    /// scheduler references resolve to it. The registry never clears it on
    /// its own; callers do, via `clear_default_scheduler`.
    pub(crate) default_scheduler: Option<SchedulerOid>,
    pub(crate) initialized: bool,
}

impl QosContext {
    fn new(driver: Arc<dyn SwitchDriver>, config: QosConfig) -> Self {
        Self {
            driver,
            config,
            ports: ObjectCache::new(),
            queues: ObjectCache::new(),
            sched_groups: ObjectCache::new(),
            schedulers: ObjectCache::new(),
            buffer_pools: ObjectCache::new(),
            buffer_profiles: ObjectCache::new(),
            port_pools: ObjectCache::new(),
            priority_groups: ObjectCache::new(),
            wred_profiles: ObjectCache::new(),
            policers: ObjectCache::new(),
            qos_maps: ObjectCache::new(),
            default_scheduler: None,
            initialized: false,
        }
    }

    /// Clones the driver handle so cache borrows and driver calls can
    /// coexist in one operation.
    pub(crate) fn driver(&self) -> Arc<dyn SwitchDriver> {
        Arc::clone(&self.driver)
    }

    pub(crate) fn ensure_initialized(&self) -> SaiResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(SaiError::Uninitialized)
        }
    }

    /// Resolves an optional scheduler reference: `None` (the null id)
    /// resolves to the default scheduler.
    pub(crate) fn resolve_scheduler(&self, id: Option<SchedulerOid>) -> SaiResult<SchedulerOid> {
        match id {
            Some(id) => {
                self.schedulers.get(id)?;
                Ok(id)
            }
            None => self
                .default_scheduler
                .ok_or_else(|| SaiError::invalid_parameter("default scheduler not created")),
        }
    }
}

impl std::fmt::Debug for QosContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosContext")
            .field("initialized", &self.initialized)
            .field("ports", &self.ports.len())
            .field("queues", &self.queues.len())
            .field("sched_groups", &self.sched_groups.len())
            .field("schedulers", &self.schedulers.len())
            .field("buffer_pools", &self.buffer_pools.len())
            .field("buffer_profiles", &self.buffer_profiles.len())
            .finish()
    }
}

/// Public handle to the QoS subsystem.
///
/// Method tables per object kind live in the owning modules (`scheduler`,
/// `buffer`, `hierarchy`, `port`, `wred`, `policer`, `qosmap`); every
/// public method locks the subsystem for its full duration.
pub struct QosSwitch {
    inner: Mutex<QosContext>,
}

impl QosSwitch {
    /// Builds the subsystem around a driver backend selected at startup.
    pub fn new(driver: Arc<dyn SwitchDriver>, config: QosConfig) -> SaiResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Mutex::new(QosContext::new(driver, config)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, QosContext> {
        self.inner.lock().expect("QoS subsystem lock poisoned")
    }

    /// Initializes the subsystem: creates the default scheduler, then the
    /// configured number of ports (each fully initialized).
    ///
    /// On failure everything already created is torn down again before the
    /// error is returned.
    pub fn init(&self) -> SaiResult<()> {
        let mut ctx = self.lock();
        if ctx.initialized {
            return Err(SaiError::already_exists("QoS subsystem"));
        }

        crate::scheduler::orch::create_default(&mut ctx)?;

        let mut created = Vec::new();
        for _ in 0..ctx.config.port_count {
            match crate::port::orch::create_and_init_port(&mut ctx) {
                Ok(port) => created.push(port),
                Err(err) => {
                    for port in created.into_iter().rev() {
                        if let Err(undo_err) = crate::port::orch::deinit_and_remove_port(&mut ctx, port) {
                            tracing::warn!(port = %port, error = %undo_err, "port teardown failed during init unwind");
                        }
                    }
                    crate::scheduler::orch::remove_default(&mut ctx);
                    return Err(err);
                }
            }
        }

        ctx.initialized = true;
        info!(
            ports = ctx.ports.len(),
            queues = ctx.queues.len(),
            groups = ctx.sched_groups.len(),
            "QoS subsystem initialized"
        );
        Ok(())
    }

    /// Tears the subsystem down: de-initializes every port, clears the
    /// default-scheduler reference and removes the default scheduler.
    pub fn deinit(&self) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;

        for port in ctx.ports.ids() {
            crate::port::orch::deinit_and_remove_port(&mut ctx, port)?;
        }

        crate::scheduler::orch::remove_default(&mut ctx);
        ctx.initialized = false;
        info!("QoS subsystem deinitialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Ids of all ports currently known to the subsystem, id-ordered.
    pub fn port_ids(&self) -> Vec<sai_common::types::PortOid> {
        self.lock().ports.ids()
    }

    /// The default scheduler id, if the subsystem is initialized.
    pub fn default_scheduler(&self) -> Option<SchedulerOid> {
        self.lock().default_scheduler
    }

    /// Clears the process-wide default-scheduler reference.
    ///
    /// This is the explicit caller step that makes the default scheduler
    /// removable; the registry never clears the reference itself.
    pub fn clear_default_scheduler(&self) -> SaiResult<()> {
        let mut ctx = self.lock();
        ctx.ensure_initialized()?;
        ctx.default_scheduler = None;
        Ok(())
    }
}

impl std::fmt::Debug for QosSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosSwitch").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sai_common::error::Status;
    use sai_vs::VsDriver;

    fn flat_config() -> QosConfig {
        QosConfig {
            port_count: 1,
            uc_queue_count: 2,
            mc_queue_count: 0,
            pg_count: 2,
            hierarchy: None,
        }
    }

    #[test]
    fn test_init_creates_default_scheduler_and_ports() {
        let driver = Arc::new(VsDriver::new());
        let switch = QosSwitch::new(driver.clone(), flat_config()).unwrap();

        assert!(!switch.is_initialized());
        switch.init().unwrap();
        assert!(switch.is_initialized());
        assert!(switch.default_scheduler().is_some());

        let ctx = switch.lock();
        assert_eq!(ctx.ports.len(), 1);
        assert_eq!(ctx.queues.len(), 2);
        assert_eq!(ctx.priority_groups.len(), 2);
        assert_eq!(ctx.schedulers.len(), 1);
    }

    #[test]
    fn test_ops_before_init_rejected() {
        let driver = Arc::new(VsDriver::new());
        let switch = QosSwitch::new(driver, flat_config()).unwrap();

        let err = switch.scheduler_create(&[]).unwrap_err();
        assert!(matches!(err, SaiError::Uninitialized));
    }

    #[test]
    fn test_double_init_rejected() {
        let driver = Arc::new(VsDriver::new());
        let switch = QosSwitch::new(driver, flat_config()).unwrap();
        switch.init().unwrap();
        assert!(matches!(
            switch.init().unwrap_err(),
            SaiError::AlreadyExists { .. }
        ));
    }

    #[test]
    fn test_deinit_empties_everything() {
        let driver = Arc::new(VsDriver::new());
        let switch = QosSwitch::new(driver.clone(), flat_config()).unwrap();
        switch.init().unwrap();
        switch.deinit().unwrap();

        assert!(!switch.is_initialized());
        assert!(switch.default_scheduler().is_none());
        let ctx = switch.lock();
        assert!(ctx.ports.is_empty());
        assert!(ctx.queues.is_empty());
        assert!(ctx.priority_groups.is_empty());
        assert!(ctx.schedulers.is_empty());
        assert_eq!(driver.object_count(), 0);
    }

    #[test]
    fn test_init_failure_unwinds_created_ports() {
        let driver = Arc::new(VsDriver::new());
        let config = QosConfig {
            port_count: 2,
            ..flat_config()
        };
        let switch = QosSwitch::new(driver.clone(), config).unwrap();

        // Let the default scheduler, the first port (1 port + 2 queues +
        // 2 PGs + 1 port attr_set) succeed, then fail inside the second
        // port's bring-up.
        driver.fail_after(9, Status::NoMemory);
        let err = switch.init().unwrap_err();
        assert!(matches!(
            err,
            SaiError::Status {
                status: Status::NoMemory
            }
        ));
        assert!(!switch.is_initialized());

        driver.clear_faults();
        let ctx = switch.lock();
        assert!(ctx.ports.is_empty());
        assert!(ctx.queues.is_empty());
        assert!(ctx.schedulers.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let driver = Arc::new(VsDriver::new());
        let config = QosConfig {
            uc_queue_count: 1,
            mc_queue_count: 1,
            ..QosConfig::default()
        };
        // The default template references queue index 7.
        assert!(QosSwitch::new(driver, config).is_err());
    }
}

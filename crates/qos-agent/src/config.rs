//! QoS subsystem configuration.
//!
//! The configuration arrives as a deserialized structure; file parsing is
//! the platform layer's business. Everything here has workable defaults so
//! tests and bring-up can run with `QosConfig::default()`.

use serde::{Deserialize, Serialize};

use sai_common::error::{SaiError, SaiResult};

use crate::hierarchy::types::{ChildSpec, HierarchyTemplate};
use crate::port::types::QueueType;

/// Static configuration of the QoS subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QosConfig {
    /// Ports created eagerly at subsystem init. More can be created on
    /// demand afterwards.
    pub port_count: u32,
    /// Unicast queues per port.
    pub uc_queue_count: u32,
    /// Multicast queues per port.
    pub mc_queue_count: u32,
    /// Ingress priority groups per port.
    pub pg_count: u8,
    /// Per-port scheduler hierarchy template; `None` selects flat queue
    /// mode (queues directly under the port root).
    pub hierarchy: Option<HierarchyTemplate>,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            port_count: 0,
            uc_queue_count: 8,
            mc_queue_count: 8,
            pg_count: 8,
            hierarchy: Some(HierarchyTemplate::default()),
        }
    }
}

impl QosConfig {
    /// Checks internal consistency, including that the hierarchy template
    /// only references queues this configuration actually creates.
    pub fn validate(&self) -> SaiResult<()> {
        let Some(template) = &self.hierarchy else {
            return Ok(());
        };
        template.validate()?;
        for level in &template.levels {
            for group in &level.groups {
                for child in &group.children {
                    if let ChildSpec::Queue { queue_type, index } = child {
                        let bound = match queue_type {
                            QueueType::Unicast => self.uc_queue_count,
                            QueueType::Multicast => self.mc_queue_count,
                            QueueType::All => self.uc_queue_count + self.mc_queue_count,
                        };
                        if *index >= bound {
                            return Err(SaiError::invalid_parameter(format!(
                                "template references {} queue {} but only {} configured",
                                queue_type, index, bound
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

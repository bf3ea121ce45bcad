//! Buffer accounting engine.
//!
//! Pools, profiles and the capacity bookkeeping between them. Profiles are
//! shared by ports, queues and priority groups through a many-to-many
//! attachment tracked with back-link lists; a profile's size is charged to
//! its pool exactly once while it has any consumer.

pub mod orch;
pub mod types;

pub use types::{
    BufferConsumer, BufferPoolNode, BufferPoolType, BufferProfileNode, ColorThresholds,
    ThresholdMode, BUFFER_POOL_ATTR_SHARED_SIZE, BUFFER_POOL_ATTR_SIZE, BUFFER_POOL_ATTR_TABLE,
    BUFFER_POOL_ATTR_THRESHOLD_MODE, BUFFER_POOL_ATTR_TYPE, BUFFER_PROFILE_ATTR_BUFFER_SIZE,
    BUFFER_PROFILE_ATTR_POOL_ID, BUFFER_PROFILE_ATTR_TABLE, BUFFER_PROFILE_ATTR_XOFF_TH,
    BUFFER_PROFILE_ATTR_XON_TH,
};

//! Virtual-switch driver backend.
//!
//! `sai-vs` implements every `sai-common` driver trait over an in-memory
//! object table. It is the backend the test suites run against, and doubles
//! as the reference for what the control plane expects from a vendor
//! driver: stateless object storage, hardware-assigned ids, prefix
//! semantics on batch child operations.
//!
//! Fault injection is part of the public surface because the control
//! plane's compensation logic is only exercisable by making the "hardware"
//! fail mid-operation:
//!
//! ```
//! use sai_vs::VsDriver;
//! use sai_common::Status;
//!
//! let driver = VsDriver::new();
//! driver.fail_after(3, Status::InsufficientResources);
//! // The 4th driver call will fail once, then the driver heals.
//! ```

mod backend;
mod fault;
mod store;

pub use backend::VsDriver;
pub use fault::FaultInjector;
pub use store::{VsObject, VsObjectKind, VsStore};

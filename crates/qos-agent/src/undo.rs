//! Compensation log for multi-step operations.
//!
//! Every operation that touches the driver or the object graph in more than
//! one step records a compensating closure per committed step. On failure
//! the log is unwound in reverse order; on success it is committed and the
//! steps are dropped.
//!
//! Unwinding is best-effort: a failing compensation step is logged and the
//! unwind continues, so the caller always gets the original error back.

use tracing::{debug, warn};

use sai_common::error::SaiResult;

use crate::context::QosContext;

type UndoStep = Box<dyn FnOnce(&mut QosContext) -> SaiResult<()>>;

/// Records committed steps and replays them in reverse on failure.
#[derive(Default)]
pub struct UndoLog {
    steps: Vec<(&'static str, UndoStep)>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a compensating step for work that has just been committed.
    pub fn record<F>(&mut self, label: &'static str, step: F)
    where
        F: FnOnce(&mut QosContext) -> SaiResult<()> + 'static,
    {
        self.steps.push((label, Box::new(step)));
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The operation succeeded; drop all compensation steps.
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Replays all recorded steps in reverse order, best-effort.
    pub fn unwind(self, ctx: &mut QosContext) {
        for (label, step) in self.steps.into_iter().rev() {
            debug!(step = label, "unwinding");
            if let Err(err) = step(ctx) {
                warn!(step = label, error = %err, "compensation step failed, continuing unwind");
            }
        }
    }
}

impl std::fmt::Debug for UndoLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoLog").field("steps", &self.len()).finish()
    }
}

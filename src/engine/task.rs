//! Task definitions for the game engine
//!
//! A task is an opaque unit of work executed on the engine's logic lane.
//! Composite variants let a single dispatched task run children in order or
//! fan them out across the parallel lane; the dispatcher itself never runs
//! two top-level tasks at once.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{Result, RunevaleError};
use crate::state::ServerContext;

/// Boxed work closure executed with the server context
pub type TaskFn = Box<dyn FnOnce(&ServerContext) -> Result<()> + Send + 'static>;

/// A unit of work for the engine
pub enum Task {
    /// A single closure
    Unit {
        /// Short label used in logs
        name: &'static str,
        run: TaskFn,
    },
    /// Children executed one after another on the calling lane
    Sequential(Vec<Task>),
    /// Children fanned out across the parallel lane; the composite blocks
    /// until all complete or the first failure
    Parallel(Vec<Task>),
}

impl Task {
    /// Create a unit task from a closure
    pub fn unit<F>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(&ServerContext) -> Result<()> + Send + 'static,
    {
        Self::Unit {
            name,
            run: Box::new(run),
        }
    }

    /// Create a sequential composite
    pub fn sequential(tasks: Vec<Task>) -> Self {
        Self::Sequential(tasks)
    }

    /// Create a parallel composite
    pub fn parallel(tasks: Vec<Task>) -> Self {
        Self::Parallel(tasks)
    }

    /// Label for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unit { name, .. } => name,
            Self::Sequential(_) => "sequential",
            Self::Parallel(_) => "parallel",
        }
    }

    /// Run this task to completion.
    ///
    /// Only ever invoked from the engine's logic lane, so a unit body may
    /// freely mutate game state without further locking discipline. A
    /// parallel composite is the one exception: its children run
    /// concurrently with each other (never with other tasks) and must
    /// confine their writes accordingly.
    pub fn execute(self, ctx: &ServerContext) -> Result<()> {
        match self {
            Self::Unit { run, .. } => run(ctx),

            Self::Sequential(tasks) => {
                for task in tasks {
                    task.execute(ctx)?;
                }
                Ok(())
            }

            Self::Parallel(tasks) => {
                let failure: Mutex<Option<RunevaleError>> = Mutex::new(None);

                rayon::scope(|scope| {
                    for task in tasks {
                        let failure = &failure;
                        scope.spawn(move |_| {
                            if let Err(e) = task.execute(ctx) {
                                let mut slot = failure.lock();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                            }
                        });
                    }
                });

                match failure.into_inner() {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit { name, .. } => f.debug_struct("Unit").field("name", name).finish(),
            Self::Sequential(tasks) => f.debug_tuple("Sequential").field(&tasks.len()).finish(),
            Self::Parallel(tasks) => f.debug_tuple("Parallel").field(&tasks.len()).finish(),
        }
    }
}

mod runner;

use std::collections::HashMap;

use crate::error::{BuildFailure, SiteError};
use crate::task::Task;
use crate::BuildContext;

pub use runner::Report;
#[cfg(feature = "live")]
pub use runner::WatchRule;
#[cfg(feature = "live")]
pub(crate) use runner::watch;

/// Handle to a task declared in an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

/// An ordering constraint over declared tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Task(TaskId),
    /// Members start together; the step settles when every member has.
    Parallel(Vec<Step>),
    /// Members run one after another; the first failure stops the rest.
    Sequence(Vec<Step>),
}

impl Step {
    /// Every task reachable from this step, in declaration order of the step.
    pub fn tasks(&self) -> Vec<TaskId> {
        let mut acc = Vec::new();
        self.collect(&mut acc);
        acc
    }

    fn collect(&self, acc: &mut Vec<TaskId>) {
        match self {
            Step::Task(id) => acc.push(*id),
            Step::Parallel(steps) | Step::Sequence(steps) => {
                for step in steps {
                    step.collect(acc);
                }
            }
        }
    }
}

impl From<TaskId> for Step {
    fn from(id: TaskId) -> Self {
        Step::Task(id)
    }
}

/// Registry of named tasks and executor of [`Step`]s over them.
#[derive(Debug, Default)]
pub struct Orchestrator {
    tasks: Vec<Task>,
    names: HashMap<String, TaskId>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task` under its name. Names are unique.
    pub fn declare(&mut self, task: Task) -> Result<TaskId, SiteError> {
        if self.names.contains_key(task.name()) {
            return Err(SiteError::DuplicateTask(task.name().to_string()));
        }

        let id = TaskId(self.tasks.len());
        self.names.insert(task.name().to_string(), id);
        self.tasks.push(task);
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<TaskId> {
        self.names.get(name).copied()
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Executes `step`, reporting every task that settled.
    ///
    /// On failure the returned [`BuildFailure`] names each failed task and
    /// still carries the records of the tasks that completed.
    pub fn run(&self, ctx: &BuildContext, step: &Step) -> Result<Report, BuildFailure> {
        runner::run(self, ctx, step)
    }
}

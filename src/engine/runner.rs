mod diagnostics;
#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod watch;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;
use std::sync::mpsc::channel;
use std::time::Instant;

use indicatif::ProgressStyle;
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::BuildContext;
use crate::engine::{Orchestrator, Step};
use crate::error::{BuildFailure, TaskError, TaskFailure};
use crate::io::{as_elapsed, as_overhead};
use crate::task::{Task, TaskRecord};

pub use diagnostics::Report;
#[cfg(feature = "live")]
pub(crate) use watch::watch;
#[cfg(feature = "live")]
pub use watch::WatchRule;

static STYLE_ROOT: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .expect("Error setting progress bar template")
});

/// Tasks that settled while executing a step, and the ones that failed.
#[derive(Default)]
struct Settled {
    records: Vec<TaskRecord>,
    failures: Vec<TaskFailure>,
}

impl Settled {
    fn extend(&mut self, other: Settled) {
        self.records.extend(other.records);
        self.failures.extend(other.failures);
    }
}

pub(crate) fn run(orch: &Orchestrator, ctx: &BuildContext, step: &Step) -> Result<Report, BuildFailure> {
    let s = Instant::now();

    let root = tracing::span!(Level::INFO, "build", mode = %ctx.mode);
    root.pb_set_length(step.tasks().len() as u64);
    root.pb_set_style(&STYLE_ROOT);
    root.pb_set_message("Running tasks...");
    let _enter = root.enter();

    let settled = run_step(orch, ctx, step, &root);
    let report = Report {
        records: settled.records,
    };

    if settled.failures.is_empty() {
        tracing::info!("Finished {} task(s) {}", report.records.len(), as_overhead(s));
        return Ok(report);
    }

    for failure in &settled.failures {
        tracing::error!("{failure}");
    }

    Err(BuildFailure {
        failures: settled.failures,
        report,
    })
}

fn run_step(orch: &Orchestrator, ctx: &BuildContext, step: &Step, root: &Span) -> Settled {
    match step {
        Step::Task(id) => run_task(orch.task(*id), ctx, root),
        Step::Sequence(steps) => {
            let mut acc = Settled::default();
            for step in steps {
                acc.extend(run_step(orch, ctx, step, root));
                if !acc.failures.is_empty() {
                    break;
                }
            }
            acc
        }
        Step::Parallel(steps) => {
            // (position in the group, result)
            let (sender, receiver) = channel::<(usize, Settled)>();

            rayon::scope(|s| {
                for (i, step) in steps.iter().enumerate() {
                    let sender = sender.clone();
                    s.spawn(move |_| {
                        let settled = run_step(orch, ctx, step, root);
                        // the receiver outlives the scope
                        let _ = sender.send((i, settled));
                    });
                }
            });
            drop(sender);

            let mut done: Vec<_> = receiver.into_iter().collect();
            done.sort_by_key(|(i, _)| *i);

            let mut acc = Settled::default();
            for (_, settled) in done {
                acc.extend(settled);
            }
            acc
        }
    }
}

fn run_task(task: &Task, ctx: &BuildContext, root: &Span) -> Settled {
    let span = tracing::span!(parent: root, Level::INFO, "task", name = task.name());
    span.pb_set_style(&STYLE_TASK);
    span.pb_set_message(&format!("Running {}", task.name()));
    let _enter = span.enter();

    let result = match catch_unwind(AssertUnwindSafe(|| task.run(ctx))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };

            Err(TaskError::Panic(msg))
        }
    };

    root.pb_inc(1);

    match result {
        Ok(record) => {
            match record.warnings {
                0 => tracing::info!(
                    "{} {} {}",
                    record.name,
                    record.outcome,
                    as_elapsed(record.duration)
                ),
                n => tracing::warn!(
                    "{} {} with {n} warning(s) {}",
                    record.name,
                    record.outcome,
                    as_elapsed(record.duration)
                ),
            }

            Settled {
                records: vec![record],
                failures: Vec::new(),
            }
        }
        Err(error) => Settled {
            records: Vec::new(),
            failures: vec![TaskFailure {
                task: task.name().to_string(),
                error,
            }],
        },
    }
}

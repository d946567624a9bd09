//! Named units of build work.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

use crate::BuildContext;
use crate::cache::AssetCategory;
use crate::error::TaskError;
use crate::fileset;
use crate::freshness;
use crate::transform::Transform;

/// Side-effect body of a task that doesn't fit the transform shape.
pub type Effect = Box<dyn Fn(&BuildContext) -> Result<Outcome, TaskError> + Send + Sync>;

/// What a task does once it is invoked.
pub enum Work {
    /// Resolve `inputs`, consult the gate, then stream them through
    /// `transform`.
    Transform {
        inputs: Vec<String>,
        gate: Option<Gate>,
        transform: Transform,
    },
    /// Run an arbitrary closure.
    Effect(Effect),
}

/// Production-mode freshness check applied before a transform runs.
#[derive(Debug, Clone)]
pub enum Gate {
    /// Skip the whole task when this single output is up to date.
    Output(Utf8PathBuf),
    /// Drop every input whose mirror under this directory is up to date.
    Mirror(Utf8PathBuf),
}

/// Action invoked after a task has written its output.
#[derive(Clone)]
pub enum Successor {
    /// Mint a new version token for the category.
    Bump(AssetCategory),
    Run(Arc<dyn Fn(&BuildContext) -> Result<(), TaskError> + Send + Sync>),
}

impl Successor {
    fn invoke(&self, ctx: &BuildContext) -> Result<(), TaskError> {
        match self {
            Successor::Bump(category) => {
                ctx.versions.bump(*category)?;
                Ok(())
            }
            Successor::Run(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Successor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Successor::Bump(category) => f.debug_tuple("Bump").field(category).finish(),
            Successor::Run(_) => f.write_str("Run(..)"),
        }
    }
}

/// How a single task invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Output was written to these files.
    Written(Vec<Utf8PathBuf>),
    /// The gate found every output up to date.
    Skipped,
    /// There was nothing to process.
    Empty,
}

impl Outcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Outcome::Written(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Written(files) => write!(f, "wrote {} file(s)", files.len()),
            Outcome::Skipped => f.write_str("up to date"),
            Outcome::Empty => f.write_str("nothing to do"),
        }
    }
}

/// A settled task invocation.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub name: String,
    pub outcome: Outcome,
    pub warnings: usize,
    pub duration: Duration,
}

pub struct Task {
    name: String,
    work: Work,
    successors: Vec<Successor>,
    running: Mutex<()>,
}

impl Task {
    /// A task streaming `inputs` through `transform`.
    pub fn transform<S: Into<String>>(
        name: impl Into<String>,
        inputs: impl IntoIterator<Item = S>,
        transform: Transform,
    ) -> Self {
        Self::new(
            name,
            Work::Transform {
                inputs: inputs.into_iter().map(Into::into).collect(),
                gate: None,
                transform,
            },
        )
    }

    /// A task running an arbitrary closure.
    pub fn effect<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&BuildContext) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        Self::new(name, Work::Effect(Box::new(f)))
    }

    fn new(name: impl Into<String>, work: Work) -> Self {
        Self {
            name: name.into(),
            work,
            successors: Vec::new(),
            running: Mutex::new(()),
        }
    }

    /// Sets the freshness gate. Has no effect on effect tasks, which gate
    /// themselves.
    pub fn gate(mut self, gate: Gate) -> Self {
        if let Work::Transform { gate: slot, .. } = &mut self.work {
            *slot = Some(gate);
        }
        self
    }

    pub fn then(mut self, successor: Successor) -> Self {
        self.successors.push(successor);
        self
    }

    pub fn bumps(self, category: AssetCategory) -> Self {
        self.then(Successor::Bump(category))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the task, then its successors if anything was written.
    ///
    /// Concurrent invocations of the same task are serialized.
    pub fn run(&self, ctx: &BuildContext) -> Result<TaskRecord, TaskError> {
        let _running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let start = Instant::now();

        let (outcome, warnings) = match &self.work {
            Work::Transform {
                inputs,
                gate,
                transform,
            } => self.run_transform(ctx, inputs, gate.as_ref(), transform)?,
            Work::Effect(f) => (f(ctx)?, 0),
        };

        if outcome.is_written() {
            for successor in &self.successors {
                successor.invoke(ctx)?;
            }
        }

        Ok(TaskRecord {
            name: self.name.clone(),
            outcome,
            warnings,
            duration: start.elapsed(),
        })
    }

    fn run_transform(
        &self,
        ctx: &BuildContext,
        patterns: &[String],
        gate: Option<&Gate>,
        transform: &Transform,
    ) -> Result<(Outcome, usize), TaskError> {
        let mut inputs = fileset::resolve(&ctx.config.root, patterns)?;

        match gate {
            Some(Gate::Output(output)) => {
                if freshness::should_skip(ctx.mode, &inputs, &ctx.config.resolve(output)) {
                    tracing::debug!(task = %self.name, %output, "output is up to date");
                    return Ok((Outcome::Skipped, 0));
                }
            }
            Some(Gate::Mirror(dir)) => {
                let found = inputs.len();
                freshness::retain_stale(ctx.mode, &mut inputs, &ctx.config.resolve(dir));
                if found > 0 && inputs.is_empty() {
                    tracing::debug!(task = %self.name, %dir, "every mirrored output is up to date");
                    return Ok((Outcome::Skipped, 0));
                }
            }
            None => {}
        }

        if inputs.is_empty() {
            return Ok((Outcome::Empty, 0));
        }

        let emitted = transform.run(ctx, &inputs)?;
        let outcome = match emitted.written.is_empty() {
            true => Outcome::Empty,
            false => Outcome::Written(emitted.written),
        };

        Ok((outcome, emitted.warnings.len()))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("successors", &self.successors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::tests::project;
    use crate::transform::{MinifyJs, Rename};
    use std::fs::{self, File};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    fn counter() -> (Arc<AtomicUsize>, Successor) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let successor = Successor::Run(Arc::new(move |_: &BuildContext| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        (count, successor)
    }

    #[test]
    fn successors_see_the_written_output() {
        let (_dir, ctx) = project(&[("src/js/main.js", "var a = 1;")]);
        let seen = Arc::new(AtomicUsize::new(0));
        let inner = seen.clone();

        let task = Task::transform(
            "js:build",
            ["src/js/main.js"],
            Transform::per_file("build/js")
                .stage(MinifyJs::default())
                .stage(Rename::suffix(".min")),
        )
        .then(Successor::Run(Arc::new(move |ctx: &BuildContext| {
            if ctx.config.resolve("build/js/main.min.js").is_file() {
                inner.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })));

        let record = task.run(&ctx).unwrap();

        assert!(record.outcome.is_written());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_inputs_do_not_trigger_successors() {
        let (_dir, ctx) = project(&[]);
        let (count, successor) = counter();

        let task = Task::transform("js:build", ["src/js/*.js"], Transform::per_file("build/js"))
            .then(successor);

        let record = task.run(&ctx).unwrap();

        assert_eq!(record.outcome, Outcome::Empty);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!ctx.config.resolve("build/js").exists());
    }

    #[test]
    fn fresh_output_is_skipped_in_production() {
        let (_dir, ctx) = project(&[("src/a.txt", "a"), ("out/a.txt", "a")]);
        let now = SystemTime::now();
        for file in ["src/a.txt", "out/a.txt"] {
            File::options()
                .write(true)
                .open(ctx.config.resolve(file))
                .unwrap()
                .set_modified(now)
                .unwrap();
        }
        let (count, successor) = counter();

        let task = Task::transform("copy", ["src/*.txt"], Transform::per_file("out"))
            .gate(Gate::Output("out/a.txt".into()))
            .then(successor);

        assert_eq!(task.run(&ctx).unwrap().outcome, Outcome::Skipped);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mirror_gate_skips_when_every_copy_is_fresh() {
        let (_dir, ctx) = project(&[("src/static/robots.txt", "User-agent: *")]);
        let task = Task::transform(
            "relocate-static-files",
            ["src/static/**/*"],
            Transform::per_file("build"),
        )
        .gate(Gate::Mirror("build".into()));

        let first = task.run(&ctx).unwrap();
        let second = task.run(&ctx).unwrap();

        assert_eq!(
            first.outcome,
            Outcome::Written(vec![ctx.config.resolve("build/robots.txt")])
        );
        assert_eq!(second.outcome, Outcome::Skipped);
    }

    #[test]
    fn successor_failure_fails_the_task() {
        let (_dir, ctx) = project(&[("src/a.txt", "a")]);
        let task = Task::transform("copy", ["src/*.txt"], Transform::per_file("out")).then(
            Successor::Run(Arc::new(|_: &BuildContext| Err(anyhow::anyhow!("nowhere").into()))),
        );

        assert!(matches!(task.run(&ctx), Err(TaskError::Other(_))));
    }

    #[test]
    fn invocations_of_one_task_never_overlap() {
        let (_dir, ctx) = project(&[]);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let task = {
            let (active, peak) = (active.clone(), peak.clone());
            Task::effect("html:build", move |_| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Outcome::Empty)
            })
        };

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| task.run(&ctx).unwrap());
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn effect_tasks_report_their_outcome() {
        let (_dir, ctx) = project(&[]);
        let task = Task::effect("touch", |ctx| {
            let path = ctx.config.resolve("touched");
            fs::write(&path, "")?;
            Ok(Outcome::Written(vec![path]))
        });

        let record = task.run(&ctx).unwrap();

        assert_eq!(record.name, "touch");
        assert!(record.outcome.is_written());
    }
}

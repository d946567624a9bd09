use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::task::{Outcome, TaskRecord};

/// Record of a run.
///
/// Returned by [`Orchestrator::run`](crate::Orchestrator::run), lists every
/// task that settled successfully, in the order of the executed step.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub records: Vec<TaskRecord>,
}

impl Report {
    pub fn get(&self, name: &str) -> Option<&TaskRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    /// Names of the tasks that wrote output.
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.filter(|outcome| outcome.is_written())
    }

    /// Names of the tasks whose gate found them up to date.
    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.filter(|outcome| matches!(outcome, Outcome::Skipped))
    }

    pub fn warnings(&self) -> usize {
        self.records.iter().map(|record| record.warnings).sum()
    }

    pub fn duration(&self) -> Duration {
        self.records.iter().map(|record| record.duration).sum()
    }

    fn filter(&self, f: impl Fn(&Outcome) -> bool) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(move |record| f(&record.outcome))
            .map(|record| record.name.as_str())
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self
            .records
            .iter()
            .map(|record| record.name.len())
            .max()
            .unwrap_or(0);

        for record in &self.records {
            write!(
                f,
                "{:<width$}  {:<16}  {:>8.2?}",
                record.name,
                record.outcome.to_string(),
                record.duration
            )?;
            if record.warnings > 0 {
                write!(f, "  {} warning(s)", record.warnings)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, outcome: Outcome, warnings: usize) -> TaskRecord {
        TaskRecord {
            name: name.into(),
            outcome,
            warnings,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn groups_records_by_outcome() {
        let report = Report {
            records: vec![
                record("js:build", Outcome::Written(vec!["build/js/main.min.js".into()]), 0),
                record("css:build", Outcome::Written(vec![]), 2),
                record("fonts:css", Outcome::Skipped, 0),
                record("forms:relocate", Outcome::Empty, 0),
            ],
        };

        assert_eq!(report.written().collect::<Vec<_>>(), ["js:build", "css:build"]);
        assert_eq!(report.skipped().collect::<Vec<_>>(), ["fonts:css"]);
        assert_eq!(report.warnings(), 2);
        assert_eq!(report.duration(), Duration::from_millis(20));
        assert_eq!(report.to_string().lines().count(), 4);
    }
}

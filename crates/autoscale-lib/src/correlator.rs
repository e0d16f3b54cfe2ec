//! Joins tasks to applications and resource samples to tasks
//!
//! Produces one [`UsageAggregate`] per application for the current cycle.
//! Every application in the snapshot gets an entry, even when nothing matched.

use crate::models::{Application, ResourceSample, Task, UsageAggregate};
use std::collections::HashMap;
use tracing::trace;

/// Group tasks by the application that owns them
pub fn group_tasks(tasks: &[Task]) -> HashMap<&str, Vec<&Task>> {
    let mut grouped: HashMap<&str, Vec<&Task>> = HashMap::new();
    for task in tasks {
        grouped.entry(task.app_id.as_str()).or_default().push(task);
    }
    grouped
}

/// Aggregate the cycle's samples per application
pub fn correlate(
    applications: &[Application],
    tasks: &[Task],
    samples: &[ResourceSample],
) -> HashMap<String, UsageAggregate> {
    let grouped = group_tasks(tasks);

    // executor id -> owning application, restricted to known applications
    let mut owner: HashMap<&str, &str> = HashMap::new();
    for app in applications {
        if let Some(app_tasks) = grouped.get(app.id.as_str()) {
            for task in app_tasks {
                owner.insert(task.id.as_str(), app.id.as_str());
            }
        }
    }

    let mut aggregates: HashMap<String, UsageAggregate> = applications
        .iter()
        .map(|app| (app.id.clone(), UsageAggregate::default()))
        .collect();

    for sample in samples {
        let Some(app_id) = owner.get(sample.executor_id.as_str()) else {
            continue;
        };
        if let Some(aggregate) = aggregates.get_mut(*app_id) {
            aggregate.add(sample);
        }
    }

    for (app_id, aggregate) in &aggregates {
        trace!(
            app_id = %app_id,
            samples = aggregate.samples(),
            cpu_seconds = aggregate.cpu_seconds,
            mem_rss_bytes = aggregate.mem_rss_bytes,
            "Correlated application usage"
        );
    }

    aggregates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str) -> Application {
        Application {
            id: id.to_string(),
            instances: 1,
            labels: HashMap::new(),
        }
    }

    fn task(id: &str, app_id: &str) -> Task {
        Task {
            id: id.to_string(),
            app_id: app_id.to_string(),
            host: "10.0.0.1".to_string(),
        }
    }

    fn sample(executor_id: &str, cpu: f64, rss: u64, limit: u64, ts: f64) -> ResourceSample {
        ResourceSample {
            executor_id: executor_id.to_string(),
            cpus_system_time_secs: cpu / 2.0,
            cpus_user_time_secs: cpu / 2.0,
            mem_rss_bytes: rss,
            mem_limit_bytes: limit,
            timestamp: ts,
        }
    }

    #[test]
    fn test_group_tasks_by_application() {
        let tasks = vec![task("a.1", "/a"), task("b.1", "/b"), task("a.2", "/a")];
        let grouped = group_tasks(&tasks);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["/a"].len(), 2);
        assert_eq!(grouped["/b"].len(), 1);
    }

    #[test]
    fn test_sums_samples_of_all_tasks() {
        let apps = vec![app("/a")];
        let tasks = vec![task("a.1", "/a"), task("a.2", "/a")];
        let samples = vec![
            sample("a.1", 4.0, 100, 1000, 10.0),
            sample("a.2", 6.0, 300, 1000, 12.5),
        ];

        let aggregates = correlate(&apps, &tasks, &samples);
        let a = &aggregates["/a"];

        assert_eq!(a.cpu_seconds, 10.0);
        assert_eq!(a.mem_rss_bytes, 400);
        assert_eq!(a.mem_limit_bytes, 2000);
        assert_eq!(a.timestamp, 12.5);
        assert_eq!(a.executors, vec!["a.1".to_string(), "a.2".to_string()]);
    }

    #[test]
    fn test_ignores_samples_of_other_executors() {
        let apps = vec![app("/a"), app("/b")];
        let tasks = vec![task("a.1", "/a"), task("b.1", "/b")];
        let samples = vec![
            sample("a.1", 1.0, 10, 100, 1.0),
            sample("b.1", 2.0, 20, 100, 1.0),
            sample("unrelated-executor", 99.0, 99, 100, 1.0),
        ];

        let aggregates = correlate(&apps, &tasks, &samples);

        assert_eq!(aggregates["/a"].cpu_seconds, 1.0);
        assert_eq!(aggregates["/b"].cpu_seconds, 2.0);
        assert_eq!(aggregates.len(), 2);
    }

    #[test]
    fn test_application_without_tasks_gets_zero_aggregate() {
        let apps = vec![app("/idle")];
        let aggregates = correlate(&apps, &[], &[sample("x", 1.0, 1, 1, 1.0)]);

        assert!(aggregates["/idle"].is_empty());
        assert_eq!(aggregates["/idle"], UsageAggregate::default());
    }

    #[test]
    fn test_tasks_of_unknown_applications_are_dropped() {
        let apps = vec![app("/a")];
        let tasks = vec![task("ghost.1", "/ghost")];
        let samples = vec![sample("ghost.1", 5.0, 5, 5, 1.0)];

        let aggregates = correlate(&apps, &tasks, &samples);

        assert_eq!(aggregates.len(), 1);
        assert!(aggregates["/a"].is_empty());
    }
}

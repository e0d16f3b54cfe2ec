//! Scale-up decisions from utilization and policy thresholds
//!
//! Memory utilization is instantaneous; CPU utilization is a rate between
//! the previous and current aggregates. A figure that cannot be computed is
//! left undefined and never triggers. The engine never scales down.

use crate::models::{ManagedApplication, ScaleDecision, UsageAggregate, Utilization, Verdict};
use tracing::debug;

/// Memory rss as a percentage of the memory limit
pub fn mem_utilization(current: &UsageAggregate) -> Option<f64> {
    if current.is_empty() || current.mem_limit_bytes == 0 {
        return None;
    }
    Some(current.mem_rss_bytes as f64 / current.mem_limit_bytes as f64 * 100.0)
}

/// CPU seconds consumed per elapsed second between two aggregates, as a percentage
///
/// Undefined without a previous aggregate, when either side has no samples,
/// when the two sides summed different executors, when time did not advance,
/// or when the counters went backwards.
pub fn cpu_utilization(current: &UsageAggregate, previous: Option<&UsageAggregate>) -> Option<f64> {
    let previous = previous?;
    if current.is_empty() || previous.is_empty() {
        return None;
    }
    if !current.covers_same_executors(previous) {
        return None;
    }

    let elapsed = current.timestamp - previous.timestamp;
    if !(elapsed > 0.0) {
        return None;
    }

    let consumed = current.cpu_seconds - previous.cpu_seconds;
    if consumed < 0.0 {
        return None;
    }

    Some(consumed / elapsed * 100.0)
}

/// Instance count after scaling, kept within `[current, max_instances]`
pub fn target_instances(current: u32, multiplier: f64, max_instances: u32) -> u32 {
    let desired = (current as f64 * multiplier).ceil();
    let desired = if desired.is_finite() && desired > 0.0 {
        desired.min(u32::MAX as f64) as u32
    } else {
        0
    };
    desired.min(max_instances).max(current)
}

/// Evaluates applications against their scaling policy
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `app` should scale up this cycle
    pub fn evaluate(
        &self,
        app: &ManagedApplication,
        current: &UsageAggregate,
        previous: Option<&UsageAggregate>,
    ) -> ScaleDecision {
        let policy = &app.policy;
        let utilization = Utilization {
            mem_percent: mem_utilization(current),
            cpu_percent: cpu_utilization(current, previous),
        };

        let cpu_exceeded = policy.trigger_mode.watches_cpu()
            && utilization
                .cpu_percent
                .is_some_and(|cpu| cpu > f64::from(policy.max_cpu_time));
        let mem_exceeded = policy.trigger_mode.watches_mem()
            && utilization
                .mem_percent
                .is_some_and(|mem| mem > f64::from(policy.max_mem_percent));

        let verdict = if cpu_exceeded || mem_exceeded {
            let target = target_instances(
                app.instances,
                policy.autoscale_multiplier,
                policy.max_instances,
            );
            if target > app.instances {
                Verdict::ScaleTo(target)
            } else {
                debug!(
                    app_id = %app.id,
                    instances = app.instances,
                    max_instances = policy.max_instances,
                    "Threshold exceeded but application is at its instance cap"
                );
                Verdict::NoAction
            }
        } else {
            Verdict::NoAction
        };

        debug!(
            app_id = %app.id,
            trigger_mode = %policy.trigger_mode,
            cpu_percent = ?utilization.cpu_percent,
            mem_percent = ?utilization.mem_percent,
            cpu_exceeded,
            mem_exceeded,
            verdict = ?verdict,
            "Evaluated application"
        );

        ScaleDecision {
            app_id: app.id.clone(),
            current_instances: app.instances,
            verdict,
            utilization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ScalingPolicy, TriggerMode};

    fn policy(mode: TriggerMode) -> ScalingPolicy {
        ScalingPolicy {
            max_mem_percent: 80,
            max_cpu_time: 50,
            max_instances: 5,
            trigger_mode: mode,
            autoscale_multiplier: 1.5,
        }
    }

    fn svc(instances: u32, mode: TriggerMode) -> ManagedApplication {
        ManagedApplication {
            id: "svc-a".to_string(),
            instances,
            policy: policy(mode),
        }
    }

    fn aggregate(cpu: f64, ts: f64, rss: u64, limit: u64) -> UsageAggregate {
        UsageAggregate {
            cpu_seconds: cpu,
            mem_rss_bytes: rss,
            mem_limit_bytes: limit,
            timestamp: ts,
            executors: vec!["svc-a.1".to_string()],
        }
    }

    #[test]
    fn test_cpu_rate_between_cycles() {
        let previous = aggregate(10.0, 100.0, 0, 0);
        let current = aggregate(14.0, 104.0, 0, 0);

        assert_eq!(cpu_utilization(&current, Some(&previous)), Some(100.0));
    }

    #[test]
    fn test_cpu_rate_undefined_without_history() {
        let current = aggregate(14.0, 104.0, 0, 0);
        assert_eq!(cpu_utilization(&current, None), None);
    }

    #[test]
    fn test_cpu_rate_undefined_for_non_positive_elapsed() {
        let previous = aggregate(10.0, 104.0, 0, 0);
        assert_eq!(cpu_utilization(&aggregate(14.0, 104.0, 0, 0), Some(&previous)), None);
        assert_eq!(cpu_utilization(&aggregate(14.0, 90.0, 0, 0), Some(&previous)), None);
    }

    #[test]
    fn test_cpu_rate_undefined_after_counter_reset() {
        let previous = aggregate(50.0, 100.0, 0, 0);
        let current = aggregate(2.0, 110.0, 0, 0);
        assert_eq!(cpu_utilization(&current, Some(&previous)), None);
    }

    #[test]
    fn test_cpu_rate_undefined_for_empty_aggregates() {
        let previous = UsageAggregate::default();
        let current = aggregate(14.0, 104.0, 0, 0);
        assert_eq!(cpu_utilization(&current, Some(&previous)), None);
        assert_eq!(
            cpu_utilization(&UsageAggregate::default(), Some(&current)),
            None
        );
    }

    #[test]
    fn test_cpu_rate_undefined_when_executors_differ() {
        let previous = aggregate(1000.0, 100.0, 0, 0);
        let mut current = aggregate(2001.0, 110.0, 0, 0);
        current.executors.push("svc-a.2".to_string());

        assert_eq!(cpu_utilization(&current, Some(&previous)), None);
        assert_eq!(cpu_utilization(&previous, Some(&current)), None);
    }

    #[test]
    fn test_mem_utilization() {
        assert_eq!(mem_utilization(&aggregate(0.0, 1.0, 50, 200)), Some(25.0));
        assert_eq!(mem_utilization(&aggregate(0.0, 1.0, 50, 0)), None);
        assert_eq!(mem_utilization(&UsageAggregate::default()), None);
    }

    #[test]
    fn test_target_always_within_bounds() {
        for current in 1..=20u32 {
            for max in current..=25u32 {
                for multiplier in [0.1, 0.5, 1.0, 1.01, 1.5, 2.0, 3.7, 100.0] {
                    let target = target_instances(current, multiplier, max);
                    assert!(
                        (current..=max).contains(&target),
                        "current={current} max={max} multiplier={multiplier} target={target}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_cpu_trigger_scales_up() {
        let engine = DecisionEngine::new();
        let previous = aggregate(0.0, 100.0, 0, 0);
        let current = aggregate(3.0, 104.0, 0, 0); // 75%

        let decision = engine.evaluate(&svc(2, TriggerMode::Cpu), &current, Some(&previous));

        assert_eq!(decision.utilization.cpu_percent, Some(75.0));
        assert_eq!(decision.verdict, Verdict::ScaleTo(3));
    }

    #[test]
    fn test_target_clamped_to_max_instances() {
        let engine = DecisionEngine::new();
        let previous = aggregate(0.0, 100.0, 0, 0);
        let current = aggregate(3.0, 104.0, 0, 0);

        let decision = engine.evaluate(&svc(4, TriggerMode::Cpu), &current, Some(&previous));

        assert_eq!(decision.verdict, Verdict::ScaleTo(5));
    }

    #[test]
    fn test_no_action_at_cap() {
        let engine = DecisionEngine::new();
        let previous = aggregate(0.0, 100.0, 0, 0);
        let current = aggregate(3.0, 104.0, 0, 0);

        let decision = engine.evaluate(&svc(5, TriggerMode::Cpu), &current, Some(&previous));

        assert_eq!(decision.verdict, Verdict::NoAction);
    }

    #[test]
    fn test_first_sighting_never_fires_cpu_trigger() {
        let engine = DecisionEngine::new();
        let current = aggregate(1_000.0, 104.0, 0, 0);

        let decision = engine.evaluate(&svc(2, TriggerMode::Cpu), &current, None);

        assert_eq!(decision.utilization.cpu_percent, None);
        assert_eq!(decision.verdict, Verdict::NoAction);
    }

    #[test]
    fn test_mem_trigger_without_history() {
        let engine = DecisionEngine::new();
        let current = aggregate(0.0, 104.0, 90, 100);

        let decision = engine.evaluate(&svc(2, TriggerMode::Mem), &current, None);

        assert_eq!(decision.verdict, Verdict::ScaleTo(3));
    }

    #[test]
    fn test_trigger_mode_limits_dimensions() {
        let engine = DecisionEngine::new();
        let previous = aggregate(0.0, 100.0, 0, 100);
        // cpu 75% > 50, mem 10% < 80
        let current = aggregate(3.0, 104.0, 10, 100);

        let mem_only = engine.evaluate(&svc(2, TriggerMode::Mem), &current, Some(&previous));
        assert_eq!(mem_only.verdict, Verdict::NoAction);

        // cpu 0% < 50, mem 90% > 80
        let current = aggregate(0.0, 104.0, 90, 100);
        let cpu_only = engine.evaluate(&svc(2, TriggerMode::Cpu), &current, Some(&previous));
        assert_eq!(cpu_only.verdict, Verdict::NoAction);
    }

    #[test]
    fn test_both_mode_fires_on_either_dimension() {
        let engine = DecisionEngine::new();
        let previous = aggregate(0.0, 100.0, 0, 100);

        let cpu_hot = aggregate(3.0, 104.0, 10, 100);
        let decision = engine.evaluate(&svc(2, TriggerMode::Both), &cpu_hot, Some(&previous));
        assert_eq!(decision.verdict, Verdict::ScaleTo(3));

        let mem_hot = aggregate(0.0, 104.0, 90, 100);
        let decision = engine.evaluate(&svc(2, TriggerMode::Both), &mem_hot, Some(&previous));
        assert_eq!(decision.verdict, Verdict::ScaleTo(3));
    }

    #[test]
    fn test_thresholds_are_strict() {
        let engine = DecisionEngine::new();
        // exactly 80% memory
        let current = aggregate(0.0, 104.0, 80, 100);

        let decision = engine.evaluate(&svc(2, TriggerMode::Mem), &current, None);

        assert_eq!(decision.verdict, Verdict::NoAction);
    }
}

// Stop decision - pure evaluation of one poll cycle

use std::fmt;

/// Thresholds resolved for one instant (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Thresholds {
    /// `resolve(idle, prework)`
    pub prework: Option<u64>,
    /// `resolve(idle, postwork)`
    pub postwork: Option<u64>,
    /// `resolve(elapsed, prework)`
    pub elapsed: Option<u64>,
}

/// Readings taken during one monitoring cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalSnapshot {
    pub time_since_workers_started: Option<i64>,
    pub time_since_last_completion: Option<i64>,
    pub num_processes_working: u32,
}

impl SignalSnapshot {
    /// Neither marker is available (workers presumably not started)
    pub fn is_undecidable(&self) -> bool {
        self.time_since_workers_started.is_none() && self.time_since_last_completion.is_none()
    }
}

/// Which stop condition fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Idle since last completion reached the post-work threshold
    PostWorkIdle { idle_secs: i64, threshold: u64 },
    /// No completion yet; idle since workers started reached the pre-work threshold
    PreWorkIdle { idle_secs: i64, threshold: u64 },
    /// Time since workers started reached the elapsed threshold
    Elapsed { elapsed_secs: i64, threshold: u64 },
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::PostWorkIdle {
                idle_secs,
                threshold,
            } => write!(f, "PostWork: {idle_secs} >= {threshold}"),
            TriggerReason::PreWorkIdle {
                idle_secs,
                threshold,
            } => write!(f, "PreWork: {idle_secs} >= {threshold}"),
            TriggerReason::Elapsed {
                elapsed_secs,
                threshold,
            } => write!(f, "Elapsed: {elapsed_secs} >= {threshold}"),
        }
    }
}

fn reached(observed: i64, threshold: u64) -> bool {
    u64::try_from(observed).is_ok_and(|secs| secs >= threshold)
}

/// Decide whether the stop sequence should start
///
/// Nothing triggers while any worker is busy. Otherwise the conditions are
/// checked in order (post-work idle, pre-work idle, elapsed) and the first
/// one that holds is returned. The elapsed check ignores completion history.
pub fn evaluate(snapshot: &SignalSnapshot, thresholds: &Thresholds) -> Option<TriggerReason> {
    if snapshot.num_processes_working > 0 {
        return None;
    }

    let started = snapshot.time_since_workers_started;
    let completed = snapshot.time_since_last_completion;

    if let (Some(idle_secs), Some(threshold)) = (completed, thresholds.postwork) {
        if reached(idle_secs, threshold) {
            return Some(TriggerReason::PostWorkIdle {
                idle_secs,
                threshold,
            });
        }
    }

    if completed.is_none() {
        if let (Some(idle_secs), Some(threshold)) = (started, thresholds.prework) {
            if reached(idle_secs, threshold) {
                return Some(TriggerReason::PreWorkIdle {
                    idle_secs,
                    threshold,
                });
            }
        }
    }

    if let (Some(elapsed_secs), Some(threshold)) = (started, thresholds.elapsed) {
        if reached(elapsed_secs, threshold) {
            return Some(TriggerReason::Elapsed {
                elapsed_secs,
                threshold,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(started: Option<i64>, completed: Option<i64>, working: u32) -> SignalSnapshot {
        SignalSnapshot {
            time_since_workers_started: started,
            time_since_last_completion: completed,
            num_processes_working: working,
        }
    }

    const IDLE: Thresholds = Thresholds {
        prework: Some(11100),
        postwork: Some(740),
        elapsed: None,
    };

    #[test]
    fn test_prework_idle_triggers_without_completion() {
        let decision = evaluate(&snapshot(Some(12000), None, 0), &IDLE);
        assert_eq!(
            decision,
            Some(TriggerReason::PreWorkIdle {
                idle_secs: 12000,
                threshold: 11100
            })
        );
    }

    #[test]
    fn test_prework_ignored_once_work_completed() {
        // Workers started long ago but last completion is recent
        assert_eq!(evaluate(&snapshot(Some(12000), Some(100), 0), &IDLE), None);
    }

    #[test]
    fn test_postwork_idle_triggers() {
        let decision = evaluate(&snapshot(Some(1802), Some(825), 0), &IDLE);
        assert_eq!(
            decision,
            Some(TriggerReason::PostWorkIdle {
                idle_secs: 825,
                threshold: 740
            })
        );
    }

    #[test]
    fn test_elapsed_ignores_completion_history() {
        let thresholds = Thresholds {
            prework: None,
            postwork: None,
            elapsed: Some(11100),
        };
        let decision = evaluate(&snapshot(Some(12000), Some(5), 0), &thresholds);
        assert_eq!(
            decision,
            Some(TriggerReason::Elapsed {
                elapsed_secs: 12000,
                threshold: 11100
            })
        );
    }

    #[test]
    fn test_busy_workers_block_every_condition() {
        let all = Thresholds {
            prework: Some(1),
            postwork: Some(1),
            elapsed: Some(1),
        };
        assert_eq!(evaluate(&snapshot(Some(99999), None, 1), &all), None);
        assert_eq!(evaluate(&snapshot(Some(99999), Some(99999), 3), &all), None);
    }

    #[test]
    fn test_absent_thresholds_never_trigger() {
        let none = Thresholds::default();
        assert_eq!(evaluate(&snapshot(Some(99999), Some(99999), 0), &none), None);
    }

    #[test]
    fn test_threshold_is_inclusive_and_future_timestamps_never_trigger() {
        assert!(evaluate(&snapshot(Some(11100), None, 0), &IDLE).is_some());
        assert!(evaluate(&snapshot(Some(11099), None, 0), &IDLE).is_none());

        let zero = Thresholds {
            prework: Some(0),
            postwork: Some(0),
            elapsed: Some(0),
        };
        assert_eq!(evaluate(&snapshot(Some(-5), Some(-5), 0), &zero), None);
    }

    #[test]
    fn test_undecidable_snapshot() {
        assert!(snapshot(None, None, 0).is_undecidable());
        assert!(!snapshot(Some(1), None, 0).is_undecidable());
    }
}

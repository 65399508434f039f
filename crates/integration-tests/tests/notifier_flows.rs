//! Workers stamp markers through the Notifier; the runner reads them back

mod common;

use chrono::Duration;
use common::*;
use std::fs;

use idlestop_core::application::PollOutcome;
use idlestop_core::domain::TriggerReason;
use idlestop_infra_system::Notifier;

const SPEC: &str = "idlePreWork:10800+300,idlePostWork:730+10";

fn notifier(host: &Host) -> Notifier {
    Notifier::new(
        host.workers_start_file(),
        host.last_complete_file(),
        host.last_error_file(),
        host.clock.clone(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_notified_start_drives_prework_shutdown() {
    let host = Host::new(vec![0], vec![0]);
    host.clock.set(now() - Duration::seconds(12_000));
    notifier(&host).notify_worker_start().unwrap();
    host.clock.set(now());

    let report = host.runner(SPEC).run().await;

    assert_eq!(
        report.trigger,
        TriggerReason::PreWorkIdle {
            idle_secs: 12_000,
            threshold: 11_100
        }
    );
}

#[tokio::test]
async fn test_notified_completion_switches_to_postwork() {
    let host = Host::new(vec![0], vec![0]);
    let notifier = notifier(&host);
    host.clock.set(now() - Duration::seconds(1_802));
    notifier.notify_worker_start().unwrap();
    host.clock.set(now() - Duration::seconds(500));
    notifier.notify_complete().unwrap();
    host.clock.set(now());
    let runner = host.runner(SPEC);

    match runner.poll_once().await {
        PollOutcome::Waiting { snapshot, thresholds } => {
            assert_eq!(snapshot.time_since_last_completion, Some(500));
            assert_eq!(snapshot.time_since_workers_started, Some(1_802));
            assert_eq!(thresholds.postwork, Some(740));
        }
        other => panic!("expected Waiting, got {other:?}"),
    }

    host.clock.advance_secs(300);
    assert_eq!(
        runner.poll_once().await,
        PollOutcome::Triggered(TriggerReason::PostWorkIdle {
            idle_secs: 800,
            threshold: 740
        })
    );
}

#[tokio::test]
async fn test_clear_resets_to_no_signal() {
    let host = Host::new(vec![0], vec![0]);
    let notifier = notifier(&host);
    notifier.notify_worker_start().unwrap();
    notifier.notify_complete().unwrap();
    notifier.notify_error().unwrap();
    assert_eq!(
        fs::read_to_string(host.last_error_file()).unwrap(),
        "2018-07-25 15:16:00 UTC"
    );

    notifier.clear().unwrap();

    assert_eq!(host.runner(SPEC).poll_once().await, PollOutcome::NoSignal);
    assert!(!host.last_error_file().exists());
}

mod common;

use common::{admin, eventually, match_loop, match_loop_with, wait_for_state, Calls, FakeBackend, FakeExtractor};
use gym_auth::common::GymAuthError;
use gym_auth::core::matcher::{MSG_NO_FACE, MSG_NO_MATCH};
use gym_auth::core::{MatchCallback, ScanOutcome, ScanState};
use gym_auth::storage::{AdminRecord, Roster};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn recorder() -> (Arc<Mutex<Vec<String>>>, MatchCallback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: MatchCallback = Box::new(move |admin: &AdminRecord| {
        sink.lock().unwrap().push(admin.username.clone());
        Ok(())
    });
    (seen, callback)
}

#[tokio::test]
async fn matches_first_admin_in_roster_order() {
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), Some(vec![1.0, 0.0])), false);
    let roster = Roster::fixed(vec![
        admin("nofaces", None),
        admin("admin1", Some("0.8,0.2")),
        admin("admin2", Some("1.0,0.0")),
    ]);
    let (seen, callback) = recorder();

    let scan = matcher.start(roster, callback);
    let updates = scan.subscribe();
    let outcome = scan.wait().await;

    match outcome {
        ScanOutcome::Matched(admin) => assert_eq!(admin.username, "admin1"),
        other => panic!("expected a match, got {:?}", other),
    }
    assert_eq!(*seen.lock().unwrap(), vec!["admin1".to_string()]);
    assert!(matches!(updates.borrow().state, ScanState::Matched(_)));
    assert_eq!(updates.borrow().message, "Success!");
    assert_eq!(calls.stops(), 1);
    assert!(!matcher.device_held());
}

#[tokio::test]
async fn roster_without_templates_keeps_scanning_until_cancelled() {
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), Some(vec![1.0, 0.0])), false);
    let roster = Roster::fixed(vec![admin("a", None), admin("b", None)]);
    let (seen, callback) = recorder();

    let scan = matcher.start(roster, callback);
    let mut updates = scan.subscribe();
    wait_for_state(&mut updates, ScanState::is_scanning).await;
    eventually(|| calls.extracts() >= 3).await;

    let current = scan.current();
    assert!(current.state.is_scanning(), "state was {:?}", current.state);
    assert!(!scan.is_finished());
    assert_eq!(calls.stops(), 0);

    assert!(matches!(scan.cancel().await, ScanOutcome::Cancelled));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(calls.opens(), 1);
    assert_eq!(calls.stops(), 1);
    assert!(!matcher.device_held());
    assert_eq!(updates.borrow().state, ScanState::Idle);
}

#[tokio::test]
async fn unmatched_face_retries() {
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), Some(vec![1.0, 0.0])), false);
    let roster = Roster::fixed(vec![admin("stranger", Some("-1.0,0.0"))]);
    let (_seen, callback) = recorder();

    let scan = matcher.start(roster, callback);
    let mut updates = scan.subscribe();
    let update = wait_for_state(&mut updates, |s| *s == ScanState::Scanning).await;
    assert_eq!(update.state, ScanState::Scanning);

    eventually(|| scan.current().message == MSG_NO_MATCH).await;
    assert!(matches!(scan.cancel().await, ScanOutcome::Cancelled));
}

#[tokio::test]
async fn empty_frames_report_no_face() {
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), None), false);
    let roster = Roster::fixed(vec![admin("a", Some("1.0,0.0"))]);
    let (seen, callback) = recorder();

    let scan = matcher.start(roster, callback);
    let mut updates = scan.subscribe();
    let update = wait_for_state(&mut updates, |s| *s == ScanState::NoFaceDetected).await;
    assert_eq!(update.state, ScanState::NoFaceDetected);
    assert_eq!(update.message, MSG_NO_FACE);

    scan.cancel().await;
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(calls.stops(), 1);
}

#[tokio::test]
async fn camera_failure_ends_in_error_without_loading_model() {
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), Some(vec![1.0, 0.0])), true);
    let (seen, callback) = recorder();

    let scan = matcher.start(Roster::fixed(vec![admin("a", Some("1.0,0.0"))]), callback);
    let updates = scan.subscribe();
    let outcome = scan.wait().await;

    assert!(matches!(outcome, ScanOutcome::Failed(GymAuthError::Capture(_))));
    assert!(matches!(&updates.borrow().state, ScanState::Error(reason) if reason.contains("permission denied")));
    assert_eq!(calls.loads(), 0);
    assert!(seen.lock().unwrap().is_empty());
    assert!(!matcher.device_held());
}

#[tokio::test]
async fn model_failure_releases_camera() {
    let calls = Arc::new(Calls::default());
    let mut extractor = FakeExtractor::new(calls.clone(), Some(vec![1.0, 0.0]));
    extractor.fail_load = true;
    let matcher = match_loop(&calls, extractor, false);
    let (_seen, callback) = recorder();

    let scan = matcher.start(Roster::fixed(vec![admin("a", Some("1.0,0.0"))]), callback);
    let outcome = scan.wait().await;

    match outcome {
        ScanOutcome::Failed(e) => {
            assert!(matches!(e, GymAuthError::ModelLoad(_)));
            assert!(e.falls_back_to_password());
        }
        other => panic!("expected model failure, got {:?}", other),
    }
    assert_eq!(calls.opens(), 1);
    assert_eq!(calls.stops(), 1);
    assert_eq!(calls.extracts(), 0);
    assert!(!matcher.device_held());
}

#[tokio::test]
async fn model_is_loaded_once_across_scans() {
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), None), false);

    for _ in 0..2 {
        let (_seen, callback) = recorder();
        let scan = matcher.start(Roster::fixed(vec![admin("a", Some("1.0,0.0"))]), callback);
        let mut updates = scan.subscribe();
        wait_for_state(&mut updates, ScanState::is_scanning).await;
        scan.cancel().await;
    }

    assert_eq!(calls.loads(), 1);
    assert_eq!(calls.opens(), 2);
    assert_eq!(calls.stops(), 2);
}

#[tokio::test]
async fn dropping_the_handle_releases_camera() {
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), None), false);
    let (_seen, callback) = recorder();

    let scan = matcher.start(Roster::fixed(Vec::new()), callback);
    let mut updates = scan.subscribe();
    wait_for_state(&mut updates, ScanState::is_scanning).await;
    drop(scan);

    eventually(|| calls.stops() == 1).await;
    eventually(|| !matcher.device_held()).await;
}

#[tokio::test]
async fn failing_handoff_is_reported() {
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), Some(vec![1.0, 0.0])), false);
    let callback: MatchCallback =
        Box::new(|_admin: &AdminRecord| Err(GymAuthError::Storage("disk full".into())));

    let scan = matcher.start(Roster::fixed(vec![admin("a", Some("1.0,0.0"))]), callback);
    let updates = scan.subscribe();

    assert!(matches!(scan.wait().await, ScanOutcome::Failed(GymAuthError::Storage(_))));
    assert!(matches!(updates.borrow().state, ScanState::Error(_)));
    assert_eq!(calls.stops(), 1);
}

#[tokio::test]
async fn slow_ticks_never_overlap() {
    let calls = Arc::new(Calls::default());
    let mut extractor = FakeExtractor::new(calls.clone(), None);
    extractor.delay = Duration::from_millis(35);
    let matcher = match_loop(&calls, extractor, false);
    let (_seen, callback) = recorder();

    let scan = matcher.start(Roster::fixed(vec![admin("a", Some("1.0,0.0"))]), callback);
    eventually(|| calls.extracts() >= 3).await;
    assert!(matches!(scan.cancel().await, ScanOutcome::Cancelled));

    assert_eq!(calls.max_in_extract(), 1);
    assert_eq!(calls.stops(), 1);
}

#[tokio::test]
async fn match_landing_after_cancel_is_discarded() {
    let calls = Arc::new(Calls::default());
    let mut extractor = FakeExtractor::new(calls.clone(), Some(vec![1.0, 0.0]));
    extractor.delay = Duration::from_millis(100);
    let matcher = match_loop(&calls, extractor, false);
    let (seen, callback) = recorder();

    let scan = matcher.start(Roster::fixed(vec![admin("a", Some("1.0,0.0"))]), callback);
    let updates = scan.subscribe();
    eventually(|| calls.extracts() >= 1).await;

    assert!(matches!(scan.cancel().await, ScanOutcome::Cancelled));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(updates.borrow().state, ScanState::Idle);
    assert_eq!(calls.stops(), 1);
    assert!(!matcher.device_held());
}

#[tokio::test]
async fn cancel_during_camera_open_waits_for_release() {
    let calls = Arc::new(Calls::default());
    let backend = FakeBackend {
        calls: calls.clone(),
        fail_open: false,
        open_delay: Duration::from_millis(150),
    };
    let matcher = match_loop_with(backend, FakeExtractor::new(calls.clone(), None));
    let (seen, callback) = recorder();

    let scan = matcher.start(Roster::fixed(vec![admin("a", Some("1.0,0.0"))]), callback);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(calls.opens(), 0);

    assert!(matches!(scan.cancel().await, ScanOutcome::Cancelled));
    assert_eq!(calls.opens(), 1);
    assert_eq!(calls.stops(), 1);
    assert_eq!(calls.loads(), 0);
    assert!(!matcher.device_held());
    assert!(seen.lock().unwrap().is_empty());
}

mod common;

use common::{admin, eventually, match_loop, wait_for_state, FakeExtractor, Calls};
use gym_auth::common::GymAuthError;
use gym_auth::core::{LoginGate, LoginHandoff, LoginMode, ScanOutcome, ScanState};
use gym_auth::storage::{AdminRecord, Roster, RosterFeed, SessionStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    sessions: SessionStore,
    calls: Arc<Calls>,
    logins: Arc<Mutex<Vec<String>>>,
    feed: RosterFeed,
    gate: LoginGate<FakeExtractor>,
}

fn harness(admins: Vec<AdminRecord>, live: Option<Vec<f32>>) -> Harness {
    harness_with(admins, |calls| FakeExtractor::new(calls, live))
}

fn harness_with(admins: Vec<AdminRecord>, extractor: impl FnOnce(Arc<Calls>) -> FakeExtractor) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let sessions = SessionStore::new_with_dir(dir.path().join("session")).unwrap();
    let calls = Arc::new(Calls::default());
    let logins = Arc::new(Mutex::new(Vec::new()));

    let sink = logins.clone();
    let handoff = LoginHandoff::new(
        sessions.clone(),
        Arc::new(move |admin: &AdminRecord| sink.lock().unwrap().push(admin.username.clone())),
    );
    let (feed, roster) = Roster::channel(admins);
    let matcher = match_loop(&calls, extractor(calls.clone()), false);

    Harness {
        _dir: dir,
        sessions,
        calls,
        logins,
        feed,
        gate: LoginGate::new(roster, handoff, matcher),
    }
}

fn staff() -> Vec<AdminRecord> {
    vec![admin("alice", Some("1.0,0.0")), admin("bob", None)]
}

#[tokio::test]
async fn password_login_persists_session_and_notifies() {
    let mut h = harness(staff(), None);

    let admin = h.gate.login_with_password("bob", "bob-pass").unwrap();
    assert_eq!(admin.username, "bob");
    assert_eq!(h.sessions.load(), Some(admin.clone()));
    assert_eq!(h.gate.session(), Some(&admin));
    assert_eq!(*h.logins.lock().unwrap(), vec!["bob".to_string()]);
}

#[tokio::test]
async fn wrong_password_writes_nothing() {
    let mut h = harness(staff(), None);

    let err = h.gate.login_with_password("bob", "bob-pas").unwrap_err();
    assert!(matches!(err, GymAuthError::InvalidCredentials));
    assert!(h.gate.login_with_password("nobody", "bob-pass").is_err());
    assert_eq!(h.sessions.load(), None);
    assert!(h.gate.session().is_none());
    assert!(h.logins.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_roster_accepts_default_admin() {
    let mut h = harness(Vec::new(), None);
    let admin = h.gate.login_with_password("admin", "123456").unwrap();
    assert_eq!(admin.name, "Super Admin");
}

#[tokio::test]
async fn session_survives_a_new_gate() {
    let mut h = harness(staff(), None);
    h.gate.login_with_password("alice", "alice-pass").unwrap();

    let handoff = LoginHandoff::new(h.sessions.clone(), Arc::new(|_: &AdminRecord| {}));
    let calls = Arc::new(Calls::default());
    let matcher = match_loop(&calls, FakeExtractor::new(calls.clone(), None), false);
    let mut restored = LoginGate::new(Roster::fixed(staff()), handoff, matcher);
    assert!(restored.session().is_none());
    assert_eq!(restored.restore_session().map(|a| a.username.as_str()), Some("alice"));
}

#[tokio::test]
async fn fresh_store_has_no_session() {
    let mut h = harness(staff(), None);
    assert!(h.gate.restore_session().is_none());
}

#[tokio::test]
async fn recovery_reveals_password_and_returns_to_password_mode() {
    let mut h = harness(staff(), None);
    h.gate.switch_mode(LoginMode::Forgot).await;

    let err = h.gate.recover_password("0000").unwrap_err();
    assert!(matches!(err, GymAuthError::NotFound(_)));
    assert_eq!(h.gate.mode(), LoginMode::Forgot);

    let recovered = h.gate.recover_password("09bob").unwrap();
    assert_eq!(recovered.username, "bob");
    assert_eq!(recovered.password, "bob-pass");
    assert_eq!(h.gate.mode(), LoginMode::Password);
}

#[tokio::test]
async fn face_login_persists_matched_admin() {
    let mut h = harness(staff(), Some(vec![1.0, 0.0]));

    let mut updates = h.gate.start_face_login();
    assert_eq!(h.gate.mode(), LoginMode::Face);
    let update = wait_for_state(&mut updates, |s| matches!(s, ScanState::Matched(_))).await;
    assert!(matches!(update.state, ScanState::Matched(_)));

    let outcome = h.gate.wait_face_login().await;
    assert!(matches!(outcome, Some(ScanOutcome::Matched(ref a)) if a.username == "alice"));
    assert_eq!(h.gate.session().map(|a| a.username.as_str()), Some("alice"));
    assert_eq!(h.sessions.load().map(|a| a.username), Some("alice".to_string()));
    assert_eq!(*h.logins.lock().unwrap(), vec!["alice".to_string()]);
    assert_eq!(h.calls.stops(), 1);
}

#[tokio::test]
async fn leaving_face_mode_releases_camera() {
    let mut h = harness(vec![admin("bob", None)], Some(vec![1.0, 0.0]));

    let mut updates = h.gate.start_face_login();
    wait_for_state(&mut updates, ScanState::is_scanning).await;
    assert!(h.gate.is_scanning());
    assert!(h.gate.matcher().device_held());

    h.gate.switch_mode(LoginMode::Password).await;
    assert_eq!(h.gate.mode(), LoginMode::Password);
    assert!(!h.gate.is_scanning());
    assert!(!h.gate.matcher().device_held());
    assert_eq!(h.calls.stops(), 1);
    assert!(h.sessions.load().is_none());
}

#[tokio::test]
async fn match_finishing_after_leaving_face_mode_logs_nobody_in() {
    let mut h = harness_with(staff(), |calls| {
        let mut extractor = FakeExtractor::new(calls, Some(vec![1.0, 0.0]));
        extractor.delay = Duration::from_millis(100);
        extractor
    });

    let mut updates = h.gate.start_face_login();
    wait_for_state(&mut updates, ScanState::is_scanning).await;
    eventually(|| h.calls.extracts() >= 1).await;

    h.gate.switch_mode(LoginMode::Password).await;
    assert!(h.gate.session().is_none());
    assert!(h.sessions.load().is_none());
    assert!(h.logins.lock().unwrap().is_empty());
    assert_eq!(h.calls.stops(), 1);
}

#[tokio::test]
async fn starting_twice_reuses_running_scan() {
    let mut h = harness(vec![admin("bob", None)], None);

    let mut first = h.gate.start_face_login();
    wait_for_state(&mut first, ScanState::is_scanning).await;
    let _second = h.gate.start_face_login();
    eventually(|| h.calls.extracts() >= 2).await;

    assert_eq!(h.calls.opens(), 1);
    h.gate.switch_mode(LoginMode::Forgot).await;
    assert_eq!(h.calls.stops(), 1);
}

#[tokio::test]
async fn logout_clears_session() {
    let mut h = harness(staff(), None);
    h.gate.login_with_password("bob", "bob-pass").unwrap();

    h.gate.logout().await.unwrap();
    assert!(h.gate.session().is_none());
    assert!(h.sessions.load().is_none());
    h.gate.logout().await.unwrap();
}

#[tokio::test]
async fn roster_sync_refreshes_session() {
    let mut h = harness(staff(), None);
    h.gate.login_with_password("bob", "bob-pass").unwrap();

    let mut renamed = admin("bob", None);
    renamed.name = "Robert".into();
    h.feed.publish(vec![admin("alice", None), renamed]);

    assert!(h.gate.on_roster_synced().unwrap());
    assert_eq!(h.gate.session().map(|a| a.name.as_str()), Some("Robert"));
    assert_eq!(h.sessions.load().map(|a| a.name), Some("Robert".to_string()));
}

#[tokio::test]
async fn roster_sync_keeps_session_of_removed_admin() {
    let mut h = harness(staff(), None);
    let bob = h.gate.login_with_password("bob", "bob-pass").unwrap();

    h.feed.publish(vec![admin("alice", None)]);

    assert!(!h.gate.on_roster_synced().unwrap());
    assert_eq!(h.gate.session(), Some(&bob));
    assert_eq!(h.sessions.load(), Some(bob));
}

#[tokio::test]
async fn roster_sync_without_session_does_nothing() {
    let mut h = harness(staff(), None);
    assert!(!h.gate.on_roster_synced().unwrap());
    assert!(h.sessions.load().is_none());
}

//! Login screen state: which mode is showing, the active face scan, and the
//! logged-in admin.

use crate::common::Result;
use crate::core::credentials::authenticate;
use crate::core::extractor::DescriptorExtractor;
use crate::core::matcher::{MatchLoop, ScanHandle, ScanOutcome, ScanUpdate};
use crate::core::recovery::{recover, RecoveredPassword};
use crate::storage::{AdminRecord, Roster, SessionStore};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    #[default]
    Password,
    Face,
    Forgot,
}

pub type SuccessCallback = Arc<dyn Fn(&AdminRecord) + Send + Sync>;

/// Persists the session, then tells the host application who logged in.
#[derive(Clone)]
pub struct LoginHandoff {
    sessions: SessionStore,
    on_success: SuccessCallback,
}

impl LoginHandoff {
    pub fn new(sessions: SessionStore, on_success: SuccessCallback) -> Self {
        Self { sessions, on_success }
    }

    pub fn complete(&self, admin: &AdminRecord) -> Result<()> {
        self.sessions.persist(admin)?;
        (self.on_success)(admin);
        Ok(())
    }
}

pub struct LoginGate<E: DescriptorExtractor> {
    roster: Roster,
    handoff: LoginHandoff,
    matcher: MatchLoop<E>,
    mode: LoginMode,
    scan: Option<ScanHandle>,
    session: Option<AdminRecord>,
}

impl<E: DescriptorExtractor> LoginGate<E> {
    pub fn new(roster: Roster, handoff: LoginHandoff, matcher: MatchLoop<E>) -> Self {
        Self {
            roster,
            handoff,
            matcher,
            mode: LoginMode::default(),
            scan: None,
            session: None,
        }
    }

    pub fn mode(&self) -> LoginMode {
        self.mode
    }

    pub fn session(&self) -> Option<&AdminRecord> {
        self.session.as_ref()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.as_ref().is_some_and(|scan| !scan.is_finished())
    }

    pub fn matcher(&self) -> &MatchLoop<E> {
        &self.matcher
    }

    /// Picks up a session left by a previous run.
    pub fn restore_session(&mut self) -> Option<&AdminRecord> {
        self.session = self.handoff.sessions.load();
        if let Some(admin) = &self.session {
            tracing::info!("Restored session for {}", admin.username);
        }
        self.session.as_ref()
    }

    pub fn login_with_password(&mut self, username: &str, password: &str) -> Result<AdminRecord> {
        let roster = self.roster.snapshot();
        let admin = match authenticate(&roster, username, password) {
            Ok(admin) => admin.clone(),
            Err(e) => {
                tracing::warn!("Password login failed for {}", username);
                return Err(e);
            }
        };

        self.handoff.complete(&admin)?;
        tracing::info!("Password login for {}", admin.username);
        self.session = Some(admin.clone());
        Ok(admin)
    }

    /// Switches to face mode and starts a scan, or returns the updates of
    /// the scan already running.
    pub fn start_face_login(&mut self) -> watch::Receiver<ScanUpdate> {
        self.mode = LoginMode::Face;

        if let Some(scan) = self.scan.as_ref().filter(|scan| !scan.is_finished()) {
            return scan.subscribe();
        }

        let handoff = self.handoff.clone();
        let scan = self
            .matcher
            .start(self.roster.clone(), Box::new(move |admin: &AdminRecord| handoff.complete(admin)));
        let updates = scan.subscribe();
        self.scan = Some(scan);
        updates
    }

    /// Waits for the running scan to end on its own.
    pub async fn wait_face_login(&mut self) -> Option<ScanOutcome> {
        let outcome = self.scan.take()?.wait().await;
        if let ScanOutcome::Matched(admin) = &outcome {
            self.session = Some(admin.clone());
        }
        Some(outcome)
    }

    /// Leaving face mode stops the scan and releases the camera.
    pub async fn switch_mode(&mut self, mode: LoginMode) {
        if self.mode == LoginMode::Face && mode != LoginMode::Face {
            self.cancel_scan().await;
        }
        self.mode = mode;
    }

    pub fn recover_password(&mut self, phone: &str) -> Result<RecoveredPassword> {
        let recovered = recover(&self.roster.snapshot(), phone)?;
        self.mode = LoginMode::Password;
        Ok(recovered)
    }

    pub async fn logout(&mut self) -> Result<()> {
        self.cancel_scan().await;
        self.handoff.sessions.clear()?;
        if let Some(admin) = self.session.take() {
            tracing::info!("Logged out {}", admin.username);
        }
        Ok(())
    }

    /// Refreshes the stored session from the latest roster. Returns whether
    /// the session was replaced.
    pub fn on_roster_synced(&mut self) -> Result<bool> {
        let Some(current) = self.session.clone().or_else(|| self.handoff.sessions.load()) else {
            return Ok(false);
        };

        let roster = self.roster.snapshot();
        let Some(fresh) = roster.iter().find(|admin| admin.username == current.username) else {
            tracing::debug!("Session user {} not in synced roster, keeping session", current.username);
            self.session = Some(current);
            return Ok(false);
        };

        self.handoff.sessions.persist(fresh)?;
        tracing::debug!("Refreshed session for {}", fresh.username);
        self.session = Some(fresh.clone());
        Ok(true)
    }

    async fn cancel_scan(&mut self) {
        if let Some(scan) = self.scan.take() {
            if let ScanOutcome::Matched(admin) = scan.cancel().await {
                // Matched just before the cancel landed
                self.session = Some(admin);
            }
        }
    }
}

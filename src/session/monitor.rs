use super::tracker::{ActivityEvent, ActivityTracker};
use super::{SessionError, SessionPolicy, SessionState, UserProfile};
use crate::api::models::User;
use crate::api::{session_token, ApiError, AuthApi};
use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::store::{SessionStore, AUTH_TOKEN_KEY, AUTH_USER_KEY, LAST_ACTIVITY_KEY};
use std::sync::{Arc, Mutex, MutexGuard};

pub type SharedMonitor = Arc<Mutex<SessionMonitor>>;

/// Lock a shared monitor, recovering from a poisoned lock
pub fn lock(shared: &SharedMonitor) -> MutexGuard<'_, SessionMonitor> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Run `f` under the monitor lock, then send any logout it queued once the
/// lock is released. Use this for every call that can end a session.
pub fn with_monitor<R>(shared: &SharedMonitor, f: impl FnOnce(&mut SessionMonitor) -> R) -> R {
    let (result, pending) = {
        let mut monitor = lock(shared);
        let result = f(&mut monitor);
        (result, monitor.take_pending_logout())
    };
    if let Some(pending) = pending {
        pending.send();
    }
    result
}

/// Authenticate without holding the monitor lock during the request
pub fn login(shared: &SharedMonitor, email: &str, password: &str) -> Result<UserProfile, SessionError> {
    let auth = lock(shared).auth.clone();
    let result = auth.login(email, password);
    with_monitor(shared, |m| m.complete_login(email, result))
}

/// End the session when the API rejected its credential.
/// Returns the reason when the error was an authorization failure.
pub fn end_on_unauthorized(shared: &SharedMonitor, err: &ApiError) -> Option<LogoutReason> {
    if !err.is_unauthorized() {
        return None;
    }
    with_monitor(shared, |m| m.logout(LogoutReason::Unauthorized));
    Some(LogoutReason::Unauthorized)
}

/// An API logout queued by a session teardown
pub struct PendingLogout {
    auth: Arc<dyn AuthApi>,
    token: String,
}

impl PendingLogout {
    /// Best effort; the session is already gone locally
    pub fn send(self) {
        if let Err(e) = self.auth.logout(&self.token) {
            tracing::info!("Logout API call failed, proceeding with local logout: {}", e);
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user asked to log out
    User,
    /// Inactivity timeout
    Expired,
    /// The API rejected the credential
    Unauthorized,
    /// Stored session data could not be parsed
    MalformedState,
    /// Another console logged out or replaced the stored credential
    SignedOutElsewhere,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Expired => "expired",
            Self::Unauthorized => "unauthorized",
            Self::MalformedState => "malformed_state",
            Self::SignedOutElsewhere => "signed_out_elsewhere",
        }
    }
}

/// Result of one expiry check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Check {
    pub previous: SessionState,
    pub state: SessionState,
    pub remaining_ms: i64,
    /// Set when this check ended the session
    pub ended: Option<LogoutReason>,
}

/// Outcome of picking up a session left in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restore {
    NoSession,
    Restored(UserProfile),
    Expired,
    Malformed(String),
}

#[derive(Debug)]
struct ActiveSession {
    user: UserProfile,
    token: String,
    /// Last activity this console knows about; never decreases
    last_activity_ms: i64,
    state: SessionState,
    /// Whether the credential made it to shared storage
    persisted: bool,
}

/// The authenticated-session context for one console.
///
/// Created once at startup and shared with the timer thread; every state
/// transition happens with the lock held, so checks, activity and user
/// commands never interleave.
pub struct SessionMonitor {
    policy: SessionPolicy,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    auth: Arc<dyn AuthApi>,
    audit: Option<Arc<AuditLog>>,
    tracker: ActivityTracker,
    session: Option<ActiveSession>,
    /// Bumped whenever a session starts or ends; timers tied to an old
    /// epoch stop on their next wake-up
    epoch: u64,
    degraded: bool,
    /// Token of an ended session still owed an API logout
    pending_logout: Option<String>,
}

impl SessionMonitor {
    pub fn new(
        policy: SessionPolicy,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn AuthApi>,
    ) -> Self {
        Self {
            tracker: ActivityTracker::new(policy.activity_throttle),
            policy,
            store,
            clock,
            auth,
            audit: None,
            session: None,
            epoch: 0,
            degraded: false,
            pending_logout: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn into_shared(self) -> SharedMonitor {
        Arc::new(Mutex::new(self))
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    /// State as of the last check
    pub fn state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.state)
    }

    pub fn last_activity_ms(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.last_activity_ms)
    }

    /// True while shared storage is failing and this console tracks activity in memory only
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Pick up a session left in storage by an earlier run or another console
    pub fn restore(&mut self) -> Restore {
        let now = self.clock.now_ms();

        let token = self.store.get(AUTH_TOKEN_KEY);
        let user = self.store.get(AUTH_USER_KEY);
        let (token, user_json) = match (token, user) {
            (Ok(Some(token)), Ok(Some(user))) => (token, user),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("session storage unavailable, starting signed out: {}", e);
                self.degraded = true;
                return Restore::NoSession;
            }
            _ => return Restore::NoSession,
        };

        let user: UserProfile = match serde_json::from_str(&user_json) {
            Ok(user) => user,
            Err(e) => return self.discard_malformed(format!("auth_user: {}", e)),
        };

        let (last_activity, persisted) = match self.store.get(LAST_ACTIVITY_KEY) {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(ms) => (ms.min(now), true),
                Err(e) => return self.discard_malformed(format!("last_activity: {}", e)),
            },
            Ok(None) => (now, self.persist(LAST_ACTIVITY_KEY, &now.to_string())),
            Err(e) => {
                tracing::warn!("cannot read last activity, using now: {}", e);
                self.degraded = true;
                (now, false)
            }
        };

        let state = self.policy.evaluate(now - last_activity);
        self.install(ActiveSession {
            user: user.clone(),
            token,
            last_activity_ms: last_activity,
            state: SessionState::Active,
            persisted,
        });

        if state == SessionState::Expired {
            tracing::info!("Stored session expired, logging out");
            self.logout(LogoutReason::Expired);
            return Restore::Expired;
        }
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
        tracing::info!(email = %user.email, "restored session");
        Restore::Restored(user)
    }

    #[cfg(test)]
    pub fn login(&mut self, email: &str, password: &str) -> Result<UserProfile, SessionError> {
        let result = self.auth.login(email, password);
        self.complete_login(email, result)
    }

    /// Start a new session from the outcome of an API login
    pub fn complete_login(
        &mut self,
        email: &str,
        result: Result<User, ApiError>,
    ) -> Result<UserProfile, SessionError> {
        let user = match result {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(email, "login failed: {}", e);
                if let Some(audit) = &self.audit {
                    let _ = audit.login_failed(email, &e.to_string());
                }
                return Err(SessionError::Auth(e));
            }
        };

        if self.session.is_some() {
            self.end_local();
        }

        let token = session_token(&user);
        let profile = UserProfile::from(&user);
        let user_json = serde_json::to_string(&profile)
            .map_err(|e| SessionError::MalformedStoredState(e.to_string()))?;
        let now = self.clock.now_ms();

        let persisted = self.persist(AUTH_TOKEN_KEY, &token)
            & self.persist(AUTH_USER_KEY, &user_json)
            & self.persist(LAST_ACTIVITY_KEY, &now.to_string());

        self.install(ActiveSession {
            user: profile.clone(),
            token,
            last_activity_ms: now,
            state: SessionState::Active,
            persisted,
        });
        self.tracker.mark_refreshed(now);

        tracing::info!(email = %profile.email, "login successful");
        if let Some(audit) = &self.audit {
            let _ = audit.login(&profile.email, profile.id);
        }
        Ok(profile)
    }

    /// Feed an input signal through the throttle; returns true when the
    /// shared activity timestamp was refreshed
    pub fn record_activity(&mut self, event: ActivityEvent) -> bool {
        let now = self.clock.now_ms();
        if self.session.is_none() || !self.tracker.observe(event, now) {
            return false;
        }
        if self.expire_if_due(now).is_some() {
            return false;
        }
        tracing::trace!(event = event.as_str(), "activity");
        self.touch(now);
        true
    }

    /// Explicitly refresh the activity timestamp ("extend session").
    /// Returns the new last-activity time.
    pub fn extend(&mut self) -> Result<i64, SessionError> {
        let now = self.clock.now_ms();
        if self.session.is_none() {
            return Err(SessionError::NoSession);
        }
        if let Some(reason) = self.expire_if_due(now) {
            return Err(SessionError::Ended(reason));
        }
        let last = self.touch(now);
        self.tracker.mark_refreshed(now);
        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Active;
        }
        if let Some(audit) = &self.audit {
            let _ = audit.session_extended(last);
        }
        Ok(last)
    }

    /// Milliseconds until expiry, re-read from shared storage.
    /// Ends the session if the shared state no longer backs it.
    pub fn remaining_ms(&mut self) -> Option<i64> {
        self.session.as_ref()?;
        let now = self.clock.now_ms();
        match self.shared_last_activity(now) {
            Ok(last) => Some(self.policy.remaining_ms(now - last).max(0)),
            Err(reason) => {
                self.logout(reason);
                None
            }
        }
    }

    /// Run one expiry check, forcing logout when the session has run out.
    /// Returns None when no session is active.
    pub fn check(&mut self) -> Option<Check> {
        let previous = self.session.as_ref()?.state;
        let now = self.clock.now_ms();

        let last = match self.shared_last_activity(now) {
            Ok(last) => last,
            Err(reason) => {
                self.logout(reason);
                return Some(Check {
                    previous,
                    state: SessionState::Expired,
                    remaining_ms: 0,
                    ended: Some(reason),
                });
            }
        };

        let elapsed = now - last;
        let state = self.policy.evaluate(elapsed);
        let remaining_ms = self.policy.remaining_ms(elapsed).max(0);

        if state == SessionState::Expired {
            tracing::info!("Session expired due to inactivity");
            self.logout(LogoutReason::Expired);
            return Some(Check {
                previous,
                state,
                remaining_ms: 0,
                ended: Some(LogoutReason::Expired),
            });
        }

        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
        if state == SessionState::Warning && previous != SessionState::Warning {
            tracing::info!(remaining_ms, "session expiring soon");
            if let Some(audit) = &self.audit {
                let _ = audit.session_warning(remaining_ms);
            }
        }

        Some(Check {
            previous,
            state,
            remaining_ms,
            ended: None,
        })
    }

    /// End the session: clear shared state and stop activity tracking.
    /// User and expiry logouts also queue an API logout, sent by
    /// `with_monitor` after the lock is released. Safe to call with no session.
    pub fn logout(&mut self, reason: LogoutReason) {
        let Some(session) = self.end_local() else {
            return;
        };

        // Another console owns whatever is in storage now
        if reason != LogoutReason::SignedOutElsewhere {
            if let Err(e) = self.store.clear_session() {
                tracing::warn!("failed to clear stored session: {}", e);
            }
        }

        if matches!(reason, LogoutReason::User | LogoutReason::Expired) {
            self.pending_logout = Some(session.token.clone());
        }

        tracing::info!(reason = reason.as_str(), email = %session.user.email, "logged out");
        if let Some(audit) = &self.audit {
            let _ = audit.logout(Some(&session.user.email), reason.as_str());
        }
    }

    pub fn take_pending_logout(&mut self) -> Option<PendingLogout> {
        self.pending_logout.take().map(|token| PendingLogout {
            auth: self.auth.clone(),
            token,
        })
    }

    fn install(&mut self, session: ActiveSession) {
        self.session = Some(session);
        self.tracker.attach();
        self.epoch += 1;
    }

    fn end_local(&mut self) -> Option<ActiveSession> {
        let session = self.session.take()?;
        self.tracker.detach();
        self.epoch += 1;
        Some(session)
    }

    fn discard_malformed(&mut self, detail: String) -> Restore {
        tracing::warn!("discarding malformed stored session: {}", detail);
        if let Err(e) = self.store.clear_session() {
            tracing::warn!("failed to clear stored session: {}", e);
        }
        if let Some(audit) = &self.audit {
            let _ = audit.logout(None, LogoutReason::MalformedState.as_str());
        }
        Restore::Malformed(detail)
    }

    /// Force logout if the session ran out before the timer noticed
    fn expire_if_due(&mut self, now: i64) -> Option<LogoutReason> {
        let reason = match self.shared_last_activity(now) {
            Ok(last) if self.policy.evaluate(now - last) == SessionState::Expired => {
                LogoutReason::Expired
            }
            Ok(_) => return None,
            Err(reason) => reason,
        };
        self.logout(reason);
        Some(reason)
    }

    /// Move the activity clock to `now` (never backwards) and persist it
    fn touch(&mut self, now: i64) -> i64 {
        let Some(session) = self.session.as_mut() else {
            return now;
        };
        let last = session.last_activity_ms.max(now);
        session.last_activity_ms = last;
        self.persist(LAST_ACTIVITY_KEY, &last.to_string());
        last
    }

    /// The activity time every console agrees on: the later of what this
    /// console knows and what storage holds, clamped to `now`.
    /// Errors mean the session must end for the given reason.
    fn shared_last_activity(&mut self, now: i64) -> Result<i64, LogoutReason> {
        let (memory, token, persisted) = match &self.session {
            Some(s) => (s.last_activity_ms, s.token.clone(), s.persisted),
            None => return Err(LogoutReason::SignedOutElsewhere),
        };

        if persisted {
            match self.store.get(AUTH_TOKEN_KEY) {
                Ok(Some(stored)) if stored == token => {}
                Ok(_) => return Err(LogoutReason::SignedOutElsewhere),
                Err(e) => self.note_storage_error(&e),
            }
        }

        let stored = match self.store.get(LAST_ACTIVITY_KEY) {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(ms) => Some(ms),
                Err(_) => {
                    tracing::warn!("stored last_activity is malformed: {:?}", raw);
                    return Err(LogoutReason::MalformedState);
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.note_storage_error(&e);
                None
            }
        };

        let last = stored.map_or(memory, |s| s.max(memory)).min(now);
        if let Some(session) = self.session.as_mut() {
            session.last_activity_ms = session.last_activity_ms.max(last);
        }
        Ok(last)
    }

    fn persist(&mut self, key: &str, value: &str) -> bool {
        match self.store.set(key, value) {
            Ok(()) => {
                if self.degraded {
                    tracing::info!("session storage available again");
                    self.degraded = false;
                }
                true
            }
            Err(e) => {
                self.note_storage_error(&e);
                false
            }
        }
    }

    fn note_storage_error(&mut self, e: &crate::store::StoreError) {
        if !self.degraded {
            tracing::warn!("session storage unavailable, tracking activity in memory: {}", e);
        }
        self.degraded = true;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::models::User;
    use crate::api::ApiError;
    use crate::clock::ManualClock;
    use crate::store::{FileStore, MemoryStore, StoreError, SESSION_KEYS};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    pub const MIN: i64 = 60_000;
    pub const T0: i64 = 1_700_000_000_000;

    #[derive(Default)]
    pub struct FakeAuth {
        pub fail_login: bool,
        pub fail_logout: bool,
        pub logouts: AtomicUsize,
    }

    impl AuthApi for FakeAuth {
        fn login(&self, email: &str, _password: &str) -> Result<User, ApiError> {
            if self.fail_login {
                return Err(ApiError::Status {
                    status: 401,
                    body: "invalid credentials".to_string(),
                });
            }
            Ok(User {
                id: 7,
                name: "Desk Admin".to_string(),
                phone: Some("0770000000".to_string()),
                role: "admin".to_string(),
                email: email.to_string(),
                created_at: None,
            })
        }

        fn logout(&self, _token: &str) -> Result<(), ApiError> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            if self.fail_logout {
                return Err(ApiError::Transport("timed out".to_string()));
            }
            Ok(())
        }
    }

    /// Store whose every operation fails
    pub struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::InvalidKey(key.to_string()))
        }
        fn set(&self, key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::InvalidKey(key.to_string()))
        }
        fn remove(&self, key: &str) -> Result<(), StoreError> {
            Err(StoreError::InvalidKey(key.to_string()))
        }
    }

    pub fn monitor_with(
        store: Arc<dyn SessionStore>,
        clock: &ManualClock,
        auth: Arc<FakeAuth>,
    ) -> SessionMonitor {
        SessionMonitor::new(
            SessionPolicy::default(),
            store,
            Arc::new(clock.clone()),
            auth,
        )
    }

    /// Deliver a queued API logout, as `with_monitor` does after unlocking
    pub fn send_pending(m: &mut SessionMonitor) {
        if let Some(pending) = m.take_pending_logout() {
            pending.send();
        }
    }

    fn setup() -> (SessionMonitor, Arc<MemoryStore>, ManualClock, Arc<FakeAuth>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(T0);
        let auth = Arc::new(FakeAuth::default());
        let monitor = monitor_with(store.clone(), &clock, auth.clone());
        (monitor, store, clock, auth)
    }

    #[test]
    fn test_login_persists_session_keys() {
        let (mut m, store, _clock, _auth) = setup();
        let user = m.login("desk@nrg.ug", "secret").unwrap();
        assert_eq!(user.email, "desk@nrg.ug");
        assert_eq!(m.state(), Some(SessionState::Active));
        assert!(store.get(AUTH_TOKEN_KEY).unwrap().is_some());
        let stored: UserProfile =
            serde_json::from_str(&store.get(AUTH_USER_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, user);
        assert_eq!(
            store.get(LAST_ACTIVITY_KEY).unwrap().as_deref(),
            Some(T0.to_string().as_str())
        );
    }

    #[test]
    fn test_login_failure_leaves_signed_out() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(T0);
        let auth = Arc::new(FakeAuth {
            fail_login: true,
            ..FakeAuth::default()
        });
        let mut m = monitor_with(store.clone(), &clock, auth);
        assert!(matches!(
            m.login("a@b.c", "bad"),
            Err(SessionError::Auth(_))
        ));
        assert!(!m.is_authenticated());
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_warning_boundary_and_forced_logout() {
        let (mut m, store, clock, auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();

        clock.set(T0 + 25 * MIN);
        let check = m.check().unwrap();
        assert_eq!(check.state, SessionState::Active);
        assert_eq!(check.remaining_ms, 5 * MIN);

        clock.set(T0 + 25 * MIN + 1_000);
        let check = m.check().unwrap();
        assert_eq!(check.previous, SessionState::Active);
        assert_eq!(check.state, SessionState::Warning);

        clock.set(T0 + 30 * MIN);
        let check = m.check().unwrap();
        assert_eq!(check.state, SessionState::Expired);
        assert_eq!(check.ended, Some(LogoutReason::Expired));
        assert!(!m.is_authenticated());
        for key in SESSION_KEYS {
            assert_eq!(store.get(key).unwrap(), None);
        }
        // The API logout waits until the caller releases the monitor
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 0);
        send_pending(&mut m);
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 1);
        // Terminal: nothing left to check
        assert!(m.check().is_none());
    }

    #[test]
    fn test_activity_moves_expiry() {
        let (mut m, _store, clock, _auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();

        clock.set(T0 + 29 * MIN);
        assert!(m.record_activity(ActivityEvent::KeyPress));

        clock.set(T0 + 30 * MIN);
        assert_eq!(m.check().unwrap().state, SessionState::Active);

        clock.set(T0 + 59 * MIN - 1);
        assert_eq!(m.check().unwrap().state, SessionState::Warning);
        clock.set(T0 + 59 * MIN);
        assert_eq!(m.check().unwrap().state, SessionState::Expired);
    }

    #[test]
    fn test_activity_throttled() {
        let (mut m, store, clock, _auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();

        clock.set(T0 + 10_000);
        assert!(m.record_activity(ActivityEvent::Click));
        clock.set(T0 + 13_000);
        assert!(!m.record_activity(ActivityEvent::KeyDown));
        assert_eq!(
            store.get(LAST_ACTIVITY_KEY).unwrap().as_deref(),
            Some((T0 + 10_000).to_string().as_str())
        );
    }

    #[test]
    fn test_extend_from_warning_and_idempotent() {
        let (mut m, _store, clock, _auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();

        clock.set(T0 + 27 * MIN);
        assert_eq!(m.check().unwrap().state, SessionState::Warning);

        let first = m.extend().unwrap();
        assert_eq!(m.state(), Some(SessionState::Active));
        let second = m.extend().unwrap();
        let third = m.extend().unwrap();
        assert!(first <= second && second <= third);

        let check = m.check().unwrap();
        assert_eq!(check.state, SessionState::Active);
        assert_eq!(check.remaining_ms, 30 * MIN);
    }

    #[test]
    fn test_extend_after_timeout_is_refused() {
        let (mut m, _store, clock, _auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();
        clock.set(T0 + 31 * MIN);
        assert!(matches!(
            m.extend(),
            Err(SessionError::Ended(LogoutReason::Expired))
        ));
        assert!(!m.is_authenticated());
        assert!(!m.record_activity(ActivityEvent::Click));
        assert!(matches!(m.extend(), Err(SessionError::NoSession)));
    }

    #[test]
    fn test_last_activity_never_decreases() {
        let (mut m, store, clock, _auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();
        clock.set(T0 + 60_000);
        m.extend().unwrap();
        // Clock steps backwards
        clock.set(T0 + 30_000);
        let after = m.extend().unwrap();
        assert_eq!(after, T0 + 60_000);
        assert_eq!(m.last_activity_ms(), Some(T0 + 60_000));
        assert_eq!(
            store.get(LAST_ACTIVITY_KEY).unwrap().as_deref(),
            Some((T0 + 60_000).to_string().as_str())
        );
    }

    #[test]
    fn test_activity_in_other_console_prevents_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(T0);
        let auth = Arc::new(FakeAuth::default());
        let mut tab_a = monitor_with(
            Arc::new(FileStore::open(dir.path()).unwrap()),
            &clock,
            auth.clone(),
        );
        let mut tab_b = monitor_with(
            Arc::new(FileStore::open(dir.path()).unwrap()),
            &clock,
            auth.clone(),
        );

        tab_a.login("desk@nrg.ug", "pw").unwrap();
        assert!(matches!(tab_b.restore(), Restore::Restored(_)));

        // Only tab B is being used
        for minute in [10, 20, 28] {
            clock.set(T0 + minute * MIN);
            assert!(tab_b.record_activity(ActivityEvent::PointerMove));
        }

        clock.set(T0 + 31 * MIN);
        assert_eq!(tab_a.check().unwrap().state, SessionState::Active);
        assert_eq!(tab_b.check().unwrap().state, SessionState::Active);

        // Both converge on the same expiry
        clock.set(T0 + 58 * MIN);
        assert_eq!(tab_a.check().unwrap().state, SessionState::Expired);
        assert_eq!(
            tab_b.check().unwrap().ended,
            Some(LogoutReason::SignedOutElsewhere)
        );
    }

    #[test]
    fn test_logout_elsewhere_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(T0);
        let auth = Arc::new(FakeAuth::default());
        let mut tab_a = monitor_with(
            Arc::new(FileStore::open(dir.path()).unwrap()),
            &clock,
            auth.clone(),
        );
        let mut tab_b = monitor_with(
            Arc::new(FileStore::open(dir.path()).unwrap()),
            &clock,
            auth.clone(),
        );
        tab_a.login("desk@nrg.ug", "pw").unwrap();
        tab_b.restore();

        tab_a.logout(LogoutReason::User);
        send_pending(&mut tab_a);
        let check = tab_b.check().unwrap();
        assert_eq!(check.ended, Some(LogoutReason::SignedOutElsewhere));
        assert!(!tab_b.is_authenticated());
        // Only the console that logged out called the API
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restore_initializes_missing_activity() {
        let (mut m, store, _clock, _auth) = setup();
        store.set(AUTH_TOKEN_KEY, "tok").unwrap();
        store
            .set(
                AUTH_USER_KEY,
                r#"{"id":1,"name":"A","email":"a@nrg.ug","role":"editor","phone":"1"}"#,
            )
            .unwrap();

        match m.restore() {
            Restore::Restored(user) => assert_eq!(user.role, "editor"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(m.token(), Some("tok"));
        assert_eq!(
            store.get(LAST_ACTIVITY_KEY).unwrap().as_deref(),
            Some(T0.to_string().as_str())
        );
    }

    #[test]
    fn test_restore_expired_session() {
        let (mut m, store, _clock, auth) = setup();
        store.set(AUTH_TOKEN_KEY, "tok").unwrap();
        store
            .set(AUTH_USER_KEY, r#"{"id":1,"name":"A","email":"a@nrg.ug","role":"r"}"#)
            .unwrap();
        store
            .set(LAST_ACTIVITY_KEY, &(T0 - 31 * MIN).to_string())
            .unwrap();

        assert_eq!(m.restore(), Restore::Expired);
        assert!(!m.is_authenticated());
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), None);
        send_pending(&mut m);
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restore_malformed_user_clears_everything() {
        let (mut m, store, _clock, _auth) = setup();
        store.set(AUTH_TOKEN_KEY, "tok").unwrap();
        store.set(AUTH_USER_KEY, "{not json").unwrap();
        store.set(LAST_ACTIVITY_KEY, &T0.to_string()).unwrap();

        assert!(matches!(m.restore(), Restore::Malformed(_)));
        assert!(!m.is_authenticated());
        for key in SESSION_KEYS {
            assert_eq!(store.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_restore_without_token_is_no_session() {
        let (mut m, store, _clock, _auth) = setup();
        store
            .set(AUTH_USER_KEY, r#"{"id":1,"name":"A","email":"a@nrg.ug","role":"r"}"#)
            .unwrap();
        assert_eq!(m.restore(), Restore::NoSession);
    }

    #[test]
    fn test_storage_unavailable_degrades_to_memory() {
        let clock = ManualClock::new(T0);
        let auth = Arc::new(FakeAuth::default());
        let mut m = monitor_with(Arc::new(BrokenStore), &clock, auth);

        assert_eq!(m.restore(), Restore::NoSession);
        m.login("desk@nrg.ug", "pw").unwrap();
        assert!(m.is_authenticated());
        assert!(m.is_degraded());

        clock.set(T0 + 20 * MIN);
        assert!(m.record_activity(ActivityEvent::KeyPress));
        clock.set(T0 + 40 * MIN);
        assert_eq!(m.check().unwrap().state, SessionState::Active);
        clock.set(T0 + 50 * MIN);
        assert_eq!(m.check().unwrap().state, SessionState::Expired);
    }

    #[test]
    fn test_logout_api_failure_still_logs_out() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(T0);
        let auth = Arc::new(FakeAuth {
            fail_logout: true,
            ..FakeAuth::default()
        });
        let mut m = monitor_with(store.clone(), &clock, auth.clone());
        m.login("desk@nrg.ug", "pw").unwrap();
        let epoch = m.epoch();

        m.logout(LogoutReason::User);
        assert!(!m.is_authenticated());
        assert!(m.epoch() > epoch);
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), None);
        send_pending(&mut m);
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 1);
        // Second logout is a no-op
        m.logout(LogoutReason::User);
        assert!(m.take_pending_logout().is_none());
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unauthorized_skips_api_logout() {
        let (mut m, store, _clock, auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();
        m.logout(LogoutReason::Unauthorized);
        assert!(m.take_pending_logout().is_none());
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(AUTH_USER_KEY).unwrap(), None);
    }

    #[test]
    fn test_rejected_credential_ends_shared_session() {
        let (mut m, store, _clock, auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();
        let shared = m.into_shared();

        let transport = ApiError::Transport("reset".to_string());
        assert_eq!(end_on_unauthorized(&shared, &transport), None);
        assert!(lock(&shared).is_authenticated());

        assert_eq!(
            end_on_unauthorized(&shared, &ApiError::Unauthorized),
            Some(LogoutReason::Unauthorized)
        );
        assert!(!lock(&shared).is_authenticated());
        for key in SESSION_KEYS {
            assert_eq!(store.get(key).unwrap(), None);
        }
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remaining_ends_session_signed_out_elsewhere() {
        let (mut m, store, _clock, _auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();
        store.set(AUTH_TOKEN_KEY, "someone-else").unwrap();
        assert_eq!(m.remaining_ms(), None);
        assert!(!m.is_authenticated());
        // Storage belongs to the other console
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap().as_deref(), Some("someone-else"));
    }

    /// Auth API whose calls take a while to answer
    pub struct SlowAuth {
        pub delay: Duration,
        pub logouts: AtomicUsize,
    }

    impl AuthApi for SlowAuth {
        fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
            thread::sleep(self.delay);
            FakeAuth::default().login(email, password)
        }

        fn logout(&self, _token: &str) -> Result<(), ApiError> {
            thread::sleep(self.delay);
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_slow_auth_api_never_holds_the_lock() {
        let clock = ManualClock::new(T0);
        let auth = Arc::new(SlowAuth {
            delay: Duration::from_millis(800),
            logouts: AtomicUsize::new(0),
        });
        let shared = SessionMonitor::new(
            SessionPolicy::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            auth.clone(),
        )
        .into_shared();

        let background = {
            let shared = shared.clone();
            thread::spawn(move || login(&shared, "desk@nrg.ug", "pw"))
        };
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        assert!(!lock(&shared).is_authenticated());
        assert!(started.elapsed() < Duration::from_millis(400));
        background.join().unwrap().unwrap();

        clock.set(T0 + 31 * MIN);
        let background = {
            let shared = shared.clone();
            thread::spawn(move || with_monitor(&shared, |m| m.check()))
        };
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        assert!(!lock(&shared).is_authenticated());
        assert!(started.elapsed() < Duration::from_millis(400));

        let check = background.join().unwrap().unwrap();
        assert_eq!(check.ended, Some(LogoutReason::Expired));
        assert_eq!(auth.logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_activity_during_check_logs_out() {
        let (mut m, store, _clock, _auth) = setup();
        m.login("desk@nrg.ug", "pw").unwrap();
        store.set(LAST_ACTIVITY_KEY, "yesterday").unwrap();
        let check = m.check().unwrap();
        assert_eq!(check.ended, Some(LogoutReason::MalformedState));
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_audit_records_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::new(&dir.path().join("audit.jsonl"), "tab").unwrap());
        let (m, _store, clock, _auth) = setup();
        let mut m = m.with_audit(audit.clone());

        m.login("desk@nrg.ug", "pw").unwrap();
        clock.set(T0 + 26 * MIN);
        m.check();
        m.extend().unwrap();
        m.logout(LogoutReason::User);

        let types: Vec<String> = std::fs::read_to_string(&audit.path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["type"].to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "\"login\"",
                "\"session_warning\"",
                "\"session_extended\"",
                "\"logout\""
            ]
        );
    }
}

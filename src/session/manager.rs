use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SessionError;
use super::claims::Session;
use super::clock::{Clock, SystemClock};
use super::idle::IdleTracker;
use super::store::{
    ACCESS_TOKEN_SLOT, LEGACY_SLOTS, REFRESH_TOKEN_SLOT, StorageEvent, TokenStore,
};
use crate::api::ApiError;
use crate::observability::Metrics;

/// Why the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    UserRequested,
    Expired,
    /// The backend answered 401/403
    Unauthorized,
    RefreshFailed,
    /// Another client removed the stored token
    ClearedElsewhere,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Startup restore has not finished yet
    Restoring,
    SignedOut(Option<SignOutReason>),
    SignedIn(Session),
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::SignedIn(session) => Some(session),
            _ => None,
        }
    }
}

/// New credentials handed out by a refresh exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh credential for a new access token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_access_token(&self, credential: &str) -> Result<TokenGrant, ApiError>;
}

/// Owner of the one authoritative token.
///
/// Every change is published on a watch channel; consumers holding
/// per-user state must drop it when they observe `SignedOut`.
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<AuthState>,
    idle: IdleTracker,
    metrics: Arc<Metrics>,
    refresh_guard: Mutex<()>,
    /// Bumped whenever the session changes hands; a refresh that straddles
    /// a change is discarded
    generation: StdMutex<u64>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>, idle_timeout: Duration) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), idle_timeout)
    }

    pub fn with_clock(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, idle_timeout: Duration) -> Self {
        let (state, _) = watch::channel(AuthState::Restoring);
        Self {
            store,
            clock,
            state,
            idle: IdleTracker::new(idle_timeout),
            metrics: Arc::new(Metrics::new()),
            refresh_guard: Mutex::new(()),
            generation: StdMutex::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Load the persisted token, keeping it only if it decodes and is unexpired.
    ///
    /// Never fails: anything wrong with the stored token just means signed out.
    pub fn restore(&self) -> Option<Session> {
        self.clear_legacy_slots();

        let restored = match self.store.load(ACCESS_TOKEN_SLOT) {
            Ok(Some(token)) => match Session::from_token(token) {
                Ok(session) if session.is_valid_at(self.now()) => Some(session),
                Ok(session) => {
                    info!(expired_at = ?session.expires_at(), "Stored token expired, discarding");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Stored token unreadable, discarding");
                    None
                }
            },
            Ok(None) => {
                debug!("No stored token");
                return self.finish_restore(None);
            }
            Err(e) => {
                warn!(error = %e, "Token store unreadable during restore");
                None
            }
        };

        if restored.is_none() {
            self.clear_token_slots();
        }
        self.finish_restore(restored)
    }

    fn finish_restore(&self, restored: Option<Session>) -> Option<Session> {
        match &restored {
            Some(session) => {
                info!(user_id = ?session.uploader_id(), "Session restored");
                self.state.send_replace(AuthState::SignedIn(session.clone()));
            }
            None => {
                self.state.send_replace(AuthState::SignedOut(None));
            }
        }
        restored
    }

    /// Activate a token obtained from login, signup, OAuth or refresh.
    ///
    /// An undecodable or already expired token is rejected before anything is
    /// persisted or published.
    ///
    /// Without a refresh token any stored one is removed, so a refresh can
    /// never present another account's credential.
    pub fn login(&self, token: &str, refresh_token: Option<&str>) -> Result<Session, SessionError> {
        let mut generation = self.generation();
        let session = self.activate(token, refresh_token)?;
        *generation += 1;
        Ok(session)
    }

    fn activate(&self, token: &str, refresh_token: Option<&str>) -> Result<Session, SessionError> {
        let session = Session::from_token(token)?;
        if !session.is_valid_at(self.now()) {
            let expired_at = session.expires_at().unwrap_or_default();
            warn!(expired_at, "Rejected login with expired token");
            return Err(SessionError::Expired(expired_at));
        }

        self.store.save(ACCESS_TOKEN_SLOT, token)?;
        match refresh_token {
            Some(refresh) => self.store.save(REFRESH_TOKEN_SLOT, refresh)?,
            None => self.store.remove(REFRESH_TOKEN_SLOT)?,
        }

        self.idle.record_activity();
        info!(user_id = ?session.uploader_id(), expires_at = ?session.expires_at(), "Signed in");
        self.state.send_replace(AuthState::SignedIn(session.clone()));
        Ok(session)
    }

    /// Clear persisted and in-memory credentials.
    pub fn logout(&self, reason: SignOutReason) {
        let mut generation = self.generation();
        *generation += 1;
        self.clear_token_slots();
        self.clear_legacy_slots();

        let previous = self.state.send_replace(AuthState::SignedOut(Some(reason)));
        if let AuthState::SignedIn(session) = previous {
            info!(user_id = ?session.uploader_id(), ?reason, "Signed out");
        } else {
            debug!(?reason, "Logout while not signed in");
        }
    }

    pub fn is_valid(&self) -> bool {
        let now = self.now();
        self.state
            .borrow()
            .session()
            .is_some_and(|session| session.is_valid_at(now))
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.state.borrow(), AuthState::Restoring)
    }

    pub fn current(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Token to attach to outgoing requests.
    ///
    /// Not re-checked for expiry here; the sweep and the backend's 401 handle that.
    pub fn bearer_token(&self) -> Option<String> {
        self.state
            .borrow()
            .session()
            .map(|session| session.token().to_string())
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// The backend rejected our credentials
    pub fn handle_unauthorized(&self) {
        if self.current().is_some() {
            warn!("Backend rejected credentials, signing out");
            self.logout(SignOutReason::Unauthorized);
        }
    }

    /// Sign out if the current session has expired. Returns `true` if it did.
    pub fn check_expiry(&self) -> bool {
        let expired = self
            .current()
            .is_some_and(|session| !session.is_valid_at(self.now()));
        if expired {
            info!("Session expired");
            self.logout(SignOutReason::Expired);
        }
        expired
    }

    /// Re-check expiry on a fixed interval. A session can outlive its `exp`
    /// by up to one interval.
    pub fn spawn_expiry_sweep(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = Weak::upgrade(&manager) else {
                    break;
                };
                manager.check_expiry();
            }
        })
    }

    /// Follow token changes made by other clients
    pub fn spawn_storage_listener(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<StorageEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = Weak::upgrade(&manager) else {
                    break;
                };
                manager.apply_storage_event(&event);
            }
        })
    }

    pub fn apply_storage_event(&self, event: &StorageEvent) {
        if event.slot != ACCESS_TOKEN_SLOT {
            return;
        }

        match &event.new_value {
            None => {
                let mut generation = self.generation();
                *generation += 1;
                let previous = self.state.send_replace(AuthState::SignedOut(Some(
                    SignOutReason::ClearedElsewhere,
                )));
                if matches!(previous, AuthState::SignedIn(_)) {
                    info!("Token removed by another client, session cleared");
                }
            }
            Some(token) => {
                if self.bearer_token().as_deref() == Some(token.as_str()) {
                    return;
                }
                match Session::from_token(token.as_str()) {
                    Ok(session) if session.is_valid_at(self.now()) => {
                        info!(user_id = ?session.uploader_id(), "Adopted token from another client");
                        *self.generation() += 1;
                        self.state.send_replace(AuthState::SignedIn(session));
                    }
                    // An expired replacement leaves the current session alone.
                    Ok(_) => debug!("Ignoring expired token written by another client"),
                    Err(e) => debug!(error = %e, "Ignoring unreadable token written by another client"),
                }
            }
        }
    }

    /// Note user activity; after an idle period, renew the access token first.
    pub async fn record_activity(&self, refresher: &dyn TokenRefresher) {
        let resumed = self.idle.record_activity();
        if resumed && self.current().is_some() {
            info!(idle_timeout = ?self.idle.timeout(), "Activity after idle period, refreshing token");
            if let Err(e) = self.refresh(refresher).await {
                warn!(error = %e, "Idle refresh failed");
            }
        }
    }

    /// Exchange the refresh credential for a new access token; any failure signs out.
    ///
    /// Without a stored refresh token the current access token is offered,
    /// which the backend's refresh endpoint accepts. If the session ends or
    /// is replaced while the exchange is in flight, its result is dropped.
    pub async fn refresh(&self, refresher: &dyn TokenRefresher) -> Result<Session, SessionError> {
        let _guard = self.refresh_guard.lock().await;

        let stored = self.store.load(REFRESH_TOKEN_SLOT).unwrap_or_else(|e| {
            warn!(error = %e, "Refresh slot unreadable");
            None
        });
        let Some(credential) = stored.clone().or_else(|| self.bearer_token()) else {
            return Err(SessionError::NotSignedIn);
        };
        let started = *self.generation();

        let result = refresher.refresh_access_token(&credential).await;

        let generation = self.generation();
        if *generation != started {
            info!("Session changed during refresh, discarding the result");
            return Err(SessionError::NotSignedIn);
        }
        // An unrotated refresh token stays valid.
        let activated = match result {
            Ok(grant) => self
                .activate(
                    &grant.access_token,
                    grant.refresh_token.as_deref().or(stored.as_deref()),
                )
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        drop(generation);

        match activated {
            Ok(session) => {
                self.metrics.session_refreshed();
                Ok(session)
            }
            Err(message) => {
                self.logout(SignOutReason::RefreshFailed);
                Err(SessionError::RefreshFailed(message))
            }
        }
    }

    fn now(&self) -> i64 {
        self.clock.now_epoch_secs()
    }

    fn generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_token_slots(&self) {
        for slot in [ACCESS_TOKEN_SLOT, REFRESH_TOKEN_SLOT] {
            if let Err(e) = self.store.remove(slot) {
                warn!(slot, error = %e, "Failed to clear token slot");
            }
        }
    }

    fn clear_legacy_slots(&self) {
        for slot in LEGACY_SLOTS {
            if let Err(e) = self.store.remove(slot) {
                warn!(slot, error = %e, "Failed to clear legacy token slot");
            }
        }
    }
}

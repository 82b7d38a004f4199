use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::BackendMode;
use crate::db::LocalStorage;
use crate::error::{AuthError, PersistenceError};
use crate::models::User;

pub const SIMULATED_USER_KEY: &str = "simulated_user";
pub const FIREBASE_SESSION_KEY: &str = "firebase_session";

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

const EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

pub type AuthCallback = Box<dyn Fn(Option<&User>) + Send>;

// --- Listener registry ---

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: Vec<(u64, AuthCallback)>,
}

// Callbacks run with the registry locked and must not subscribe or unsubscribe.
#[derive(Clone, Default)]
pub struct AuthListeners {
    inner: Arc<Mutex<Listeners>>,
}

impl AuthListeners {
    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, current: Option<&User>, callback: AuthCallback) -> Subscription {
        callback(current);
        let mut listeners = self.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.callbacks.push((id, callback));
        Subscription {
            listeners: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    pub fn notify(&self, user: Option<&User>) {
        for (_, callback) in self.lock().callbacks.iter() {
            callback(user);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().callbacks.len()
    }
}

pub struct Subscription {
    listeners: Weak<Mutex<Listeners>>,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        let Some(id) = self.id.take() else { return };
        let Some(inner) = self.listeners.upgrade() else { return };
        let mut listeners = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.callbacks.retain(|(existing, _)| *existing != id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

// --- Backend trait ---

pub trait AuthBackend {
    fn mode(&self) -> BackendMode;

    fn current_user(&self) -> Option<User>;

    fn on_auth_state_changed(&self, callback: AuthCallback) -> Subscription;

    fn login_with_google(&self) -> Result<User, AuthError>;

    fn logout(&self) -> Result<(), AuthError>;
}

// --- Simulated backend ---

pub struct SimulatedAuth {
    storage: LocalStorage,
    listeners: AuthListeners,
}

impl SimulatedAuth {
    pub fn new(storage: LocalStorage) -> Self {
        Self {
            storage,
            listeners: AuthListeners::default(),
        }
    }

    pub fn demo_user() -> User {
        User {
            uid: "simulated_user_123".to_string(),
            email: Some("tester@simulation.io".to_string()),
        }
    }
}

impl AuthBackend for SimulatedAuth {
    fn mode(&self) -> BackendMode {
        BackendMode::Simulated
    }

    fn current_user(&self) -> Option<User> {
        match self.storage.get_json::<User>(SIMULATED_USER_KEY) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "stored simulated user is unreadable");
                None
            }
        }
    }

    fn on_auth_state_changed(&self, callback: AuthCallback) -> Subscription {
        self.listeners
            .subscribe(self.current_user().as_ref(), callback)
    }

    fn login_with_google(&self) -> Result<User, AuthError> {
        let user = Self::demo_user();
        self.storage.set_json(SIMULATED_USER_KEY, &user)?;
        info!(uid = %user.uid, "signed in as simulated user");
        self.listeners.notify(Some(&user));
        Ok(user)
    }

    fn logout(&self) -> Result<(), AuthError> {
        self.storage.remove_item(SIMULATED_USER_KEY)?;
        self.listeners.notify(None);
        Ok(())
    }
}

// --- Firebase backend ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn is_expiring(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .checked_sub_signed(ChronoDuration::seconds(EXPIRY_MARGIN_SECS))
            .is_none_or(|refresh_at| refresh_at <= now)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInWithIdpRequest {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInWithIdpResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    user_id: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn expiry_from(expires_in: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let default = now + ChronoDuration::seconds(DEFAULT_EXPIRES_IN_SECS);
    expires_in
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(ChronoDuration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(default)
}

fn provider_error(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}

pub struct FirebaseSession {
    api_key: String,
    client: reqwest::blocking::Client,
    storage: LocalStorage,
    state: Mutex<Option<Session>>,
}

impl FirebaseSession {
    pub fn new(api_key: String, storage: LocalStorage) -> Result<Self, AuthError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(Self {
            api_key,
            client,
            storage,
            state: Mutex::new(None),
        })
    }

    fn state(&self) -> MutexGuard<'_, Option<Session>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn restore(&self) {
        let stored = match self.storage.get_json::<Session>(FIREBASE_SESSION_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "stored Firebase session is unreadable");
                None
            }
        };
        let Some(session) = stored else { return };

        if !session.is_expiring(Utc::now()) {
            *self.state() = Some(session);
            return;
        }

        match self.refresh(&session.refresh_token) {
            Ok(refreshed) => {
                info!(uid = %refreshed.user.uid, "restored Firebase session");
                self.store(Some(refreshed));
            }
            Err(e) => {
                warn!(error = %e, "could not refresh Firebase session, signing out");
                self.store(None);
            }
        }
    }

    pub fn current_user(&self) -> Option<User> {
        self.state().as_ref().map(|s| s.user.clone())
    }

    fn store(&self, session: Option<Session>) {
        let persisted = match &session {
            Some(s) => self.storage.set_json(FIREBASE_SESSION_KEY, s),
            None => self.storage.remove_item(FIREBASE_SESSION_KEY),
        };
        if let Err(e) = persisted {
            warn!(error = %e, "could not persist Firebase session");
        }
        *self.state() = session;
    }

    pub fn sign_in_with_google_token(&self, google_id_token: &str) -> Result<User, AuthError> {
        let request = SignInWithIdpRequest {
            post_body: format!("id_token={}&providerId=google.com", google_id_token),
            request_uri: "http://localhost".to_string(),
            return_idp_credential: true,
            return_secure_token: true,
        };

        let response = self
            .client
            .post(IDENTITY_TOOLKIT_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AuthError::Provider(provider_error(&body)));
        }

        let signed_in: SignInWithIdpResponse = response
            .json()
            .map_err(|e| AuthError::Provider(format!("unexpected sign-in response: {}", e)))?;

        let session = Session {
            user: User {
                uid: signed_in.local_id,
                email: signed_in.email,
            },
            id_token: signed_in.id_token,
            refresh_token: signed_in.refresh_token,
            expires_at: expiry_from(signed_in.expires_in.as_deref(), Utc::now()),
        };
        let user = session.user.clone();
        self.store(Some(session));
        Ok(user)
    }

    fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let response = self
            .client
            .post(SECURE_TOKEN_URL)
            .query(&[("key", self.api_key.as_str())])
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AuthError::Provider(provider_error(&body)));
        }

        let refreshed: RefreshResponse = response
            .json()
            .map_err(|e| AuthError::Provider(format!("unexpected token response: {}", e)))?;

        // The token endpoint does not return the email; keep the known one.
        let email = self
            .state()
            .as_ref()
            .filter(|s| s.user.uid == refreshed.user_id)
            .and_then(|s| s.user.email.clone())
            .or_else(|| {
                self.storage
                    .get_json::<Session>(FIREBASE_SESSION_KEY)
                    .ok()
                    .flatten()
                    .and_then(|s| s.user.email)
            });

        Ok(Session {
            user: User {
                uid: refreshed.user_id,
                email,
            },
            id_token: refreshed.id_token,
            refresh_token: refreshed.refresh_token,
            expires_at: expiry_from(refreshed.expires_in.as_deref(), Utc::now()),
        })
    }

    pub fn sign_out(&self) {
        self.store(None);
    }

    pub fn id_token_for(&self, user: &User) -> Result<String, PersistenceError> {
        let session = self.state().clone().ok_or(PersistenceError::NotSignedIn)?;
        if session.user.uid != user.uid {
            return Err(PersistenceError::NotSignedIn);
        }
        if !session.is_expiring(Utc::now()) {
            return Ok(session.id_token);
        }

        let refreshed = self
            .refresh(&session.refresh_token)
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let token = refreshed.id_token.clone();
        self.store(Some(refreshed));
        Ok(token)
    }
}

pub struct FirebaseAuth {
    session: Arc<FirebaseSession>,
    google_id_token: Option<String>,
    listeners: AuthListeners,
}

impl FirebaseAuth {
    pub fn new(session: Arc<FirebaseSession>, google_id_token: Option<String>) -> Self {
        Self {
            session,
            google_id_token,
            listeners: AuthListeners::default(),
        }
    }
}

impl AuthBackend for FirebaseAuth {
    fn mode(&self) -> BackendMode {
        BackendMode::Live
    }

    fn current_user(&self) -> Option<User> {
        self.session.current_user()
    }

    fn on_auth_state_changed(&self, callback: AuthCallback) -> Subscription {
        self.listeners
            .subscribe(self.current_user().as_ref(), callback)
    }

    fn login_with_google(&self) -> Result<User, AuthError> {
        let token = self.google_id_token.as_deref().ok_or_else(|| {
            AuthError::Unavailable(
                "GOOGLE_ID_TOKEN is not set; obtain a Google ID token and export it".to_string(),
            )
        })?;
        let user = self.session.sign_in_with_google_token(token)?;
        info!(uid = %user.uid, "signed in with Google");
        self.listeners.notify(Some(&user));
        Ok(user)
    }

    fn logout(&self) -> Result<(), AuthError> {
        self.session.sign_out();
        self.listeners.notify(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn channel_callback() -> (AuthCallback, mpsc::Receiver<Option<User>>) {
        let (tx, rx) = mpsc::channel();
        let callback: AuthCallback = Box::new(move |user: Option<&User>| {
            let _ = tx.send(user.cloned());
        });
        (callback, rx)
    }

    #[test]
    fn test_subscription_fires_immediately_and_on_change() {
        let auth = SimulatedAuth::new(LocalStorage::open_in_memory().unwrap());
        let (callback, rx) = channel_callback();
        let _subscription = auth.on_auth_state_changed(callback);

        assert_eq!(rx.try_recv().unwrap(), None);

        let user = auth.login_with_google().unwrap();
        assert_eq!(user, SimulatedAuth::demo_user());
        assert_eq!(rx.try_recv().unwrap(), Some(user.clone()));
        assert_eq!(auth.current_user(), Some(user));

        auth.logout().unwrap();
        assert_eq!(rx.try_recv().unwrap(), None);
        assert_eq!(auth.current_user(), None);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let auth = SimulatedAuth::new(LocalStorage::open_in_memory().unwrap());
        let (callback, rx) = channel_callback();
        let subscription = auth.on_auth_state_changed(callback);
        assert_eq!(rx.try_recv().unwrap(), None);
        assert_eq!(auth.listeners.len(), 1);

        subscription.unsubscribe();
        assert_eq!(auth.listeners.len(), 0);

        auth.login_with_google().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let auth = SimulatedAuth::new(LocalStorage::open_in_memory().unwrap());
        {
            let (callback, _rx) = channel_callback();
            let _subscription = auth.on_auth_state_changed(callback);
            assert_eq!(auth.listeners.len(), 1);
        }
        assert_eq!(auth.listeners.len(), 0);
    }

    #[test]
    fn test_simulated_user_persists_across_instances() {
        let storage = LocalStorage::open_in_memory().unwrap();
        SimulatedAuth::new(storage.clone()).login_with_google().unwrap();

        let again = SimulatedAuth::new(storage);
        let (callback, rx) = channel_callback();
        let _subscription = again.on_auth_state_changed(callback);
        assert_eq!(rx.try_recv().unwrap(), Some(SimulatedAuth::demo_user()));
    }

    #[test]
    fn test_corrupt_simulated_user_reads_as_signed_out() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage.set_item(SIMULATED_USER_KEY, "garbage").unwrap();
        assert_eq!(SimulatedAuth::new(storage).current_user(), None);
    }

    fn session_for(uid: &str, expires_at: DateTime<Utc>) -> Session {
        Session {
            user: User {
                uid: uid.to_string(),
                email: Some("a@b.c".to_string()),
            },
            id_token: "id-token".to_string(),
            refresh_token: "refresh-token".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_restore_keeps_fresh_session_without_network() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let session = session_for("uid1", Utc::now() + ChronoDuration::hours(1));
        storage.set_json(FIREBASE_SESSION_KEY, &session).unwrap();

        let firebase = Arc::new(FirebaseSession::new("key".to_string(), storage).unwrap());
        firebase.restore();
        let auth = FirebaseAuth::new(firebase.clone(), None);

        assert_eq!(auth.current_user().map(|u| u.uid), Some("uid1".to_string()));
        assert_eq!(firebase.id_token_for(&session.user).unwrap(), "id-token");
    }

    #[test]
    fn test_id_token_requires_matching_user() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let firebase = FirebaseSession::new("key".to_string(), storage).unwrap();
        let other = User {
            uid: "someone".to_string(),
            email: None,
        };
        assert!(matches!(firebase.id_token_for(&other), Err(PersistenceError::NotSignedIn)));
    }

    #[test]
    fn test_live_login_without_token_is_unavailable() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let firebase = Arc::new(FirebaseSession::new("key".to_string(), storage).unwrap());
        let auth = FirebaseAuth::new(firebase, None);
        let (callback, rx) = channel_callback();
        let _subscription = auth.on_auth_state_changed(callback);
        assert_eq!(rx.try_recv().unwrap(), None);

        assert!(matches!(auth.login_with_google(), Err(AuthError::Unavailable(_))));
        // Session state is unaffected and nobody was notified.
        assert!(rx.try_recv().is_err());
        assert_eq!(auth.current_user(), None);
    }

    #[test]
    fn test_live_logout_clears_persisted_session() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let session = session_for("uid1", Utc::now() + ChronoDuration::hours(1));
        storage.set_json(FIREBASE_SESSION_KEY, &session).unwrap();
        let firebase = Arc::new(FirebaseSession::new("key".to_string(), storage.clone()).unwrap());
        firebase.restore();

        let auth = FirebaseAuth::new(firebase, None);
        auth.logout().unwrap();
        assert_eq!(auth.current_user(), None);
        assert_eq!(storage.get_item(FIREBASE_SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn test_expiry_and_error_helpers() {
        let now = Utc::now();
        assert_eq!(expiry_from(Some("120"), now), now + ChronoDuration::seconds(120));
        assert_eq!(expiry_from(None, now), now + ChronoDuration::seconds(3600));
        assert_eq!(expiry_from(Some("soon"), now), now + ChronoDuration::seconds(3600));
        assert_eq!(expiry_from(Some(&i64::MAX.to_string()), now), now + ChronoDuration::seconds(3600));
        assert_eq!(expiry_from(Some("9000000000000"), now), now + ChronoDuration::seconds(3600));
        assert!(session_for("u", now + ChronoDuration::seconds(30)).is_expiring(now));
        assert!(!session_for("u", now + ChronoDuration::seconds(600)).is_expiring(now));

        assert_eq!(
            provider_error(r#"{"error":{"code":400,"message":"INVALID_IDP_RESPONSE"}}"#),
            "INVALID_IDP_RESPONSE"
        );
        assert_eq!(provider_error("boom"), "boom");
    }
}

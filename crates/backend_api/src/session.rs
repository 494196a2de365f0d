use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use line_client::LineProfile;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";
pub const STATE_COOKIE: &str = "line_oauth_state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub profile: LineProfile,
    pub expires_at: DateTime<Utc>,
}

/// Server-side map from opaque session id to the logged-in LINE user.
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mints a new session id for `profile`. Expired sessions are swept
    /// out on the way.
    pub fn create(&self, profile: LineProfile) -> String {
        let now = Utc::now();
        let session_id = format!("session-{}", Uuid::new_v4().simple());
        let session = Session {
            profile,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.lock();
        sessions.retain(|_, session| session.expires_at > now);
        sessions.insert(session_id.clone(), session);
        session_id
    }

    /// Returns a live session; expired ones are evicted.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.lock();
        match sessions.get(session_id) {
            Some(session) if session.expires_at > Utc::now() => Some(session.clone()),
            Some(_) => {
                sessions.remove(session_id);
                None
            }
            None => None,
        }
    }

    pub fn destroy(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }
}

/// `Set-Cookie` value for an HTTP-only cookie living `max_age`.
pub fn build_cookie(name: &str, value: &str, path: &str, max_age: Duration, secure: bool) -> String {
    let expires = (Utc::now() + max_age).format("%a, %d %b %Y %H:%M:%S GMT");
    format!(
        "{name}={value}; Path={path}; HttpOnly;{} SameSite=Lax; Max-Age={}; Expires={expires}",
        secure_attribute(secure),
        max_age.num_seconds().max(0)
    )
}

/// `Set-Cookie` value that makes the browser drop the cookie.
pub fn expired_cookie(name: &str, path: &str, secure: bool) -> String {
    format!(
        "{name}=; Path={path}; HttpOnly;{} SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        secure_attribute(secure)
    )
}

fn secure_attribute(secure: bool) -> &'static str {
    if secure { " Secure;" } else { "" }
}

/// Reads a cookie value from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

use actix_web::cookie::{Cookie, CookieJar, Key, SameSite};
use actix_web::HttpRequest;
use sha2::{Digest, Sha512};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "northwind_session";

/// Issues and reads the encrypted session id cookie.
pub struct SessionKeys {
    key: Key,
}

impl SessionKeys {
    /// Derives the 64-byte cookie key from a secret of any length.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha512::digest(secret.as_bytes());
        Self {
            key: Key::from(digest.as_slice()),
        }
    }

    /// Session id carried by the request, if the cookie decrypts.
    pub fn read(&self, req: &HttpRequest) -> Option<Uuid> {
        let cookie = req.cookie(SESSION_COOKIE)?;
        let mut jar = CookieJar::new();
        jar.add_original(cookie);
        jar.private(&self.key)
            .get(SESSION_COOKIE)
            .and_then(|c| Uuid::parse_str(c.value()).ok())
    }

    pub fn issue(&self, session: Uuid) -> Option<Cookie<'static>> {
        let mut jar = CookieJar::new();
        jar.private_mut(&self.key).add(
            Cookie::build(SESSION_COOKIE, session.to_string())
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .finish(),
        );
        jar.get(SESSION_COOKIE).cloned()
    }

    /// Existing session id, or a fresh one with the cookie to set.
    pub fn resolve(&self, req: &HttpRequest) -> (Uuid, Option<Cookie<'static>>) {
        match self.read(req) {
            Some(session) => (session, None),
            None => {
                let session = Uuid::new_v4();
                (session, self.issue(session))
            }
        }
    }
}

//! Request decoration: bearer headers and anti-forgery tokens.
//!
//! Decoration is pure and infallible. A missing credential, a missing anti-forgery
//! cookie, or secret material that cannot form a valid header value all leave the request
//! undecorated; rejecting such a request is the server's job, not the authenticator's.

// crates.io
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
// self
use crate::{_prelude::*, http::RequestParts, store::CredentialStore};

/// Header carrying the anti-forgery token in cookie mode.
///
/// Header names travel lowercase on the wire; servers match them case-insensitively, so
/// this is equivalent to the conventional `X-CSRFToken` spelling.
pub const CSRF_HEADER: HeaderName = HeaderName::from_static("x-csrftoken");
/// Cookie the anti-forgery token is read from.
pub const CSRF_COOKIE: &str = "csrftoken";

/// Methods that never change server state and therefore skip anti-forgery decoration.
const SAFE_METHODS: [Method; 4] = [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE];

/// Read-only view of the cookies visible to the relay.
///
/// Cookie deployments keep session credentials in httpOnly cookies the relay cannot see;
/// this source only needs to surface the readable anti-forgery cookie. Implementations
/// must never log cookie values.
pub trait CookieSource
where
	Self: Send + Sync,
{
	/// Returns the value of the named cookie, if present.
	fn cookie(&self, name: &str) -> Option<String>;
}

/// Fixed in-process cookie set for deployments without a browser jar, and for tests.
#[derive(Clone, Debug, Default)]
pub struct StaticCookies(Arc<RwLock<HashMap<String, String>>>);
impl StaticCookies {
	/// Sets or replaces a cookie value.
	pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
		self.0.write().insert(name.into(), value.into());
	}

	/// Removes a cookie.
	pub fn remove(&self, name: &str) {
		self.0.write().remove(name);
	}
}
impl CookieSource for StaticCookies {
	fn cookie(&self, name: &str) -> Option<String> {
		self.0.read().get(name).cloned()
	}
}

/// Deployment variant selecting how outbound requests are authenticated.
///
/// The two variants are alternate configurations, never active simultaneously: one client
/// instance runs exactly one coherent scheme.
#[derive(Clone)]
pub enum AuthScheme {
	/// Access secret travels in an `Authorization: Bearer` header read from the store.
	Bearer,
	/// Credentials travel on transport-managed cookies; requests with state-changing
	/// methods additionally carry the [`CSRF_HEADER`] read from [`CSRF_COOKIE`].
	Cookie {
		/// Source the anti-forgery cookie is read from.
		cookies: Arc<dyn CookieSource>,
	},
}
impl AuthScheme {
	/// Cookie scheme backed by the provided cookie source.
	pub fn cookie(cookies: impl CookieSource + 'static) -> Self {
		Self::Cookie { cookies: Arc::new(cookies) }
	}

	/// Decorates an outbound request with whatever credential material the scheme requires.
	pub fn decorate(&self, store: &dyn CredentialStore, request: &mut RequestParts) {
		match self {
			Self::Bearer => {
				let Some(credential) = store.read() else {
					return;
				};

				// insert() replaces any stale header left over from a prior attempt.
				if let Ok(value) =
					HeaderValue::from_str(&format!("Bearer {}", credential.access.expose()))
				{
					request.headers.insert(AUTHORIZATION, value);
				}
			},
			Self::Cookie { cookies } => {
				if SAFE_METHODS.contains(&request.method) {
					return;
				}

				let Some(token) = cookies.cookie(CSRF_COOKIE) else {
					return;
				};

				if let Ok(value) = HeaderValue::from_str(&token) {
					request.headers.insert(CSRF_HEADER, value);
				}
			},
		}
	}
}
impl Debug for AuthScheme {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Bearer => f.write_str("AuthScheme::Bearer"),
			Self::Cookie { .. } => f.write_str("AuthScheme::Cookie"),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{credential::Credential, store::MemoryStore};

	fn request(method: Method) -> RequestParts {
		RequestParts::new(
			method,
			Url::parse("https://api.example.com/portal/records").expect("Failed to parse URL."),
		)
	}

	#[test]
	fn bearer_sets_authorization_from_store() {
		let store = MemoryStore::with_credential(Credential::bearer("a1", "r1"));
		let mut decorated = request(Method::GET);

		AuthScheme::Bearer.decorate(&store, &mut decorated);

		assert_eq!(
			decorated.headers.get(AUTHORIZATION).map(|value| value.as_bytes()),
			Some(b"Bearer a1".as_slice()),
		);
	}

	#[test]
	fn bearer_is_a_noop_without_credential() {
		let store = MemoryStore::default();
		let mut decorated = request(Method::GET);

		AuthScheme::Bearer.decorate(&store, &mut decorated);

		assert!(decorated.headers.is_empty());
	}

	#[test]
	fn bearer_replaces_a_stale_header() {
		let store = MemoryStore::with_credential(Credential::bearer("fresh", "r1"));
		let mut decorated = request(Method::GET)
			.with_header(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));

		AuthScheme::Bearer.decorate(&store, &mut decorated);

		assert_eq!(
			decorated.headers.get(AUTHORIZATION).map(|value| value.as_bytes()),
			Some(b"Bearer fresh".as_slice()),
		);
	}

	#[test]
	fn cookie_attaches_anti_forgery_header_to_unsafe_methods_only() {
		let cookies = StaticCookies::default();

		cookies.set(CSRF_COOKIE, "forgery-token");

		let store = MemoryStore::default();
		let scheme = AuthScheme::cookie(cookies);

		for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
			let mut decorated = request(method.clone());

			scheme.decorate(&store, &mut decorated);

			assert_eq!(
				decorated.headers.get(CSRF_HEADER).map(|value| value.as_bytes()),
				Some(b"forgery-token".as_slice()),
				"{method} should carry the anti-forgery header",
			);
		}
		for method in [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE] {
			let mut decorated = request(method.clone());

			scheme.decorate(&store, &mut decorated);

			assert!(
				decorated.headers.get(CSRF_HEADER).is_none(),
				"{method} should stay undecorated",
			);
		}
	}

	#[test]
	fn cookie_omits_header_when_cookie_is_absent() {
		let scheme = AuthScheme::cookie(StaticCookies::default());
		let store = MemoryStore::default();
		let mut decorated = request(Method::POST);

		scheme.decorate(&store, &mut decorated);

		assert!(decorated.headers.is_empty());
	}
}

//! Authenticated request relay - attach credentials to outgoing requests, detect stale
//! sessions, and collapse concurrent credential refreshes into a single flight.
//!
//! The crate layers authentication *policy* on top of a generic request-executing
//! [`Transport`](http::Transport): every outbound request is decorated with credential
//! material, every `401 Unauthorized` response is inspected for refresh eligibility, and
//! all concurrently failing requests share exactly one refresh exchange before being
//! replayed transparently.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod authenticate;
pub mod credential;
pub mod error;
pub mod http;
pub mod obs;
pub mod pipeline;
pub mod refresh;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use crate::{
		credential::{Credential, CredentialSecret},
		http::ReqwestTransport,
		pipeline::{Client, ClientBuilder, Navigator},
		store::{CredentialStore, MemoryStore},
	};

	/// Client type alias used by reqwest-backed integration tests.
	pub type ReqwestTestClient = Client<ReqwestTransport>;

	/// Navigator that records assignments so tests can assert the redirect guard.
	#[derive(Debug, Default)]
	pub struct RecordingNavigator {
		location: Mutex<String>,
		assignments: AtomicUsize,
	}
	impl RecordingNavigator {
		/// Number of times the relay navigated somewhere.
		pub fn assignments(&self) -> usize {
			self.assignments.load(Ordering::SeqCst)
		}
	}
	impl Navigator for RecordingNavigator {
		fn location(&self) -> String {
			self.location.lock().clone()
		}

		fn assign(&self, path: &str) {
			*self.location.lock() = path.into();

			self.assignments.fetch_add(1, Ordering::SeqCst);
		}
	}

	/// Builds a reqwest transport with an enabled cookie jar for cookie-mode tests.
	pub fn test_reqwest_transport_with_cookies() -> ReqwestTransport {
		let client = ReqwestClient::builder()
			.cookie_store(true)
			.build()
			.expect("Failed to build cookie-enabled Reqwest client for tests.");

		ReqwestTransport::with_client(client)
	}

	/// Seeds the store with a bearer access/refresh pair.
	pub fn seed_bearer(store: &dyn CredentialStore, access: &str, refresh: &str) {
		store.write(Credential {
			access: CredentialSecret::new(access),
			refresh: Some(CredentialSecret::new(refresh)),
		});
	}

	/// Constructs a builder wired to an in-memory store, a recording navigator, and the
	/// reqwest transport used across integration tests.
	pub fn build_reqwest_test_client(
		refresh_endpoint: Url,
	) -> (ClientBuilder<ReqwestTransport>, Arc<MemoryStore>, Arc<RecordingNavigator>) {
		let store = Arc::new(MemoryStore::default());
		let navigator = Arc::new(RecordingNavigator::default());
		let builder = Client::builder(ReqwestTransport::default(), store.clone(), refresh_endpoint)
			.navigator(navigator.clone());

		(builder, store, navigator)
	}
}

mod _prelude {
	pub use std::{
		collections::{HashMap, VecDeque},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use http::{HeaderMap, Method, StatusCode};
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {auth_relay as _, httpmock as _};

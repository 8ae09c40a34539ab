#![cfg(feature = "reqwest")]

//! Deterministic single-flight coverage driven by a scripted in-process transport, so the
//! interleaving of concurrent authentication failures is fully controlled by the test.

// std
use std::sync::{
	Arc,
	atomic::{AtomicBool, AtomicUsize, Ordering},
};
// crates.io
use http::header::AUTHORIZATION;
use tokio::{sync::Semaphore, task::yield_now};
// self
use auth_relay::{
	_preludet::*,
	error::TransportError,
	http::{RequestParts, ResponseParts, Transport, TransportFuture},
	pipeline::{Client, Navigator},
	store::{CredentialStore, MemoryStore},
};

/// Transport whose refresh exchange suspends until the test releases it, guaranteeing
/// every concurrent request observes its rejection while the exchange is in flight.
struct ScriptedTransport {
	/// Access secret currently accepted for protected paths.
	valid_access: Mutex<String>,
	/// Body returned by a released refresh exchange.
	refresh_body: Mutex<String>,
	/// When set, the refresh exchange fails like a timed-out call instead of answering.
	refresh_unreachable: AtomicBool,
	refresh_gate: Semaphore,
	refresh_hits: AtomicUsize,
	rejected_hits: AtomicUsize,
	accepted_order: Mutex<Vec<String>>,
}
impl ScriptedTransport {
	fn new() -> Arc<Self> {
		Arc::new(Self {
			valid_access: Mutex::new("fresh".into()),
			refresh_body: Mutex::new(r#"{"access":"fresh"}"#.into()),
			refresh_unreachable: AtomicBool::new(false),
			refresh_gate: Semaphore::new(0),
			refresh_hits: AtomicUsize::new(0),
			rejected_hits: AtomicUsize::new(0),
			accepted_order: Mutex::new(Vec::new()),
		})
	}

	fn release_refresh(&self) {
		self.refresh_gate.add_permits(1);
	}

	fn refresh_hits(&self) -> usize {
		self.refresh_hits.load(Ordering::SeqCst)
	}

	fn rejected_hits(&self) -> usize {
		self.rejected_hits.load(Ordering::SeqCst)
	}

	fn accepted_order(&self) -> Vec<String> {
		self.accepted_order.lock().clone()
	}
}
impl Transport for ScriptedTransport {
	fn execute(&self, request: RequestParts) -> TransportFuture<'_> {
		Box::pin(async move {
			let path = request.url.path().to_string();

			if path.contains("/auth/refresh") {
				self.refresh_hits.fetch_add(1, Ordering::SeqCst);

				self.refresh_gate
					.acquire()
					.await
					.expect("Refresh gate should never be closed.")
					.forget();

				if self.refresh_unreachable.load(Ordering::SeqCst) {
					return Err(TransportError::Io(std::io::Error::new(
						std::io::ErrorKind::TimedOut,
						"refresh exchange timed out",
					)));
				}

				let mut response = ResponseParts::new(StatusCode::OK);

				response.body = self.refresh_body.lock().clone().into_bytes();

				return Ok(response);
			}

			let expected = format!("Bearer {}", self.valid_access.lock().clone());
			let presented = request
				.headers
				.get(AUTHORIZATION)
				.and_then(|value| value.to_str().ok())
				.map(ToOwned::to_owned);

			if presented.as_deref() == Some(expected.as_str()) {
				self.accepted_order.lock().push(path);

				let mut response = ResponseParts::new(StatusCode::OK);

				response.body = b"ok".to_vec();

				Ok(response)
			} else {
				self.rejected_hits.fetch_add(1, Ordering::SeqCst);

				Ok(ResponseParts::new(StatusCode::UNAUTHORIZED))
			}
		})
	}
}

fn url_of(path: &str) -> Url {
	Url::parse(&format!("https://api.example.com{path}"))
		.expect("Scripted URL should parse successfully.")
}

fn build_scripted_client(
	transport: Arc<ScriptedTransport>,
) -> (Arc<Client<ScriptedTransport>>, Arc<MemoryStore>, Arc<RecordingNavigator>) {
	let store = Arc::new(MemoryStore::default());
	let navigator = Arc::new(RecordingNavigator::default());
	let client = Client::builder(transport, store.clone(), url_of("/api/auth/refresh/"))
		.navigator(navigator.clone())
		.build()
		.expect("Scripted client should build.");

	seed_bearer(store.as_ref(), "stale", "r1");

	(Arc::new(client), store, navigator)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
	while !condition() {
		yield_now().await;
	}
}

#[tokio::test]
async fn three_concurrent_rejections_share_one_refresh_released_in_order() {
	let transport = ScriptedTransport::new();
	let (client, store, _) = build_scripted_client(transport.clone());
	let handles: Vec<_> = ["/portal/records/a", "/portal/records/b", "/portal/records/c"]
		.into_iter()
		.map(|path| {
			let client = client.clone();
			let url = url_of(path);

			tokio::spawn(async move { client.send(RequestParts::get(url)).await })
		})
		.collect();

	// All three must observe their rejection while the single exchange is gated open.
	wait_until(|| transport.rejected_hits() == 3).await;

	assert!(client.is_refreshing());
	assert_eq!(transport.refresh_hits(), 1);

	transport.release_refresh();

	for handle in handles {
		let response = handle
			.await
			.expect("Send task should not panic.")
			.expect("Replayed request should succeed.");

		assert_eq!(response.status, StatusCode::OK);
		assert_eq!(response.body, b"ok");
	}

	// 3 originals + 1 refresh + 3 replays; never 3 refreshes + 6 requests.
	assert_eq!(transport.refresh_hits(), 1);
	assert_eq!(transport.rejected_hits(), 3);
	assert_eq!(
		transport.accepted_order(),
		["/portal/records/a", "/portal/records/b", "/portal/records/c"],
	);
	assert!(!client.is_refreshing());
	assert_eq!(client.refresh_metrics().attempts(), 1);
	assert_eq!(client.refresh_metrics().collapsed(), 2);
	assert_eq!(client.refresh_metrics().successes(), 1);
	assert_eq!(
		store.read().map(|credential| credential.access.expose().to_string()),
		Some("fresh".into()),
	);
}

#[tokio::test]
async fn timed_out_refresh_rejects_every_waiter_and_redirects_once() {
	let transport = ScriptedTransport::new();
	let (client, store, navigator) = build_scripted_client(transport.clone());

	transport.refresh_unreachable.store(true, Ordering::SeqCst);

	let handles: Vec<_> = ["/portal/records/a", "/portal/records/b", "/portal/records/c"]
		.into_iter()
		.map(|path| {
			let client = client.clone();
			let url = url_of(path);

			tokio::spawn(async move { client.send(RequestParts::get(url)).await })
		})
		.collect();

	wait_until(|| transport.rejected_hits() == 3).await;
	transport.release_refresh();

	for handle in handles {
		let response = handle
			.await
			.expect("Send task should not panic.")
			.expect("The original rejection should surface as a response.");

		assert_eq!(response.status, StatusCode::UNAUTHORIZED);
	}

	assert_eq!(transport.refresh_hits(), 1);
	assert_eq!(store.read(), None);
	// One redirect even though three callers failed simultaneously.
	assert_eq!(navigator.assignments(), 1);
	assert_eq!(navigator.location(), "/login");
	assert!(!client.is_refreshing());
	assert_eq!(client.refresh_metrics().failures(), 1);
}

#[tokio::test]
async fn settled_cycles_are_independent() {
	let transport = ScriptedTransport::new();
	let (client, _, _) = build_scripted_client(transport.clone());

	transport.release_refresh();

	let response = client
		.send(RequestParts::get(url_of("/portal/records/a")))
		.await
		.expect("First cycle should refresh and replay.");

	assert_eq!(response.status, StatusCode::OK);
	assert_eq!(transport.refresh_hits(), 1);
	assert!(!client.is_refreshing());

	// The freshly issued secret expires later; a new rejection starts a brand-new cycle.
	*transport.valid_access.lock() = "fresh2".into();
	*transport.refresh_body.lock() = r#"{"access":"fresh2"}"#.into();

	transport.release_refresh();

	let response = client
		.send(RequestParts::get(url_of("/portal/records/b")))
		.await
		.expect("Second cycle should refresh and replay independently.");

	assert_eq!(response.status, StatusCode::OK);
	assert_eq!(transport.refresh_hits(), 2);
	assert_eq!(client.refresh_metrics().attempts(), 2);
	assert_eq!(client.refresh_metrics().successes(), 2);
}

#[tokio::test]
async fn torn_down_leader_fails_the_cycle_without_wedging_the_machine() {
	let transport = ScriptedTransport::new();
	let (client, store, navigator) = build_scripted_client(transport.clone());
	let leader = {
		let client = client.clone();

		tokio::spawn(async move { client.send(RequestParts::get(url_of("/portal/records/a"))).await })
	};

	// The leader is suspended inside the gated exchange once the hit registers.
	wait_until(|| transport.refresh_hits() == 1).await;

	let waiter = {
		let client = client.clone();

		tokio::spawn(async move { client.send(RequestParts::get(url_of("/portal/records/b"))).await })
	};

	wait_until(|| client.refresh_metrics().collapsed() == 1).await;
	leader.abort();

	assert!(
		leader.await.expect_err("Aborted leader should report cancellation.").is_cancelled()
	);

	let response = waiter
		.await
		.expect("Waiter task should not panic.")
		.expect("The waiter's original rejection should surface as a response.");

	assert_eq!(response.status, StatusCode::UNAUTHORIZED);
	assert!(!client.is_refreshing());
	assert_eq!(navigator.assignments(), 1);
	assert_eq!(client.refresh_metrics().failures(), 1);

	// The machine is idle again and a later cycle completes normally.
	seed_bearer(store.as_ref(), "stale", "r1");
	transport.release_refresh();

	let response = client
		.send(RequestParts::get(url_of("/portal/records/c")))
		.await
		.expect("Recovery cycle should refresh and replay.");

	assert_eq!(response.status, StatusCode::OK);
	assert_eq!(transport.refresh_hits(), 2);
}

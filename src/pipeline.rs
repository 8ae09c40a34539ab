//! Client pipeline: decoration, dispatch, and the response guard.
//!
//! [`Client::send`] is the single entry point. Every call either resolves with the
//! (possibly replayed) response or fails with its own transport error; the refresh
//! mechanics in between are invisible to callers.

// self
use crate::{
	_prelude::*,
	authenticate::AuthScheme,
	error::ConfigError,
	http::{RequestParts, ResponseParts, Transport},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	refresh::{RefreshCoordinator, RefreshMetrics, RefreshOutcome},
	store::CredentialStore,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

/// Path of the login view the relay navigates to on terminal refresh failure.
pub const DEFAULT_LOGIN_PATH: &str = "/login";
/// Authentication-probe endpoints whose `401` responses are expected outcomes, matched by
/// substring containment against the request path.
pub const DEFAULT_PROBE_PATHS: [&str; 4] =
	["/auth/session", "/auth/login", "/auth/refresh", "/auth/register"];

/// Navigation collaborator receiving the redirect-to-login side effect.
pub trait Navigator
where
	Self: Send + Sync,
{
	/// Returns the current location path.
	fn location(&self) -> String;

	/// Navigates to the provided path.
	fn assign(&self, path: &str);
}

/// No-op navigator for deployments without a navigable surface.
#[derive(Clone, Debug, Default)]
pub struct NullNavigator;
impl Navigator for NullNavigator {
	fn location(&self) -> String {
		String::new()
	}

	fn assign(&self, _: &str) {}
}

/// Outbound descriptor plus its replay guard.
///
/// `retried` is the re-entrancy guard: a request is replayed at most once per
/// authentication-failure cycle, which is what prevents an infinite refresh loop when the
/// replay itself comes back unauthorized. The flag belongs to exactly one logical request
/// and is never shared.
#[derive(Debug)]
struct PendingRequest {
	request: RequestParts,
	retried: bool,
}
impl PendingRequest {
	fn new(request: RequestParts) -> Self {
		Self { request, retried: false }
	}
}

/// Authenticated request relay for one backend.
///
/// The client owns the refresh coordinator and is shared (behind `Arc`) by every caller
/// talking to that backend; it deliberately does not implement `Clone`, because duplicated
/// refresh state would break the single-flight collapse.
pub struct Client<T>
where
	T: ?Sized + Transport,
{
	transport: Arc<T>,
	store: Arc<dyn CredentialStore>,
	scheme: AuthScheme,
	coordinator: RefreshCoordinator,
	navigator: Arc<dyn Navigator>,
	refresh_endpoint: Url,
	login_path: String,
	probe_paths: Vec<String>,
	// Makes the location check and the assignment one atomic step, so simultaneously
	// failing waiters fire the side effect exactly once.
	redirect_lock: Mutex<()>,
}
impl<T> Client<T>
where
	T: ?Sized + Transport,
{
	/// Starts building a client from its three mandatory collaborators.
	pub fn builder(
		transport: impl Into<Arc<T>>,
		store: Arc<dyn CredentialStore>,
		refresh_endpoint: Url,
	) -> ClientBuilder<T> {
		ClientBuilder {
			transport: transport.into(),
			store,
			scheme: AuthScheme::Bearer,
			navigator: Arc::new(NullNavigator),
			refresh_endpoint,
			login_path: DEFAULT_LOGIN_PATH.into(),
			probe_paths: DEFAULT_PROBE_PATHS.iter().map(|path| (*path).into()).collect(),
		}
	}

	/// Sends a request through the authenticated pipeline.
	///
	/// Responses of any HTTP status resolve as `Ok`; `Err` is reserved for the request's
	/// own transport failures, which never trigger a refresh. An eligible `401` is
	/// absorbed: the caller observes either the replayed response or, when the refresh
	/// itself fails, the original `401` unchanged.
	pub async fn send(&self, request: RequestParts) -> Result<ResponseParts> {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.dispatch(request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Shared counters for this client's refresh cycles.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		self.coordinator.metrics()
	}

	/// `true` while a refresh exchange is in flight.
	pub fn is_refreshing(&self) -> bool {
		self.coordinator.is_refreshing()
	}

	async fn dispatch(&self, request: RequestParts) -> Result<ResponseParts> {
		let mut pending = PendingRequest::new(request);
		let response = self.transport.execute(self.decorate(&pending)).await?;

		if !self.eligible(&pending, &response) {
			return Ok(response);
		}

		pending.retried = true;

		match self.refresh_credential().await {
			RefreshOutcome::Refreshed => {
				obs::record_flow_outcome(FlowKind::Replay, FlowOutcome::Attempt);

				// Decorated anew so the replay carries the freshly issued secret, never
				// the rejected one. The replay's outcome returns as-is: no further
				// refresh attempts even if it fails again.
				let replayed = self.transport.execute(self.decorate(&pending)).await?;
				let outcome = if replayed.status == StatusCode::UNAUTHORIZED {
					FlowOutcome::Failure
				} else {
					FlowOutcome::Success
				};

				obs::record_flow_outcome(FlowKind::Replay, outcome);

				Ok(replayed)
			},
			RefreshOutcome::Failed => {
				self.store.clear();
				self.redirect_to_login();

				// The caller sees its original authentication failure, not a distinct
				// refresh error.
				Ok(response)
			},
		}
	}

	fn decorate(&self, pending: &PendingRequest) -> RequestParts {
		let mut request = pending.request.clone();

		self.scheme.decorate(self.store.as_ref(), &mut request);

		request
	}

	/// Refresh-and-retry eligibility per the response guard's contract.
	fn eligible(&self, pending: &PendingRequest, response: &ResponseParts) -> bool {
		response.status == StatusCode::UNAUTHORIZED
			&& !pending.retried
			&& !self.is_probe_path(pending.request.url.path())
	}

	/// A `401` from these endpoints is an expected outcome (wrong password, invalid
	/// session probe), not a stale-session signal.
	fn is_probe_path(&self, path: &str) -> bool {
		self.probe_paths.iter().any(|probe| path.contains(probe.as_str()))
	}

	fn redirect_to_login(&self) {
		let _guard = self.redirect_lock.lock();

		// Guarded against re-firing when the login view is already showing.
		if self.navigator.location() != self.login_path {
			self.navigator.assign(&self.login_path);
		}
	}

	pub(crate) fn transport(&self) -> &T {
		self.transport.as_ref()
	}

	pub(crate) fn store(&self) -> &dyn CredentialStore {
		self.store.as_ref()
	}

	pub(crate) fn scheme(&self) -> &AuthScheme {
		&self.scheme
	}

	pub(crate) fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	pub(crate) fn refresh_endpoint(&self) -> &Url {
		&self.refresh_endpoint
	}
}
#[cfg(feature = "reqwest")]
impl Client<ReqwestTransport> {
	/// Starts building a client backed by a fresh reqwest transport.
	///
	/// Cookie-mode deployments should instead pass a cookie-jar-enabled transport to
	/// [`Client::builder`].
	pub fn reqwest_builder(
		store: Arc<dyn CredentialStore>,
		refresh_endpoint: Url,
	) -> ClientBuilder<ReqwestTransport> {
		Self::builder(ReqwestTransport::default(), store, refresh_endpoint)
	}
}
impl<T> Debug for Client<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("scheme", &self.scheme)
			.field("refresh_endpoint", &self.refresh_endpoint.as_str())
			.field("login_path", &self.login_path)
			.field("probe_paths", &self.probe_paths)
			.finish()
	}
}

/// Builder assembling a [`Client`].
pub struct ClientBuilder<T>
where
	T: ?Sized + Transport,
{
	transport: Arc<T>,
	store: Arc<dyn CredentialStore>,
	scheme: AuthScheme,
	navigator: Arc<dyn Navigator>,
	refresh_endpoint: Url,
	login_path: String,
	probe_paths: Vec<String>,
}
impl<T> ClientBuilder<T>
where
	T: ?Sized + Transport,
{
	/// Selects the authentication scheme (defaults to [`AuthScheme::Bearer`]).
	pub fn scheme(mut self, scheme: AuthScheme) -> Self {
		self.scheme = scheme;

		self
	}

	/// Sets the navigation collaborator (defaults to [`NullNavigator`]).
	pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
		self.navigator = navigator;

		self
	}

	/// Overrides the login path used by the redirect guard.
	pub fn login_path(mut self, path: impl Into<String>) -> Self {
		self.login_path = path.into();

		self
	}

	/// Replaces the probe allow-list (defaults to [`DEFAULT_PROBE_PATHS`]).
	pub fn probe_paths(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.probe_paths = paths.into_iter().map(Into::into).collect();

		self
	}

	/// Validates the configuration and assembles the client.
	pub fn build(self) -> Result<Client<T>> {
		if self.probe_paths.iter().any(String::is_empty) {
			return Err(ConfigError::EmptyProbePath.into());
		}
		if self.login_path.is_empty() {
			return Err(ConfigError::EmptyLoginPath.into());
		}

		Ok(Client {
			transport: self.transport,
			store: self.store,
			scheme: self.scheme,
			coordinator: RefreshCoordinator::default(),
			navigator: self.navigator,
			refresh_endpoint: self.refresh_endpoint,
			login_path: self.login_path,
			probe_paths: self.probe_paths,
			redirect_lock: Mutex::new(()),
		})
	}
}

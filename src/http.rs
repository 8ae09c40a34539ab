//! Transport primitives for the relay's request pipeline.
//!
//! The module exposes [`Transport`] alongside the [`RequestParts`] and [`ResponseParts`]
//! descriptors so downstream crates can integrate custom HTTP clients. The relay only
//! depends on this trait; the actual exchange mechanism, its connection handling, and TLS
//! all belong to the implementation.

// std
use std::ops::Deref;
// crates.io
use http::header::{HeaderName, HeaderValue};
// self
use crate::{_prelude::*, error::TransportError};

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ResponseParts, TransportError>> + 'a + Send>>;

/// Outbound request descriptor carried through the pipeline.
///
/// The pipeline keeps the descriptor undecorated between attempts and re-decorates a fresh
/// clone for every dispatch, so a replay never carries the rejected credential material.
#[derive(Clone, Debug)]
pub struct RequestParts {
	/// HTTP method.
	pub method: Method,
	/// Absolute request target.
	pub url: Url,
	/// Headers sent with the request.
	pub headers: HeaderMap,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
}
impl RequestParts {
	/// Creates a descriptor with empty headers and no body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: HeaderMap::new(), body: None }
	}

	/// Shorthand for a GET descriptor.
	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url)
	}

	/// Shorthand for a POST descriptor.
	pub fn post(url: Url) -> Self {
		Self::new(Method::POST, url)
	}

	/// Replaces the request body.
	pub fn with_body(mut self, body: Vec<u8>) -> Self {
		self.body = Some(body);

		self
	}

	/// Inserts a header, replacing any previous value.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}
}

/// Completed exchange descriptor returned by the transport.
///
/// Any HTTP status is a response, not an error; [`TransportError`] is reserved for
/// network, IO, and timeout failures.
#[derive(Clone, Debug)]
pub struct ResponseParts {
	/// HTTP status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ResponseParts {
	/// Creates a bodiless response descriptor.
	pub fn new(status: StatusCode) -> Self {
		Self { status, headers: HeaderMap::new(), body: Vec::new() }
	}

	/// `true` when the status is in the 2xx range.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}
}

/// Abstraction over HTTP transports capable of executing relay requests.
///
/// Implementations must be `Send + Sync` so one transport can serve every in-flight
/// request of a shared [`Client`](crate::pipeline::Client), and the returned futures must
/// be `Send` so the pipeline's replay logic can hop executors. The refresh exchange is
/// dispatched through the same transport and therefore inherits its timeout policy.
pub trait Transport
where
	Self: Send + Sync,
{
	/// Executes the request, resolving with the completed exchange or a transport failure.
	fn execute(&self, request: RequestParts) -> TransportFuture<'_>;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Cookie-mode deployments must configure the wrapped client with an enabled cookie jar
/// (`ReqwestClient::builder().cookie_store(true)`) so session cookies travel with every
/// request the way a browser would send them.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
	fn execute(&self, request: RequestParts) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let mut builder =
				client.request(request.method, request.url).headers(request.headers);

			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await.map_err(TransportError::from)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await.map_err(TransportError::from)?.to_vec();

			Ok(ResponseParts { status, headers, body })
		})
	}
}

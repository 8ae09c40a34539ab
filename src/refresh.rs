//! Single-flight refresh coordination: one credential refresh serves every concurrently
//! failing request.
//!
//! The coordinator is a two-state machine (`Idle` / `Refreshing`) owned by one client
//! instance. The first eligible caller becomes the cycle's leader and issues exactly one
//! exchange against the refresh endpoint; every caller arriving while the exchange is in
//! flight enqueues a waiter and suspends. Settlement returns the machine to idle and
//! releases all waiters in enqueue order, so N concurrent authentication failures collapse
//! into one network call. Refresh secrets rotate on every use server-side, which is why
//! concurrent exchanges would invalidate each other and must never be issued.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use http::header::{CONTENT_TYPE, HeaderValue};
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	authenticate::AuthScheme,
	credential::{Credential, CredentialSecret},
	error::TransportError,
	http::{RequestParts, Transport},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	pipeline::Client,
};

/// Settled outcome of one refresh cycle, shared by the leader and every waiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// The exchange succeeded; the store holds a fresh access secret (bearer mode) or the
	/// server rotated the session cookie (cookie mode).
	Refreshed,
	/// The exchange failed. The cycle is terminal: the exchange is never retried and the
	/// caller's original authentication failure propagates.
	Failed,
}

/// Failures absorbed into a cycle's [`RefreshOutcome::Failed`] settlement.
///
/// These never reach callers as errors; they surface only through logs and metrics.
#[derive(Debug, ThisError)]
pub enum RefreshError {
	/// No refresh secret is available to present to the refresh endpoint.
	#[error("No refresh credential is available.")]
	MissingRefreshCredential,
	/// Refresh request body could not be encoded.
	#[error("Refresh request body could not be encoded.")]
	BodyEncode(#[from] serde_json::Error),
	/// Refresh endpoint rejected the exchange.
	#[error("Refresh endpoint rejected the exchange with status {status}.")]
	Rejected {
		/// HTTP status returned by the refresh endpoint.
		status: StatusCode,
	},
	/// Refresh endpoint returned malformed JSON.
	#[error("Refresh endpoint returned malformed JSON.")]
	ResponseParse(#[source] serde_path_to_error::Error<serde_json::Error>),
	/// Transport failure while calling the refresh endpoint, including timeouts.
	#[error(transparent)]
	Transport(#[from] TransportError),
}

#[derive(Serialize)]
struct RefreshRequestBody<'a> {
	refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponseBody {
	access: String,
	#[serde(default)]
	refresh: Option<String>,
}

/// Waiter continuations released FIFO when the in-flight exchange settles. Receivers
/// dropped by torn-down callers are released harmlessly.
type WaiterQueue = VecDeque<oneshot::Sender<RefreshOutcome>>;

#[derive(Debug, Default)]
struct RefreshState {
	refreshing: bool,
	waiters: WaiterQueue,
}

/// Admission decision made atomically when a caller joins the coordinator.
enum Ticket {
	Leader,
	Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Single-flight refresh state machine.
///
/// One coordinator instance per client; duplicating it across clients talking to the same
/// backend breaks the single-flight collapse.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
	state: Mutex<RefreshState>,
	metrics: RefreshMetrics,
}
impl RefreshCoordinator {
	/// Shared counters for this coordinator's cycles.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// `true` while an exchange is in flight.
	pub fn is_refreshing(&self) -> bool {
		self.state.lock().refreshing
	}

	/// Joins the current cycle, becoming its leader when the machine is idle.
	///
	/// The flag is read and written under one lock with no suspension point in between, so
	/// two near-simultaneous callers can never both observe the idle state.
	fn join(&self) -> Ticket {
		let mut state = self.state.lock();

		if state.refreshing {
			let (tx, rx) = oneshot::channel();

			state.waiters.push_back(tx);
			self.metrics.record_collapsed();

			Ticket::Waiter(rx)
		} else {
			state.refreshing = true;

			Ticket::Leader
		}
	}

	/// Returns the machine to idle and releases every waiter in enqueue order.
	///
	/// The flag flips before any waiter runs, so a caller failing after settlement starts a
	/// brand-new cycle with an empty queue instead of joining a settled one.
	fn settle(&self, outcome: RefreshOutcome) {
		let waiters = {
			let mut state = self.state.lock();

			state.refreshing = false;

			std::mem::take(&mut state.waiters)
		};

		for waiter in waiters {
			let _ = waiter.send(outcome);
		}
	}
}

/// Settles the cycle as failed if the leader is torn down mid-exchange, so the machine can
/// never stick in the refreshing state with waiters pending forever.
struct SettleOnDrop<'a> {
	coordinator: &'a RefreshCoordinator,
	armed: bool,
}
impl<'a> SettleOnDrop<'a> {
	fn new(coordinator: &'a RefreshCoordinator) -> Self {
		Self { coordinator, armed: true }
	}

	fn finish(mut self, outcome: RefreshOutcome) {
		self.armed = false;

		self.coordinator.settle(outcome);
	}
}
impl Drop for SettleOnDrop<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.coordinator.metrics().record_failure();
			self.coordinator.settle(RefreshOutcome::Failed);
		}
	}
}

impl<T> Client<T>
where
	T: ?Sized + Transport,
{
	/// Runs one single-flight refresh cycle, collapsing concurrent callers onto at most
	/// one exchange against the refresh endpoint.
	///
	/// The leader stores the rotated credential before settlement, so every released
	/// waiter re-reads a fresh secret when it re-decorates its replay.
	pub async fn refresh_credential(&self) -> RefreshOutcome {
		const KIND: FlowKind = FlowKind::Refresh;

		match self.coordinator().join() {
			Ticket::Waiter(rx) => {
				// A closed channel means the leader was torn down; its drop guard settles
				// the cycle as failed.
				rx.await.unwrap_or(RefreshOutcome::Failed)
			},
			Ticket::Leader => {
				let span = FlowSpan::new(KIND, "refresh_credential");

				obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
				self.coordinator().metrics().record_attempt();

				let settle = SettleOnDrop::new(self.coordinator());
				let outcome = match span.instrument(self.exchange()).await {
					Ok(()) => {
						self.coordinator().metrics().record_success();
						obs::record_flow_outcome(KIND, FlowOutcome::Success);

						RefreshOutcome::Refreshed
					},
					Err(err) => {
						#[cfg(feature = "tracing")]
						tracing::warn!(error = %err, "Credential refresh failed; the cycle is terminal.");
						#[cfg(not(feature = "tracing"))]
						let _ = err;

						self.coordinator().metrics().record_failure();
						obs::record_flow_outcome(KIND, FlowOutcome::Failure);

						RefreshOutcome::Failed
					},
				};

				settle.finish(outcome);

				outcome
			},
		}
	}

	/// Issues the single exchange of a cycle against the refresh endpoint.
	///
	/// The exchange calls the transport directly instead of going back through the
	/// pipeline: a `401` from the refresh endpoint is a terminal answer, never a trigger
	/// for another refresh.
	async fn exchange(&self) -> Result<(), RefreshError> {
		let request = RequestParts::post(self.refresh_endpoint().clone());

		match self.scheme() {
			AuthScheme::Bearer => {
				let refresh = self
					.store()
					.read()
					.and_then(|credential| credential.refresh)
					.ok_or(RefreshError::MissingRefreshCredential)?;
				let body = serde_json::to_vec(&RefreshRequestBody { refresh: refresh.expose() })?;
				let request = request
					.with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
					.with_body(body);
				let response = self.transport().execute(request).await?;

				if !response.is_success() {
					return Err(RefreshError::Rejected { status: response.status });
				}

				let mut deserializer = serde_json::Deserializer::from_slice(&response.body);
				let parsed: RefreshResponseBody =
					serde_path_to_error::deserialize(&mut deserializer)
						.map_err(RefreshError::ResponseParse)?;
				let rotated = Credential {
					access: CredentialSecret::new(parsed.access),
					// The endpoint rotates the refresh secret on every use; keep the old
					// one only when the response omits a replacement.
					refresh: parsed.refresh.map(CredentialSecret::new).or(Some(refresh)),
				};

				self.store().write(rotated);

				Ok(())
			},
			scheme @ AuthScheme::Cookie { .. } => {
				// The refresh POST is itself state-changing, so it carries the
				// anti-forgery header; the rotated session cookie is a response side
				// effect handled entirely by the transport's jar.
				let mut request = request;

				scheme.decorate(self.store(), &mut request);

				let response = self.transport().execute(request).await?;

				if response.is_success() {
					Ok(())
				} else {
					Err(RefreshError::Rejected { status: response.status })
				}
			},
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn first_joiner_leads_and_later_joiners_wait() {
		let coordinator = RefreshCoordinator::default();

		assert!(matches!(coordinator.join(), Ticket::Leader));
		assert!(coordinator.is_refreshing());
		assert!(matches!(coordinator.join(), Ticket::Waiter(_)));
		assert!(matches!(coordinator.join(), Ticket::Waiter(_)));
		assert_eq!(coordinator.metrics().collapsed(), 2);
	}

	#[tokio::test]
	async fn settle_releases_waiters_in_enqueue_order_and_resets_the_machine() {
		let coordinator = RefreshCoordinator::default();

		assert!(matches!(coordinator.join(), Ticket::Leader));

		let mut receivers = Vec::new();

		for _ in 0..3 {
			match coordinator.join() {
				Ticket::Waiter(rx) => receivers.push(rx),
				Ticket::Leader => panic!("A second leader must not exist while refreshing."),
			}
		}

		coordinator.settle(RefreshOutcome::Refreshed);

		for rx in receivers {
			assert_eq!(
				rx.await.expect("Waiter should be released at settlement."),
				RefreshOutcome::Refreshed,
			);
		}

		assert!(!coordinator.is_refreshing());
		assert!(coordinator.state.lock().waiters.is_empty());
		// The machine is idle again, so the next joiner starts a fresh cycle.
		assert!(matches!(coordinator.join(), Ticket::Leader));
	}

	#[tokio::test]
	async fn torn_down_waiters_are_released_harmlessly() {
		let coordinator = RefreshCoordinator::default();

		assert!(matches!(coordinator.join(), Ticket::Leader));

		let abandoned = match coordinator.join() {
			Ticket::Waiter(rx) => rx,
			Ticket::Leader => panic!("A second leader must not exist while refreshing."),
		};
		let surviving = match coordinator.join() {
			Ticket::Waiter(rx) => rx,
			Ticket::Leader => panic!("A second leader must not exist while refreshing."),
		};

		drop(abandoned);
		coordinator.settle(RefreshOutcome::Failed);

		assert_eq!(
			surviving.await.expect("Surviving waiter should be released at settlement."),
			RefreshOutcome::Failed,
		);
		assert!(!coordinator.is_refreshing());
	}

	#[tokio::test]
	async fn leader_teardown_settles_waiters_as_failed() {
		let coordinator = RefreshCoordinator::default();

		assert!(matches!(coordinator.join(), Ticket::Leader));

		let waiting = match coordinator.join() {
			Ticket::Waiter(rx) => rx,
			Ticket::Leader => panic!("A second leader must not exist while refreshing."),
		};

		drop(SettleOnDrop::new(&coordinator));

		assert_eq!(
			waiting.await.expect("Waiter should be released by the leader's drop guard."),
			RefreshOutcome::Failed,
		);
		assert!(!coordinator.is_refreshing());
		assert_eq!(coordinator.metrics().failures(), 1);
	}
}

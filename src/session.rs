//! Per-connection state: the held credential and the handle used to push events back.
//!
//! The connection-acceptance layer implements [`Connection`] for each live socket and registers
//! it with a [`SessionRegistry`]. Every command it dispatches to the relay carries the matching
//! [`Session`], which owns the credential slot for that connection.

// std
use std::net::IpAddr;
// self
use crate::{
	_prelude::*,
	auth::{ConnectionId, Credential, CredentialPayload},
	http::RelayHttpClient,
	refresh::CredentialRefresher,
};

/// Out-of-band notifications pushed to a client connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
	/// The relay refreshed the session credential; the client should persist the new value.
	CredentialUpdated(Credential),
	/// The session credential expired and could not be refreshed; the client should discard it.
	CredentialCleared,
}
impl SessionEvent {
	fn for_outcome(outcome: Option<Credential>) -> Self {
		match outcome {
			Some(credential) => Self::CredentialUpdated(credential),
			None => Self::CredentialCleared,
		}
	}
}

/// Client connection as seen by the relay.
pub trait Connection
where
	Self: Send + Sync,
{
	/// Stable identifier of the connection.
	fn id(&self) -> &ConnectionId;

	/// Remote network address, when the transport exposes one.
	fn remote_addr(&self) -> Option<IpAddr>;

	/// Delivers `event` to the client. Delivery failures are the implementor's concern.
	fn notify(&self, event: SessionEvent);
}

/// Slot holding a session's current credential.
///
/// The lock is only held to copy a value in or out, never across an await.
#[derive(Debug, Default)]
pub struct CredentialStore(RwLock<Option<Credential>>);
impl CredentialStore {
	/// Creates a slot seeded with `credential`.
	pub fn new(credential: Option<Credential>) -> Self {
		Self(RwLock::new(credential))
	}

	/// Snapshot of the held credential.
	pub fn current(&self) -> Option<Credential> {
		self.0.read().clone()
	}

	/// Stores `next` and returns `true` when it differs from the held value.
	pub fn replace_if_changed(&self, next: Option<Credential>) -> bool {
		let mut slot = self.0.write();

		if *slot == next {
			return false;
		}

		*slot = next;

		true
	}

	/// Refreshes the held credential if it is stale.
	///
	/// Returns the event the client must see when the refresh changed the credential, including
	/// [`SessionEvent::CredentialCleared`] when it could not be refreshed. A concurrent replacement
	/// made while the refresh was in flight wins over the refresh result.
	pub async fn refresh_if_expired<C>(
		&self,
		refresher: &CredentialRefresher<C>,
	) -> Option<SessionEvent>
	where
		C: ?Sized + RelayHttpClient,
	{
		let held = self.current()?;
		let refreshed = refresher.refresh_if_needed(held.clone()).await;

		if refreshed.as_ref() == Some(&held) {
			return None;
		}

		{
			let mut slot = self.0.write();

			if slot.as_ref() != Some(&held) {
				tracing::debug!("credential replaced during refresh; discarding refresh result");

				return None;
			}

			*slot = refreshed.clone();
		}

		Some(SessionEvent::for_outcome(refreshed))
	}

	/// Runs `supplied` through the refresher and stores the outcome.
	///
	/// Returns the event the client must see when the stored value differs from `supplied`.
	pub async fn adopt<C>(
		&self,
		supplied: Credential,
		refresher: &CredentialRefresher<C>,
	) -> Option<SessionEvent>
	where
		C: ?Sized + RelayHttpClient,
	{
		let refreshed = refresher.refresh_if_needed(supplied.clone()).await;

		self.replace_if_changed(refreshed.clone());

		if refreshed.as_ref() == Some(&supplied) {
			return None;
		}

		Some(SessionEvent::for_outcome(refreshed))
	}
}

/// Relay-side state of one client connection.
pub struct Session {
	connection: Arc<dyn Connection>,
	credentials: CredentialStore,
}
impl Session {
	/// Creates a session for `connection` with no credential.
	pub fn new(connection: Arc<dyn Connection>) -> Self {
		Self { connection, credentials: CredentialStore::default() }
	}

	/// Connection identifier.
	pub fn id(&self) -> &ConnectionId {
		self.connection.id()
	}

	/// Remote address of the connection.
	pub fn remote_addr(&self) -> Option<IpAddr> {
		self.connection.remote_addr()
	}

	/// Credential slot.
	pub fn credentials(&self) -> &CredentialStore {
		&self.credentials
	}

	/// Resolves the credential to use for one request.
	///
	/// A credential supplied with the request replaces the held one when it differs by value.
	/// Otherwise the held credential is refreshed if stale. The connection is notified once for
	/// every credential the refresher issues or drops.
	pub async fn resolve_credential<C>(
		&self,
		supplied: CredentialPayload,
		refresher: &CredentialRefresher<C>,
	) -> Option<Credential>
	where
		C: ?Sized + RelayHttpClient,
	{
		let event = match supplied {
			CredentialPayload::Present(credential)
				if self.credentials.current().as_ref() != Some(&credential) =>
				self.credentials.adopt(credential, refresher).await,
			CredentialPayload::Invalid(e) => {
				tracing::warn!(connection = %self.id(), error = %e, "ignoring malformed credential");

				self.credentials.refresh_if_expired(refresher).await
			},
			_ => self.credentials.refresh_if_expired(refresher).await,
		};

		if let Some(event) = event {
			self.connection.notify(event);
		}

		self.credentials.current()
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("id", self.id())
			.field("remote_addr", &self.remote_addr())
			.field("has_credential", &self.credentials.current().is_some())
			.finish()
	}
}

/// Live sessions keyed by connection identifier.
#[derive(Debug, Default)]
pub struct SessionRegistry {
	sessions: RwLock<HashMap<ConnectionId, Arc<Session>>>,
}
impl SessionRegistry {
	/// Returns the session for `connection`, creating it on first use.
	pub fn open(&self, connection: Arc<dyn Connection>) -> Arc<Session> {
		let id = connection.id().clone();

		if let Some(session) = self.sessions.read().get(&id) {
			return session.clone();
		}

		self.sessions.write().entry(id).or_insert_with(|| Arc::new(Session::new(connection))).clone()
	}

	/// Looks up a live session.
	pub fn get(&self, id: &str) -> Option<Arc<Session>> {
		self.sessions.read().get(id).cloned()
	}

	/// Drops the session for `id`, returning it if it was live.
	pub fn close(&self, id: &str) -> Option<Arc<Session>> {
		self.sessions.write().remove(id)
	}

	/// Number of live sessions.
	pub fn len(&self) -> usize {
		self.sessions.read().len()
	}

	/// Returns `true` when no session is live.
	pub fn is_empty(&self) -> bool {
		self.sessions.read().is_empty()
	}
}

//! Per-tenant session registry for long-lived protocol handlers.
//!
//! Each `(tenant, transport session)` pair owns at most one live [`SessionEntry`], built on
//! demand by a [`SessionFactory`]. An idle timer destroys the entry once it has gone unused
//! for the configured timeout; touching the entry rearms the timer. Transports report their
//! own close or failure through the [`SessionLifecycle`] handed to the factory.
//!
//! Timers capture the entry's generation and the slot's timer epoch. A firing timer compares
//! both against the live slot under the map lock before acting, so a timer that lost a race
//! with `touch`, `remove`, or a re-creation never destroys the wrong entry.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::{task::AbortHandle, time::Instant};
// self
use crate::{
	_prelude::*,
	auth::{SessionId, TenantId},
	gateway::{Gateway, TokenSource},
	obs,
};

/// Boxed future returned by session factories and transports.
pub type SessionFuture<'a, T, E = Error> = Pin<Box<dyn Future<Output = Result<T, E>> + 'a + Send>>;

/// Session handler and transport failures.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SessionError {
	/// The factory could not build a handler or transport.
	#[error("Session could not be created: {message}.")]
	Create {
		/// Factory-supplied reason.
		message: String,
	},
	/// The transport failed or refused to close.
	#[error("Session transport failed: {message}.")]
	Transport {
		/// Transport-supplied reason.
		message: String,
	},
}
impl SessionError {
	/// Builds a [`SessionError::Create`].
	pub fn create(message: impl Into<String>) -> Self {
		Self::Create { message: message.into() }
	}

	/// Builds a [`SessionError::Transport`].
	pub fn transport(message: impl Into<String>) -> Self {
		Self::Transport { message: message.into() }
	}
}

/// Transport side of a session (for example a streaming HTTP connection).
pub trait SessionTransport
where
	Self: 'static + Send + Sync,
{
	/// Closes the transport. Errors are logged and otherwise ignored by the registry.
	fn close(&self) -> SessionFuture<'_, (), SessionError>;
}

/// Builds the handler and transport for a new session.
pub trait SessionFactory
where
	Self: 'static + Send + Sync,
{
	/// Protocol handler serving the session.
	type Handler: 'static + Send + Sync;
	/// Transport carrying the session.
	type Transport: SessionTransport;

	/// Creates a handler + transport pair for `ctx`.
	///
	/// Returning [`Error::ReauthRequired`] lets the caller surface the re-authentication
	/// condition unchanged.
	fn create(&self, ctx: SessionContext) -> SessionFuture<'_, (Self::Handler, Self::Transport)>;
}

/// Everything a factory needs to wire up a new session.
#[derive(Clone, Debug)]
pub struct SessionContext {
	/// Tenant that owns the session.
	pub tenant: TenantId,
	/// Transport session identifier.
	pub session: SessionId,
	/// Non-caching token handle for the tenant.
	pub tokens: TokenSource,
	/// Callback handle for transport close/failure notifications.
	pub lifecycle: SessionLifecycle,
}

/// Registry key: one tenant, one transport session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
	/// Tenant component.
	pub tenant: TenantId,
	/// Transport session component.
	pub session: SessionId,
}
impl SessionKey {
	/// Creates a key.
	pub fn new(tenant: TenantId, session: SessionId) -> Self {
		Self { tenant, session }
	}
}
impl Display for SessionKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}/{}", self.tenant, self.session)
	}
}

/// Session lifecycle states. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	/// Built but not yet reused.
	Created,
	/// Reused at least once.
	Active,
	/// Destroyed; the registry no longer holds it.
	Closed,
}

/// Live session owned by the registry.
pub struct SessionEntry<H, T> {
	key: SessionKey,
	handler: H,
	transport: T,
	generation: u64,
	created_at: Instant,
	activity: Mutex<(Instant, SessionState)>,
}
impl<H, T> SessionEntry<H, T> {
	fn new(key: SessionKey, handler: H, transport: T, generation: u64) -> Self {
		let now = Instant::now();

		Self {
			key,
			handler,
			transport,
			generation,
			created_at: now,
			activity: Mutex::new((now, SessionState::Created)),
		}
	}

	/// Registry key.
	pub fn key(&self) -> &SessionKey {
		&self.key
	}

	/// Owning tenant.
	pub fn tenant(&self) -> &TenantId {
		&self.key.tenant
	}

	/// Transport session identifier.
	pub fn session_id(&self) -> &SessionId {
		&self.key.session
	}

	/// Protocol handler.
	pub fn handler(&self) -> &H {
		&self.handler
	}

	/// Transport.
	pub fn transport(&self) -> &T {
		&self.transport
	}

	/// Registry-wide unique identity; a re-created session always gets a new value.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Creation instant.
	pub fn created_at(&self) -> Instant {
		self.created_at
	}

	/// Last instant the session was used.
	pub fn last_activity(&self) -> Instant {
		self.activity.lock().0
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SessionState {
		self.activity.lock().1
	}

	/// Returns `true` once the entry was destroyed.
	pub fn is_closed(&self) -> bool {
		self.state() == SessionState::Closed
	}

	fn mark_active(&self, now: Instant) -> bool {
		let mut activity = self.activity.lock();

		if activity.1 == SessionState::Closed {
			return false;
		}

		*activity = (now, SessionState::Active);

		true
	}

	fn mark_closed(&self) -> bool {
		let mut activity = self.activity.lock();
		let was_open = activity.1 != SessionState::Closed;

		activity.1 = SessionState::Closed;

		was_open
	}
}
impl<H, T> SessionEntry<H, T>
where
	T: SessionTransport,
{
	async fn close_transport(&self) {
		if let Err(err) = self.transport.close().await {
			obs::event!(warn, session = %self.key, error = %err, "Session transport close failed.");
		}
	}
}
impl<H, T> Debug for SessionEntry<H, T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let (last_activity, state) = *self.activity.lock();

		f.debug_struct("SessionEntry")
			.field("key", &self.key)
			.field("generation", &self.generation)
			.field("created_at", &self.created_at)
			.field("last_activity", &last_activity)
			.field("state", &state)
			.finish()
	}
}

/// Aggregate view over live sessions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
	/// Live sessions.
	pub active: usize,
	/// Age of the oldest live session.
	pub oldest_age: Option<std::time::Duration>,
}

/// Callback handle transports use to report that they closed or failed.
#[derive(Clone)]
pub struct SessionLifecycle {
	key: SessionKey,
	generation: u64,
	registry: Weak<dyn Detach>,
}
impl SessionLifecycle {
	/// Reports an orderly transport close. Returns `true` if the session was still live.
	pub async fn closed(&self) -> bool {
		self.detach("transport closed").await
	}

	/// Reports a transport failure. Returns `true` if the session was still live.
	pub async fn failed(&self, reason: impl Display) -> bool {
		self.detach(&reason.to_string()).await
	}

	async fn detach(&self, reason: &str) -> bool {
		match self.registry.upgrade() {
			Some(registry) => registry.detach(&self.key, self.generation, reason).await,
			None => false,
		}
	}
}
impl Debug for SessionLifecycle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionLifecycle")
			.field("key", &self.key)
			.field("generation", &self.generation)
			.finish()
	}
}

// Object-safe view of the registry used by lifecycle handles.
trait Detach
where
	Self: Send + Sync,
{
	fn detach<'a>(
		&'a self,
		key: &'a SessionKey,
		generation: u64,
		reason: &'a str,
	) -> Pin<Box<dyn Future<Output = bool> + 'a + Send>>;
}

/// Entry type produced by a given factory.
pub type EntryOf<F> =
	SessionEntry<<F as SessionFactory>::Handler, <F as SessionFactory>::Transport>;

struct Slot<F>
where
	F: SessionFactory,
{
	entry: Arc<EntryOf<F>>,
	timer: AbortHandle,
	epoch: u64,
}

struct RegistryInner<F>
where
	F: SessionFactory,
{
	factory: F,
	gateway: Gateway,
	idle_timeout: std::time::Duration,
	generations: AtomicU64,
	slots: Mutex<HashMap<SessionKey, Slot<F>>>,
}
impl<F> RegistryInner<F>
where
	F: SessionFactory,
{
	fn arm(self: &Arc<Self>, key: SessionKey, generation: u64, epoch: u64) -> AbortHandle {
		let registry = Arc::downgrade(self);
		let deadline = Instant::now() + self.idle_timeout;

		tokio::spawn(async move {
			tokio::time::sleep_until(deadline).await;

			if let Some(registry) = registry.upgrade() {
				registry.expire(&key, generation, epoch).await;
			}
		})
		.abort_handle()
	}

	async fn expire(&self, key: &SessionKey, generation: u64, epoch: u64) {
		let expired = {
			let mut slots = self.slots.lock();
			let current = slots
				.get(key)
				.is_some_and(|slot| slot.entry.generation == generation && slot.epoch == epoch);

			if current { slots.remove(key) } else { None }
		};

		if let Some(slot) = expired {
			obs::event!(info, session = %key, "Session idle timeout reached.");

			self.finish(slot.entry, true).await;
		}
	}

	fn take(&self, key: &SessionKey, generation: Option<u64>) -> Option<Slot<F>> {
		let mut slots = self.slots.lock();
		let matches = slots
			.get(key)
			.is_some_and(|slot| generation.is_none_or(|generation| slot.entry.generation == generation));

		if matches { slots.remove(key) } else { None }
	}

	async fn finish(&self, entry: Arc<EntryOf<F>>, close_transport: bool) {
		if entry.mark_closed() && close_transport {
			entry.close_transport().await;
		}

		obs::record_sessions_active(self.slots.lock().len());
	}
}
impl<F> Detach for RegistryInner<F>
where
	F: SessionFactory,
{
	fn detach<'a>(
		&'a self,
		key: &'a SessionKey,
		generation: u64,
		reason: &'a str,
	) -> Pin<Box<dyn Future<Output = bool> + 'a + Send>> {
		Box::pin(async move {
			let Some(slot) = self.take(key, Some(generation)) else {
				return false;
			};

			slot.timer.abort();

			obs::event!(info, session = %key, reason, "Session transport ended.");

			self.finish(slot.entry, false).await;

			true
		})
	}
}

/// Registry of live sessions keyed by `(tenant, transport session)`.
///
/// Cloning the registry yields another handle to the same sessions. Must be used inside a
/// tokio runtime because idle timers are tokio tasks.
pub struct SessionRegistry<F>
where
	F: SessionFactory,
{
	inner: Arc<RegistryInner<F>>,
}
impl<F> SessionRegistry<F>
where
	F: SessionFactory,
{
	/// Creates a registry whose sessions draw tokens from `gateway` and expire after the
	/// gateway's configured idle timeout.
	pub fn new(factory: F, gateway: Gateway) -> Self {
		let idle_timeout = gateway.config().idle_timeout;

		Self::with_idle_timeout(factory, gateway, idle_timeout)
	}

	/// Creates a registry with an explicit idle timeout.
	pub fn with_idle_timeout(factory: F, gateway: Gateway, idle_timeout: Duration) -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				factory,
				gateway,
				idle_timeout: idle_timeout.unsigned_abs(),
				generations: AtomicU64::new(0),
				slots: Default::default(),
			}),
		}
	}

	/// Returns the live entry for the key (touching it), or builds a new one.
	pub async fn get_or_create(
		&self,
		tenant: &TenantId,
		session: &SessionId,
	) -> Result<Arc<EntryOf<F>>> {
		let key = SessionKey::new(tenant.clone(), session.clone());

		if let Some(entry) = self.live(&key) {
			self.touch(&entry);

			return Ok(entry);
		}

		let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
		let registry = Arc::downgrade(&self.inner) as Weak<dyn Detach>;
		let ctx = SessionContext {
			tenant: tenant.clone(),
			session: session.clone(),
			tokens: self.inner.gateway.token_source(tenant),
			lifecycle: SessionLifecycle { key: key.clone(), generation, registry },
		};
		let (handler, transport) = self.inner.factory.create(ctx).await?;
		let entry = Arc::new(SessionEntry::new(key.clone(), handler, transport, generation));
		let existing = {
			let mut slots = self.inner.slots.lock();

			match slots.get(&key) {
				Some(slot) => Some(slot.entry.clone()),
				None => {
					let timer = self.inner.arm(key.clone(), generation, 0);

					slots.insert(key.clone(), Slot { entry: entry.clone(), timer, epoch: 0 });

					None
				},
			}
		};

		// Another caller created the session first; keep theirs.
		if let Some(existing) = existing {
			entry.mark_closed();
			entry.close_transport().await;
			self.touch(&existing);

			return Ok(existing);
		}

		obs::event!(info, session = %key, generation, "Session created.");
		obs::record_sessions_active(self.len());

		Ok(entry)
	}

	/// Looks up a live entry without touching it.
	pub fn get(&self, tenant: &TenantId, session: &SessionId) -> Result<Arc<EntryOf<F>>> {
		let key = SessionKey::new(tenant.clone(), session.clone());

		self.live(&key).ok_or_else(|| Error::SessionNotFound {
			tenant: tenant.clone(),
			session: session.clone(),
		})
	}

	/// Records activity and rearms the idle timer. Closed or replaced entries are ignored.
	pub fn touch(&self, entry: &EntryOf<F>) {
		let mut slots = self.inner.slots.lock();
		let Some(slot) = slots.get_mut(&entry.key) else {
			return;
		};

		if slot.entry.generation != entry.generation || !entry.mark_active(Instant::now()) {
			return;
		}

		slot.timer.abort();
		slot.epoch += 1;
		slot.timer = self.inner.arm(entry.key.clone(), entry.generation, slot.epoch);
	}

	/// Destroys the session for the key. Returns `false` if none was live.
	pub async fn remove(&self, tenant: &TenantId, session: &SessionId) -> bool {
		let key = SessionKey::new(tenant.clone(), session.clone());
		let Some(slot) = self.inner.take(&key, None) else {
			return false;
		};

		slot.timer.abort();
		self.inner.finish(slot.entry, true).await;

		true
	}

	/// Destroys every session of `tenant`, returning how many were live.
	pub async fn remove_tenant(&self, tenant: &TenantId) -> usize {
		let removed = {
			let mut slots = self.inner.slots.lock();
			let keys = slots.keys().filter(|key| &key.tenant == tenant).cloned().collect::<Vec<_>>();

			keys.into_iter().filter_map(|key| slots.remove(&key)).collect::<Vec<_>>()
		};

		self.finish_all(removed).await
	}

	/// Destroys every session.
	pub async fn shutdown(&self) -> usize {
		let removed = self.inner.slots.lock().drain().map(|(_, slot)| slot).collect::<Vec<_>>();

		self.finish_all(removed).await
	}

	/// Number of live sessions.
	pub fn len(&self) -> usize {
		self.inner.slots.lock().len()
	}

	/// Returns `true` when no session is live.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Live session count and the age of the oldest one.
	pub fn stats(&self) -> SessionStats {
		let slots = self.inner.slots.lock();
		let now = Instant::now();

		SessionStats {
			active: slots.len(),
			oldest_age: slots
				.values()
				.map(|slot| now.saturating_duration_since(slot.entry.created_at))
				.max(),
		}
	}

	fn live(&self, key: &SessionKey) -> Option<Arc<EntryOf<F>>> {
		self.inner.slots.lock().get(key).map(|slot| slot.entry.clone())
	}

	async fn finish_all(&self, removed: Vec<Slot<F>>) -> usize {
		let count = removed.len();

		for slot in removed {
			slot.timer.abort();
			self.inner.finish(slot.entry, true).await;
		}

		count
	}
}
impl<F> Clone for SessionRegistry<F>
where
	F: SessionFactory,
{
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<F> Debug for SessionRegistry<F>
where
	F: SessionFactory,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionRegistry")
			.field("idle_timeout", &self.inner.idle_timeout)
			.field("sessions", &self.len())
			.finish()
	}
}

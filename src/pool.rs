//! Idle and busy sessions, keyed by endpoint.
//!
//! Every tracked session is in exactly one of two collections: `idle`
//! (owned by the pool, ready for reuse) or `busy` (lent out through a
//! [`PooledSession`]). Retired sessions are in neither and are closed.
//! Concurrent callers never queue: when no idle session is usable for an
//! endpoint, a new one is connected.
//!
//! Idle sessions are checked without waiting whenever the pool is consulted
//! (acquire, release, stats). One whose peer closed, failed or sent
//! unsolicited bytes is retired on the spot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::WireVariant;
use crate::reply::RawReply;
use crate::transport::session::{Session, SessionPhase};
use crate::transport::Connector;

/// Point-in-time view of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Sessions waiting for reuse
    pub idle: usize,
    /// Sessions carrying a request
    pub busy: usize,
    /// Transports opened since creation
    pub connects: u64,
    /// Idle sessions handed out again
    pub reuses: u64,
    /// Sessions closed since creation
    pub retired: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    connects: AtomicU64,
    reuses: AtomicU64,
    retired: AtomicU64,
}

impl PoolCounters {
    #[inline]
    fn inc_connects(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn inc_reuses(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn inc_retired(&self) {
        self.retired.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct PoolState {
    idle: HashMap<Endpoint, Vec<Session>>,
    busy: HashMap<u64, Endpoint>,
}

/// Session pool shared by one or more connections
#[derive(Debug, Default)]
pub struct Pool {
    state: Mutex<PoolState>,
    counters: PoolCounters,
    max_idle_per_endpoint: Option<usize>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool keeping at most `max_idle` idle sessions per endpoint; surplus
    /// released sessions are closed.
    pub fn with_max_idle(max_idle: Option<usize>) -> Self {
        Self {
            max_idle_per_endpoint: max_idle,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lend out a session for `endpoint`: the most recently released healthy
    /// idle one if available, otherwise a newly connected one.
    ///
    /// A connect failure is returned as is; the failed session never enters
    /// the pool.
    pub async fn acquire(
        self: &Arc<Self>,
        endpoint: &Endpoint,
        connector: &Connector,
    ) -> Result<PooledSession> {
        if let Some(session) = self.checkout_idle(endpoint) {
            self.counters.inc_reuses();
            let lent = PooledSession::new(Arc::clone(self), session, true);
            debug!(
                session = lent.id(),
                endpoint = %endpoint,
                busy = self.stats().busy,
                "reusing idle session"
            );
            return Ok(lent);
        }

        let session = connector.connect(endpoint).await?;
        self.counters.inc_connects();
        let lent = self.track(session);
        info!(
            session = lent.id(),
            endpoint = %endpoint,
            busy = self.stats().busy,
            "new session"
        );
        Ok(lent)
    }

    /// Pop the most recently released healthy idle session for `endpoint`,
    /// marking it busy.
    fn checkout_idle(&self, endpoint: &Endpoint) -> Option<Session> {
        let mut guard = self.lock();
        let state = &mut *guard;
        self.prune_idle(state);
        let idle = state.idle.get_mut(endpoint)?;
        let mut session = idle.pop()?;
        if idle.is_empty() {
            state.idle.remove(endpoint);
        }
        session.set_phase(SessionPhase::Busy);
        state.busy.insert(session.id(), endpoint.clone());
        Some(session)
    }

    /// Start tracking a freshly connected session as busy.
    pub(crate) fn track(self: &Arc<Self>, mut session: Session) -> PooledSession {
        session.set_phase(SessionPhase::Busy);
        self.lock()
            .busy
            .insert(session.id(), session.endpoint().clone());
        PooledSession::new(Arc::clone(self), session, false)
    }

    /// Move a session from busy back to idle after a successful response.
    ///
    /// HTTP sessions asked the server to close and are retired instead.
    fn release(&self, mut session: Session) {
        if session.variant() == WireVariant::Http {
            self.retire(session);
            return;
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        state.busy.remove(&session.id());
        self.prune_idle(state);
        let idle = state.idle.entry(session.endpoint().clone()).or_default();
        if self.max_idle_per_endpoint.is_some_and(|max| idle.len() >= max) {
            drop(guard);
            debug!(session = session.id(), "idle limit reached");
            session.close();
            self.counters.inc_retired();
            return;
        }
        session.set_phase(SessionPhase::Idle);
        idle.push(session);
    }

    /// Retire every idle session whose peer went away, failed or sent
    /// unsolicited bytes.
    fn prune_idle(&self, state: &mut PoolState) {
        for sessions in state.idle.values_mut() {
            sessions.retain_mut(|session| {
                if session.is_reusable() {
                    return true;
                }
                session.close();
                self.counters.inc_retired();
                false
            });
        }
        state.idle.retain(|_, sessions| !sessions.is_empty());
    }

    /// Forget a session and close its transport.
    fn retire(&self, mut session: Session) {
        self.lock().busy.remove(&session.id());
        session.close();
        self.counters.inc_retired();
    }

    /// Close every idle session.
    pub fn close_idle(&self) {
        let drained: Vec<Session> = {
            let mut state = self.lock();
            state.idle.drain().flat_map(|(_, sessions)| sessions).collect()
        };
        for mut session in drained {
            session.close();
            self.counters.inc_retired();
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut state = self.lock();
        self.prune_idle(&mut state);
        PoolStats {
            idle: state.idle.values().map(Vec::len).sum(),
            busy: state.busy.len(),
            connects: self.counters.connects.load(Ordering::Relaxed),
            reuses: self.counters.reuses.load(Ordering::Relaxed),
            retired: self.counters.retired.load(Ordering::Relaxed),
        }
    }

    /// Idle sessions currently held for `endpoint`.
    pub fn idle_count(&self, endpoint: &Endpoint) -> usize {
        let mut state = self.lock();
        self.prune_idle(&mut state);
        state.idle.get(endpoint).map_or(0, Vec::len)
    }
}

/// A busy session lent out by a [`Pool`].
///
/// Hand it back with [`release`](Self::release) after a successful response.
/// Dropping it any other way (error, caller deadline, cancelled future)
/// retires the session.
#[derive(Debug)]
pub struct PooledSession {
    pool: Arc<Pool>,
    session: Option<Session>,
    reused: bool,
}

impl PooledSession {
    fn new(pool: Arc<Pool>, session: Session, reused: bool) -> Self {
        Self {
            pool,
            session: Some(session),
            reused,
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Connection("session already returned to the pool".to_string()))
    }

    pub fn id(&self) -> u64 {
        self.session.as_ref().map_or(0, Session::id)
    }

    /// Whether this session served an earlier request
    pub fn reused(&self) -> bool {
        self.reused
    }

    /// Send one request and wait for its response.
    pub async fn round_trip(&mut self, payload: &[u8], storage: &str) -> Result<RawReply> {
        self.session()?.round_trip(payload, storage).await
    }

    /// Return the session for reuse.
    pub fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }

    /// Close the session now.
    pub fn retire(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.retire(session);
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.retire(session);
        }
    }
}

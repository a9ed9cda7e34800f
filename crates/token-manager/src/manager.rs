//! Access token lifecycle manager
//!
//! Owns the current `TokenState`, keeps at most one refresh scheduled or in
//! flight, and serves `access_token()` to any number of concurrent callers.
//!
//! Locking:
//! - `current` is an `RwLock<Option<Arc<TokenState>>>`. The write lock is only
//!   taken to swap the pointer, so the cache-hit path never waits on I/O.
//! - `control` is a std `Mutex` guarding the session and the pending refresh.
//!   It is never held across an `.await`.
//!
//! Every `start()` opens a new epoch and every scheduled refresh gets an id.
//! A refresh that completes after its epoch ended or after it was superseded
//! is discarded, which is what lets `close()` and `start()` return without
//! waiting for an exchange that is already on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use common::Secret;
use tidepool_auth::{ClientConfig, Grant, TokenClient, TokenState};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{CloseReason, ManagerStatus, TokenEvent};
use crate::metrics;
use crate::policy::{self, FailurePolicy};
use crate::schedule::{ScheduledTask, Scheduler, TokioScheduler};

/// A pending refresh due within this window is joined rather than replaced.
pub const DEFAULT_IMMINENT_WINDOW: Duration = Duration::from_millis(500);

/// Upper bound on how long `access_token()` waits for a refresh.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub imminent_window: Duration,
    pub wait_timeout: Duration,
    pub failure_policy: FailurePolicy,
    /// Buffered events per subscriber before slow subscribers start lagging.
    pub event_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            imminent_window: DEFAULT_IMMINENT_WINDOW,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            failure_policy: FailurePolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Result of one refresh as seen by waiters; `None` until it completes.
type Outcome = Option<Result<Arc<TokenState>>>;

/// Cloneable handle to a token manager.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    current: RwLock<Option<Arc<TokenState>>>,
    control: Mutex<Control>,
    /// Milliseconds since `origin` of the latest `access_token()` call.
    last_access_ms: AtomicU64,
    origin: Instant,
    client: Arc<dyn TokenClient>,
    scheduler: Arc<dyn Scheduler>,
    options: ManagerOptions,
    events: broadcast::Sender<TokenEvent>,
}

#[derive(Default)]
struct Control {
    last_epoch: u64,
    last_refresh_id: u64,
    /// Why the last session ended, while no new one has started.
    closed: Option<CloseReason>,
    session: Option<Session>,
}

impl Control {
    fn issue_refresh_id(&mut self) -> u64 {
        self.last_refresh_id += 1;
        self.last_refresh_id
    }
}

/// Everything established by one `start()`.
struct Session {
    epoch: u64,
    config: Arc<ClientConfig>,
    refresh_token: Secret<String>,
    /// Unknown until the first successful exchange.
    refresh_expiry: Option<Instant>,
    consecutive_failures: u32,
    pending: Option<PendingRefresh>,
}

impl Session {
    fn refresh_expired(&self, now: Instant) -> bool {
        self.refresh_expiry.is_some_and(|expiry| now >= expiry)
    }
}

struct PendingRefresh {
    id: u64,
    /// `None` when the delay does not fit on the clock.
    due: Option<Instant>,
    in_flight: bool,
    task: Box<dyn ScheduledTask>,
    done: watch::Sender<Outcome>,
}

impl PendingRefresh {
    fn is_imminent(&self, now: Instant, window: Duration) -> bool {
        match (self.due, now.checked_add(window)) {
            (Some(due), Some(limit)) => due <= limit,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

enum Join {
    Ready(String),
    Wait(watch::Receiver<Outcome>),
}

enum Begin {
    Stale,
    Expired,
    Exchange(Arc<ClientConfig>, Grant),
}

impl TokenManager {
    pub fn new(
        client: Arc<dyn TokenClient>,
        scheduler: Arc<dyn Scheduler>,
        options: ManagerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                current: RwLock::new(None),
                control: Mutex::new(Control::default()),
                last_access_ms: AtomicU64::new(0),
                origin: Instant::now(),
                client,
                scheduler,
                options,
                events,
            }),
        }
    }

    /// Manager scheduling on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_tokio(client: Arc<dyn TokenClient>, options: ManagerOptions) -> Self {
        Self::new(client, Arc::new(TokioScheduler::current()), options)
    }

    /// Begin managing tokens for `config`, seeded with `refresh_token`.
    ///
    /// Any previous session is discarded without waiting for it: its
    /// scheduled refresh is cancelled and an exchange already in flight will
    /// have its result ignored. Callers already waiting are carried over to
    /// the new session's first refresh.
    pub fn start(&self, config: ClientConfig, refresh_token: impl Into<Secret<String>>) {
        let inner = &self.inner;
        let now = Instant::now();
        let mut control = inner.lock_control();

        let waiters = control
            .session
            .take()
            .and_then(|old| old.pending)
            .and_then(|pending| {
                pending.task.cancel();
                let unresolved = pending.done.borrow().is_none();
                unresolved.then_some(pending.done)
            });

        control.last_epoch += 1;
        control.closed = None;
        let epoch = control.last_epoch;
        let id = control.issue_refresh_id();

        inner.swap_current(None);
        inner.touch(now);

        info!(
            epoch,
            environment = %config.environment(),
            client_id = config.client_id(),
            "token manager started"
        );

        let mut session = Session {
            epoch,
            config: Arc::new(config),
            refresh_token: refresh_token.into(),
            refresh_expiry: None,
            consecutive_failures: 0,
            pending: None,
        };
        inner.schedule_refresh(&mut session, id, Duration::ZERO, waiters);
        control.session = Some(session);
        inner.emit(TokenEvent::Started { epoch });
    }

    /// A currently valid access token.
    ///
    /// Returns the cached token without blocking when it has not expired.
    /// Otherwise joins the pending refresh (or triggers one) and waits up to
    /// `wait_timeout` for it.
    pub async fn access_token(&self) -> Result<String> {
        let inner = &self.inner;
        let now = Instant::now();
        inner.touch(now);

        if let Some(state) = inner.current()
            && state.is_access_valid(now)
        {
            return Ok(state.access_token().expose_owned());
        }

        let mut done = match inner.join_refresh(now)? {
            Join::Ready(token) => return Ok(token),
            Join::Wait(done) => done,
        };

        let wait = inner.options.wait_timeout;
        let outcome = match tokio::time::timeout(wait, done.wait_for(Option::is_some)).await {
            Err(_) => {
                metrics::record_wait("timeout");
                warn!(wait_secs = wait.as_secs_f64(), "timed out waiting for token refresh");
                return Err(Error::Timeout(wait));
            }
            // Sender dropped without an outcome: closed or restarted while waiting
            Ok(Err(_)) => {
                metrics::record_wait("closed");
                return Err(Error::NotStarted);
            }
            Ok(Ok(outcome)) => outcome.clone(),
        };

        match outcome {
            Some(Ok(state)) => {
                metrics::record_wait("ok");
                Ok(state.access_token().expose_owned())
            }
            Some(Err(e)) => {
                metrics::record_wait("error");
                Err(e)
            }
            None => Err(Error::NotStarted),
        }
    }

    /// Cancel pending work and drop all state. Waiting callers fail with
    /// `NotStarted`, as does every later `access_token()` until `start()`.
    pub fn close(&self) {
        let mut control = self.inner.lock_control();
        self.inner.close_locked(&mut control, CloseReason::Requested);
    }

    pub fn status(&self) -> ManagerStatus {
        let control = self.inner.lock_control();
        match &control.session {
            None if control.closed.is_some() => ManagerStatus::Closed,
            None => ManagerStatus::Unstarted,
            Some(_) => match self.inner.current() {
                Some(state) if state.is_access_valid(Instant::now()) => ManagerStatus::Valid,
                _ => ManagerStatus::Refreshing,
            },
        }
    }

    /// Why the manager closed, if it is closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.lock_control().closed
    }

    /// The cached token pair, valid or not.
    pub fn snapshot(&self) -> Option<Arc<TokenState>> {
        self.inner.current()
    }

    /// Receive lifecycle events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<TokenState>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap_current(&self, next: Option<Arc<TokenState>>) {
        metrics::set_token_cached(next.is_some());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn touch(&self, now: Instant) {
        let millis = now.saturating_duration_since(self.origin).as_millis();
        self.last_access_ms
            .fetch_max(u64::try_from(millis).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = self.origin + Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }

    fn emit(&self, event: TokenEvent) {
        // Err only means nobody is subscribed
        let _ = self.events.send(event);
    }

    /// Slow path of `access_token()`: the cached token is missing or expired.
    fn join_refresh(self: &Arc<Self>, now: Instant) -> Result<Join> {
        let mut control = self.lock_control();
        let id = control.issue_refresh_id();
        let Some(session) = control.session.as_mut() else {
            return Err(Error::NotStarted);
        };

        if session.refresh_expired(now) {
            warn!(epoch = session.epoch, "refresh token expired, closing token manager");
            self.close_locked(&mut control, CloseReason::RefreshTokenExpired);
            return Err(Error::RefreshTokenExpired);
        }

        // A refresh may have landed between the caller's cache check and the lock
        if let Some(state) = self.current()
            && state.is_access_valid(now)
        {
            return Ok(Join::Ready(state.access_token().expose_owned()));
        }

        if let Some(pending) = &session.pending
            && (pending.in_flight || pending.is_imminent(now, self.options.imminent_window))
        {
            return Ok(Join::Wait(pending.done.subscribe()));
        }

        let waiters = session.pending.take().map(|pending| {
            pending.task.cancel();
            pending.done
        });
        debug!(epoch = session.epoch, "access token expired, refreshing now");
        Ok(Join::Wait(self.schedule_refresh(
            session,
            id,
            Duration::ZERO,
            waiters,
        )))
    }

    /// Install a new pending refresh on `session`, replacing any existing one.
    fn schedule_refresh(
        self: &Arc<Self>,
        session: &mut Session,
        id: u64,
        delay: Duration,
        waiters: Option<watch::Sender<Outcome>>,
    ) -> watch::Receiver<Outcome> {
        let done = waiters.unwrap_or_else(|| watch::channel(None).0);
        let receiver = done.subscribe();
        let epoch = session.epoch;
        let weak = Arc::downgrade(self);
        let task = self.scheduler.schedule_once(
            delay,
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.run_refresh(epoch, id).await;
                }
            }),
        );
        session.pending = Some(PendingRefresh {
            id,
            due: Instant::now().checked_add(delay),
            in_flight: false,
            task,
            done,
        });
        receiver
    }

    async fn run_refresh(self: Arc<Self>, epoch: u64, id: u64) {
        let begin = {
            let mut control = self.lock_control();
            let now = Instant::now();
            match control.session.as_mut() {
                Some(session) if session.epoch == epoch => {
                    let expired = session.refresh_expired(now);
                    match session.pending.as_mut() {
                        Some(pending) if pending.id == id => {
                            if expired {
                                Begin::Expired
                            } else {
                                pending.in_flight = true;
                                Begin::Exchange(
                                    session.config.clone(),
                                    Grant::refresh(session.refresh_token.clone()),
                                )
                            }
                        }
                        _ => Begin::Stale,
                    }
                }
                _ => Begin::Stale,
            }
        };

        let result = match begin {
            Begin::Stale => {
                debug!(epoch, refresh_id = id, "skipping superseded refresh");
                return;
            }
            Begin::Expired => Err(Error::RefreshTokenExpired),
            Begin::Exchange(config, grant) => {
                debug!(epoch, refresh_id = id, "refreshing access token");
                self.client
                    .exchange(&config, &grant)
                    .await
                    .map_err(Error::from)
            }
        };

        let mut control = self.lock_control();
        self.complete(&mut control, epoch, id, result);
    }

    fn complete(
        self: &Arc<Self>,
        control: &mut Control,
        epoch: u64,
        id: u64,
        result: Result<TokenState>,
    ) {
        let now = Instant::now();
        let next_id = control.issue_refresh_id();
        let Some(session) = control.session.as_mut().filter(|s| s.epoch == epoch) else {
            debug!(epoch, refresh_id = id, "discarding refresh result from ended session");
            metrics::record_refresh("stale");
            return;
        };
        let Some(pending) = session.pending.take_if(|p| p.id == id) else {
            debug!(epoch, refresh_id = id, "discarding superseded refresh result");
            metrics::record_refresh("stale");
            return;
        };

        let close = match result {
            Ok(state) => {
                let state = Arc::new(state);
                session.refresh_token = state.refresh_token().clone();
                session.refresh_expiry = Some(state.refresh_token_expiry());
                session.consecutive_failures = 0;
                self.swap_current(Some(state.clone()));

                let idle = self.idle_for(now);
                let delay =
                    policy::next_refresh_delay(state.expires_in(), state.refresh_expires_in(), idle);
                pending.done.send_replace(Some(Ok(state.clone())));
                self.schedule_refresh(session, next_id, delay, None);

                info!(
                    epoch,
                    expires_in_secs = state.expires_in().as_secs(),
                    refresh_expires_in_secs = state.refresh_expires_in().as_secs(),
                    idle_secs = idle.as_secs(),
                    next_refresh_secs = delay.as_secs(),
                    "access token refreshed"
                );
                metrics::record_refresh("ok");
                self.emit(TokenEvent::Refreshed {
                    epoch,
                    expires_in: state.expires_in(),
                    next_refresh_in: delay,
                });
                None
            }
            Err(error) => {
                session.consecutive_failures += 1;
                pending.done.send_replace(Some(Err(error.clone())));

                let refresh_expiry = session.refresh_expiry;
                let retry_in = self
                    .options
                    .failure_policy
                    .retry_delay(&error, session.consecutive_failures)
                    .filter(|delay| {
                        refresh_expiry.is_none_or(|expiry| {
                            now.checked_add(*delay).is_some_and(|retry_at| retry_at < expiry)
                        })
                    });

                metrics::record_refresh(error.label());
                self.emit(TokenEvent::RefreshFailed {
                    epoch,
                    error: error.clone(),
                    retry_in,
                });

                match retry_in {
                    Some(delay) => {
                        warn!(
                            epoch,
                            error = %error,
                            attempt = session.consecutive_failures,
                            retry_secs = delay.as_secs_f64(),
                            "token refresh failed, will retry"
                        );
                        self.schedule_refresh(session, next_id, delay, None);
                        None
                    }
                    None => {
                        warn!(epoch, error = %error, "token refresh failed, closing token manager");
                        Some(if error == Error::RefreshTokenExpired {
                            CloseReason::RefreshTokenExpired
                        } else {
                            CloseReason::RefreshFailed
                        })
                    }
                }
            }
        };

        if let Some(reason) = close {
            self.close_locked(control, reason);
        }
    }

    fn close_locked(&self, control: &mut Control, reason: CloseReason) {
        let Some(session) = control.session.take() else {
            return;
        };
        if let Some(pending) = session.pending {
            pending.task.cancel();
        }
        control.closed = Some(reason);
        self.swap_current(None);
        info!(epoch = session.epoch, reason = reason.label(), "token manager closed");
        self.emit(TokenEvent::Closed {
            epoch: session.epoch,
            reason,
        });
    }
}

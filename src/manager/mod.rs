//! Reconnection state machine for a persistent gateway-style session.
//!
//! A [`ConnectionManager`] does not open sockets itself. Instead, it repeatedly
//! drives a caller-supplied [`Connector`] through connect attempts, waiting out
//! an exponential backoff between failures, until it is told to stop or sees a
//! failure which retrying cannot fix.
//!
//! Each manager has two cancellation scopes:
//!  * the *reconnect* scope, covering the whole retry loop, cancelled by
//!    [`stop`], [`cancel`], and [`critical_error`];
//!  * the *attempt* scope, covering one connect/run cycle, cancelled by
//!    [`error`] and [`reconnect`] as well.
//!
//! The token handed to [`Connector::on_connecting`] is cancelled when either
//! scope is.
//!
//! [`stop`]: ConnectionManager::stop
//! [`cancel`]: ConnectionManager::cancel
//! [`critical_error`]: ConnectionManager::critical_error
//! [`error`]: ConnectionManager::error
//! [`reconnect`]: ConnectionManager::reconnect

pub mod close;
mod error;
mod promise;
pub mod retry;

pub use self::error::{Error, Result};

use self::{close::TransportClosed, promise::Promise, retry::Backoff};
use crate::{
    error::BoxError,
    events::{Handler, Subscribers},
    Config,
    ConnectionState,
};
use async_trait::async_trait;
use derivative::Derivative;
use parking_lot::{Mutex, RwLock};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    select,
    spawn,
    sync::{OwnedSemaphorePermit, Semaphore},
    task::yield_now,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};

/// Caller-supplied behaviour performing the protocol work of a session.
///
/// The manager calls [`on_connecting`] at the start of each attempt, and
/// [`on_disconnecting`] once that attempt has ended.
///
/// [`on_connecting`]: Connector::on_connecting
/// [`on_disconnecting`]: Connector::on_disconnecting
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens and authenticates a connection.
    ///
    /// Implementations will typically end by awaiting [`ConnectionManager::wait`],
    /// so that the attempt is only counted as connected once the remote host is
    /// ready. `token` is cancelled if this attempt is abandoned, after which this
    /// future is dropped.
    async fn on_connecting(
        &self,
        manager: &ConnectionManager,
        token: CancellationToken,
    ) -> std::result::Result<(), BoxError>;

    /// Releases any resources held by the attempt which just ended with `error`.
    async fn on_disconnecting(
        &self,
        manager: &ConnectionManager,
        error: &Error,
    ) -> std::result::Result<(), BoxError>;
}

/// Notification that an attempt ended.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct DisconnectEvent {
    /// The failure or cancellation which ended the attempt.
    pub error: Error,
    /// Whether the manager will make another attempt after this one.
    pub is_reconnecting: bool,
}

/// Drives reconnect attempts against a single logical endpoint.
///
/// This is a cheap handle: clones control the same session.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct Inner {
    config: Config,
    #[derivative(Debug = "ignore")]
    connector: Arc<dyn Connector>,
    state: RwLock<ConnectionState>,
    lifecycle: Arc<Semaphore>,
    attempt: Mutex<Attempt>,
    connected: Subscribers<()>,
    disconnected: Subscribers<DisconnectEvent>,
}

/// Signals belonging to the most recent reconnect loop and attempt.
#[derive(Debug, Default)]
struct Attempt {
    reconnect: Option<CancellationToken>,
    connection: Option<CancellationToken>,
    ready: Option<Promise>,
    connection_promise: Option<Promise>,
}

impl Attempt {
    fn settle(&self, outcome: &Option<Error>) {
        for promise in [&self.ready, &self.connection_promise].into_iter().flatten() {
            match outcome {
                Some(e) => promise.try_reject(e.clone()),
                None => promise.try_cancel(),
            };
        }
    }
}

impl ConnectionManager {
    /// Creates a new, stopped manager.
    ///
    /// `register_close` is called once, before this returns, with a handle the
    /// owner should fire whenever its transport closes unexpectedly.
    pub fn new<F>(config: Config, connector: Arc<dyn Connector>, register_close: F) -> Self
    where
        F: FnOnce(CloseHandler),
    {
        let manager = Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state: RwLock::new(ConnectionState::Disconnected),
                lifecycle: Arc::new(Semaphore::new(1)),
                attempt: Mutex::new(Attempt::default()),
                connected: Subscribers::new(),
                disconnected: Subscribers::new(),
            }),
        };

        register_close(manager.close_handler());

        manager
    }

    /// Returns the current stage of the session's lifecycle.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Returns the configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Adds a handler fired each time an attempt becomes connected.
    ///
    /// If any handler fails, the attempt fails with [`Error::Handlers`].
    pub fn on_connected<H: Handler<()> + 'static>(&self, handler: H) {
        self.inner.connected.add(handler);
    }

    /// Adds a handler fired each time an attempt ends.
    pub fn on_disconnected<H: Handler<DisconnectEvent> + 'static>(&self, handler: H) {
        self.inner.disconnected.add(handler);
    }

    /// Returns a handle which classifies and reports transport closures.
    #[must_use]
    pub fn close_handler(&self) -> CloseHandler {
        CloseHandler {
            manager: self.downgrade(),
        }
    }

    /// Creates a handle which does not keep this manager alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Starts the reconnect loop in the background.
    ///
    /// Any previous loop is first stopped, and this waits until it has released
    /// the session. This returns once the new loop has been scheduled, not once
    /// it has connected.
    ///
    /// Fails with [`Error::AlreadyRunning`] unless the session is
    /// [`Disconnected`](ConnectionState::Disconnected).
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(Error::AlreadyRunning);
        }

        let permit = self.acquire_lifecycle().await;

        let reconnect = CancellationToken::new();
        self.inner.attempt.lock().reconnect = Some(reconnect.clone());

        let this = self.clone();
        spawn(
            async move {
                trace!("Reconnect loop started.");
                this.run(reconnect, permit).await;
                trace!("Reconnect loop finished.");
            }
            .instrument(info_span!("reconnect_loop")),
        );

        Ok(())
    }

    /// Stops the reconnect loop and any in-flight attempt.
    ///
    /// This returns immediately, without waiting for teardown to finish.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        self.cancel();
    }

    /// Signals that the current attempt is fully ready, unblocking [`wait`].
    ///
    /// Does nothing when no attempt is in flight.
    ///
    /// [`wait`]: Self::wait
    pub fn complete(&self) {
        if let Some(ready) = &self.inner.attempt.lock().ready {
            ready.try_resolve();
        }
    }

    /// Waits until the current attempt is signalled ready, or fails.
    ///
    /// Returns immediately when no attempt is in flight.
    pub async fn wait(&self) -> Result<()> {
        let ready = self.inner.attempt.lock().ready.clone();

        match ready {
            Some(ready) => ready.wait().await,
            None => Ok(()),
        }
    }

    /// Gracefully ends the current attempt and the reconnect loop.
    #[instrument(skip(self))]
    pub fn cancel(&self) {
        let attempt = self.inner.attempt.lock();

        attempt.settle(&None);
        cancel_token(&attempt.connection);
        cancel_token(&attempt.reconnect);
    }

    /// Fails the current attempt with `e`; the loop will then retry.
    #[instrument(skip(self))]
    pub fn error(&self, e: Error) {
        let attempt = self.inner.attempt.lock();

        attempt.settle(&Some(e));
        cancel_token(&attempt.connection);
    }

    /// Fails the current attempt with `e`, and ends the reconnect loop.
    #[instrument(skip(self))]
    pub fn critical_error(&self, e: Error) {
        let attempt = self.inner.attempt.lock();

        attempt.settle(&Some(e));
        cancel_token(&attempt.connection);
        cancel_token(&attempt.reconnect);
    }

    /// Abandons the current attempt in favour of a fresh one.
    #[instrument(skip(self))]
    pub fn reconnect(&self) {
        let attempt = self.inner.attempt.lock();

        attempt.settle(&None);
        cancel_token(&attempt.connection);
    }

    async fn acquire_lifecycle(&self) -> OwnedSemaphorePermit {
        loop {
            self.stop();

            match self.inner.lifecycle.clone().try_acquire_owned() {
                Ok(permit) => break permit,
                Err(_) => yield_now().await,
            }
        }
    }

    // `_permit` is held for the lifetime of this loop.
    async fn run(&self, reconnect: CancellationToken, _permit: OwnedSemaphorePermit) {
        let mut backoff = Backoff::new(self.inner.config.retry);

        while !reconnect.is_cancelled() {
            let outcome = match self.connect(&reconnect).await {
                Ok(connection) => {
                    backoff.reset();
                    connection.wait().await
                },
                Err(e) => Err(e),
            };

            let e = match outcome {
                Ok(()) => Error::Cancelled,
                Err(e) => e,
            };

            self.error(e.clone());

            let is_reconnecting = !reconnect.is_cancelled();
            if is_reconnecting {
                warn!("Connection lost: {}.", e);
            } else {
                error!("Connection ended: {}.", e);
            }

            self.disconnect(&e, is_reconnecting).await;

            if !reconnect.is_cancelled() {
                let delay = backoff.next_delay();
                debug!("Reconnecting in {:?}.", delay);

                select! {
                    () = sleep(delay) => {},
                    () = reconnect.cancelled() => {},
                }
            }
        }
    }

    async fn connect(&self, reconnect: &CancellationToken) -> Result<Promise> {
        let token = reconnect.child_token();
        let ready = Promise::new();
        let connection = Promise::new();

        {
            let mut attempt = self.inner.attempt.lock();
            attempt.connection = Some(token.clone());
            attempt.ready = Some(ready.clone());
            attempt.connection_promise = Some(connection.clone());
        }

        self.set_state(ConnectionState::Connecting);
        info!("Connecting");

        spawn(
            watchdog(
                self.downgrade(),
                ready,
                token.clone(),
                self.inner.config.connection_timeout,
            )
            .in_current_span(),
        );

        let result = select! {
            biased;
            () = token.cancelled() => {
                connection.try_cancel();
                connection.wait().await
            },
            res = self.inner.connector.on_connecting(self, token.clone()) =>
                res.map_err(Error::connector),
        };

        let result = match result {
            Ok(()) => {
                info!("Connected");
                self.set_state(ConnectionState::Connected);

                debug!("Raising connected event.");
                self.inner.connected.invoke(&()).await.map_err(Error::from)
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(connection),
            Err(e) => {
                self.error(e.clone());
                Err(e)
            },
        }
    }

    async fn disconnect(&self, e: &Error, is_reconnecting: bool) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }

        self.set_state(ConnectionState::Disconnecting);
        info!("Disconnecting");

        if let Err(why) = self.inner.connector.on_disconnecting(self, e).await {
            warn!("Connector failed to disconnect cleanly: {}.", why);
        }

        let event = DisconnectEvent {
            error: e.clone(),
            is_reconnecting,
        };

        if let Err(why) = self.inner.disconnected.invoke(&event).await {
            warn!("Disconnect observers failed: {}.", why);
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected");
    }

    /// Fails the attempt owning `ready` if it is still handshaking.
    fn time_out(&self, ready: &Promise) {
        let attempt = self.inner.attempt.lock();

        let is_current = attempt.ready.as_ref().map_or(false, |r| r.ptr_eq(ready));
        if !is_current || self.state() != ConnectionState::Connecting {
            ready.try_reject(Error::TimedOut);
            return;
        }

        attempt.settle(&Some(Error::TimedOut));
        cancel_token(&attempt.connection);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.inner.state.write() = state;
    }
}

fn cancel_token(token: &Option<CancellationToken>) {
    if let Some(token) = token {
        token.cancel();
    }
}

async fn watchdog(
    manager: WeakConnectionManager,
    ready: Promise,
    token: CancellationToken,
    timeout: Duration,
) {
    select! {
        biased;
        () = token.cancelled() => {},
        _ = ready.wait() => {},
        () = sleep(timeout) => if let Some(manager) = manager.upgrade() {
            debug!("Connection attempt not ready after {:?}.", timeout);
            manager.time_out(&ready);
        },
    }
}

/// A [`ConnectionManager`] handle which does not keep the session alive.
#[derive(Clone, Debug)]
pub struct WeakConnectionManager {
    inner: Weak<Inner>,
}

impl WeakConnectionManager {
    /// Attempts to recover a full handle, if the manager still exists.
    #[must_use]
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.inner.upgrade().map(|inner| ConnectionManager { inner })
    }
}

/// Reports a transport's unexpected closure to its [`ConnectionManager`].
///
/// Closures carrying a [`FatalReason`] close code end the reconnect loop via
/// [`critical_error`]. Any other closure, including one with no details at
/// all, is treated as a recoverable [`error`].
///
/// [`FatalReason`]: close::FatalReason
/// [`critical_error`]: ConnectionManager::critical_error
/// [`error`]: ConnectionManager::error
#[derive(Clone, Debug)]
pub struct CloseHandler {
    manager: WeakConnectionManager,
}

impl CloseHandler {
    /// Classifies and reports a closure.
    pub fn closed(&self, closed: Option<TransportClosed>) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        let e = Error::from_closure(closed);
        if e.is_fatal() {
            manager.critical_error(e);
        } else {
            manager.error(e);
        }
    }
}

#[cfg(test)]
mod test;

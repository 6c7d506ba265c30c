use super::{close::TransportClosed, *};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
enum Behaviour {
    /// Signal readiness straight away.
    Ready,
    /// Fail every handshake.
    Fail,
    /// Never become ready.
    Stall,
}

struct MockConnector {
    behaviour: Behaviour,
    attempts: Mutex<Vec<(Instant, CancellationToken)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockConnector {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            attempts: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    fn token(&self, i: usize) -> CancellationToken {
        self.attempts.lock()[i].1.clone()
    }

    fn gaps(&self) -> Vec<Duration> {
        self.attempts
            .lock()
            .windows(2)
            .map(|w| w[1].0 - w[0].0)
            .collect()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn on_connecting(
        &self,
        manager: &ConnectionManager,
        token: CancellationToken,
    ) -> std::result::Result<(), BoxError> {
        self.attempts.lock().push((Instant::now(), token));

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        match self.behaviour {
            Behaviour::Ready => {
                manager.complete();
                manager.wait().await?;
                Ok(())
            },
            Behaviour::Fail => Err("handshake refused".into()),
            Behaviour::Stall => {
                manager.wait().await?;
                Ok(())
            },
        }
    }

    async fn on_disconnecting(
        &self,
        _manager: &ConnectionManager,
        _error: &Error,
    ) -> std::result::Result<(), BoxError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn manager(
    behaviour: Behaviour,
    config: Config,
) -> (ConnectionManager, Arc<MockConnector>, CloseHandler) {
    let connector = Arc::new(MockConnector::new(behaviour));
    let mut close = None;
    let manager = ConnectionManager::new(config, connector.clone(), |handler| {
        close = Some(handler);
    });

    (manager, connector, close.unwrap())
}

fn record_disconnects(manager: &ConnectionManager) -> Arc<Mutex<Vec<DisconnectEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    manager.on_disconnected(
        move |evt: &DisconnectEvent| -> std::result::Result<(), BoxError> {
            sink.lock().push(evt.clone());
            Ok(())
        },
    );

    events
}

async fn until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn attempt_becomes_connected_once_ready() {
    let (manager, connector, _close) = manager(Behaviour::Ready, Config::default());
    let connected = Arc::new(AtomicUsize::new(0));

    let counter = connected.clone();
    manager.on_connected(move |_: &()| -> std::result::Result<(), BoxError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    manager.start().await.unwrap();
    until(|| manager.state() == ConnectionState::Connected).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(connected.load(Ordering::SeqCst), 1);

    manager.stop();
    until(|| manager.state() == ConnectionState::Disconnected).await;
    assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn start_while_running_is_refused() {
    let (manager, connector, _close) = manager(Behaviour::Stall, Config::default());

    manager.start().await.unwrap();
    until(|| manager.state() == ConnectionState::Connecting).await;

    assert!(matches!(manager.start().await, Err(Error::AlreadyRunning)));
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert_eq!(connector.attempts(), 1);

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn error_triggers_exactly_one_retry_after_floor() {
    let (manager, connector, _close) = manager(Behaviour::Ready, Config::default());
    let events = record_disconnects(&manager);

    manager.start().await.unwrap();
    until(|| manager.state() == ConnectionState::Connected).await;

    let failed_at = Instant::now();
    manager.error(Error::connector("link dropped"));
    until(|| connector.attempts() == 2).await;

    let gap = connector.attempts.lock()[1].0 - failed_at;
    assert!(gap >= Duration::from_millis(1000), "{gap:?}");
    assert!(gap < Duration::from_millis(1050), "{gap:?}");

    until(|| manager.state() == ConnectionState::Connected).await;
    sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 2);

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_reconnecting);
    assert!(matches!(events[0].error, Error::Connector(_)));
    drop(events);

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn reconnect_replaces_attempt_and_keeps_loop() {
    let (manager, connector, _close) = manager(Behaviour::Ready, Config::default());
    let events = record_disconnects(&manager);

    manager.start().await.unwrap();
    until(|| manager.state() == ConnectionState::Connected).await;

    let requested_at = Instant::now();
    manager.reconnect();
    assert!(connector.token(0).is_cancelled());

    until(|| connector.attempts() == 2).await;
    let gap = connector.attempts.lock()[1].0 - requested_at;
    assert!(gap >= Duration::from_millis(1000), "{gap:?}");
    assert!(gap < Duration::from_millis(1050), "{gap:?}");

    until(|| manager.state() == ConnectionState::Connected).await;
    assert!(!connector.token(1).is_cancelled());
    {
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_reconnecting);
        assert!(events[0].error.is_cancelled());
    }
    assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn critical_error_ends_loop_and_frees_session() {
    let (manager, connector, _close) = manager(Behaviour::Ready, Config::default());
    let events = record_disconnects(&manager);

    manager.start().await.unwrap();
    until(|| manager.state() == ConnectionState::Connected).await;

    manager.critical_error(Error::from_closure(Some(TransportClosed::with_code(
        4006, "",
    ))));
    until(|| manager.state() == ConnectionState::Disconnected).await;

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 1);
    {
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_reconnecting);
        assert!(events[0].error.is_fatal());
    }

    manager.start().await.unwrap();
    until(|| connector.attempts() == 2).await;

    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_then_caps() {
    let (manager, connector, _close) = manager(Behaviour::Fail, Config::default());

    manager.start().await.unwrap();
    until(|| connector.attempts() >= 11).await;
    manager.stop();

    let gaps = connector.gaps();
    let min = Duration::from_millis(1000);
    let max = Duration::from_millis(60_000);
    let jitter = Duration::from_millis(250);

    assert_eq!(gaps[0], min);
    for pair in gaps.windows(2) {
        assert!(pair[1] >= pair[0], "{gaps:?}");
        assert!(pair[1] <= pair[0] * 2 + jitter, "{gaps:?}");
    }
    for gap in &gaps {
        assert!(*gap >= min && *gap <= max, "{gaps:?}");
    }
    assert_eq!(gaps[gaps.len() - 1], max);
}

#[tokio::test(start_paused = true)]
async fn cancel_then_restart_uses_fresh_token() {
    let (manager, connector, _close) = manager(Behaviour::Ready, Config::default());
    let events = record_disconnects(&manager);

    manager.start().await.unwrap();
    until(|| manager.state() == ConnectionState::Connected).await;

    manager.cancel();
    until(|| manager.state() == ConnectionState::Disconnected).await;
    assert!(connector.token(0).is_cancelled());
    {
        let events = events.lock();
        assert!(!events[0].is_reconnecting);
        assert!(events[0].error.is_cancelled());
    }

    manager.start().await.unwrap();
    until(|| manager.state() == ConnectionState::Connected).await;

    assert_eq!(connector.attempts(), 2);
    assert!(connector.token(0).is_cancelled());
    assert!(!connector.token(1).is_cancelled());

    manager.stop();
    until(|| connector.token(1).is_cancelled()).await;
}

#[tokio::test(start_paused = true)]
async fn repeated_start_stop_runs_one_loop_at_a_time() {
    let (manager, connector, _close) = manager(Behaviour::Stall, Config::default());

    for i in 1..=3 {
        manager.start().await.unwrap();
        until(|| connector.attempts() == i).await;

        manager.stop();
        until(|| manager.state() == ConnectionState::Disconnected).await;
    }

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 3);
    assert_eq!(connector.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_attempt_times_out_and_retries() {
    let config = Config::default().connection_timeout(Duration::from_secs(5));
    let (manager, connector, _close) = manager(Behaviour::Stall, config);
    let events = record_disconnects(&manager);

    manager.start().await.unwrap();
    until(|| connector.attempts() == 2).await;
    manager.stop();

    assert_eq!(connector.gaps()[0], Duration::from_secs(6));

    let events = events.lock();
    assert!(matches!(events[0].error, Error::TimedOut));
    assert!(events[0].is_reconnecting);
}

#[tokio::test(start_paused = true)]
async fn failing_connected_handler_fails_attempt() {
    let (manager, connector, _close) = manager(Behaviour::Ready, Config::default());
    let events = record_disconnects(&manager);

    manager.on_connected(|_: &()| -> std::result::Result<(), BoxError> {
        Err("not today".into())
    });

    manager.start().await.unwrap();
    until(|| connector.attempts() == 2).await;
    manager.stop();

    let events = events.lock();
    assert!(matches!(events[0].error, Error::Handlers(_)));
    assert!(events[0].is_reconnecting);
}

#[tokio::test(start_paused = true)]
async fn close_codes_select_retry_or_shutdown() {
    let (manager, connector, close) = manager(Behaviour::Ready, Config::default());
    let events = record_disconnects(&manager);

    manager.start().await.unwrap();
    until(|| manager.state() == ConnectionState::Connected).await;

    close.closed(Some(TransportClosed::with_code(4015, "server crashed")));
    until(|| connector.attempts() == 2).await;
    until(|| manager.state() == ConnectionState::Connected).await;

    close.closed(Some(TransportClosed::with_code(4014, "kicked")));
    until(|| manager.state() == ConnectionState::Disconnected).await;
    sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempts(), 2);

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert!(events[0].is_reconnecting);
    assert!(matches!(events[0].error, Error::Closed(Some(_))));
    assert!(!events[1].is_reconnecting);
    assert!(matches!(
        events[1].error,
        Error::Fatal(close::FatalReason::ForciblyClosed, _)
    ));
}

#[tokio::test]
async fn signals_without_attempt_are_no_ops() {
    let (manager, _connector, close) = manager(Behaviour::Ready, Config::default());

    manager.complete();
    assert!(manager.wait().await.is_ok());

    manager.stop();
    manager.cancel();
    manager.reconnect();
    close.closed(None);

    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

//! Registration with dispatchers.
//!
//! One loop runs per configured dispatcher. Each loop announces this worker
//! with `AddController`, then sleeps for the interval the dispatcher asked
//! for (or the configured error timeout when the call failed) and repeats.
//! When the shared [`CancellationToken`] fires, every loop sends exactly one
//! best-effort `RemoveController` and exits.
//!
//! ```text
//! Unregistered → Registering → Registered(W) → Registering → …
//!                     │                                     │
//!                     └──────────── stop ───────────────────┴→ Deregistering → Stopped
//! ```
//!
//! Sleeping goes through [`Clock`] so tests can drive the loop without real
//! time.

use crate::client::{ControllerDescriptor, Dispatcher};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    /// Registered; next renewal after `wait`.
    Registered { wait: Duration },
    Deregistering,
    Stopped,
}

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A running registration loop.
pub struct Registration {
    pub endpoint: String,
    pub state: watch::Receiver<RegistrationState>,
    pub task: JoinHandle<()>,
}

/// Spawns and tracks one registration loop per dispatcher.
pub struct Registrar {
    descriptor: Arc<ControllerDescriptor>,
    error_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Registrar {
    pub fn new(descriptor: ControllerDescriptor, error_timeout: Duration) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            error_timeout,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start one loop per dispatcher; all stop when `stop` is cancelled.
    pub fn spawn(
        &self,
        dispatchers: Vec<Arc<dyn Dispatcher>>,
        stop: CancellationToken,
    ) -> Vec<Registration> {
        dispatchers
            .into_iter()
            .map(|dispatcher| {
                let (tx, rx) = watch::channel(RegistrationState::Unregistered);
                let endpoint = dispatcher.endpoint().to_string();
                let task = tokio::spawn(run_loop(
                    dispatcher,
                    Arc::clone(&self.descriptor),
                    self.error_timeout,
                    Arc::clone(&self.clock),
                    stop.clone(),
                    tx,
                ));
                Registration {
                    endpoint,
                    state: rx,
                    task,
                }
            })
            .collect()
    }
}

/// Wait for every loop to finish.
pub async fn join_all(registrations: Vec<Registration>) {
    for registration in registrations {
        if let Err(e) = registration.task.await {
            tracing::error!(endpoint = %registration.endpoint, error = %e, "registration task failed");
        }
    }
}

async fn run_loop(
    dispatcher: Arc<dyn Dispatcher>,
    descriptor: Arc<ControllerDescriptor>,
    error_timeout: Duration,
    clock: Arc<dyn Clock>,
    stop: CancellationToken,
    state: watch::Sender<RegistrationState>,
) {
    let endpoint = dispatcher.endpoint().to_string();

    while !stop.is_cancelled() {
        state.send_replace(RegistrationState::Registering);
        let wait = tokio::select! {
            _ = stop.cancelled() => break,
            result = dispatcher.add_controller(&descriptor) => match result {
                Ok(wait) => {
                    let wait = if wait.is_zero() {
                        tracing::warn!(
                            endpoint = %endpoint,
                            retry_in = error_timeout.as_secs(),
                            "dispatcher sent no next call wait, using error timeout"
                        );
                        error_timeout
                    } else {
                        wait
                    };
                    tracing::debug!(
                        endpoint = %endpoint,
                        instance = %descriptor.instance,
                        next_call_wait = wait.as_secs(),
                        "registered with dispatcher"
                    );
                    state.send_replace(RegistrationState::Registered { wait });
                    wait
                }
                Err(e) => {
                    tracing::error!(
                        endpoint = %endpoint,
                        error = %e,
                        retry_in = error_timeout.as_secs(),
                        "cannot register with dispatcher"
                    );
                    error_timeout
                }
            },
        };

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = clock.sleep(wait) => {}
        }
    }

    state.send_replace(RegistrationState::Deregistering);
    match dispatcher.remove_controller(&descriptor).await {
        Ok(()) => tracing::info!(endpoint = %endpoint, "deregistered from dispatcher"),
        Err(e) => tracing::warn!(endpoint = %endpoint, error = %e, "cannot deregister from dispatcher"),
    }
    state.send_replace(RegistrationState::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Records requested sleeps and returns immediately; cancels the token
    /// once `stop_after` sleeps have been requested.
    struct ManualClock {
        sleeps: Mutex<Vec<Duration>>,
        stop_after: usize,
        stop: CancellationToken,
    }

    impl ManualClock {
        fn new(stop_after: usize, stop: CancellationToken) -> Self {
            Self {
                sleeps: Mutex::new(Vec::new()),
                stop_after,
                stop,
            }
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        async fn sleep(&self, duration: Duration) {
            let count = {
                let mut sleeps = self.sleeps.lock().unwrap();
                sleeps.push(duration);
                sleeps.len()
            };
            if count >= self.stop_after {
                self.stop.cancel();
                std::future::pending::<()>().await;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Scripted dispatcher answers; runs out into `Ok(default_wait)`.
    struct FakeDispatcher {
        endpoint: String,
        answers: Mutex<VecDeque<Result<Duration, ClientError>>>,
        default_wait: Duration,
        adds: AtomicUsize,
        removes: AtomicUsize,
        stall: bool,
        called: Notify,
    }

    impl FakeDispatcher {
        fn new(endpoint: &str, answers: Vec<Result<Duration, ClientError>>) -> Self {
            Self {
                endpoint: endpoint.into(),
                answers: Mutex::new(answers.into()),
                default_wait: Duration::from_secs(30),
                adds: AtomicUsize::new(0),
                removes: AtomicUsize::new(0),
                stall: false,
                called: Notify::new(),
            }
        }

        /// Never answers `AddController`.
        fn stalled(endpoint: &str) -> Self {
            Self {
                stall: true,
                ..Self::new(endpoint, vec![])
            }
        }
    }

    #[async_trait]
    impl Dispatcher for FakeDispatcher {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn add_controller(&self, descriptor: &ControllerDescriptor) -> Result<Duration, ClientError> {
            assert_eq!(descriptor.kind, "image");
            self.adds.fetch_add(1, Ordering::SeqCst);
            self.called.notify_one();
            if self.stall {
                std::future::pending::<()>().await;
            }
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(self.default_wait))
        }

        async fn remove_controller(&self, _descriptor: &ControllerDescriptor) -> Result<(), ClientError> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn ping(&self) -> Result<String, ClientError> {
            Ok("pong".into())
        }
    }

    fn descriptor() -> ControllerDescriptor {
        ControllerDescriptor {
            kind: "image".into(),
            instance: "test".into(),
            domains: vec![],
            concurrency: 3,
            queue_size: 10,
            actions: Default::default(),
        }
    }

    fn rejected() -> ClientError {
        ClientError::Rejected {
            endpoint: "d1".into(),
            message: "error: busy".into(),
        }
    }

    const ERROR_TIMEOUT: Duration = Duration::from_secs(10);

    async fn run(
        dispatchers: Vec<Arc<FakeDispatcher>>,
        stop_after: usize,
    ) -> (Arc<ManualClock>, Vec<RegistrationState>) {
        let stop = CancellationToken::new();
        let clock = Arc::new(ManualClock::new(stop_after, stop.clone()));
        let registrar = Registrar::new(descriptor(), ERROR_TIMEOUT).with_clock(clock.clone());
        let registrations = registrar.spawn(
            dispatchers
                .into_iter()
                .map(|d| d as Arc<dyn Dispatcher>)
                .collect(),
            stop,
        );
        let receivers: Vec<_> = registrations.iter().map(|r| r.state.clone()).collect();
        join_all(registrations).await;
        let states = receivers.iter().map(|rx| *rx.borrow()).collect();
        (clock, states)
    }

    #[tokio::test]
    async fn waits_next_call_interval_after_success() {
        let d = Arc::new(FakeDispatcher::new("d1", vec![]));
        let (clock, states) = run(vec![d.clone()], 2).await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30); 2]);
        assert_eq!(d.adds.load(Ordering::SeqCst), 2);
        assert_eq!(d.removes.load(Ordering::SeqCst), 1);
        assert_eq!(states, vec![RegistrationState::Stopped]);
    }

    #[tokio::test]
    async fn failure_waits_error_timeout_then_recovers() {
        let d = Arc::new(FakeDispatcher::new(
            "d1",
            vec![Err(rejected()), Ok(Duration::from_secs(5))],
        ));
        let (clock, _) = run(vec![d.clone()], 3).await;
        assert_eq!(
            clock.sleeps(),
            vec![ERROR_TIMEOUT, Duration::from_secs(5), Duration::from_secs(30)]
        );
        assert_eq!(d.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_next_call_wait_falls_back_to_error_timeout() {
        let d = Arc::new(FakeDispatcher::new("d1", vec![Ok(Duration::ZERO)]));
        let (clock, _) = run(vec![d.clone()], 2).await;
        assert_eq!(clock.sleeps(), vec![ERROR_TIMEOUT, Duration::from_secs(30)]);
        assert_eq!(d.adds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deregisters_once_even_without_success() {
        let d = Arc::new(FakeDispatcher::new("d1", vec![Err(rejected())]));
        let (clock, states) = run(vec![d.clone()], 1).await;
        assert_eq!(clock.sleeps(), vec![ERROR_TIMEOUT]);
        assert_eq!(d.removes.load(Ordering::SeqCst), 1);
        assert_eq!(states, vec![RegistrationState::Stopped]);
    }

    #[tokio::test]
    async fn stop_interrupts_pending_registration() {
        let d = Arc::new(FakeDispatcher::stalled("d1"));
        let stop = CancellationToken::new();
        let registrar = Registrar::new(descriptor(), ERROR_TIMEOUT);
        let mut registrations = registrar.spawn(vec![d.clone() as Arc<dyn Dispatcher>], stop.clone());

        d.called.notified().await;
        assert_eq!(*registrations[0].state.borrow(), RegistrationState::Registering);
        stop.cancel();

        let registration = registrations.remove(0);
        let mut state = registration.state.clone();
        registration.task.await.unwrap();
        assert_eq!(*state.borrow_and_update(), RegistrationState::Stopped);
        assert_eq!(d.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_loop_per_dispatcher() {
        let a = Arc::new(FakeDispatcher::new("a", vec![]));
        let b = Arc::new(FakeDispatcher::new("b", vec![Err(rejected())]));
        // The shared clock cancels everything after two sleeps in total.
        let (_, states) = run(vec![a.clone(), b.clone()], 2).await;
        assert_eq!(states, vec![RegistrationState::Stopped; 2]);
        assert_eq!(a.removes.load(Ordering::SeqCst), 1);
        assert_eq!(b.removes.load(Ordering::SeqCst), 1);
        assert!(a.adds.load(Ordering::SeqCst) >= 1);
        assert!(b.adds.load(Ordering::SeqCst) >= 1);
    }
}

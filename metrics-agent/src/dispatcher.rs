//! Failure handling around publish calls.
//!
//! Every publish call goes through a [`Dispatcher`], which applies the retry policy and the circuit
//! breaker configured for the publisher.  Failures never escape a dispatcher: they are logged and
//! the batch is dropped, since metrics are best-effort telemetry.
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use quanta::{Clock, Instant};
use tracing::{debug, info, warn};

use crate::config::{CircuitBreakerConfig, RetryPolicyConfig};
use crate::error::PublishError;

/// Outcome of a single dispatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dispatched {
    /// The publish call succeeded.
    Published,
    /// The publish call failed, after any retries, and the batch was dropped.
    Failed,
    /// The circuit was open, so no call was made and the batch was dropped.
    Rejected,
}

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Calls go through; consecutive failures are counted.
    Closed,
    /// Calls are dropped until the connect wait time has elapsed.
    Open,
    /// Calls go through as probes; consecutive successes are counted.
    HalfOpen,
}

#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

struct RetryPolicy {
    attempts: u32,
    wait: Duration,
}

impl RetryPolicy {
    fn from_config(config: &RetryPolicyConfig) -> Self {
        RetryPolicy { attempts: config.retry_attempts, wait: config.retry_wait_time }
    }
}

struct CircuitBreaker {
    success_threshold: u32,
    failure_threshold: u32,
    connect_wait_time: Duration,
    request_timeout: Duration,
    clock: Clock,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    fn from_config(config: &CircuitBreakerConfig, clock: Clock) -> Self {
        CircuitBreaker {
            success_threshold: config.success_threshold,
            failure_threshold: config.failure_threshold,
            connect_wait_time: config.connect_wait_time,
            request_timeout: config.request_timeout,
            clock,
            state: Mutex::new(BreakerState::Closed { failures: 0 }),
        }
    }

    fn state(&self) -> CircuitState {
        match *self.state.lock() {
            BreakerState::Closed { .. } => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Whether or not a call may go through, moving from open to half-open once the wait is over.
    fn try_acquire(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let since = match *state {
            BreakerState::Open { since } => since,
            BreakerState::Closed { .. } | BreakerState::HalfOpen { .. } => return true,
        };
        if self.clock.now() - since < self.connect_wait_time {
            return false;
        }

        warn!(
            publisher = %name,
            "Metric client '{}' is half-open. Trying to send the next metrics batch.",
            name
        );
        *state = BreakerState::HalfOpen { successes: 0 };
        true
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        !self.request_timeout.is_zero() && elapsed > self.request_timeout
    }

    fn record(&self, name: &str, success: bool) {
        let mut state = self.state.lock();
        let next = match (&*state, success) {
            (BreakerState::Closed { .. }, true) => BreakerState::Closed { failures: 0 },
            (BreakerState::Closed { failures }, false) => {
                let failures = failures + 1;
                if failures >= self.failure_threshold {
                    self.open(name)
                } else {
                    BreakerState::Closed { failures }
                }
            }
            (BreakerState::HalfOpen { successes }, true) => {
                let successes = successes + 1;
                if successes >= self.success_threshold {
                    info!(publisher = %name, "Metric client '{}' is responding again. Closed circuit.", name);
                    BreakerState::Closed { failures: 0 }
                } else {
                    BreakerState::HalfOpen { successes }
                }
            }
            (BreakerState::HalfOpen { .. }, false) => self.open(name),
            // Outcome of a call that started before another call opened the circuit.
            (BreakerState::Open { since }, _) => BreakerState::Open { since: *since },
        };
        *state = next;
    }

    fn open(&self, name: &str) -> BreakerState {
        warn!(
            publisher = %name,
            "Metric client '{}' is not responding. Opened circuit. Dropping next metrics batches...",
            name
        );
        BreakerState::Open { since: self.clock.now() }
    }
}

enum Strategy {
    Noop,
    Retry(RetryPolicy),
    CircuitBreaker(CircuitBreaker),
    RetryAndCircuitBreaker(RetryPolicy, CircuitBreaker),
}

/// Wraps publish calls with a retry policy and a circuit breaker.
///
/// The strategy is chosen once, from the two `enabled` flags:
///
/// - neither: a single attempt
/// - retry only: up to `retry_attempts` retries after the first failure
/// - circuit breaker only: a single attempt, unless the circuit is open
/// - both: retries first, with the circuit breaker observing only the final outcome
///
/// A call taking longer than the configured request timeout counts as a failure for the circuit
/// breaker even if it succeeded.
///
/// Once [`shutdown`](Dispatcher::shutdown) is called, a dispatch waiting between retries wakes up
/// and gives up on the batch instead of retrying.
pub struct Dispatcher {
    name: String,
    clock: Clock,
    strategy: Strategy,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
}

impl Dispatcher {
    /// Creates a dispatcher for the publisher named `name`.
    pub fn new<N: Into<String>>(
        name: N,
        retry: &RetryPolicyConfig,
        circuit_breaker: &CircuitBreakerConfig,
    ) -> Dispatcher {
        Dispatcher::with_clock(name, retry, circuit_breaker, Clock::new())
    }

    /// Creates a dispatcher measuring time with `clock`.
    pub fn with_clock<N: Into<String>>(
        name: N,
        retry: &RetryPolicyConfig,
        circuit_breaker: &CircuitBreakerConfig,
        clock: Clock,
    ) -> Dispatcher {
        let strategy = match (retry.enabled, circuit_breaker.enabled) {
            (false, false) => Strategy::Noop,
            (true, false) => Strategy::Retry(RetryPolicy::from_config(retry)),
            (false, true) => {
                Strategy::CircuitBreaker(CircuitBreaker::from_config(circuit_breaker, clock.clone()))
            }
            (true, true) => Strategy::RetryAndCircuitBreaker(
                RetryPolicy::from_config(retry),
                CircuitBreaker::from_config(circuit_breaker, clock.clone()),
            ),
        };

        // Nothing is ever sent: dropping the sender is the shutdown signal.
        let (stop_tx, stop_rx) = bounded(0);
        Dispatcher { name: name.into(), clock, strategy, stop_tx: Mutex::new(Some(stop_tx)), stop_rx }
    }

    /// Stops retrying.
    ///
    /// Dispatches in progress finish their current attempt and then drop their batch rather than
    /// waiting for the next one.  Later dispatches make a single attempt.
    pub fn shutdown(&self) {
        if self.stop_tx.lock().take().is_some() {
            debug!(publisher = %self.name, "Dispatcher shutting down.");
        }
    }

    /// Whether or not [`shutdown`](Dispatcher::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        matches!(self.stop_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Waits between retries, returning `false` if shutdown interrupted the wait.
    fn wait(&self, wait: Duration) -> bool {
        if wait.is_zero() {
            return !self.is_shutdown();
        }
        matches!(self.stop_rx.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
    }

    /// Gets the name of the publisher this dispatcher guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the circuit breaker state, if a circuit breaker is enabled.
    pub fn circuit_state(&self) -> Option<CircuitState> {
        match &self.strategy {
            Strategy::CircuitBreaker(breaker) | Strategy::RetryAndCircuitBreaker(_, breaker) => {
                Some(breaker.state())
            }
            _ => None,
        }
    }

    /// Runs `publish` under the configured policies.
    ///
    /// Never fails: errors are logged and reported through the returned outcome.
    pub fn dispatch<F>(&self, mut publish: F) -> Dispatched
    where
        F: FnMut() -> Result<(), PublishError>,
    {
        let outcome = match &self.strategy {
            Strategy::Noop => self.attempt(&mut publish).map(|_| ()),
            Strategy::Retry(retry) => self.attempt_with_retry(retry, &mut publish).map(|_| ()),
            Strategy::CircuitBreaker(breaker) => {
                if !breaker.try_acquire(&self.name) {
                    return self.reject();
                }
                let outcome = self.attempt(&mut publish);
                self.observe(breaker, outcome)
            }
            Strategy::RetryAndCircuitBreaker(retry, breaker) => {
                if !breaker.try_acquire(&self.name) {
                    return self.reject();
                }
                let outcome = self.attempt_with_retry(retry, &mut publish);
                self.observe(breaker, outcome)
            }
        };

        match outcome {
            Ok(()) => Dispatched::Published,
            Err(e) => {
                warn!(publisher = %self.name, error = %e, "Failed to publish metrics. Dropping batch.");
                Dispatched::Failed
            }
        }
    }

    fn reject(&self) -> Dispatched {
        debug!(publisher = %self.name, "Circuit is open. Dropping metrics batch.");
        Dispatched::Rejected
    }

    fn observe(
        &self,
        breaker: &CircuitBreaker,
        outcome: Result<Duration, PublishError>,
    ) -> Result<(), PublishError> {
        match outcome {
            Ok(elapsed) if breaker.is_slow(elapsed) => {
                warn!(
                    publisher = %self.name,
                    ?elapsed,
                    timeout = ?breaker.request_timeout,
                    "Publish call exceeded the request timeout."
                );
                breaker.record(&self.name, false);
                Ok(())
            }
            Ok(_) => {
                breaker.record(&self.name, true);
                Ok(())
            }
            Err(e) => {
                breaker.record(&self.name, false);
                Err(e)
            }
        }
    }

    /// Makes one attempt, returning how long it took.
    fn attempt<F>(&self, publish: &mut F) -> Result<Duration, PublishError>
    where
        F: FnMut() -> Result<(), PublishError>,
    {
        let start = self.clock.now();
        publish()?;
        Ok(self.clock.now() - start)
    }

    /// Makes up to `retry.attempts + 1` attempts, returning how long the successful one took.
    fn attempt_with_retry<F>(&self, retry: &RetryPolicy, publish: &mut F) -> Result<Duration, PublishError>
    where
        F: FnMut() -> Result<(), PublishError>,
    {
        let mut attempt = 0;
        loop {
            match self.attempt(publish) {
                Ok(elapsed) => return Ok(elapsed),
                Err(e) if attempt < retry.attempts => {
                    if !self.wait(retry.wait) {
                        info!(publisher = %self.name, error = %e, "Shutting down. Abandoning retries.");
                        return Err(e);
                    }
                    attempt += 1;
                    info!(
                        publisher = %self.name,
                        attempt,
                        max_attempts = retry.attempts,
                        error = %e,
                        "Publish attempt failed. Retrying."
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CircuitState, Dispatched, Dispatcher};
    use crate::config::{CircuitBreakerConfig, RetryPolicyConfig};
    use crate::error::PublishError;
    use proptest::prelude::*;
    use quanta::Clock;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn retry(enabled: bool, attempts: u32) -> RetryPolicyConfig {
        RetryPolicyConfig { enabled, retry_attempts: attempts, retry_wait_time: Duration::ZERO }
    }

    fn breaker(enabled: bool, failures: u32, successes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled,
            success_threshold: successes,
            failure_threshold: failures,
            connect_wait_time: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
        }
    }

    fn fail() -> Result<(), PublishError> {
        Err(PublishError::Other("backend down".into()))
    }

    #[test]
    fn noop_makes_a_single_attempt() {
        let dispatcher = Dispatcher::new("noop", &retry(false, 3), &breaker(false, 3, 3));
        let calls = Cell::new(0);

        let outcome = dispatcher.dispatch(|| {
            calls.set(calls.get() + 1);
            fail()
        });

        assert_eq!(outcome, Dispatched::Failed);
        assert_eq!(calls.get(), 1);
        assert_eq!(dispatcher.circuit_state(), None);
    }

    #[test]
    fn retry_attempts_plus_one() {
        let dispatcher = Dispatcher::new("retry", &retry(true, 3), &breaker(false, 3, 3));
        let calls = Cell::new(0);

        let outcome = dispatcher.dispatch(|| {
            calls.set(calls.get() + 1);
            fail()
        });

        assert_eq!(outcome, Dispatched::Failed);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn retry_stops_on_success() {
        let dispatcher = Dispatcher::new("retry", &retry(true, 3), &breaker(false, 3, 3));
        let calls = Cell::new(0);

        let outcome = dispatcher.dispatch(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                fail()
            } else {
                Ok(())
            }
        });

        assert_eq!(outcome, Dispatched::Published);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn breaker_opens_after_failure_threshold() {
        let (clock, _mock) = Clock::mock();
        let dispatcher = Dispatcher::with_clock("cb", &retry(false, 3), &breaker(true, 3, 2), clock);
        let calls = Cell::new(0);
        let failing = || {
            calls.set(calls.get() + 1);
            fail()
        };

        for _ in 0..3 {
            assert_eq!(dispatcher.dispatch(failing), Dispatched::Failed);
        }
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Open));

        assert_eq!(dispatcher.dispatch(failing), Dispatched::Rejected);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (clock, _mock) = Clock::mock();
        let dispatcher = Dispatcher::with_clock("cb", &retry(false, 3), &breaker(true, 2, 2), clock);

        dispatcher.dispatch(fail);
        dispatcher.dispatch(|| Ok(()));
        dispatcher.dispatch(fail);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Closed));

        dispatcher.dispatch(fail);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Open));
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let (clock, mock) = Clock::mock();
        let dispatcher = Dispatcher::with_clock("cb", &retry(false, 3), &breaker(true, 3, 2), clock);

        for _ in 0..3 {
            dispatcher.dispatch(fail);
        }
        assert_eq!(dispatcher.dispatch(|| Ok(())), Dispatched::Rejected);

        mock.increment(Duration::from_millis(999));
        assert_eq!(dispatcher.dispatch(|| Ok(())), Dispatched::Rejected);

        mock.increment(Duration::from_millis(1));
        assert_eq!(dispatcher.dispatch(|| Ok(())), Dispatched::Published);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::HalfOpen));

        assert_eq!(dispatcher.dispatch(|| Ok(())), Dispatched::Published);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Closed));
    }

    #[test]
    fn half_open_failure_reopens() {
        let (clock, mock) = Clock::mock();
        let dispatcher = Dispatcher::with_clock("cb", &retry(false, 3), &breaker(true, 3, 2), clock);

        for _ in 0..3 {
            dispatcher.dispatch(fail);
        }
        mock.increment(Duration::from_secs(1));

        assert_eq!(dispatcher.dispatch(|| Ok(())), Dispatched::Published);
        assert_eq!(dispatcher.dispatch(fail), Dispatched::Failed);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Open));

        let calls = Cell::new(0);
        let outcome = dispatcher.dispatch(|| {
            calls.set(calls.get() + 1);
            Ok(())
        });
        assert_eq!(outcome, Dispatched::Rejected);
        assert_eq!(calls.get(), 0);

        // The wait restarts from the moment the circuit reopened.
        mock.increment(Duration::from_secs(1));
        assert_eq!(dispatcher.dispatch(|| Ok(())), Dispatched::Published);
    }

    #[test]
    fn breaker_sees_outcome_after_retries() {
        let (clock, _mock) = Clock::mock();
        let dispatcher = Dispatcher::with_clock("both", &retry(true, 3), &breaker(true, 2, 2), clock);
        let calls = Cell::new(0);
        let failing = || {
            calls.set(calls.get() + 1);
            fail()
        };

        assert_eq!(dispatcher.dispatch(failing), Dispatched::Failed);
        assert_eq!(calls.get(), 4);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Closed));

        assert_eq!(dispatcher.dispatch(failing), Dispatched::Failed);
        assert_eq!(calls.get(), 8);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Open));

        assert_eq!(dispatcher.dispatch(failing), Dispatched::Rejected);
        assert_eq!(calls.get(), 8);
    }

    #[test]
    fn slow_success_counts_as_failure() {
        let (clock, mock) = Clock::mock();
        let dispatcher = Dispatcher::with_clock("slow", &retry(true, 3), &breaker(true, 1, 2), clock);
        let calls = Cell::new(0);
        let slow = || {
            calls.set(calls.get() + 1);
            mock.increment(Duration::from_millis(1500));
            Ok(())
        };

        assert_eq!(dispatcher.dispatch(slow), Dispatched::Published);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Open));

        assert_eq!(dispatcher.dispatch(slow), Dispatched::Rejected);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_request_timeout_disables_slow_calls() {
        let (clock, mock) = Clock::mock();
        let mut config = breaker(true, 1, 2);
        config.request_timeout = Duration::ZERO;
        let dispatcher = Dispatcher::with_clock("slow", &retry(false, 3), &config, clock);

        let outcome = dispatcher.dispatch(|| {
            mock.increment(Duration::from_secs(30));
            Ok(())
        });
        assert_eq!(outcome, Dispatched::Published);
        assert_eq!(dispatcher.circuit_state(), Some(CircuitState::Closed));
    }

    #[test]
    fn shutdown_interrupts_retry_wait() {
        let config = RetryPolicyConfig { enabled: true, retry_attempts: 3, retry_wait_time: Duration::from_secs(5) };
        let dispatcher = Arc::new(Dispatcher::new("retry", &config, &breaker(false, 3, 3)));
        let calls = Arc::new(AtomicU32::new(0));

        let handle = {
            let dispatcher = Arc::clone(&dispatcher);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                let start = Instant::now();
                let outcome = dispatcher.dispatch(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    fail()
                });
                (outcome, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!dispatcher.is_shutdown());
        dispatcher.shutdown();

        let (outcome, elapsed) = handle.join().unwrap();
        assert_eq!(outcome, Dispatched::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(elapsed < Duration::from_secs(1), "dispatch took {:?}", elapsed);
        assert!(dispatcher.is_shutdown());
    }

    #[test]
    fn no_retries_after_shutdown() {
        let dispatcher = Dispatcher::new("retry", &retry(true, 3), &breaker(false, 3, 3));
        dispatcher.shutdown();
        let calls = Cell::new(0);

        let outcome = dispatcher.dispatch(|| {
            calls.set(calls.get() + 1);
            fail()
        });

        assert_eq!(outcome, Dispatched::Failed);
        assert_eq!(calls.get(), 1);
        assert_eq!(dispatcher.dispatch(|| Ok(())), Dispatched::Published);
    }

    proptest! {
        #[test]
        fn failing_publish_is_attempted_retry_attempts_plus_one_times(attempts in 1u32..16) {
            let dispatcher = Dispatcher::new("retry", &retry(true, attempts), &breaker(false, 3, 3));
            let calls = Cell::new(0u32);

            let outcome = dispatcher.dispatch(|| {
                calls.set(calls.get() + 1);
                fail()
            });

            prop_assert_eq!(outcome, Dispatched::Failed);
            prop_assert_eq!(calls.get(), attempts + 1);
        }
    }
}

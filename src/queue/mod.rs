//! Per-network rate-limited FIFO request queue over an RPC transport,
//! dispatched by a single background scheduler task.
//!
//! Dispatch order is strict FIFO by submission — there is no priority key.
//! A background scheduler task ticks on a timer: when enough time has
//! passed since the last dispatch and the queue isn't paused/empty, it pulls
//! up to `batch_size` tasks off the front and fires them concurrently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::instrument;

use crate::error::{TransportError, TransportResult};

/// A JSON-RPC request envelope: `{method, params}`.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: String,
    pub params: serde_json::Value,
}

impl RpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// The concrete JSON-RPC transport the queue drives. Implementations own
/// the wire format; the queue only sequences and rate-limits calls into it.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, request: &RpcRequest) -> TransportResult<serde_json::Value>;
}

/// `interval`/`batch_size` derived from a requests-per-second budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub interval: Duration,
    pub batch_size: usize,
}

impl RateLimit {
    /// `interval = max(1000/R, 50)` ms; `batchSize = 1` when the interval is
    /// exactly `1000/R` (i.e. `R <= 20`), else `floor(R / 20)`.
    #[must_use]
    pub fn from_rps(max_requests_per_second: u32) -> Self {
        let r = max_requests_per_second.max(1) as f64;
        let unclamped_interval_ms = 1000.0 / r;
        let interval_ms = unclamped_interval_ms.max(50.0);
        let batch_size = if (interval_ms - unclamped_interval_ms).abs() < f64::EPSILON {
            1
        } else {
            ((r / 20.0).floor() as usize).max(1)
        };
        Self {
            interval: Duration::from_millis(interval_ms as u64),
            batch_size,
        }
    }
}

struct Task {
    request: RpcRequest,
    enqueued_at: Instant,
    responder: oneshot::Sender<TransportResult<serde_json::Value>>,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    in_flight: usize,
    last_dispatch: Option<Instant>,
}

/// Per-network rate-limited FIFO queue. Cheap to clone — every clone shares
/// the same underlying state and background scheduler.
pub struct RequestQueue {
    transport: Arc<dyn RpcTransport>,
    rate: RateLimit,
    state: Arc<Mutex<QueueState>>,
    paused: Arc<AtomicBool>,
    /// Guards against arming more than one scheduler timer at once: only one
    /// timer may be armed at a time.
    timing: Arc<AtomicBool>,
    notify: Arc<Notify>,
    network: String,
    enqueued_seq: Arc<AtomicU64>,
}

impl RequestQueue {
    #[must_use]
    pub fn new(network: impl Into<String>, transport: Arc<dyn RpcTransport>, rate: RateLimit) -> Self {
        let queue = Self {
            transport,
            rate,
            state: Arc::new(Mutex::new(QueueState::default())),
            paused: Arc::new(AtomicBool::new(false)),
            timing: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            network: network.into(),
            enqueued_seq: Arc::new(AtomicU64::new(0)),
        };
        queue.arm_scheduler();
        queue
    }

    /// Enqueue `request`, returning a future that resolves once the
    /// transport has settled it (or rejects if the task is dropped by
    /// [`RequestQueue::clear`]).
    #[instrument(skip(self, request), fields(network = %self.network, method = %request.method))]
    pub async fn request(&self, request: RpcRequest) -> TransportResult<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.tasks.push_back(Task {
                request,
                enqueued_at: Instant::now(),
                responder: tx,
            });
        }
        self.enqueued_seq.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        rx.await.unwrap_or(Err(TransportError::Dropped {
            reason: "queue task was dropped before settling".to_string(),
        }))
    }

    /// Pending-enqueued count: tasks submitted but not yet dispatched.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// In-flight count: tasks dispatched to the transport but not yet settled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn start(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Drop all un-dispatched tasks, rejecting each with
    /// [`TransportError::Dropped`], and reset `lastDispatchTime`. In-flight
    /// tasks are left alone; they will still resolve or reject on their own.
    pub fn clear(&self) {
        let dropped: Vec<Task> = {
            let mut state = self.state.lock();
            state.last_dispatch = None;
            state.tasks.drain(..).collect()
        };
        for task in dropped {
            let _ = task.responder.send(Err(TransportError::Dropped {
                reason: "queue was cleared".to_string(),
            }));
        }
    }

    fn arm_scheduler(&self) {
        if self.timing.swap(true, Ordering::SeqCst) {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let rate = self.rate;
        let state = Arc::clone(&self.state);
        let paused = Arc::clone(&self.paused);
        let timing = Arc::clone(&self.timing);
        let notify = Arc::clone(&self.notify);
        let network = self.network.clone();

        tokio::spawn(async move {
            loop {
                let now = Instant::now();
                let (due, wait) = {
                    let state = state.lock();
                    match state.last_dispatch {
                        None => (true, Duration::ZERO),
                        Some(last) => {
                            let elapsed = now.duration_since(last);
                            if elapsed >= rate.interval {
                                (true, Duration::ZERO)
                            } else {
                                (false, rate.interval - elapsed)
                            }
                        }
                    }
                };

                let has_work = !state.lock().tasks.is_empty() && !paused.load(Ordering::SeqCst);

                if due && has_work {
                    let batch: Vec<Task> = {
                        let mut state = state.lock();
                        let n = rate.batch_size.min(state.tasks.len());
                        let batch = state.tasks.drain(..n).collect::<Vec<_>>();
                        state.in_flight += batch.len();
                        state.last_dispatch = Some(Instant::now());
                        batch
                    };
                    for task in batch {
                        let transport = Arc::clone(&transport);
                        let state = Arc::clone(&state);
                        let network = network.clone();
                        tokio::spawn(async move {
                            let lag = task.enqueued_at.elapsed();
                            let started = Instant::now();
                            let result = transport.call(&task.request).await;
                            let duration = started.elapsed();
                            record_metrics(&network, &task.request.method, lag, duration);
                            state.lock().in_flight -= 1;
                            let _ = task.responder.send(result);
                        });
                    }
                    continue;
                }

                timing.store(false, Ordering::SeqCst);
                if has_work {
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        () = notify.notified() => {}
                    }
                } else {
                    notify.notified().await;
                }
                if timing.swap(true, Ordering::SeqCst) {
                    // Another arm_scheduler call raced us; yield this loop.
                    return;
                }
            }
        });
    }
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_metrics(network: &str, method: &str, lag: Duration, duration: Duration) {
    #[cfg(feature = "metrics")]
    {
        metrics::histogram!("rpc_request_lag", lag.as_secs_f64(), "network" => network.to_string(), "method" => method.to_string());
        metrics::histogram!("rpc_request_duration", duration.as_secs_f64(), "network" => network.to_string(), "method" => method.to_string());
    }
    let _ = (network, method, lag, duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTransport {
        calls: AtomicUsize,
        dispatch_times: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl RpcTransport for CountingTransport {
        async fn call(&self, _request: &RpcRequest) -> TransportResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.dispatch_times.lock().push(Instant::now());
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[test]
    fn rate_limit_derivation_matches_spec_formula() {
        let rl = RateLimit::from_rps(1);
        assert_eq!(rl.interval, Duration::from_millis(1000));
        assert_eq!(rl.batch_size, 1);

        let rl = RateLimit::from_rps(50);
        assert_eq!(rl.interval, Duration::from_millis(50));
        assert_eq!(rl.batch_size, 2);

        let rl = RateLimit::from_rps(1000);
        assert_eq!(rl.interval, Duration::from_millis(50));
        assert_eq!(rl.batch_size, 50);
    }

    #[tokio::test]
    async fn fifo_dispatch_order_matches_submission() {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
            dispatch_times: Mutex::new(Vec::new()),
        });
        let queue = RequestQueue::new(
            "mainnet",
            transport.clone() as Arc<dyn RpcTransport>,
            RateLimit::from_rps(1000),
        );

        let a = queue.request(RpcRequest::new("eth_blockNumber", serde_json::Value::Null));
        let b = queue.request(RpcRequest::new("eth_blockNumber", serde_json::Value::Null));
        let (ra, rb) = tokio::join!(a, b);
        assert!(ra.is_ok());
        assert!(rb.is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limit_delays_second_request_at_r_equals_1() {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
            dispatch_times: Mutex::new(Vec::new()),
        });
        let queue = RequestQueue::new(
            "mainnet",
            transport.clone() as Arc<dyn RpcTransport>,
            RateLimit::from_rps(1),
        );

        let start = Instant::now();
        let _ = queue
            .request(RpcRequest::new("eth_blockNumber", serde_json::Value::Null))
            .await;
        let _ = queue
            .request(RpcRequest::new("eth_blockNumber", serde_json::Value::Null))
            .await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn clear_drops_undispatched_tasks() {
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
            dispatch_times: Mutex::new(Vec::new()),
        });
        let queue = RequestQueue::new(
            "mainnet",
            transport as Arc<dyn RpcTransport>,
            RateLimit::from_rps(1),
        );
        queue.pause();
        let fut = queue.request(RpcRequest::new("eth_blockNumber", serde_json::Value::Null));
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.clear();
        let result = fut.await;
        assert!(matches!(result, Err(TransportError::Dropped { .. })));
    }

    #[tokio::test]
    async fn failed_call_does_not_affect_siblings() {
        struct FlakyTransport;
        #[async_trait]
        impl RpcTransport for FlakyTransport {
            async fn call(&self, request: &RpcRequest) -> TransportResult<serde_json::Value> {
                if request.method == "boom" {
                    Err(TransportError::Backend {
                        message: "simulated failure".to_string(),
                    })
                } else {
                    Ok(serde_json::json!("fine"))
                }
            }
        }
        let queue = RequestQueue::new(
            "mainnet",
            Arc::new(FlakyTransport) as Arc<dyn RpcTransport>,
            RateLimit::from_rps(1000),
        );
        let boom = queue.request(RpcRequest::new("boom", serde_json::Value::Null));
        let fine = queue.request(RpcRequest::new("eth_blockNumber", serde_json::Value::Null));
        let (boom_result, fine_result) = tokio::join!(boom, fine);
        assert!(boom_result.is_err());
        assert!(fine_result.is_ok());
    }
}

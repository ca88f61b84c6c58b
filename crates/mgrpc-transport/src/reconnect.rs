use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mgrpc_frame::Frame;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{Codec, CodecFactory};

/// Exponential backoff for rebuilding a failed transport.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Dial attempts per reconnect before giving up. `None` retries until closed.
    pub max_attempts: Option<u32>,
    /// Delay before the first retried dial.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between dials.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay for the `n`-th consecutive failure (1-indexed).
    pub fn backoff_for_attempt(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = self.backoff_multiplier.powi(exponent);
        if !multiplier.is_finite() {
            return self.max_backoff;
        }
        self.initial_backoff.mul_f64(multiplier).min(self.max_backoff)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

struct Active {
    codec: Arc<dyn Codec>,
    since: Instant,
}

/// A [`Codec`] that rebuilds its underlying transport when it fails.
///
/// `recv` keeps reading across reconnects; `send` retries once on a fresh
/// transport. In-flight requests are never replayed: callers waiting on a
/// reply that was lost with the old transport resolve by their own deadline,
/// or by a matching reply arriving on the new one.
pub struct ReconnectCodec {
    address: String,
    factory: CodecFactory,
    policy: RetryPolicy,
    active: Mutex<Option<Active>>,
    /// Connections that died sooner than `max_backoff` after being built.
    unstable: AtomicU32,
    closed: CancellationToken,
}

impl ReconnectCodec {
    /// Dial `address` once through `factory` and wrap the result.
    ///
    /// The initial dial is not retried so unreachable peers surface at
    /// connection time.
    pub async fn connect(
        address: impl Into<String>,
        factory: CodecFactory,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let address = address.into();
        let codec = factory(address.clone()).await?;
        info!(
            address = %address,
            transport = codec.transport_name(),
            "connected"
        );
        Ok(Self {
            address,
            factory,
            policy,
            active: Mutex::new(Some(Active {
                codec: Arc::from(codec),
                since: Instant::now(),
            })),
            unstable: AtomicU32::new(0),
            closed: CancellationToken::new(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The live codec, redialing if the previous one was discarded.
    async fn current(&self) -> Result<Arc<dyn Codec>> {
        let mut active = self.active.lock().await;
        if let Some(active) = active.as_ref() {
            return Ok(active.codec.clone());
        }
        let codec: Arc<dyn Codec> = Arc::from(self.redial().await?);
        *active = Some(Active {
            codec: codec.clone(),
            since: Instant::now(),
        });
        Ok(codec)
    }

    async fn redial(&self) -> Result<Box<dyn Codec>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failures = attempt - 1 + self.unstable.load(Ordering::Relaxed);
            if failures > 0 {
                let delay = self.policy.backoff_for_attempt(failures);
                debug!(address = %self.address, attempt, ?delay, "waiting before redial");
                tokio::select! {
                    _ = self.closed.cancelled() => return Err(TransportError::Closed),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let dialed = tokio::select! {
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
                res = (self.factory)(self.address.clone()) => res,
            };
            match dialed {
                Ok(codec) => {
                    info!(address = %self.address, attempt, "reconnected");
                    return Ok(codec);
                }
                Err(err) if err.is_permanent() => return Err(err),
                Err(err) if self.policy.exhausted(attempt) => {
                    return Err(TransportError::ReconnectFailed {
                        address: self.address.clone(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(address = %self.address, attempt, error = %err, "redial failed");
                }
            }
        }
    }

    /// Drop `failed` if it is still the active codec.
    async fn invalidate(&self, failed: &Arc<dyn Codec>) {
        let stale = {
            let mut active = self.active.lock().await;
            match active.as_ref() {
                Some(current) if Arc::ptr_eq(&current.codec, failed) => active.take(),
                _ => None,
            }
        };
        let Some(stale) = stale else {
            return;
        };
        if stale.since.elapsed() < self.policy.max_backoff {
            self.unstable.fetch_add(1, Ordering::Relaxed);
        } else {
            self.unstable.store(0, Ordering::Relaxed);
        }
        if let Err(err) = stale.codec.close().await {
            debug!(address = %self.address, error = %err, "closing failed codec");
        }
    }
}

#[async_trait]
impl Codec for ReconnectCodec {
    async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let codec = self.current().await?;
        match codec.send(frame.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(address = %self.address, error = %err, "send failed, reconnecting");
                self.invalidate(&codec).await;
                self.current().await?.send(frame).await
            }
        }
    }

    async fn recv(&self) -> Result<Frame> {
        loop {
            if self.closed.is_cancelled() {
                return Err(TransportError::Closed);
            }
            let codec = self.current().await?;
            let received = tokio::select! {
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
                res = codec.recv() => res,
            };
            match received {
                Ok(frame) => {
                    self.unstable.store(0, Ordering::Relaxed);
                    return Ok(frame);
                }
                Err(err) => {
                    warn!(address = %self.address, error = %err, "receive failed, reconnecting");
                    self.invalidate(&codec).await;
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.codec.close().await?;
        }
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "reconnect"
    }
}

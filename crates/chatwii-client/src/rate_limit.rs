//! Send-side flood control: a token bucket per receiver plus a guard
//! against sending the same text twice in a row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use chatwii_shared::constants::{DUPLICATE_WINDOW_MS, SEND_BURST, SEND_REFILL_PER_SEC};
use chatwii_shared::UserId;

use crate::error::ClientError;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
struct LastSend {
    text: String,
    at: Instant,
}

#[derive(Default)]
struct Tables {
    buckets: HashMap<UserId, TokenBucket>,
    last_sent: HashMap<UserId, LastSend>,
}

#[derive(Clone)]
pub struct SendLimiter {
    tables: Arc<Mutex<Tables>>,
    rate: f64,
    capacity: f64,
    duplicate_window: Duration,
}

impl SendLimiter {
    pub fn new(rate: f64, capacity: f64, duplicate_window: Duration) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            rate,
            capacity,
            duplicate_window,
        }
    }

    /// Admit one message to `receiver`. Text-less (media-only) messages
    /// skip the duplicate check.
    pub async fn check(&self, receiver: &UserId, text: Option<&str>) -> Result<(), ClientError> {
        let mut tables = self.tables.lock().await;
        let now = Instant::now();

        if let (Some(text), Some(last)) = (text, tables.last_sent.get(receiver)) {
            if last.text == text && now.duration_since(last.at) < self.duplicate_window {
                warn!(receiver = %receiver, "Duplicate message rejected");
                return Err(ClientError::DuplicateMessage);
            }
        }

        let bucket = tables
            .buckets
            .entry(receiver.clone())
            .or_insert_with(|| TokenBucket::new(self.capacity));
        if !bucket.try_consume(self.rate, self.capacity) {
            warn!(receiver = %receiver, "Send rate limit exceeded");
            return Err(ClientError::RateLimited);
        }

        if let Some(text) = text {
            tables.last_sent.insert(
                receiver.clone(),
                LastSend {
                    text: text.to_string(),
                    at: now,
                },
            );
        }
        Ok(())
    }

    /// Forget receivers that have been idle for `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let mut tables = self.tables.lock().await;
        let now = Instant::now();
        tables
            .buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < max_idle);
        tables
            .last_sent
            .retain(|_, last| now.duration_since(last.at) < max_idle);
    }

    #[cfg(test)]
    pub(crate) async fn tracked_receivers(&self) -> usize {
        let tables = self.tables.lock().await;
        tables.buckets.len().max(tables.last_sent.len())
    }

    pub async fn clear(&self) {
        let mut tables = self.tables.lock().await;
        tables.buckets.clear();
        tables.last_sent.clear();
    }
}

impl Default for SendLimiter {
    fn default() -> Self {
        Self::new(
            SEND_REFILL_PER_SEC,
            f64::from(SEND_BURST),
            Duration::from_millis(DUPLICATE_WINDOW_MS),
        )
    }
}

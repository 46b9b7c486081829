//! Shared fixtures for dei-mailer integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dei_mailer::scheduler::Scheduler;
use dei_mailer::transport::{
    EmailMessage, EmailProvider, RetryPolicy, SendError, SendReceipt, SlidingWindowLimiter,
    Transport,
};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider that replays scripted results, then accepts everything
#[derive(Default)]
pub struct FakeProvider {
    script: Mutex<VecDeque<Result<SendReceipt, SendError>>>,
    calls: AtomicUsize,
    sent: Mutex<Vec<EmailMessage>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(script: Vec<Result<SendReceipt, SendError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    /// Fails every call with `error()`
    pub fn failing(error: impl Fn() -> SendError, times: usize) -> Arc<Self> {
        Self::scripted((0..times).map(|_| Err(error())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for FakeProvider {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, SendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.script.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| {
            Ok(SendReceipt {
                id: format!("fake-{}", n),
            })
        });
        if result.is_ok() {
            self.sent.lock().unwrap().push(message.clone());
        }
        result
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub fn server_error(status: u16) -> SendError {
    SendError::Provider {
        status,
        message: "upstream unavailable".to_string(),
    }
}

/// Roomy rate limit, no backoff delay
pub fn fast_transport(provider: Arc<FakeProvider>) -> Transport {
    Transport::new(
        provider,
        Arc::new(SlidingWindowLimiter::new(1000, Duration::from_secs(60))),
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    )
}

/// Scheduler whose transport never retries
pub fn scheduler(pool: SqlitePool, provider: Arc<FakeProvider>) -> Scheduler {
    let transport = Transport::new(
        provider,
        Arc::new(SlidingWindowLimiter::new(1000, Duration::from_secs(60))),
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    );
    Scheduler::new(pool, transport, 100)
}

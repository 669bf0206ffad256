//! Shared setup for service tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{JobQueueConfig, PasswordHashConfig, RuntimeConfig, UserConfig};
use api::{App, AppConfig, Notification, Notifier, ServiceError};
use futures_util::future::BoxFuture;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Keeps every notification for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_token(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|n| n.token().to_string())
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), ServiceError>> {
        self.sent.lock().unwrap().push(notification.clone());
        Box::pin(async { Ok(()) })
    }
}

/// In-memory application with cheap hashing and a queue that only runs
/// when asked.
pub async fn app() -> Result<(App, Arc<RecordingNotifier>), ServiceError> {
    let config = AppConfig {
        runtime: RuntimeConfig {
            idle_timeout: None,
            call_timeout: Some(Duration::from_secs(10)),
            ..RuntimeConfig::default()
        },
        user: UserConfig {
            password_hash: PasswordHashConfig {
                iterations: 1_000,
                ..PasswordHashConfig::default()
            },
            ..UserConfig::default()
        },
        job_queue: JobQueueConfig {
            poll_interval: Duration::from_secs(3600),
            job_timeout: Duration::from_secs(5),
        },
        ..AppConfig::default()
    };
    let notifier = Arc::new(RecordingNotifier::default());
    let app = api::init(config, notifier.clone()).await?;
    Ok((app, notifier))
}

use crate::error::NodeError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A started resource that must be released on shutdown.
#[async_trait]
pub trait Closeable: Send + Sync {
    fn name(&self) -> &str;

    async fn close(&self) -> Result<(), NodeError>;
}

/// Closes resources in the reverse order of registration.
#[derive(Default)]
pub struct CloseableRegistry {
    stack: Mutex<Vec<Arc<dyn Closeable>>>,
}

impl CloseableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, closeable: Arc<dyn Closeable>) {
        self.stack.lock().await.push(closeable);
    }

    pub async fn len(&self) -> usize {
        self.stack.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stack.lock().await.is_empty()
    }

    /// Closes everything, last registered first. Failures are logged and skipped.
    pub async fn close_all(&self) {
        let mut stack = self.stack.lock().await;
        while let Some(closeable) = stack.pop() {
            match closeable.close().await {
                Ok(()) => debug!("Closed {}", closeable.name()),
                Err(e) => warn!("⚠️ Failed to close {}: {}", closeable.name(), e),
            }
        }
    }
}

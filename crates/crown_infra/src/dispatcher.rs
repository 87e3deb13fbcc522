use dashmap::DashMap;
use infra_api::{InfraMessage, TaskExecutor};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Callback for messages of one type.
pub type DispatchHandler = Arc<dyn Fn(&InfraMessage) + Send + Sync>;

/// Routes messages to the handlers registered for their type.
///
/// Each dispatch runs as one task on the configured [`TaskExecutor`]. Handlers
/// of the same type run in registration order; a panicking handler is logged
/// and the remaining handlers still run.
pub struct MessageDispatcher {
    handlers: DashMap<String, Vec<DispatchHandler>>,
    executor: Arc<dyn TaskExecutor>,
}

impl MessageDispatcher {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            handlers: DashMap::new(),
            executor,
        }
    }

    /// Adds a handler for `message_type`. Blank types are rejected.
    pub fn register(
        &self,
        message_type: &str,
        handler: DispatchHandler,
    ) -> Result<(), infra_api::ContractError> {
        if message_type.trim().is_empty() {
            return Err(infra_api::ContractError::Blank("type"));
        }
        self.handlers
            .entry(message_type.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    pub fn handler_count(&self, message_type: &str) -> usize {
        self.handlers
            .get(message_type)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    /// Hands `message` to every handler of its type. Messages nobody handles are ignored.
    pub fn dispatch(&self, message: Arc<InfraMessage>) {
        let handlers = match self.handlers.get(message.message_type()) {
            Some(handlers) if !handlers.is_empty() => handlers.value().clone(),
            _ => {
                debug!("No handler for message type {}", message.message_type());
                return;
            }
        };

        self.executor.execute(Box::new(move || {
            for handler in &handlers {
                if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
                    error!(
                        "❌ Handler for {} from {} panicked",
                        message.message_type(),
                        message.from_server_id()
                    );
                }
            }
        }));
    }
}

//! Job Handler Registry
//!
//! A dynamic registry that maps string-based handler names (e.g., "fib") to
//! executable Rust closures. Dispatch is static from the engine's point of
//! view: handlers are registered once at startup, before any job runs.

use super::runtime::JobContext;

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for a thread-safe, asynchronous job handler.
///
/// A handler receives the `JobContext` of its invocation (through which it
/// spawns children and syncs on them) plus the job's JSON payload, and
/// resolves to the job's result value.
pub type JobHandlerFn = Arc<
    dyn Fn(
            JobContext,
            serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Registry holding the mapping between handler names and their implementation.
pub struct JobRegistry {
    handlers: DashMap<String, JobHandlerFn>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
        })
    }

    /// Registers a handler function under a specific name.
    pub fn register<F, Fut>(&self, handler_name: &str, handler: F)
    where
        F: Fn(JobContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        // Box::pin type-erases the concrete future so differently-typed
        // handlers can share one map.
        let handler_fn: JobHandlerFn = Arc::new(move |ctx: JobContext, payload| {
            Box::pin(handler(ctx, payload))
                as Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        });

        self.handlers.insert(handler_name.to_string(), handler_fn);

        tracing::info!("Registered job handler: {}", handler_name);
    }

    /// Looks up a handler by name and runs it.
    pub async fn invoke(
        &self,
        handler_name: &str,
        ctx: JobContext,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let handler_fn = match self.handlers.get(handler_name) {
            Some(entry) => entry.value().clone(),
            None => anyhow::bail!("Unknown job handler: {}", handler_name),
        };

        handler_fn(ctx, payload).await
    }

    pub fn has_handler(&self, handler_name: &str) -> bool {
        self.handlers.contains_key(handler_name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn list_handlers(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}

//! Method registry: the handler table consulted when the peer calls us.
//!
//! The registry is generic over the context type `C` handed to every
//! handler, so this crate stays independent of connection state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::errors::{HandlerError, METHOD_NOT_FOUND, SERVER_ERROR};
use crate::types::ErrorObject;

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler<C: ?Sized + Sync>: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &C) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure over the params into a handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<C, F, Fut> MethodHandler<C> for FnHandler<F>
where
    C: ?Sized + Sync,
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Option<Value>, _ctx: &C) -> Result<Value, HandlerError> {
        (self.0)(params).await
    }
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry<C: ?Sized> {
    handlers: HashMap<String, Arc<dyn MethodHandler<C>>>,
    handler_timeout: Option<Duration>,
}

impl<C: ?Sized + Sync> MethodRegistry<C> {
    /// Duration above which a completed call is logged as slow.
    const SLOW_CALL: Duration = Duration::from_secs(5);

    /// Create an empty registry with no handler timeout.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            handler_timeout: None,
        }
    }

    /// Bound every handler invocation by `timeout`.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Register a handler for a method name, replacing any previous one.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler<C> + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Register an async closure over the params.
    pub fn register_fn<F, Fut>(&mut self, method: &str, f: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(method, FnHandler(f));
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&mut self, method: &str) -> bool {
        self.handlers.remove(method).is_some()
    }

    /// Run the handler for `method`, mapping every failure to an error object.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &C,
        debug: bool,
    ) -> Result<Value, ErrorObject> {
        let Some(handler) = self.handlers.get(method) else {
            warn!(method, "unknown RPC method");
            return Err(ErrorObject::new(METHOD_NOT_FOUND, "Method not found")
                .with_data(Value::from(method)));
        };

        let start = Instant::now();
        let outcome = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, handler.handle(params, ctx)).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    error!(method, "RPC handler timed out after {limit:?}");
                    return Err(ErrorObject::new(
                        SERVER_ERROR,
                        format!("Handler for '{method}' timed out"),
                    ));
                }
            },
            None => handler.handle(params, ctx).await,
        };

        let duration = start.elapsed();
        if duration >= Self::SLOW_CALL {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }

        outcome.map_err(|err| {
            warn!(method, code = err.code(), error = %err, "RPC handler failed");
            err.to_error_object(debug)
        })
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<C: ?Sized + Sync> Default for MethodRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

//! Built-in methods and a closure adapter for handlers that need the
//! connection context.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use wsrpc_protocol::{HandlerError, MethodHandler};

use crate::config::Handlers;
use crate::context::ConnectionContext;

/// Adapter turning a closure over `(params, &ConnectionContext)` into a
/// handler. The returned future must not borrow the context; clone what it
/// needs or take [`ConnectionContext::shared`].
pub struct ContextFn<F>(pub F);

#[async_trait]
impl<F, Fut> MethodHandler<ConnectionContext> for ContextFn<F>
where
    F: Fn(Option<Value>, &ConnectionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        params: Option<Value>,
        ctx: &ConnectionContext,
    ) -> Result<Value, HandlerError> {
        (self.0)(params, ctx).await
    }
}

/// Install `rpc.ping` and `rpc.methods` into `handlers`.
///
/// `rpc.ping` answers `"pong"`; `rpc.methods` lists the method names of the
/// connection's own handler table.
pub fn register_defaults(handlers: &mut Handlers) {
    handlers.register_fn("rpc.ping", |_params| async {
        Ok::<_, HandlerError>(Value::from("pong"))
    });
    handlers.register(
        "rpc.methods",
        ContextFn(|_params: Option<Value>, ctx: &ConnectionContext| {
            let methods = ctx.config().handlers.methods();
            async move { Ok::<_, HandlerError>(Value::from(methods)) }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config, connected, spawn_loop};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn defaults_are_registered() {
        let mut handlers = Handlers::new();
        register_defaults(&mut handlers);
        assert!(handlers.has_method("rpc.ping"));
        assert!(handlers.has_method("rpc.methods"));
        assert_eq!(handlers.len(), 2);
    }

    #[tokio::test]
    async fn methods_lists_the_connection_table() {
        let (ctx, source, mut peer) = connected(config()).await;
        let _loop = spawn_loop(&ctx, source);

        peer.send_text(r#"{"jsonrpc":"2.0","method":"rpc.methods","id":1}"#);
        let reply = peer.recv_json().await;
        assert_eq!(reply["result"], json!(["rpc.methods", "rpc.ping"]));
    }

    #[tokio::test]
    async fn handler_can_spawn_background_work_via_shared() {
        let mut handlers = Handlers::new();
        handlers.register(
            "subscribe",
            ContextFn(|_params: Option<Value>, ctx: &ConnectionContext| {
                let spawned = ctx.shared().map(|ctx| {
                    let worker = Arc::clone(&ctx);
                    ctx.spawn_background_task(async move {
                        let _ = worker.notify("tick", None).await;
                    })
                });
                async move {
                    match spawned {
                        Some(Ok(handle)) => Ok(json!(handle.to_string())),
                        _ => Err(HandlerError::internal("connection closed")),
                    }
                }
            }),
        );
        let (ctx, source, mut peer) = connected(crate::test_support::config_with(handlers)).await;
        let _loop = spawn_loop(&ctx, source);

        peer.send_text(r#"{"jsonrpc":"2.0","method":"subscribe","id":1}"#);
        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(peer.recv_json().await);
        }
        assert!(seen.iter().any(|m| m["result"] == "task-1"));
        assert!(seen.iter().any(|m| m["method"] == "tick"));
    }
}

//! Handler registry: command type to handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use basset_core::protocol::Params;
use basset_core::{CommandKind, HandlerError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Uniform handler interface every command type is invoked through.
///
/// A handler returns its result or fails; it never emits a Response and
/// never touches engine state.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute the command.
    async fn handle(&self, params: Params) -> Result<Value, HandlerError>;
}

/// Handler with a typed request and response.
///
/// Wrap with [`typed`] to register it.
#[async_trait]
pub trait TypedHandler: Send + Sync + 'static {
    /// Parameters, deserialized from the command's `params` object.
    type Params: DeserializeOwned + Send;
    /// Result, serialized into the Response.
    type Output: Serialize + Send;

    /// Execute the command.
    async fn call(&self, params: Self::Params) -> Result<Self::Output, HandlerError>;
}

/// Adapter from [`TypedHandler`] to [`CommandHandler`].
pub struct Typed<H>(H);

/// Adapt a typed handler. Parameter decoding failures become
/// [`HandlerError::InvalidParams`].
pub fn typed<H: TypedHandler>(handler: H) -> Typed<H> {
    Typed(handler)
}

#[async_trait]
impl<H: TypedHandler> CommandHandler for Typed<H> {
    async fn handle(&self, params: Params) -> Result<Value, HandlerError> {
        let params: H::Params = serde_json::from_value(Value::Object(params))?;
        let output = self.0.call(params).await?;
        serde_json::to_value(output)
            .map_err(|e| HandlerError::failed(format!("failed to encode result: {e}")))
    }
}

/// Adapter from an async closure to [`CommandHandler`].
pub struct FnHandler<F>(F);

/// Adapt an async closure `Fn(Params) -> Future<Output = Result<Value, HandlerError>>`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Params) -> Result<Value, HandlerError> {
        (self.0)(params).await
    }
}

/// Lookup table from [`CommandKind`] to handler.
///
/// Populated at startup and frozen (behind an `Arc`) once the engine runs.
pub struct HandlerRegistry {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<CommandKind>, handler: impl CommandHandler + 'static) {
        let _ = self.handlers.insert(kind.into(), Arc::new(handler));
    }

    /// Resolve the handler for `kind`.
    pub fn get(&self, kind: &CommandKind) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Whether `kind` has a handler.
    pub fn contains(&self, kind: &CommandKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered command types as wire strings (sorted).
    pub fn kinds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().map(|k| k.as_str().to_owned()).collect();
        names.sort();
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(&self, params: Params) -> Result<Value, HandlerError> {
            Ok(Value::Object(params))
        }
    }

    #[derive(Deserialize)]
    struct NavigateParams {
        url: String,
        #[serde(default)]
        wait: bool,
    }

    #[derive(Serialize)]
    struct NavigateResult {
        navigated_to: String,
        waited: bool,
    }

    struct Navigate;

    #[async_trait]
    impl TypedHandler for Navigate {
        type Params = NavigateParams;
        type Output = NavigateResult;

        async fn call(&self, params: NavigateParams) -> Result<NavigateResult, HandlerError> {
            if !params.url.starts_with("http") {
                return Err(HandlerError::failed("unsupported scheme"));
            }
            Ok(NavigateResult {
                navigated_to: params.url,
                waited: params.wait,
            })
        }
    }

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }

    #[tokio::test]
    async fn register_and_resolve() {
        let mut reg = HandlerRegistry::new();
        reg.register("navigate", EchoHandler);
        let handler = reg.get(&CommandKind::Navigate).unwrap();
        let out = handler.handle(params(json!({"url": "https://a"}))).await.unwrap();
        assert_eq!(out["url"], "https://a");
        assert!(reg.get(&CommandKind::Click).is_none());
    }

    #[test]
    fn kinds_are_sorted_wire_names() {
        let mut reg = HandlerRegistry::new();
        reg.register(CommandKind::Screenshot, EchoHandler);
        reg.register("click", EchoHandler);
        reg.register("my_plugin", EchoHandler);
        assert_eq!(reg.kinds(), vec!["click", "my_plugin", "screenshot"]);
        assert_eq!(reg.len(), 3);
        assert!(reg.contains(&CommandKind::Custom("my_plugin".into())));
    }

    #[test]
    fn re_register_replaces() {
        let mut reg = HandlerRegistry::new();
        reg.register("ping", EchoHandler);
        reg.register("ping", EchoHandler);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn typed_handler_decodes_and_encodes() {
        let handler = typed(Navigate);
        let out = handler
            .handle(params(json!({"url": "https://example.com", "wait": true})))
            .await
            .unwrap();
        assert_eq!(out, json!({"navigated_to": "https://example.com", "waited": true}));
    }

    #[tokio::test]
    async fn typed_handler_bad_params_are_invalid_params() {
        let handler = typed(Navigate);
        let err = handler.handle(params(json!({"wait": true}))).await.unwrap_err();
        assert_matches!(err, HandlerError::InvalidParams { ref message } if message.contains("url"));
    }

    #[tokio::test]
    async fn typed_handler_failure_passes_through() {
        let handler = typed(Navigate);
        let err = handler.handle(params(json!({"url": "ftp://x"}))).await.unwrap_err();
        assert_eq!(err, HandlerError::failed("unsupported scheme"));
    }

    #[tokio::test]
    async fn closure_handler() {
        let mut reg = HandlerRegistry::new();
        reg.register(
            "get_cookies",
            handler_fn(|_params| async { Ok::<_, HandlerError>(json!({"cookies": []})) }),
        );
        let out = reg
            .get(&CommandKind::GetCookies)
            .unwrap()
            .handle(Params::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"cookies": []}));
    }
}

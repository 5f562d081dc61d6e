//! Action-handler contract.
//!
//! Concrete actions (keyboard, audio, OBS, scripts, ...) live outside the
//! gateway. Each one is registered under a name and invoked with the inbound
//! message's `payload`; its result object is merged into the acknowledgement.

use crate::error::DeckResult;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by [`ActionHandler::execute`].
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = DeckResult<Value>> + Send + 'a>>;

/// A named capability the gateway can dispatch to.
///
/// The result should be a JSON object carrying at least `status`; other
/// fields are passed through to the client untouched.
pub trait ActionHandler: Send + Sync {
    fn execute(&self, payload: Value) -> ActionFuture<'_>;
}

/// Adapter turning an async closure into an [`ActionHandler`].
struct FnHandler<F>(F);

impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = DeckResult<Value>> + Send + 'static,
{
    fn execute(&self, payload: Value) -> ActionFuture<'_> {
        Box::pin((self.0)(payload))
    }
}

/// Mapping from action name to handler, populated once at start-up.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DeckResult<Value>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

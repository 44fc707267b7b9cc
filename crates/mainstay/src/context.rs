// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// A value stored in a command context's attribute map.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Per-invocation scratch space handed to the remote callback.
///
/// Carries the logical command name, a concurrent attribute map for passing data from
/// the submitting task to the attempt (on whatever worker it runs), and the
/// cancellation token the callback's I/O should observe.
///
/// Attributes written before submission are visible to the callback; writes from the
/// callback are visible to later attempts of the same invocation.
///
/// # Examples
///
/// ```
/// use mainstay::CommandContext;
///
/// let ctx = CommandContext::new("GetAccount");
/// ctx.set("tenant", "acme".to_owned());
///
/// assert_eq!(ctx.get::<String>("tenant").as_deref(), Some(&"acme".to_owned()));
/// assert!(ctx.get::<u64>("tenant").is_none());
/// ```
pub struct CommandContext {
    command_name: String,
    attributes: RwLock<HashMap<String, AttributeValue>>,
    cancellation: CancellationToken,
}

impl CommandContext {
    /// Creates a context for the named command with an empty attribute map.
    #[must_use]
    pub fn new(command_name: impl Into<String>) -> Self {
        Self::with_attributes(command_name, HashMap::new(), CancellationToken::new())
    }

    pub(crate) fn with_attributes(
        command_name: impl Into<String>,
        attributes: HashMap<String, AttributeValue>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            command_name: command_name.into(),
            attributes: RwLock::new(attributes),
            cancellation,
        }
    }

    /// The logical command name this invocation runs under.
    #[must_use]
    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    /// Sets an attribute, replacing any existing value for the key.
    pub fn set(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.attributes.write().insert(key.into(), Arc::new(value));
    }

    /// Gets the attribute for a key if it exists and has the requested type.
    #[must_use]
    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        let value = Arc::clone(self.attributes.read().get(key)?);
        value.downcast::<V>().ok()
    }

    /// Removes an attribute; no-op if the key is absent.
    pub fn remove(&self, key: &str) {
        self.attributes.write().remove(key);
    }

    /// The cancellation token for this invocation.
    ///
    /// Cancellation of the outer handle aborts the retry loop before the next attempt;
    /// an in-flight callback must observe this token itself to stop work early.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the invocation has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("command_name", &self.command_name)
            .field("attributes", &self.attributes.read().len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(CommandContext: Send, Sync);
    }

    #[test]
    fn set_get_remove_round_trip() {
        let ctx = CommandContext::new("cmd");

        ctx.set("count", 3_u64);
        assert_eq!(ctx.get::<u64>("count").as_deref(), Some(&3));

        ctx.set("count", 4_u64);
        assert_eq!(ctx.get::<u64>("count").as_deref(), Some(&4));

        ctx.remove("count");
        assert!(ctx.get::<u64>("count").is_none());
    }

    #[test]
    fn get_with_wrong_type_is_none() {
        let ctx = CommandContext::new("cmd");
        ctx.set("id", "abc".to_owned());

        assert!(ctx.get::<u64>("id").is_none());
    }

    #[test]
    fn attributes_cross_threads() {
        let ctx = Arc::new(CommandContext::new("cmd"));
        ctx.set("token", "secret".to_owned());

        let worker = {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || ctx.get::<String>("token").map(|v| (*v).clone()))
        };

        assert_eq!(worker.join().unwrap().as_deref(), Some("secret"));
    }

    #[test]
    fn cancellation_is_observable() {
        let ctx = CommandContext::new("cmd");
        assert!(!ctx.is_cancelled());

        ctx.cancellation().cancel();
        assert!(ctx.is_cancelled());
    }
}

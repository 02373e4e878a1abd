use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared service handles (clients, pools, ...) made available to every node.
///
/// The engine never looks inside; nodes fetch what they need by name and type.
#[derive(Clone, Default)]
pub struct ToolHandles {
    handles: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ToolHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, handle: Arc<T>) {
        self.handles.insert(name.into(), handle);
    }

    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, handle: Arc<T>) -> Self {
        self.insert(name, handle);
        self
    }

    /// Typed lookup; `None` if the name is unknown or holds another type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.handles
            .get(name)
            .cloned()
            .and_then(|handle| handle.downcast::<T>().ok())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for ToolHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandles")
            .field("names", &self.handles.keys().collect::<Vec<_>>())
            .finish()
    }
}

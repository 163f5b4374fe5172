use tracing::Span;
use uuid::Uuid;

/// Correlation data threaded through every cache operation.
///
/// Used for diagnostics only; it is never persisted and never changes what an
/// operation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    correlation_id: Uuid,
    component: Option<String>,
}

impl RequestContext {
    /// Fresh context with a random correlation id
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            component: None,
        }
    }

    /// Reuse a correlation id received from elsewhere (a broker or server response)
    pub fn with_correlation_id(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            component: None,
        }
    }

    /// Name of the calling component, attached to every log line
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn component_name(&self) -> Option<&str> {
        self.component.as_deref()
    }

    /// Span covering one cache operation
    pub fn span(&self, operation: &'static str) -> Span {
        tracing::debug_span!(
            "cache_op",
            operation,
            correlation_id = %self.correlation_id,
            component = self.component.as_deref().unwrap_or("-"),
        )
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

//! Factory for schedulers sharing one plugin configuration.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, info_span, Span};
use vmplace_backend::ComputeBackend;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::framework::Registry;
use crate::scheduler::{Scheduler, SchedulerOptions};

/// Holds the plugin registry and logging span built at startup and hands
/// out [`Scheduler`]s bound to a backend.
#[derive(Debug, Clone)]
pub struct Manager {
    registry: Arc<Registry>,
    span: Span,
}

impl Manager {
    /// Build a manager from a parsed configuration document.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the document names unknown plugins or invalid
    /// parameters.
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let registry = Registry::from_config(config)?;
        Ok(Self {
            registry: Arc::new(registry),
            span: info_span!("vmplace_scheduler"),
        })
    }

    /// Build a manager from the configuration file at `path`. No path
    /// means every plugin with its defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigRead`, `ConfigParse` or `Config`.
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        let config = SchedulerConfig::load(path)?;
        info!(path = ?path, vmid = %config.vmid, "Loaded plugin configuration");
        Self::new(&config)
    }

    /// Attribute every log line of the schedulers this manager creates to
    /// `span`.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The plugins every scheduler of this manager runs.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Create an idle scheduler bound to `backend`.
    #[must_use]
    pub fn scheduler(
        &self,
        backend: Arc<dyn ComputeBackend>,
        options: SchedulerOptions,
    ) -> Scheduler {
        Scheduler::new(
            backend,
            Arc::clone(&self.registry),
            options,
            self.span.clone(),
        )
    }
}

//! Shutdown coordination for the gateway.

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Wraps a cancellation token that the server, the backend connection and every
/// bridge session observe. Bridges hold child tokens so that closing one session never
/// affects the others.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the process-wide one, but cancellable on its own.
    ///
    /// Each bridge session runs on one of these.
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until shutdown is triggered.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_children() {
        let shutdown = Shutdown::new();
        let child = shutdown.child();
        let other = shutdown.child();

        other.cancel();
        assert!(!shutdown.is_triggered());
        assert!(!child.is_cancelled());

        shutdown.trigger();
        shutdown.wait().await;
        assert!(child.is_cancelled());
    }
}

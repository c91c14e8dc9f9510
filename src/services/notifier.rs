use async_trait::async_trait;

/// Told whenever a file finishes processing so file listings can refresh.
#[async_trait]
pub trait FileListNotifier: Send + Sync {
    async fn refresh(&self);
}

/// Notifier that does nothing (used when no listing is attached)
pub struct NoOpNotifier;

#[async_trait]
impl FileListNotifier for NoOpNotifier {
    async fn refresh(&self) {}
}

/// Logs each refresh request; used by the command-line client.
pub struct LoggingNotifier;

#[async_trait]
impl FileListNotifier for LoggingNotifier {
    async fn refresh(&self) {
        tracing::info!("📂 File list refresh requested");
    }
}

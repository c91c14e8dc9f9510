use bytes::Bytes;
use lofty::file::AudioFile;
use lofty::probe::Probe;
use std::time::Duration;

pub struct MetadataService;

impl MetadataService {
    /// Reads the playback duration of an audio or video container.
    ///
    /// Returns `None` when the container is unknown, cannot be decoded, or
    /// reports a zero duration.
    pub fn read_duration(bytes: &[u8]) -> Option<Duration> {
        let mut cursor = std::io::Cursor::new(bytes);
        let probe = Probe::new(&mut cursor).guess_file_type().ok()?;
        let tagged_file = probe.read().ok()?;
        let duration = tagged_file.properties().duration();
        (!duration.is_zero()).then_some(duration)
    }

    /// Decodes media metadata on a blocking thread, giving up after `timeout`.
    pub async fn probe_duration(data: Bytes, timeout: Duration) -> Option<Duration> {
        let task = tokio::task::spawn_blocking(move || Self::read_duration(&data));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(duration)) => duration,
            Ok(Err(e)) => {
                tracing::warn!("Metadata probe task failed: {}", e);
                None
            }
            Err(_) => {
                tracing::debug!("Metadata probe timed out after {:?}", timeout);
                None
            }
        }
    }
}

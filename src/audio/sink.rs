use anyhow::Result;
use async_trait::async_trait;

/// Trait for streaming audio encoding
///
/// Implementations encode audio samples to an on-disk format (WAV today) in a
/// streaming fashion, writing data as it arrives rather than buffering the
/// whole clip.
#[async_trait]
pub trait AudioSink: Send {
    /// Write audio samples (streaming, called repeatedly during recording)
    /// The Vec is moved to avoid copying
    fn write_chunk(&mut self, samples: Vec<f32>) -> Result<()>;

    /// Finalize and close the sink, returning the total samples written
    async fn finalize(&mut self) -> Result<u64>;
}

//! Local capture devices sampled by the student agent.
use std::future::Future;

use crate::error::AgentError;

/// Live local video track. Stopping releases the device.
pub trait VideoStream: Send + Sync + 'static {
    fn track_id(&self) -> &str;
    fn stop(&mut self);
}

pub trait Camera: Send + 'static {
    type Stream: VideoStream;

    /// Requests video only, audio is never captured.
    fn open(&mut self) -> impl Future<Output = Result<Self::Stream, AgentError>> + Send;
}

pub trait FaceDetector: Send + 'static {
    /// Faces visible in the current frame of `stream`.
    fn count_faces<V: VideoStream>(
        &mut self,
        stream: &V,
    ) -> impl Future<Output = Result<usize, AgentError>> + Send;
}

/// Page visibility as reported by the host environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Stops the wrapped stream when dropped.
pub struct StreamGuard<V: VideoStream> {
    stream: V,
}

impl<V: VideoStream> StreamGuard<V> {
    pub fn new(stream: V) -> Self {
        Self { stream }
    }

    pub fn get(&self) -> &V {
        &self.stream
    }
}

impl<V: VideoStream> Drop for StreamGuard<V> {
    fn drop(&mut self) {
        tracing::debug!(track = self.stream.track_id(), "stopping video track");
        self.stream.stop();
    }
}

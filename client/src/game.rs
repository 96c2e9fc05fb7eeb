use crate::buffer::RecentBuffer;
use crate::error::ClientError;
use crate::network::ConnectionManager;
use crate::session::ConnectionView;
use log::debug;
use shared::{Frame, RoomFrame};
use tokio::sync::watch;

/// Frame history together with the stream-end flag
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStream {
    pub frames: RecentBuffer<Frame>,
    pub is_stream_end: bool,
}

impl FrameStream {
    fn from_view(view: &ConnectionView) -> Self {
        Self {
            frames: view.frames.clone(),
            is_stream_end: view.is_stream_end,
        }
    }

    pub fn current(&self) -> Option<&Frame> {
        self.frames.latest()
    }
}

/// Read-only projection of the connection's frame history
///
/// The current frame is always the newest snapshot received. Snapshots
/// replace each other wholesale; nothing is merged.
pub struct FrameReconciler {
    view: watch::Receiver<ConnectionView>,
    last_seen: Option<FrameStream>,
}

impl FrameReconciler {
    pub fn new(manager: &ConnectionManager) -> Self {
        Self::from_receiver(manager.subscribe())
    }

    pub(crate) fn from_receiver(view: watch::Receiver<ConnectionView>) -> Self {
        Self {
            view,
            last_seen: None,
        }
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.view.borrow().current_frame().cloned()
    }

    /// The current frame if it decoded as a known room snapshot
    pub fn current_room(&self) -> Option<RoomFrame> {
        self.view
            .borrow()
            .current_frame()
            .and_then(Frame::room)
            .cloned()
    }

    pub fn is_stream_end(&self) -> bool {
        self.view.borrow().is_stream_end
    }

    pub fn frame_stream(&self) -> FrameStream {
        FrameStream::from_view(&self.view.borrow())
    }

    /// Waits until the frame history or the stream-end flag changes
    ///
    /// Changes to credentials or the message history do not wake this up.
    pub async fn changed(&mut self) -> Result<FrameStream, ClientError> {
        loop {
            let stream = FrameStream::from_view(&self.view.borrow_and_update());
            if self.last_seen.as_ref() != Some(&stream) {
                debug!(
                    "Frame stream changed: {} buffered, stream end {}",
                    stream.frames.len(),
                    stream.is_stream_end
                );
                self.last_seen = Some(stream.clone());
                return Ok(stream);
            }
            self.view.changed().await.map_err(|_| ClientError::Closed)?;
        }
    }
}

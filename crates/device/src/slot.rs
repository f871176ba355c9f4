//! Single-entry frame hand-off between the render scheduler and the link.

use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::Mutex;
use thermal_engine_types::Frame;

/// Holds at most one frame waiting to be sent. A newer frame replaces an
/// older one that has not been picked up yet; producers never block.
pub struct FrameSlot {
    pending: Mutex<Option<Frame>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            pending: Mutex::new(None),
            wake_tx,
            wake_rx,
        }
    }

    /// Store `frame`, returning the frame it replaced, if any.
    pub fn put(&self, frame: Frame) -> Option<Frame> {
        let replaced = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(frame);
        // Full means a wake-up is already queued
        let _ = self.wake_tx.try_send(());
        replaced
    }

    pub fn take(&self) -> Option<Frame> {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    pub fn clear(&self) -> bool {
        self.take().is_some()
    }

    /// Receives a message whenever a frame may be waiting
    pub fn waker(&self) -> &Receiver<()> {
        &self.wake_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_frame_replaces_pending() {
        let slot = FrameSlot::new();
        assert!(slot.put(Frame::solid(1, [0; 4])).is_none());
        let replaced = slot.put(Frame::solid(2, [0; 4])).unwrap();
        assert_eq!(replaced.sequence, 1);
        assert_eq!(slot.take().map(|f| f.sequence), Some(2));
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_wake_is_coalesced() {
        let slot = FrameSlot::new();
        slot.put(Frame::solid(1, [0; 4]));
        slot.put(Frame::solid(2, [0; 4]));
        assert!(slot.waker().try_recv().is_ok());
        assert!(slot.waker().try_recv().is_err());
    }
}

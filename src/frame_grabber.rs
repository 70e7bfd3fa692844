//! Frame-grabber interface.
//!
//! The vendor SDK for the frame grabber is an external
//! collaborator whose interface only is specified here: double-buffered
//! live acquisition over buffers `{1,2}`, a captured-buffer indicator the
//! exposure engine polls, and a copy-out into the mono frame. [`SimulatedGrabber`]
//! is the stand-in implementation used when no real PCIe card is attached
//! (development, CI, the test suite); a production build would add another
//! [`FrameGrabber`] implementor behind the vendor's driver, the same way
//! `ci2` lets `strand-cam` swap in `ci2-pyloncxx`/`ci2-vimba` behind one
//! `Camera` trait.

use crate::buffer::Geometry;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferIndex(pub u8);

pub trait FrameGrabber: Send {
    /// Arm the grabber in double-buffered live-acquisition mode.
    fn arm(&mut self, geometry: Geometry) -> Result<()>;

    /// Disarm (tear down) live acquisition.
    fn disarm(&mut self) -> Result<()>;

    /// Non-blocking poll of the captured-buffer indicator. Returns the
    /// buffer index once a new frame has landed since the last poll, or
    /// `None` if nothing new is ready yet. The caller (exposure engine)
    /// owns the sleep-and-retry loop and the timeout bound.
    fn poll_captured_buffer(&mut self) -> Result<Option<BufferIndex>>;

    /// Copy the pixel data captured in `index` into `dest`, which must be
    /// exactly `geometry.pixel_count()` long.
    fn copy_buffer_into(&mut self, index: BufferIndex, dest: &mut [u16]) -> Result<()>;
}

/// Deterministic stand-in for the vendor SDK: every poll after `arm`
/// immediately reports a fresh buffer (alternating 1/2) filled with a fixed
/// pixel value, so tests and development runs never block on hardware.
pub struct SimulatedGrabber {
    armed: bool,
    geometry: Option<Geometry>,
    next_index: u8,
    pixel_value: u16,
    polls_since_capture: u32,
}

impl SimulatedGrabber {
    pub fn new(pixel_value: u16) -> Self {
        SimulatedGrabber {
            armed: false,
            geometry: None,
            next_index: 1,
            pixel_value,
            polls_since_capture: 0,
        }
    }
}

impl Default for SimulatedGrabber {
    fn default() -> Self {
        SimulatedGrabber::new(100)
    }
}

impl FrameGrabber for SimulatedGrabber {
    fn arm(&mut self, geometry: Geometry) -> Result<()> {
        self.armed = true;
        self.geometry = Some(geometry);
        self.next_index = 1;
        self.polls_since_capture = 0;
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.armed = false;
        self.geometry = None;
        Ok(())
    }

    fn poll_captured_buffer(&mut self) -> Result<Option<BufferIndex>> {
        if !self.armed {
            return Err(Error::transport("frame_grabber", "poll while disarmed"));
        }
        // Simulate "ready on first poll" so callers never actually spin.
        self.polls_since_capture += 1;
        let idx = BufferIndex(self.next_index);
        self.next_index = if self.next_index == 1 { 2 } else { 1 };
        Ok(Some(idx))
    }

    fn copy_buffer_into(&mut self, _index: BufferIndex, dest: &mut [u16]) -> Result<()> {
        if !self.armed {
            return Err(Error::transport("frame_grabber", "copy while disarmed"));
        }
        let geometry = self.geometry.ok_or_else(|| {
            Error::transport("frame_grabber", "copy before geometry established")
        })?;
        if dest.len() != geometry.pixel_count() {
            return Err(Error::transport(
                "frame_grabber",
                "destination buffer size mismatch",
            ));
        }
        dest.iter_mut().for_each(|p| *p = self.pixel_value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_grabber_requires_arm_before_poll() {
        let mut g = SimulatedGrabber::default();
        assert!(g.poll_captured_buffer().is_err());
        g.arm(Geometry { width: 2, height: 2 }).unwrap();
        assert!(g.poll_captured_buffer().unwrap().is_some());
    }

    #[test]
    fn simulated_grabber_alternates_buffers() {
        let mut g = SimulatedGrabber::default();
        g.arm(Geometry { width: 1, height: 1 }).unwrap();
        let a = g.poll_captured_buffer().unwrap().unwrap();
        let b = g.poll_captured_buffer().unwrap().unwrap();
        assert_ne!(a, b);
    }
}

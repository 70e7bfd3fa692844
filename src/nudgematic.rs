//! Nudgematic controller: a discrete dither stage with a
//! configurable offset size and an index cycling `0..POSITION_COUNT-1`,
//! advanced once per exposure inside a multrun. `set_position` blocks until
//! a "settled" input line reads true or a configured timeout expires, same
//! mutex-per-round-trip discipline as the filter wheel.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::NudgematicConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSize {
    None,
    Small,
    Large,
}

/// USB-PIO transport, an external collaborator.
/// `drive` writes the digital-output pattern for a position; `settled`
/// reads the settle input line.
pub trait NudgematicTransport: Send {
    fn drive(&mut self, pattern: u32) -> Result<()>;
    fn settled(&mut self) -> Result<bool>;
}

/// Reports settled after `settle_polls` calls to `settled()` following the
/// most recent `drive`.
pub struct SimulatedNudgematicTransport {
    polls_since_drive: u32,
    settle_polls: u32,
}

impl SimulatedNudgematicTransport {
    pub fn new(settle_polls: u32) -> Self {
        SimulatedNudgematicTransport {
            polls_since_drive: 0,
            settle_polls,
        }
    }
}

impl NudgematicTransport for SimulatedNudgematicTransport {
    fn drive(&mut self, _pattern: u32) -> Result<()> {
        self.polls_since_drive = 0;
        Ok(())
    }

    fn settled(&mut self) -> Result<bool> {
        self.polls_since_drive += 1;
        Ok(self.polls_since_drive >= self.settle_polls)
    }
}

pub struct NudgematicController {
    transport: Mutex<Box<dyn NudgematicTransport>>,
    position_count: u32,
    settle_timeout: Duration,
    offset_size: Mutex<OffsetSize>,
    /// Table owned by the driver mapping index -> concrete digital-output
    /// pattern. A simple index-as-pattern table suffices
    /// absent a documented real mapping; a production build would replace
    /// this with the wiring-specific table.
    pattern_table: Vec<u32>,
    last_position: Mutex<Option<u32>>,
}

impl NudgematicController {
    pub fn new(config: &NudgematicConfig, transport: Box<dyn NudgematicTransport>) -> Self {
        let pattern_table = (0..config.position_count).collect();
        NudgematicController {
            transport: Mutex::new(transport),
            position_count: config.position_count,
            settle_timeout: Duration::from_millis(config.settle_timeout_ms),
            offset_size: Mutex::new(OffsetSize::None),
            pattern_table,
            last_position: Mutex::new(None),
        }
    }

    pub fn position_count(&self) -> u32 {
        self.position_count
    }

    /// Last index commanded by [`Self::set_position`], for `status
    /// nudgematic position`. `None` until the first move.
    pub fn last_position(&self) -> Option<u32> {
        *self.last_position.lock()
    }

    pub fn set_offset_size(&self, size: OffsetSize) {
        *self.offset_size.lock() = size;
    }

    pub fn offset_size(&self) -> OffsetSize {
        *self.offset_size.lock()
    }

    /// Blocking move to `index` (`0..POSITION_COUNT-1`): drive the pattern,
    /// then poll the settle line until true or the configured timeout.
    pub fn set_position(&self, index: u32) -> Result<()> {
        if index >= self.position_count {
            return Err(Error::ArgumentRange(format!(
                "nudgematic position {index} out of range 0..{}",
                self.position_count
            )));
        }
        let pattern = self.pattern_table[index as usize];
        {
            let mut transport = self.transport.lock();
            transport.drive(pattern)?;
        }
        let started = Instant::now();
        loop {
            let settled = {
                let mut transport = self.transport.lock();
                transport.settled()?
            };
            if settled {
                *self.last_position.lock() = Some(index);
                return Ok(());
            }
            if started.elapsed() >= self.settle_timeout {
                return Err(Error::Timeout {
                    device: "nudgematic",
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    limit_ms: self.settle_timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NudgematicConfig {
        NudgematicConfig {
            enable: true,
            device_name: "/dev/fake".into(),
            position_count: 9,
            settle_timeout_ms: 1000,
        }
    }

    #[test]
    fn set_position_settles_within_timeout() {
        let ctrl = NudgematicController::new(
            &config(),
            Box::new(SimulatedNudgematicTransport::new(2)),
        );
        ctrl.set_position(3).unwrap();
        assert_eq!(ctrl.last_position(), Some(3));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let ctrl = NudgematicController::new(
            &config(),
            Box::new(SimulatedNudgematicTransport::new(1)),
        );
        assert!(ctrl.set_position(9).is_err());
    }

    #[test]
    fn offset_size_round_trips() {
        let ctrl = NudgematicController::new(
            &config(),
            Box::new(SimulatedNudgematicTransport::new(1)),
        );
        assert_eq!(ctrl.offset_size(), OffsetSize::None);
        ctrl.set_offset_size(OffsetSize::Large);
        assert_eq!(ctrl.offset_size(), OffsetSize::Large);
    }
}

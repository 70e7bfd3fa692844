//! Filter-wheel driver.
//!
//! Holds the device handle behind a mutex acquired per round trip (not for
//! the whole move), a configured move timeout, and the static
//! position->(name, id) table loaded once at startup. The per-iteration
//! mutex acquisition is deliberate: it lets `status
//! filterwheel` calls from other threads interleave with an in-progress
//! move, same discipline as `ci2`'s device handles folding the lock into the
//! type that owns the hardware.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::FilterWheelConfig;
use crate::error::{Error, Result};

/// Two-byte request/reply HID transport. The HID
/// transport itself as an external collaborator; this trait is the whole of
/// its interface as seen by the driver.
pub trait FilterWheelTransport: Send {
    fn round_trip(&mut self, request: [u8; 2]) -> Result<[u8; 2]>;
}

const REQUEST_MOVE: u8 = 0x01;
const REQUEST_QUERY: u8 = 0x00;

/// A moving-in-place transport simulator: after `steps_to_arrive` round
/// trips requesting the same target, it reports arrival. Stands in for the
/// HID device absent real hardware.
pub struct SimulatedFilterWheelTransport {
    current_position: u8,
    steps_remaining: u8,
}

impl SimulatedFilterWheelTransport {
    pub fn new(initial_position: u8) -> Self {
        SimulatedFilterWheelTransport {
            current_position: initial_position,
            steps_remaining: 0,
        }
    }
}

impl FilterWheelTransport for SimulatedFilterWheelTransport {
    fn round_trip(&mut self, request: [u8; 2]) -> Result<[u8; 2]> {
        match request[0] {
            REQUEST_QUERY => Ok([self.current_position, 0]),
            REQUEST_MOVE => {
                let target = request[1];
                if target == self.current_position {
                    return Ok([self.current_position, 0]);
                }
                if self.steps_remaining == 0 {
                    self.steps_remaining = 2;
                }
                self.steps_remaining -= 1;
                if self.steps_remaining == 0 {
                    self.current_position = target;
                    Ok([self.current_position, 0])
                } else {
                    Ok([0, 0])
                }
            }
            other => Err(Error::transport(
                "filter_wheel",
                format!("unknown request byte {other:#x}"),
            )),
        }
    }
}

pub struct FilterWheelDriver {
    transport: Mutex<Box<dyn FilterWheelTransport>>,
    move_timeout: Duration,
    count: u32,
    names: Vec<(u32, String)>,
}

impl FilterWheelDriver {
    pub fn new(config: &FilterWheelConfig, transport: Box<dyn FilterWheelTransport>) -> Self {
        let mut names: Vec<(u32, String)> = config
            .filter
            .name
            .iter()
            .map(|(pos, name)| (*pos, name.clone()))
            .collect();
        names.sort_by_key(|(pos, _)| *pos);
        FilterWheelDriver {
            transport: Mutex::new(transport),
            move_timeout: Duration::from_millis(config.move_timeout_ms),
            count: config.filter.len() as u32,
            names,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Resolve a configured filter name to its 1-based position.
    pub fn position_for_name(&self, name: &str) -> Result<u32> {
        self.names
            .iter()
            .find(|(_, n)| n == name)
            .map(|(pos, _)| *pos)
            .ok_or_else(|| Error::ArgumentRange(format!("unknown filter name '{name}'")))
    }

    fn round_trip(&self, request: [u8; 2]) -> Result<[u8; 2]> {
        let mut transport = self.transport.lock();
        transport.round_trip(request)
    }

    /// Blocking move to `position` (1-based): poll every
    /// ~10ms, acquiring the device mutex only for each individual round
    /// trip, until the wheel reports `position` or the configured timeout
    /// elapses.
    pub fn move_to(&self, position: u32) -> Result<()> {
        if position < 1 || position > self.count {
            return Err(Error::ArgumentRange(format!(
                "filter wheel position {position} out of range 1..={}",
                self.count
            )));
        }
        let started = Instant::now();
        loop {
            let reply = self.round_trip([REQUEST_MOVE, position as u8])?;
            if reply[0] as u32 == position {
                return Ok(());
            }
            if started.elapsed() >= self.move_timeout {
                return Err(Error::Timeout {
                    device: "filter_wheel",
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    limit_ms: self.move_timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Query the current position. `0` means "moving".
    pub fn get_position(&self) -> Result<u8> {
        let reply = self.round_trip([REQUEST_QUERY, 0])?;
        Ok(reply[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> FilterWheelConfig {
        let mut name = BTreeMap::new();
        name.insert(1, "Mirror".to_string());
        name.insert(2, "clear".to_string());
        let mut id = BTreeMap::new();
        id.insert(1, "0".to_string());
        id.insert(2, "1".to_string());
        FilterWheelConfig {
            enable: true,
            device_name: "/dev/fake".into(),
            filter: crate::config::FilterTable { name, id },
            move_timeout_ms: 1000,
        }
    }

    #[test]
    fn move_then_get_position_agree() {
        let driver = FilterWheelDriver::new(
            &config(),
            Box::new(SimulatedFilterWheelTransport::new(1)),
        );
        driver.move_to(2).unwrap();
        assert_eq!(driver.get_position().unwrap(), 2);
    }

    #[test]
    fn rejects_out_of_range_position() {
        let driver = FilterWheelDriver::new(
            &config(),
            Box::new(SimulatedFilterWheelTransport::new(1)),
        );
        assert!(driver.move_to(0).is_err());
        assert!(driver.move_to(99).is_err());
    }

    #[test]
    fn resolves_name_to_position() {
        let driver = FilterWheelDriver::new(
            &config(),
            Box::new(SimulatedFilterWheelTransport::new(1)),
        );
        assert_eq!(driver.position_for_name("Mirror").unwrap(), 1);
        assert!(driver.position_for_name("nonexistent").is_err());
    }
}

//! Detector configure / temperature / fan / TEC control.
//!
//! One mutex on the in-camera serial channel, the same discipline as the
//! filter wheel and nudgematic: acquired per round trip, never held across a
//! whole operation. `reconfigure` ties the detector connection, the format
//! description file, and the exposure engine's coadd frame length together;
//! callers are required to hold normal priority and never call it
//! while an observation is in progress — enforced by the caller
//! ([`crate::instrument::Instrument`]), not here.

use parking_lot::Mutex;

use crate::config::{CoaddExposureLengths, TemperatureCalibration as TemperatureCalibrationConfig};
use crate::error::Result;

/// In-camera serial channel, an external
/// collaborator. `read_adc` returns the raw temperature ADC counts;
/// `read_control_byte`/`write_control_byte` implement the read-modify-write
/// needed to flip single fan/TEC bits without disturbing the others.
pub trait DetectorSerialTransport: Send {
    fn read_adc(&mut self) -> Result<i32>;
    fn read_control_byte(&mut self) -> Result<u8>;
    fn write_control_byte(&mut self, value: u8) -> Result<()>;
    /// Write the TEC setpoint DAC register.
    fn write_dac(&mut self, value: i32) -> Result<()>;
}

pub struct SimulatedSerialTransport {
    adc: i32,
    control_byte: u8,
    dac: i32,
}

impl SimulatedSerialTransport {
    pub fn new(adc: i32) -> Self {
        SimulatedSerialTransport {
            adc,
            control_byte: 0,
            dac: 0,
        }
    }
}

impl DetectorSerialTransport for SimulatedSerialTransport {
    fn read_adc(&mut self) -> Result<i32> {
        Ok(self.adc)
    }
    fn read_control_byte(&mut self) -> Result<u8> {
        Ok(self.control_byte)
    }
    fn write_control_byte(&mut self, value: u8) -> Result<()> {
        self.control_byte = value;
        Ok(())
    }
    fn write_dac(&mut self, value: i32) -> Result<()> {
        self.dac = value;
        Ok(())
    }
}

const FAN_BIT: u8 = 0b0000_0001;
const TEC_BIT: u8 = 0b0000_0010;

/// Affine ADC<->degC map derived once at startup from four calibration
/// integers, per `detector_temperature.c`'s `Detector_Temperature_Initialise`:
/// `temp = adc * slope + intercept`, solved from two reference points
/// (0 degC, 40 degC).
#[derive(Debug, Clone, Copy)]
pub struct TemperatureCalibration {
    adc_slope: f64,
    adc_intercept: f64,
    dac_slope: f64,
    dac_intercept: f64,
}

impl TemperatureCalibration {
    pub fn from_config(cfg: &TemperatureCalibrationConfig) -> Self {
        let adc_slope = -40.0 / f64::from(cfg.adc_zero_c - cfg.adc_forty_c);
        let adc_intercept = 40.0 - adc_slope * f64::from(cfg.adc_forty_c);
        let dac_slope = -40.0 / f64::from(cfg.dac_zero_c - cfg.dac_forty_c);
        let dac_intercept = 40.0 - dac_slope * f64::from(cfg.dac_forty_c);
        TemperatureCalibration {
            adc_slope,
            adc_intercept,
            dac_slope,
            dac_intercept,
        }
    }

    pub fn adc_to_celsius(&self, adc: i32) -> f64 {
        f64::from(adc) * self.adc_slope + self.adc_intercept
    }

    pub fn celsius_to_dac(&self, celsius: f64) -> i32 {
        ((celsius - self.dac_intercept) / self.dac_slope).round() as i32
    }
}

pub struct Detector {
    serial: Mutex<Box<dyn DetectorSerialTransport>>,
    calibration: TemperatureCalibration,
    coadd_lengths: CoaddExposureLengths,
    coadd_frame_length_ms: Mutex<u32>,
    setpoint_celsius: Mutex<Option<f64>>,
}

impl Detector {
    pub fn new(
        serial: Box<dyn DetectorSerialTransport>,
        calibration: TemperatureCalibration,
        coadd_lengths: CoaddExposureLengths,
    ) -> Self {
        let initial = coadd_lengths.long;
        Detector {
            serial: Mutex::new(serial),
            calibration,
            coadd_lengths,
            coadd_frame_length_ms: Mutex::new(initial),
            setpoint_celsius: Mutex::new(None),
        }
    }

    pub fn coadd_frame_length_ms(&self) -> u32 {
        *self.coadd_frame_length_ms.lock()
    }

    /// Reconfigure the detector's coadd frame length from a tag
    /// (`short`/`long`/`bias`). Tears down and reopens the detector
    /// connection against a format file derived from the resolved
    /// millisecond value in the real implementation; the simulated
    /// transport has no connection state to cycle, so this only updates the
    /// frame length the exposure engine will use.
    pub fn reconfigure(&self, tag: &str) -> Result<()> {
        let ms = self.coadd_lengths.resolve(tag)?;
        *self.coadd_frame_length_ms.lock() = ms;
        tracing::info!(tag, ms, "detector reconfigured");
        Ok(())
    }

    pub fn get_temperature_celsius(&self) -> Result<f64> {
        let adc = {
            let mut serial = self.serial.lock();
            serial.read_adc()?
        };
        Ok(self.calibration.adc_to_celsius(adc))
    }

    pub fn celsius_to_dac(&self, celsius: f64) -> i32 {
        self.calibration.celsius_to_dac(celsius)
    }

    /// `temperature <degrees_C>`: convert to a DAC count via
    /// the calibration map and write the TEC setpoint register.
    pub fn set_temperature_setpoint(&self, celsius: f64) -> Result<()> {
        let dac = self.calibration.celsius_to_dac(celsius);
        self.serial.lock().write_dac(dac)?;
        *self.setpoint_celsius.lock() = Some(celsius);
        Ok(())
    }

    /// Last TEC setpoint written by [`Self::set_temperature_setpoint`], for
    /// the `CCDSTEMP` FITS header. `None` until the first setpoint write.
    pub fn setpoint_celsius(&self) -> Option<f64> {
        *self.setpoint_celsius.lock()
    }

    pub fn set_fan(&self, on: bool) -> Result<()> {
        self.set_control_bit(FAN_BIT, on)
    }

    pub fn set_tec(&self, on: bool) -> Result<()> {
        self.set_control_bit(TEC_BIT, on)
    }

    pub fn fan_status(&self) -> Result<bool> {
        Ok(self.serial.lock().read_control_byte()? & FAN_BIT != 0)
    }

    pub fn tec_status(&self) -> Result<bool> {
        Ok(self.serial.lock().read_control_byte()? & TEC_BIT != 0)
    }

    fn set_control_bit(&self, bit: u8, on: bool) -> Result<()> {
        let mut serial = self.serial.lock();
        let current = serial.read_control_byte()?;
        let updated = if on { current | bit } else { current & !bit };
        serial.write_control_byte(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemperatureCalibration as TemperatureCalibrationConfig;

    fn cal() -> TemperatureCalibration {
        TemperatureCalibration::from_config(&TemperatureCalibrationConfig {
            adc_zero_c: 2048,
            adc_forty_c: 1024,
            dac_zero_c: 512,
            dac_forty_c: 768,
        })
    }

    fn lengths() -> CoaddExposureLengths {
        CoaddExposureLengths {
            short: 100,
            long: 1000,
            bias: 14,
        }
    }

    #[test]
    fn adc_to_celsius_matches_reference_points() {
        let cal = cal();
        assert!((cal.adc_to_celsius(2048) - 0.0).abs() < 1e-9);
        assert!((cal.adc_to_celsius(1024) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn reconfigure_resolves_tag_to_configured_length() {
        let det = Detector::new(Box::new(SimulatedSerialTransport::new(2048)), cal(), lengths());
        det.reconfigure("bias").unwrap();
        assert_eq!(det.coadd_frame_length_ms(), 14);
        det.reconfigure("short").unwrap();
        assert_eq!(det.coadd_frame_length_ms(), 100);
        assert!(det.reconfigure("unknown").is_err());
    }

    #[test]
    fn fan_and_tec_bits_are_independent() {
        let det = Detector::new(Box::new(SimulatedSerialTransport::new(2048)), cal(), lengths());
        det.set_fan(true).unwrap();
        assert!(det.fan_status().unwrap());
        assert!(!det.tec_status().unwrap());
        det.set_tec(true).unwrap();
        assert!(det.fan_status().unwrap());
        assert!(det.tec_status().unwrap());
        det.set_fan(false).unwrap();
        assert!(!det.fan_status().unwrap());
        assert!(det.tec_status().unwrap());
    }

    #[test]
    fn temperature_reads_through_calibration() {
        let det = Detector::new(Box::new(SimulatedSerialTransport::new(2048)), cal(), lengths());
        assert!((det.get_temperature_celsius().unwrap() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn setpoint_write_does_not_error() {
        let det = Detector::new(Box::new(SimulatedSerialTransport::new(2048)), cal(), lengths());
        det.set_temperature_setpoint(-20.0).unwrap();
    }

    #[test]
    fn setpoint_celsius_tracks_last_write() {
        let det = Detector::new(Box::new(SimulatedSerialTransport::new(2048)), cal(), lengths());
        assert_eq!(det.setpoint_celsius(), None);
        det.set_temperature_setpoint(-20.0).unwrap();
        assert_eq!(det.setpoint_celsius(), Some(-20.0));
    }
}

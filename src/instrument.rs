//! The `Instrument` coordinator.
//!
//! "Global mutable singletons" (the FITS header store,
//! the filename sequencer, the observation state, the temperature
//! calibration) as a pattern needing re-architecture: "a single 'Instrument'
//! owns these and lends them to handlers for the duration of a call." This
//! is that object. It owns every device and every piece of shared state;
//! command handlers borrow it, never reach around it to a global.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::Geometry;
use crate::config::Config;
use crate::detector::{Detector, TemperatureCalibration};
use crate::error::Result;
use crate::exposure::ExposureEngine;
use crate::filename_sequencer::FilenameSequencer;
use crate::filter_wheel::FilterWheelDriver;
use crate::fits_header::FitsHeaderStore;
use crate::frame_grabber::FrameGrabber;
use crate::nudgematic::NudgematicController;
use crate::state::ProcessState;

pub const MIRROR_FILTER_NAME: &str = "Mirror";

pub struct Instrument {
    pub config: Config,
    pub state: Arc<ProcessState>,
    pub header_store: Mutex<FitsHeaderStore>,
    pub sequencer: Mutex<FilenameSequencer>,
    pub filter_wheel: Option<FilterWheelDriver>,
    pub nudgematic: Option<NudgematicController>,
    pub detector: Detector,
    pub exposure_engine: ExposureEngine,
    /// Position the filter wheel was last commanded to by `config filter`,
    /// used to populate `FILTER1`/`FILTERI1` headers for multrun (which
    /// does not move the wheel itself).
    pub current_filter_position: Mutex<Option<u32>>,
}

impl Instrument {
    pub fn new(
        config: Config,
        frame_grabber: Box<dyn FrameGrabber>,
        geometry: Geometry,
        filter_wheel: Option<FilterWheelDriver>,
        nudgematic: Option<NudgematicController>,
        detector_serial: Box<dyn crate::detector::DetectorSerialTransport>,
    ) -> Result<Self> {
        let sequencer = FilenameSequencer::initialise(
            &config.file.fits.instrument_code,
            &config.file.fits.path,
            chrono::Utc::now(),
        )?;
        let calibration = TemperatureCalibration::from_config(&config.detector.temperature);
        let detector = Detector::new(detector_serial, calibration, config.detector.coadd_exposure_length.clone());
        let exposure_engine = ExposureEngine::new(frame_grabber, geometry);

        Ok(Instrument {
            config,
            state: Arc::new(ProcessState::new()),
            header_store: Mutex::new(FitsHeaderStore::new()),
            sequencer: Mutex::new(sequencer),
            filter_wheel,
            nudgematic,
            detector,
            exposure_engine,
            current_filter_position: Mutex::new(None),
        })
    }

    pub fn filter_name_for_position(&self, position: u32) -> Option<String> {
        self.config
            .filter_wheel
            .filter
            .name
            .get(&position)
            .cloned()
    }

    pub fn filter_id_for_position(&self, position: u32) -> Option<String> {
        self.config.filter_wheel.filter.id.get(&position).cloned()
    }

    /// Move the filter wheel to the position named `"Mirror"`, required
    /// before bias/dark even though the detector is logically dark-closed
    /// for bias — the purpose is reproducibility of calibration conditions
    /// (see the observation controller).
    pub fn move_to_mirror(&self) -> Result<()> {
        if let Some(wheel) = &self.filter_wheel {
            let position = wheel.position_for_name(MIRROR_FILTER_NAME)?;
            wheel.move_to(position)?;
            *self.current_filter_position.lock() = Some(position);
        }
        Ok(())
    }
}

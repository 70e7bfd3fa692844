//! Observation controller: Multrun/MultBias/MultDark. Three
//! handlers sharing one skeleton, implemented here as three free functions
//! operating on a borrowed [`Instrument`] rather than three duplicated
//! state machines.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::exposure::ExposureRequest;
use crate::filename_sequencer::{ExposureType, Pipeline};
use crate::fits_header::FitsHeaderStore;
use crate::instrument::Instrument;
use crate::nudgematic::OffsetSize;
use crate::state::InProgress;

pub struct ObservationResult {
    pub multrun: u32,
    pub filenames: Vec<String>,
}

/// `multrun <length_ms> <count> <standard>`.
pub fn run_multrun(
    instrument: &Instrument,
    length_ms: u32,
    count: u32,
    standard: bool,
) -> Result<ObservationResult> {
    validate_args(length_ms, count)?;
    let coadd_frame_length_ms = instrument.detector.coadd_frame_length_ms();
    if length_ms < coadd_frame_length_ms {
        return Err(Error::ArgumentRange(format!(
            "length_ms {length_ms} shorter than coadd_frame_length_ms {coadd_frame_length_ms}"
        )));
    }

    instrument.state.begin_observation(InProgress::Multrun)?;
    let outcome = run_loop(instrument, RunKind::Multrun { standard }, length_ms, count);
    instrument.state.end_observation();
    outcome
}

/// `multbias <count>`: filter wheel to Mirror, detector
/// reconfigured to its minimum coadd frame length, each exposure a single
/// coadd.
pub fn run_multbias(instrument: &Instrument, count: u32) -> Result<ObservationResult> {
    validate_args(1, count)?;
    instrument.state.begin_observation(InProgress::BiasDark)?;
    let outcome = (|| {
        instrument.move_to_mirror()?;
        instrument.detector.reconfigure("bias")?;
        run_loop(instrument, RunKind::Bias, instrument.detector.coadd_frame_length_ms(), count)
    })();
    instrument.state.end_observation();
    outcome
}

/// `multdark <length_ms> <count>`: filter wheel to Mirror,
/// full-length exposures classified as dark frames.
pub fn run_multdark(instrument: &Instrument, length_ms: u32, count: u32) -> Result<ObservationResult> {
    validate_args(length_ms, count)?;
    let coadd_frame_length_ms = instrument.detector.coadd_frame_length_ms();
    if length_ms < coadd_frame_length_ms {
        return Err(Error::ArgumentRange(format!(
            "length_ms {length_ms} shorter than coadd_frame_length_ms {coadd_frame_length_ms}"
        )));
    }

    instrument.state.begin_observation(InProgress::BiasDark)?;
    let outcome = (|| {
        instrument.move_to_mirror()?;
        run_loop(instrument, RunKind::Dark, length_ms, count)
    })();
    instrument.state.end_observation();
    outcome
}

fn validate_args(length_ms: u32, count: u32) -> Result<()> {
    if length_ms < 1 {
        return Err(Error::ArgumentRange("length_ms must be >= 1".into()));
    }
    if count < 1 {
        return Err(Error::ArgumentRange("count must be >= 1".into()));
    }
    Ok(())
}

enum RunKind {
    Multrun { standard: bool },
    Bias,
    Dark,
}

impl RunKind {
    fn exposure_type(&self) -> ExposureType {
        match self {
            RunKind::Multrun { standard: true } => ExposureType::Standard,
            RunKind::Multrun { standard: false } => ExposureType::Exposure,
            RunKind::Bias => ExposureType::Bias,
            RunKind::Dark => ExposureType::Dark,
        }
    }

    fn obstype_keyword(&self) -> &'static str {
        match self {
            RunKind::Multrun { standard: true } => "STANDARD",
            RunKind::Multrun { standard: false } => "EXPOSE",
            RunKind::Bias => "BIAS",
            RunKind::Dark => "DARK",
        }
    }
}

fn run_loop(
    instrument: &Instrument,
    kind: RunKind,
    length_ms: u32,
    count: u32,
) -> Result<ObservationResult> {
    let flip_x = instrument.config.liric.multrun.image.flip.x;
    let flip_y = instrument.config.liric.multrun.image.flip.y;

    let multrun_number = {
        let mut sequencer = instrument.sequencer.lock();
        sequencer.next_multrun(Utc::now());
        sequencer.multrun()
    };

    install_multrun_headers(instrument, &kind, count, multrun_number);

    let multrun_start = Utc::now();
    let mut filenames = Vec::with_capacity(count as usize);

    for i in 0..count {
        if instrument.state.abort_requested() {
            return Err(Error::Aborted);
        }

        if matches!(kind, RunKind::Multrun { .. }) {
            if let Some(nudgematic) = &instrument.nudgematic {
                let index = i % nudgematic.position_count();
                nudgematic.set_position(index)?;
            }
        }

        let (fits_path, run_number) = {
            let mut sequencer = instrument.sequencer.lock();
            sequencer.next_run();
            (sequencer.path_for(kind.exposure_type(), Pipeline::Unreduced), sequencer.run())
        };

        if instrument.state.abort_requested() {
            return Err(Error::Aborted);
        }

        let per_exposure_header =
            build_exposure_headers(instrument, &kind, multrun_number, run_number, count, multrun_start);

        let exposure_length = match kind {
            RunKind::Bias => instrument.detector.coadd_frame_length_ms(),
            _ => length_ms,
        };

        let request = ExposureRequest {
            length_ms: exposure_length,
            coadd_frame_length_ms: instrument.detector.coadd_frame_length_ms(),
            fits_path: &fits_path,
            header: &per_exposure_header,
            flip_x,
            flip_y,
            multrun: multrun_number,
            run: run_number,
        };

        instrument.exposure_engine.expose(request, &instrument.state)?;

        filenames.push(fits_path.display().to_string());
    }

    Ok(ObservationResult {
        multrun: multrun_number,
        filenames,
    })
}

/// Headers visible to every exposure in the multrun, installed once before
/// the loop starts (an ordering guarantee): the persistent header
/// store (whatever `fitsheader add` built up before this command) cloned as
/// the base that per-exposure headers are layered onto.
fn install_multrun_headers(
    instrument: &Instrument,
    kind: &RunKind,
    count: u32,
    multrun_number: u32,
) {
    let mut store = instrument.header_store.lock();
    store.add_string("OBSTYPE", kind.obstype_keyword(), None);
    store.add_int("EXPTOTAL", i64::from(count), None);
    store.add_int("RUNNUM", i64::from(multrun_number), None);
}

fn build_exposure_headers(
    instrument: &Instrument,
    kind: &RunKind,
    multrun_number: u32,
    run_number: u32,
    count: u32,
    _multrun_start: DateTime<Utc>,
) -> FitsHeaderStore {
    // Headers added by `fitsheader add` before the multrun (or during it,
    // before this exposure's header-emit phase) are visible from here on
    // clone the shared store as the starting point.
    let mut header = instrument.header_store.lock().clone();

    header.add_string("OBSTYPE", kind.obstype_keyword(), None);
    header.add_int("RUNNUM", i64::from(multrun_number), None);
    header.add_int("EXPNUM", i64::from(run_number), None);
    header.add_int("EXPTOTAL", i64::from(count), None);

    if let Some(position) = *instrument.current_filter_position.lock() {
        if let Some(name) = instrument.filter_name_for_position(position) {
            header.add_string("FILTER1", &name, None);
        }
        if let Some(id) = instrument.filter_id_for_position(position) {
            header.add_string("FILTERI1", &id, None);
        }
    }

    if let Ok(temp_c) = instrument.detector.get_temperature_celsius() {
        header.add_float("CCDATEMP", temp_c + 273.15, Some("Kelvin"));
    }
    if let Some(setpoint_c) = instrument.detector.setpoint_celsius() {
        header.add_float("CCDSTEMP", setpoint_c + 273.15, Some("Kelvin"));
    }

    let geometry = instrument.exposure_engine.geometry();
    header.add_int("CCDXBIN", 1, None);
    header.add_int("CCDYBIN", 1, None);
    header.add_bool("CCDWMODE", false, None);
    header.add_int("CCDXIMSI", geometry.width as i64, None);
    header.add_int("CCDYIMSI", geometry.height as i64, None);
    header.add_int("CCDWXOFF", 0, None);
    header.add_int("CCDWYOFF", 0, None);
    header.add_int("CCDWXSIZ", geometry.width as i64, None);
    header.add_int("CCDWYSIZ", geometry.height as i64, None);

    header
}

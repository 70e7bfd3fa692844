//! Exposure engine: the coadded-exposure pipeline. Converts
//! one "exposure of length `length_ms`" into `coadd_count` frame-grabber
//! frames, sums them, means them, and writes a FITS file.
//!
//! Status reads (`status exposure ...`) never touch the frame grabber while
//! an exposure is running: the frame grabber must never see a blocking
//! call from a status thread while an exposure is running. Of the two ways
//! we take the safer default: a snapshot of exposure status is captured at
//! exposure start and updated from inside the coadd loop by the exposure
//! thread itself; other threads only ever read the snapshot.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::buffer::{CoaddBufferSet, Geometry};
use crate::error::{Error, Result};
use crate::fits_header::FitsHeaderStore;
use crate::fits_io::{self, ReservedKeys};
use crate::frame_grabber::FrameGrabber;
use crate::state::ProcessState;

const POLL_INTERVAL: Duration = Duration::from_micros(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureStatusKind {
    Idle,
    Exposing,
    PostProcessing,
}

#[derive(Debug, Clone)]
pub struct ExposureStatusSnapshot {
    pub status: ExposureStatusKind,
    pub count: u32,
    pub length_ms: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub index: u32,
    pub multrun: u32,
    pub run: u32,
    pub last_fits_filename: Option<String>,
}

impl Default for ExposureStatusSnapshot {
    fn default() -> Self {
        ExposureStatusSnapshot {
            status: ExposureStatusKind::Idle,
            count: 0,
            length_ms: 0,
            start_time: None,
            index: 0,
            multrun: 0,
            run: 0,
            last_fits_filename: None,
        }
    }
}

pub struct ExposureEngine {
    grabber: Mutex<Box<dyn FrameGrabber>>,
    buffer: Mutex<CoaddBufferSet>,
    status: Mutex<ExposureStatusSnapshot>,
}

pub struct ExposureRequest<'a> {
    pub length_ms: u32,
    pub coadd_frame_length_ms: u32,
    pub fits_path: &'a Path,
    pub header: &'a FitsHeaderStore,
    pub flip_x: bool,
    pub flip_y: bool,
    pub multrun: u32,
    pub run: u32,
}

impl ExposureEngine {
    pub fn new(grabber: Box<dyn FrameGrabber>, geometry: Geometry) -> Self {
        ExposureEngine {
            grabber: Mutex::new(grabber),
            buffer: Mutex::new(CoaddBufferSet::new(geometry)),
            status: Mutex::new(ExposureStatusSnapshot::default()),
        }
    }

    pub fn status_snapshot(&self) -> ExposureStatusSnapshot {
        self.status.lock().clone()
    }

    /// The sensor geometry the coadd buffers are currently sized for, used
    /// to populate the `CCDXIMSI`/`CCDYIMSI`/`CCDWXSIZ`/`CCDWYSIZ` FITS
    /// headers.
    pub fn geometry(&self) -> Geometry {
        self.buffer.lock().geometry()
    }

    /// Run one exposure end to end: acquire, coadd, mean, write. Checks
    /// `process_state.abort_requested()` between coadds (the
    /// enumerated abort read site "between coadds inside the exposure
    /// engine").
    pub fn expose(&self, req: ExposureRequest<'_>, process_state: &ProcessState) -> Result<()> {
        let coadd_count = req.length_ms / req.coadd_frame_length_ms;
        if coadd_count < 1 {
            return Err(Error::ArgumentRange(format!(
                "length_ms {} shorter than coadd_frame_length_ms {}",
                req.length_ms, req.coadd_frame_length_ms
            )));
        }

        let geometry = self.buffer.lock().geometry();
        let start_time = Utc::now();

        {
            let mut status = self.status.lock();
            status.status = ExposureStatusKind::Exposing;
            status.count = coadd_count;
            status.length_ms = req.length_ms;
            status.start_time = Some(start_time);
            status.index = 0;
            status.multrun = req.multrun;
            status.run = req.run;
        }

        let result = self.run_coadds(coadd_count, req.coadd_frame_length_ms, process_state);

        if let Err(e) = result {
            self.grabber.lock().disarm().ok();
            self.status.lock().status = ExposureStatusKind::Idle;
            return Err(e);
        }

        self.grabber.lock().disarm()?;

        {
            let mut status = self.status.lock();
            status.status = ExposureStatusKind::PostProcessing;
        }

        let mean: Vec<f64> = {
            let mut buffer = self.buffer.lock();
            buffer.compute_mean(coadd_count, req.flip_x, req.flip_y).to_vec()
        };

        let exptime_sec = f64::from(coadd_count) * f64::from(req.coadd_frame_length_ms) / 1000.0;
        let coadd_sec = f64::from(req.coadd_frame_length_ms) / 1000.0;

        let write_result = self.write_output(
            req.fits_path,
            geometry,
            &mean,
            req.header,
            start_time,
            exptime_sec,
            coadd_sec,
            coadd_count,
        );

        let mut status = self.status.lock();
        status.status = ExposureStatusKind::Idle;
        if write_result.is_ok() {
            status.last_fits_filename = Some(req.fits_path.display().to_string());
        }
        drop(status);

        write_result
    }

    /// Convenience wrapper for bias exposures: a single coadd at the
    /// minimum frame length.
    pub fn expose_bias(
        &self,
        coadd_frame_length_ms: u32,
        fits_path: &Path,
        header: &FitsHeaderStore,
        flip_x: bool,
        flip_y: bool,
        multrun: u32,
        run: u32,
        process_state: &ProcessState,
    ) -> Result<()> {
        self.expose(
            ExposureRequest {
                length_ms: coadd_frame_length_ms,
                coadd_frame_length_ms,
                fits_path,
                header,
                flip_x,
                flip_y,
                multrun,
                run,
            },
            process_state,
        )
    }

    fn run_coadds(
        &self,
        coadd_count: u32,
        coadd_frame_length_ms: u32,
        process_state: &ProcessState,
    ) -> Result<()> {
        let geometry = self.buffer.lock().geometry();
        self.buffer.lock().zero_accumulator();
        self.grabber.lock().arm(geometry)?;

        let timeout = Duration::from_millis(u64::from(coadd_frame_length_ms) * 10);

        for k in 0..coadd_count {
            let coadd_started = Instant::now();
            let index = loop {
                if let Some(index) = self.grabber.lock().poll_captured_buffer()? {
                    break index;
                }
                if coadd_started.elapsed() >= timeout {
                    return Err(Error::Timeout {
                        device: "frame_grabber",
                        elapsed_ms: coadd_started.elapsed().as_millis() as u64,
                        limit_ms: timeout.as_millis() as u64,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            };

            {
                let mut buffer = self.buffer.lock();
                let mut grabber = self.grabber.lock();
                let mut frame = vec![0u16; geometry.pixel_count()];
                grabber.copy_buffer_into(index, &mut frame)?;
                buffer.mono_frame_mut().copy_from_slice(&frame);
                buffer.accumulate_mono_frame();
            }

            self.status.lock().index = k + 1;

            if process_state.abort_requested() {
                return Err(Error::Aborted);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_output(
        &self,
        fits_path: &Path,
        geometry: Geometry,
        mean: &[f64],
        header: &FitsHeaderStore,
        start_time: DateTime<Utc>,
        exptime_sec: f64,
        coadd_sec: f64,
        coadd_count: u32,
    ) -> Result<()> {
        crate::filename_sequencer::FilenameSequencer::lock(fits_path)?;

        let reserved = ReservedKeys {
            exposure_start: start_time,
            exptime_sec,
            coadd_sec,
            coadd_num: coadd_count,
        };

        let write_result = fits_io::write_fits_image(fits_path, geometry, mean, header, &reserved);

        match write_result {
            Ok(()) => {
                crate::filename_sequencer::FilenameSequencer::unlock(fits_path)?;
                Ok(())
            }
            Err(e) => {
                // A partial FITS file must not be left behind without its
                // lock file: remove the half-written file but
                // keep the lock in place only long enough to do so, then
                // release it so the data-transfer process doesn't wait on a
                // file that will never appear.
                let _ = std::fs::remove_file(fits_path);
                let _ = crate::filename_sequencer::FilenameSequencer::unlock(fits_path);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_grabber::SimulatedGrabber;

    fn geometry() -> Geometry {
        Geometry { width: 4, height: 4 }
    }

    #[test]
    fn expose_writes_fits_with_correct_coadd_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j_e_20240115_1_1_0_0.fits");
        let engine = ExposureEngine::new(Box::new(SimulatedGrabber::new(50)), geometry());
        let header = FitsHeaderStore::new();
        let state = ProcessState::new();

        engine
            .expose(
                ExposureRequest {
                    length_ms: 2000,
                    coadd_frame_length_ms: 1000,
                    fits_path: &path,
                    header: &header,
                    flip_x: false,
                    flip_y: false,
                    multrun: 1,
                    run: 1,
                },
                &state,
            )
            .unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("lock").exists());

        let mut fptr = fitsio::FitsFile::open(&path).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        let coaddnum: i64 = hdu.read_key(&mut fptr, "COADDNUM").unwrap();
        assert_eq!(coaddnum, 2);
        let exptime: f64 = hdu.read_key(&mut fptr, "EXPTIME").unwrap();
        assert!((exptime - 2.0).abs() < 1e-6);
    }

    #[test]
    fn expose_rejects_length_shorter_than_one_coadd() {
        let engine = ExposureEngine::new(Box::new(SimulatedGrabber::new(50)), geometry());
        let header = FitsHeaderStore::new();
        let state = ProcessState::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.fits");

        let err = engine
            .expose(
                ExposureRequest {
                    length_ms: 500,
                    coadd_frame_length_ms: 1000,
                    fits_path: &path,
                    header: &header,
                    flip_x: false,
                    flip_y: false,
                    multrun: 1,
                    run: 1,
                },
                &state,
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ArgumentRange);
        assert!(!path.exists());
    }

    #[test]
    fn abort_mid_exposure_leaves_no_partial_file() {
        let engine = ExposureEngine::new(Box::new(SimulatedGrabber::new(50)), geometry());
        let header = FitsHeaderStore::new();
        let state = ProcessState::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aborted.fits");

        state.request_abort();
        let err = engine
            .expose(
                ExposureRequest {
                    length_ms: 5000,
                    coadd_frame_length_ms: 1000,
                    fits_path: &path,
                    header: &header,
                    flip_x: false,
                    flip_y: false,
                    multrun: 1,
                    run: 1,
                },
                &state,
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Aborted);
        assert!(!path.exists());
        assert!(!path.with_extension("lock").exists());
    }
}

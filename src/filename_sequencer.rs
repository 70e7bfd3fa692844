//! FITS filename sequencer: produces the next legal path and its sibling
//! lock file, recovering `multrun` from whatever is already on disk at
//! startup so a restart can never collide with existing files.
//!
//! Grounded on `detector/c/detector_fits_filename.c`: `Initialise` scans the
//! data directory with a filename grammar matching today's date and seeds
//! `multrun` from the highest one found; `Next_Multrun`/`Next_Run`/
//! `Next_Window` are the three documented counters.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::mjd::date_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureType {
    Arc,
    Bias,
    Dark,
    Exposure,
    SkyFlat,
    Standard,
    LampFlat,
}

impl ExposureType {
    fn code(self) -> char {
        match self {
            ExposureType::Arc => 'a',
            ExposureType::Bias => 'b',
            ExposureType::Dark => 'd',
            ExposureType::Exposure => 'e',
            ExposureType::SkyFlat => 'f',
            ExposureType::Standard => 's',
            ExposureType::LampFlat => 'w',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Unreduced,
    Realtime,
    Offline,
}

impl Pipeline {
    fn code(self) -> char {
        match self {
            Pipeline::Unreduced => '0',
            Pipeline::Realtime => '1',
            Pipeline::Offline => '2',
        }
    }
}

pub struct FilenameSequencer {
    data_dir: PathBuf,
    instrument_code: String,
    current_date_number: i32,
    multrun: u32,
    run: u32,
    window: u32,
}

impl FilenameSequencer {
    /// Scan `data_dir` for files matching
    /// `<inst>_<type>_<yyyymmdd>_<multrun>_<run>_<window>_<pipeline>.fits`
    /// whose instrument code and date match today, and seed `multrun` from
    /// the maximum found (or 0).
    pub fn initialise(instrument_code: &str, data_dir: &Path, now: DateTime<Utc>) -> Result<Self> {
        if !data_dir.is_dir() {
            return Err(Error::Resource(format!(
                "data directory does not exist: {}",
                data_dir.display()
            )));
        }
        let today = date_number(now);
        let mut max_multrun = 0u32;

        for entry in std::fs::read_dir(data_dir).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if let Some(parsed) = parse_filename(name) {
                if parsed.instrument_code == instrument_code && parsed.date_number == today {
                    max_multrun = max_multrun.max(parsed.multrun);
                }
            }
        }

        Ok(FilenameSequencer {
            data_dir: data_dir.to_path_buf(),
            instrument_code: instrument_code.to_string(),
            current_date_number: today,
            multrun: max_multrun,
            run: 0,
            window: 0,
        })
    }

    /// Advance to a new multrun. If the date has rolled over since the last
    /// call, `multrun` resets to 1 instead of incrementing past whatever was
    /// left from yesterday.
    pub fn next_multrun(&mut self, now: DateTime<Utc>) {
        let today = date_number(now);
        if today != self.current_date_number {
            self.current_date_number = today;
            self.multrun = 0;
        }
        self.multrun += 1;
        self.run = 0;
        self.window = 0;
    }

    pub fn next_run(&mut self) {
        self.run += 1;
        self.window = 0;
    }

    pub fn next_window(&mut self) {
        self.window += 1;
    }

    pub fn multrun(&self) -> u32 {
        self.multrun
    }
    pub fn run(&self) -> u32 {
        self.run
    }
    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn path_for(&self, exposure_type: ExposureType, pipeline: Pipeline) -> PathBuf {
        let filename = format!(
            "{}_{}_{}_{}_{}_{}_{}.fits",
            self.instrument_code,
            exposure_type.code(),
            self.current_date_number,
            self.multrun,
            self.run,
            self.window,
            pipeline.code(),
        );
        self.data_dir.join(filename)
    }

    /// Create the sibling `.lock` file for `fits_path`, failing if one
    /// already exists (atomic create-exclusive).
    pub fn lock(fits_path: &Path) -> Result<()> {
        let lock_path = lock_path_for(fits_path);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map(|_| ())
            .map_err(|e| {
                Error::Resource(format!("failed to create lock file {}: {e}", lock_path.display()))
            })
    }

    /// Remove the sibling `.lock` file. Succeeds (no-op) if it is already
    /// gone.
    pub fn unlock(fits_path: &Path) -> Result<()> {
        let lock_path = lock_path_for(fits_path);
        match std::fs::remove_file(&lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Resource(format!(
                "failed to remove lock file {}: {e}",
                lock_path.display()
            ))),
        }
    }
}

fn lock_path_for(fits_path: &Path) -> PathBuf {
    fits_path.with_extension("lock")
}

struct ParsedFilename {
    instrument_code: String,
    date_number: i32,
    multrun: u32,
}

/// Parse `<inst>_<type>_<yyyymmdd>_<multrun>_<run>_<window>_<pipeline>.fits`,
/// returning `None` for anything that doesn't fully match the grammar
/// (mirrors `Fits_Filename_File_Select`'s tolerant `strtok`-based scan,
/// which simply skips names it can't fully parse).
fn parse_filename(name: &str) -> Option<ParsedFilename> {
    let stem = name.strip_suffix(".fits")?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() != 7 {
        return None;
    }
    let instrument_code = parts[0].to_string();
    let _exposure_type = parts[1];
    let date_number: i32 = parts[2].parse().ok()?;
    let multrun: u32 = parts[3].parse().ok()?;
    let _run: u32 = parts[4].parse().ok()?;
    let _window: u32 = parts[5].parse().ok()?;
    let _pipeline = parts[6];
    Some(ParsedFilename {
        instrument_code,
        date_number,
        multrun,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap()
    }

    #[test]
    fn initialise_on_empty_dir_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let seq = FilenameSequencer::initialise("j", dir.path(), now()).unwrap();
        assert_eq!(seq.multrun(), 0);
    }

    #[test]
    fn initialise_recovers_highest_multrun_for_today() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "j_b_20240115_1_3_0_0.fits",
            "j_d_20240115_4_1_0_0.fits",
            "j_e_20240114_9_1_0_0.fits", // different day, ignored
            "k_e_20240115_7_1_0_0.fits", // different instrument, ignored
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let seq = FilenameSequencer::initialise("j", dir.path(), now()).unwrap();
        assert_eq!(seq.multrun(), 4);
    }

    #[test]
    fn next_multrun_resets_run_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut seq = FilenameSequencer::initialise("j", dir.path(), now()).unwrap();
        seq.next_multrun(now());
        seq.next_run();
        seq.next_window();
        seq.next_window();
        assert_eq!((seq.multrun(), seq.run(), seq.window()), (1, 1, 2));
        seq.next_multrun(now());
        assert_eq!((seq.multrun(), seq.run(), seq.window()), (2, 0, 0));
    }

    #[test]
    fn next_multrun_resets_to_one_across_night_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut seq = FilenameSequencer::initialise("j", dir.path(), now()).unwrap();
        seq.next_multrun(now());
        seq.next_multrun(now());
        assert_eq!(seq.multrun(), 2);

        let next_night = Utc.with_ymd_and_hms(2024, 1, 17, 1, 0, 0).unwrap();
        seq.next_multrun(next_night);
        assert_eq!(seq.multrun(), 1);
    }

    #[test]
    fn path_grammar_matches_spec() {
        let dir = tempfile::tempdir().unwrap();
        let mut seq = FilenameSequencer::initialise("j", dir.path(), now()).unwrap();
        seq.next_multrun(now());
        seq.next_run();
        let path = seq.path_for(ExposureType::Bias, Pipeline::Unreduced);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "j_b_20240115_1_1_0_0.fits"
        );
    }

    #[test]
    fn lock_fails_if_already_locked_unlock_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fits_path = dir.path().join("j_b_20240115_1_1_0_0.fits");
        std::fs::write(&fits_path, b"").unwrap();
        FilenameSequencer::lock(&fits_path).unwrap();
        assert!(FilenameSequencer::lock(&fits_path).is_err());
        FilenameSequencer::unlock(&fits_path).unwrap();
        // second unlock is a no-op success
        FilenameSequencer::unlock(&fits_path).unwrap();
    }
}

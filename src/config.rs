//! Typed configuration, parsed once at startup.
//!
//! The original C sources read a flat `.properties` file and coerce strings
//! to typed values at every call site. Ad hoc
//! config-string-to-typed-value conversions... replaced by parsing the
//! configuration once into a typed record at startup") that happens exactly
//! once, here, the way `braid-config-data::parse_config_file` does it for
//! `braid`: read the whole file, `toml::from_str` into a `#[derive(Deserialize)]`
//! struct, fix up relative paths, done. Everything downstream reads already
//! -typed fields.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub command: CommandServerConfig,
    pub logging: LoggingConfig,
    pub detector: DetectorConfig,
    pub liric: LiricConfig,
    pub filter_wheel: FilterWheelConfig,
    pub nudgematic: NudgematicConfig,
    pub file: FileConfig,
    pub thread: ThreadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandServerConfig {
    pub port_number: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub directory_name: PathBuf,
    #[serde(default = "default_log_name")]
    pub root_log: String,
    #[serde(default = "default_error_log_name")]
    pub root_error: String,
    #[serde(default)]
    pub udp: UdpLogConfig,
}

fn default_log_name() -> String {
    "liric_log".to_string()
}
fn default_error_log_name() -> String {
    "liric_error".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UdpLogConfig {
    #[serde(default)]
    pub active: bool,
    pub hostname: Option<String>,
    pub port_number: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    pub format_dir: PathBuf,
    pub coadd_exposure_length: CoaddExposureLengths,
    pub temperature: TemperatureCalibration,
    /// Move timeout for filter-wheel-independent device round trips, used by
    /// the serial-channel driver (ms). Not in the original config key list
    /// verbatim but required to bound transport errors.
    #[serde(default = "default_serial_timeout_ms")]
    pub serial_timeout_ms: u64,
}

fn default_serial_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoaddExposureLengths {
    // short/long/bias tags resolved via `resolve`; see `Detector::reconfigure`.
    pub short: u32,
    pub long: u32,
    pub bias: u32,
}

impl CoaddExposureLengths {
    pub fn resolve(&self, tag: &str) -> Result<u32> {
        match tag {
            "short" => Ok(self.short),
            "long" => Ok(self.long),
            "bias" => Ok(self.bias),
            other => Err(Error::ArgumentRange(format!(
                "unknown coadd_exp_len tag '{other}'"
            ))),
        }
    }
}

/// Four calibration integers: ADC/DAC counts at the two
/// reference temperatures. Config keys supplementing the documented surface, per
/// grounded on `detector_temperature.c`'s
/// `Detector_Temperature_Initialise`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemperatureCalibration {
    pub adc_zero_c: i32,
    pub adc_forty_c: i32,
    pub dac_zero_c: i32,
    pub dac_forty_c: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiricConfig {
    pub multrun: MultrunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultrunConfig {
    pub image: ImageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    pub flip: FlipConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlipConfig {
    #[serde(default)]
    pub x: bool,
    #[serde(default)]
    pub y: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterWheelConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub device_name: String,
    pub filter: FilterTable,
    #[serde(default = "default_wheel_timeout_ms")]
    pub move_timeout_ms: u64,
}

fn default_wheel_timeout_ms() -> u64 {
    20_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterTable {
    /// Position (1-based) -> display name.
    pub name: BTreeMap<u32, String>,
    /// Position (1-based) -> physical id.
    pub id: BTreeMap<u32, String>,
}

impl FilterTable {
    pub fn len(&self) -> usize {
        self.name.len()
    }
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NudgematicConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub device_name: String,
    #[serde(default = "default_nudgematic_positions")]
    pub position_count: u32,
    #[serde(default = "default_nudgematic_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
}

fn default_nudgematic_positions() -> u32 {
    9
}
fn default_nudgematic_settle_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub fits: FitsFileConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FitsFileConfig {
    pub instrument_code: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadConfig {
    pub priority: PriorityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriorityConfig {
    pub normal: i32,
    pub exposure: i32,
}

/// Split `path` (which must be a file) into directory and filename
/// components, same trick `braid-config-data::split_path` uses to resolve
/// relative paths against the config file's own location.
fn split_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    let mut components = path.components();
    components.next_back();
    components.as_path().to_path_buf()
}

fn fixup_relative_path(path: &mut PathBuf, dirname: &Path) -> Result<()> {
    let pathstr = path
        .to_str()
        .ok_or_else(|| Error::Configuration("non-utf8 path in configuration".into()))?;
    let expanded = shellexpand::full(pathstr)
        .map_err(|e| Error::Configuration(format!("failed to expand '{pathstr}': {e}")))?;
    *path = PathBuf::from(expanded.to_string());
    if path.is_relative() {
        *path = dirname.join(&path);
    }
    Ok(())
}

pub fn parse_config_file<P: AsRef<Path>>(fname: P) -> Result<Config> {
    let contents = std::fs::read_to_string(fname.as_ref()).map_err(Error::Io)?;
    let mut cfg: Config = toml::from_str(&contents)
        .map_err(|e| Error::Configuration(format!("failed to parse config: {e}")))?;

    let dirname = split_path(fname.as_ref());
    fixup_relative_path(&mut cfg.logging.directory_name, &dirname)?;
    fixup_relative_path(&mut cfg.detector.format_dir, &dirname)?;
    fixup_relative_path(&mut cfg.file.fits.path, &dirname)?;

    if cfg.filter_wheel.enable && cfg.filter_wheel.filter.is_empty() {
        return Err(Error::Configuration(
            "filter_wheel.enable is true but no filter_wheel.filter.name.* entries given".into(),
        ));
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
[command]
port_number = 8284

[logging]
directory_name = "./log"

[detector]
enable = true
format_dir = "./fmt"
serial_timeout_ms = 2000

[detector.coadd_exposure_length]
short = 100
long = 1000
bias = 14

[detector.temperature]
adc_zero_c = 2048
adc_forty_c = 1024
dac_zero_c = 512
dac_forty_c = 768

[liric.multrun.image.flip]
x = false
y = true

[filter_wheel]
enable = true
device_name = "/dev/filterwheel0"
move_timeout_ms = 20000

[filter_wheel.filter.name]
1 = "Mirror"
2 = "clear"

[filter_wheel.filter.id]
1 = "0"
2 = "1"

[nudgematic]
enable = true
device_name = "/dev/nudgematic0"
position_count = 9
settle_timeout_ms = 10000

[file.fits]
instrument_code = "j"
path = "/tmp/d"

[thread.priority]
normal = 0
exposure = 10
"#
    }

    #[test]
    fn parses_well_formed_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liric.toml");
        std::fs::write(&path, sample_toml()).unwrap();
        let cfg = parse_config_file(&path).unwrap();
        assert_eq!(cfg.command.port_number, 8284);
        assert_eq!(cfg.detector.coadd_exposure_length.short, 100);
        assert!(cfg.liric.multrun.image.flip.y);
        assert!(!cfg.liric.multrun.image.flip.x);
        assert_eq!(cfg.filter_wheel.filter.name.get(&1).unwrap(), "Mirror");
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liric.toml");
        let mut bad = sample_toml().to_string();
        bad.push_str("\n[detector]\nbogus_key = 1\n");
        std::fs::write(&path, bad).unwrap();
        assert!(parse_config_file(&path).is_err());
    }

    #[test]
    fn resolves_relative_paths_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liric.toml");
        std::fs::write(&path, sample_toml()).unwrap();
        let cfg = parse_config_file(&path).unwrap();
        assert!(cfg.logging.directory_name.is_absolute());
        assert!(cfg.detector.format_dir.is_absolute());
    }
}

//! Command execution: applies the thread-priority policy,
//! runs the parsed [`Command`] against an [`Instrument`], and formats the
//! `0 .../1 ...` wire reply.

use crate::commands::parse::{parse_command, Command, FitsHeaderValueKind};
use crate::error::{Error, Result};
use crate::exposure::ExposureStatusKind;
use crate::instrument::Instrument;
use crate::nudgematic::OffsetSize;
use crate::observation;
use crate::priority::{self, PriorityClass};
use crate::state::InProgress;

const HELP_TEXT: &str = "\
abort
config filter <name>
config coadd_exp_len <short|long>
config nudgematic <none|small|large>
fan <on|off>
fitsheader add <keyword> <boolean|float|integer|string|comment|units> <value>
fitsheader delete <keyword>
fitsheader clear
help
multbias <count>
multdark <length_ms> <count>
multrun <length_ms> <count> <true|false>
status detector <fan>
status exposure <status|count|length|start_time|index|multrun|run|fits_filename>
status filterwheel <filter|position|status>
status nudgematic <position|status|offsetsize>
status temperature <get|pcb>
shutdown
temperature <degrees_C>";

/// Priority class a command's handler runs at: exposure
/// priority for `abort`/`multrun`/`multbias`/`multdark`, normal for
/// everything else. Determined from the parsed command, not the raw
/// keyword, so an unparseable command never touches thread priority at all.
fn priority_class_for(command: &Command) -> PriorityClass {
    match command {
        Command::Abort | Command::Multrun(..) | Command::Multbias(_) | Command::Multdark(..) => {
            PriorityClass::Exposure
        }
        _ => PriorityClass::Normal,
    }
}

/// Handle one line of client input end to end: parse, apply priority,
/// execute, format. Never panics on malformed input — every failure path
/// returns a `1 ...` reply string.
pub fn handle(instrument: &Instrument, line: &str) -> String {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(Error::UnknownCommand) => return "1 failed message unknown".to_string(),
        Err(e) => return format!("1 {e}"),
    };

    let priority = instrument.config.thread.priority.clone();
    priority::apply(
        priority_class_for(&command),
        priority.normal,
        priority.exposure,
    );

    match execute(instrument, command) {
        Ok(reply) => reply,
        Err(e) => {
            instrument.state.set_last_error(e.kind(), e.to_string());
            format!("1 {e}")
        }
    }
}

fn execute(instrument: &Instrument, command: Command) -> Result<String> {
    match command {
        Command::Abort => {
            instrument.state.request_abort();
            Ok("0 ok".to_string())
        }
        Command::Help => Ok(format!("0 {HELP_TEXT}")),
        Command::Shutdown => {
            instrument.state.request_shutdown();
            Ok("0 ok".to_string())
        }
        Command::ConfigFilter(name) => config_filter(instrument, &name),
        Command::ConfigCoaddExpLen(tag) => config_coadd_exp_len(instrument, &tag),
        Command::ConfigNudgematic(size) => config_nudgematic(instrument, size),
        Command::Fan(on) => {
            instrument.detector.set_fan(on)?;
            Ok("0 ok".to_string())
        }
        Command::FitsHeaderAdd { keyword, kind, value } => fitsheader_add(instrument, &keyword, kind, &value),
        Command::FitsHeaderDelete(keyword) => {
            instrument.header_store.lock().delete(&keyword);
            Ok("0 ok".to_string())
        }
        Command::FitsHeaderClear => {
            instrument.header_store.lock().clear();
            Ok("0 ok".to_string())
        }
        Command::Multbias(count) => {
            let result = observation::run_multbias(instrument, count)?;
            Ok(observation_reply(&result))
        }
        Command::Multdark(length_ms, count) => {
            let result = observation::run_multdark(instrument, length_ms, count)?;
            Ok(observation_reply(&result))
        }
        Command::Multrun(length_ms, count, standard) => {
            let result = observation::run_multrun(instrument, length_ms, count, standard)?;
            Ok(observation_reply(&result))
        }
        Command::StatusDetector(field) => status_detector(instrument, &field),
        Command::StatusExposure(field) => status_exposure(instrument, &field),
        Command::StatusFilterWheel(field) => status_filterwheel(instrument, &field),
        Command::StatusNudgematic(field) => status_nudgematic(instrument, &field),
        Command::StatusTemperature(field) => status_temperature(instrument, &field),
        Command::Temperature(degrees) => {
            instrument.detector.set_temperature_setpoint(degrees)?;
            Ok("0 ok".to_string())
        }
    }
}

fn observation_reply(result: &observation::ObservationResult) -> String {
    let last = result.filenames.last().map(String::as_str).unwrap_or("none");
    format!("0 {} {} {}", result.filenames.len(), result.multrun, last)
}

fn config_filter(instrument: &Instrument, name: &str) -> Result<String> {
    let wheel = instrument
        .filter_wheel
        .as_ref()
        .ok_or_else(|| Error::Configuration("filter wheel not enabled".into()))?;
    let position = wheel.position_for_name(name)?;
    wheel.move_to(position)?;
    *instrument.current_filter_position.lock() = Some(position);
    Ok("0 ok".to_string())
}

fn config_coadd_exp_len(instrument: &Instrument, tag: &str) -> Result<String> {
    if instrument.state.in_progress() != InProgress::Idle {
        return Err(Error::State(
            "cannot reconfigure detector while an observation is in progress".into(),
        ));
    }
    instrument.detector.reconfigure(tag)?;
    Ok("0 ok".to_string())
}

fn config_nudgematic(instrument: &Instrument, size: OffsetSize) -> Result<String> {
    let nudgematic = instrument
        .nudgematic
        .as_ref()
        .ok_or_else(|| Error::Configuration("nudgematic not enabled".into()))?;
    nudgematic.set_offset_size(size);
    Ok("0 ok".to_string())
}

fn fitsheader_add(
    instrument: &Instrument,
    keyword: &str,
    kind: FitsHeaderValueKind,
    value: &str,
) -> Result<String> {
    let mut store = instrument.header_store.lock();
    match kind {
        FitsHeaderValueKind::Boolean => {
            let parsed = match value {
                "true" | "TRUE" | "1" => true,
                "false" | "FALSE" | "0" => false,
                _ => return Err(Error::ArgumentRange(format!("not a boolean: '{value}'"))),
            };
            store.add_bool(keyword, parsed, None);
        }
        FitsHeaderValueKind::Float => {
            let parsed: f64 = value
                .parse()
                .map_err(|_| Error::ArgumentRange(format!("not a float: '{value}'")))?;
            store.add_float(keyword, parsed, None);
        }
        FitsHeaderValueKind::Integer => {
            let parsed: i64 = value
                .parse()
                .map_err(|_| Error::ArgumentRange(format!("not an integer: '{value}'")))?;
            store.add_int(keyword, parsed, None);
        }
        FitsHeaderValueKind::String => {
            store.add_string(keyword, value, None);
        }
        FitsHeaderValueKind::Comment => {
            store.add_comment(keyword, value);
        }
        FitsHeaderValueKind::Units => {
            store.add_units(keyword, value)?;
        }
    }
    Ok("0 ok".to_string())
}

fn status_exposure(instrument: &Instrument, field: &str) -> Result<String> {
    let snapshot = instrument.exposure_engine.status_snapshot();
    let reply = match field {
        "status" => match snapshot.status {
            ExposureStatusKind::Idle => "idle".to_string(),
            ExposureStatusKind::Exposing => "exposing".to_string(),
            ExposureStatusKind::PostProcessing => "post_processing".to_string(),
        },
        "count" => snapshot.count.to_string(),
        "length" => snapshot.length_ms.to_string(),
        "start_time" => snapshot
            .start_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "none".to_string()),
        "index" => snapshot.index.to_string(),
        "multrun" => snapshot.multrun.to_string(),
        "run" => snapshot.run.to_string(),
        "fits_filename" => snapshot.last_fits_filename.clone().unwrap_or_else(|| "none".to_string()),
        other => return Err(Error::ArgumentRange(format!("unknown status exposure field '{other}'"))),
    };
    Ok(format!("0 {reply}"))
}

fn status_detector(instrument: &Instrument, field: &str) -> Result<String> {
    let reply = match field {
        "fan" => {
            if instrument.detector.fan_status()? {
                "on".to_string()
            } else {
                "off".to_string()
            }
        }
        other => return Err(Error::ArgumentRange(format!("unknown status detector field '{other}'"))),
    };
    Ok(format!("0 {reply}"))
}

fn status_filterwheel(instrument: &Instrument, field: &str) -> Result<String> {
    let wheel = instrument
        .filter_wheel
        .as_ref()
        .ok_or_else(|| Error::Configuration("filter wheel not enabled".into()))?;
    let reply = match field {
        "filter" => {
            let position = *instrument.current_filter_position.lock();
            position
                .and_then(|p| instrument.filter_name_for_position(p))
                .unwrap_or_else(|| "none".to_string())
        }
        "position" => wheel.get_position()?.to_string(),
        "status" => {
            if wheel.get_position()? == 0 {
                "moving".to_string()
            } else {
                "stationary".to_string()
            }
        }
        other => return Err(Error::ArgumentRange(format!("unknown status filterwheel field '{other}'"))),
    };
    Ok(format!("0 {reply}"))
}

fn status_nudgematic(instrument: &Instrument, field: &str) -> Result<String> {
    let nudgematic = instrument
        .nudgematic
        .as_ref()
        .ok_or_else(|| Error::Configuration("nudgematic not enabled".into()))?;
    let reply = match field {
        "position" => nudgematic
            .last_position()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string()),
        "status" => {
            if nudgematic.last_position().is_some() {
                "stationary".to_string()
            } else {
                "unmoved".to_string()
            }
        }
        "offsetsize" => match nudgematic.offset_size() {
            OffsetSize::None => "none".to_string(),
            OffsetSize::Small => "small".to_string(),
            OffsetSize::Large => "large".to_string(),
        },
        other => return Err(Error::ArgumentRange(format!("unknown status nudgematic field '{other}'"))),
    };
    Ok(format!("0 {reply}"))
}

fn status_temperature(instrument: &Instrument, field: &str) -> Result<String> {
    let reply = match field {
        // "pcb" reads the same in-camera ADC channel as "get": the
        // distilled command surface names two readings but only documents
        // one calibration map, so both resolve through it until a second
        // PCB-specific channel is specified.
        "get" | "pcb" => format!("{:.3}", instrument.detector.get_temperature_celsius()?),
        other => return Err(Error::ArgumentRange(format!("unknown status temperature field '{other}'"))),
    };
    Ok(format!("0 {reply}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Geometry;
    use crate::config::{
        CoaddExposureLengths, CommandServerConfig, Config, DetectorConfig, FileConfig,
        FilterTable, FilterWheelConfig, FitsFileConfig, FlipConfig, ImageConfig, LiricConfig,
        LoggingConfig, MultrunConfig, NudgematicConfig, PriorityConfig, TemperatureCalibration,
        ThreadConfig, UdpLogConfig,
    };
    use crate::detector::{Detector, SimulatedSerialTransport};
    use crate::exposure::ExposureEngine;
    use crate::filter_wheel::{FilterWheelDriver, SimulatedFilterWheelTransport};
    use crate::fits_header::FitsHeaderStore;
    use crate::frame_grabber::SimulatedGrabber;
    use crate::nudgematic::{NudgematicController, SimulatedNudgematicTransport};
    use std::collections::BTreeMap;

    fn test_config(data_dir: &std::path::Path) -> Config {
        let mut name = BTreeMap::new();
        name.insert(1, "Mirror".to_string());
        name.insert(2, "clear".to_string());
        let mut id = BTreeMap::new();
        id.insert(1, "0".to_string());
        id.insert(2, "1".to_string());

        Config {
            command: CommandServerConfig { port_number: 0 },
            logging: LoggingConfig {
                directory_name: data_dir.to_path_buf(),
                root_log: "log".into(),
                root_error: "err".into(),
                udp: UdpLogConfig::default(),
            },
            detector: DetectorConfig {
                enable: true,
                format_dir: data_dir.to_path_buf(),
                coadd_exposure_length: CoaddExposureLengths {
                    short: 100,
                    long: 1000,
                    bias: 1000,
                },
                temperature: TemperatureCalibration {
                    adc_zero_c: 2048,
                    adc_forty_c: 1024,
                    dac_zero_c: 512,
                    dac_forty_c: 768,
                },
                serial_timeout_ms: 2000,
            },
            liric: LiricConfig {
                multrun: MultrunConfig {
                    image: ImageConfig {
                        flip: FlipConfig { x: false, y: false },
                    },
                },
            },
            filter_wheel: FilterWheelConfig {
                enable: true,
                device_name: "/dev/fake".into(),
                filter: FilterTable { name, id },
                move_timeout_ms: 1000,
            },
            nudgematic: NudgematicConfig {
                enable: true,
                device_name: "/dev/fake".into(),
                position_count: 9,
                settle_timeout_ms: 1000,
            },
            file: FileConfig {
                fits: FitsFileConfig {
                    instrument_code: "j".into(),
                    path: data_dir.to_path_buf(),
                },
            },
            thread: ThreadConfig {
                priority: PriorityConfig {
                    normal: 0,
                    exposure: 10,
                },
            },
        }
    }

    fn test_instrument(data_dir: &std::path::Path) -> Instrument {
        let config = test_config(data_dir);
        let calibration = crate::detector::TemperatureCalibration::from_config(&config.detector.temperature);
        let detector = Detector::new(
            Box::new(SimulatedSerialTransport::new(2048)),
            calibration,
            config.detector.coadd_exposure_length.clone(),
        );
        let exposure_engine =
            ExposureEngine::new(Box::new(SimulatedGrabber::new(50)), Geometry { width: 2, height: 2 });
        let sequencer = crate::filename_sequencer::FilenameSequencer::initialise(
            &config.file.fits.instrument_code,
            &config.file.fits.path,
            chrono::Utc::now(),
        )
        .unwrap();
        let filter_wheel = FilterWheelDriver::new(
            &config.filter_wheel,
            Box::new(SimulatedFilterWheelTransport::new(1)),
        );
        let nudgematic =
            NudgematicController::new(&config.nudgematic, Box::new(SimulatedNudgematicTransport::new(1)));

        Instrument {
            config,
            state: std::sync::Arc::new(crate::state::ProcessState::new()),
            header_store: parking_lot::Mutex::new(FitsHeaderStore::new()),
            sequencer: parking_lot::Mutex::new(sequencer),
            filter_wheel: Some(filter_wheel),
            nudgematic: Some(nudgematic),
            detector,
            exposure_engine,
            current_filter_position: parking_lot::Mutex::new(None),
        }
    }

    #[test]
    fn unknown_command_reply() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        assert_eq!(handle(&instrument, "frobnicate"), "1 failed message unknown");
    }

    #[test]
    fn malformed_command_reply_names_failure_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        let reply = handle(&instrument, "multrun notanumber 1 true");
        assert!(reply.starts_with("1 Failed to parse"));
    }

    #[test]
    fn abort_then_status_ok() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        assert_eq!(handle(&instrument, "abort"), "0 ok");
        assert!(instrument.state.abort_requested());
    }

    #[test]
    fn fitsheader_add_then_delete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        assert_eq!(
            handle(&instrument, "fitsheader add OBJECT string M42"),
            "0 ok"
        );
        assert!(instrument.header_store.lock().get("OBJECT").is_some());
        assert_eq!(handle(&instrument, "fitsheader delete OBJECT"), "0 ok");
        assert!(instrument.header_store.lock().get("OBJECT").is_none());
    }

    #[test]
    fn config_filter_moves_wheel_and_updates_status() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        assert_eq!(handle(&instrument, "config filter clear"), "0 ok");
        assert_eq!(handle(&instrument, "status filterwheel filter"), "0 clear");
    }

    #[test]
    fn multbias_reply_reports_count_and_multrun() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        let reply = handle(&instrument, "multbias 2");
        assert!(reply.starts_with("0 2 1 "));
        assert!(!reply.ends_with("none"));
    }

    #[test]
    fn concurrent_multrun_reports_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        instrument.state.begin_observation(InProgress::Multrun).unwrap();
        let reply = handle(&instrument, "multrun 1000 1 false");
        assert!(reply.starts_with("1 "));
    }

    #[test]
    fn shutdown_sets_flag() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        assert_eq!(handle(&instrument, "shutdown"), "0 ok");
        assert!(instrument.state.shutdown_requested());
    }

    #[test]
    fn status_detector_fan_reflects_fan_command() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        assert_eq!(handle(&instrument, "status detector fan"), "0 off");
        assert_eq!(handle(&instrument, "fan on"), "0 ok");
        assert_eq!(handle(&instrument, "status detector fan"), "0 on");
    }

    #[test]
    fn status_exposure_fits_filename_reports_last_write() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        assert_eq!(handle(&instrument, "status exposure fits_filename"), "0 none");
        handle(&instrument, "multbias 1");
        let reply = handle(&instrument, "status exposure fits_filename");
        assert!(reply.starts_with("0 ") && reply.ends_with(".fits"));
    }

    #[test]
    fn help_lists_commands() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path());
        let reply = handle(&instrument, "help");
        assert!(reply.starts_with("0 "));
        assert!(reply.contains("multrun"));
    }
}

//! Instrument-control server for the Liric/Raptor InGaAs imager.
//!
//! The binary entry point (`main.rs`) wires a [`config::Config`], a
//! [`logging`] subscriber and an [`instrument::Instrument`] together and
//! blocks on [`server::run`]. Everything else in this crate is organised
//! leaf-first: device drivers at the bottom, the observation controller in
//! the middle, the command dispatcher and TCP server glue on top.

pub mod buffer;
pub mod commands;
pub mod config;
pub mod detector;
pub mod error;
pub mod exposure;
pub mod filename_sequencer;
pub mod filter_wheel;
pub mod fits_header;
pub mod fits_io;
pub mod frame_grabber;
pub mod instrument;
pub mod logging;
pub mod mjd;
pub mod nudgematic;
pub mod observation;
pub mod priority;
pub mod server;
pub mod state;

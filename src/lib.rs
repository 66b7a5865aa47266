//! Core library for the gauge_daq measurement station.
//!
//! Acquisition flows from a serial gauge ([`device`]) through the
//! per-parameter [`sequencer`] into the [`store`], and back out as product
//! history ([`history`]) for display and [`export`]. The `gauge_daq` binary
//! is a thin command-line shell over these modules.

pub mod adapters;
pub mod config;
pub mod device;
pub mod error;
pub mod export;
pub mod history;
pub mod logging;
pub mod models;
pub mod sequencer;
pub mod store;
pub mod templates;

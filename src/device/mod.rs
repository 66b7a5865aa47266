//! Device channel for a single serial gauge.
//!
//! ```text
//! Disconnected --open--> Connected --request_start--> Reading
//!      ^                     ^  <--request_stop--        |
//!      +------close----------+---------close-------------+
//! ```
//!
//! Any failed transition drops the channel back to `Disconnected` and hands
//! the error to the caller. There is no automatic retry; the operator decides
//! whether to reconnect or type values by hand.

pub mod poller;

pub use poller::{PollEvent, SamplePoller};

use crate::adapters::LineAdapter;
use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Command that starts continuous measurement.
pub const CMD_START: &str = "START";
/// Command that stops continuous measurement.
pub const CMD_STOP: &str = "STOP";
/// Command that asks the gauge to describe itself.
pub const CMD_INFO: &str = "INFO";

/// Lifecycle of a [`DeviceChannel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    /// No port open.
    Disconnected,
    /// Port open, gauge idle.
    Connected,
    /// `START` sent; the gauge is streaming values.
    Reading,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connected => "connected",
            ChannelState::Reading => "reading",
        };
        f.write_str(s)
    }
}

/// Free-text reply to `INFO`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// Port the gauge answered on.
    pub port: String,
    /// Configured baud rate.
    pub baud_rate: u32,
    /// When the reply was collected.
    pub queried_at: DateTime<Utc>,
    /// Non-empty reply lines in arrival order.
    pub lines: Vec<String>,
}

impl DeviceInfo {
    /// Banner shown to the operator.
    pub fn render(&self) -> String {
        let mut out = vec![
            "=== DEVICE INFO ===".to_string(),
            format!("Port: {}", self.port),
            format!("Baud rate: {}", self.baud_rate),
            format!("Queried at: {}", self.queried_at.format("%Y-%m-%d %H:%M:%S")),
            "-------------------".to_string(),
        ];
        out.extend(self.lines.iter().cloned());
        out.push("===================".to_string());
        out.join("\n")
    }
}

/// One serial gauge and its connection state.
pub struct DeviceChannel<A: LineAdapter> {
    adapter: A,
    config: DeviceConfig,
    state: ChannelState,
    port: Option<String>,
}

impl<A: LineAdapter> DeviceChannel<A> {
    /// A disconnected channel over `adapter`.
    pub fn new(adapter: A, config: DeviceConfig) -> Self {
        Self {
            adapter,
            config,
            state: ChannelState::Disconnected,
            port: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Port the channel is open on; also used as the measurement device id.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Channel identifiers discoverable on this host, in adapter order.
    pub fn list_available_channels(&self) -> AppResult<Vec<String>> {
        self.adapter.available_ports()
    }

    /// Open `channel_id`. An already open channel is closed first.
    pub async fn open(&mut self, channel_id: &str) -> AppResult<()> {
        if self.state != ChannelState::Disconnected {
            self.close().await;
        }

        match self.adapter.connect(channel_id, &self.config).await {
            Ok(()) => {
                self.state = ChannelState::Connected;
                self.port = Some(channel_id.to_string());
                info!(
                    "Gauge connected on {} via {} at {} baud",
                    channel_id,
                    self.adapter.name(),
                    self.config.baud_rate
                );
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open gauge channel {}: {}", channel_id, e);
                self.fail().await;
                Err(match e {
                    DaqError::Connection(_) | DaqError::FeatureNotEnabled(_) => e,
                    other => DaqError::Connection(other.to_string()),
                })
            }
        }
    }

    /// Release the channel. Idempotent; never fails.
    pub async fn close(&mut self) {
        if self.state == ChannelState::Reading {
            if let Err(e) = self.adapter.send(CMD_STOP).await {
                debug!("STOP before close failed: {}", e);
            }
        }
        self.adapter.disconnect().await;
        if self.state != ChannelState::Disconnected {
            info!(
                "Gauge channel {} closed",
                self.port.as_deref().unwrap_or("?")
            );
        }
        self.state = ChannelState::Disconnected;
        self.port = None;
    }

    /// Ask the gauge to start streaming samples.
    pub async fn request_start(&mut self) -> AppResult<()> {
        self.ensure_connected()?;
        self.send_or_fail(CMD_START).await?;
        self.state = ChannelState::Reading;
        info!("Gauge measurement started");
        Ok(())
    }

    /// Ask the gauge to stop streaming samples.
    pub async fn request_stop(&mut self) -> AppResult<()> {
        self.ensure_connected()?;
        self.send_or_fail(CMD_STOP).await?;
        self.state = ChannelState::Connected;
        info!("Gauge measurement stopped");
        Ok(())
    }

    /// Non-blocking read of one sample.
    ///
    /// Returns `Ok(None)` when no complete line is pending or the channel is
    /// connected but not reading. A line that is not a finite number is a
    /// [`DaqError::DataFormat`] and leaves the channel state untouched.
    pub async fn poll(&mut self) -> AppResult<Option<f64>> {
        match self.state {
            ChannelState::Disconnected => return Err(DaqError::NotConnected),
            ChannelState::Connected => return Ok(None),
            ChannelState::Reading => {}
        }

        let line = match self.adapter.try_read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(None),
            Err(e @ DaqError::DataFormat(_)) => return Err(e),
            Err(e) => {
                warn!("Gauge read failed: {}", e);
                self.fail().await;
                return Err(e);
            }
        };

        parse_sample(&line)
    }

    /// Send `INFO` and collect the free-text reply.
    ///
    /// Returns `Ok(None)` when the gauge stays silent for `info_wait_ms`.
    pub async fn device_info(&mut self) -> AppResult<Option<DeviceInfo>> {
        self.ensure_connected()?;
        self.send_or_fail(CMD_INFO).await?;
        tokio::time::sleep(self.config.info_wait()).await;

        let mut lines = Vec::new();
        loop {
            match self.adapter.try_read_line().await {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                Ok(None) => break,
                Err(DaqError::DataFormat(e)) => {
                    warn!("Ignored INFO reply input: {}", e);
                }
                Err(e) => {
                    self.fail().await;
                    return Err(e);
                }
            }
        }

        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(DeviceInfo {
            port: self.port.clone().unwrap_or_default(),
            baud_rate: self.config.baud_rate,
            queried_at: Utc::now(),
            lines,
        }))
    }

    fn ensure_connected(&self) -> AppResult<()> {
        if self.state == ChannelState::Disconnected {
            return Err(DaqError::NotConnected);
        }
        Ok(())
    }

    async fn send_or_fail(&mut self, command: &str) -> AppResult<()> {
        if let Err(e) = self.adapter.send(command).await {
            warn!("Sending {} to gauge failed: {}", command, e);
            self.fail().await;
            return Err(e);
        }
        Ok(())
    }

    async fn fail(&mut self) {
        self.adapter.disconnect().await;
        self.state = ChannelState::Disconnected;
        self.port = None;
    }
}

/// Parse one device line as a sample.
///
/// Blank lines carry no sample. Gauges may use exponent notation, so any
/// finite `f64` literal is accepted here.
pub fn parse_sample(line: &str) -> AppResult<Option<f64>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(DaqError::DataFormat(trimmed.to_string())),
    }
}

//! Serial transport for gauges on RS-232 or USB-serial ports.

use super::{take_line, LineAdapter};
use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Serial adapter for RS-232 gauges
///
/// This adapter wraps the serialport crate and provides async I/O
/// using Tokio's blocking task executor for synchronous serial operations.
/// Incoming bytes are buffered until a full line is available.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600)
    baud_rate: u32,

    /// Write timeout
    timeout: Duration,

    /// Line terminator for commands (e.g., "\n")
    line_terminator: String,

    /// Bytes received but not yet returned as a line
    pending: Vec<u8>,

    /// The actual serial port (behind Arc<Mutex> for async access)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create a serial adapter with station defaults.
    pub fn new() -> Self {
        let defaults = DeviceConfig::default();
        Self {
            port_name: String::new(),
            baud_rate: defaults.baud_rate,
            timeout: defaults.read_timeout(),
            line_terminator: defaults.line_terminator,
            pending: Vec::new(),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Port this adapter was last opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Default for SerialAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineAdapter for SerialAdapter {
    fn name(&self) -> &str {
        "serial"
    }

    fn available_ports(&self) -> AppResult<Vec<String>> {
        #[cfg(feature = "instrument_serial")]
        {
            let ports = serialport::available_ports()
                .map_err(|e| DaqError::Connection(format!("Failed to enumerate ports: {}", e)))?;
            Ok(ports.into_iter().map(|p| p.port_name).collect())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    async fn connect(&mut self, port: &str, config: &DeviceConfig) -> AppResult<()> {
        self.port_name = port.to_string();
        self.baud_rate = config.baud_rate;
        self.timeout = config.read_timeout();
        self.line_terminator = config.line_terminator.clone();
        self.pending.clear();

        #[cfg(feature = "instrument_serial")]
        {
            let port_name = self.port_name.clone();
            let baud_rate = self.baud_rate;
            let timeout = self.timeout;

            // Opening can block on some USB-serial drivers
            let opened = tokio::task::spawn_blocking(move || {
                serialport::new(&port_name, baud_rate)
                    .data_bits(serialport::DataBits::Eight)
                    .parity(serialport::Parity::None)
                    .stop_bits(serialport::StopBits::One)
                    .timeout(timeout)
                    .open()
            })
            .await
            .map_err(|e| DaqError::Connection(format!("Serial open task panicked: {}", e)))?
            .map_err(|e| {
                DaqError::Connection(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    self.port_name, self.baud_rate, e
                ))
            })?;

            self.port = Some(Arc::new(Mutex::new(opened)));

            debug!(
                "Serial port '{}' opened at {} baud",
                self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    async fn disconnect(&mut self) {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
        self.pending.clear();
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port.as_ref().ok_or(DaqError::NotConnected)?.clone();
            let command_str = format!("{}{}", command, self.line_terminator);
            let command_for_log = command.to_string();

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || -> AppResult<()> {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                port_guard.write_all(command_str.as_bytes())?;
                port_guard.flush()?;

                debug!("Sent serial command: {}", command_for_log.trim());
                Ok(())
            })
            .await
            .map_err(|e| DaqError::Connection(format!("Serial I/O task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = command;
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    async fn try_read_line(&mut self) -> AppResult<Option<String>> {
        if let Some(line) = take_line(&mut self.pending)? {
            return Ok(Some(line));
        }

        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port.as_ref().ok_or(DaqError::NotConnected)?.clone();

            let chunk = tokio::task::spawn_blocking(move || -> AppResult<Vec<u8>> {
                use std::io::Read;

                let mut port_guard = port.blocking_lock();
                let waiting = port_guard
                    .bytes_to_read()
                    .map_err(|e| DaqError::Io(std::io::Error::other(e)))?;
                if waiting == 0 {
                    return Ok(Vec::new());
                }

                let mut buffer = vec![0u8; waiting as usize];
                let n = port_guard.read(&mut buffer)?;
                buffer.truncate(n);
                Ok(buffer)
            })
            .await
            .map_err(|e| DaqError::Connection(format!("Serial I/O task panicked: {}", e)))??;

            if !chunk.is_empty() {
                self.pending.extend_from_slice(&chunk);
            }
            let line = take_line(&mut self.pending).map_err(|e| {
                warn!("Serial input overflow: {}", e);
                e
            })?;
            if let Some(ref l) = line {
                debug!("Received serial line: {}", l);
            }
            Ok(line)
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_adapter_creation() {
        let adapter = SerialAdapter::new();
        assert_eq!(adapter.name(), "serial");
        assert_eq!(adapter.baud_rate, 9600);
        assert_eq!(adapter.line_terminator, "\n");
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_port_fails() {
        let mut adapter = SerialAdapter::new();
        let result = adapter.send("START").await;
        assert!(result.is_err());
    }

    #[cfg(feature = "instrument_serial")]
    #[tokio::test]
    async fn test_connect_to_missing_port_is_connection_error() {
        let mut adapter = SerialAdapter::new();
        let result = adapter
            .connect("/dev/does-not-exist-gauge", &DeviceConfig::default())
            .await;
        assert!(matches!(result, Err(DaqError::Connection(_))));
        assert!(!adapter.is_connected());
    }
}

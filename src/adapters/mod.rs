//! Hardware adapter implementations
//!
//! This module contains implementations of the [`LineAdapter`] trait, the
//! low-level I/O abstraction between a [`DeviceChannel`](crate::device::DeviceChannel)
//! and a gauge speaking the line-oriented ASCII protocol.

pub mod mock_adapter;
pub mod serial_adapter;

pub use mock_adapter::{MockAdapter, MockHandle};
pub use serial_adapter::SerialAdapter;

use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;

/// Line-oriented transport to a single instrument.
///
/// `connect`, `disconnect` and `send` may block for up to the configured
/// timeout. `try_read_line` must return immediately.
#[async_trait]
pub trait LineAdapter: Send {
    /// Short transport name used in logs.
    fn name(&self) -> &str;

    /// Endpoints discoverable on this host. No side effects.
    fn available_ports(&self) -> AppResult<Vec<String>>;

    /// Open `port` with the given settings.
    ///
    /// Fails with [`DaqError::Connection`](crate::error::DaqError::Connection)
    /// when the port is busy, missing or does not answer in time.
    async fn connect(&mut self, port: &str, config: &DeviceConfig) -> AppResult<()>;

    /// Release the port. Never fails.
    async fn disconnect(&mut self);

    /// Write one command; the adapter appends the configured terminator.
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Return one complete pending line without its terminator, or `None`
    /// when no complete line has arrived yet.
    ///
    /// Unterminated input longer than [`MAX_LINE_BYTES`] is discarded and
    /// reported as [`DaqError::DataFormat`].
    async fn try_read_line(&mut self) -> AppResult<Option<String>>;

    /// Whether a port is currently open.
    fn is_connected(&self) -> bool;
}

/// Longest unterminated input kept while waiting for a newline.
pub const MAX_LINE_BYTES: usize = 4096;

/// Split the first complete line off `pending`, if there is one.
///
/// Carriage returns are dropped so CRLF and LF devices read the same. When
/// more than [`MAX_LINE_BYTES`] are pending without a newline the buffer is
/// cleared and a `DataFormat` error returned.
pub(crate) fn take_line(pending: &mut Vec<u8>) -> AppResult<Option<String>> {
    let Some(pos) = pending.iter().position(|&b| b == b'\n') else {
        if pending.len() > MAX_LINE_BYTES {
            let dropped = pending.len();
            pending.clear();
            return Err(DaqError::DataFormat(format!(
                "discarded {} bytes without a line terminator",
                dropped
            )));
        }
        return Ok(None);
    };
    let line: Vec<u8> = pending.drain(..=pos).collect();
    let text = String::from_utf8_lossy(&line[..line.len() - 1]);
    Ok(Some(text.trim_end_matches('\r').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_line_splits_on_newline() {
        let mut buf = b"12.5\r\n3.2\npartial".to_vec();
        assert_eq!(take_line(&mut buf).unwrap().as_deref(), Some("12.5"));
        assert_eq!(take_line(&mut buf).unwrap().as_deref(), Some("3.2"));
        assert_eq!(take_line(&mut buf).unwrap(), None);
        assert_eq!(buf, b"partial");
    }

    #[test]
    fn test_unterminated_flood_is_discarded() {
        let mut buf = vec![b'9'; MAX_LINE_BYTES];
        assert_eq!(take_line(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), MAX_LINE_BYTES);

        buf.push(b'9');
        assert!(matches!(take_line(&mut buf), Err(DaqError::DataFormat(_))));
        assert!(buf.is_empty());

        buf.extend_from_slice(b"4.5\n");
        assert_eq!(take_line(&mut buf).unwrap().as_deref(), Some("4.5"));
    }
}

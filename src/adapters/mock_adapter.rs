//! Scripted in-memory gauge for tests and demos.
//!
//! A [`MockAdapter`] and its [`MockHandle`] share state, so a test can keep
//! the handle, hand the adapter to a channel, then feed lines and inspect the
//! commands the channel wrote.

use super::{take_line, LineAdapter};
use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    ports: Vec<String>,
    connected_port: Option<String>,
    incoming: VecDeque<u8>,
    sent: Vec<String>,
    connect_failure: Option<String>,
    send_failure: Option<String>,
    info_reply: Vec<String>,
}

/// Simulated serial gauge.
#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockAdapter`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockAdapter {
    /// A mock exposing the given ports.
    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let adapter = Self::default();
        lock(&adapter.state).ports = ports.into_iter().map(Into::into).collect();
        adapter
    }

    /// Handle sharing this adapter's state.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

impl MockHandle {
    /// Queue a line as if the gauge had sent it (terminator added).
    pub fn push_line(&self, line: &str) {
        let mut state = lock(&self.state);
        state.incoming.extend(line.as_bytes());
        state.incoming.push_back(b'\n');
    }

    /// Queue raw bytes, e.g. half a line.
    pub fn push_bytes(&self, bytes: &[u8]) {
        lock(&self.state).incoming.extend(bytes);
    }

    /// Lines the gauge answers to `INFO`.
    pub fn set_info_reply(&self, lines: &[&str]) {
        lock(&self.state).info_reply = lines.iter().map(|l| l.to_string()).collect();
    }

    /// Make the next connects fail with `reason`.
    pub fn fail_connect(&self, reason: &str) {
        lock(&self.state).connect_failure = Some(reason.to_string());
    }

    /// Make every send fail with `reason` until cleared.
    pub fn fail_send(&self, reason: Option<&str>) {
        lock(&self.state).send_failure = reason.map(str::to_string);
    }

    /// Commands written so far, without terminators.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    /// Port currently open, if any.
    pub fn connected_port(&self) -> Option<String> {
        lock(&self.state).connected_port.clone()
    }
}

#[async_trait]
impl LineAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn available_ports(&self) -> AppResult<Vec<String>> {
        Ok(lock(&self.state).ports.clone())
    }

    async fn connect(&mut self, port: &str, _config: &DeviceConfig) -> AppResult<()> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.connect_failure.clone() {
            return Err(DaqError::Connection(format!("{}: {}", port, reason)));
        }
        if !state.ports.is_empty() && !state.ports.iter().any(|p| p == port) {
            return Err(DaqError::Connection(format!("{}: no such port", port)));
        }
        state.connected_port = Some(port.to_string());
        Ok(())
    }

    async fn disconnect(&mut self) {
        lock(&self.state).connected_port = None;
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let mut state = lock(&self.state);
        if state.connected_port.is_none() {
            return Err(DaqError::NotConnected);
        }
        if let Some(reason) = state.send_failure.clone() {
            return Err(DaqError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                reason,
            )));
        }
        state.sent.push(command.to_string());
        if command == "INFO" {
            let reply = state.info_reply.clone();
            for line in reply {
                state.incoming.extend(line.as_bytes());
                state.incoming.push_back(b'\n');
            }
        }
        Ok(())
    }

    async fn try_read_line(&mut self) -> AppResult<Option<String>> {
        let mut state = lock(&self.state);
        if state.connected_port.is_none() {
            return Err(DaqError::NotConnected);
        }
        let mut pending: Vec<u8> = state.incoming.iter().copied().collect();
        let line = take_line(&mut pending);
        state.incoming = pending.into();
        line
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected_port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_commands_and_serves_lines() {
        let mut adapter = MockAdapter::with_ports(["COM3"]);
        let handle = adapter.handle();

        adapter.connect("COM3", &DeviceConfig::default()).await.unwrap();
        adapter.send("START").await.unwrap();
        handle.push_bytes(b"1.2");
        assert_eq!(adapter.try_read_line().await.unwrap(), None);
        handle.push_bytes(b"5\n");
        assert_eq!(adapter.try_read_line().await.unwrap().as_deref(), Some("1.25"));
        assert_eq!(handle.sent(), vec!["START".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_port_is_rejected() {
        let mut adapter = MockAdapter::with_ports(["COM3"]);
        let err = adapter
            .connect("COM9", &DeviceConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::Connection(_)));
    }
}

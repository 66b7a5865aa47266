//! Fixed-interval gauge polling as a cancellable tokio task.
//!
//! Each tick makes one bounded, non-blocking [`DeviceChannel::poll`] attempt
//! and forwards the outcome as a [`PollEvent`]. Malformed lines are reported
//! and polling continues; any other error is reported and ends the task,
//! since the channel has already dropped to `Disconnected`.

use super::DeviceChannel;
use crate::adapters::LineAdapter;
use crate::error::DaqError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Outcome of one poll tick that produced something.
#[derive(Debug)]
pub enum PollEvent {
    /// A numeric sample read from `device_id`.
    Sample {
        value: f64,
        device_id: String,
        at: DateTime<Utc>,
    },
    /// The gauge sent a line that is not a number. Polling continues.
    Malformed(DaqError),
    /// The channel failed. Polling has stopped.
    Failed(DaqError),
}

/// Handle to a running polling task.
pub struct SamplePoller {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl SamplePoller {
    /// Start polling `channel` every `interval`.
    ///
    /// Returns the handle and the receiving end of the event stream. The
    /// task also ends when the receiver is dropped.
    pub fn spawn<A>(
        channel: Arc<Mutex<DeviceChannel<A>>>,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<PollEvent>)
    where
        A: LineAdapter + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("Gauge polling started every {:?}", interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut guard = channel.lock().await;
                        let result = guard.poll().await;
                        let device_id = guard.port().unwrap_or_default().to_string();
                        drop(guard);

                        let (event, keep_going) = match result {
                            Ok(Some(value)) => (
                                Some(PollEvent::Sample { value, device_id, at: Utc::now() }),
                                true,
                            ),
                            Ok(None) => (None, true),
                            Err(e @ DaqError::DataFormat(_)) => {
                                warn!("Discarding malformed gauge line: {}", e);
                                (Some(PollEvent::Malformed(e)), true)
                            }
                            Err(e) => {
                                warn!("Gauge polling failed: {}", e);
                                (Some(PollEvent::Failed(e)), false)
                            }
                        };

                        if let Some(event) = event {
                            if tx.send(event).await.is_err() {
                                debug!("No poll event receiver, stopping gauge polling");
                                break;
                            }
                        }
                        if !keep_going {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Gauge polling shutdown requested");
                        break;
                    }
                }
            }

            info!("Gauge polling stopped");
        });

        (
            Self {
                shutdown_tx: Some(shutdown_tx),
                task_handle: Some(task_handle),
            },
            rx,
        )
    }

    /// Stop polling and wait for the task to finish. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the polling task is still alive.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for SamplePoller {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::config::DeviceConfig;
    use crate::device::ChannelState;

    async fn reading_channel() -> (
        Arc<Mutex<DeviceChannel<MockAdapter>>>,
        crate::adapters::MockHandle,
    ) {
        let adapter = MockAdapter::with_ports(["COM3"]);
        let handle = adapter.handle();
        let mut ch = DeviceChannel::new(adapter, DeviceConfig::default());
        ch.open("COM3").await.unwrap();
        ch.request_start().await.unwrap();
        (Arc::new(Mutex::new(ch)), handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_forwards_samples() {
        let (channel, handle) = reading_channel().await;
        handle.push_line("12.5");
        handle.push_line("bad");
        handle.push_line("3.2");

        let (mut poller, mut events) =
            SamplePoller::spawn(channel.clone(), Duration::from_millis(1000));

        match events.recv().await {
            Some(PollEvent::Sample { value, device_id, .. }) => {
                assert_eq!(value, 12.5);
                assert_eq!(device_id, "COM3");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events.recv().await, Some(PollEvent::Malformed(_))));
        assert!(matches!(
            events.recv().await,
            Some(PollEvent::Sample { value, .. }) if value == 3.2
        ));

        poller.stop().await;
        assert!(!poller.is_running());
        poller.stop().await;
        assert_eq!(channel.lock().await.state(), ChannelState::Reading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ends_when_channel_closes() {
        let (channel, _handle) = reading_channel().await;
        let (mut poller, mut events) =
            SamplePoller::spawn(channel.clone(), Duration::from_millis(1000));

        channel.lock().await.close().await;

        assert!(matches!(
            events.recv().await,
            Some(PollEvent::Failed(DaqError::NotConnected))
        ));
        assert!(events.recv().await.is_none());
        poller.stop().await;
    }
}

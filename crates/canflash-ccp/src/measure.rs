//! DAQ receive loop
//!
//! While a measurement runs, the loop is the only reader of the CAN transport.
//! It polls with a short timeout and checks the `measuring` flag on every
//! iteration, so clearing the flag ends it within one poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use canflash_core::{recv_from, CanTransport, TransportError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::command::pid;
use crate::daq::DaqAllocation;
use crate::telemetry::{Sample, TelemetryQueue};

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub frames: u64,
    pub samples: u64,
    pub decode_errors: u64,
    /// DTOs whose PID belongs to no DAQ list
    pub unattributed: u64,
    /// Set when the loop stopped on a transport error rather than the flag
    pub transport_error: bool,
}

/// A running receive loop
pub struct MeasurementHandle {
    measuring: Arc<AtomicBool>,
    queue: Arc<TelemetryQueue>,
    task: Option<JoinHandle<ReceiveStats>>,
}

impl MeasurementHandle {
    pub fn queue(&self) -> Arc<TelemetryQueue> {
        self.queue.clone()
    }

    pub fn is_running(&self) -> bool {
        self.measuring.load(Ordering::SeqCst)
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Clear the flag and wait for the loop to exit
    pub async fn stop(mut self) -> ReceiveStats {
        self.measuring.store(false, Ordering::SeqCst);
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!(error = %e, "DAQ receive loop ended abnormally");
                ReceiveStats::default()
            }),
            None => ReceiveStats::default(),
        }
    }
}

impl Drop for MeasurementHandle {
    fn drop(&mut self) {
        self.measuring.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn the receive loop for `allocation`
pub fn spawn_receive_loop(
    transport: Arc<dyn CanTransport>,
    dto_id: u32,
    allocation: Arc<DaqAllocation>,
    poll: Duration,
) -> MeasurementHandle {
    let measuring = Arc::new(AtomicBool::new(true));
    let queue = Arc::new(TelemetryQueue::new());
    let task = tokio::spawn(receive_loop(
        transport,
        dto_id,
        allocation,
        queue.clone(),
        measuring.clone(),
        poll,
    ));
    MeasurementHandle {
        measuring,
        queue,
        task: Some(task),
    }
}

async fn receive_loop(
    transport: Arc<dyn CanTransport>,
    dto_id: u32,
    allocation: Arc<DaqAllocation>,
    queue: Arc<TelemetryQueue>,
    measuring: Arc<AtomicBool>,
    poll: Duration,
) -> ReceiveStats {
    let mut stats = ReceiveStats::default();
    debug!(dto_id = format!("0x{:X}", dto_id), "DAQ receive loop started");

    while measuring.load(Ordering::SeqCst) {
        let frame = match recv_from(transport.as_ref(), dto_id, poll).await {
            Ok(frame) => frame,
            Err(TransportError::Timeout(_)) => continue,
            Err(e) => {
                warn!(error = %e, "DAQ receive failed, stopping loop");
                stats.transport_error = true;
                break;
            }
        };
        // stopped while waiting: drop the frame
        if !measuring.load(Ordering::SeqCst) {
            break;
        }
        stats.frames += 1;

        let Some(&first) = frame.data.first() else {
            continue;
        };
        if first == pid::COMMAND_RETURN || first == pid::EVENT {
            debug!(pid = first, data = %hex::encode_upper(&frame.data), "Non-DAQ DTO during measurement");
            continue;
        }

        let Some(values) = allocation.decode_frame(&frame.data) else {
            trace!(pid = first, "DTO outside every DAQ list");
            stats.unattributed += 1;
            continue;
        };
        let received = Instant::now();
        for (index, value) in values {
            match value {
                Ok(value) => {
                    queue.push(
                        index,
                        Sample {
                            value,
                            pid: first,
                            received,
                        },
                    );
                    stats.samples += 1;
                }
                Err(e) => {
                    warn!(index, error = %e, "Skipping sample");
                    stats.decode_errors += 1;
                }
            }
        }
    }

    debug!(
        frames = stats.frames,
        samples = stats.samples,
        decode_errors = stats.decode_errors,
        "DAQ receive loop stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daq::{allocate_daq, DaqListInfo};
    use canflash_conv::{DataType, ItemDescriptor, MeasurementItem};
    use canflash_core::MockCanTransport;

    const DTO: u32 = 0x7E1;

    fn allocation() -> Arc<DaqAllocation> {
        let mut items = vec![
            MeasurementItem::new(ItemDescriptor::new("a", DataType::Ubyte, 0x10), 0),
            MeasurementItem::new(
                ItemDescriptor::table("mode", DataType::Ubyte, 0x11, [(0, "OFF"), (1, "ON")]),
                0,
            ),
        ];
        let lists = [DaqListInfo {
            daq_number: 0,
            odts_size: 2,
            first_pid: 0x00,
        }];
        Arc::new(allocate_daq(&mut items, &lists).unwrap())
    }

    fn open_mock() -> MockCanTransport {
        let mock = MockCanTransport::new();
        mock.open("can0", 500_000).unwrap();
        mock
    }

    #[tokio::test]
    async fn test_loop_decodes_and_skips_bad_samples() {
        let mock = open_mock();
        let handle = spawn_receive_loop(
            Arc::new(mock.clone()),
            DTO,
            allocation(),
            Duration::from_millis(10),
        );
        let queue = handle.queue();

        mock.inject(DTO, &[0x00, 7, 1, 0, 0, 0, 0, 0]);
        mock.inject(DTO, &[0x00, 8, 5, 0, 0, 0, 0, 0]); // 5 is not in the table
        mock.inject(DTO, &[0x05, 1, 2, 3, 4, 5, 6, 7]);
        mock.inject(DTO, &[0xFF, 0x00, 0x01, 0, 0, 0, 0, 0]);
        mock.inject(0x123, &[0x00, 9, 0, 0, 0, 0, 0, 0]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = handle.stop().await;

        assert_eq!(stats.frames, 4);
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.unattributed, 1);
        assert!(!stats.transport_error);

        let values: Vec<(usize, String)> = queue
            .drain()
            .into_iter()
            .map(|(i, s)| (i, s.value))
            .collect();
        assert_eq!(values, vec![(0, "8".to_string()), (1, "ON".to_string())]);
    }

    #[tokio::test]
    async fn test_stop_ends_loop_within_poll() {
        let mock = open_mock();
        let poll = Duration::from_millis(20);
        let handle = spawn_receive_loop(Arc::new(mock.clone()), DTO, allocation(), poll);
        let queue = handle.queue();
        assert!(handle.is_running());

        let stopped = Instant::now();
        let _ = tokio::time::timeout(poll * 5, handle.stop())
            .await
            .expect("receive loop did not stop");
        assert!(stopped.elapsed() < poll * 5);

        mock.inject(DTO, &[0x00, 1, 1, 0, 0, 0, 0, 0]);
        tokio::time::sleep(poll * 2).await;
        assert!(queue.is_empty());
        assert_eq!(queue.pushed(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_ends_loop() {
        let mock = open_mock();
        let handle = spawn_receive_loop(
            Arc::new(mock.clone()),
            DTO,
            allocation(),
            Duration::from_millis(10),
        );
        mock.close().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_running());
        let stats = handle.stop().await;
        assert!(stats.transport_error);
    }
}

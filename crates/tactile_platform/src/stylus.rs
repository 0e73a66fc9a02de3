//! Stylus packet acquisition on a dedicated worker thread
//!
//! The digitizer read loop must never stall behind UI work, so it runs on its
//! own thread. The worker touches no UI state: it wraps each packet in an
//! [`InputReport`], pushes it onto a shared [`ReportQueue`], and wakes the UI
//! loop. The UI thread drains the queue on its own schedule.
//!
//! ```text
//! PenReader (blocking read) ──▶ StylusWorker ──▶ ReportQueue ──▶ UI thread
//!                                    └── wake callback ─────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::{PlatformError, Result};
use crate::input::{InputReport, PenPacket, ReportPayload, SourceId};

/// Source of digitizer packets, read on the worker thread
///
/// `read_packet` may block, but should return periodically so that
/// [`StylusWorker::stop`] is honored. Returning `None` ends the read loop.
pub trait PenReader: Send + 'static {
    fn read_packet(&mut self) -> Option<PenPacket>;
}

/// Callback for waking the UI thread's event loop
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

/// Bounded queue of reports handed from producer threads to the UI thread
///
/// When full, new reports are dropped and counted; the producer never waits.
#[derive(Clone)]
pub struct ReportQueue {
    inner: Arc<Mutex<VecDeque<InputReport>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    /// Set while a worker feeds this queue
    attached: Arc<AtomicBool>,
}

impl ReportQueue {
    /// Create a queue holding at most `capacity` reports
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
            attached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue a report, returning false if it was dropped
    pub fn push(&self, report: InputReport) -> bool {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        queue.push_back(report);
        true
    }

    /// Take every queued report, oldest first
    pub fn drain(&self) -> Vec<InputReport> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of reports dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Background pen read loop
pub struct StylusWorker {
    queue: ReportQueue,
    stop_flag: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl StylusWorker {
    /// Spawn the worker thread
    ///
    /// Every packet read from `reader` is tagged with `source` and pushed onto
    /// `queue`; `wake` is invoked after each successful push.
    pub fn start<R: PenReader>(
        mut reader: R,
        source: SourceId,
        queue: ReportQueue,
        wake: Option<WakeCallback>,
    ) -> Result<Self> {
        if queue
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PlatformError::StylusRunning);
        }
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);
        let thread_queue = queue.clone();

        let handle = thread::Builder::new()
            .name("tactile-stylus".into())
            .spawn(move || {
                tracing::debug!("Stylus worker started for {:?}", source);
                while !thread_stop.load(Ordering::Relaxed) {
                    let Some(packet) = reader.read_packet() else {
                        break;
                    };
                    let report =
                        InputReport::new(source, packet.timestamp, ReportPayload::Pen(packet));
                    if thread_queue.push(report) {
                        if let Some(ref wake) = wake {
                            wake();
                        }
                    } else {
                        tracing::trace!("Stylus queue full, packet dropped");
                    }
                }
                tracing::debug!("Stylus worker exiting");
            })
            .map_err(|e| {
                queue.attached.store(false, Ordering::Release);
                PlatformError::StylusSpawn(e.to_string())
            })?;

        Ok(Self {
            queue,
            stop_flag,
            thread_handle: Some(handle),
        })
    }

    /// The queue this worker feeds
    pub fn queue(&self) -> &ReportQueue {
        &self.queue
    }

    /// Check if the worker thread is still attached
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the worker to stop and wait for it
    pub fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            let joined = handle.join();
            self.queue.attached.store(false, Ordering::Release);
            joined.map_err(|_| PlatformError::StylusPanicked)?;
        }
        Ok(())
    }
}

impl Drop for StylusWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!("Stylus worker shutdown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{PenPhase, Point};
    use std::sync::atomic::AtomicUsize;

    struct ScriptedReader {
        packets: Vec<PenPacket>,
    }

    impl PenReader for ScriptedReader {
        fn read_packet(&mut self) -> Option<PenPacket> {
            if self.packets.is_empty() {
                None
            } else {
                Some(self.packets.remove(0))
            }
        }
    }

    fn packet(phase: PenPhase, t: u64) -> PenPacket {
        PenPacket {
            phase,
            position: Point::new(t as f32, 0.0),
            pressure: 0.5,
            timestamp: t,
        }
    }

    #[test]
    fn test_queue_drops_when_full() {
        let queue = ReportQueue::new(2);
        let report = InputReport::new(
            SourceId(1),
            0,
            ReportPayload::Pen(packet(PenPhase::Move, 0)),
        );
        assert!(queue.push(report.clone()));
        assert!(queue.push(report.clone()));
        assert!(!queue.push(report));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_worker_hands_off_packets_in_order() {
        let queue = ReportQueue::new(16);
        let wakes = Arc::new(AtomicUsize::new(0));
        let wakes_clone = Arc::clone(&wakes);
        let reader = ScriptedReader {
            packets: vec![
                packet(PenPhase::Down, 1),
                packet(PenPhase::Move, 2),
                packet(PenPhase::Up, 3),
            ],
        };

        let mut worker = StylusWorker::start(
            reader,
            SourceId(9),
            queue.clone(),
            Some(Arc::new(move || {
                wakes_clone.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        // The scripted reader ends the loop once exhausted.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while worker.is_running() && std::time::Instant::now() < deadline {
            thread::yield_now();
        }
        worker.stop().unwrap();

        let reports = queue.drain();
        let stamps: Vec<u64> = reports.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
        assert!(reports.iter().all(|r| r.source == SourceId(9)));
        assert_eq!(wakes.load(Ordering::SeqCst), 3);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_one_worker_per_queue() {
        let queue = ReportQueue::new(4);
        let empty = || ScriptedReader { packets: Vec::new() };

        let mut first = StylusWorker::start(empty(), SourceId(1), queue.clone(), None).unwrap();
        let second = StylusWorker::start(empty(), SourceId(1), queue.clone(), None);
        assert!(matches!(second, Err(PlatformError::StylusRunning)));

        first.stop().unwrap();
        let mut third = StylusWorker::start(empty(), SourceId(1), queue, None).unwrap();
        third.stop().unwrap();
    }
}

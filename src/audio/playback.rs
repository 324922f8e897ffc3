//! Playback scheduling
//!
//! The scheduler owns a virtual output clock: each fragment is scheduled at
//! `max(clock now, next free time)` and the next-free time advances by the
//! fragment's duration. Fragments therefore play gaplessly in enqueue order
//! whether they arrive in a burst or trickle in behind a network stall.
//!
//! Actual sample delivery goes through a [`PlaybackSink`]: a queue-fed cpal
//! output stream in production, a recording null sink in tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error};

/// Output surface for decoded audio. `enqueue` appends to the device queue
/// in call order; `clear` drops everything queued and playing.
pub trait PlaybackSink: Send + Sync {
    fn enqueue(&self, samples: Vec<f32>);
    fn clear(&self);
}

struct SchedulerInner {
    next_free: Duration,
    active: HashSet<u64>,
    next_id: u64,
    /// Bumped on interrupt so stale end-of-playback waiters no-op
    generation: u64,
}

/// Virtual-clock playback scheduler. Clones share state.
#[derive(Clone)]
pub struct PlaybackScheduler {
    sink: Arc<dyn PlaybackSink>,
    sample_rate: u32,
    epoch: Instant,
    inner: Arc<Mutex<SchedulerInner>>,
    speaking_tx: Arc<watch::Sender<bool>>,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn PlaybackSink>, sample_rate: u32) -> Self {
        let (speaking_tx, _) = watch::channel(false);
        Self {
            sink,
            sample_rate,
            epoch: Instant::now(),
            inner: Arc::new(Mutex::new(SchedulerInner {
                next_free: Duration::ZERO,
                active: HashSet::new(),
                next_id: 0,
                generation: 0,
            })),
            speaking_tx: Arc::new(speaking_tx),
        }
    }

    /// Schedule a decoded fragment; returns its playback window relative to
    /// the scheduler's clock origin.
    pub fn enqueue(&self, samples: Vec<f32>) -> (Duration, Duration) {
        let duration =
            Duration::from_secs_f64(samples.len() as f64 / self.sample_rate as f64);

        let (start, end, id, generation) = {
            let mut inner = self.inner.lock().unwrap();
            let now = self.epoch.elapsed();
            let start = now.max(inner.next_free);
            let end = start + duration;
            inner.next_free = end;
            let id = inner.next_id;
            inner.next_id += 1;
            inner.active.insert(id);
            (start, end, id, inner.generation)
        };

        self.set_speaking(true);
        self.sink.enqueue(samples);
        debug!(?start, ?end, "fragment scheduled");

        // End-of-playback waiter: releases the fragment and signals when the
        // active set drains.
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(scheduler.epoch + end).await;
            let drained = {
                let mut inner = scheduler.inner.lock().unwrap();
                if inner.generation != generation {
                    return;
                }
                inner.active.remove(&id);
                inner.active.is_empty()
            };
            if drained {
                scheduler.set_speaking(false);
            }
        });

        (start, end)
    }

    /// Stop everything: active and pending fragments, queued samples, and
    /// the virtual clock.
    pub fn interrupt(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.generation += 1;
            inner.active.clear();
            inner.next_free = Duration::ZERO;
        }
        self.sink.clear();
        self.set_speaking(false);
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking_tx.borrow()
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    // Signal on transitions only
    fn set_speaking(&self, speaking: bool) {
        self.speaking_tx.send_if_modified(|current| {
            if *current != speaking {
                *current = speaking;
                true
            } else {
                false
            }
        });
    }
}

/// Queue-fed cpal output sink. The stream lives on a dedicated thread (cpal
/// streams are not Send) and pulls from a shared sample queue, padding with
/// silence when the queue runs dry.
pub struct CpalQueueSink {
    queue: Arc<Mutex<VecDeque<f32>>>,
    // Dropping the sender unparks and ends the stream thread
    _stop: std::sync::mpsc::Sender<()>,
}

impl CpalQueueSink {
    pub fn new(sample_rate: u32) -> anyhow::Result<Self> {
        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let cb_queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            let setup = move || -> anyhow::Result<cpal::Stream> {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or_else(|| anyhow::anyhow!("no output device available"))?;

                let supported = device
                    .supported_output_configs()?
                    .find(|c| {
                        c.channels() == 1
                            && c.sample_format() == SampleFormat::F32
                            && c.min_sample_rate() <= SampleRate(sample_rate)
                            && c.max_sample_rate() >= SampleRate(sample_rate)
                    })
                    .or_else(|| {
                        device.supported_output_configs().ok()?.find(|c| {
                            c.channels() == 2
                                && c.sample_format() == SampleFormat::F32
                                && c.min_sample_rate() <= SampleRate(sample_rate)
                                && c.max_sample_rate() >= SampleRate(sample_rate)
                        })
                    })
                    .ok_or_else(|| anyhow::anyhow!("no suitable output config found"))?
                    .with_sample_rate(SampleRate(sample_rate));

                let config = supported.config();
                let channels = config.channels as usize;
                debug!(
                    device = device.name().unwrap_or_default(),
                    sample_rate, channels, "playback sink initialized"
                );

                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut queue = match cb_queue.lock() {
                            Ok(q) => q,
                            Err(_) => return,
                        };
                        for frame in data.chunks_mut(channels) {
                            let sample = queue.pop_front().unwrap_or(0.0);
                            for out in frame.iter_mut() {
                                *out = sample;
                            }
                        }
                    },
                    |err| {
                        error!(error = %err, "playback sink error");
                    },
                    None,
                )?;
                stream.play()?;
                Ok(stream)
            };

            match setup() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("playback thread exited during setup"))??;

        Ok(Self { queue, _stop: stop_tx })
    }
}

impl PlaybackSink for CpalQueueSink {
    fn enqueue(&self, samples: Vec<f32>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(samples);
        }
    }

    fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }
}

/// Discards audio but records what it saw. For tests and headless runs.
#[derive(Default)]
pub struct NullSink {
    enqueued: Mutex<Vec<usize>>,
    clears: Mutex<usize>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lengths of the fragments enqueued so far, in order
    pub fn enqueued_lens(&self) -> Vec<usize> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn clear_count(&self) -> usize {
        *self.clears.lock().unwrap()
    }
}

impl PlaybackSink for NullSink {
    fn enqueue(&self, samples: Vec<f32>) {
        self.enqueued.lock().unwrap().push(samples.len());
    }

    fn clear(&self) {
        *self.clears.lock().unwrap() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(samples: usize) -> Vec<f32> {
        vec![0.1; samples]
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_schedule_back_to_back() {
        let sink = Arc::new(NullSink::new());
        let scheduler = PlaybackScheduler::new(sink.clone(), 24000);

        // 100ms, 50ms, 200ms
        let (s1, e1) = scheduler.enqueue(fragment(2400));
        let (s2, e2) = scheduler.enqueue(fragment(1200));
        let (s3, e3) = scheduler.enqueue(fragment(4800));

        assert_eq!(s1, Duration::ZERO);
        assert_eq!(e1, Duration::from_millis(100));
        assert_eq!(s2, e1);
        assert_eq!(e2, Duration::from_millis(150));
        assert_eq!(s3, e2);
        assert_eq!(e3, Duration::from_millis(350));
        assert_eq!(sink.enqueued_lens(), vec![2400, 1200, 4800]);
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_drops_when_active_set_drains() {
        let sink = Arc::new(NullSink::new());
        let scheduler = PlaybackScheduler::new(sink, 24000);

        assert!(!scheduler.is_speaking());
        scheduler.enqueue(fragment(2400));
        scheduler.enqueue(fragment(2400));
        assert!(scheduler.is_speaking());

        tokio::time::advance(Duration::from_millis(210)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(!scheduler.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_arrival_schedules_from_clock_now() {
        let sink = Arc::new(NullSink::new());
        let scheduler = PlaybackScheduler::new(sink, 24000);

        scheduler.enqueue(fragment(2400)); // [0, 100ms)
        tokio::time::advance(Duration::from_millis(300)).await;
        let (s2, e2) = scheduler.enqueue(fragment(2400));
        assert_eq!(s2, Duration::from_millis(300));
        assert_eq!(e2, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_clears_everything() {
        let sink = Arc::new(NullSink::new());
        let scheduler = PlaybackScheduler::new(sink.clone(), 24000);

        scheduler.enqueue(fragment(24000));
        assert!(scheduler.is_speaking());

        scheduler.interrupt();
        assert!(!scheduler.is_speaking());
        assert_eq!(sink.clear_count(), 1);

        // Clock reset: the next fragment starts at the current instant
        tokio::time::advance(Duration::from_millis(10)).await;
        let (start, _) = scheduler.enqueue(fragment(2400));
        assert_eq!(start, Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_waiter_does_not_clear_speaking_after_interrupt() {
        let sink = Arc::new(NullSink::new());
        let scheduler = PlaybackScheduler::new(sink, 24000);

        scheduler.enqueue(fragment(2400)); // waiter armed for 100ms
        scheduler.interrupt();
        scheduler.enqueue(fragment(24000)); // 1s fragment, speaking again

        tokio::time::advance(Duration::from_millis(150)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        // The pre-interrupt waiter fired but must not have touched the set
        assert!(scheduler.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_interrupt_emits_nothing() {
        let sink = Arc::new(NullSink::new());
        let scheduler = PlaybackScheduler::new(sink, 24000);
        let mut speaking = scheduler.subscribe_speaking();

        scheduler.interrupt();
        assert!(!speaking.has_changed().unwrap());
    }
}

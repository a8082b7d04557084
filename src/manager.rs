use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};

use crate::aggregate::SignalAggregator;
use crate::capture::{CaptureSession, CaptureSource, CaptureTool};
use crate::config::EmptyScanPolicy;
use crate::delivery::{DEFAULT_DELIVERY_TIMEOUT, DeliveryQueue, DrainReport};
use crate::error::ScanError;
use crate::filter::PresenceFilter;
use crate::messages::{OccupancyRecord, SelectedDevice};
use crate::report::Reporter;
use crate::sink::Sink;
use crate::vendor::VendorClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Capturing,
    Aggregating,
    Classifying,
    Filtering,
    Enqueue,
    Draining,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed { estimate: u64, selected: usize, drain: DrainReport },
    /// The window had no parseable frames; nothing was enqueued.
    Empty { drain: DrainReport },
}

/// Drives capture cycles one after another and owns the delivery queue.
pub struct Manager<T> {
    session: CaptureSession<T>,
    source: CaptureSource,
    classifier: VendorClassifier,
    filter: PresenceFilter,
    sink: Box<dyn Sink>,
    queue: DeliveryQueue,
    delivery_timeout: Duration,
    empty_scan: EmptyScanPolicy,
    serial: String,
    reporter: Reporter,
    state: CycleState,
}

impl<T: CaptureTool> Manager<T> {
    pub fn new(
        session: CaptureSession<T>,
        source: CaptureSource,
        classifier: VendorClassifier,
        filter: PresenceFilter,
        sink: Box<dyn Sink>,
        serial: String,
    ) -> Self {
        Manager {
            session,
            source,
            classifier,
            filter,
            sink,
            queue: DeliveryQueue::new(None),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            empty_scan: EmptyScanPolicy::default(),
            serial,
            reporter: Reporter::default(),
            state: CycleState::Idle,
        }
    }

    pub fn with_delivery(mut self, timeout: Duration, max_queued_records: usize) -> Self {
        self.delivery_timeout = timeout;
        self.queue = DeliveryQueue::new(Some(max_queued_records));
        self
    }

    pub fn with_empty_scan(mut self, policy: EmptyScanPolicy) -> Self {
        self.empty_scan = policy;
        self
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    fn enter(&mut self, state: CycleState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub async fn run_loop(&mut self, once: bool) -> Result<(), ScanError> {
        loop {
            match self.run_cycle().await? {
                CycleOutcome::Completed {
                    estimate,
                    selected,
                    drain,
                } => debug!(
                    "Cycle done: {} selected, estimate {}, {} delivered, {} queued",
                    selected, estimate, drain.delivered, drain.remaining
                ),
                CycleOutcome::Empty { drain } => {
                    debug!("Empty cycle: {} delivered, {} queued", drain.delivered, drain.remaining)
                }
            }
            if once {
                return Ok(());
            }
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, ScanError> {
        self.enter(CycleState::Capturing);
        let started = Instant::now();
        let mut aggregator = SignalAggregator::new();
        let captured = self
            .session
            .run(&self.source, |observation| aggregator.push(observation))
            .await;

        match captured {
            Ok(_) => {}
            Err(err @ ScanError::NoSignalsFound { .. }) if self.empty_scan == EmptyScanPolicy::Skip => {
                warn!("{err}");
                let drain = self.drain().await;
                self.wait_out_window(started).await;
                return Ok(CycleOutcome::Empty { drain });
            }
            Err(err) => {
                self.enter(CycleState::Idle);
                return Err(err);
            }
        }

        self.enter(CycleState::Aggregating);
        debug!("{} distinct addresses", aggregator.len());
        let devices = aggregator.finish();

        self.enter(CycleState::Classifying);
        let classified = self.classifier.classify(&devices);
        self.reporter.classified(&classified);

        self.enter(CycleState::Filtering);
        let selection = self.filter.apply(classified);

        self.enter(CycleState::Enqueue);
        let now = Utc::now();
        let record = OccupancyRecord {
            devices: selection.selected.iter().map(SelectedDevice::from).collect(),
            timestamp: now.timestamp(),
            serial: self.serial.clone(),
        };
        info!(
            "{} of {} devices selected, estimate {}",
            record.devices.len(),
            devices.len(),
            selection.estimate
        );
        self.reporter.selected(
            &record.devices,
            selection.estimate,
            now.timestamp_millis() as f64 / 1000.0,
        );
        self.queue.push(record);

        let drain = self.drain().await;
        Ok(CycleOutcome::Completed {
            estimate: selection.estimate,
            selected: selection.selected.len(),
            drain,
        })
    }

    /// A capture that gave up early (adapter gone, no monitor mode) must not
    /// turn the loop into back-to-back tool launches.
    async fn wait_out_window(&self, started: Instant) {
        if let CaptureSource::Live { duration, .. } = &self.source {
            let left = duration.saturating_sub(started.elapsed());
            if !left.is_zero() {
                debug!("Capture ended {:.1}s early, waiting out the window", left.as_secs_f64());
                tokio::time::sleep(left).await;
            }
        }
    }

    async fn drain(&mut self) -> DrainReport {
        self.enter(CycleState::Draining);
        let report = self
            .queue
            .drain(self.sink.as_mut(), self.delivery_timeout)
            .await;
        self.enter(CycleState::Idle);
        report
    }
}

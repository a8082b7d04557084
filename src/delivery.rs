use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::DeliveryError;
use crate::messages::OccupancyRecord;
use crate::sink::Sink;

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_QUEUED_RECORDS: usize = 10_000;

/// Records waiting for an acknowledged delivery, oldest first. A record
/// leaves the front only once the sink has acked it.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    records: VecDeque<OccupancyRecord>,
    capacity: Option<usize>,
}

#[derive(Debug)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
    pub failure: Option<DeliveryError>,
}

impl DeliveryQueue {
    /// `None` (or `Some(0)`) keeps every record until it is delivered.
    pub fn new(capacity: Option<usize>) -> Self {
        DeliveryQueue {
            records: VecDeque::new(),
            capacity: capacity.filter(|c| *c > 0),
        }
    }

    /// Append to the tail. If that exceeds the capacity, the oldest record is
    /// evicted and returned.
    pub fn push(&mut self, record: OccupancyRecord) -> Option<OccupancyRecord> {
        self.records.push_back(record);
        match self.capacity {
            Some(capacity) if self.records.len() > capacity => {
                let evicted = self.records.pop_front();
                if let Some(evicted) = &evicted {
                    warn!(
                        "Delivery queue full ({} records), discarding record from {}",
                        capacity, evicted.timestamp
                    );
                }
                evicted
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OccupancyRecord> {
        self.records.iter()
    }

    /// Deliver from the front until the queue is empty or one attempt fails.
    /// Only one record is in flight at a time.
    pub async fn drain(&mut self, sink: &mut dyn Sink, timeout: Duration) -> DrainReport {
        let mut delivered = 0;
        let mut failure = None;

        while let Some(record) = self.records.front() {
            let result = match tokio::time::timeout(timeout, sink.deliver(record)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(timeout)),
            };
            match result {
                Ok(()) => {
                    self.records.pop_front();
                    delivered += 1;
                }
                Err(err) => {
                    warn!(
                        "Problem sending to {}: {}; {} records queued",
                        sink.describe(),
                        err,
                        self.records.len()
                    );
                    failure = Some(err);
                    break;
                }
            }
        }

        if delivered > 0 {
            info!("Delivered {} records to {}", delivered, sink.describe());
        } else if failure.is_none() {
            debug!("Nothing to deliver");
        }

        DrainReport {
            delivered,
            remaining: self.records.len(),
            failure,
        }
    }
}

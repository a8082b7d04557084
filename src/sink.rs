use std::time::Duration;

use futures::future::BoxFuture;
use log::debug;

use crate::error::{DeliveryError, ScanError};
use crate::messages::OccupancyRecord;

/// Where occupancy records go. A delivery only counts once the remote end
/// has acknowledged it.
pub trait Sink: Send {
    fn deliver<'a>(&'a mut self, record: &'a OccupancyRecord) -> BoxFuture<'a, Result<(), DeliveryError>>;

    fn describe(&self) -> String;
}

/// Posts each record as a JSON document. Any 2xx response is an ack.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wifi-occupancy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScanError::Config(format!("couldn't build HTTP client: {e}")))?;
        Ok(HttpSink {
            client,
            url: url.into(),
            timeout,
        })
    }
}

impl Sink for HttpSink {
    fn deliver<'a>(&'a mut self, record: &'a OccupancyRecord) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .json(record)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        DeliveryError::Timeout(self.timeout)
                    } else {
                        DeliveryError::Transport(e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(DeliveryError::Rejected {
                    status: status.as_u16(),
                });
            }
            debug!("{} acknowledged record from {}", self.url, record.timestamp);
            Ok(())
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_sink_describe() {
        let sink = HttpSink::new("http://localhost:5000/wifi-scan", Duration::from_secs(5)).unwrap();
        assert_eq!(sink.describe(), "http://localhost:5000/wifi-scan");
    }

    #[tokio::test]
    async fn test_http_sink_unreachable_is_transport_error() {
        // Nothing listens on the discard port.
        let mut sink = HttpSink::new("http://127.0.0.1:9/wifi-scan", Duration::from_secs(2)).unwrap();
        let record = OccupancyRecord {
            devices: Vec::new(),
            timestamp: 0,
            serial: "0000000000000000".to_string(),
        };
        let err = sink.deliver(&record).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Transport(_) | DeliveryError::Timeout(_)
        ));
    }
}

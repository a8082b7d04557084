use std::time::Duration;

use futures::future::BoxFuture;
use log::debug;
use rumqttc::{Event, MqttOptions, Outgoing, Packet, QoS};

use crate::config;
use crate::error::DeliveryError;
use crate::messages::OccupancyRecord;
use crate::sink::Sink;

/// Publishes records with QoS 1 and waits for the broker's PUBACK.
pub struct MqttSink {
    options: MqttOptions,
    topic: String,
    connection: Option<(rumqttc::AsyncClient, rumqttc::EventLoop)>,
}

impl MqttSink {
    pub fn new(config: &config::MqttConfig, serial: &str) -> Self {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| format!("wifi-occupancy-{}", sanitize_name(serial)));

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let topic_path = config
            .topic_path
            .clone()
            .unwrap_or_else(|| "occupancy".to_string());

        MqttSink {
            options: mqttoptions,
            topic: format!("{}/{}/occupancy", topic_path, sanitize_name(&publisher_id)),
            connection: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// A kept connection sits unpolled between cycles and the broker may
    /// have dropped it on keep-alive, so a failure on a reused connection
    /// gets one more try on a fresh one.
    async fn publish(&mut self, payload: Vec<u8>) -> Result<(), DeliveryError> {
        if let Some(connection) = self.connection.take() {
            match exchange(&self.topic, connection, payload.clone()).await {
                Ok(connection) => {
                    self.connection = Some(connection);
                    return Ok(());
                }
                Err(e) => debug!("Reused connection failed ({e}), reconnecting"),
            }
        }

        let fresh = rumqttc::AsyncClient::new(self.options.clone(), 10);
        let connection = exchange(&self.topic, fresh, payload).await?;
        self.connection = Some(connection);
        Ok(())
    }
}

/// Publishes once and polls until the matching PUBACK. The connection is
/// only handed back when acked, so an abandoned attempt also abandons
/// its in-flight packet state.
async fn exchange(
    topic: &str,
    (client, mut eventloop): (rumqttc::AsyncClient, rumqttc::EventLoop),
    payload: Vec<u8>,
) -> Result<(rumqttc::AsyncClient, rumqttc::EventLoop), DeliveryError> {
    client
        .publish(topic, QoS::AtLeastOnce, false, payload)
        .await
        .map_err(|e| DeliveryError::Transport(e.to_string()))?;

    let mut pkid = None;
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(id))) if pkid.is_none() => {
                pkid = Some(id);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) if Some(ack.pkid) == pkid => {
                debug!("Broker acknowledged packet {}", ack.pkid);
                break;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                debug!("Connection acknowledged");
            }
            Ok(_) => {}
            Err(e) => return Err(DeliveryError::Transport(e.to_string())),
        }
    }

    Ok((client, eventloop))
}

impl Sink for MqttSink {
    fn deliver<'a>(&'a mut self, record: &'a OccupancyRecord) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(record)?;
            self.publish(payload).await
        })
    }

    fn describe(&self) -> String {
        let (host, port) = self.options.broker_address();
        format!("mqtt://{host}:{port}/{}", self.topic)
    }
}

fn sanitize_name(name: &str) -> String {
    // Lowercased, anything but letters and digits becomes '_'
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}

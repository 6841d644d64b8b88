//! Live sighting fan-out over MQTT.
//!
//! Each accepted sighting is published to the probe topic; a retained
//! `Online`/`Offline` pair on the status topic tells consumers whether the
//! sensor is up. The broker is best-effort: publishes are non-blocking and
//! the event loop reconnects on its own, so the store never waits on it.

use crate::config::MqttConfig;
use crate::probe::Probe;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::time::Duration;

pub struct ProbePublisher {
    client: AsyncClient,
    probe_topic: String,
    status_topic: String,
}

impl ProbePublisher {
    /// Build the client and spawn its event loop. The last will leaves a
    /// retained `Offline` if the process dies uncleanly.
    pub fn connect(config: &MqttConfig) -> Self {
        let client_id = format!("wuds-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_last_will(LastWill::new(
            &config.status_topic,
            "Offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let status_client = client.clone();
        let status_topic = config.status_topic.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        if let Err(e) = status_client.try_publish(
                            &status_topic,
                            QoS::AtLeastOnce,
                            true,
                            "Online",
                        ) {
                            warn!("Failed to publish Online status: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}, retrying in 5s", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        ProbePublisher {
            client,
            probe_topic: config.probe_topic.clone(),
            status_topic: config.status_topic.clone(),
        }
    }

    /// Non-blocking publish; a full queue or lost broker drops the message
    /// while the sighting still lands in the store.
    pub fn publish(&self, probe: &Probe) {
        if let Err(e) = self
            .client
            .try_publish(&self.probe_topic, QoS::AtMostOnce, false, probe.mqtt_json())
        {
            debug!("MQTT publish dropped: {}", e);
        }
    }

    /// Clean shutdown: retained `Offline` so consumers don't wait on the
    /// last will, then disconnect.
    pub async fn shutdown(&self) {
        let _ = self
            .client
            .publish(&self.status_topic, QoS::AtLeastOnce, true, "Offline")
            .await;
        let _ = self.client.disconnect().await;
    }
}

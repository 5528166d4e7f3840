//! MQTT downstream transport: the broker-facing side of the gateway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tracing::warn;

/// One decoded message off the broker.
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MqttDownstreamConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Topic filter covering all vehicle telemetry, e.g. `ovms/#`.
    pub subscribe_filter: String,
}

impl Default for MqttDownstreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "ovms-gateway".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            subscribe_filter: "ovms/#".to_string(),
        }
    }
}

#[async_trait]
pub trait DownstreamInterface: Send {
    async fn subscribe(&mut self) -> Result<()>;
    async fn recv(&mut self) -> Result<Option<MqttMessage>>;
}

pub struct MqttDownstream {
    cfg: MqttDownstreamConfig,
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
}

impl MqttDownstream {
    pub async fn connect(cfg: MqttDownstreamConfig) -> Result<Self> {
        let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));

        if let (Some(u), Some(p)) = (cfg.username.clone(), cfg.password.clone()) {
            opts.set_credentials(u, p);
        }

        let (client, eventloop) = AsyncClient::new(opts, 50);
        Ok(Self {
            cfg,
            client,
            eventloop,
        })
    }
}

#[async_trait]
impl DownstreamInterface for MqttDownstream {
    async fn subscribe(&mut self) -> Result<()> {
        self.client
            .subscribe(&self.cfg.subscribe_filter, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("subscribe failed for '{}'", self.cfg.subscribe_filter))?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<MqttMessage>> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    return Ok(Some(MqttMessage {
                        topic: p.topic,
                        payload: p.payload.to_vec(),
                    }));
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("MQTT poll error: {:?} (retrying)", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

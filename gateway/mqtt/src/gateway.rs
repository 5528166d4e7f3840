//! Gateway = (MQTT downstream) + (dispatch core) + (update channel for
//! the UI-binding collaborator).

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ovmsdispatchengine::{
    DeliveryError, DeliverySink, DispatchPolicy, EntityRegistry, EntityUpdate, StaticCatalog,
    UpdateDispatcher,
};

use crate::downstreaminterface::{DownstreamInterface, MqttDownstream, MqttDownstreamConfig};
use crate::gpsquality::GpsQualityState;

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub downstream: MqttDownstreamConfig,
    pub policy: DispatchPolicy,
    pub update_channel_capacity: usize,
}

/// One delivered update, as handed to the UI-binding collaborator.
#[derive(Debug, Clone)]
pub struct DeliveredUpdate {
    pub entity_id: String,
    pub update: EntityUpdate,
}

/// Delivery primitive backed by a bounded channel. A full channel is a
/// per-observer delivery failure, not an abort of the dispatch pass.
pub struct ChannelSink {
    tx: mpsc::Sender<DeliveredUpdate>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<DeliveredUpdate>) -> Self {
        Self { tx }
    }
}

impl DeliverySink for ChannelSink {
    fn deliver(&self, entity_id: &str, update: EntityUpdate) -> Result<(), DeliveryError> {
        self.tx
            .try_send(DeliveredUpdate {
                entity_id: entity_id.to_string(),
                update,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }
}

pub struct Gateway {
    join: JoinHandle<Result<()>>,
    updates_rx: mpsc::Receiver<DeliveredUpdate>,
    shutdown: CancellationToken,
    registry: Arc<RwLock<EntityRegistry>>,
    gps_quality: Arc<GpsQualityState>,
}

impl Gateway {
    /// Registry handle for the entity-lifecycle collaborator.
    pub fn registry(&self) -> Arc<RwLock<EntityRegistry>> {
        self.registry.clone()
    }

    /// GPS quality state handle for accuracy queries.
    pub fn gps_quality(&self) -> Arc<GpsQualityState> {
        self.gps_quality.clone()
    }

    pub fn updates(&mut self) -> &mut mpsc::Receiver<DeliveredUpdate> {
        &mut self.updates_rx
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.join.await.context("gateway join failed")?
    }

    pub async fn start(cfg: GatewayConfig) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let (updates_tx, updates_rx) = mpsc::channel(cfg.update_channel_capacity.max(1));

        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        let gps_quality = Arc::new(GpsQualityState::new());
        let catalog = Arc::new(StaticCatalog::with_defaults());

        let dispatcher = UpdateDispatcher::new(
            registry.clone(),
            catalog,
            Arc::new(ChannelSink::new(updates_tx)),
        )
        .with_policy(cfg.policy.clone());

        let mut downstream = MqttDownstream::connect(cfg.downstream).await?;
        downstream.subscribe().await?;

        info!("Gateway started: subscribed to vehicle broker.");

        let task_shutdown = shutdown.clone();
        let task_gps_quality = gps_quality.clone();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_shutdown.cancelled() => {
                        info!("Gateway shutdown requested.");
                        break;
                    }

                    msg = downstream.recv() => {
                        let msg = match msg? {
                            Some(m) => m,
                            None => continue,
                        };

                        let payload = match std::str::from_utf8(&msg.payload) {
                            Ok(s) => s,
                            Err(_) => {
                                warn!(topic = %msg.topic, "non-UTF8 payload dropped");
                                continue;
                            }
                        };

                        // Quality readings are tracked before dispatch so an
                        // accuracy query during delivery sees the new value.
                        task_gps_quality.observe(&msg.topic, payload);
                        dispatcher.dispatch_update(&msg.topic, payload);
                    }
                }
            }

            Ok(())
        });

        Ok(Self {
            join,
            updates_rx,
            shutdown,
            registry,
            gps_quality,
        })
    }
}

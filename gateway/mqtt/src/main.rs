use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dt_gateway_ovms::{Gateway, GatewayConfig, MqttDownstreamConfig};
use ovmsdispatchengine::{DispatchPolicy, EntityKind, RelationKind};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let vehicle_id = env_or("OVMS_VEHICLE_ID", "mycar");
    let cfg = GatewayConfig {
        downstream: MqttDownstreamConfig {
            host: env_or("OVMS_MQTT_HOST", "127.0.0.1"),
            port: env_or("OVMS_MQTT_PORT", "1883").parse().unwrap_or(1883),
            client_id: env_or("OVMS_MQTT_CLIENT_ID", "ovms-gateway"),
            username: std::env::var("OVMS_MQTT_USERNAME").ok(),
            password: std::env::var("OVMS_MQTT_PASSWORD").ok(),
            keep_alive_secs: 30,
            subscribe_filter: format!("ovms/{vehicle_id}/#"),
        },
        policy: DispatchPolicy::default(),
        update_channel_capacity: 2048,
    };

    let mut gateway = Gateway::start(cfg).await?;

    // The entity-lifecycle collaborator would populate the registry from
    // discovered topics; seed the usual location set here.
    {
        let registry = gateway.registry();
        let mut reg = registry.write().expect("registry lock");
        let lat_topic = format!("ovms/{vehicle_id}/v/p/latitude");
        let lon_topic = format!("ovms/{vehicle_id}/v/p/longitude");
        reg.register(&lat_topic, "sensor.gps_latitude", EntityKind::Sensor, 0);
        reg.register(&lon_topic, "sensor.gps_longitude", EntityKind::Sensor, 0);
        reg.register(
            &format!("ovms/{vehicle_id}/v/p/location"),
            "device_tracker.car",
            EntityKind::DeviceTracker,
            10,
        );
        reg.register_relationship(
            "device_tracker.car",
            "sensor.gps_latitude",
            RelationKind::CoordinatePair,
        );
        reg.register_relationship(
            "device_tracker.car",
            "sensor.gps_longitude",
            RelationKind::CoordinatePair,
        );
    }

    let shutdown = gateway.shutdown_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    });

    let gps_quality = gateway.gps_quality();
    while let Some(delivered) = gateway.updates().recv().await {
        info!(
            entity = %delivered.entity_id,
            topic = %delivered.update.source_topic,
            accuracy = ?gps_quality.get_gps_accuracy(&vehicle_id),
            "update delivered"
        );
    }

    gateway.stop().await
}

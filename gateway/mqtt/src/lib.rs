pub mod downstreaminterface;
pub mod gateway;
pub mod gpsquality;

pub use downstreaminterface::{MqttDownstream, MqttDownstreamConfig, MqttMessage};
pub use gateway::{ChannelSink, DeliveredUpdate, Gateway, GatewayConfig};
pub use gpsquality::GpsQualityState;

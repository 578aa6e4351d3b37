//! Output side of a run: the irrigation controller.
//!
//! `MqttActuator` publishes retained values under `{topic_prefix}/…` so the
//! controller picks them up whenever it next connects. `LogActuator` stands in
//! when no broker is configured. Either way a failed write is logged and
//! recorded, never fatal.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ActuatorConfig;
use crate::error::EtError;
use crate::mqtt::{self, Channel};
use crate::state::RunContext;
use crate::window::Recommendation;

/// How long `close` waits for queued publishes to reach the broker.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Actuator: Send + Sync {
    async fn set_et(&self, et_mm: f64) -> Result<(), EtError>;
    async fn set_watering_ratio(&self, ratio: f64) -> Result<(), EtError>;
    async fn set_irrigation_amount(&self, irrigation_mm: f64) -> Result<(), EtError>;
    async fn set_rain_block(&self, blocked: bool) -> Result<(), EtError>;
}

/// Push every value of the recommendation. Returns the number of failed
/// writes; each failure is logged and recorded in the run context.
pub async fn push_outputs<A>(actuator: &A, rec: &Recommendation, ctx: &mut RunContext) -> usize
where
    A: Actuator + ?Sized,
{
    let writes = [
        (
            "et",
            format!("{:.2}", rec.et_mm),
            actuator.set_et(rec.et_mm).await,
        ),
        (
            "watering_ratio",
            format!("{:.2}", rec.ratio),
            actuator.set_watering_ratio(rec.ratio).await,
        ),
        (
            "irrigation_mm",
            format!("{:.2}", rec.irrigation_mm),
            actuator.set_irrigation_amount(rec.irrigation_mm).await,
        ),
        (
            "rain_block",
            mqtt::switch_payload(rec.rain_block).to_string(),
            actuator.set_rain_block(rec.rain_block).await,
        ),
    ];

    let mut failures = 0;
    for (name, value, result) in writes {
        match result {
            Ok(()) => ctx.record_actuator(format!("{name}={value}")),
            Err(e) => {
                error!(output = name, %value, "actuator: write failed: {e}");
                ctx.record_error(format!("{name}={value}: {e}"));
                failures += 1;
            }
        }
    }
    failures
}

// ---------------------------------------------------------------------------
// MQTT
// ---------------------------------------------------------------------------

pub struct MqttActuator {
    client: AsyncClient,
    prefix: String,
    eventloop: JoinHandle<Result<(), String>>,
}

impl MqttActuator {
    /// Start the client. The connection is made lazily by the event loop
    /// task; an unreachable broker surfaces on the first publish or on
    /// `close`.
    pub fn connect(cfg: &ActuatorConfig, host: &str, port: u16) -> Self {
        let mut opts = MqttOptions::new(cfg.client_id.as_str(), host, port);
        opts.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(opts, 20);

        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("actuator: mqtt connected"),
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(e.to_string()),
                }
            }
        });

        info!(broker = %host, port, prefix = %cfg.topic_prefix, "actuator: mqtt client started");

        Self {
            client,
            prefix: cfg.topic_prefix.clone(),
            eventloop: handle,
        }
    }

    async fn publish(&self, channel: Channel, payload: String) -> Result<(), EtError> {
        let topic = mqtt::topic(&self.prefix, channel);
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, true, payload.into_bytes())
            .await
            .map_err(|e| EtError::ActuatorUnreachable(format!("{topic}: {e}")))
    }

    async fn publish_amount(&self, channel: Channel, value: f64) -> Result<(), EtError> {
        let payload = mqtt::amount_payload(value).map_err(EtError::ActuatorRejected)?;
        self.publish(channel, payload).await
    }

    /// Flush queued publishes, then disconnect.
    pub async fn close(self) -> Result<(), EtError> {
        let Self {
            client,
            mut eventloop,
            ..
        } = self;

        // Fails only when the event loop already stopped; its reason is
        // reported below.
        let _ = client.disconnect().await;

        match tokio::time::timeout(FLUSH_TIMEOUT, &mut eventloop).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(EtError::ActuatorUnreachable(reason)),
            Ok(Err(join)) => Err(EtError::ActuatorUnreachable(format!(
                "mqtt event loop panicked: {join}"
            ))),
            Err(_) => {
                eventloop.abort();
                Err(EtError::ActuatorUnreachable(format!(
                    "publishes not flushed within {}s",
                    FLUSH_TIMEOUT.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl Actuator for MqttActuator {
    async fn set_et(&self, et_mm: f64) -> Result<(), EtError> {
        self.publish_amount(Channel::Et, et_mm).await
    }

    async fn set_watering_ratio(&self, ratio: f64) -> Result<(), EtError> {
        self.publish_amount(Channel::WateringRatio, ratio).await
    }

    async fn set_irrigation_amount(&self, irrigation_mm: f64) -> Result<(), EtError> {
        self.publish_amount(Channel::IrrigationAmount, irrigation_mm)
            .await
    }

    async fn set_rain_block(&self, blocked: bool) -> Result<(), EtError> {
        self.publish(Channel::RainBlock, mqtt::switch_payload(blocked).to_string())
            .await
    }
}

// ---------------------------------------------------------------------------
// Log only
// ---------------------------------------------------------------------------

/// Dry-run actuator: reports the values it would have sent.
pub struct LogActuator;

#[async_trait]
impl Actuator for LogActuator {
    async fn set_et(&self, et_mm: f64) -> Result<(), EtError> {
        info!(et_mm = format!("{et_mm:.2}"), "actuator(log): et");
        Ok(())
    }

    async fn set_watering_ratio(&self, ratio: f64) -> Result<(), EtError> {
        info!(ratio = format!("{ratio:.2}"), "actuator(log): watering ratio");
        Ok(())
    }

    async fn set_irrigation_amount(&self, irrigation_mm: f64) -> Result<(), EtError> {
        info!(
            irrigation_mm = format!("{irrigation_mm:.2}"),
            "actuator(log): irrigation amount"
        );
        Ok(())
    }

    async fn set_rain_block(&self, blocked: bool) -> Result<(), EtError> {
        info!(
            rain_block = mqtt::switch_payload(blocked),
            "actuator(log): rain block"
        );
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device sensors facade.
//
// Every sensor streams its readings on its own broadcast event, named after
// the sensor (`deviceaccelerometer`, `devicelight`, ...). Each event gets its
// own channel, so a sensor only runs while somebody listens to it.
// `set_options` and `supported_sensors` are one-shot calls.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use tether_bridge::PlatformBridge;
use tether_bridge::traits::NativeInvoke;
use tether_core::config::{ReplayPolicy, TetherConfig};
use tether_core::error::{Result, TetherError};
use tether_core::report::{ErrorCode, ErrorReport};
use tether_core::sync::lock;
use tether_core::types::{CallbackId, SubscriberId};
use tether_events::router::CorrelationRule;
use tether_events::{CallbackTable, EventChannel, EventRouter};

use crate::{Plugin, Reply, invoker, register_reply, table_for};

pub const ID: &str = "com.blackberry.sensors";

pub const SET_OPTIONS_EVENT: &str = "sensors.setOptions.callback";
pub const SUPPORTED_SENSORS_EVENT: &str = "sensors.supportedSensors.callback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    Accelerometer,
    Magnetometer,
    Gyroscope,
    Compass,
    Proximity,
    Light,
    Gravity,
    RotationMatrix,
    Orientation,
    AzimuthPitchRoll,
    Holster,
    LinearAcceleration,
}

impl Sensor {
    /// Declaration order; `channels` is indexed by it.
    pub const ALL: [Sensor; 12] = [
        Self::Accelerometer,
        Self::Magnetometer,
        Self::Gyroscope,
        Self::Compass,
        Self::Proximity,
        Self::Light,
        Self::Gravity,
        Self::RotationMatrix,
        Self::Orientation,
        Self::AzimuthPitchRoll,
        Self::Holster,
        Self::LinearAcceleration,
    ];

    /// Native sensor name, which is also the name of its reading event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerometer => "deviceaccelerometer",
            Self::Magnetometer => "devicemagnetometer",
            Self::Gyroscope => "devicegyroscope",
            Self::Compass => "devicecompass",
            Self::Proximity => "deviceproximity",
            Self::Light => "devicelight",
            Self::Gravity => "devicegravity",
            Self::RotationMatrix => "devicerotationmatrix",
            Self::Orientation => "deviceorientation",
            Self::AzimuthPitchRoll => "deviceazimuthpitchroll",
            Self::Holster => "deviceholster",
            Self::LinearAcceleration => "devicelinearacceleration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampling options for one sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorOptions {
    /// Time between readings, in microseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batching: Option<bool>,
    /// Keep reading while the application is in the background.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduced_reporting: Option<bool>,
}

impl SensorOptions {
    /// Read options from untyped JSON, naming the first field of the wrong type.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some(fields) = value.as_object() else {
            return Err(TetherError::InvalidArgument("Need to specify arguments".into()));
        };
        if fields.get("delay").is_some_and(|d| !d.is_number()) {
            return Err(TetherError::InvalidArgument("Delay must be a number".into()));
        }
        for (field, label) in [
            ("queue", "Queue"),
            ("batching", "Batching"),
            ("background", "Background"),
            ("reducedReporting", "Reduced reporting"),
        ] {
            if fields.get(field).is_some_and(|v| !v.is_boolean()) {
                return Err(TetherError::InvalidArgument(format!(
                    "{label} must be a boolean value"
                )));
            }
        }
        let options: Self = serde_json::from_value(value.clone())
            .map_err(|e| TetherError::InvalidArgument(format!("bad sensor options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.delay == Some(0) {
            return Err(TetherError::InvalidArgument("Delay must be positive".into()));
        }
        Ok(())
    }
}

type SensorList = Arc<Mutex<Option<Vec<Sensor>>>>;

pub struct Sensors {
    native: Arc<dyn NativeInvoke>,
    table: Arc<CallbackTable>,
    channels: Vec<Arc<EventChannel>>,
    /// Filled by the first `supported_sensors` reply.
    supported: SensorList,
}

impl Sensors {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig) -> Self {
        let channels = Sensor::ALL
            .iter()
            .map(|sensor| {
                let name = sensor.as_str();
                Arc::new(
                    EventChannel::new(ID, name, invoker(&bridge))
                        .with_replay(config.replay_for(name, ReplayPolicy::None)),
                )
            })
            .collect();
        Self {
            native: invoker(&bridge),
            table: Arc::new(table_for(ID, config)),
            channels,
            supported: Arc::new(Mutex::new(None)),
        }
    }

    pub fn table(&self) -> &Arc<CallbackTable> {
        &self.table
    }

    pub fn channel(&self, sensor: Sensor) -> &Arc<EventChannel> {
        &self.channels[sensor as usize]
    }

    /// Subscribe to the readings of `sensor`. The first subscriber starts it.
    pub fn on_reading<F>(&self, sensor: Sensor, id: SubscriberId, handler: F)
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.channel(sensor).subscribe(id, handler);
    }

    pub fn remove_reading_listener(&self, sensor: Sensor, id: &SubscriberId) -> bool {
        self.channel(sensor).unsubscribe(id)
    }

    /// Change how `sensor` samples. Nothing reaches the platform unless the
    /// options are valid.
    #[instrument(skip(self, options))]
    pub fn set_options(&self, sensor: Sensor, options: &SensorOptions) -> Result<Reply<()>> {
        options.validate()?;
        let mut fields = serde_json::to_value(options)?;
        if let Value::Object(map) = &mut fields {
            map.insert("sensor".into(), Value::from(sensor.as_str()));
        }

        let id = CallbackId::generate();
        let reply = register_reply(&self.table, id.clone(), |_| Ok(()))?;
        let args = json!({ "options": fields, "callbackId": id });
        if let Err(e) = self.native.invoke_native(ID, "setOptions", &args) {
            warn!(error = %e, "sensor options not accepted");
            self.table.clear(&id);
            return Err(e);
        }
        Ok(reply)
    }

    /// Sensors this device has. Asked once; later calls answer from the
    /// first reply.
    #[instrument(skip(self))]
    pub fn supported_sensors(&self) -> Result<Reply<Vec<Sensor>>> {
        if let Some(known) = lock(&self.supported).clone() {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Ok(known));
            return Ok(rx);
        }

        let id = CallbackId::generate();
        let cache: Weak<Mutex<Option<Vec<Sensor>>>> = Arc::downgrade(&self.supported);
        let reply = register_reply(&self.table, id.clone(), move |payload| {
            let sensors = parse_sensor_list(&payload)?;
            if let Some(cache) = cache.upgrade() {
                *lock(&cache) = Some(sensors.clone());
            }
            info!(count = sensors.len(), "supported sensors known");
            Ok(sensors)
        })?;

        if let Err(e) = self
            .native
            .invoke_native(ID, "supportedSensors", &json!({ "callbackId": id }))
        {
            warn!(error = %e, "could not ask for supported sensors");
            self.table.clear(&id);
            return Err(e);
        }
        Ok(reply)
    }
}

/// Names the platform reports; unknown ones are skipped.
fn parse_sensor_list(payload: &Value) -> std::result::Result<Vec<Sensor>, ErrorReport> {
    let names = payload.as_array().ok_or_else(|| {
        ErrorReport::new(ErrorCode::MalformedEvent, "sensor list is not an array")
    })?;
    Ok(names
        .iter()
        .filter_map(|name| {
            let sensor = name.as_str().and_then(Sensor::from_name);
            if sensor.is_none() {
                debug!(%name, "skipping unknown sensor");
            }
            sensor
        })
        .collect())
}

impl Plugin for Sensors {
    fn id(&self) -> &'static str {
        ID
    }

    fn attach(&self, router: &mut EventRouter) {
        for channel in &self.channels {
            router.add_channel(channel.clone());
        }
        for event in [SET_OPTIONS_EVENT, SUPPORTED_SENSORS_EVENT] {
            router.add_rule(event, CorrelationRule::one_shot(self.table.clone()));
        }
    }
}

//! Native BLE transport built on `btleplug`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, trace, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::device::{DeviceInfo, DiscoveredDevice};
use crate::error::{Error, Result};
use crate::transport::{
    Channel, NotificationSink, OTA_SERVICE_UUID, Transport, WriteMode, dis,
};

/// Per-characteristic timeout for Device Information Service reads.
pub const INFO_READ_TIMEOUT: Duration = Duration::from_millis(500);

type Sinks = Arc<Mutex<HashMap<Channel, NotificationSink>>>;

/// Get the first Bluetooth adapter.
pub async fn adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Unsupported("no Bluetooth adapter found".into()))
}

async fn discover(adapter: &Adapter, duration: Duration) -> Result<Vec<(Peripheral, DiscoveredDevice)>> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let ota_service = Uuid::from_u128(OTA_SERVICE_UUID);
    let mut found = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        let device = DiscoveredDevice {
            name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
            address: peripheral.address().to_string(),
            rssi: props.rssi,
            is_ota: props.services.contains(&ota_service),
        };
        trace!("Scan: {device}");
        found.push((peripheral, device));
    }

    adapter.stop_scan().await?;
    Ok(found)
}

/// Scan for nearby devices for `duration`.
pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredDevice>> {
    let adapter = adapter().await?;
    let mut devices: Vec<_> = discover(&adapter, duration)
        .await?
        .into_iter()
        .map(|(_, device)| device)
        .collect();
    devices.sort_by(|a, b| b.is_ota.cmp(&a.is_ota).then(b.rssi.cmp(&a.rssi)));
    Ok(devices)
}

/// A connected OTA peripheral.
pub struct BleTransport {
    peripheral: Peripheral,
    name: String,
    characteristics: HashMap<Channel, Characteristic>,
    sinks: Sinks,
    pump: JoinHandle<()>,
}

impl BleTransport {
    /// Scan for `scan_duration` and connect to the first device whose name or
    /// address contains `target`, or to the first device advertising the OTA
    /// service when no target is given.
    pub async fn connect(target: Option<&str>, scan_duration: Duration) -> Result<Self> {
        let adapter = adapter().await?;
        let (peripheral, device) = discover(&adapter, scan_duration)
            .await?
            .into_iter()
            .find(|(_, device)| match target {
                Some(pattern) => device.matches(pattern),
                None => device.is_ota,
            })
            .ok_or_else(|| {
                Error::DeviceNotFound(target.map_or_else(
                    || "no device advertising the OTA service".to_string(),
                    |t| format!("no device matching '{t}'"),
                ))
            })?;

        info!("Connecting to {device}");
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let mut characteristics = HashMap::new();
        for characteristic in peripheral.characteristics() {
            if let Some(channel) = Channel::from_uuid(characteristic.uuid.as_u128()) {
                debug!("Found {channel} characteristic {}", characteristic.uuid);
                characteristics.insert(channel, characteristic);
            }
        }
        for channel in [Channel::Command, Channel::Firmware] {
            if !characteristics.contains_key(&channel) {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("Disconnect failed: {e}");
                }
                return Err(Error::Unsupported(format!(
                    "{} does not expose the OTA {channel} characteristic",
                    device.name
                )));
            }
        }

        let sinks: Sinks = Arc::default();
        let mut notifications = peripheral.notifications().await?;
        let routes = Arc::clone(&sinks);
        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let Some(channel) = Channel::from_uuid(notification.uuid.as_u128()) else {
                    continue;
                };
                let sink = routes
                    .lock()
                    .ok()
                    .and_then(|sinks| sinks.get(&channel).cloned());
                if let Some(sink) = sink {
                    sink.deliver(&notification.value);
                }
            }
            debug!("Notification stream closed");
        });

        Ok(Self {
            peripheral,
            name: device.name,
            characteristics,
            sinks,
            pump,
        })
    }

    /// Advertised name of the connected device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the device exposes battery telemetry.
    pub fn has_battery(&self) -> bool {
        self.characteristics.contains_key(&Channel::Battery)
    }

    /// Read the Device Information Service strings.
    ///
    /// Each read is bounded by [`INFO_READ_TIMEOUT`]; unreadable fields are
    /// left empty.
    pub async fn read_device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            model: self.read_string(dis::MODEL_NUMBER_UUID).await,
            serial_number: self.read_string(dis::SERIAL_NUMBER_UUID).await,
            manufacturer: self.read_string(dis::MANUFACTURER_NAME_UUID).await,
            hw_version: self.read_string(dis::HARDWARE_REVISION_UUID).await,
            sw_version: self.read_string(dis::FIRMWARE_REVISION_UUID).await,
        }
    }

    async fn read_string(&self, uuid: u128) -> String {
        let uuid = Uuid::from_u128(uuid);
        let Some(characteristic) = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
        else {
            trace!("Characteristic {uuid} not present");
            return String::new();
        };

        match tokio::time::timeout(INFO_READ_TIMEOUT, self.peripheral.read(&characteristic)).await {
            Ok(Ok(value)) => String::from_utf8_lossy(&value)
                .trim_end_matches('\0')
                .to_string(),
            Ok(Err(e)) => {
                debug!("Reading {uuid} failed: {e}");
                String::new()
            },
            Err(_) => {
                debug!("Reading {uuid} timed out");
                String::new()
            },
        }
    }

    /// Disconnect from the device.
    pub async fn disconnect(self) -> Result<()> {
        self.pump.abort();
        self.peripheral.disconnect().await?;
        info!("Disconnected from {}", self.name);
        Ok(())
    }

    fn characteristic(&self, channel: Channel) -> Result<&Characteristic> {
        self.characteristics
            .get(&channel)
            .ok_or_else(|| Error::Unsupported(format!("no {channel} characteristic")))
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl Transport for BleTransport {
    async fn write(&mut self, channel: Channel, data: &[u8], mode: WriteMode) -> Result<()> {
        let characteristic = self.characteristic(channel)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        trace!("TX {channel} [{}]: {data:02X?}", data.len());
        self.peripheral
            .write(characteristic, data, write_type)
            .await
            .map_err(|e| Error::Transport(format!("{channel} write failed: {e}")))
    }

    async fn subscribe(&mut self, sink: NotificationSink) -> Result<()> {
        let channel = sink.channel();
        let characteristic = self.characteristic(channel)?.clone();
        match self.sinks.lock() {
            Ok(mut sinks) => {
                sinks.insert(channel, sink);
            },
            Err(_) => {
                warn!("Notification routes poisoned");
                return Err(Error::Transport("notification routes unavailable".into()));
            },
        }
        self.peripheral.subscribe(&characteristic).await?;
        debug!("Subscribed to {channel} notifications");
        Ok(())
    }
}

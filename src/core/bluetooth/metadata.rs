//! Static device information read once after connecting.
//! Every read is independent: a monitor that lacks one characteristic still
//! reports the others.

use anyhow::{Result, anyhow};
use log::{info, warn};
use uuid::Uuid;

use crate::core::bluetooth::backend::PeripheralLink;
use crate::core::bluetooth::constants::{
    UUID_BODY_SENSOR_LOCATION, UUID_MANUFACTURER_NAME, UUID_MODEL_NUMBER, UUID_SERIAL_NUMBER,
};
use crate::core::heart_rate::{SensorLocation, SensorSink};

/// What the metadata pass managed to read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    /// Raw location code, kept even when it is not in the lookup table
    pub sensor_location_code: Option<u8>,
}

async fn read_string<L: PeripheralLink + ?Sized>(link: &L, uuid: Uuid) -> Result<String> {
    let raw = link.read(uuid).await?;
    Ok(String::from_utf8(raw)?.trim().to_string())
}

/// Reads manufacturer, model, serial number and sensor location.
pub async fn fetch_static_info<L: PeripheralLink + ?Sized>(link: &L, sink: &dyn SensorSink) -> DeviceMetadata {
    let mut metadata = DeviceMetadata::default();

    match read_string(link, UUID_MANUFACTURER_NAME).await {
        Ok(manufacturer) => {
            sink.update_manufacturer(&manufacturer);
            info!("Manufacturer: {}", manufacturer);
            metadata.manufacturer = Some(manufacturer);
        }
        Err(e) => warn!("BLE HRM: Failed to read manufacturer: {}", e),
    }

    match read_string(link, UUID_MODEL_NUMBER).await {
        Ok(model) => {
            sink.update_model(&model);
            info!("Model Number: {}", model);
            metadata.model = Some(model);
        }
        Err(e) => warn!("BLE HRM: Failed to read model number: {}", e),
    }

    match read_string(link, UUID_SERIAL_NUMBER).await {
        Ok(serial_number) => {
            sink.update_serial_number(&serial_number);
            info!("Serial Number: {}", serial_number);
            metadata.serial_number = Some(serial_number);
        }
        Err(e) => warn!("BLE HRM: Failed to read serial number: {}", e),
    }

    let location = link.read(UUID_BODY_SENSOR_LOCATION).await.and_then(|raw| {
        raw.first()
            .copied()
            .ok_or_else(|| anyhow!("empty sensor location value"))
    });
    match location {
        Ok(code) => {
            let location = SensorLocation::from_code(code);
            match location {
                Some(location) => info!("Sensor location: {}", location),
                None => info!("Sensor location: Unknown ({})", code),
            }
            sink.update_sensor_location(location);
            metadata.sensor_location_code = Some(code);
        }
        Err(e) => warn!("BLE HRM: Failed to read sensor location data: {}", e),
    }

    metadata
}

//! Heart-rate measurement notifications
//! This module decodes the measurement characteristic (0x2A37) and pushes
//! every reading into the sensor sink.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::heart_rate::{ContactStatus, HeartRateReading, SensorSink};
use crate::error::DecodeError;

const FLAG_HR_16BIT: u8 = 0x01;
const FLAG_ENERGY_EXPENDED: u8 = 0x08;
const FLAG_RR_INTERVALS: u8 = 0x10;
const CONTACT_SHIFT: u8 = 1;

/// Non-fatal problem found while decoding a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeWarning {
    /// The energy-expended flag was set but fewer than two bytes remained
    EnergyExpendedTruncated { available: usize },
}

/// A decoded notification and any warning raised while decoding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMeasurement {
    pub reading: HeartRateReading,
    pub warning: Option<DecodeWarning>,
}

fn read_u16_le(data: &[u8], index: usize) -> Option<u16> {
    let bytes = data.get(index..index + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Decodes one heart-rate measurement payload.
///
/// The flags can change from one notification to the next, so every
/// payload is decoded on its own.
pub fn decode_measurement(data: &[u8]) -> Result<DecodedMeasurement, DecodeError> {
    let (&flags, _) = data.split_first().ok_or(DecodeError::Empty)?;
    let wide_format = flags & FLAG_HR_16BIT != 0;
    let contact = ContactStatus::from_bits(flags >> CONTACT_SHIFT);
    let mut index = 1;

    let bpm = if wide_format {
        let value = read_u16_le(data, index).ok_or(DecodeError::TruncatedHeartRate {
            needed: 2,
            available: data.len() - index,
        })?;
        index += 2;
        value
    } else {
        let value = *data.get(index).ok_or(DecodeError::TruncatedHeartRate {
            needed: 1,
            available: 0,
        })?;
        index += 1;
        u16::from(value)
    };

    let mut warning = None;
    let mut energy_expended = None;
    if flags & FLAG_ENERGY_EXPENDED != 0 {
        match read_u16_le(data, index) {
            Some(kcal) => {
                energy_expended = Some(kcal);
                index += 2;
            }
            None => {
                warning = Some(DecodeWarning::EnergyExpendedTruncated {
                    available: data.len() - index,
                });
            }
        }
    }

    let rr_intervals = (flags & FLAG_RR_INTERVALS != 0).then(|| {
        data[index..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    });

    Ok(DecodedMeasurement {
        reading: HeartRateReading {
            bpm,
            wide_format,
            contact,
            energy_expended,
            rr_intervals,
        },
        warning,
    })
}

/// Notification handler for heart-rate measurements
#[derive(Clone)]
pub struct NotificationHandler {
    sink: Arc<dyn SensorSink>,
}

impl NotificationHandler {
    pub fn new(sink: Arc<dyn SensorSink>) -> Self {
        Self { sink }
    }

    /// Decodes one payload and publishes it. Bad payloads are logged and dropped.
    pub fn handle(&self, data: &[u8]) -> Option<HeartRateReading> {
        let decoded = match decode_measurement(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Failed to handle heart rate data {:02x?}: {}", data, e);
                return None;
            }
        };
        if let Some(DecodeWarning::EnergyExpendedTruncated { available }) = decoded.warning {
            warn!("Energy expenditure flag set but only {} byte(s) remain.", available);
        }

        let reading = decoded.reading;
        self.sink.update_heart_rate(reading.bpm);
        debug!("Heart rate received: {} bpm", reading.bpm);
        self.sink.update_skin_contact(reading.contact);
        debug!("HRM sensor skin contact: {}", reading.contact);
        if let Some(kcal) = reading.energy_expended {
            self.sink.update_energy_expended(kcal);
            debug!("Energy expenditure: {} kcal", kcal);
        }
        if let Some(intervals) = &reading.rr_intervals {
            self.sink.update_rr_intervals(intervals);
            debug!("RR Intervals: {:?}", intervals);
        }
        Some(reading)
    }

    /// Spawns the task that drains a notification subscription until the
    /// stream closes or `cancel_token` fires.
    pub fn spawn(self, mut notifications: mpsc::Receiver<Vec<u8>>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Listening for heart rate notifications...");
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    value = notifications.recv() => match value {
                        Some(value) => {
                            self.handle(&value);
                        }
                        None => break,
                    },
                }
            }
            info!("Notification stream ended");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heart_rate::HeartRateMonitor;

    #[test]
    fn decodes_8bit_heart_rate_only() {
        let decoded = decode_measurement(&[0x00, 60]).unwrap();
        assert_eq!(
            decoded.reading,
            HeartRateReading {
                bpm: 60,
                wide_format: false,
                contact: ContactStatus::NotSupported,
                energy_expended: None,
                rr_intervals: None,
            }
        );
        assert_eq!(decoded.warning, None);
    }

    #[test]
    fn decodes_all_optional_fields() {
        // bits 0, 3, 4: 16-bit BPM, energy, RR
        let data = [0x19, 0x2c, 0x01, 0x10, 0x00, 0x20, 0x03, 0x00, 0x04];
        let reading = decode_measurement(&data).unwrap().reading;
        assert_eq!(reading.bpm, 300);
        assert!(reading.wide_format);
        assert_eq!(reading.contact, ContactStatus::NotSupported);
        assert_eq!(reading.energy_expended, Some(16));
        assert_eq!(reading.rr_intervals, Some(vec![800, 1024]));
    }

    #[test]
    fn contact_bits_are_decoded() {
        let reading = decode_measurement(&[0b0000_0110, 72]).unwrap().reading;
        assert_eq!(reading.contact, ContactStatus::ContactDetected);
        let reading = decode_measurement(&[0b0000_0100, 72]).unwrap().reading;
        assert_eq!(reading.contact, ContactStatus::NoContact);
    }

    #[test]
    fn short_energy_field_is_skipped_with_warning() {
        let decoded = decode_measurement(&[0x08, 95, 0x01]).unwrap();
        assert_eq!(decoded.reading.bpm, 95);
        assert_eq!(decoded.reading.energy_expended, None);
        assert_eq!(decoded.warning, Some(DecodeWarning::EnergyExpendedTruncated { available: 1 }));
    }

    #[test]
    fn odd_trailing_rr_byte_is_ignored() {
        let reading = decode_measurement(&[0x10, 70, 0x00, 0x03, 0x7f]).unwrap().reading;
        assert_eq!(reading.rr_intervals, Some(vec![768]));
    }

    #[test]
    fn rr_flag_without_data_yields_empty_list() {
        let reading = decode_measurement(&[0x10, 70]).unwrap().reading;
        assert_eq!(reading.rr_intervals, Some(vec![]));
    }

    #[test]
    fn truncated_payloads_are_errors() {
        assert_eq!(decode_measurement(&[]), Err(DecodeError::Empty));
        assert_eq!(
            decode_measurement(&[0x00]),
            Err(DecodeError::TruncatedHeartRate { needed: 1, available: 0 })
        );
        assert_eq!(
            decode_measurement(&[0x01, 0x40]),
            Err(DecodeError::TruncatedHeartRate { needed: 2, available: 1 })
        );
    }

    #[test]
    fn handler_publishes_reading_and_drops_garbage() {
        let monitor = Arc::new(HeartRateMonitor::new());
        let handler = NotificationHandler::new(monitor.clone());

        assert!(handler.handle(&[]).is_none());
        assert_eq!(monitor.heart_rate(), None);

        handler.handle(&[0x1e, 75, 0x05, 0x00, 0x58, 0x02]);
        assert_eq!(monitor.heart_rate(), Some(75));
        assert_eq!(monitor.contact(), Some(ContactStatus::ContactDetected));
        assert_eq!(monitor.energy_expended(), Some(5));
        assert_eq!(monitor.rr_intervals(), vec![600]);
    }

    #[tokio::test]
    async fn spawned_handler_stops_on_cancel() {
        let monitor = Arc::new(HeartRateMonitor::new());
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let task = NotificationHandler::new(monitor.clone()).spawn(rx, token.clone());

        tx.send(vec![0x00, 61]).await.unwrap();
        tx.send(vec![0xff]).await.unwrap();
        tx.send(vec![0x00, 62]).await.unwrap();
        while monitor.heart_rate() != Some(62) {
            tokio::task::yield_now().await;
        }

        token.cancel();
        task.await.unwrap();
    }
}

use serde::{Deserialize, Serialize};

/// One reported device position sample. Consumed once, never persisted.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy estimate in meters.
    pub accuracy: f64,
    /// Instantaneous speed in m/s.
    pub speed: f64,
    pub timestamp_ms: i64,
}

impl PositionFix {
    /// A fix with any non-finite field is malformed and must be ignored.
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.accuracy.is_finite()
            && self.speed.is_finite()
    }
}

/// A qualifying dwell, destined for remote sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopEvent {
    pub truck_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
}

/// Delivery lifecycle as written by the companion app. Only finalized
/// deliveries (Completed or Partial) are eligible for sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Completed,
    Partial,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Completed => "completed",
            DeliveryStatus::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => DeliveryStatus::Completed,
            "partial" => DeliveryStatus::Partial,
            "pending" => DeliveryStatus::Pending,
            other => {
                log::warn!("unknown delivery status '{}', treating as pending", other);
                DeliveryStatus::Pending
            }
        }
    }
}

/// Proof-of-delivery record produced by the companion app.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfirmation {
    /// Queue row id; 0 until assigned by the store.
    pub id: i64,
    /// Remote delivery id this confirmation closes out.
    pub delivery_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub note: String,
    pub status: DeliveryStatus,
    /// Photo file paths; missing or placeholder files are skipped at send.
    pub photos: Vec<String>,
}

/// Refueling record produced by the companion app.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Refueling {
    /// Queue row id; 0 until assigned by the store.
    pub id: i64,
    pub truck_id: i64,
    pub department: String,
    pub driver: String,
    pub fuel: String,
    pub liters: f64,
    pub price_per_liter: f64,
    pub total_value: f64,
    pub odometer: f64,
    pub station: String,
    pub recorded_at: String,
    pub latitude: f64,
    pub longitude: f64,
    pub note: String,
    pub plate_photo: Option<String>,
    pub pump_photo: Option<String>,
    pub odometer_photo: Option<String>,
    pub gauge_photo: Option<String>,
    pub receipt_photo: Option<String>,
    pub coupon_photo: Option<String>,
}

impl Refueling {
    /// Photo form-part names paired with their configured paths.
    pub fn named_photos(&self) -> [(&'static str, Option<&str>); 6] {
        [
            ("plate_photo", self.plate_photo.as_deref()),
            ("pump_photo", self.pump_photo.as_deref()),
            ("odometer_photo", self.odometer_photo.as_deref()),
            ("gauge_photo", self.gauge_photo.as_deref()),
            ("receipt_photo", self.receipt_photo.as_deref()),
            ("coupon_photo", self.coupon_photo.as_deref()),
        ]
    }
}

/// The record kinds carried by the offline queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Stop,
    Delivery,
    Refueling,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Stop => "stop",
            RecordKind::Delivery => "delivery",
            RecordKind::Refueling => "refueling",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_finiteness() {
        let mut fix = PositionFix {
            latitude: -23.5,
            longitude: -46.6,
            accuracy: 10.0,
            speed: 0.0,
            timestamp_ms: 1_700_000_000_000,
        };
        assert!(fix.is_finite());

        fix.accuracy = f64::NAN;
        assert!(!fix.is_finite());
    }

    #[test]
    fn test_delivery_status_round_trip() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Completed,
            DeliveryStatus::Partial,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_unknown_delivery_status_is_pending() {
        assert_eq!(DeliveryStatus::parse("concluida"), DeliveryStatus::Pending);
        assert_eq!(DeliveryStatus::parse(""), DeliveryStatus::Pending);
    }

    #[test]
    fn test_named_photos_order() {
        let refuel = Refueling {
            pump_photo: Some("/tmp/pump.jpg".to_string()),
            ..Refueling::default()
        };
        let photos = refuel.named_photos();
        assert_eq!(photos[0].0, "plate_photo");
        assert_eq!(photos[1], ("pump_photo", Some("/tmp/pump.jpg")));
        assert!(photos[2].1.is_none());
    }
}

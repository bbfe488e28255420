use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use thiserror::Error;

use crate::records::{DeliveryConfirmation, Refueling, StopEvent};

/// Errors from the outbound HTTP transport. All of them are transient from
/// the queue's point of view: the record stays local and is retried later.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("no credential configured")]
    Disabled,
}

/// The seam the offline queue sends records through.
#[allow(async_fn_in_trait)]
pub trait SyncTransport: Send + Sync {
    /// False when sync is soft-disabled (no credential); local detection
    /// and buffering continue regardless.
    fn enabled(&self) -> bool {
        true
    }

    async fn send_stop(&self, stop: &StopEvent) -> Result<(), TransportError>;
    async fn send_delivery(&self, delivery: &DeliveryConfirmation) -> Result<(), TransportError>;
    async fn send_refueling(&self, refuel: &Refueling) -> Result<(), TransportError>;
}

/// Files smaller than this are treated as placeholder paths and skipped.
const MIN_ATTACHMENT_BYTES: u64 = 100;

/// Bearer-token HTTP client for the fleet API: JSON for live positions,
/// multipart forms (one field per scalar attribute, named file parts) for
/// stop, delivery, and refueling records.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpTransport {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Live position report: lightweight JSON body, no persistence behind it.
    pub async fn send_position(&self, latitude: f64, longitude: f64) -> Result<(), TransportError> {
        if !self.enabled() {
            return Err(TransportError::Disabled);
        }
        let body = serde_json::json!({ "latitude": latitude, "longitude": longitude });
        let response = self
            .client
            .post(self.endpoint("positions"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        check_status(response.status())
    }

    async fn post_multipart(&self, path: &str, form: Form) -> Result<(), TransportError> {
        if !self.enabled() {
            return Err(TransportError::Disabled);
        }
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        check_status(response.status())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

/// True when the path points at a real file large enough to be an actual
/// photo rather than a zero-byte placeholder.
fn attachment_eligible(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > MIN_ATTACHMENT_BYTES,
        Err(_) => false,
    }
}

/// Attaches the file at `path` as a named part. A missing or invalid file
/// is skipped silently; it never fails the record it belongs to.
async fn attach_file(form: Form, part_name: String, path: &str) -> Form {
    if !attachment_eligible(path) {
        log::debug!("skipping attachment '{}' for part {}", path, part_name);
        return form;
    }
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let file_name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "photo.jpg".to_string());
            match Part::bytes(bytes).file_name(file_name).mime_str("image/jpeg") {
                Ok(part) => form.part(part_name, part),
                Err(e) => {
                    log::warn!("skipping attachment '{}': {}", path, e);
                    form
                }
            }
        }
        Err(e) => {
            log::warn!("failed to read attachment '{}': {}", path, e);
            form
        }
    }
}

impl SyncTransport for HttpTransport {
    fn enabled(&self) -> bool {
        !self.token.is_empty()
    }

    async fn send_stop(&self, stop: &StopEvent) -> Result<(), TransportError> {
        let form = Form::new()
            .text("truck_id", stop.truck_id.to_string())
            .text("latitude", stop.latitude.to_string())
            .text("longitude", stop.longitude.to_string())
            .text("started_at", stop.started_at_ms.to_string())
            .text("ended_at", stop.ended_at_ms.to_string());
        self.post_multipart("stops", form).await
    }

    async fn send_delivery(&self, delivery: &DeliveryConfirmation) -> Result<(), TransportError> {
        let mut form = Form::new()
            .text("latitude", delivery.latitude.to_string())
            .text("longitude", delivery.longitude.to_string())
            .text("note", delivery.note.clone())
            .text("status", delivery.status.as_str());
        for (i, path) in delivery.photos.iter().enumerate() {
            form = attach_file(form, format!("photos[{}]", i), path).await;
        }
        let path = format!("deliveries/{}/confirm", delivery.delivery_id);
        self.post_multipart(&path, form).await
    }

    async fn send_refueling(&self, refuel: &Refueling) -> Result<(), TransportError> {
        let mut form = Form::new()
            .text("truck_id", refuel.truck_id.to_string())
            .text("department", refuel.department.clone())
            .text("driver", refuel.driver.clone())
            .text("fuel", refuel.fuel.clone())
            .text("liters", refuel.liters.to_string())
            .text("price_per_liter", refuel.price_per_liter.to_string())
            .text("total_value", refuel.total_value.to_string())
            .text("odometer", refuel.odometer.to_string())
            .text("station", refuel.station.clone())
            .text("recorded_at", refuel.recorded_at.clone())
            .text("latitude", refuel.latitude.to_string())
            .text("longitude", refuel.longitude.to_string())
            .text("note", refuel.note.clone());
        for (name, path) in refuel.named_photos() {
            if let Some(path) = path {
                form = attach_file(form, name.to_string(), path).await;
            }
        }
        self.post_multipart("refuelings", form).await
    }
}

/// Scriptable transport for queue and scheduler tests: records what was
/// sent and can be told to fail the next N sends.
#[cfg(test)]
pub mod testing {
    use super::{SyncTransport, TransportError};
    use crate::records::{DeliveryConfirmation, Refueling, StopEvent};
    use std::sync::Mutex;

    pub struct MockTransport {
        enabled: bool,
        fail_remaining: Mutex<u32>,
        pub sent_stops: Mutex<Vec<StopEvent>>,
        pub sent_deliveries: Mutex<Vec<DeliveryConfirmation>>,
        pub sent_refuelings: Mutex<Vec<Refueling>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::failing(0)
        }

        /// Fails the next `n` sends with a 500 before succeeding.
        pub fn failing(n: u32) -> Self {
            MockTransport {
                enabled: true,
                fail_remaining: Mutex::new(n),
                sent_stops: Mutex::new(Vec::new()),
                sent_deliveries: Mutex::new(Vec::new()),
                sent_refuelings: Mutex::new(Vec::new()),
            }
        }

        pub fn disabled() -> Self {
            MockTransport {
                enabled: false,
                ..Self::new()
            }
        }

        fn take_failure(&self) -> Result<(), TransportError> {
            let mut remaining = self.fail_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Err(TransportError::Status(500))
            } else {
                Ok(())
            }
        }

        pub fn stop_count(&self) -> usize {
            self.sent_stops.lock().unwrap().len()
        }
    }

    impl SyncTransport for MockTransport {
        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn send_stop(&self, stop: &StopEvent) -> Result<(), TransportError> {
            self.take_failure()?;
            self.sent_stops.lock().unwrap().push(stop.clone());
            Ok(())
        }

        async fn send_delivery(
            &self,
            delivery: &DeliveryConfirmation,
        ) -> Result<(), TransportError> {
            self.take_failure()?;
            self.sent_deliveries.lock().unwrap().push(delivery.clone());
            Ok(())
        }

        async fn send_refueling(&self, refuel: &Refueling) -> Result<(), TransportError> {
            self.take_failure()?;
            self.sent_refuelings.lock().unwrap().push(refuel.clone());
            Ok(())
        }
    }
}

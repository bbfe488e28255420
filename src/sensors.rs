use std::process::Command;

use chrono::Utc;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration};

use crate::records::PositionFix;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// GPS fix loop: polls the platform location source at a fixed cadence and
/// feeds fixes into the processing channel. Falls back to mock data when no
/// real source is available so the pipeline can run on a dev box.
pub async fn gps_loop(tx: Sender<PositionFix>, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs));
    let mut fix_count = 0u64;

    loop {
        interval.tick().await;

        let fix = match read_gps_fix() {
            Some(fix) => fix,
            None => mock_fix(),
        };

        match tx.try_send(fix) {
            Ok(_) => {
                fix_count += 1;
                if fix_count % 50 == 0 {
                    log::debug!("[gps] {} fixes", fix_count);
                }
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                log::info!("[gps] channel closed after {} fixes", fix_count);
                break;
            }
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                // Processing is behind; drop this fix rather than block.
            }
        }
    }
}

fn read_gps_fix() -> Option<PositionFix> {
    // termux-location prints a JSON object with latitude/longitude/accuracy/speed.
    match Command::new("termux-location").arg("-p").arg("gps").output() {
        Ok(output) => {
            let text = String::from_utf8_lossy(&output.stdout);
            parse_location_output(&text)
        }
        Err(_) => None,
    }
}

fn parse_location_output(output: &str) -> Option<PositionFix> {
    let value: serde_json::Value = serde_json::from_str(output.trim()).ok()?;
    Some(PositionFix {
        latitude: value.get("latitude")?.as_f64()?,
        longitude: value.get("longitude")?.as_f64()?,
        accuracy: value.get("accuracy")?.as_f64()?,
        speed: value.get("speed").and_then(|v| v.as_f64()).unwrap_or(0.0),
        timestamp_ms: now_ms(),
    })
}

fn mock_fix() -> PositionFix {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as f64;

    PositionFix {
        latitude: -23.5505 + seq * 0.00001,
        longitude: -46.6333 + seq * 0.00001,
        accuracy: 8.0 + (seq * 0.1).sin() * 3.0,
        speed: 6.0 + (seq * 0.5).sin() * 4.0,
        timestamp_ms: now_ms(),
    }
}

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::connectivity::Connectivity;
use crate::records::PositionFix;
use crate::transport::{HttpTransport, SyncTransport};

/// Minimum spacing between outbound position reports.
struct RateLimit {
    last_sent: Option<Instant>,
    min_interval: Duration,
}

impl RateLimit {
    fn new(min_interval: Duration) -> Self {
        RateLimit {
            last_sent: None,
            min_interval,
        }
    }

    /// Returns true and arms the timer when enough time has passed since
    /// the last allowed call.
    fn allow(&mut self) -> bool {
        match self.last_sent {
            Some(at) if at.elapsed() < self.min_interval => false,
            _ => {
                self.last_sent = Some(Instant::now());
                true
            }
        }
    }
}

/// Live position reporting: each accepted fix may produce one rate-limited,
/// fire-and-forget POST. A stalled send never delays fix processing, and a
/// rate-limited fix is simply not reported — the stop detector still sees
/// every fix upstream of this.
pub struct PositionReporter {
    transport: Arc<HttpTransport>,
    connectivity: Arc<dyn Connectivity>,
    rate_limit: Mutex<RateLimit>,
}

impl PositionReporter {
    pub fn new(
        transport: Arc<HttpTransport>,
        connectivity: Arc<dyn Connectivity>,
        min_interval: Duration,
    ) -> Self {
        PositionReporter {
            transport,
            connectivity,
            rate_limit: Mutex::new(RateLimit::new(min_interval)),
        }
    }

    pub fn maybe_report(&self, fix: &PositionFix) {
        if !self.transport.enabled() || !self.connectivity.is_up() {
            return;
        }
        {
            let Ok(mut rate_limit) = self.rate_limit.lock() else {
                return;
            };
            if !rate_limit.allow() {
                return;
            }
        }

        let transport = Arc::clone(&self.transport);
        let (latitude, longitude) = (fix.latitude, fix.longitude);
        tokio::spawn(async move {
            if let Err(e) = transport.send_position(latitude, longitude).await {
                log::warn!("position report failed: {}", e);
            }
        });
    }
}

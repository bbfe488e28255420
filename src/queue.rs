use std::sync::Arc;

use crate::connectivity::Connectivity;
use crate::records::{DeliveryConfirmation, RecordKind, Refueling, StopEvent};
use crate::store::OfflineStore;
use crate::transport::{SyncTransport, TransportError};

/// Per-kind offline pipeline: stage a record, attempt an immediate send,
/// fall back to durable queueing, and drain the backlog with in-flight
/// marking so a crash mid-send never silently loses a row.
///
/// The invariants upheld here: no record is deleted before a success
/// response is observed, and no record stays at `in_flight = 1` forever
/// (failures revert it; crashes are recovered at the next store open).
pub struct OfflineQueue<T> {
    store: Arc<OfflineStore>,
    transport: Arc<T>,
    connectivity: Arc<dyn Connectivity>,
}

impl<T: SyncTransport> OfflineQueue<T> {
    pub fn new(
        store: Arc<OfflineStore>,
        transport: Arc<T>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        OfflineQueue {
            store,
            transport,
            connectivity,
        }
    }

    /// Sends the stop immediately when the network is up; otherwise (or on
    /// failure) persists it for a later drain.
    pub async fn submit_stop(&self, event: &StopEvent) {
        if self.try_immediate(self.transport.send_stop(event), "stop").await {
            return;
        }
        if let Err(e) = self.store.insert_stop(event) {
            log::error!("dropping stop record, store write failed twice: {}", e);
        }
    }

    pub async fn submit_delivery(&self, delivery: &DeliveryConfirmation) {
        if self
            .try_immediate(self.transport.send_delivery(delivery), "delivery")
            .await
        {
            return;
        }
        if let Err(e) = self.store.insert_delivery(delivery) {
            log::error!("dropping delivery record, store write failed twice: {}", e);
        }
    }

    pub async fn submit_refueling(&self, refuel: &Refueling) {
        if self
            .try_immediate(self.transport.send_refueling(refuel), "refueling")
            .await
        {
            return;
        }
        if let Err(e) = self.store.insert_refueling(refuel) {
            log::error!("dropping refueling record, store write failed twice: {}", e);
        }
    }

    /// Runs the immediate-send attempt if sync is enabled and the network
    /// is up. Returns true when the record was delivered and needs no
    /// persistence.
    async fn try_immediate(
        &self,
        send: impl std::future::Future<Output = Result<(), TransportError>>,
        what: &str,
    ) -> bool {
        if !self.transport.enabled() || !self.connectivity.is_up() {
            return false;
        }
        match send.await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("immediate {} send failed, queueing: {}", what, e);
                false
            }
        }
    }

    /// One drain pass over the staged stops, in insertion order.
    pub async fn drain_stops(&self) {
        if !self.transport.enabled() {
            return;
        }
        let rows = match self.store.pending_stops() {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("stop queue scan failed: {}", e);
                return;
            }
        };
        for row in rows {
            if !self.mark_in_flight(RecordKind::Stop, row.id) {
                continue;
            }
            match self.transport.send_stop(&row.event).await {
                Ok(()) => self.finish(RecordKind::Stop, row.id),
                Err(e) => {
                    log::warn!("stop row {} send failed: {}", row.id, e);
                    self.revert(RecordKind::Stop, row.id);
                }
            }
        }
    }

    /// One drain pass over finalized delivery confirmations.
    pub async fn drain_deliveries(&self) {
        if !self.transport.enabled() {
            return;
        }
        let rows = match self.store.pending_deliveries() {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("delivery queue scan failed: {}", e);
                return;
            }
        };
        for delivery in rows {
            if !self.mark_in_flight(RecordKind::Delivery, delivery.id) {
                continue;
            }
            match self.transport.send_delivery(&delivery).await {
                Ok(()) => self.finish(RecordKind::Delivery, delivery.id),
                Err(e) => {
                    log::warn!("delivery row {} send failed: {}", delivery.id, e);
                    self.revert(RecordKind::Delivery, delivery.id);
                }
            }
        }
    }

    /// One drain pass over the staged refuelings.
    pub async fn drain_refuelings(&self) {
        if !self.transport.enabled() {
            return;
        }
        let rows = match self.store.pending_refuelings() {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("refueling queue scan failed: {}", e);
                return;
            }
        };
        for refuel in rows {
            if !self.mark_in_flight(RecordKind::Refueling, refuel.id) {
                continue;
            }
            match self.transport.send_refueling(&refuel).await {
                Ok(()) => self.finish(RecordKind::Refueling, refuel.id),
                Err(e) => {
                    log::warn!("refueling row {} send failed: {}", refuel.id, e);
                    self.revert(RecordKind::Refueling, refuel.id);
                }
            }
        }
    }

    /// Marks intent before any network call. A row we cannot mark is
    /// skipped this pass and retried next drain.
    fn mark_in_flight(&self, kind: RecordKind, id: i64) -> bool {
        match self.store.set_in_flight(kind, id, true) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not mark {} row {} in-flight: {}", kind.as_str(), id, e);
                false
            }
        }
    }

    fn finish(&self, kind: RecordKind, id: i64) {
        if let Err(e) = self.store.delete(kind, id) {
            // Confirmed remotely but still on disk. Revert to eligible and
            // let a later drain resend; the remote is idempotent per
            // logical record, so the duplicate is the safer failure.
            log::error!(
                "delete after confirmed send failed for {} row {}: {}",
                kind.as_str(),
                id,
                e
            );
            self.revert(kind, id);
        }
    }

    fn revert(&self, kind: RecordKind, id: i64) {
        if let Err(e) = self.store.set_in_flight(kind, id, false) {
            // The row stays in-flight until the stale-row recovery at the
            // next store open.
            log::error!(
                "could not reset in-flight flag for {} row {}: {}",
                kind.as_str(),
                id,
                e
            );
        }
    }
}

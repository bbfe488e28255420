use crate::geo;
use crate::records::{PositionFix, StopEvent};
use crate::stability::StabilityFilter;

/// Stop detection thresholds. Every value is configuration, not a constant:
/// the defaults are the defensive variant, and the depot coordinate always
/// comes from the caller.
#[derive(Clone, Copy, Debug)]
pub struct DetectorConfig {
    pub truck_id: i64,
    /// Fixes with a worse accuracy estimate are ignored outright.
    pub accuracy_ceiling_m: f64,
    pub depot_lat: f64,
    pub depot_lon: f64,
    /// Within this radius of the depot, dwell never counts as a road stop.
    pub depot_radius_m: f64,
    /// A dwell must last this long before it produces an event.
    pub min_dwell_ms: i64,
    /// Instantaneous speed below this reads as standing still.
    pub stillness_speed_ms: f64,
    /// A new stop closer than this to the last registered one does not move
    /// the dedup anchor.
    pub anchor_radius_m: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            truck_id: 0,
            accuracy_ceiling_m: 35.0,
            depot_lat: 0.0,
            depot_lon: 0.0,
            depot_radius_m: 100.0,
            min_dwell_ms: 10 * 60 * 1000,
            stillness_speed_ms: 0.35,
            anchor_radius_m: 20.0,
        }
    }
}

/// Mutable detector state. Fields are reset individually; the struct lives
/// as long as the detector.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetectorState {
    pub last_fix: Option<PositionFix>,
    /// Dwell candidate start; None means Free (not in a dwell).
    pub dwell_start_ms: Option<i64>,
    /// Coordinate of the most recently registered stop, used to suppress
    /// near-duplicate site records. Survives dwell resets.
    pub last_registered_stop: Option<(f64, f64)>,
}

/// State machine over (stability verdict, depot membership, elapsed time).
/// Emits zero or one `StopEvent` per fix. Single-writer: callers must feed
/// fixes one at a time, in timestamp order.
pub struct StopDetector {
    config: DetectorConfig,
    state: DetectorState,
    stability: StabilityFilter,
}

impl StopDetector {
    pub fn new(config: DetectorConfig) -> Self {
        StopDetector {
            config,
            state: DetectorState::default(),
            // Stop classification uses the fine variant.
            stability: StabilityFilter::fine(),
        }
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Feeds one fix through the state machine. Malformed fixes are
    /// silently ignored; no error crosses this boundary.
    pub fn process_fix(&mut self, fix: &PositionFix) -> Option<StopEvent> {
        if !fix.is_finite() {
            return None;
        }
        if fix.accuracy > self.config.accuracy_ceiling_m {
            return None;
        }

        let now = fix.timestamp_ms;

        // Depot dwell: keep resetting the clock so leaving the depot starts
        // from a clean slate, and never emit.
        let depot_dist = geo::distance_meters(
            fix.latitude,
            fix.longitude,
            self.config.depot_lat,
            self.config.depot_lon,
        );
        if depot_dist <= self.config.depot_radius_m {
            self.state.dwell_start_ms = Some(now);
            self.state.last_fix = Some(*fix);
            self.stability.reset();
            return None;
        }

        // First accepted fix only seeds the displacement baseline.
        let Some(last) = self.state.last_fix else {
            self.state.last_fix = Some(*fix);
            self.state.dwell_start_ms = None;
            return None;
        };

        let displacement =
            geo::distance_meters(last.latitude, last.longitude, fix.latitude, fix.longitude);
        let stable = self.stability.is_stationary(displacement)
            && fix.speed < self.config.stillness_speed_ms;

        let mut emitted = None;
        if stable {
            match self.state.dwell_start_ms {
                None => {
                    // Free -> Dwelling.
                    self.state.dwell_start_ms = Some(now);
                }
                Some(start) => {
                    if now - start >= self.config.min_dwell_ms {
                        emitted = Some(StopEvent {
                            truck_id: self.config.truck_id,
                            latitude: fix.latitude,
                            longitude: fix.longitude,
                            started_at_ms: start,
                            ended_at_ms: now,
                        });

                        // The event is time-gated; the anchor is distance
                        // gated. A long dwell heartbeats one event per
                        // interval, but the anchor only moves when the site
                        // is genuinely new, so GPS noise at one spot cannot
                        // walk it.
                        let anchor_dist = self
                            .state
                            .last_registered_stop
                            .map(|(lat, lon)| {
                                geo::distance_meters(fix.latitude, fix.longitude, lat, lon)
                            })
                            .unwrap_or(f64::MAX);
                        if anchor_dist > self.config.anchor_radius_m {
                            self.state.last_registered_stop =
                                Some((fix.latitude, fix.longitude));
                        }

                        // Restart the clock, keep dwelling.
                        self.state.dwell_start_ms = Some(now);
                    }
                }
            }
        } else {
            // Real movement: Dwelling -> Free. Soft reset — the anchor
            // survives for the next stop's distance check.
            self.state.dwell_start_ms = None;
            self.stability.reset();
        }

        self.state.last_fix = Some(*fix);
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_DWELL_MS: i64 = 10_000;

    /// Depot far from the test coordinates so it never interferes.
    fn test_config() -> DetectorConfig {
        DetectorConfig {
            truck_id: 1,
            depot_lat: 10.0,
            depot_lon: 10.0,
            min_dwell_ms: MIN_DWELL_MS,
            ..DetectorConfig::default()
        }
    }

    fn fix_at(lat: f64, lon: f64, t_ms: i64) -> PositionFix {
        PositionFix {
            latitude: lat,
            longitude: lon,
            accuracy: 10.0,
            speed: 0.0,
            timestamp_ms: t_ms,
        }
    }

    fn moving_fix(lat: f64, lon: f64, t_ms: i64) -> PositionFix {
        PositionFix {
            speed: 5.0,
            ..fix_at(lat, lon, t_ms)
        }
    }

    /// Roughly `meters` north of (lat, lon).
    fn offset_north(lat: f64, meters: f64) -> f64 {
        lat + meters / 111_195.0
    }

    #[test]
    fn test_dwell_one_short_of_minimum_emits_nothing() {
        let mut detector = StopDetector::new(test_config());

        assert!(detector.process_fix(&fix_at(0.0, 0.0, 0)).is_none());
        // Dwell starts on the first stable fix after the baseline.
        assert!(detector.process_fix(&fix_at(0.0, 0.0, 1_000)).is_none());
        let event = detector.process_fix(&fix_at(0.0, 0.0, 1_000 + MIN_DWELL_MS - 1));
        assert!(event.is_none());
    }

    #[test]
    fn test_dwell_at_minimum_emits_exactly_one() {
        let mut detector = StopDetector::new(test_config());

        detector.process_fix(&fix_at(0.0, 0.0, 0));
        detector.process_fix(&fix_at(0.0, 0.0, 1_000));
        let event = detector
            .process_fix(&fix_at(0.0, 0.0, 1_000 + MIN_DWELL_MS))
            .expect("dwell reached the minimum");

        assert_eq!(event.truck_id, 1);
        assert_eq!(event.started_at_ms, 1_000);
        assert_eq!(event.ended_at_ms, 1_000 + MIN_DWELL_MS);
        assert_eq!(event.latitude, 0.0);
    }

    #[test]
    fn test_triple_dwell_heartbeats_three_events() {
        let mut detector = StopDetector::new(test_config());

        detector.process_fix(&fix_at(0.0, 0.0, 0));
        detector.process_fix(&fix_at(0.0, 0.0, 1_000));

        let mut events = Vec::new();
        // Fixes every 2 seconds across three dwell intervals.
        let mut t = 3_000;
        while t <= 1_000 + 3 * MIN_DWELL_MS {
            if let Some(event) = detector.process_fix(&fix_at(0.0, 0.0, t)) {
                events.push(event);
            }
            t += 2_000;
        }

        assert_eq!(events.len(), 3);
        assert!(events[0].ended_at_ms < events[1].ended_at_ms);
        assert!(events[1].ended_at_ms < events[2].ended_at_ms);
        for event in &events {
            assert_eq!(event.latitude, 0.0);
            assert_eq!(event.longitude, 0.0);
        }
    }

    #[test]
    fn test_depot_dwell_never_emits() {
        let config = DetectorConfig {
            depot_lat: 0.0,
            depot_lon: 0.0,
            min_dwell_ms: MIN_DWELL_MS,
            ..DetectorConfig::default()
        };
        let mut detector = StopDetector::new(config);

        // Hours of fixes inside the depot radius.
        for i in 0..100 {
            let event = detector.process_fix(&fix_at(0.0, 0.0, i * 60_000));
            assert!(event.is_none());
        }
    }

    #[test]
    fn test_entering_depot_discards_accumulated_dwell() {
        let config = DetectorConfig {
            depot_lat: 0.0,
            depot_lon: 0.0,
            min_dwell_ms: MIN_DWELL_MS,
            ..DetectorConfig::default()
        };
        let mut detector = StopDetector::new(config);

        // Dwell 200 m from the depot, just short of qualifying.
        let lat = offset_north(0.0, 200.0);
        detector.process_fix(&fix_at(lat, 0.0, 0));
        detector.process_fix(&fix_at(lat, 0.0, 1_000));
        detector.process_fix(&fix_at(lat, 0.0, MIN_DWELL_MS - 1_000));

        // Drive into the depot; elapsed dwell time must not carry over.
        assert!(detector
            .process_fix(&moving_fix(0.0, 0.0, MIN_DWELL_MS + 4_000))
            .is_none());
        assert!(detector
            .process_fix(&fix_at(0.0, 0.0, 10 * MIN_DWELL_MS))
            .is_none());
    }

    #[test]
    fn test_inaccurate_fix_ignored_without_state_change() {
        let mut detector = StopDetector::new(test_config());

        detector.process_fix(&fix_at(0.0, 0.0, 0));
        detector.process_fix(&fix_at(0.0, 0.0, 1_000));

        // A 50 m-accuracy fix mid-dwell changes nothing.
        let mut bad = fix_at(0.3, 0.3, 5_000);
        bad.accuracy = 50.0;
        assert!(detector.process_fix(&bad).is_none());

        // The dwell still matures from its original start.
        let event = detector
            .process_fix(&fix_at(0.0, 0.0, 1_000 + MIN_DWELL_MS))
            .expect("dwell survived the rejected fix");
        assert_eq!(event.started_at_ms, 1_000);
    }

    #[test]
    fn test_malformed_fix_ignored() {
        let mut detector = StopDetector::new(test_config());
        let mut bad = fix_at(0.0, 0.0, 0);
        bad.latitude = f64::NAN;
        assert!(detector.process_fix(&bad).is_none());
        assert!(detector.state().last_fix.is_none());
    }

    #[test]
    fn test_movement_resets_dwell() {
        let mut detector = StopDetector::new(test_config());

        detector.process_fix(&fix_at(0.0, 0.0, 0));
        detector.process_fix(&fix_at(0.0, 0.0, 1_000));

        // 50 m excursion at speed: back to Free.
        let away = offset_north(0.0, 50.0);
        detector.process_fix(&moving_fix(away, 0.0, 5_000));
        assert!(detector.state().dwell_start_ms.is_none());

        // Returning also measures 50 m of displacement, still unstable.
        detector.process_fix(&fix_at(0.0, 0.0, 10_000));
        assert!(detector.state().dwell_start_ms.is_none());

        // Quiet again: a fresh dwell starts now, not at the old start.
        detector.process_fix(&fix_at(0.0, 0.0, 15_000));
        assert_eq!(detector.state().dwell_start_ms, Some(15_000));
    }

    /// Dwells at (lat, lon) long enough to emit, returning the event.
    fn dwell_until_emit(
        detector: &mut StopDetector,
        lat: f64,
        lon: f64,
        from_ms: i64,
    ) -> StopEvent {
        let mut t = from_ms;
        loop {
            if let Some(event) = detector.process_fix(&fix_at(lat, lon, t)) {
                return event;
            }
            t += 2_000;
            assert!(t < from_ms + 20 * MIN_DWELL_MS, "dwell never emitted");
        }
    }

    #[test]
    fn test_anchor_ignores_near_duplicate_and_follows_new_site() {
        let mut detector = StopDetector::new(test_config());

        // First registered stop sets the anchor.
        dwell_until_emit(&mut detector, 0.0, 0.0, 0);
        let anchor = detector.state().last_registered_stop.unwrap();
        assert_eq!(anchor, (0.0, 0.0));

        // Second stop ~10 m away: event still emitted, anchor unmoved.
        let near = offset_north(0.0, 10.0);
        detector.process_fix(&moving_fix(near, 0.0, 100_000));
        let event = dwell_until_emit(&mut detector, near, 0.0, 102_000);
        assert_eq!(event.latitude, near);
        assert_eq!(detector.state().last_registered_stop.unwrap(), (0.0, 0.0));

        // Third stop ~30 m from the anchor: the anchor advances.
        let far = offset_north(0.0, 30.0);
        detector.process_fix(&moving_fix(far, 0.0, 200_000));
        dwell_until_emit(&mut detector, far, 0.0, 202_000);
        let moved = detector.state().last_registered_stop.unwrap();
        assert_eq!(moved, (far, 0.0));
    }

    // End-to-end fixtures: 20 fixes at one coordinate, 5 s apart, with the
    // final fix's clock jumped far enough for a 10-minute dwell to mature.

    const E2E_DWELL_MS: i64 = 600_000;

    fn e2e_config() -> DetectorConfig {
        DetectorConfig {
            truck_id: 9,
            depot_lat: 10.0,
            depot_lon: 10.0,
            min_dwell_ms: E2E_DWELL_MS,
            ..DetectorConfig::default()
        }
    }

    fn e2e_timestamps() -> Vec<i64> {
        let mut ts: Vec<i64> = (0..19).map(|i| i * 5_000).collect();
        ts.push(649_000); // clock jump past the dwell minimum
        ts
    }

    #[test]
    fn test_end_to_end_single_cluster_emits_one_stop() {
        let mut detector = StopDetector::new(e2e_config());

        let mut events = Vec::new();
        for t in e2e_timestamps() {
            if let Some(event) = detector.process_fix(&fix_at(-23.5505, -46.6333, t)) {
                events.push(event);
            }
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].started_at_ms, 5_000);
        assert_eq!(events[0].ended_at_ms, 649_000);
    }

    #[test]
    fn test_end_to_end_excursion_resets_the_cluster() {
        let mut detector = StopDetector::new(e2e_config());
        let away = offset_north(-23.5505, 50.0);

        let mut events = Vec::new();
        for (i, t) in e2e_timestamps().into_iter().enumerate() {
            let fix = if i == 10 {
                moving_fix(away, -46.6333, t)
            } else {
                fix_at(-23.5505, -46.6333, t)
            };
            if let Some(event) = detector.process_fix(&fix) {
                events.push(event);
            }
        }

        // The excursion put the detector back to Free mid-sequence; the
        // remaining quiet time never reaches ten minutes.
        assert!(events.is_empty());
    }
}

use crate::{
    arena::TrackArena,
    config::Config,
    cost_matrix::{Column, CostMatrixBuilder, PreviousPositions, RecoveryMatrix, Row},
    error::ConfigError,
    hungarian::HungarianSolver,
    object::Detection,
    recovery::{RecoveryEvent, RecoveryMonitor},
    track::{Observation, Track, TrackId, TrackSnapshot, TrackStatus, Transition},
};
use noisy_float::prelude::r64;
use std::{cmp::Reverse, ops::RangeFrom, sync::Arc};
use tracing::{debug, trace, warn};

/// This is the main struct to perform object tracking.
pub struct Tracker {
    config: Config,
    tracks: TrackArena,
    unique_id_iter: RangeFrom<u64>,
    solver: HungarianSolver,
    cost_matrix_builder: CostMatrixBuilder,
    previous_positions: PreviousPositions,
    recovery: RecoveryMonitor,
    clock: f64,
    frame_count: u64,
    latest: Arc<[TrackSnapshot]>,
}

impl Tracker {
    /// This is the function to build a Tracker.
    ///
    /// Example:
    ///
    /// ```rust
    /// use court_tracking::config::Config;
    /// use court_tracking::Tracker;
    ///
    /// let config = Config::from_json_str(r#"{ "max_tracks": 12, "confirm_hits": 2 }"#)?;
    /// let tracker = Tracker::new(&config)?;
    /// assert!(tracker.is_empty());
    /// # Ok::<(), court_tracking::error::ConfigError>(())
    /// ```
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_validated(config.clone()))
    }

    fn with_validated(config: Config) -> Self {
        Self {
            tracks: TrackArena::with_capacity(config.max_tracks),
            unique_id_iter: 0..,
            solver: HungarianSolver::with_capacity(config.max_tracks),
            cost_matrix_builder: CostMatrixBuilder::new(&config),
            previous_positions: PreviousPositions::with_capacity(config.max_tracks),
            recovery: RecoveryMonitor::new(config.recovery_timeout_sec),
            clock: 0.0,
            frame_count: 0,
            latest: Vec::new().into(),
            config,
        }
    }

    /// This is the function to track objects in one frame.
    ///
    /// `dt` is the time since the previous frame in seconds; `None` or an
    /// invalid value falls back to the configured default frame interval.
    /// Returns the tentative and confirmed tracks, most reliable first.
    ///
    /// Example:
    ///
    /// ```rust
    /// use court_tracking::object::{BoundingBox, Detection, ObjectClass};
    /// use court_tracking::track::TrackStatus;
    /// use court_tracking::Tracker;
    ///
    /// let mut tracker = Tracker::default();
    /// let mut output = vec![];
    /// for frame in 0..3 {
    ///     let x = 0.40 + 0.01 * frame as f64;
    ///     let player = Detection::new(
    ///         BoundingBox::new(x, 0.30, 0.08, 0.20),
    ///         ObjectClass::Player,
    ///         0.9,
    ///     );
    ///     output = tracker.update(&[player], Some(1.0 / 30.0));
    /// }
    ///
    /// assert_eq!(output.len(), 1);
    /// assert_eq!(output[0].status, TrackStatus::Confirmed);
    /// ```
    pub fn update(&mut self, detections: &[Detection], dt: Option<f64>) -> Vec<TrackSnapshot> {
        let dt = self.frame_interval(dt);
        self.clock += dt;
        self.frame_count += 1;
        let now = self.clock;

        self.predict_tracks(dt, now);

        // Arena slot -> detection index
        let mut matches: Vec<Option<usize>> = vec![None; self.tracks.len()];
        let mut taken = vec![false; detections.len()];
        self.match_by_assignment(detections, now, &mut matches, &mut taken);
        self.match_by_virtual_trajectory(detections, &mut matches, &mut taken);

        self.apply_matches(detections, now, &matches);
        self.spawn_tracks(detections, now, &taken);

        for id in self.tracks.reap() {
            self.previous_positions.remove(&id);
            debug!("track {} deleted", id);
        }

        self.update_recovery(now);

        let mut output: Vec<TrackSnapshot> = self
            .tracks
            .iter()
            .filter(|track| track.is_active())
            .map(Track::snapshot)
            .collect();
        output.sort_by_key(|snapshot| (Reverse(r64(snapshot.reliability)), snapshot.id));

        self.latest = output.clone().into();
        output
    }

    fn frame_interval(&self, dt: Option<f64>) -> f64 {
        match dt {
            Some(dt) if dt.is_finite() && dt > 0.0 => dt,
            Some(dt) => {
                warn!(
                    "invalid frame interval {}, using {}",
                    dt, self.config.default_dt
                );
                self.config.default_dt
            }
            None => self.config.default_dt,
        }
    }

    fn predict_tracks(&mut self, dt: f64, now: f64) {
        for track in self.tracks.iter_mut() {
            match track.predict(dt, now, &self.config) {
                Some(Transition::Lost) => debug!("track {} lost", track.id()),
                Some(Transition::Deleted) => trace!("track {} exhausted its misses", track.id()),
                _ => {}
            }
        }
    }

    fn match_by_assignment(
        &mut self,
        detections: &[Detection],
        now: f64,
        matches: &mut [Option<usize>],
        taken: &mut [bool],
    ) {
        let slots: Vec<usize> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, track)| track.is_live())
            .map(|(slot, _)| slot)
            .collect();
        if slots.is_empty() || detections.is_empty() {
            return;
        }

        let all_tracks = self.tracks.as_slice();
        let candidates: Vec<&Track> = slots.iter().map(|&slot| &all_tracks[slot]).collect();
        let matrices =
            self.cost_matrix_builder
                .build(&candidates, detections, &self.previous_positions, now);
        let assignment = self.solver.solve(&matrices.cost);

        for (row, col) in assignment.pairs {
            let iou = matrices.iou[(row, col)];
            if iou > self.config.iou_threshold {
                matches[slots[row]] = Some(col);
                taken[col] = true;
            } else {
                trace!(
                    "rejected assignment of track {} to detection {} (iou {:.3})",
                    candidates[row].id(),
                    col,
                    iou
                );
            }
        }
    }

    fn match_by_virtual_trajectory(
        &self,
        detections: &[Detection],
        matches: &mut [Option<usize>],
        taken: &mut [bool],
    ) {
        let anchors = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(slot, track)| matches[*slot].is_none() && track.status() == TrackStatus::Lost)
            .filter_map(|(slot, track)| Some((Row(slot), *track.virtual_trajectory().last()?)));
        let free = detections
            .iter()
            .enumerate()
            .filter(|(col, _)| !taken[*col])
            .map(|(col, detection)| (Column(col), detection));

        let mut recovery_matrix = RecoveryMatrix::build(anchors, free, self.config.recovery_radius);
        if recovery_matrix.len() > 0 {
            trace!("{} recovery candidates", recovery_matrix.len());
        }

        while let Some((Row(slot), Column(col))) = recovery_matrix.pop_closest() {
            matches[slot] = Some(col);
            taken[col] = true;
        }
    }

    fn apply_matches(&mut self, detections: &[Detection], now: f64, matches: &[Option<usize>]) {
        for (track, matched) in self.tracks.iter_mut().zip(matches) {
            if !track.is_live() {
                continue;
            }
            let Some(col) = *matched else {
                track.mark_unmatched(&self.config);
                continue;
            };

            let detection = &detections[col];
            match track.apply_match(detection, now, &self.config) {
                Some(Transition::Confirmed) => debug!("track {} confirmed", track.id()),
                Some(Transition::Recovered) => debug!("track {} recovered", track.id()),
                _ => {}
            }
            self.previous_positions.insert(
                track.id(),
                Observation {
                    position: detection.center(),
                    timestamp: now,
                },
            );
        }
    }

    fn spawn_tracks(&mut self, detections: &[Detection], now: f64, taken: &[bool]) {
        let mut live = self.tracks.iter().filter(|track| track.is_live()).count();
        let mut dropped = 0;

        for (_, detection) in detections
            .iter()
            .enumerate()
            .filter(|(col, _)| !taken[*col])
        {
            if live >= self.config.max_tracks {
                dropped += 1;
                continue;
            }
            let Some(id) = self.unique_id_iter.next().map(TrackId) else {
                break;
            };

            let track = Track::new(id, detection, now, &self.config);
            trace!("track {} spawned as {}", id, detection.class);
            self.previous_positions.insert(
                id,
                Observation {
                    position: detection.center(),
                    timestamp: now,
                },
            );
            self.tracks.insert(track);
            live += 1;
        }

        if dropped > 0 {
            debug!(
                "track limit {} reached, dropped {} detections",
                self.config.max_tracks, dropped
            );
        }
    }

    fn update_recovery(&mut self, now: f64) {
        let status = self
            .recovery
            .primary()
            .and_then(|id| self.tracks.get(id))
            .map(Track::status);
        let primary = self.recovery.primary();

        match self.recovery.observe(status, now) {
            Some(RecoveryEvent::Entered) => {
                debug!("primary track {:?} lost, entering recovery mode", primary)
            }
            Some(RecoveryEvent::Recovered) => {
                debug!("primary track {:?} recovered", primary)
            }
            Some(RecoveryEvent::TimedOut) => {
                debug!("recovery of primary track {:?} timed out", primary)
            }
            None => {}
        }
    }

    /// Designates `id` as the primary track. Fails for unknown or deleted
    /// tracks.
    pub fn set_primary(&mut self, id: TrackId) -> bool {
        let is_live = self.tracks.get(id).map_or(false, Track::is_live);
        if is_live {
            self.recovery.designate(id);
        }
        is_live
    }

    pub fn clear_primary(&mut self) {
        self.recovery.clear();
    }

    pub fn primary(&self) -> Option<TrackId> {
        self.recovery.primary()
    }

    /// Whether the primary track is currently lost and being re-acquired.
    pub fn in_recovery(&self) -> bool {
        self.recovery.is_active()
    }

    /// Output of the most recent frame. The slice is replaced as a whole
    /// when a frame completes.
    pub fn latest(&self) -> Arc<[TrackSnapshot]> {
        Arc::clone(&self.latest)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id)
    }

    /// Every live track, lost ones included, in storage order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Tracker clock in seconds, the sum of all frame intervals.
    pub fn elapsed(&self) -> f64 {
        self.clock
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drops all tracks, identities and recovery state.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.unique_id_iter = 0..;
        self.previous_positions.clear();
        self.recovery.clear();
        self.clock = 0.0;
        self.frame_count = 0;
        self.latest = Vec::new().into();
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::with_validated(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{BoundingBox, ObjectClass};
    use nalgebra::Vector2;

    const DT: f64 = 1.0 / 30.0;

    fn player(x: f64, y: f64, confidence: f64) -> Detection {
        Detection::new(
            BoundingBox::from_center(Vector2::new(x, y), 0.1, 0.2),
            ObjectClass::Player,
            confidence,
        )
    }

    #[test]
    fn previous_positions_follow_last_observation() {
        let mut tracker = Tracker::default();
        for frame in 0..4 {
            tracker.update(&[player(0.2 + 0.01 * frame as f64, 0.5, 0.9)], Some(DT));
            let id = TrackId(0);
            let cached = tracker.previous_positions.get(&id);
            let observed = tracker.track(id).map(|track| track.last_observation());
            assert!(cached.is_some());
            assert_eq!(cached, observed);
        }
    }

    #[test]
    fn deletion_evicts_previous_position() {
        let mut tracker = Tracker::default();
        tracker.update(&[player(0.2, 0.5, 0.9), player(0.7, 0.5, 0.9)], Some(DT));
        assert_eq!(tracker.previous_positions.len(), 2);

        // only the second track keeps being seen
        for _ in 0..tracker.config.max_misses - 1 {
            tracker.update(&[player(0.7, 0.5, 0.9)], Some(DT));
        }
        assert!(tracker.previous_positions.contains_key(&TrackId(0)));

        tracker.update(&[player(0.7, 0.5, 0.9)], Some(DT));
        assert!(tracker.track(TrackId(0)).is_none());
        assert!(!tracker.previous_positions.contains_key(&TrackId(0)));
        assert!(tracker.previous_positions.contains_key(&TrackId(1)));

        tracker.reset();
        assert!(tracker.previous_positions.is_empty());
    }

    #[test]
    fn clear_primary_ends_recovery() {
        let mut tracker = Tracker::default();
        for _ in 0..3 {
            tracker.update(&[player(0.5, 0.5, 0.9)], Some(DT));
        }
        assert!(tracker.set_primary(TrackId(0)));
        for _ in 0..8 {
            tracker.update(&[], Some(DT));
        }
        assert!(tracker.in_recovery());

        tracker.clear_primary();
        assert!(!tracker.in_recovery());
        assert_eq!(tracker.primary(), None);

        // later losses no longer re-enter recovery
        tracker.update(&[], Some(DT));
        assert!(!tracker.in_recovery());
    }

    #[test]
    fn nan_confidence_keeps_output_ordered() {
        let mut tracker = Tracker::default();
        let output = tracker.update(&[player(0.2, 0.5, f64::NAN), player(0.7, 0.5, 1.0)], Some(DT));

        assert_eq!(output.len(), 2);
        assert!(output.iter().all(|snapshot| snapshot.reliability.is_finite()));
        assert_eq!(output[0].id, TrackId(1));
        assert_eq!(output[1].id, TrackId(0));
        assert_eq!(output[1].reliability, 0.8);
    }
}

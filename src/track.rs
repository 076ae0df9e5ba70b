use crate::{
    config::Config,
    kalman::MotionFilter,
    object::{BoundingBox, Detection, ObjectClass},
};
use itertools::Itertools;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt, mem};

/// Reliability of a track right after a match is this base plus the
/// remainder weighted by detection confidence.
const MATCHED_RELIABILITY_BASE: f64 = 0.8;

/// Identity of a track. Handed out in increasing order and never reused
/// within a tracker's lifetime (until [`reset`](crate::Tracker::reset)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A position the detector actually reported for a track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub position: Vector2<f64>,
    /// Tracker clock in seconds.
    pub timestamp: f64,
}

/// Lifecycle of a track. Each state carries only the data relevant to it.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackState {
    Tentative,
    Confirmed {
        /// Matched frames since the track was (re)confirmed.
        hits: u32,
    },
    Lost {
        /// Positions extrapolated from observation momentum, one per frame
        /// spent lost.
        virtual_trajectory: Vec<Vector2<f64>>,
        /// Tracker clock when the track was marked lost.
        lost_since: f64,
    },
    Deleted,
}

/// Data-less view of [`TrackState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    Tentative,
    Confirmed,
    Lost,
    Deleted,
}

impl TrackState {
    pub fn status(&self) -> TrackStatus {
        match self {
            TrackState::Tentative => TrackStatus::Tentative,
            TrackState::Confirmed { .. } => TrackStatus::Confirmed,
            TrackState::Lost { .. } => TrackStatus::Lost,
            TrackState::Deleted => TrackStatus::Deleted,
        }
    }
}

/// Lifecycle edge crossed during a predict or match step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirmed,
    Lost,
    Recovered,
    Deleted,
}

/// Immutable copy of a track handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
    pub position_uncertainty: f64,
    pub reliability: f64,
    pub occlusion: f64,
    pub status: TrackStatus,
    pub in_flight: bool,
}

/// One tracked object.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    class: ObjectClass,
    bbox: BoundingBox,
    filter: MotionFilter,
    hit_streak: u32,
    miss_streak: u32,
    reliability: f64,
    occlusion: f64,
    state: TrackState,
    history: VecDeque<Observation>,
    history_len: usize,
    last_observed: Observation,
    momentum: Vector2<f64>,
}

impl Track {
    /// Spawns a tentative track from an unmatched detection. The spawning
    /// detection counts as the first hit.
    pub fn new(id: TrackId, detection: &Detection, timestamp: f64, config: &Config) -> Self {
        let center = detection.center();
        let noise = config.noise_for(detection.class);
        let filter = if config.physics_class == Some(detection.class) {
            MotionFilter::projectile(center, noise, &config.flight)
        } else {
            MotionFilter::constant_velocity(center, noise)
        };

        let observation = Observation {
            position: center,
            timestamp,
        };
        let mut history = VecDeque::with_capacity(config.history_len);
        history.push_back(observation);

        let mut track = Self {
            id,
            class: detection.class,
            bbox: detection.bbox,
            filter,
            hit_streak: 1,
            miss_streak: 0,
            reliability: matched_reliability(detection.confidence),
            occlusion: 0.0,
            state: TrackState::Tentative,
            history,
            history_len: config.history_len,
            last_observed: observation,
            momentum: Vector2::zeros(),
        };
        if config.confirm_hits <= 1 {
            track.state = TrackState::Confirmed { hits: 1 };
        }
        track
    }

    /// Runs the motion filter forward and books a missed frame. A match
    /// later in the same frame undoes the miss.
    pub fn predict(&mut self, dt: f64, now: f64, config: &Config) -> Option<Transition> {
        if self.state == TrackState::Deleted {
            return None;
        }

        self.filter.predict(dt);
        // a miss in the previous frame broke the streak
        if self.miss_streak > 0 {
            self.hit_streak = 0;
        }
        self.miss_streak += 1;
        self.reliability = (1.0 - self.miss_streak as f64 / config.max_misses as f64).max(0.0);

        if self.miss_streak >= config.max_misses {
            self.state = TrackState::Deleted;
            return Some(Transition::Deleted);
        }

        let mut transition = None;
        if self.reliability < config.lost_reliability_threshold
            && matches!(
                self.state,
                TrackState::Tentative | TrackState::Confirmed { .. }
            )
        {
            self.state = TrackState::Lost {
                virtual_trajectory: Vec::with_capacity(config.max_misses as usize),
                lost_since: now,
            };
            transition = Some(Transition::Lost);
        }

        let extrapolated = self.extrapolate(now);
        if let TrackState::Lost {
            virtual_trajectory, ..
        } = &mut self.state
        {
            virtual_trajectory.push(extrapolated);
        }
        transition
    }

    /// Corrects the track with its matched detection.
    pub fn apply_match(
        &mut self,
        detection: &Detection,
        now: f64,
        config: &Config,
    ) -> Option<Transition> {
        let center = detection.center();
        self.filter.update(center);
        self.bbox = detection.bbox;
        self.class = detection.class;
        self.hit_streak += 1;
        self.miss_streak = 0;
        self.reliability = matched_reliability(detection.confidence);
        self.occlusion *= config.occlusion_decay;
        self.observe(center, now);

        let (state, transition) = match mem::replace(&mut self.state, TrackState::Deleted) {
            TrackState::Tentative if self.hit_streak >= config.confirm_hits => (
                TrackState::Confirmed {
                    hits: self.hit_streak,
                },
                Some(Transition::Confirmed),
            ),
            TrackState::Tentative => (TrackState::Tentative, None),
            TrackState::Confirmed { hits } => (TrackState::Confirmed { hits: hits + 1 }, None),
            // a match ends the recovery excursion and drops the trajectory
            TrackState::Lost { .. } => {
                (TrackState::Confirmed { hits: 1 }, Some(Transition::Recovered))
            }
            TrackState::Deleted => (TrackState::Deleted, None),
        };
        self.state = state;
        transition
    }

    /// Books a frame in which a confirmed track found no detection: likely
    /// occluded rather than gone.
    pub fn mark_unmatched(&mut self, config: &Config) {
        if let TrackState::Confirmed { .. } = self.state {
            self.occlusion = (self.occlusion + config.occlusion_step).min(1.0);
        }
    }

    fn observe(&mut self, position: Vector2<f64>, timestamp: f64) {
        let observation = Observation {
            position,
            timestamp,
        };
        self.history.push_back(observation);
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
        self.last_observed = observation;

        if let Some((prev, last)) = self.history.iter().tuple_windows().last() {
            let elapsed = last.timestamp - prev.timestamp;
            if elapsed > 0.0 {
                self.momentum = (last.position - prev.position) / elapsed;
            }
        }
    }

    /// Position implied by the last observation and observation momentum.
    pub fn extrapolate(&self, now: f64) -> Vector2<f64> {
        let elapsed = (now - self.last_observed.timestamp).max(0.0);
        self.last_observed.position + self.momentum * elapsed
    }

    /// Box the track is expected to occupy at `now`, built from the last
    /// observation and observation momentum rather than the filter state.
    pub fn predicted_box(&self, now: f64) -> BoundingBox {
        self.bbox.recentered(self.extrapolate(now))
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn class(&self) -> ObjectClass {
        self.class
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn filter(&self) -> &MotionFilter {
        &self.filter
    }

    pub fn position(&self) -> Vector2<f64> {
        self.filter.position()
    }

    pub fn velocity(&self) -> Vector2<f64> {
        self.filter.velocity()
    }

    pub fn hit_streak(&self) -> u32 {
        self.hit_streak
    }

    pub fn miss_streak(&self) -> u32 {
        self.miss_streak
    }

    pub fn reliability(&self) -> f64 {
        self.reliability
    }

    pub fn occlusion(&self) -> f64 {
        self.occlusion
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    pub fn status(&self) -> TrackStatus {
        self.state.status()
    }

    /// Anything but deleted.
    pub fn is_live(&self) -> bool {
        self.state != TrackState::Deleted
    }

    /// Tentative or confirmed: the tracks reported to consumers.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            TrackState::Tentative | TrackState::Confirmed { .. }
        )
    }

    pub fn history(&self) -> impl Iterator<Item = &Observation> + '_ {
        self.history.iter()
    }

    pub fn last_observation(&self) -> &Observation {
        &self.last_observed
    }

    /// Velocity between the last two observations.
    pub fn momentum(&self) -> Vector2<f64> {
        self.momentum
    }

    /// Momentum needs two observations; before that it is a placeholder.
    pub fn has_momentum(&self) -> bool {
        self.history.len() >= 2
    }

    pub fn virtual_trajectory(&self) -> &[Vector2<f64>] {
        match &self.state {
            TrackState::Lost {
                virtual_trajectory, ..
            } => virtual_trajectory,
            _ => &[],
        }
    }

    /// Tracker clock at which the track went lost, while it is lost.
    pub fn lost_since(&self) -> Option<f64> {
        match self.state {
            TrackState::Lost { lost_since, .. } => Some(lost_since),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            class: self.class,
            bbox: self.bbox,
            position: self.filter.position(),
            velocity: self.filter.velocity(),
            position_uncertainty: self.filter.position_uncertainty(),
            reliability: self.reliability,
            occlusion: self.occlusion,
            status: self.status(),
            in_flight: self.filter.in_flight(),
        }
    }
}

fn matched_reliability(confidence: f64) -> f64 {
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    MATCHED_RELIABILITY_BASE + (1.0 - MATCHED_RELIABILITY_BASE) * confidence
}

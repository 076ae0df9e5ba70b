use crate::{
    config::Config,
    object::Detection,
    track::{Observation, Track, TrackId},
};
use geo::{prelude::*, Point};
use nalgebra::{DMatrix, Vector2};
use noisy_float::types::{r64, R64};
use priority_matrix::PriorityMatrix;
use std::collections::HashMap;

const IOU_WEIGHT: f64 = 0.5;
const VELOCITY_WEIGHT: f64 = 0.3;
const CLASS_WEIGHT: f64 = 0.2;
/// Velocity consistency used while a track has no momentum to compare with.
const NEUTRAL_VELOCITY_CONSISTENCY: f64 = 0.5;

/// Last matched detection position per track, evicted when the track is
/// reaped.
///
/// Entries are written at spawn and on every match with the same center and
/// timestamp the track records as its last observation, so an entry always
/// equals [`Track::last_observation`]. Velocity consistency is therefore a
/// decreasing function of the distance between the detection center and the
/// center of [`Track::predicted_box`].
pub type PreviousPositions = HashMap<TrackId, Observation>;

/// Cost and IoU matrices over `tracks × detections`.
#[derive(Debug, Clone)]
pub struct MatchCandidates {
    /// `1 - score`, fed to the assignment solver.
    pub cost: DMatrix<f64>,
    /// IoU between the observation-centric predicted box and the detection,
    /// used to veto implausible assignments.
    pub iou: DMatrix<f64>,
}

pub struct CostMatrixBuilder {
    velocity_scale: f64,
}

impl CostMatrixBuilder {
    pub fn new(config: &Config) -> Self {
        let Config { velocity_scale, .. } = *config;
        Self { velocity_scale }
    }

    pub fn build(
        &self,
        tracks: &[&Track],
        detections: &[Detection],
        previous: &PreviousPositions,
        now: f64,
    ) -> MatchCandidates {
        let mut iou = DMatrix::zeros(tracks.len(), detections.len());
        let mut cost = DMatrix::zeros(tracks.len(), detections.len());

        for (row, track) in tracks.iter().enumerate() {
            let predicted = track.predicted_box(now);
            let prev = previous.get(&track.id());
            for (col, detection) in detections.iter().enumerate() {
                let overlap = predicted.iou_with(&detection.bbox);
                let velocity = self.velocity_consistency(track, detection, prev, now);
                let class_bonus = if track.class() == detection.class {
                    1.0
                } else {
                    0.0
                };
                let score =
                    IOU_WEIGHT * overlap + VELOCITY_WEIGHT * velocity + CLASS_WEIGHT * class_bonus;

                iou[(row, col)] = overlap;
                cost[(row, col)] = 1.0 - score;
            }
        }

        MatchCandidates { cost, iou }
    }

    /// Agreement in `(0, 1]` between the velocity a detection implies (from
    /// the previous matched position) and the track's observation momentum.
    pub fn velocity_consistency(
        &self,
        track: &Track,
        detection: &Detection,
        previous: Option<&Observation>,
        now: f64,
    ) -> f64 {
        let Some(previous) = previous else {
            return NEUTRAL_VELOCITY_CONSISTENCY;
        };
        let elapsed = now - previous.timestamp;
        if !track.has_momentum() || elapsed <= 0.0 {
            return NEUTRAL_VELOCITY_CONSISTENCY;
        }

        let implied: Vector2<f64> = (detection.center() - previous.position) / elapsed;
        let mismatch = (implied - track.momentum()).norm();
        if !mismatch.is_finite() {
            return 0.0;
        }
        1.0 / (1.0 + mismatch / self.velocity_scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Row(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Column(pub usize);

/// Negated distance, so that the closest pair has the highest priority.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Closeness(pub R64);

/// Lost tracks × free detections whose centers fall within the recovery
/// radius of the track's latest virtual-trajectory point.
#[derive(Debug, Clone)]
pub struct RecoveryMatrix {
    matrix: PriorityMatrix<Row, Column, Closeness>,
}

impl RecoveryMatrix {
    pub fn build<'a>(
        anchors: impl IntoIterator<Item = (Row, Vector2<f64>)>,
        detections: impl IntoIterator<Item = (Column, &'a Detection)> + Clone,
        radius: f64,
    ) -> Self {
        let matrix = anchors
            .into_iter()
            .flat_map(|(row, anchor)| {
                detections.clone().into_iter().filter_map(move |(col, detection)| {
                    let distance = Point::new(anchor.x, anchor.y)
                        .euclidean_distance(&detection.bbox.center_point());
                    (distance.is_finite() && distance <= radius)
                        .then(|| (row, col, Closeness(r64(-distance))))
                })
            })
            .collect();
        Self { matrix }
    }

    /// Removes and returns the closest remaining pair, together with every
    /// other entry in its row and column.
    pub fn pop_closest(&mut self) -> Option<(Row, Column)> {
        let entry = self.matrix.peek()?;
        let (row, col) = (*entry.row, *entry.column);
        self.matrix.remove_row_and_column(&row, &col);
        Some((row, col))
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }
}

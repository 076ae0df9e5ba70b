//! Kalman filter for a single thrown or bounced object.
//!
//! Horizontal motion is always constant-velocity. Vertical motion switches
//! between two sub-models:
//!
//! * **in flight**: gravity accelerates the object towards the bottom of the
//!   frame (`y += vy·dt + ½·g·dt²`, `vy += g·dt`);
//! * **controlled**: plain constant velocity, for an object that is held,
//!   dribbled or rolling.
//!
//! The switch uses a hysteresis band: flight starts above `entry_speed` (or
//! on any upward motion faster than `exit_speed`) and only ends once the
//! vertical speed is below `exit_speed` while the object sits near mid-frame.

use crate::{
    config::{FlightConfig, NoiseProfile},
    kalman::KalmanFilter,
    linalg::{constant_velocity_transition, Measurement},
};
use nalgebra::Vector2;
use tracing::trace;

/// Vertical center of the normalized frame.
const MID_FRAME: f64 = 0.5;

#[derive(Clone, Debug)]
pub struct ProjectileFilter {
    kf: KalmanFilter,
    flight: FlightConfig,
    in_flight: bool,
}

impl ProjectileFilter {
    pub fn new(position: Vector2<f64>, profile: &NoiseProfile, flight: &FlightConfig) -> Self {
        Self {
            kf: KalmanFilter::new(position, profile),
            flight: *flight,
            in_flight: false,
        }
    }

    pub fn kalman(&self) -> &KalmanFilter {
        &self.kf
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn position(&self) -> Vector2<f64> {
        self.kf.position()
    }

    pub fn velocity(&self) -> Vector2<f64> {
        self.kf.velocity()
    }

    pub fn predict(&mut self, dt: f64) -> Vector2<f64> {
        self.refresh_flight_state();

        let f = constant_velocity_transition(dt);
        self.kf.state = f * self.kf.state;
        if self.in_flight {
            let g = self.flight.gravity;
            self.kf.state.y += 0.5 * g * dt * dt;
            self.kf.state.w += g * dt;
        }
        self.kf.propagate_covariance(&f, dt);
        self.kf.position()
    }

    /// Corrects the state; a large vertical innovation while falling is
    /// treated as a bounce.
    pub fn update(&mut self, measurement: Measurement) -> Vector2<f64> {
        let falling = self.kf.state.w > 0.0;
        let innovation = self.kf.innovation(&measurement);
        let corrected = self.kf.update(measurement);

        if falling && innovation.y.abs() > self.flight.bounce_innovation {
            // the pre-bounce velocity no longer says anything
            let reset_var = self.kf.profile().initial_velocity_var;
            if self.kf.p[(3, 3)] < reset_var {
                self.kf.p[(3, 3)] = reset_var;
            }
            if !self.in_flight {
                trace!("bounce detected, entering flight");
            }
            self.in_flight = true;
        }
        corrected
    }

    fn refresh_flight_state(&mut self) {
        let FlightConfig {
            entry_speed,
            exit_speed,
            mid_band,
            ..
        } = self.flight;
        let vy = self.kf.state.w;
        let y = self.kf.state.y;

        if !self.in_flight {
            let rising = vy < -exit_speed;
            if rising || vy.abs() > entry_speed {
                trace!("entering flight, vy = {:.3}", vy);
                self.in_flight = true;
            }
        } else if vy.abs() < exit_speed && (y - MID_FRAME).abs() < mid_band {
            trace!("object controlled at y = {:.3}, leaving flight", y);
            self.in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const DT: f64 = 1.0 / 30.0;

    fn ball_filter(position: Vector2<f64>) -> ProjectileFilter {
        ProjectileFilter::new(position, &NoiseProfile::ball(), &FlightConfig::default())
    }

    /// Small deterministic jitter standing in for detector noise.
    fn jitter(frame: usize) -> f64 {
        0.002 * (frame as f64 * 1.7).sin()
    }

    #[test]
    fn tracks_parabola_then_settles() {
        let g = FlightConfig::default().gravity;
        let (y0, vy0) = (0.8, -1.2);
        let mut pf = ball_filter(Vector2::new(0.8, y0));

        let mut last_x = 0.8;
        for frame in 1..=40 {
            let t = frame as f64 * DT;
            let truth_y = y0 + vy0 * t + 0.5 * g * t * t;
            let predicted = pf.predict(DT);
            if frame > 10 {
                assert_abs_diff_eq!(predicted.y, truth_y, epsilon = 0.02);
                assert!(pf.in_flight());
            }
            last_x = 0.8 + 0.1 * t;
            pf.update(Measurement::new(last_x, truth_y + jitter(frame)));
        }

        // caught at mid-frame and held still
        for _ in 0..30 {
            pf.predict(DT);
            pf.update(Measurement::new(last_x, 0.5));
        }
        assert!(!pf.in_flight());
        assert_abs_diff_eq!(pf.position().y, 0.5, epsilon = 0.01);
        assert!(pf.velocity().y.abs() < FlightConfig::default().exit_speed);
    }

    #[test]
    fn resting_object_uses_constant_velocity() {
        let mut pf = ball_filter(Vector2::new(0.3, 0.9));
        for _ in 0..30 {
            pf.predict(DT);
            assert!(!pf.in_flight());
            pf.update(Measurement::new(0.3, 0.9));
        }
        assert_abs_diff_eq!(pf.position().y, 0.9, epsilon = 1e-6);
    }

    #[test]
    fn flight_persists_away_from_mid_frame() {
        let mut pf = ball_filter(Vector2::new(0.5, 0.5));
        pf.kf.state.w = -1.0;
        pf.predict(DT);
        assert!(pf.in_flight());

        // slow but near the bottom edge: still in flight
        pf.kf.state.y = 0.9;
        pf.kf.state.w = 0.05;
        pf.predict(DT);
        assert!(pf.in_flight());

        // slow and near mid-frame: controlled
        pf.kf.state.y = 0.52;
        pf.kf.state.w = 0.05;
        pf.predict(DT);
        assert!(!pf.in_flight());
    }

    #[test]
    fn bounce_reenters_flight_and_inflates_uncertainty() {
        let mut pf = ball_filter(Vector2::new(0.5, 0.5));
        // falling slowly enough to stay in the controlled sub-model
        pf.kf.state.w = 0.2;
        pf.predict(DT);
        assert!(!pf.in_flight());

        // measurement well above the predicted position
        pf.update(Measurement::new(0.5, 0.45));
        assert!(pf.in_flight());
        assert!(pf.kf.p[(3, 3)] >= NoiseProfile::ball().initial_velocity_var);
    }
}

use crate::{
    config::{FlightConfig, NoiseProfile},
    linalg::{
        clamp_covariance, constant_velocity_transition, inverse_2x2, observation,
        position_uncertainty, Measurement, MeasurementCovariance, StateCovariance, StateVector,
    },
    projectile::ProjectileFilter,
};
use nalgebra::{Matrix2x4, Matrix4, Vector2, Vector4};
use tracing::warn;

/// Constant-velocity Kalman filter over `[x, y, vx, vy]`.
#[derive(Clone, Debug)]
pub struct KalmanFilter {
    pub state: StateVector,
    /// Covariance matrix of estimation error
    pub p: StateCovariance,
    /// Covariance matrix of measurement error
    pub r: MeasurementCovariance,
    /// Observation Matrix
    pub h: Matrix2x4<f64>,
    profile: NoiseProfile,
}

impl KalmanFilter {
    /// Starts a filter at `position` with zero velocity.
    pub fn new(position: Vector2<f64>, profile: &NoiseProfile) -> Self {
        let state = Vector4::new(position.x, position.y, 0.0, 0.0);
        Self::with_state(state, profile)
    }

    pub fn with_state(state: StateVector, profile: &NoiseProfile) -> Self {
        let p = Matrix4::from_diagonal(&Vector4::new(
            profile.initial_position_var,
            profile.initial_position_var,
            profile.initial_velocity_var,
            profile.initial_velocity_var,
        ));
        let r = MeasurementCovariance::identity() * profile.measurement_var;
        Self {
            state,
            p,
            r,
            h: observation(),
            profile: *profile,
        }
    }

    pub fn profile(&self) -> &NoiseProfile {
        &self.profile
    }

    /// Process noise accumulated over `dt` seconds.
    pub fn process_noise(&self, dt: f64) -> StateCovariance {
        let NoiseProfile {
            process_position_var: pos,
            process_velocity_var: vel,
            ..
        } = self.profile;
        Matrix4::from_diagonal(&Vector4::new(pos, pos, vel, vel)) * dt
    }

    /// Advances the state by `dt` seconds and returns the predicted position.
    pub fn predict(&mut self, dt: f64) -> Vector2<f64> {
        let f = constant_velocity_transition(dt);
        self.state = f * self.state;
        self.propagate_covariance(&f, dt);
        self.position()
    }

    /// `P = F·P·Fᵗ + Q`, then clamps the diagonal.
    pub(crate) fn propagate_covariance(&mut self, f: &Matrix4<f64>, dt: f64) {
        self.p = f * self.p * f.transpose() + self.process_noise(dt);
        self.clamp();
    }

    /// Corrects the state with a position measurement and returns the
    /// corrected position.
    ///
    /// If the innovation covariance cannot be inverted the measurement is
    /// adopted as the new position.
    pub fn update(&mut self, measurement: Measurement) -> Vector2<f64> {
        let innovation = measurement - self.h * self.state;
        let s = self.h * self.p * self.h.transpose() + self.r;

        let Some(s_inv) = inverse_2x2(&s) else {
            warn!(
                "singular innovation covariance, adopting measurement ({:.4}, {:.4})",
                measurement.x, measurement.y
            );
            self.state.x = measurement.x;
            self.state.y = measurement.y;
            self.clamp();
            return self.position();
        };

        let k = self.p * self.h.transpose() * s_inv;
        self.state += k * innovation;
        self.p = (Matrix4::identity() - k * self.h) * self.p;
        self.clamp();
        self.position()
    }

    /// Position part of the innovation a measurement would produce.
    pub fn innovation(&self, measurement: &Measurement) -> Vector2<f64> {
        measurement - self.h * self.state
    }

    fn clamp(&mut self) {
        clamp_covariance(
            &mut self.p,
            self.profile.max_position_var,
            self.profile.max_velocity_var,
        );
    }

    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.state.x, self.state.y)
    }

    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.state.z, self.state.w)
    }

    pub fn position_uncertainty(&self) -> f64 {
        position_uncertainty(&self.p)
    }
}

/// The filter a track runs, chosen by the class it was spawned from.
#[derive(Clone, Debug)]
pub enum MotionFilter {
    ConstantVelocity(KalmanFilter),
    Projectile(ProjectileFilter),
}

impl MotionFilter {
    pub fn constant_velocity(position: Vector2<f64>, profile: &NoiseProfile) -> Self {
        Self::ConstantVelocity(KalmanFilter::new(position, profile))
    }

    pub fn projectile(position: Vector2<f64>, profile: &NoiseProfile, flight: &FlightConfig) -> Self {
        Self::Projectile(ProjectileFilter::new(position, profile, flight))
    }

    pub fn predict(&mut self, dt: f64) -> Vector2<f64> {
        match self {
            Self::ConstantVelocity(kf) => kf.predict(dt),
            Self::Projectile(pf) => pf.predict(dt),
        }
    }

    pub fn update(&mut self, measurement: Measurement) -> Vector2<f64> {
        match self {
            Self::ConstantVelocity(kf) => kf.update(measurement),
            Self::Projectile(pf) => pf.update(measurement),
        }
    }

    fn kalman(&self) -> &KalmanFilter {
        match self {
            Self::ConstantVelocity(kf) => kf,
            Self::Projectile(pf) => pf.kalman(),
        }
    }

    pub fn position(&self) -> Vector2<f64> {
        self.kalman().position()
    }

    pub fn velocity(&self) -> Vector2<f64> {
        self.kalman().velocity()
    }

    pub fn position_uncertainty(&self) -> f64 {
        self.kalman().position_uncertainty()
    }

    /// Whether the projectile sub-model currently applies gravity. Always
    /// false for the constant-velocity filter.
    pub fn in_flight(&self) -> bool {
        match self {
            Self::ConstantVelocity(_) => false,
            Self::Projectile(pf) => pf.in_flight(),
        }
    }
}

//! Fixed-size matrix helpers shared by the motion filters.
//!
//! The state vector is laid out as `[x, y, vx, vy]` and the measurement as
//! `[x, y]`. All sizes are known at compile time, so everything here stays on
//! the stack.

use nalgebra::{matrix, Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

pub type StateVector = Vector4<f64>;
pub type StateCovariance = Matrix4<f64>;
pub type Measurement = Vector2<f64>;
pub type MeasurementCovariance = Matrix2<f64>;

/// Determinants with a magnitude below this are treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// Observation matrix picking the position out of the state.
pub fn observation() -> Matrix2x4<f64> {
    matrix![1., 0., 0., 0.;
            0., 1., 0., 0.]
}

/// Constant-velocity transition over `dt` seconds.
pub fn constant_velocity_transition(dt: f64) -> Matrix4<f64> {
    matrix![1., 0., dt, 0.;
            0., 1., 0., dt;
            0., 0., 1., 0.;
            0., 0., 0., 1.]
}

/// Closed-form inverse of a 2×2 matrix.
///
/// Returns `None` when the matrix is singular (or the determinant is not
/// finite), leaving the fallback policy to the caller.
pub fn inverse_2x2(m: &Matrix2<f64>) -> Option<Matrix2<f64>> {
    let (a, b, c, d) = (m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]);
    let det = a * d - b * c;
    if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
        return None;
    }
    Some(matrix![d / det, -b / det;
                 -c / det, a / det])
}

/// Caps the diagonal of a state covariance at `[pos, pos, vel, vel]`.
///
/// NaN entries are replaced by the ceiling as well. Off-diagonal terms are
/// then bounded by `sqrt(p_ii * p_jj)` so that a capped diagonal cannot sit
/// next to a runaway cross term.
pub fn clamp_covariance(p: &mut StateCovariance, max_position_var: f64, max_velocity_var: f64) {
    let ceilings = [
        max_position_var,
        max_position_var,
        max_velocity_var,
        max_velocity_var,
    ];
    for (idx, ceiling) in ceilings.into_iter().enumerate() {
        let value = p[(idx, idx)];
        if value.is_nan() || value > ceiling {
            p[(idx, idx)] = ceiling;
        }
        if p[(idx, idx)] < 0.0 {
            p[(idx, idx)] = 0.0;
        }
    }
    for row in 0..4 {
        for col in (row + 1)..4 {
            let bound = (p[(row, row)] * p[(col, col)]).sqrt();
            let value = p[(row, col)];
            let bounded = if value.is_nan() { 0.0 } else { value.clamp(-bound, bound) };
            p[(row, col)] = bounded;
            p[(col, row)] = bounded;
        }
    }
}

/// Sum of the position variances, square-rooted.
pub fn position_uncertainty(p: &StateCovariance) -> f64 {
    (p[(0, 0)] + p[(1, 1)]).max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn inverse_of_regular_matrix() {
        let m = matrix![4., 7.;
                        2., 6.];
        let inv = inverse_2x2(&m).unwrap();
        let product = m * inv;
        assert_abs_diff_eq!(product, Matrix2::identity(), epsilon = 1e-12);
    }

    #[test]
    fn inverse_of_singular_matrix_is_none() {
        let m = matrix![1., 2.;
                        2., 4.];
        assert!(inverse_2x2(&m).is_none());
        assert!(inverse_2x2(&Matrix2::zeros()).is_none());
    }

    #[test]
    fn transition_moves_position_by_velocity() {
        let state = StateVector::new(0.5, 0.5, 0.3, -0.6);
        let next = constant_velocity_transition(0.5) * state;
        assert_abs_diff_eq!(next, StateVector::new(0.65, 0.2, 0.3, -0.6), epsilon = 1e-12);
        assert_eq!(observation() * next, Measurement::new(next.x, next.y));
    }

    #[test]
    fn covariance_is_clamped() {
        let mut p = StateCovariance::from_diagonal(&Vector4::new(5.0, 0.1, f64::NAN, 50.0));
        p[(0, 1)] = 3.0;
        p[(1, 0)] = 3.0;
        p[(2, 3)] = -0.5;
        clamp_covariance(&mut p, 1.0, 10.0);
        assert_eq!(p[(0, 0)], 1.0);
        assert_eq!(p[(1, 1)], 0.1);
        assert_eq!(p[(2, 2)], 10.0);
        assert_eq!(p[(3, 3)], 10.0);
        assert_abs_diff_eq!(p[(0, 1)], 0.1f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(p[(1, 0)], 0.1f64.sqrt(), epsilon = 1e-12);
        assert_eq!(p[(2, 3)], -0.5);
        assert_abs_diff_eq!(position_uncertainty(&p), 1.1f64.sqrt(), epsilon = 1e-12);
    }
}

use crate::{error::ConfigError, object::ObjectClass};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Defines what the config file should contain.
pub struct Config {
    /// Minimum IoU against the predicted box to accept a first-pass match.
    pub iou_threshold: f64,
    /// Hard cap on simultaneously live tracks.
    pub max_tracks: usize,
    /// Consecutive matched frames needed to confirm a tentative track.
    pub confirm_hits: u32,
    /// Consecutive missed frames after which a track is deleted.
    pub max_misses: u32,
    /// Longest time in seconds the tracker stays in recovery mode.
    pub recovery_timeout_sec: f64,
    /// A track whose reliability falls below this value is marked lost.
    pub lost_reliability_threshold: f64,
    /// Radius around the last virtual-trajectory point within which a lost
    /// track may pick up a detection.
    pub recovery_radius: f64,
    /// Frame interval used when the caller does not supply a usable one.
    pub default_dt: f64,
    /// Occlusion score added to a confirmed track on each missed frame.
    pub occlusion_step: f64,
    /// Factor applied to the occlusion score on each matched frame.
    pub occlusion_decay: f64,
    /// Velocity difference (normalized units per second) at which the
    /// velocity-consistency term drops to one half.
    pub velocity_scale: f64,
    /// Number of observed positions kept per track.
    pub history_len: usize,
    /// Detections of this class are tracked with the projectile filter.
    pub physics_class: Option<ObjectClass>,
    /// Noise profile for classes without an entry in `noise_profiles`.
    pub default_noise: NoiseProfile,
    /// Per-class noise profiles.
    pub noise_profiles: HashMap<ObjectClass, NoiseProfile>,
    /// Parameters of the projectile filter.
    pub flight: FlightConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Kalman tuning for one class of objects. Variances are in normalized units.
pub struct NoiseProfile {
    /// Initial variance of the position. Low: the first detection is trusted.
    pub initial_position_var: f64,
    /// Initial variance of the velocity. High: the initial motion is unknown.
    pub initial_velocity_var: f64,
    /// Position process noise per second.
    pub process_position_var: f64,
    /// Velocity process noise per second. Higher for objects that change
    /// direction quickly.
    pub process_velocity_var: f64,
    /// Detector jitter.
    pub measurement_var: f64,
    /// Ceiling for the position variances.
    pub max_position_var: f64,
    /// Ceiling for the velocity variances.
    pub max_velocity_var: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Tuning of the in-flight sub-mode of the projectile filter.
pub struct FlightConfig {
    /// Gravitational acceleration in normalized units per second squared.
    /// Positive values pull towards the bottom of the frame.
    pub gravity: f64,
    /// Vertical speed above which the object is considered airborne.
    pub entry_speed: f64,
    /// Vertical speed below which a settled object leaves flight. Also the
    /// minimum upward speed that starts a flight.
    pub exit_speed: f64,
    /// Half-height of the band around mid-frame where flight may end.
    pub mid_band: f64,
    /// Vertical innovation that counts as a bounce while falling.
    pub bounce_innovation: f64,
}

impl Default for Config {
    fn default() -> Self {
        let noise_profiles = [
            (ObjectClass::Player, NoiseProfile::default()),
            (ObjectClass::Referee, NoiseProfile::default()),
            (ObjectClass::Ball, NoiseProfile::ball()),
        ]
        .into_iter()
        .collect();

        Self {
            iou_threshold: 0.3,
            max_tracks: 20,
            confirm_hits: 3,
            max_misses: 15,
            recovery_timeout_sec: 2.0,
            lost_reliability_threshold: 0.5,
            recovery_radius: 0.1,
            default_dt: 1.0 / 30.0,
            occlusion_step: 0.1,
            occlusion_decay: 0.5,
            velocity_scale: 0.5,
            history_len: 5,
            physics_class: Some(ObjectClass::Ball),
            default_noise: NoiseProfile::default(),
            noise_profiles,
            flight: FlightConfig::default(),
        }
    }
}

impl Default for NoiseProfile {
    fn default() -> Self {
        Self {
            initial_position_var: 1e-4,
            initial_velocity_var: 1.0,
            process_position_var: 1e-5,
            process_velocity_var: 0.02,
            measurement_var: 1e-4,
            max_position_var: 1.0,
            max_velocity_var: 25.0,
        }
    }
}

impl NoiseProfile {
    /// Profile for a small object that is thrown, bounced and caught.
    pub fn ball() -> Self {
        Self {
            process_position_var: 1e-4,
            process_velocity_var: 1.0,
            ..Self::default()
        }
    }
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            gravity: 1.5,
            entry_speed: 0.3,
            exit_speed: 0.1,
            mid_band: 0.15,
            bounce_innovation: 0.03,
        }
    }
}

impl Config {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn noise_for(&self, class: ObjectClass) -> &NoiseProfile {
        self.noise_profiles
            .get(&class)
            .unwrap_or(&self.default_noise)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("iou_threshold", self.iou_threshold, 0.0, 1.0)?;
        check_range(
            "lost_reliability_threshold",
            self.lost_reliability_threshold,
            0.0,
            1.0,
        )?;
        check_range("occlusion_step", self.occlusion_step, 0.0, 1.0)?;
        check_range("occlusion_decay", self.occlusion_decay, 0.0, 1.0)?;
        check_range("recovery_radius", self.recovery_radius, 0.0, f64::MAX)?;
        check_range("recovery_timeout_sec", self.recovery_timeout_sec, 0.0, f64::MAX)?;
        check_range("default_dt", self.default_dt, f64::MIN_POSITIVE, f64::MAX)?;
        check_range("velocity_scale", self.velocity_scale, f64::MIN_POSITIVE, f64::MAX)?;

        if self.max_tracks == 0 {
            return Err(ConfigError::Zero("max_tracks"));
        }
        if self.confirm_hits == 0 {
            return Err(ConfigError::Zero("confirm_hits"));
        }
        if self.max_misses == 0 {
            return Err(ConfigError::Zero("max_misses"));
        }
        if self.history_len < 2 {
            return Err(ConfigError::OutOfRange {
                field: "history_len",
                value: self.history_len as f64,
                min: 2.0,
                max: usize::MAX as f64,
            });
        }

        for profile in self.noise_profiles.values().chain([&self.default_noise]) {
            profile.validate()?;
        }
        self.flight.validate()
    }
}

impl NoiseProfile {
    fn validate(&self) -> Result<(), ConfigError> {
        let Self {
            initial_position_var,
            initial_velocity_var,
            process_position_var,
            process_velocity_var,
            measurement_var,
            max_position_var,
            max_velocity_var,
        } = *self;

        check_range("initial_position_var", initial_position_var, 0.0, max_position_var)?;
        check_range("initial_velocity_var", initial_velocity_var, 0.0, max_velocity_var)?;
        check_range("process_position_var", process_position_var, 0.0, f64::MAX)?;
        check_range("process_velocity_var", process_velocity_var, 0.0, f64::MAX)?;
        check_range("measurement_var", measurement_var, 0.0, f64::MAX)?;
        Ok(())
    }
}

impl FlightConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("flight.gravity", self.gravity, 0.0, f64::MAX)?;
        check_range("flight.exit_speed", self.exit_speed, 0.0, f64::MAX)?;
        check_range("flight.mid_band", self.mid_band, 0.0, 1.0)?;
        check_range("flight.bounce_innovation", self.bounce_innovation, 0.0, f64::MAX)?;
        if self.exit_speed >= self.entry_speed {
            return Err(ConfigError::InvalidHysteresis {
                entry: self.entry_speed,
                exit: self.exit_speed,
            });
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    // NaN fails both comparisons and is rejected here too
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.max_tracks, 20);
        assert_eq!(config.confirm_hits, 3);
        assert_eq!(config.max_misses, 15);
        assert_eq!(config.noise_for(ObjectClass::Ball), &NoiseProfile::ball());
        assert_eq!(config.noise_for(ObjectClass::Other), &config.default_noise);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = Config::from_json_str(
            r#"{
                "max_tracks": 8,
                "physics_class": null,
                "noise_profiles": { "player": { "measurement_var": 0.0004 } },
                "flight": { "gravity": 2.0 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_tracks, 8);
        assert_eq!(config.iou_threshold, 0.3);
        assert_eq!(config.physics_class, None);
        assert_eq!(config.flight.gravity, 2.0);
        assert_eq!(config.flight.entry_speed, 0.3);

        let player = config.noise_for(ObjectClass::Player);
        assert_eq!(player.measurement_var, 0.0004);
        assert_eq!(player.initial_velocity_var, 1.0);
        // the map was replaced as a whole
        assert_eq!(config.noise_for(ObjectClass::Ball), &config.default_noise);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Config::from_json_str(r#"{ "iou_threshold": 1.5 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "iou_threshold",
                ..
            }
        ));

        let err = Config::from_json_str(r#"{ "max_tracks": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Zero("max_tracks")));

        let err =
            Config::from_json_str(r#"{ "flight": { "entry_speed": 0.1, "exit_speed": 0.2 } }"#)
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHysteresis { .. }));

        let err = Config::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Config::from_json_file("/nonexistent/court-tracking.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

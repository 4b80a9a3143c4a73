//! NIV Lab Waveforms
//!
//! This crate derives synthetic ventilator curves from a handful of sandbox
//! settings. Given a patient profile and a [`Settings`] value it produces a
//! pressure-over-time path, a flow-over-time path and an air-trapping flag.
//!
//! # Types
//!
//! - [`Profile`] - Patient respiratory mechanics (resistance, compliance)
//! - [`Settings`] - The slider values: PEEP, pressure support, rate, rise time
//! - [`Waveform`] - The derived curves plus [`BreathMetrics`]
//! - [`Path`] - An ordered list of drawing commands rendering to an SVG `d` string
//!
//! # Renderers
//!
//! - [`svg::SvgChart`] - Standalone SVG document with grid, axes and curves
//!
//! # Example
//!
//! ```rust
//! use niv_waveform::{map_waveform, Profile, Settings};
//!
//! let settings = Settings {
//!     profile: Profile::Obstructive,
//!     respiratory_rate: 30,
//!     ..Settings::default()
//! };
//!
//! let waveform = map_waveform(&settings);
//! assert!(waveform.air_trapping);
//! assert!(waveform.pressure.to_string().starts_with("M 0 "));
//! ```

mod mapper;
mod path;
pub mod svg;

pub use mapper::{
    map_waveform, BreathMetrics, Waveform, AIR_TRAPPING_THRESHOLD, FLOW_ZERO_Y,
    PLANE_WIDTH, PRESSURE_ZERO_Y,
};
pub use path::{format_coord, Path, PathCommand, Point};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised when sandbox settings fall outside the slider ranges.
///
/// The mapper itself never fails; these errors exist for the input
/// boundary (CLI flags, HTTP bodies) that feeds it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// A value is outside its allowed range.
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u32,
        /// Inclusive lower bound.
        min: u32,
        /// Inclusive upper bound.
        max: u32,
    },

    /// A value is in range but not on the slider grid.
    #[error("{field} must be a multiple of {step} (got {value})")]
    OffStep {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u32,
        /// Slider step.
        step: u32,
    },

    /// Unknown patient profile name.
    #[error("unknown profile '{0}': expected one of 'normal', 'obstructive', 'restrictive'")]
    UnknownProfile(String),
}

// ============================================================================
// Profile
// ============================================================================

/// Patient respiratory profile.
///
/// Each profile maps to a fixed (resistance, compliance) pair; the table is
/// not user-editable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Healthy lungs.
    #[default]
    Normal,
    /// High airway resistance (COPD-like).
    Obstructive,
    /// Low compliance (stiff lungs or chest wall).
    Restrictive,
}

impl Profile {
    /// All profiles, in display order.
    pub const ALL: [Self; 3] = [Self::Normal, Self::Obstructive, Self::Restrictive];

    /// Airway resistance in cmH2O/L/s.
    #[must_use]
    pub const fn resistance(self) -> f64 {
        match self {
            Self::Normal => 10.0,
            Self::Obstructive => 25.0,
            Self::Restrictive => 15.0,
        }
    }

    /// Respiratory system compliance in mL/cmH2O.
    #[must_use]
    pub const fn compliance(self) -> f64 {
        match self {
            Self::Normal => 50.0,
            Self::Obstructive => 60.0,
            Self::Restrictive => 30.0,
        }
    }

    /// Time constant of passive emptying, in seconds.
    ///
    /// ```
    /// use niv_waveform::Profile;
    ///
    /// assert!((Profile::Obstructive.time_constant() - 1.5).abs() < 1e-12);
    /// ```
    #[must_use]
    pub fn time_constant(self) -> f64 {
        self.resistance() * self.compliance() / 1000.0
    }

    /// Lowercase name used on the wire and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Obstructive => "obstructive",
            Self::Restrictive => "restrictive",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Profile {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "obstructive" => Ok(Self::Obstructive),
            "restrictive" => Ok(Self::Restrictive),
            _ => Err(SettingsError::UnknownProfile(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Profile {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Profile {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Allowed PEEP range in cmH2O.
pub const PEEP_RANGE: (u32, u32) = (0, 20);
/// Allowed pressure-support range in cmH2O.
pub const PRESSURE_SUPPORT_RANGE: (u32, u32) = (0, 25);
/// Allowed respiratory-rate range in breaths/min.
pub const RATE_RANGE: (u32, u32) = (8, 30);
/// Allowed rise-time range in milliseconds.
pub const RISE_TIME_RANGE: (u32, u32) = (100, 600);
/// Rise-time slider step in milliseconds.
pub const RISE_TIME_STEP: u32 = 50;

/// Ventilation sandbox settings.
///
/// A plain value object; it fully determines the rendered curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Patient profile.
    #[serde(default)]
    pub profile: Profile,
    /// Positive end-expiratory pressure, cmH2O.
    pub peep: u32,
    /// Inspiratory pressure support above PEEP, cmH2O.
    pub pressure_support: u32,
    /// Respiratory rate, breaths/min.
    pub respiratory_rate: u32,
    /// Inspiratory rise time, milliseconds.
    pub rise_time_ms: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: Profile::Normal,
            peep: 5,
            pressure_support: 10,
            respiratory_rate: 12,
            rise_time_ms: 200,
        }
    }
}

impl Settings {
    /// Checks every field against the slider ranges.
    ///
    /// Returns the first violation found, in field order.
    ///
    /// ```
    /// use niv_waveform::{Settings, SettingsError};
    ///
    /// let bad = Settings { respiratory_rate: 40, ..Settings::default() };
    /// assert!(matches!(bad.validate(), Err(SettingsError::OutOfRange { field: "respiratoryRate", .. })));
    /// ```
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range("peep", self.peep, PEEP_RANGE)?;
        check_range(
            "pressureSupport",
            self.pressure_support,
            PRESSURE_SUPPORT_RANGE,
        )?;
        check_range("respiratoryRate", self.respiratory_rate, RATE_RANGE)?;
        check_range("riseTimeMs", self.rise_time_ms, RISE_TIME_RANGE)?;
        if self.rise_time_ms % RISE_TIME_STEP != 0 {
            return Err(SettingsError::OffStep {
                field: "riseTimeMs",
                value: self.rise_time_ms,
                step: RISE_TIME_STEP,
            });
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: u32, (min, max): (u32, u32)) -> Result<(), SettingsError> {
    if value < min || value > max {
        return Err(SettingsError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

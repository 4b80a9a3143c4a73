//! Waveform parameter mapper.
//!
//! Maps sandbox [`Settings`] to a pressure curve, a flow curve and an
//! air-trapping flag. Pure closed-form arithmetic: no I/O, no shared state,
//! no failure modes. Identical inputs always yield byte-identical paths.
//!
//! The drawing plane is 400 units wide. The pressure zero line sits at
//! y = 100 and the flow zero line at y = 200; y grows downward, so
//! inspiratory flow is drawn above the flow axis and expiratory flow below.
//!
//! The scaling constants below are presentation constants chosen for a
//! readable chart, not a physiological model.

use serde::Serialize;

use crate::path::{Path, Point};
use crate::{Profile, Settings};

/// Width of the drawing plane (one full breath cycle).
pub const PLANE_WIDTH: f64 = 400.0;
/// y coordinate of 0 cmH2O on the pressure trace.
pub const PRESSURE_ZERO_Y: f64 = 100.0;
/// y coordinate of zero flow on the flow trace.
pub const FLOW_ZERO_Y: f64 = 200.0;
/// End-expiratory flow (chart units) above which an obstructive patient is
/// flagged as air trapping.
pub const AIR_TRAPPING_THRESHOLD: f64 = 2.0;

/// Pressure units per cmH2O. PEEP 20 plus 4 x PS 25 still lands at y >= 0.
const PRESSURE_SCALE: f64 = 0.8;
/// Weight of pressure support relative to PEEP in the peak height.
const PRESSURE_SUPPORT_GAIN: f64 = 4.0;
/// Horizontal length of the end-of-inspiration pressure drop.
const PRESSURE_FALL_WIDTH: f64 = 5.0;
/// Minimum plateau kept after the rise segment.
const MIN_PLATEAU_WIDTH: f64 = 1.0;

/// Flow units per (cmH2O / resistance) of pressure support. Kept below
/// [`EXPIRATORY_FLOW_SCALE`] so expiration always peaks higher.
const INSPIRATORY_FLOW_SCALE: f64 = 8.0;
/// Flow units per ((PEEP + PS) / resistance).
const EXPIRATORY_FLOW_SCALE: f64 = 10.0;
/// Horizontal offset from end of inspiration to the expiratory peak.
const EXPIRATORY_PEAK_OFFSET: f64 = 8.0;
/// Number of segments approximating the expiratory decay.
const DECAY_SAMPLES: u32 = 16;

/// Timing and flow figures behind a [`Waveform`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreathMetrics {
    /// Duration of one breath, ms.
    pub cycle_ms: f64,
    /// Inspiratory time (I:E = 1:2), ms.
    pub inspiratory_ms: f64,
    /// Expiratory time, ms.
    pub expiratory_ms: f64,
    /// Resistance × compliance / 1000, seconds.
    pub time_constant_s: f64,
    /// Peak inspiratory flow, chart units. The drawn hump reaches exactly
    /// this height.
    pub peak_inspiratory_flow: f64,
    /// Peak expiratory flow magnitude, chart units.
    pub peak_expiratory_flow: f64,
    /// Expiratory flow left when the next breath starts, chart units.
    pub end_expiratory_flow: f64,
}

/// Derived curves for one set of settings.
///
/// Recomputed from scratch on every settings change; holds no history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Waveform {
    /// Airway pressure over one cycle.
    pub pressure: Path,
    /// Airway flow over one cycle.
    pub flow: Path,
    /// `true` when expiration cannot complete before the next breath.
    pub air_trapping: bool,
    /// Figures the paths were built from.
    pub metrics: BreathMetrics,
}

/// Derives the pressure and flow curves for the given settings.
///
/// Total over the slider ranges and safe outside them: a zero rate is
/// treated as one breath per minute and the rise segment never overruns
/// the inspiratory phase.
///
/// # Example
///
/// ```
/// use niv_waveform::{map_waveform, Settings};
///
/// let waveform = map_waveform(&Settings::default());
/// assert_eq!(
///     waveform.pressure.to_string(),
///     "M 0 96 L 16 64 L 133.33 64 L 138.33 96 L 400 96"
/// );
/// assert!(!waveform.air_trapping);
/// ```
#[must_use]
pub fn map_waveform(settings: &Settings) -> Waveform {
    let profile = settings.profile;
    let resistance = profile.resistance();
    let time_constant_s = profile.time_constant();

    let cycle_ms = 60_000.0 / f64::from(settings.respiratory_rate.max(1));
    let inspiratory_ms = cycle_ms / 3.0;
    let expiratory_ms = cycle_ms * (2.0 / 3.0);

    let x_insp_end = inspiratory_ms / cycle_ms * PLANE_WIDTH;
    let x_rise = (f64::from(settings.rise_time_ms) / cycle_ms * PLANE_WIDTH)
        .min(x_insp_end - MIN_PLATEAU_WIDTH);

    let peep = f64::from(settings.peep);
    let pressure_support = f64::from(settings.pressure_support);

    // Pressure: baseline, ramp, plateau, drop, baseline.
    let baseline_y = PRESSURE_ZERO_Y - peep * PRESSURE_SCALE;
    let peak_y =
        PRESSURE_ZERO_Y - (peep + PRESSURE_SUPPORT_GAIN * pressure_support) * PRESSURE_SCALE;

    let mut pressure = Path::starting_at(0.0, baseline_y);
    pressure
        .line_to(x_rise, peak_y)
        .line_to(x_insp_end, peak_y)
        .line_to(x_insp_end + PRESSURE_FALL_WIDTH, baseline_y)
        .line_to(PLANE_WIDTH, baseline_y);

    // Flow: smooth inspiratory hump, then passive exponential emptying.
    let peak_inspiratory_flow = pressure_support / resistance * INSPIRATORY_FLOW_SCALE;
    let peak_expiratory_flow = (peep + pressure_support) / resistance * EXPIRATORY_FLOW_SCALE;
    let expiratory_s = expiratory_ms / 1000.0;
    let end_expiratory_flow = peak_expiratory_flow * (-expiratory_s / time_constant_s).exp();
    let air_trapping =
        profile == Profile::Obstructive && end_expiratory_flow > AIR_TRAPPING_THRESHOLD;

    // A cubic with both control points at height h peaks at 3h/4.
    let hump = Point::new(x_rise / 2.0, FLOW_ZERO_Y - peak_inspiratory_flow * 4.0 / 3.0);
    let x_exp_peak = x_insp_end + EXPIRATORY_PEAK_OFFSET;

    let mut flow = Path::starting_at(0.0, FLOW_ZERO_Y);
    flow.cubic_to(hump, hump, Point::new(x_insp_end, FLOW_ZERO_Y))
        .line_to(x_exp_peak, FLOW_ZERO_Y + peak_expiratory_flow);

    for k in 1..=DECAY_SAMPLES {
        let frac = f64::from(k) / f64::from(DECAY_SAMPLES);
        if k == DECAY_SAMPLES {
            let residual = if air_trapping { end_expiratory_flow } else { 0.0 };
            flow.line_to(PLANE_WIDTH, FLOW_ZERO_Y + residual);
        } else {
            let x = x_exp_peak + (PLANE_WIDTH - x_exp_peak) * frac;
            let t = expiratory_s * frac;
            flow.line_to(x, FLOW_ZERO_Y + peak_expiratory_flow * (-t / time_constant_s).exp());
        }
    }

    Waveform {
        pressure,
        flow,
        air_trapping,
        metrics: BreathMetrics {
            cycle_ms,
            inspiratory_ms,
            expiratory_ms,
            time_constant_s,
            peak_inspiratory_flow,
            peak_expiratory_flow,
            end_expiratory_flow,
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

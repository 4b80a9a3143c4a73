//! SVG chart rendering for derived waveforms.
//!
//! [`SvgChart`] turns a [`Waveform`] into a standalone SVG document: a light
//! grid, the pressure and flow axes with labels, both curves, and a red
//! marker on the flow tail when air trapping is detected.
//!
//! # Example
//!
//! ```rust
//! use niv_waveform::{map_waveform, svg::SvgChart, Settings};
//!
//! let waveform = map_waveform(&Settings::default());
//! let svg = SvgChart::new(&waveform).render();
//! assert!(svg.starts_with("<svg"));
//! assert!(svg.contains(&waveform.pressure.to_string()));
//! ```

use std::fmt::Write;

use crate::mapper::{FLOW_ZERO_Y, PLANE_WIDTH, PRESSURE_ZERO_Y};
use crate::Waveform;

/// Left margin reserved for axis labels.
const MARGIN_LEFT: f64 = 50.0;
/// Total chart height.
const HEIGHT: f64 = 250.0;
/// Grid spacing.
const GRID_STEP: f64 = 25.0;

const PRESSURE_COLOR: &str = "#f59e0b";
const FLOW_COLOR: &str = "#0ea5e9";
const ALERT_COLOR: &str = "#ef4444";
const GRID_COLOR: &str = "#e2e8f0";
const AXIS_COLOR: &str = "#94a3b8";
const LABEL_COLOR: &str = "#64748b";

/// Renders a [`Waveform`] as an SVG document.
pub struct SvgChart<'a> {
    waveform: &'a Waveform,
    title: Option<String>,
}

impl<'a> SvgChart<'a> {
    /// Creates a chart for the given waveform.
    #[must_use]
    pub const fn new(waveform: &'a Waveform) -> Self {
        Self {
            waveform,
            title: None,
        }
    }

    /// Adds an accessible `<title>` element.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Renders the complete SVG document.
    #[must_use]
    pub fn render(&self) -> String {
        let mut output = String::new();
        let width = MARGIN_LEFT + PLANE_WIDTH;

        let _ = writeln!(
            output,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {width} {HEIGHT}">"#
        );
        if let Some(title) = &self.title {
            let _ = writeln!(output, "  <title>{}</title>", escape_xml(title));
        }
        Self::write_grid(&mut output);
        Self::write_axes(&mut output);
        self.write_curves(&mut output);
        let _ = writeln!(output, "</svg>");

        output
    }

    fn write_grid(output: &mut String) {
        let width = MARGIN_LEFT + PLANE_WIDTH;
        let _ = writeln!(
            output,
            r#"  <g stroke="{GRID_COLOR}" stroke-width="0.5">"#
        );
        let mut y = 0.0;
        while y <= HEIGHT {
            let _ = writeln!(
                output,
                r#"    <line x1="{MARGIN_LEFT}" y1="{y}" x2="{width}" y2="{y}" />"#
            );
            y += GRID_STEP;
        }
        let mut x = MARGIN_LEFT;
        while x <= width {
            let _ = writeln!(
                output,
                r#"    <line x1="{x}" y1="0" x2="{x}" y2="{HEIGHT}" />"#
            );
            x += GRID_STEP;
        }
        let _ = writeln!(output, "  </g>");
    }

    fn write_axes(output: &mut String) {
        let width = MARGIN_LEFT + PLANE_WIDTH;
        let labels = [
            (15.0, "Pression"),
            (PRESSURE_ZERO_Y + 3.0, "0 cmH₂O"),
            (140.0, "Débit"),
            (FLOW_ZERO_Y + 3.0, "0 L/min"),
        ];
        for (y, text) in labels {
            let _ = writeln!(
                output,
                r#"  <text x="10" y="{y}" font-family="sans-serif" font-size="10" fill="{LABEL_COLOR}">{text}</text>"#
            );
        }
        for y in [PRESSURE_ZERO_Y, FLOW_ZERO_Y] {
            let _ = writeln!(
                output,
                r#"  <line x1="{MARGIN_LEFT}" y1="{y}" x2="{width}" y2="{y}" stroke="{AXIS_COLOR}" stroke-width="1" />"#
            );
        }
    }

    fn write_curves(&self, output: &mut String) {
        let _ = writeln!(output, r#"  <g transform="translate({MARGIN_LEFT}, 0)">"#);
        let _ = writeln!(
            output,
            r#"    <path d="{}" stroke="{PRESSURE_COLOR}" stroke-width="2" fill="none" />"#,
            self.waveform.pressure
        );
        let _ = writeln!(
            output,
            r#"    <path d="{}" stroke="{FLOW_COLOR}" stroke-width="2" fill="none" />"#,
            self.waveform.flow
        );
        if self.waveform.air_trapping {
            let tip_x = PLANE_WIDTH - 10.0;
            let _ = writeln!(
                output,
                r#"    <path class="air-trapping" d="M{tip_x} {FLOW_ZERO_Y} L {tip_x} {} L {PLANE_WIDTH} {} Z" fill="{ALERT_COLOR}" />"#,
                FLOW_ZERO_Y - 10.0,
                FLOW_ZERO_Y - 5.0,
            );
        }
        let _ = writeln!(output, "  </g>");
    }
}

/// Escapes the five XML special characters.
fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

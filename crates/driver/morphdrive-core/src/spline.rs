//! Piecewise-linear approximation of calibration curves.
//!
//! The curve input `x` is the source reading `v` scaled by the projected unit
//! `u` (`x = u*v`), so bounds become `x_i/u` and slopes `k*u`. Curves through
//! the origin collapse to a single slope to save expression space.

use morphdrive_api_core::RigHost;

use crate::ast::{ExprNode, LinearTerm, Piecewise, Segment};
use crate::compiler::Ctx;
use crate::diagnostics::{DiagnosticCategory, DiagnosticLog};
use crate::error::{preview, DriverError};
use crate::formula::Term;

/// Sort by x and drop repeated x values, keeping the first point.
pub fn normalize_points(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut pts: Vec<(f64, f64)> = points.to_vec();
    pts.sort_by(|a, b| a.0.total_cmp(&b.0));
    pts.dedup_by(|later, earlier| later.0 == earlier.0);
    pts
}

/// Slope relative to an exact `(0, 0)` point: toward the last point when the
/// origin comes first, toward the first point otherwise.
pub fn cheat_slope(points: &[(f64, f64)]) -> Option<f64> {
    let origin = points.iter().position(|&(x, y)| x == 0.0 && y == 0.0)?;
    let (x0, y0) = points[origin];
    let (x1, y1) = if origin == 0 {
        *points.last()?
    } else {
        points[0]
    };
    if x1 == x0 {
        return None;
    }
    Some((y1 - y0) / (x1 - x0))
}

/// Linear factor of a property term. A spline collapses to its slope at the
/// origin; one that cannot is reported and the plain factor is used.
pub(crate) fn property_factor(diagnostics: &mut DiagnosticLog, subject: &str, term: &Term) -> f64 {
    let Some(points) = term.spline.as_deref() else {
        return term.factor;
    };
    let pts = normalize_points(points);
    let usable = pts.len() >= 2 && pts.iter().all(|(x, y)| x.is_finite() && y.is_finite());
    match cheat_slope(&pts).filter(|_| usable) {
        Some(slope) => slope,
        None => {
            diagnostics.record(
                DiagnosticCategory::DegenerateSpline,
                subject,
                format!(
                    "property spline with {} points has no slope at the origin; using factor {}",
                    pts.len(),
                    term.factor
                ),
            );
            term.factor
        }
    }
}

pub fn piecewise(var: &str, u: f64, points: &[(f64, f64)]) -> Piecewise {
    let (x0, y0) = points[0];
    let segments = points
        .windows(2)
        .map(|w| {
            let (xi, yi) = w[0];
            let (xj, yj) = w[1];
            let k = (yj - yi) / (xj - xi);
            Segment {
                slope: k * u,
                intercept: yi - k * xi,
                bound: xj / u,
            }
        })
        .collect();
    Piecewise {
        var: var.to_string(),
        descending: u < 0.0,
        head: y0,
        head_bound: x0 / u,
        segments,
        tail: points[points.len() - 1].1,
    }
}

/// Node for one spline term, or `None` when the calibration data is unusable.
pub(crate) fn build<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    channel: &str,
    var: &str,
    u: f64,
    points: &[(f64, f64)],
) -> Result<Option<ExprNode>, DriverError> {
    let pts = normalize_points(points);
    if pts.len() < 2 || pts.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        ctx.diagnostics.record(
            DiagnosticCategory::DegenerateSpline,
            channel,
            format!("{} usable calibration points", pts.len()),
        );
        return Ok(None);
    }
    if let Some(slope) = cheat_slope(&pts) {
        log::debug!("{channel}: spline through origin collapsed to slope {slope}");
        return Ok(Some(ExprNode::linear(vec![LinearTerm::new(var, slope * u)])));
    }
    let node = ExprNode::Piecewise(piecewise(var, u, &pts));
    let text = ctx.render(&node);
    if text.len() > ctx.config.max_spline_len {
        return Err(DriverError::SplineTooLong {
            channel: channel.to_string(),
            len: text.len(),
            limit: ctx.config.max_spline_len,
            preview: preview(&text),
        });
    }
    Ok(Some(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphdrive_api_core::ChannelRef;

    #[test]
    fn origin_first_uses_last_point() {
        assert_eq!(cheat_slope(&[(0.0, 0.0), (1.0, 2.0)]), Some(2.0));
        assert_eq!(cheat_slope(&[(0.0, 0.0), (0.5, 1.0), (2.0, 1.0)]), Some(0.5));
    }

    #[test]
    fn origin_later_uses_first_point() {
        assert_eq!(cheat_slope(&[(-2.0, -1.0), (0.0, 0.0), (1.0, 3.0)]), Some(0.5));
        assert_eq!(cheat_slope(&[(1.0, 0.0), (2.0, 1.0)]), None);
    }

    #[test]
    fn property_spline_uses_origin_slope() {
        let mut log = DiagnosticLog::default();
        let term = Term::property(ChannelRef::property("Open"), 1.0)
            .with_spline(vec![(1.0, 2.0), (0.0, 0.0)]);
        assert_eq!(property_factor(&mut log, "jaw", &term), 2.0);
        assert_eq!(log.count(DiagnosticCategory::DegenerateSpline), 0);
    }

    #[test]
    fn property_spline_off_origin_keeps_factor_and_reports() {
        let mut log = DiagnosticLog::default();
        let term = Term::property(ChannelRef::property("Open"), 0.7)
            .with_spline(vec![(0.0, 0.5), (1.0, 2.0)]);
        assert_eq!(property_factor(&mut log, "jaw", &term), 0.7);
        assert_eq!(log.count(DiagnosticCategory::DegenerateSpline), 1);
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let pts = normalize_points(&[(1.0, 1.0), (-1.0, 0.0), (1.0, 5.0)]);
        assert_eq!(pts, vec![(-1.0, 0.0), (1.0, 1.0)]);
    }

    #[test]
    fn piecewise_segments_scale_with_unit() {
        let p = piecewise("a", 2.0, &[(-1.0, 0.0), (1.0, 1.0), (3.0, 1.0)]);
        assert!(!p.descending);
        assert_eq!(p.head, 0.0);
        assert_eq!(p.head_bound, -0.5);
        assert_eq!(p.segments.len(), 2);
        assert_eq!(p.segments[0].slope, 1.0);
        assert_eq!(p.segments[0].intercept, 0.5);
        assert_eq!(p.segments[0].bound, 0.5);
        assert_eq!(p.segments[1].slope, 0.0);
        assert_eq!(p.tail, 1.0);
        assert_eq!(
            ExprNode::Piecewise(p).render(3),
            "(0 if a<-0.5 else a+0.5 if a<0.5 else 1 if a<1.5 else 1)"
        );
    }

    #[test]
    fn negative_unit_flips_comparison() {
        let p = piecewise("a", -1.0, &[(-1.0, 0.0), (1.0, 1.0)]);
        assert!(p.descending);
        assert_eq!(
            ExprNode::Piecewise(p).render(3),
            "(0 if a>1 else -0.5*a+0.5 if a>-1 else 1)"
        );
    }
}

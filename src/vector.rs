//! Vector geometry between keypoints.
//!
//! For keypoints `kp0`, `kp1` and optionally `kp2` of one member in one
//! frame, `V1 = P(kp1) - P(kp0)` and `V2 = P(kp2) - P(kp0)`. Every function
//! returns a [`FeatureTable`] keyed by `(frame, member)`, with columns named
//! by the `op(a-b)` / `op(a-b,a-c)` contract of [`crate::record`].
//!
//! Missing data never raises:
//! - an undetected keypoint yields `NaN` for that frame
//! - a keypoint with no row at all yields no output row
//! - a zero-length vector yields `NaN` for `sin`, `cos` and the three-point
//!   angle, and `0.0` for the two-point angle (`atan2(0, 0)`)
//!
//! Each result starts from the track's processing history and appends one
//! `calc` step describing the calculation.

use crate::error::Result;
use crate::record::{pair_column, triple_column, CalcRecord, CalcType, ProcStep};
use crate::table::{
    FeatureTable, FeatureTableBuilder, KeypointId, MemberFrame, MemberId, TrackPoint, TrackTable,
};

type Vec2 = [f64; 2];

fn vector(from: &TrackPoint, to: &TrackPoint) -> Vec2 {
    [to.x() - from.x(), to.y() - from.y()]
}

fn norm(v: Vec2) -> f64 {
    (v[0] * v[0] + v[1] * v[1]).sqrt()
}

fn cross(v1: Vec2, v2: Vec2) -> f64 {
    v1[0] * v2[1] - v1[1] * v2[0]
}

fn dot(v1: Vec2, v2: Vec2) -> f64 {
    v1[0] * v2[0] + v1[1] * v2[1]
}

fn norms(v1: Vec2, v2: Vec2) -> f64 {
    norm(v1) * norm(v2)
}

/// `num / den`, `NaN` for a zero denominator.
fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        f64::NAN
    } else {
        num / den
    }
}

fn angle2(v: Vec2) -> f64 {
    v[1].atan2(v[0]).to_degrees()
}

fn angle3(v1: Vec2, v2: Vec2) -> f64 {
    ratio(dot(v1, v2), norms(v1, v2)).clamp(-1.0, 1.0).acos().to_degrees()
}

fn member_frames<'a>(
    table: &'a TrackTable,
    member: Option<&'a MemberId>,
) -> impl Iterator<Item = MemberFrame> + 'a {
    table
        .member_frames()
        .into_iter()
        .filter(move |mf| member.is_none_or(|m| &mf.member == m))
}

fn pair_features(
    table: &TrackTable,
    member: Option<&MemberId>,
    kp: [KeypointId; 2],
    names: Vec<String>,
    f: impl Fn(Vec2) -> Vec<f64>,
) -> FeatureTable<MemberFrame> {
    let mut builder = FeatureTableBuilder::new(names);
    let mut absent = 0usize;
    for mf in member_frames(table, member) {
        let (Some(p0), Some(p1)) = (
            table.point(mf.frame, &mf.member, kp[0]),
            table.point(mf.frame, &mf.member, kp[1]),
        ) else {
            absent += 1;
            continue;
        };
        builder.push(mf, p0.timestamp, &f(vector(p0, p1)));
    }
    if absent > 0 {
        log::debug!("keypoints {kp:?} absent in {absent} member frames");
    }
    builder.finish()
}

fn triple_features(
    table: &TrackTable,
    member: Option<&MemberId>,
    kp: [KeypointId; 3],
    names: Vec<String>,
    f: impl Fn(Vec2, Vec2) -> Vec<f64>,
) -> FeatureTable<MemberFrame> {
    let mut builder = FeatureTableBuilder::new(names);
    let mut absent = 0usize;
    for mf in member_frames(table, member) {
        let (Some(p0), Some(p1), Some(p2)) = (
            table.point(mf.frame, &mf.member, kp[0]),
            table.point(mf.frame, &mf.member, kp[1]),
            table.point(mf.frame, &mf.member, kp[2]),
        ) else {
            absent += 1;
            continue;
        };
        builder.push(mf, p0.timestamp, &f(vector(p0, p1), vector(p0, p2)));
    }
    if absent > 0 {
        log::debug!("keypoints {kp:?} absent in {absent} member frames");
    }
    builder.finish()
}

fn component(
    table: &TrackTable,
    member: Option<&MemberId>,
    kp0: KeypointId,
    kp1: KeypointId,
) -> FeatureTable<MemberFrame> {
    let names = vec![
        pair_column("component_x", kp0, kp1),
        pair_column("component_y", kp0, kp1),
    ];
    pair_features(table, member, [kp0, kp1], names, |v| v.to_vec())
}

fn norm_table(
    table: &TrackTable,
    member: Option<&MemberId>,
    kp0: KeypointId,
    kp1: KeypointId,
) -> FeatureTable<MemberFrame> {
    let names = vec![pair_column("norm", kp0, kp1)];
    pair_features(table, member, [kp0, kp1], names, |v| vec![norm(v)])
}

fn angle2_table(
    table: &TrackTable,
    member: Option<&MemberId>,
    kp0: KeypointId,
    kp1: KeypointId,
) -> FeatureTable<MemberFrame> {
    let names = vec![pair_column("deg", kp0, kp1)];
    pair_features(table, member, [kp0, kp1], names, |v| vec![angle2(v)])
}

/// Three-point quantities, computed from one shared `V1`, `V2` per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantity {
    PlusX,
    PlusY,
    Cross,
    Dot,
    Norms,
    Sin,
    Cos,
    Angle,
}

impl Quantity {
    const fn op(self) -> &'static str {
        match self {
            Self::PlusX => "plus_x",
            Self::PlusY => "plus_y",
            Self::Cross => "cross",
            Self::Dot => "dot",
            Self::Norms => "norms",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Angle => "deg",
        }
    }

    fn eval(self, v1: Vec2, v2: Vec2) -> f64 {
        match self {
            Self::PlusX => v1[0] + v2[0],
            Self::PlusY => v1[1] + v2[1],
            Self::Cross => cross(v1, v2),
            Self::Dot => dot(v1, v2),
            Self::Norms => norms(v1, v2),
            Self::Sin => ratio(cross(v1, v2), norms(v1, v2)),
            Self::Cos => ratio(dot(v1, v2), norms(v1, v2)),
            Self::Angle => angle3(v1, v2),
        }
    }
}

fn quantities(
    table: &TrackTable,
    member: Option<&MemberId>,
    kp: [KeypointId; 3],
    wanted: &[Quantity],
) -> FeatureTable<MemberFrame> {
    let names = wanted.iter().map(|q| triple_column(q.op(), kp[0], kp[1], kp[2])).collect();
    triple_features(table, member, kp, names, |v1, v2| {
        wanted.iter().map(|q| q.eval(v1, v2)).collect()
    })
}

const PLUS: [Quantity; 2] = [Quantity::PlusX, Quantity::PlusY];
const SIN_COS: [Quantity; 2] = [Quantity::Sin, Quantity::Cos];
const CROSS_DOT_PLUS_NORMS: [Quantity; 5] =
    [Quantity::Cross, Quantity::Dot, Quantity::PlusX, Quantity::PlusY, Quantity::Norms];
const CROSS_DOT_PLUS_ANGLE: [Quantity; 5] =
    [Quantity::Cross, Quantity::Dot, Quantity::PlusX, Quantity::PlusY, Quantity::Angle];

fn run(table: &TrackTable, record: &CalcRecord) -> FeatureTable<MemberFrame> {
    let member = record.member.as_ref();
    let (a, b) = (record.point_a, record.point_b);
    let c = record.point_c.unwrap_or_default();

    let mut out = match record.calc_type {
        CalcType::Component => component(table, member, a, b),
        CalcType::Norm => norm_table(table, member, a, b),
        CalcType::Angle2 => angle2_table(table, member, a, b),
        CalcType::Plus => quantities(table, member, [a, b, c], &PLUS),
        CalcType::Cross => quantities(table, member, [a, b, c], &[Quantity::Cross]),
        CalcType::Dot => quantities(table, member, [a, b, c], &[Quantity::Dot]),
        CalcType::Norms => quantities(table, member, [a, b, c], &[Quantity::Norms]),
        CalcType::SinCos => quantities(table, member, [a, b, c], &SIN_COS),
        CalcType::Angle3 => quantities(table, member, [a, b, c], &[Quantity::Angle]),
        CalcType::CrossDotPlusNorms => {
            quantities(table, member, [a, b, c], &CROSS_DOT_PLUS_NORMS)
        }
        CalcType::CrossDotPlusAngle => {
            quantities(table, member, [a, b, c], &CROSS_DOT_PLUS_ANGLE)
        }
    };
    out.proc_history.clone_from(&table.attrs.proc_history);
    out.push_history(ProcStep::calc(record));
    out
}

/// `V1` as `component_x(a-b)` and `component_y(a-b)`.
#[must_use]
pub fn calc_component(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::pair(CalcType::Component, kp0, kp1))
}

/// `|V1|` as `norm(a-b)`.
#[must_use]
pub fn calc_norm(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::pair(CalcType::Norm, kp0, kp1))
}

/// Signed angle of `V1` from the x axis in degrees, as `deg(a-b)`.
///
/// A zero-length `V1` (both keypoints at the same position) gives `0.0`,
/// the value of `atan2(0, 0)`, not `NaN`.
#[must_use]
pub fn calc_angle2(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::pair(CalcType::Angle2, kp0, kp1))
}

/// `V1 + V2` as `plus_x(a-b,a-c)` and `plus_y(a-b,a-c)`.
#[must_use]
pub fn calc_plus(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
    kp2: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::triple(CalcType::Plus, kp0, kp1, kp2))
}

/// Scalar 2D cross product.
#[must_use]
pub fn calc_cross(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
    kp2: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::triple(CalcType::Cross, kp0, kp1, kp2))
}

#[must_use]
pub fn calc_dot(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
    kp2: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::triple(CalcType::Dot, kp0, kp1, kp2))
}

/// `|V1| * |V2|`.
#[must_use]
pub fn calc_norms(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
    kp2: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::triple(CalcType::Norms, kp0, kp1, kp2))
}

/// Sine and cosine of the angle between `V1` and `V2`.
///
/// `NaN` when either vector has zero length.
#[must_use]
pub fn calc_sin_cos(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
    kp2: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::triple(CalcType::SinCos, kp0, kp1, kp2))
}

/// Unsigned angle between `V1` and `V2` in degrees, as `deg(a-b,a-c)`.
///
/// The cosine is clipped to `[-1, 1]` before `acos`. `NaN` when either
/// vector has zero length.
#[must_use]
pub fn calc_angle3(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
    kp2: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::triple(CalcType::Angle3, kp0, kp1, kp2))
}

/// Cross, dot, plus and norms in one pass.
#[must_use]
pub fn calc_cross_dot_plus_norms(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
    kp2: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::triple(CalcType::CrossDotPlusNorms, kp0, kp1, kp2))
}

/// Cross, dot, plus and angle in one pass.
#[must_use]
pub fn calc_cross_dot_plus_angle(
    table: &TrackTable,
    kp0: KeypointId,
    kp1: KeypointId,
    kp2: KeypointId,
) -> FeatureTable<MemberFrame> {
    run(table, &CalcRecord::triple(CalcType::CrossDotPlusAngle, kp0, kp1, kp2))
}

/// Run a calculation record, restricted to its member if it names one.
///
/// # Errors
///
/// Returns an error if the record's keypoint count does not match its
/// calculation type.
pub fn compute(table: &TrackTable, record: &CalcRecord) -> Result<FeatureTable<MemberFrame>> {
    record.validate()?;
    Ok(run(table, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{TrackAttrs, TrackKey};
    use approx::assert_relative_eq;

    /// Two members, keypoints 0, 1, 2 forming a right angle at kp0.
    fn table() -> TrackTable {
        let mut rows = Vec::new();
        for f in 0..5 {
            for member in ["1", "2"] {
                let ts = f as f64 * 16.0;
                let base = f as f64;
                rows.push((TrackKey::new(f, member, 0), TrackPoint::new(base, 0.0, ts)));
                let p1 = TrackPoint::new(base + 3.0, 4.0, ts + 1.0);
                let p2 = TrackPoint::new(base - 4.0, 3.0, ts + 2.0);
                rows.push((TrackKey::new(f, member, 1), p1));
                rows.push((TrackKey::new(f, member, 2), p2));
            }
        }
        TrackTable::from_rows(rows, TrackAttrs::default())
    }

    #[test]
    fn test_component_and_norm() {
        let t = table();
        let comp = calc_component(&t, 0, 1);
        assert_eq!(comp.len(), 10);
        assert_eq!(comp.column("component_x(0-1)").unwrap()[0], 3.0);
        assert_eq!(comp.column("component_y(0-1)").unwrap()[0], 4.0);

        let n = calc_norm(&t, 0, 1);
        assert_eq!(n.column("norm(0-1)").unwrap(), &[5.0; 10]);
        // timestamp comes from kp0
        assert_eq!(n.timestamps()[2], 16.0);
    }

    #[test]
    fn test_angles() {
        let t = table();
        let a2 = calc_angle2(&t, 0, 1);
        assert_relative_eq!(a2.column("deg(0-1)").unwrap()[0], 4f64.atan2(3.0).to_degrees());

        let a3 = calc_angle3(&t, 0, 1, 2);
        assert_relative_eq!(a3.column("deg(0-1,0-2)").unwrap()[0], 90.0, epsilon = 1e-12);

        let sc = calc_sin_cos(&t, 0, 1, 2);
        assert_relative_eq!(sc.column("sin(0-1,0-2)").unwrap()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(sc.column("cos(0-1,0-2)").unwrap()[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_three_point_products() {
        let t = table();
        // V1 = (3, 4), V2 = (-4, 3)
        assert_eq!(calc_cross(&t, 0, 1, 2).column("cross(0-1,0-2)").unwrap()[0], 25.0);
        assert_eq!(calc_dot(&t, 0, 1, 2).column("dot(0-1,0-2)").unwrap()[0], 0.0);
        assert_eq!(calc_norms(&t, 0, 1, 2).column("norms(0-1,0-2)").unwrap()[0], 25.0);
        let plus = calc_plus(&t, 0, 1, 2);
        assert_eq!(plus.column("plus_x(0-1,0-2)").unwrap()[0], -1.0);
        assert_eq!(plus.column("plus_y(0-1,0-2)").unwrap()[0], 7.0);
    }

    #[test]
    fn test_composites_match_separate_calls() {
        let t = table();
        let all = calc_cross_dot_plus_norms(&t, 0, 1, 2);
        let separate = calc_cross(&t, 0, 1, 2)
            .join(&calc_dot(&t, 0, 1, 2))
            .join(&calc_plus(&t, 0, 1, 2))
            .join(&calc_norms(&t, 0, 1, 2));
        for name in separate.column_names() {
            assert_eq!(all.column(name).unwrap(), separate.column(name).unwrap(), "{name}");
        }

        let all = calc_cross_dot_plus_angle(&t, 0, 1, 2);
        let angle = calc_angle3(&t, 0, 1, 2);
        assert_eq!(all.column("deg(0-1,0-2)").unwrap(), angle.column("deg(0-1,0-2)").unwrap());
    }

    #[test]
    fn test_undetected_and_absent() {
        let mut t = table();
        t.insert(TrackKey::new(1, "1", 1), TrackPoint::undetected(16.0));
        let t = t.filtered(|k, _| !(k.frame == 2 && k.keypoint == 1));

        let n = calc_norm(&t, 0, 1);
        // frame 2 has no kp1 for either member
        assert_eq!(n.len(), 8);
        let idx = n.keys().iter().position(|k| *k == MemberFrame::new(1, "1")).unwrap();
        assert!(n.column("norm(0-1)").unwrap()[idx].is_nan());

        // keypoint id that never appears
        assert!(calc_norm(&t, 0, 42).is_empty());
    }

    #[test]
    fn test_zero_length_vector_is_nan() {
        let rows = vec![
            (TrackKey::new(0, "1", 0), TrackPoint::new(1.0, 1.0, 0.0)),
            (TrackKey::new(0, "1", 1), TrackPoint::new(1.0, 1.0, 0.0)),
            (TrackKey::new(0, "1", 2), TrackPoint::new(2.0, 1.0, 0.0)),
        ];
        let t = TrackTable::from_rows(rows, TrackAttrs::default());
        assert!(calc_angle3(&t, 0, 1, 2).column("deg(0-1,0-2)").unwrap()[0].is_nan());
        let sc = calc_sin_cos(&t, 0, 1, 2);
        assert!(sc.column("sin(0-1,0-2)").unwrap()[0].is_nan());
        assert!(sc.column("cos(0-1,0-2)").unwrap()[0].is_nan());
    }

    #[test]
    fn test_zero_length_two_point_angle_is_zero() {
        let rows = vec![
            (TrackKey::new(0, "1", 0), TrackPoint::new(4.0, 2.0, 0.0)),
            (TrackKey::new(0, "1", 1), TrackPoint::new(4.0, 2.0, 0.0)),
        ];
        let t = TrackTable::from_rows(rows, TrackAttrs::default());
        assert_eq!(calc_angle2(&t, 0, 1).column("deg(0-1)").unwrap()[0], 0.0);
        assert_eq!(calc_norm(&t, 0, 1).column("norm(0-1)").unwrap()[0], 0.0);
    }

    #[test]
    fn test_direct_calls_record_history() {
        let mut t = table();
        let thinning = ProcStep::new("thinning", Vec::new(), serde_json::json!({ "n": 2 }));
        t.attrs.proc_history.push(thinning);

        let n = calc_norm(&t, 0, 1);
        let kinds: Vec<&str> = n.proc_history.iter().map(|p| p.kind.as_str()).collect();
        assert_eq!(kinds, vec!["thinning", "calc"]);
        let rec: CalcRecord = serde_json::from_value(n.proc_history[1].params.clone()).unwrap();
        assert_eq!(rec, CalcRecord::pair(CalcType::Norm, 0, 1));

        // same history as the record-driven path
        let via_record = compute(&t, &CalcRecord::triple(CalcType::SinCos, 0, 1, 2)).unwrap();
        assert_eq!(calc_sin_cos(&t, 0, 1, 2).proc_history, via_record.proc_history);
    }

    #[test]
    fn test_compute_record() {
        let t = table();
        let record = CalcRecord::triple(CalcType::Angle3, 0, 1, 2).with_member("2");
        let out = compute(&t, &record).unwrap();
        assert_eq!(out.len(), 5);
        assert!(out.keys().iter().all(|k| k.member.as_str() == "2"));
        assert_eq!(out.proc_history.last().map(|s| s.kind.as_str()), Some("calc"));

        assert!(compute(&t, &CalcRecord::pair(CalcType::Dot, 0, 1)).is_err());
    }

    #[test]
    fn test_column_names_parse_back() {
        let t = table();
        let out = calc_sin_cos(&t, 0, 1, 2);
        for name in out.column_names() {
            let rec = CalcRecord::from_column_name(name).unwrap();
            assert_eq!(rec.calc_type, CalcType::SinCos);
            assert_eq!((rec.point_a, rec.point_b, rec.point_c), (0, 1, Some(2)));
        }
    }
}

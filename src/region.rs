//! Point-in-polygon tests against a user-drawn region.
//!
//! A point is inside when the cross products `(b - a) x (p - a)` over every
//! polygon edge `a -> b` never take both signs. Zero counts as either sign,
//! so points on an edge are inside, and the test works for clockwise and
//! counter-clockwise vertex order alike. It is exact for convex polygons.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::record::ProcStep;
use crate::table::{FeatureTable, FeatureTableBuilder, MemberFrame, TrackKey, TrackTable};

/// Which side of the region a filter removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionMode {
    RemoveInside,
    RemoveOutside,
}

/// Containment of one point in a polygon, `None` for fewer than 3 vertices.
#[must_use]
pub fn point_in_polygon(point: [f64; 2], polygon: &[[f64; 2]]) -> Option<bool> {
    if polygon.len() < 3 {
        return None;
    }
    let mut positive = false;
    let mut negative = false;
    for (i, a) in polygon.iter().enumerate() {
        let b = polygon[(i + 1) % polygon.len()];
        let cross = (b[0] - a[0]) * (point[1] - a[1]) - (b[1] - a[1]) * (point[0] - a[0]);
        positive |= cross > 0.0;
        negative |= cross < 0.0;
    }
    Some(!(positive && negative))
}

/// Test every row of a track table against a polygon scaled by `scale`.
///
/// Undetected keypoints and degenerate polygons give `None`.
#[must_use]
pub fn is_in_poly(
    table: &TrackTable,
    polygon: &[[f64; 2]],
    scale: f64,
) -> Vec<(TrackKey, Option<bool>)> {
    if polygon.len() < 3 {
        log::warn!("polygon has {} vertices, containment is undefined", polygon.len());
    }
    let scaled: Vec<[f64; 2]> = polygon.iter().map(|p| [p[0] * scale, p[1] * scale]).collect();
    table
        .iter()
        .map(|(key, point)| {
            let inside = point.position.and_then(|p| point_in_polygon(p, &scaled));
            (key.clone(), inside)
        })
        .collect()
}

/// [`is_in_poly`] as a named column on a per-keypoint table.
///
/// Inside is `1.0`, outside `0.0` and undefined containment `NaN`, so the
/// flags can be joined and mixed like any other derived column.
#[must_use]
pub fn in_poly_column(
    table: &TrackTable,
    polygon: &[[f64; 2]],
    output_column: &str,
    scale: f64,
) -> FeatureTable<TrackKey> {
    let mut builder = FeatureTableBuilder::new(vec![output_column.to_owned()]);
    let flags = is_in_poly(table, polygon, scale);
    for ((key, inside), (_, point)) in flags.into_iter().zip(table.iter()) {
        let flag = inside.map_or(f64::NAN, |v| f64::from(u8::from(v)));
        builder.push(key, point.timestamp, &[flag]);
    }
    let mut out = builder.finish();
    out.proc_history.clone_from(&table.attrs.proc_history);
    out.push_history(ProcStep::new(
        "in_poly",
        Vec::new(),
        serde_json::json!({ "polygon": polygon, "scale": scale }),
    ));
    out
}

/// Remove rows inside or outside a polygon.
///
/// With `whole_member`, every keypoint of a `(frame, member)` is removed
/// when any one of them is flagged. Rows with undefined containment are
/// never flagged.
#[must_use]
pub fn filter_region(
    table: &TrackTable,
    polygon: &[[f64; 2]],
    scale: f64,
    mode: RegionMode,
    whole_member: bool,
) -> TrackTable {
    let flag = match mode {
        RegionMode::RemoveInside => true,
        RegionMode::RemoveOutside => false,
    };
    let flagged: BTreeSet<TrackKey> = is_in_poly(table, polygon, scale)
        .into_iter()
        .filter(|(_, inside)| *inside == Some(flag))
        .map(|(key, _)| key)
        .collect();
    let flagged_members: BTreeSet<MemberFrame> = if whole_member {
        flagged.iter().map(TrackKey::member_frame).collect()
    } else {
        BTreeSet::new()
    };

    let mut out = table.filtered(|key, _| {
        let member_flagged = whole_member && flagged_members.contains(&key.member_frame());
        !(flagged.contains(key) || member_flagged)
    });
    out.attrs.proc_history.push(ProcStep::new(
        "region",
        Vec::new(),
        serde_json::json!({
            "polygon": polygon,
            "scale": scale,
            "mode": mode,
            "whole_member": whole_member,
        }),
    ));
    out
}

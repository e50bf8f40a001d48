//! Persisted artifacts reload with the same columns, values and history.

use keypoint_motion::{
    calc_cross_dot_plus_norms, compute, mix, speed, CalcRecord, CalcType, EngineError,
    FeatureArtifact, FeatureGroup, FeatureStore, FilterConfig, MemberFrame, MixOp, MixRecord,
    NormalizeCode, StoreGroup, TrackAttrs, TrackKey, TrackPoint, TrackTable,
};

fn track() -> TrackTable {
    let mut attrs = TrackAttrs {
        model: "mediapipe".to_owned(),
        video_name: "session_01.mp4".to_owned(),
        frame_size: Some((1280, 720)),
        roi_left_top: Some([40.0, 20.0]),
        take: Some(2),
        prev: Some("session_00.mp4".to_owned()),
        ..TrackAttrs::default()
    };
    attrs.scene_table.push(0.0, 400.0, "reach");
    attrs.scene_table.push(900.0, 500.0, "grasp");
    let roi = attrs.sentinel();

    let rows = (0..25).flat_map(move |f| {
        let ts = f as f64 * 1000.0 / 60.0;
        let wobble = (f as f64 * 0.2).sin();
        [
            (
                TrackKey::new(f, "3", 0),
                TrackPoint::from_raw(300.0, 200.0, ts, roi).with_extra("z", -0.1),
            ),
            (TrackKey::new(f, "3", 1), TrackPoint::from_raw(320.0 + wobble, 180.0, ts, roi)),
            // undetected every fifth frame
            (
                TrackKey::new(f, "3", 2),
                if f % 5 == 0 {
                    TrackPoint::from_raw(roi[0], roi[1], ts, roi)
                } else {
                    TrackPoint::from_raw(290.0, 170.0 - wobble, ts, roi)
                },
            ),
        ]
    });
    TrackTable::from_rows(rows, attrs)
}

#[test]
fn track_table_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.json");
    let table = track();
    table.save_json(&path).unwrap();
    let loaded = TrackTable::load_json(&path).unwrap();
    assert_eq!(loaded, table);
    assert_eq!(loaded.attrs.scene_table.scenes()[1].start, 500.0);
}

#[test]
fn feature_artifact_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("features.json");
    let table = track();

    let features = compute(&table, &CalcRecord::triple(CalcType::SinCos, 0, 1, 2)).unwrap();
    let record = MixRecord::new(
        "sin(0-1,0-2)",
        MixOp::Div,
        Some("cos(0-1,0-2)".to_owned()),
        NormalizeCode::Lowpass,
    );
    let mixed = features.join(&mix(&features, &record, &FilterConfig::default()).unwrap());
    let artifact = FeatureArtifact::new(mixed, table.attrs.clone());
    artifact.save(&path).unwrap();

    let loaded = FeatureArtifact::<MemberFrame>::load(&path).unwrap();
    let names: Vec<&str> = loaded.table.column_names().collect();
    assert_eq!(names, artifact.table.column_names().collect::<Vec<_>>());
    assert_eq!(loaded.table.proc_history, artifact.table.proc_history);
    let kinds: Vec<&str> = loaded.table.proc_history.iter().map(|p| p.kind.as_str()).collect();
    assert_eq!(kinds, vec!["calc", "mix"]);
    assert_eq!(loaded.table.keys(), artifact.table.keys());
    for name in names {
        let (a, b) = (loaded.table.column(name).unwrap(), artifact.table.column(name).unwrap());
        for (x, y) in a.iter().zip(b) {
            assert!(x == y || (x.is_nan() && y.is_nan()), "{name}: {x} != {y}");
        }
    }
    assert_eq!(loaded.attrs, artifact.attrs);
}

#[test]
fn keypoint_level_artifact_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speed.json");
    let s = speed(&track(), 2).unwrap();
    FeatureArtifact::new(s.clone(), TrackAttrs::default()).save(&path).unwrap();
    let loaded = FeatureArtifact::<TrackKey>::load(&path).unwrap();
    assert_eq!(loaded.table.keys(), s.keys());
    assert_eq!(loaded.table.proc_history[0].kind, "speed");
}

#[test]
fn feature_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let table = track();
    let points = calc_cross_dot_plus_norms(&table, 0, 1, 2);

    let mut store = FeatureStore::new(table.attrs.clone());
    store.insert(
        StoreGroup::Points,
        FeatureGroup {
            source_cols: points.column_names().map(str::to_owned).collect(),
            settings: serde_json::to_value(CalcRecord::triple(
                CalcType::CrossDotPlusNorms,
                0,
                1,
                2,
            ))
            .unwrap(),
            table: points,
        },
    );
    store.save(&path).unwrap();

    let loaded = FeatureStore::load(&path).unwrap();
    let group = loaded.get(StoreGroup::Points).unwrap();
    let settings: CalcRecord = serde_json::from_value(group.settings.clone()).unwrap();
    assert_eq!(settings.calc_type, CalcType::CrossDotPlusNorms);
    assert_eq!(group.source_cols.len(), 5);
    assert_eq!(loaded.attrs.video_name, "session_01.mp4");
}

#[test]
fn missing_artifact_is_typed_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = FeatureStore::load(dir.path().join("absent.json"));
    assert!(matches!(result, Err(EngineError::Io { .. })));
}

#[test]
fn right_angle_ratio_keeps_infinity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ratio.json");
    // V1 = (3, 4), V2 = (-4, 3): cos is exactly zero
    let rows = (0..4).flat_map(|f| {
        let ts = f as f64 * 20.0;
        [
            (TrackKey::new(f, "1", 0), TrackPoint::new(0.0, 0.0, ts)),
            (TrackKey::new(f, "1", 1), TrackPoint::new(3.0, 4.0, ts)),
            (TrackKey::new(f, "1", 2), TrackPoint::new(-4.0, 3.0, ts)),
        ]
    });
    let table = TrackTable::from_rows(rows, TrackAttrs::default());
    let features = compute(&table, &CalcRecord::triple(CalcType::SinCos, 0, 1, 2)).unwrap();
    let record = MixRecord::new(
        "sin(0-1,0-2)",
        MixOp::Div,
        Some("cos(0-1,0-2)".to_owned()),
        NormalizeCode::None,
    );
    let ratio = mix(&features, &record, &FilterConfig::default()).unwrap();
    let name = record.column_name();
    assert!(ratio.column(&name).unwrap().iter().all(|&v| v == f64::INFINITY));

    FeatureArtifact::new(ratio.clone(), TrackAttrs::default()).save(&path).unwrap();
    let loaded = FeatureArtifact::<MemberFrame>::load(&path).unwrap();
    assert_eq!(loaded.table, ratio);
}

#[test]
fn nan_timestamp_track_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nan_ts.json");
    let table = TrackTable::from_rows(
        vec![
            (TrackKey::new(0, "1", 0), TrackPoint::new(10.0, 20.0, f64::NAN)),
            (TrackKey::new(1, "1", 0), TrackPoint::new(11.0, 20.0, 16.0)),
        ],
        TrackAttrs::default(),
    );
    table.save_json(&path).unwrap();
    let loaded = TrackTable::load_json(&path).unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.get(&TrackKey::new(0, "1", 0)).unwrap().timestamp.is_nan());
    assert_eq!(loaded.get(&TrackKey::new(1, "1", 0)).unwrap().timestamp, 16.0);
}

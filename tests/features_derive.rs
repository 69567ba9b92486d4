use chrono::{Days, NaiveDate};
use hazardcast::{
    assert_schema_compatible, build_feature_schema, derive_features, heat_index, FeatureConfig,
    FeatureError, HazardLabel, LabelThresholds, RawObservation, WindowMode, FEATURE_COLUMNS,
    FEATURE_SCHEMA_VERSION,
};

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 26)
        .unwrap()
        .checked_add_days(Days::new(offset))
        .unwrap()
}

fn obs(offset: u64, t2m_c: f64, precip: f64, ws: f64, rh: f64) -> RawObservation {
    RawObservation {
        date: day(offset),
        t2m_c,
        precip,
        ws,
        rh,
    }
}

fn series(days: u64) -> Vec<RawObservation> {
    (0..days)
        .map(|i| {
            obs(
                i,
                18.0 + (i % 9) as f64 * 2.5,
                (i % 4) as f64 * 1.25,
                2.0 + (i % 5) as f64,
                55.0 + (i % 7) as f64 * 5.0,
            )
        })
        .collect()
}

#[test]
fn output_drops_exactly_the_first_two_rows() {
    for n in [3_u64, 4, 10, 40] {
        let raw = series(n);
        let rows = derive_features(&raw, &FeatureConfig::default());
        assert_eq!(rows.len() as u64, n - 2);
        assert_eq!(rows[0].date, raw[2].date);
        assert!(rows.windows(2).all(|pair| pair[0].date < pair[1].date));
    }
}

#[test]
fn tables_shorter_than_three_rows_yield_nothing() {
    for n in [0_u64, 1, 2] {
        assert!(derive_features(&series(n), &FeatureConfig::default()).is_empty());
    }
}

#[test]
fn hot_label_follows_temperature_threshold() {
    let raw = vec![
        obs(0, 5.0, 0.0, 1.0, 40.0),
        obs(1, 5.0, 0.0, 1.0, 40.0),
        obs(2, 10.0, 0.0, 1.0, 40.0),
        obs(3, 20.0, 0.0, 1.0, 40.0),
        obs(4, 40.0, 0.0, 1.0, 40.0),
    ];
    let rows = derive_features(&raw, &FeatureConfig::default());
    let hot: Vec<u8> = rows.iter().map(|r| r.label(HazardLabel::VeryHot)).collect();
    assert_eq!(hot, vec![0, 0, 1]);

    let short = derive_features(&raw[2..], &FeatureConfig::default());
    assert_eq!(short.len(), 1);
    assert_eq!(short[0].labels.very_hot, 1);
}

#[test]
fn rolling_precip_uses_partial_windows() {
    let raw: Vec<_> = (0..4).map(|i| obs(i, 20.0, 2.0, 1.0, 50.0)).collect();
    let rows = derive_features(&raw, &FeatureConfig::default());

    let fourth = rows.last().unwrap();
    assert_eq!(fourth.date, day(3));
    assert_eq!(fourth.precip_3d, 6.0);
    assert_eq!(fourth.precip_7d, 8.0);

    let third = rows[0];
    assert_eq!(third.precip_3d, 6.0);
    assert_eq!(third.precip_7d, 6.0);
}

#[test]
fn lags_and_derived_values_match_definitions() {
    let raw = vec![
        obs(0, 11.0, 0.0, 4.0, 60.0),
        obs(1, 12.0, 0.0, 5.0, 60.0),
        obs(2, 13.0, 0.0, 6.0, 90.0),
    ];
    let row = derive_features(&raw, &FeatureConfig::default())[0];

    assert_eq!(row.t_lag1, 12.0);
    assert_eq!(row.t_lag2, 11.0);
    assert_eq!(row.ws_lag1, 5.0);
    assert_close(row.heat_index, heat_index(13.0, 90.0));

    let angle = 2.0 * std::f64::consts::PI * 59.0 / 365.25; // 2024-02-28 is day 59
    assert_close(row.sin_doy, angle.sin());
    assert_close(row.cos_doy, angle.cos());
}

#[test]
fn wet_and_windy_and_cold_labels() {
    let raw = vec![
        obs(0, 2.0, 3.0, 1.0, 50.0),
        obs(1, 1.0, 3.0, 1.0, 50.0),
        obs(2, -1.0, 0.0, 10.5, 50.0),
    ];
    let row = derive_features(&raw, &FeatureConfig::default())[0];
    assert_eq!(row.labels.very_wet, 1);
    assert_eq!(row.labels.very_windy, 1);
    assert_eq!(row.labels.very_cold, 1);
    assert_eq!(row.labels.very_hot, 0);
}

#[test]
fn custom_thresholds_change_labels_not_features() {
    let raw = series(12);
    let default_rows = derive_features(&raw, &FeatureConfig::default());
    let strict = FeatureConfig {
        thresholds: LabelThresholds {
            hot_above_c: 20.0,
            ..LabelThresholds::default()
        },
        ..FeatureConfig::default()
    };
    let strict_rows = derive_features(&raw, &strict);

    for (a, b) in default_rows.iter().zip(&strict_rows) {
        assert_eq!(a.feature_values(), b.feature_values());
        assert_eq!(b.labels.very_hot, u8::from(b.t2m_c > 20.0));
    }
}

#[test]
fn derive_is_pure_and_input_order_insensitive() {
    let raw = series(30);
    let mut shuffled = raw.clone();
    shuffled.reverse();
    shuffled.swap(3, 17);

    let a = derive_features(&raw, &FeatureConfig::default());
    let b = derive_features(&raw, &FeatureConfig::default());
    let c = derive_features(&shuffled, &FeatureConfig::default());
    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[test]
fn positional_mode_bridges_calendar_gaps() {
    let raw = vec![
        obs(0, 10.0, 1.0, 1.0, 50.0),
        obs(1, 11.0, 1.0, 1.0, 50.0),
        obs(5, 15.0, 1.0, 1.0, 50.0),
    ];
    let rows = derive_features(&raw, &FeatureConfig::default());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].date, day(5));
    assert_eq!(rows[0].t_lag1, 11.0);
    assert_eq!(rows[0].precip_3d, 3.0);

    let calendar = derive_features(&raw, &FeatureConfig::with_window_mode(WindowMode::CalendarAware));
    assert!(calendar.is_empty());
}

#[test]
fn short_inference_window_reproduces_training_rows() {
    let history = series(60);
    let training = derive_features(&history, &FeatureConfig::default());

    for end in [20_usize, 41, 59] {
        let window = &history[end - 10..=end];
        let serving = derive_features(window, &FeatureConfig::default());
        let served = serving.last().unwrap();
        let trained = training.iter().find(|r| r.date == served.date).unwrap();
        assert_eq!(served, trained);
    }
}

#[test]
fn missing_temperature_drops_its_row_and_the_rows_lagging_off_it() {
    let mut raw: Vec<_> = (0..8).map(|i| obs(i, 25.0, 1.0, 3.0, 60.0)).collect();
    raw[4].t2m_c = f64::NAN;

    let rows = derive_features(&raw, &FeatureConfig::default());
    let dates: Vec<_> = rows.iter().map(|r| r.date).collect();

    // day 4 is missing; days 5 and 6 lag off it
    assert_eq!(dates, vec![day(2), day(3), day(7)]);
    assert!(rows
        .iter()
        .all(|r| r.feature_values().iter().all(|v| !v.is_nan())));
}

#[test]
fn missing_precip_drops_its_row_and_rolling_sums_skip_it() {
    let mut raw: Vec<_> = (0..6).map(|i| obs(i, 25.0, 2.0, 3.0, 60.0)).collect();
    raw[3].precip = f64::NAN;

    let rows = derive_features(&raw, &FeatureConfig::default());
    let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![day(2), day(4), day(5)]);

    let day4 = rows[1];
    assert_eq!(day4.precip_3d, 4.0);
    assert_eq!(day4.precip_7d, 8.0);
    let day5 = rows[2];
    assert_eq!(day5.precip_3d, 4.0);
    assert_eq!(day5.precip_7d, 10.0);
}

#[test]
fn schema_column_order_is_the_feature_contract() {
    let cfg = FeatureConfig::default();
    let schema_a = build_feature_schema(&cfg);
    let schema_b = build_feature_schema(&cfg);

    assert_eq!(schema_a, schema_b);
    assert_eq!(schema_a.version, FEATURE_SCHEMA_VERSION);
    assert_eq!(schema_a.column_names(), FEATURE_COLUMNS.to_vec());
    assert_eq!(schema_a.labels, HazardLabel::ALL.to_vec());
    assert_eq!(schema_a.columns[0].name, "t2m_c");
    assert_eq!(schema_a.columns[11].name, "heat_index");

    let row = derive_features(&series(5), &cfg)[0];
    let projected = row.project(&schema_a.column_names()).unwrap();
    assert_eq!(projected, row.feature_values().to_vec());
}

#[test]
fn fingerprint_tracks_window_mode_and_thresholds() {
    let base = build_feature_schema(&FeatureConfig::default());
    let calendar = build_feature_schema(&FeatureConfig::with_window_mode(WindowMode::CalendarAware));
    let tuned = build_feature_schema(&FeatureConfig {
        thresholds: LabelThresholds {
            windy_above_ms: 12.0,
            ..LabelThresholds::default()
        },
        ..FeatureConfig::default()
    });

    assert_ne!(base.fingerprint, calendar.fingerprint);
    assert_ne!(base.fingerprint, tuned.fingerprint);
    assert_eq!(base.fingerprint.len(), 64);

    assert_schema_compatible(FEATURE_SCHEMA_VERSION, &base.fingerprint, &base)
        .expect("compatibility should pass");
    let err = assert_schema_compatible(FEATURE_SCHEMA_VERSION, &calendar.fingerprint, &base)
        .expect_err("fingerprint mismatch expected");
    assert!(matches!(err, FeatureError::SchemaFingerprintMismatch { .. }));
    let err = assert_schema_compatible(FEATURE_SCHEMA_VERSION + 1, &base.fingerprint, &base)
        .expect_err("version mismatch expected");
    assert!(matches!(err, FeatureError::SchemaVersionMismatch { .. }));
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-12,
        "actual={actual} expected={expected}"
    );
}

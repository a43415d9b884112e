//! End-to-end ingest runs against in-memory stores.
mod common;

use chrono::{NaiveDate, NaiveTime};
use std::io::Write;

use common::{
    ARR, DEP, Harness, full_row, plan_message, plan_message_at, primorye_region, test_config,
    write_csv,
};
use uas_ingest::ProcessingMode;
use uas_ingest::flight_plans_repo::DurabilityMode;

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[tokio::test]
async fn test_three_row_file() {
    let harness = Harness::new();
    let file = write_csv(&[
        full_row("7772251137"),
        (plan_message("7772251138"), DEP.to_string(), String::new()),
        full_row("7772251137"),
    ]);

    let summary = harness
        .pipeline(test_config())
        .ingest_file(file.path())
        .await
        .unwrap();

    assert_eq!(summary.mode, ProcessingMode::Standard);
    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.actual_flights_created, 1);
    assert_eq!(summary.lost, 0);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.error_messages, vec!["Row 3: arrival message is missing"]);

    let stats = &summary.validation_stats;
    assert_eq!(stats.total_rows, 3);
    assert_eq!(stats.complete_flights, 2);
    assert_eq!(stats.incomplete_flights, 1);
    assert_eq!(stats.partial_departure_arrival, 1);
    assert_eq!(stats.flights_with_actual, 2);

    let plans = harness.flights.plans();
    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert_eq!(plan.sid, "7772251137");
    assert_eq!(plan.flight_id, "RF37452");
    assert_eq!(plan.departure_region_id, Some(harness.region.id));
    assert_eq!(plan.destination_region_id, Some(harness.region.id));
    // 07:05 UTC in Moscow
    assert_eq!(plan.planned_date, NaiveDate::from_ymd_opt(2025, 1, 24).unwrap());
    assert_eq!(plan.planned_departure_time, time(10, 5));
    assert_eq!(plan.planned_duration_minutes, 115);
    assert!(plan.flight_zone_id.is_some());
    assert!(plan.raw_data["arrival"].as_str().unwrap().contains("IARR"));

    let actuals = harness.flights.actuals();
    assert_eq!(actuals.len(), 1);
    let actual = &actuals[0];
    assert_eq!(actual.flight_plan_id, plan.id);
    assert_eq!(actual.actual_departure_time, Some(time(10, 5)));
    assert_eq!(actual.actual_arrival_time, Some(time(11, 50)));
    assert_eq!(actual.actual_duration_minutes, Some(105));
    assert_eq!(actual.flight_status, "completed");

    assert_eq!(harness.references.operators().len(), 1);
    assert_eq!(harness.references.flight_zones()[0].code, "R001");
}

#[tokio::test]
async fn test_reingest_only_adds_rows_without_sid() {
    let harness = Harness::new();
    let file = write_csv(&[full_row("500100"), full_row("")]);
    let pipeline = harness.pipeline(test_config());

    let first = pipeline.ingest_file(file.path()).await.unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.duplicates, 0);

    let second = pipeline.ingest_file(file.path()).await.unwrap();
    assert_eq!(second.processed, 2);
    assert_eq!(second.created, 1);
    assert_eq!(second.duplicates, 1);
    assert_eq!(harness.flights.plans().len(), 3);
    // Reference entities are reused, not recreated
    assert_eq!(harness.references.operators().len(), 1);
}

#[tokio::test]
async fn test_unresolved_region_uses_default_timezone() {
    let harness = Harness::new();
    let file = write_csv(&[(
        plan_message_at("600001", "6000N06000E", "6001N06001E"),
        DEP.to_string(),
        ARR.to_string(),
    )]);

    let summary = harness
        .pipeline(test_config())
        .ingest_file(file.path())
        .await
        .unwrap();
    assert_eq!(summary.created, 1);

    let plan = &harness.flights.plans()[0];
    assert_eq!(plan.departure_region_id, None);
    assert_eq!(plan.destination_region_id, None);
    // Asia/Yekaterinburg is UTC+5
    assert_eq!(plan.planned_departure_time, time(12, 5));
}

#[tokio::test]
async fn test_arrival_uses_destination_region_timezone() {
    let primorye = primorye_region();
    let harness = Harness::with_far_east(&primorye);
    let file = write_csv(&[(
        plan_message_at("140001", "5525N03716E", "4330N13200E"),
        DEP.to_string(),
        ARR.to_string(),
    )]);

    harness
        .pipeline(test_config())
        .ingest_file(file.path())
        .await
        .unwrap();

    let plan = &harness.flights.plans()[0];
    assert_eq!(plan.departure_region_id, Some(harness.region.id));
    assert_eq!(plan.destination_region_id, Some(primorye.id));
    assert_eq!(plan.planned_departure_time, time(10, 5));

    let actual = &harness.flights.actuals()[0];
    // 07:05 UTC in Moscow, 08:50 UTC in Vladivostok
    assert_eq!(actual.actual_departure_time, Some(time(10, 5)));
    assert_eq!(actual.actual_arrival_time, Some(time(18, 50)));
    assert_eq!(actual.actual_duration_minutes, Some(105));
}

#[tokio::test]
async fn test_actual_duration_over_a_day_is_dropped() {
    let harness = Harness::new();
    let file = write_csv(&[(
        plan_message("700001"),
        "-TITLE IDEP -ADD 250124 -ATD 0600".to_string(),
        "-TITLE IARR -ADA 250125 -ATA 1200".to_string(),
    )]);

    harness
        .pipeline(test_config())
        .ingest_file(file.path())
        .await
        .unwrap();

    let actual = &harness.flights.actuals()[0];
    assert_eq!(actual.actual_duration_minutes, None);
    assert_eq!(actual.flight_status, "completed");
    // No -ADEPZ/-ADARRZ, so the plan's points are used
    let latitude = actual.actual_departure_latitude.unwrap();
    assert!((latitude - 55.4167).abs() < 1e-3);
    assert!(actual.actual_arrival_latitude.is_some());
}

#[tokio::test]
async fn test_streaming_mode_catches_duplicates_across_windows() {
    let harness = Harness::new();
    let mut rows: Vec<_> = (1..=8).map(|i| full_row(&format!("80000{}", i))).collect();
    rows.push(full_row("800001"));
    let file = write_csv(&rows);

    let config = uas_ingest::IngestConfig {
        streaming_threshold: 5,
        stream_window: 3,
        ..test_config()
    };
    let summary = harness.pipeline(config).ingest_file(file.path()).await.unwrap();

    assert_eq!(summary.mode, ProcessingMode::Streaming);
    assert_eq!(summary.total_rows, 9);
    assert_eq!(summary.processed, 9);
    assert_eq!(summary.created, 8);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.actual_flights_created, 8);
    assert_eq!(harness.flights.plans().len(), 8);
}

#[tokio::test]
async fn test_failed_sub_batch_is_counted_as_lost() {
    let harness = Harness::new();
    harness.flights.poison("900004");
    let rows: Vec<_> = (1..=6).map(|i| full_row(&format!("90000{}", i))).collect();
    let file = write_csv(&rows);

    let config = uas_ingest::IngestConfig {
        super_batch_size: 10,
        fallback_batch_size: 2,
        ..test_config()
    };
    let summary = harness.pipeline(config).ingest_file(file.path()).await.unwrap();

    assert_eq!(summary.processed, 6);
    assert_eq!(summary.created, 4);
    assert_eq!(summary.lost, 2);
    assert_eq!(summary.error_count, 1);
    assert!(summary.error_messages[0].starts_with("Rows 4-5: failed to save"));
    // One super-batch attempt plus three sub-batches
    assert_eq!(harness.flights.insert_calls(), 4);
    let mut sids: Vec<String> = harness.flights.plans().into_iter().map(|p| p.sid).collect();
    sids.sort();
    assert_eq!(sids, vec!["900001", "900002", "900005", "900006"]);
}

#[tokio::test]
async fn test_durability_relaxed_and_restored() {
    let harness = Harness::new();
    let file = write_csv(&[full_row("110001")]);
    harness
        .pipeline(test_config())
        .ingest_file(file.path())
        .await
        .unwrap();
    assert_eq!(
        harness.flights.durability_changes(),
        vec![DurabilityMode::Relaxed, DurabilityMode::Standard]
    );

    let harness = Harness::new();
    let config = uas_ingest::IngestConfig {
        relaxed_durability: false,
        ..test_config()
    };
    harness.pipeline(config).ingest_file(file.path()).await.unwrap();
    assert!(harness.flights.durability_changes().is_empty());
}

#[tokio::test]
async fn test_durability_restored_when_run_fails() {
    let harness = Harness::new();
    harness.references.fail_loads();
    let file = write_csv(&[full_row("120001")]);

    let err = harness
        .pipeline(test_config())
        .ingest_file(file.path())
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("reference tables unavailable"));
    assert_eq!(
        harness.flights.durability_changes(),
        vec![DurabilityMode::Relaxed, DurabilityMode::Standard]
    );
    assert!(harness.flights.plans().is_empty());
}

#[tokio::test]
async fn test_unreadable_file_fails_whole_run() {
    let harness = Harness::new();
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(b"SHR,DEP\n\"SHR-1\",\"-TITLE\"\n").unwrap();

    let err = harness
        .pipeline(test_config())
        .ingest_file(file.path())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Column 'ARR' not found"));
    assert!(harness.flights.durability_changes().is_empty());

    let text = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    assert!(
        harness
            .pipeline(test_config())
            .ingest_file(text.path())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_custom_column_names() {
    let harness = Harness::new();
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    {
        let mut writer = csv::Writer::from_writer(file.as_file_mut());
        writer.write_record(["id", "Plan", "Departure", "Arrival"]).unwrap();
        let (plan, dep, arr) = full_row("130001");
        writer
            .write_record(["1", plan.as_str(), dep.as_str(), arr.as_str()])
            .unwrap();
        writer.flush().unwrap();
    }

    let mut config = test_config();
    config.columns.plan = "plan".to_string();
    config.columns.departure = "departure".to_string();
    config.columns.arrival = "arrival".to_string();

    let summary = harness.pipeline(config).ingest_file(file.path()).await.unwrap();
    assert_eq!(summary.created, 1);
}

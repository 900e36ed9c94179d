use occupancy_flow::assets::{FloorMapping, ReferenceTables};
use occupancy_flow::error::AppError;
use occupancy_flow::estimation::movement::MovementTable;
use occupancy_flow::pipeline::working_set::WorkingSet;
use occupancy_flow::pipeline::{PipelineParams, RawRow, RefinedRecord, refine_batch, run_batch};
use occupancy_flow::spatial::{FloorPlan, NO_ROOM, RoomPolygon};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

const MAP_GROUND: &str = "map-ground";
const MAP_FIRST: &str = "map-first";

fn tables() -> Result<ReferenceTables, Box<dyn std::error::Error>> {
    let floor_mapping = FloorMapping::from_pairs([(MAP_GROUND, 10), (MAP_FIRST, 11)])
        .map_err(|floor| format!("duplicate floor {floor}"))?;
    let mut floor_plan = FloorPlan::new();
    floor_plan.insert_floor(
        10,
        vec![
            RoomPolygon::new("kitchen", &[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]),
            RoomPolygon::new("hall", &[[40.0, 0.0], [60.0, 0.0], [60.0, 10.0], [40.0, 10.0]]),
        ],
    );
    floor_plan.insert_floor(
        11,
        vec![RoomPolygon::new(
            "office",
            &[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
        )],
    );
    Ok(ReferenceTables {
        floor_mapping,
        movement_table: MovementTable::default(),
        floor_plan,
    })
}

fn fix(mac: &str, map_id: &str, timestamp: i64, x: f64, y: f64) -> RawRow {
    RawRow {
        timestamp,
        mac: mac.to_string(),
        map_id: map_id.to_string(),
        x,
        y,
        rssi: -50.0,
    }
}

fn temp_path(label: &str) -> Result<PathBuf, std::time::SystemTimeError> {
    let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    Ok(std::env::temp_dir().join(format!("occupancy-it-{label}-{unique}.json")))
}

#[test]
fn empty_batch_emits_nothing_and_prunes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let tables = tables()?;
    let mut working_set = WorkingSet::new();
    working_set
        .device_mut("old")
        .add_observation(1.0, 1.0, -60.0, 0, 10);

    let output = refine_batch(&[], &mut working_set, false, &tables, &PipelineParams::default());

    assert!(output.records.is_empty());
    assert_eq!(output.reference, None);
    assert_eq!(output.evicted, 0);
    assert!(working_set.contains("old"));
    Ok(())
}

#[test]
fn unmapped_rows_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let tables = tables()?;
    let mut working_set = WorkingSet::new();
    let rows = [
        fix("a", "map-unknown", 0, 5.0, 5.0),
        fix("a", MAP_GROUND, 10, 5.0, 5.0),
        fix("a", MAP_GROUND, 20, 5.0, 5.0),
    ];

    let output = refine_batch(&rows, &mut working_set, true, &tables, &PipelineParams::default());

    assert_eq!(output.skipped_rows, 1);
    assert_eq!(working_set.get("a").map(|d| d.len()), Some(2));
    assert_eq!(output.records.len(), 1);
    assert_eq!(output.records[0].room_id, "kitchen");
    Ok(())
}

#[test]
fn inactive_device_is_retained_without_a_record() -> Result<(), Box<dyn std::error::Error>> {
    let tables = tables()?;
    let mut working_set = WorkingSet::new();

    let first = refine_batch(
        &[fix("a", MAP_GROUND, 0, 5.0, 5.0)],
        &mut working_set,
        true,
        &tables,
        &PipelineParams::default(),
    );
    assert!(first.records.is_empty());
    assert_eq!(first.inactive_devices, 1);
    assert!(working_set.contains("a"));

    let second = refine_batch(
        &[fix("a", MAP_GROUND, 60, 5.0, 5.0)],
        &mut working_set,
        false,
        &tables,
        &PipelineParams::default(),
    );
    assert_eq!(second.records.len(), 1);
    assert_eq!(second.records[0].timestamp, 60);
    Ok(())
}

#[test]
fn floor_change_suppresses_record_until_settled() -> Result<(), Box<dyn std::error::Error>> {
    let tables = tables()?;
    let mut working_set = WorkingSet::new();
    let params = PipelineParams::default();

    let rows = [
        fix("a", MAP_GROUND, 0, 5.0, 5.0),
        fix("a", MAP_GROUND, 60, 5.0, 5.0),
        fix("a", MAP_FIRST, 120, 5.0, 5.0),
    ];
    let changing = refine_batch(&rows, &mut working_set, true, &tables, &params);
    assert!(changing.records.is_empty());

    let settled = refine_batch(
        &[fix("a", MAP_FIRST, 180, 5.0, 5.0)],
        &mut working_set,
        false,
        &tables,
        &params,
    );
    assert_eq!(settled.records.len(), 1);
    assert_eq!(settled.records[0].floor_id, 11);
    assert_eq!(settled.records[0].room_id, "office");
    Ok(())
}

#[test]
fn device_moving_between_rooms_follows_latest_cluster() -> Result<(), Box<dyn std::error::Error>> {
    let tables = tables()?;
    let mut working_set = WorkingSet::new();
    let params = PipelineParams::default();

    let settle: Vec<RawRow> = (0..5).map(|i| fix("a", MAP_GROUND, i * 30, 5.0, 5.0)).collect();
    let before = refine_batch(&settle, &mut working_set, true, &tables, &params);
    assert_eq!(before.records[0].room_id, "kitchen");

    let moved: Vec<RawRow> = (0..3)
        .map(|i| fix("a", MAP_GROUND, 300 + i * 30, 50.0, 5.0))
        .collect();
    let after = refine_batch(&moved, &mut working_set, false, &tables, &params);

    assert_eq!(after.records.len(), 1);
    assert_eq!(after.records[0].room_id, "hall");
    assert!((after.records[0].x - 50.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn evicted_device_restarts_with_fresh_history() -> Result<(), Box<dyn std::error::Error>> {
    let tables = tables()?;
    let mut working_set = WorkingSet::new();
    let params = PipelineParams::default();

    refine_batch(
        &[fix("gone", MAP_GROUND, 0, 5.0, 5.0), fix("gone", MAP_GROUND, 10, 5.0, 5.0)],
        &mut working_set,
        true,
        &tables,
        &params,
    );
    let later = refine_batch(
        &[fix("other", MAP_GROUND, 2000, 5.0, 5.0)],
        &mut working_set,
        false,
        &tables,
        &params,
    );
    assert_eq!(later.evicted, 1);
    assert!(!working_set.contains("gone"));

    let back = refine_batch(
        &[fix("gone", MAP_GROUND, 2100, 5.0, 5.0)],
        &mut working_set,
        false,
        &tables,
        &params,
    );
    assert_eq!(working_set.get("gone").map(|d| d.len()), Some(1));
    assert!(back.records.is_empty());
    Ok(())
}

#[test]
fn run_batch_persists_snapshot_between_batches() -> Result<(), Box<dyn std::error::Error>> {
    let tables = tables()?;
    let params = PipelineParams::default();
    let snapshot = temp_path("snapshot")?;
    let mut sink: Vec<RefinedRecord> = Vec::new();

    let first = run_batch(
        &[fix("a", MAP_GROUND, 0, 50.0, 5.0), fix("b", MAP_GROUND, 10, 30.0, 5.0)],
        true,
        &tables,
        &params,
        &snapshot,
        &mut sink,
    );
    let second = run_batch(
        &[fix("a", MAP_GROUND, 60, 50.0, 5.0), fix("b", MAP_GROUND, 70, 30.0, 5.0)],
        false,
        &tables,
        &params,
        &snapshot,
        &mut sink,
    );
    let reloaded = WorkingSet::load(&snapshot);
    let _ = std::fs::remove_file(&snapshot);

    assert!(first?.records.is_empty());
    assert_eq!(second?.records.len(), 2);
    let rooms: Vec<(&str, &str)> = sink
        .iter()
        .map(|record| (record.mac.as_str(), record.room_id.as_str()))
        .collect();
    assert_eq!(rooms, vec![("a", "hall"), ("b", NO_ROOM)]);
    assert_eq!(reloaded?.get("a").map(|d| d.len()), Some(2));
    Ok(())
}

#[test]
fn run_batch_requires_snapshot_after_first_batch() -> Result<(), Box<dyn std::error::Error>> {
    let tables = tables()?;
    let snapshot = temp_path("absent")?;
    let mut sink: Vec<RefinedRecord> = Vec::new();

    let result = run_batch(
        &[fix("a", MAP_GROUND, 0, 5.0, 5.0)],
        false,
        &tables,
        &PipelineParams::default(),
        &snapshot,
        &mut sink,
    );

    assert!(matches!(result, Err(AppError::MissingSnapshot(_))));
    assert!(sink.is_empty());
    Ok(())
}

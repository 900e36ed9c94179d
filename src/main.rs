use occupancy_flow::assets::ReferenceTables;
use occupancy_flow::config;
use occupancy_flow::occupancy::{SiteMetadata, aggregate_occupancy};
use occupancy_flow::pipeline::batch::{read_rows, split_into_batches};
use occupancy_flow::pipeline::sink::{JsonLinesSink, write_json_lines};
use occupancy_flow::pipeline::{RefinedRecord, run_batch};
use occupancy_flow::spatial::density::{DEFAULT_CELLS_PER_UNIT, DensityGrid};
use std::collections::BTreeSet;
use tracing::Level;

fn init_tracing(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let config = config::load_from_path(&config_path)?;
    init_tracing(&config.logging.level);
    tracing::info!(app = %config.app.name, config_path = %config_path, "occupancy-flow starting");

    let tables = ReferenceTables::load(&config.assets).inspect_err(|err| {
        tracing::error!(path = %err.path().display(), error = %err, "Failed to load reference assets");
    })?;
    let params = config.pipeline_params();

    let rows = read_rows(&config.storage.input)?;
    let batches = split_into_batches(rows, config.batch_gap_secs());
    tracing::info!(
        input = %config.storage.input.display(),
        batches = batches.len(),
        "Replaying recorded fixes"
    );

    let mut sink = JsonLinesSink::new(&config.storage.refined_output);
    let reset = config.reset_working_set();
    if reset {
        sink.truncate()?;
    }

    let mut refined: Vec<RefinedRecord> = Vec::new();
    let mut latest: Vec<RefinedRecord> = Vec::new();
    for (index, batch) in batches.iter().enumerate() {
        let output = run_batch(
            batch,
            index == 0 && reset,
            &tables,
            &params,
            &config.storage.working_set,
            &mut sink,
        )?;
        latest.clone_from(&output.records);
        refined.extend(output.records);
    }

    let floors: BTreeSet<_> = latest.iter().map(|record| record.floor_id).collect();
    for floor_id in floors {
        let Some(grid) =
            DensityGrid::for_floor(&tables.floor_plan, floor_id, &latest, DEFAULT_CELLS_PER_UNIT)
        else {
            continue;
        };
        let occupied = grid.values().iter().filter(|value| **value > 0.0).count();
        tracing::info!(
            floor_id,
            map_id = tables.floor_mapping.map_id(floor_id).unwrap_or_default(),
            columns = grid.columns,
            rows = grid.rows,
            occupied_cells = occupied,
            "Density grid for latest batch"
        );
    }

    if let Some((metadata_path, output_path)) = config.occupancy_paths() {
        let metadata = SiteMetadata::load(metadata_path)?;
        let occupancy = aggregate_occupancy(&refined, &metadata)?;
        write_json_lines(output_path, &occupancy, false)?;
        tracing::info!(
            rows = occupancy.len(),
            path = %output_path.display(),
            "Occupancy written"
        );
    }

    tracing::info!(records = refined.len(), "occupancy-flow finished");
    Ok(())
}

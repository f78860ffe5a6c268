mod common;

use approx::assert_relative_eq;
use common::{
    band, column_by_receiver, init_logging, input, point_source, random_receivers, receiver, receiver_ids,
    FlatAttenuation,
};
use noise_map_core::output::Value;
use noise_map_core::propagation::PathVisitor;
use noise_map_core::scene::SceneReceiver;
use noise_map_core::{
    ExportRaysMode, MemoryResultStore, NoiseMapRunner, PathFinder, PeriodSelection, RunConfig,
    Scene, TimePeriod,
};

fn all_periods() -> PeriodSelection {
    PeriodSelection {
        day: true,
        evening: true,
        night: true,
        den: true,
    }
}

#[test]
fn test_every_receiver_processed_once() {
    init_logging();
    // 300 receivers over 3 km with a 200 m propagation distance span many cells
    let receivers = random_receivers(300, 3000.0, 42);
    let bands = vec![band(500), band(1000)];
    let sources = vec![
        point_source(1, 500.0, 500.0, 95.0, &bands),
        point_source(2, 1500.0, 2200.0, 95.0, &bands),
        point_source(3, 2900.0, 100.0, 95.0, &bands),
    ];
    let config = RunConfig {
        frequency_bands: bands.clone(),
        periods: all_periods(),
        max_propagation_distance: 200.0,
        max_reflection_distance: 50.0,
        thread_count: 4,
        ..RunConfig::default()
    };
    let results = MemoryResultStore::new();
    let summary = NoiseMapRunner::new(config)
        .run(&input(receivers, sources), Box::new(results.clone()))
        .unwrap();

    assert_eq!(summary.grid_dim, 8);
    assert!(summary.cells_processed > 1 && summary.cells_processed <= 64);
    assert_eq!(summary.receivers_processed, 300);
    assert_eq!(summary.rows_written, 1200);

    let expected: Vec<i64> = (1..=300).collect();
    for table in ["LDAY_RESULT", "LEVENING_RESULT", "LNIGHT_RESULT", "LDEN_RESULT"] {
        assert_eq!(receiver_ids(&results, table), expected, "{table}");
        assert!(results.table(table).unwrap().keyed, "{table} has no primary key");
    }
    assert!(results.is_finished());
}

#[test]
fn test_lden_of_equal_period_levels() {
    // 60 dB in every period: Lden = 10·log10((12 + 4·10^0.5 + 8·10) / 24) + 60
    let bands = vec![band(1000)];
    let config = RunConfig {
        frequency_bands: bands.clone(),
        periods: all_periods(),
        ..RunConfig::default()
    };
    let results = MemoryResultStore::new();
    NoiseMapRunner::new(config)
        .with_attenuation(Box::new(FlatAttenuation(0.0)))
        .run(
            &input(vec![receiver(1, 10.0, 0.0)], vec![point_source(1, 0.0, 0.0, 60.0, &bands)]),
            Box::new(results.clone()),
        )
        .unwrap();

    for table in ["LDAY_RESULT", "LEVENING_RESULT", "LNIGHT_RESULT"] {
        assert_relative_eq!(column_by_receiver(&results, table, "HZ1000")[&1], 60.0, epsilon = 1e-9);
    }
    let lden = column_by_receiver(&results, "LDEN_RESULT", "HZ1000")[&1];
    assert_relative_eq!(lden, 66.3952, epsilon = 1e-3);
    let laeq = column_by_receiver(&results, "LDEN_RESULT", "LAEQ")[&1];
    assert_relative_eq!(laeq, lden, epsilon = 1e-9);
}

#[test]
fn test_receiver_out_of_range_gets_floor() {
    let bands = vec![band(500), band(1000)];
    let config = RunConfig {
        frequency_bands: bands.clone(),
        max_propagation_distance: 100.0,
        max_reflection_distance: 50.0,
        level_floor_db: -80.0,
        ..RunConfig::default()
    };
    let results = MemoryResultStore::new();
    NoiseMapRunner::new(config)
        .run(
            &input(
                vec![receiver(1, 20.0, 0.0), receiver(2, 900.0, 900.0)],
                vec![point_source(1, 0.0, 0.0, 90.0, &bands)],
            ),
            Box::new(results.clone()),
        )
        .unwrap();

    let laeq = column_by_receiver(&results, "LDEN_RESULT", "LAEQ");
    assert!(laeq[&1] > 0.0);
    assert_eq!(laeq[&2], -80.0);
    assert_eq!(column_by_receiver(&results, "LDEN_RESULT", "HZ500")[&2], -80.0);
    assert_eq!(column_by_receiver(&results, "LDEN_RESULT", "LEQ")[&2], -80.0);
}

#[test]
fn test_per_source_records() {
    let bands = vec![band(1000)];
    let config = RunConfig {
        frequency_bands: bands.clone(),
        merge_sources: false,
        max_propagation_distance: 200.0,
        max_reflection_distance: 50.0,
        ..RunConfig::default()
    };
    let results = MemoryResultStore::new();
    let summary = NoiseMapRunner::new(config)
        .run(
            &input(
                vec![receiver(1, 0.0, 0.0), receiver(2, 1000.0, 1000.0)],
                vec![
                    point_source(7, 30.0, 0.0, 80.0, &bands),
                    point_source(3, -30.0, 0.0, 80.0, &bands),
                ],
            ),
            Box::new(results.clone()),
        )
        .unwrap();

    let table = results.table("LDEN_RESULT").unwrap();
    let rows: Vec<(Value, Value)> = table
        .column("IDRECEIVER")
        .into_iter()
        .zip(table.column("IDSOURCE"))
        .collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(summary.rows_written, 3);
    assert!(rows.contains(&(Value::BigInt(1), Value::BigInt(3))));
    assert!(rows.contains(&(Value::BigInt(1), Value::BigInt(7))));
    // no source in range: a single floor record
    assert!(rows.contains(&(Value::BigInt(2), Value::Null)));
    assert!(table.keyed);
}

#[test]
fn test_runs_are_repeatable() {
    let bands = vec![band(250), band(2000)];
    let receivers = random_receivers(80, 1200.0, 7);
    let sources = vec![
        point_source(1, 300.0, 300.0, 85.0, &bands),
        point_source(2, 900.0, 700.0, 92.0, &bands),
    ];
    let run = || {
        let config = RunConfig {
            frequency_bands: bands.clone(),
            periods: all_periods(),
            max_propagation_distance: 300.0,
            thread_count: 3,
            ..RunConfig::default()
        };
        let results = MemoryResultStore::new();
        NoiseMapRunner::new(config)
            .run(&input(receivers.clone(), sources.clone()), Box::new(results.clone()))
            .unwrap();
        let mut rows: Vec<String> = results
            .table("LDEN_RESULT")
            .unwrap()
            .rows
            .iter()
            .map(|row| row.iter().map(Value::sql_literal).collect::<Vec<_>>().join(", "))
            .collect();
        rows.sort();
        rows
    };
    let first = run();
    assert_eq!(first.len(), 80);
    assert_eq!(first, run());
}

#[test]
fn test_rays_kept_in_memory() {
    let bands = vec![band(1000)];
    let store = input(
        vec![receiver(1, 0.0, 0.0)],
        vec![
            point_source(1, 10.0, 0.0, 80.0, &bands),
            point_source(2, 0.0, 10.0, 80.0, &bands),
        ],
    );
    let run = |cap: u64| {
        let config = RunConfig {
            frequency_bands: bands.clone(),
            export_rays: ExportRaysMode::ToMemory,
            maximum_rays_output_count: cap,
            ..RunConfig::default()
        };
        NoiseMapRunner::new(config)
            .run(&store, Box::new(MemoryResultStore::new()))
            .unwrap()
            .rays
    };

    // Lden needs the three periods: one ray per path and period
    let rays = run(0);
    assert_eq!(rays.len(), 6);
    for period in TimePeriod::ALL {
        assert_eq!(rays.iter().filter(|ray| ray.period == Some(period)).count(), 2);
    }
    assert!(rays.iter().all(|ray| ray.attenuation.len() == 1));
    assert_eq!(run(4).len(), 4);
}

#[test]
fn test_rays_written_to_table() {
    let bands = vec![band(1000)];
    let config = RunConfig {
        frequency_bands: bands.clone(),
        periods: PeriodSelection {
            day: true,
            evening: false,
            night: false,
            den: false,
        },
        export_rays: ExportRaysMode::ToTable,
        ..RunConfig::default()
    };
    let results = MemoryResultStore::new();
    NoiseMapRunner::new(config)
        .run(
            &input(
                vec![receiver(1, 0.0, 0.0), receiver(2, 50.0, 0.0)],
                vec![point_source(5, 20.0, 0.0, 80.0, &bands)],
            ),
            Box::new(results.clone()),
        )
        .unwrap();

    let rays = results.table("RAYS").unwrap();
    assert_eq!(rays.rows.len(), 2);
    assert!(rays.column("PERIOD").iter().all(|p| *p == Value::Text("D".to_string())));
    assert!(rays.column("IDSOURCE").iter().all(|id| *id == Value::BigInt(5)));
    assert_eq!(receiver_ids(&results, "LDAY_RESULT"), vec![1, 2]);
}

/// Finds nothing, every receiver ends at the floor.
struct Deaf;

impl PathFinder for Deaf {
    fn find_paths(&self, _: &Scene, _: &SceneReceiver, _: &mut dyn PathVisitor) {}
}

#[test]
fn test_custom_path_finder() {
    let bands = vec![band(1000)];
    let results = MemoryResultStore::new();
    NoiseMapRunner::new(RunConfig {
        frequency_bands: bands.clone(),
        ..RunConfig::default()
    })
    .with_path_finder(Box::new(Deaf))
    .run(
        &input(vec![receiver(1, 5.0, 0.0)], vec![point_source(1, 0.0, 0.0, 90.0, &bands)]),
        Box::new(results.clone()),
    )
    .unwrap();
    assert_eq!(column_by_receiver(&results, "LDEN_RESULT", "LAEQ")[&1], -99.0);
}

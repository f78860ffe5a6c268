mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use common::{band, init_logging, input, point_source, random_receivers, receiver_ids};
use noise_map_core::config::OutputSeries;
use noise_map_core::error::PersistenceError;
use noise_map_core::output::{ResultWriter, Row, TableSpec};
use noise_map_core::{
    MemoryResultStore, NoiseMapError, NoiseMapRunner, PeriodSelection, ProgressTracker,
    ReceiverLevelRecord, ResultStore, RunConfig, RunContext,
};

fn config() -> RunConfig {
    RunConfig {
        frequency_bands: vec![band(500), band(1000)],
        periods: PeriodSelection {
            day: true,
            evening: true,
            night: true,
            den: true,
        },
        max_propagation_distance: 200.0,
        max_reflection_distance: 50.0,
        thread_count: 4,
        ..RunConfig::default()
    }
}

fn scene() -> noise_map_core::MemoryInputStore {
    let bands = vec![band(500), band(1000)];
    input(
        random_receivers(150, 800.0, 11),
        vec![point_source(1, 400.0, 400.0, 90.0, &bands)],
    )
}

#[test]
fn test_slow_store_receives_every_record() {
    // A queue of 4 and batches of 3 against a store sleeping on every insert
    let config = RunConfig {
        output_maximum_queue: 4,
        writer_batch_size: 3,
        backpressure_poll_ms: 1,
        writer_idle_sleep_ms: 1,
        ..config()
    };
    let results = MemoryResultStore::new().with_insert_delay(Duration::from_millis(1));
    let summary = NoiseMapRunner::new(config)
        .run(&scene(), Box::new(results.clone()))
        .unwrap();

    assert_eq!(summary.rows_written, 600);
    let expected: Vec<i64> = (1..=150).collect();
    for table in ["LDAY_RESULT", "LEVENING_RESULT", "LNIGHT_RESULT", "LDEN_RESULT"] {
        assert_eq!(receiver_ids(&results, table), expected);
        let stored = results.table(table).unwrap();
        assert!(stored.batch_sizes.iter().all(|&size| (1..=3).contains(&size)));
        assert!(stored.keyed);
    }
}

#[test]
fn test_store_failure_aborts_run() {
    init_logging();
    let config = RunConfig {
        output_maximum_queue: 8,
        writer_batch_size: 2,
        ..config()
    };
    let results = MemoryResultStore::new().with_failure_after(1);
    let result = NoiseMapRunner::new(config).run(&scene(), Box::new(results.clone()));

    assert!(matches!(
        result,
        Err(NoiseMapError::Persistence(PersistenceError::Rejected(_)))
    ));
    for table in results.table_names() {
        assert!(!results.table(&table).unwrap().keyed, "{table} keyed after failure");
    }
}

#[test]
fn test_canceled_run_leaves_tables_unkeyed() {
    let progress = ProgressTracker::root(1);
    progress.cancel();
    let results = MemoryResultStore::new();
    let result = NoiseMapRunner::new(config()).run_with_progress(
        &scene(),
        Box::new(results.clone()),
        &progress,
    );

    assert!(matches!(result, Err(NoiseMapError::Aborted)));
    assert!(results.is_finished());
    let lden = results.table("LDEN_RESULT").unwrap();
    assert!(lden.rows.is_empty());
    assert!(!lden.keyed);
}

#[test]
fn test_existing_tables_kept_without_drop() {
    let results = MemoryResultStore::new();
    NoiseMapRunner::new(config())
        .run(&scene(), Box::new(results.clone()))
        .unwrap();

    // second run over the same store must not overwrite the tables
    let config = RunConfig {
        drop_existing_tables: false,
        ..config()
    };
    let result = NoiseMapRunner::new(config).run(&scene(), Box::new(results.clone()));
    assert!(matches!(
        result,
        Err(NoiseMapError::Persistence(PersistenceError::TableExists(_)))
    ));
    assert_eq!(receiver_ids(&results, "LDEN_RESULT").len(), 150);
}

/// Memory store whose inserts panic.
struct PanickingStore(MemoryResultStore);

impl ResultStore for PanickingStore {
    fn drop_table(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        self.0.drop_table(table)
    }

    fn create_table(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        self.0.create_table(table)
    }

    fn insert_batch(&mut self, _: &TableSpec, _: &[Row]) -> Result<(), PersistenceError> {
        panic!("store went away");
    }

    fn commit(&mut self) -> Result<(), PersistenceError> {
        self.0.commit()
    }

    fn apply_key(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        self.0.apply_key(table)
    }
}

#[test]
fn test_store_panic_fails_run() {
    init_logging();
    let results = MemoryResultStore::new();
    let store = PanickingStore(results.clone());
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let config = RunConfig {
            output_maximum_queue: 4,
            writer_batch_size: 2,
            backpressure_poll_ms: 1,
            ..config()
        };
        let _ = done_tx.send(NoiseMapRunner::new(config).run(&scene(), Box::new(store)));
    });

    let result = done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("run still blocked after the writer panicked");
    assert!(matches!(
        result,
        Err(NoiseMapError::Persistence(PersistenceError::Rejected(_)))
    ));
    for table in results.table_names() {
        assert!(!results.table(&table).unwrap().keyed, "{table} keyed after panic");
    }
}

fn level(id: i64) -> ReceiverLevelRecord {
    ReceiverLevelRecord {
        receiver_id: id,
        source_id: None,
        position: None,
        levels: vec![50.0, 48.0],
        laeq: 52.0,
        leq: 53.0,
    }
}

#[test]
fn test_queue_size_bounded_under_load() {
    let config = RunConfig {
        output_maximum_queue: 16,
        writer_batch_size: 5,
        backpressure_poll_ms: 1,
        writer_idle_sleep_ms: 1,
        ..config()
    };
    let bound = config.output_maximum_queue + config.writer_batch_size;
    let context = Arc::new(RunContext::new(config));
    let results = MemoryResultStore::new().with_insert_delay(Duration::from_millis(2));
    let writer = ResultWriter::start(Box::new(results.clone()), Arc::clone(&context)).unwrap();

    let finished = Arc::new(AtomicBool::new(false));
    let sampler = {
        let context = Arc::clone(&context);
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            let mut highest = 0;
            while !finished.load(Ordering::SeqCst) {
                highest = highest.max(context.queue_size());
                thread::sleep(Duration::from_micros(200));
            }
            highest
        })
    };

    let producers: Vec<_> = (0..4)
        .map(|worker| {
            let context = Arc::clone(&context);
            thread::spawn(move || {
                let progress = ProgressTracker::root(1);
                for k in 0..50 {
                    let id = worker * 1000 + k;
                    for series in OutputSeries::LEVELS {
                        assert!(context.queue().push_level(series, level(id), &progress));
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    finished.store(true, Ordering::SeqCst);
    let highest = sampler.join().unwrap();

    let report = writer.stop().unwrap();
    assert_eq!(report.rows_written, 800);
    assert!(highest <= bound, "queue reached {highest}, bound is {bound}");
    // producers outpace the store, so the channel filled up at some point
    assert!(highest >= 16);
    assert_eq!(context.queue_size(), 0);
}

fn stored_rows(results: &MemoryResultStore) -> usize {
    results
        .table_names()
        .iter()
        .map(|name| results.table(name).map_or(0, |table| table.rows.len()))
        .sum()
}

#[test]
fn test_cancel_mid_run_stops_writer() {
    let config = RunConfig {
        output_maximum_queue: 4,
        writer_batch_size: 2,
        backpressure_poll_ms: 1,
        writer_idle_sleep_ms: 1,
        ..config()
    };
    let results = MemoryResultStore::new().with_insert_delay(Duration::from_millis(2));
    let progress = ProgressTracker::root(1);

    // cancel once the first rows have landed
    let canceller = {
        let results = results.clone();
        let progress = progress.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(30);
            while stored_rows(&results) == 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            progress.cancel();
            Instant::now()
        })
    };
    let result = NoiseMapRunner::new(config).run_with_progress(
        &scene(),
        Box::new(results.clone()),
        &progress,
    );
    let returned = Instant::now();
    let canceled_at = canceller.join().unwrap();

    assert!(matches!(result, Err(NoiseMapError::Aborted)));
    assert!(returned.duration_since(canceled_at) < Duration::from_secs(5));
    let rows = stored_rows(&results);
    assert!(rows > 0 && rows < 600, "{rows} rows stored");
    for table in results.table_names() {
        assert!(!results.table(&table).unwrap().keyed, "{table} keyed after cancel");
    }
    assert!(results.is_finished());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(stored_rows(&results), rows);
}

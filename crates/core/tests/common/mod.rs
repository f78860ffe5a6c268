//! Scene builders shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use noise_map_core::output::Value;
use noise_map_core::store::{ReceiverRecord, SourceRecord, TableSchema};
use noise_map_core::{
    AttenuationModel, Coordinate3, FrequencyBand, MemoryInputStore, MemoryResultStore,
    PeriodSettings, PropagationPath, SourceGeometry,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Route run logs to the test output. Safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Same attenuation on every band regardless of the path.
pub struct FlatAttenuation(pub f64);

impl AttenuationModel for FlatAttenuation {
    fn attenuation(
        &self,
        _: &PropagationPath,
        _: &PeriodSettings,
        bands: &[FrequencyBand],
    ) -> Vec<f64> {
        vec![self.0; bands.len()]
    }
}

pub fn band(nominal: u32) -> FrequencyBand {
    FrequencyBand::from_nominal(nominal).unwrap()
}

/// Point source with the same level on every band and period.
pub fn point_source(id: i64, x: f64, y: f64, level: f64, bands: &[FrequencyBand]) -> SourceRecord {
    let mut fields = BTreeMap::new();
    for band in bands {
        for period in ['D', 'E', 'N'] {
            fields.insert(format!("LW{period}{}", band.nominal), level);
        }
    }
    SourceRecord {
        id,
        geometry: SourceGeometry::Point(Coordinate3::new(x, y, 0.5)),
        fields,
    }
}

pub fn receiver(id: i64, x: f64, y: f64) -> ReceiverRecord {
    ReceiverRecord {
        id,
        position: Coordinate3::new(x, y, 4.0),
    }
}

/// `count` receivers spread at random over a `size` × `size` square.
pub fn random_receivers(count: i64, size: f64, seed: u64) -> Vec<ReceiverRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (1..=count)
        .map(|id| receiver(id, rng.random_range(0.0..size), rng.random_range(0.0..size)))
        .collect()
}

pub fn input(receivers: Vec<ReceiverRecord>, sources: Vec<SourceRecord>) -> MemoryInputStore {
    MemoryInputStore::new()
        .with_receivers(TableSchema::keyed("RECEIVERS"), receivers)
        .with_sources(TableSchema::keyed("SOURCES"), sources)
}

/// Receiver ids of `table`, sorted.
pub fn receiver_ids(results: &MemoryResultStore, table: &str) -> Vec<i64> {
    let mut ids: Vec<i64> = results
        .table(table)
        .unwrap()
        .column("IDRECEIVER")
        .into_iter()
        .map(|value| match value {
            Value::BigInt(id) => id,
            other => panic!("unexpected receiver id {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    ids
}

/// Real values of `column` in `table`, keyed by receiver id.
pub fn column_by_receiver(results: &MemoryResultStore, table: &str, column: &str) -> BTreeMap<i64, f64> {
    let table = results.table(table).unwrap();
    table
        .column("IDRECEIVER")
        .into_iter()
        .zip(table.column(column))
        .map(|(id, value)| match (id, value) {
            (Value::BigInt(id), Value::Real(value)) => (id, value),
            other => panic!("unexpected row {other:?}"),
        })
        .collect()
}

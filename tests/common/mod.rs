//! Shared fixtures: a synthetic store over a small crustal grid.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use gfstore::{
    ComponentKind, ComponentScheme, Dimension, FreezePolicy, Record, Store, StoreConfig,
};

pub const KM: f64 = 1000.0;

/// Receiver at the surface, sources 10-20 km deep, distances 0-20 km.
pub fn crustal_config(scheme: ComponentScheme) -> StoreConfig {
    StoreConfig::new(
        "synthetic_crust",
        scheme,
        0.25,
        Dimension::fixed(0.0, 1.0 * KM),
        Dimension::new(10.0 * KM, 20.0 * KM, 1.0 * KM),
        Dimension::new(0.0, 20.0 * KM, 2.5 * KM),
    )
    .with_earthmodel("flat two-layer crust")
    .with_modelling_code("synthetic")
}

/// Deterministic record for slot `irecord`; onsets and lengths vary per slot.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn synthetic_record(irecord: u64, kind: ComponentKind) -> Record {
    let seed = irecord as f32;
    match kind {
        ComponentKind::Static => Record::static_value((seed * 0.37).sin() * 1.0e-3),
        ComponentKind::Waveform => {
            let itmin = (irecord % 7) as i32 - 2;
            let nsamples = 6 + (irecord % 5) as usize;
            let samples = (0..nsamples)
                .map(|k| ((seed * 0.37 + k as f32 * 0.9).sin() + 0.1 * k as f32) * 1.0e-3)
                .collect();
            Record::waveform(itmin, samples)
        }
    }
}

/// Creates and populates an editable store; every slot for which `keep`
/// returns true gets its synthetic record.
pub fn populate_store(dir: &Path, scheme: ComponentScheme, keep: impl Fn(u64) -> bool) -> Store {
    let mut extra = BTreeMap::new();
    extra.insert(
        "provenance".to_string(),
        serde_json::json!({ "generator": "tests/common", "seed": 37 }),
    );
    let mut store = Store::create(dir, crustal_config(scheme), &extra).unwrap();
    let ncomponents = scheme.ncomponents() as u64;
    for irecord in 0..store.grid().nrecords() {
        if keep(irecord) {
            let kind = scheme.component_kind((irecord % ncomponents) as usize);
            store.put(irecord, &synthetic_record(irecord, kind)).unwrap();
        }
    }
    store
}

/// A complete, frozen store.
pub fn frozen_store(dir: &Path, scheme: ComponentScheme) -> Store {
    let mut store = populate_store(dir, scheme, |_| true);
    store.freeze(FreezePolicy::RequireComplete).unwrap();
    store
}

/// Small deterministic generator for test geometry.
pub struct Lcg(u64);

impl Lcg {
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Uniform value in `[0, 1)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

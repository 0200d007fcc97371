//! Per-cycle metric snapshots.
//!
//! A cycle fills a fresh [`SnapshotBuilder`] from its own observations only,
//! then hands the finished [`MetricSnapshot`] to a [`SnapshotPublisher`],
//! which swaps it in whole. Readers clone the published `Arc` under a brief
//! read lock and never see a half-written cycle. Entities that disappeared
//! since the last cycle simply are not in the new snapshot.

use crate::family::{FamilySpec, MetricKind};
use exporter_core::{CycleContext, ExporterError, Result};
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOp {
    Set,
    Add,
}

/// One value for one series of a declared family.
#[derive(Debug, Clone)]
pub struct Observation {
    pub family: &'static FamilySpec,
    pub labels: Vec<String>,
    pub value: f64,
    pub op: ObservationOp,
}

impl Observation {
    pub fn set(family: &'static FamilySpec, labels: &[&str], value: f64) -> Self {
        Self {
            family,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            value,
            op: ObservationOp::Set,
        }
    }

    pub fn add(family: &'static FamilySpec, labels: &[&str], value: f64) -> Self {
        Self {
            op: ObservationOp::Add,
            ..Self::set(family, labels, value)
        }
    }
}

#[derive(Debug, Clone)]
struct FamilySeries {
    spec: &'static FamilySpec,
    series: BTreeMap<Vec<String>, f64>,
}

impl FamilySeries {
    fn new(spec: &'static FamilySpec) -> Self {
        Self {
            spec,
            series: BTreeMap::new(),
        }
    }

    fn apply(&mut self, labels: Vec<String>, value: f64, op: ObservationOp) {
        match op {
            ObservationOp::Set => {
                self.series.insert(labels, value);
            }
            ObservationOp::Add => {
                *self.series.entry(labels).or_insert(0.0) += value;
            }
        }
    }

    fn to_metric_family(&self) -> MetricFamily {
        let mut family = MetricFamily::default();
        family.set_name(self.spec.name.to_string());
        family.set_help(self.spec.help.to_string());
        family.set_field_type(match self.spec.kind {
            MetricKind::Gauge => MetricType::GAUGE,
            MetricKind::Counter => MetricType::COUNTER,
        });

        for (values, value) in &self.series {
            let mut metric = proto::Metric::default();
            for (name, value) in self.spec.labels.iter().zip(values) {
                let mut pair = proto::LabelPair::default();
                pair.set_name(name.to_string());
                pair.set_value(value.clone());
                metric.mut_label().push(pair);
            }

            match self.spec.kind {
                MetricKind::Gauge => {
                    let mut gauge = proto::Gauge::default();
                    gauge.set_value(*value);
                    metric.set_gauge(gauge);
                }
                MetricKind::Counter => {
                    let mut counter = proto::Counter::default();
                    counter.set_value(*value);
                    metric.set_counter(counter);
                }
            }

            family.mut_metric().push(metric);
        }

        family
    }
}

/// Immutable result of one collection cycle.
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshot {
    families: BTreeMap<&'static str, FamilySeries>,
    cycle_id: Option<String>,
}

impl MetricSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn cycle_id(&self) -> Option<&str> {
        self.cycle_id.as_deref()
    }

    /// Value of the series with exactly these label values.
    pub fn get(&self, family: &str, labels: &[&str]) -> Option<f64> {
        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        self.families.get(family)?.series.get(&key).copied()
    }

    /// All series of a family as `(label values, value)`.
    pub fn series(&self, family: &str) -> Vec<(Vec<String>, f64)> {
        self.families
            .get(family)
            .map(|f| f.series.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    pub fn family_names(&self) -> Vec<&'static str> {
        self.families
            .iter()
            .filter(|(_, f)| !f.series.is_empty())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Total number of series across families.
    pub fn len(&self) -> usize {
        self.families.values().map(|f| f.series.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any series of any family carries `value` for `label`.
    pub fn has_label_value(&self, label: &str, value: &str) -> bool {
        self.families.values().any(|family| {
            family
                .spec
                .labels
                .iter()
                .position(|l| *l == label)
                .is_some_and(|idx| family.series.keys().any(|k| k[idx] == value))
        })
    }

    pub fn to_metric_families(&self) -> Vec<MetricFamily> {
        self.families
            .values()
            .filter(|f| !f.series.is_empty())
            .map(FamilySeries::to_metric_family)
            .collect()
    }
}

/// Accumulates one cycle's observations. Shared by the fan-out tasks of the
/// cycle; every call takes the lock once and releases it before returning.
pub struct SnapshotBuilder {
    declared: Vec<&'static FamilySpec>,
    cycle_id: Option<String>,
    families: Mutex<BTreeMap<&'static str, FamilySeries>>,
}

impl SnapshotBuilder {
    pub fn new(declared: &[&'static FamilySpec]) -> Self {
        Self {
            declared: declared.to_vec(),
            cycle_id: None,
            families: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn for_cycle(declared: &[&'static FamilySpec], cycle: &CycleContext) -> Self {
        Self {
            cycle_id: Some(cycle.id().to_string()),
            ..Self::new(declared)
        }
    }

    fn check(&self, family: &'static FamilySpec, label_count: usize) -> Result<()> {
        if !self.declared.iter().any(|d| d.name == family.name) {
            return Err(ExporterError::InvalidObservation {
                family: family.name.to_string(),
                reason: "family is not declared for this snapshot".to_string(),
            });
        }
        if label_count != family.labels.len() {
            return Err(ExporterError::InvalidObservation {
                family: family.name.to_string(),
                reason: format!(
                    "expected {} label values, got {}",
                    family.labels.len(),
                    label_count
                ),
            });
        }
        Ok(())
    }

    fn check_enumerated(&self, family: &'static FamilySpec, entity_count: usize) -> Result<()> {
        if !family.is_enumerated() {
            return Err(ExporterError::InvalidObservation {
                family: family.name.to_string(),
                reason: "family has no enumerated state label".to_string(),
            });
        }
        self.check(family, entity_count + 1)
    }

    fn with_families<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<&'static str, FamilySeries>) -> R,
    ) -> R {
        let mut families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut families)
    }

    pub fn record(&self, observation: Observation) -> Result<()> {
        self.check(observation.family, observation.labels.len())?;
        let Observation {
            family,
            labels,
            value,
            op,
        } = observation;

        self.with_families(|families| {
            families
                .entry(family.name)
                .or_insert_with(|| FamilySeries::new(family))
                .apply(labels, value, op);
        });
        Ok(())
    }

    pub fn set(&self, family: &'static FamilySpec, labels: &[&str], value: f64) -> Result<()> {
        self.record(Observation::set(family, labels, value))
    }

    pub fn add(&self, family: &'static FamilySpec, labels: &[&str], value: f64) -> Result<()> {
        self.record(Observation::add(family, labels, value))
    }

    /// Writes 0 for every declared state of the entity.
    pub fn zero_states(&self, family: &'static FamilySpec, entity: &[&str]) -> Result<()> {
        self.check_enumerated(family, entity.len())?;
        self.with_families(|families| {
            let series = families
                .entry(family.name)
                .or_insert_with(|| FamilySeries::new(family));
            for state in family.states {
                series.apply(state_key(entity, state), 0.0, ObservationOp::Set);
            }
        });
        Ok(())
    }

    /// One-hot state: every declared state 0, `state` 1, in one critical
    /// section. Undeclared states are still recorded.
    pub fn set_state(&self, family: &'static FamilySpec, entity: &[&str], state: &str) -> Result<()> {
        self.check_enumerated(family, entity.len())?;
        let state = family.canonical_state(state);
        if !family.states.contains(&state) {
            debug!(
                family = family.name,
                state, "Observed a state outside the declared set"
            );
        }

        self.with_families(|families| {
            let series = families
                .entry(family.name)
                .or_insert_with(|| FamilySeries::new(family));
            for declared in family.states {
                series.apply(state_key(entity, declared), 0.0, ObservationOp::Set);
            }
            series.apply(state_key(entity, state), 1.0, ObservationOp::Set);
        });
        Ok(())
    }

    /// Adds one to the entity's count for `state`.
    pub fn count_state(&self, family: &'static FamilySpec, entity: &[&str], state: &str) -> Result<()> {
        self.check_enumerated(family, entity.len())?;
        let state = family.canonical_state(state);
        self.with_families(|families| {
            families
                .entry(family.name)
                .or_insert_with(|| FamilySeries::new(family))
                .apply(state_key(entity, state), 1.0, ObservationOp::Add);
        });
        Ok(())
    }

    /// Logs and drops a rejected observation; the cycle carries on.
    pub fn record_or_warn(&self, observation: Observation) {
        if let Err(e) = self.record(observation) {
            warn!("Dropping observation: {}", e);
        }
    }

    /// Takes everything recorded so far, leaving the builder empty.
    pub fn finish(&self) -> MetricSnapshot {
        let families = self.with_families(std::mem::take);
        MetricSnapshot {
            families,
            cycle_id: self.cycle_id.clone(),
        }
    }
}

fn state_key(entity: &[&str], state: &str) -> Vec<String> {
    entity
        .iter()
        .map(|l| l.to_string())
        .chain(std::iter::once(state.to_string()))
        .collect()
}

/// Holds the snapshot currently exposed for one updater.
pub struct SnapshotPublisher {
    name: String,
    families: Vec<&'static FamilySpec>,
    current: RwLock<Arc<MetricSnapshot>>,
    generation: AtomicU64,
}

impl SnapshotPublisher {
    pub fn new(name: impl Into<String>, families: &[&'static FamilySpec]) -> Self {
        Self {
            name: name.into(),
            families: families.to_vec(),
            current: RwLock::new(Arc::new(MetricSnapshot::empty())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn families(&self) -> &[&'static FamilySpec] {
        &self.families
    }

    /// Fresh, empty builder for the declared families.
    pub fn builder(&self, cycle: &CycleContext) -> SnapshotBuilder {
        SnapshotBuilder::for_cycle(&self.families, cycle)
    }

    /// Replaces the exposed snapshot. The previous one is dropped once the
    /// last reader releases it.
    pub fn publish(&self, snapshot: MetricSnapshot) -> u64 {
        let series = snapshot.len();
        let snapshot = Arc::new(snapshot);
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *current = snapshot;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            publisher = %self.name,
            generation, series, "Published metric snapshot"
        );
        generation
    }

    pub fn current(&self) -> Arc<MetricSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of snapshots published so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Exposes a publisher's current snapshot to a prometheus registry.
pub struct SnapshotCollector {
    publisher: Arc<SnapshotPublisher>,
    descs: Vec<Desc>,
}

impl SnapshotCollector {
    pub fn new(publisher: Arc<SnapshotPublisher>) -> Result<Self> {
        let descs = publisher
            .families()
            .iter()
            .map(|f| f.desc())
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self { publisher, descs })
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.publisher.current().to_metric_families()
    }
}

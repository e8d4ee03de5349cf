//! Pipeline stage base: ports, caching, request/report protocol.
//!
//! Stages form a DAG driven from the sink. Metadata flows down
//! (reports), selection flows up (requests), datasets flow down
//! again (execute). Each stage owns strong references to its
//! upstream producers and weak back-references to its consumers, so
//! ownership points strictly downstream and modified-state can still
//! propagate toward the sinks.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, Weak};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use cf_common::{BinaryStream, CfError, CfResult, DatasetRef, Metadata};

/// Default capacity of the per-stage dataset cache.
const DEFAULT_DATASET_CACHE: usize = 32;

/// A pipeline stage.
///
/// `report` describes what the stage can produce, `request` rewrites
/// an incoming request into one request per input port, and `execute`
/// produces the dataset for a request. Implementations keep their
/// engine state in a [`StageCore`] and mark themselves modified from
/// every property setter.
pub trait Stage: Send + Sync {
    /// Engine state accessor.
    fn core(&self) -> &StageCore;

    /// Produce the report for an output port given the upstream
    /// reports, one per input port.
    fn report(&self, port: usize, input_reports: &[Metadata]) -> CfResult<Metadata> {
        let _ = port;
        Ok(input_reports.first().cloned().unwrap_or_default())
    }

    /// Rewrite `request` into one upstream request per input port.
    /// Ordering is meaningful.
    fn request(
        &self,
        port: usize,
        input_reports: &[Metadata],
        request: &Metadata,
    ) -> CfResult<Vec<Metadata>> {
        let _ = (port, input_reports);
        Ok(vec![request.clone(); self.core().input_count()])
    }

    /// Produce the dataset for `request` from the upstream datasets,
    /// one per input port.
    fn execute(
        &self,
        port: usize,
        inputs: &[DatasetRef],
        request: &Metadata,
    ) -> CfResult<DatasetRef>;
}

/// Dataset-cache counters for one stage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CoreState {
    inputs: Vec<Option<(Arc<dyn Stage>, usize)>>,
    downstream: Vec<Weak<dyn Stage>>,
    reports: HashMap<usize, Metadata>,
    datasets: LruCache<u64, DatasetRef>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Per-stage engine state: connections, caches, modified protocol.
pub struct StageCore {
    name: String,
    state: Mutex<CoreState>,
}

impl StageCore {
    /// Create engine state for a stage with `n_inputs` input ports.
    pub fn new(name: &str, n_inputs: usize) -> Self {
        Self::with_cache_size(name, n_inputs, DEFAULT_DATASET_CACHE)
    }

    /// Create engine state with an explicit dataset-cache bound.
    pub fn with_cache_size(name: &str, n_inputs: usize, cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size.max(1)).expect("cache size is at least 1");
        Self {
            name: name.to_string(),
            state: Mutex::new(CoreState {
                inputs: (0..n_inputs).map(|_| None).collect(),
                downstream: Vec::new(),
                reports: HashMap::new(),
                datasets: LruCache::new(cap),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// The stage name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of input ports.
    pub fn input_count(&self) -> usize {
        self.lock().inputs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_input(
        &self,
        port: usize,
        producer: Arc<dyn Stage>,
        producer_port: usize,
    ) -> CfResult<()> {
        let mut state = self.lock();
        let slot = state.inputs.get_mut(port).ok_or_else(|| {
            CfError::Config(format!(
                "stage \"{}\" has no input port {}",
                self.name, port
            ))
        })?;
        *slot = Some((producer, producer_port));
        Ok(())
    }

    fn add_downstream(&self, consumer: Weak<dyn Stage>) {
        self.lock().downstream.push(consumer);
    }

    /// All upstream connections; every input port must be connected.
    pub fn connections(&self) -> CfResult<Vec<(Arc<dyn Stage>, usize)>> {
        let state = self.lock();
        state
            .inputs
            .iter()
            .enumerate()
            .map(|(port, conn)| {
                conn.clone().ok_or_else(|| {
                    CfError::Config(format!(
                        "stage \"{}\" input port {} is not connected",
                        self.name, port
                    ))
                })
            })
            .collect()
    }

    /// Clear this stage's caches and propagate downstream. Called by
    /// every property setter so stale results are never served.
    pub fn set_modified(&self) {
        let consumers = {
            let mut state = self.lock();
            state.reports.clear();
            state.datasets.clear();
            state.downstream.clone()
        };
        for consumer in consumers {
            if let Some(consumer) = consumer.upgrade() {
                consumer.core().set_modified();
            }
        }
    }

    pub(crate) fn cached_report(&self, port: usize) -> Option<Metadata> {
        self.lock().reports.get(&port).cloned()
    }

    pub(crate) fn cache_report(&self, port: usize, report: Metadata) {
        self.lock().reports.insert(port, report);
    }

    pub(crate) fn cached_dataset(&self, key: u64) -> Option<DatasetRef> {
        let mut state = self.lock();
        match state.datasets.get(&key).cloned() {
            Some(dataset) => {
                state.hits += 1;
                Some(dataset)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub(crate) fn cache_dataset(&self, key: u64, dataset: DatasetRef) {
        let mut state = self.lock();
        // push hands back the entry it displaced; a different key
        // means the bounded cache evicted its least recent dataset
        if let Some((displaced, _)) = state.datasets.push(key, dataset) {
            if displaced != key {
                state.evictions += 1;
            }
        }
    }

    /// Dataset-cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

/// Connect `producer`'s output port to `consumer`'s input port.
pub fn connect(
    consumer: &Arc<dyn Stage>,
    input_port: usize,
    producer: &Arc<dyn Stage>,
    producer_port: usize,
) -> CfResult<()> {
    consumer
        .core()
        .set_input(input_port, Arc::clone(producer), producer_port)?;
    producer.core().add_downstream(Arc::downgrade(consumer));
    // a rewired graph invalidates anything cached at or below the consumer
    consumer.core().set_modified();
    Ok(())
}

/// Route a request-chain failure to the log at the severity its
/// class calls for: soft errors (skipped work, the chain continues)
/// warn, everything else is an error.
pub fn log_request_error(rank: usize, time_step: u64, context: &str, err: &CfError) {
    if err.is_soft() {
        warn!(rank, time_step, error = %err, "{}", context);
    } else {
        error!(rank, time_step, error = %err, "{}", context);
    }
}

/// Deterministic digest of a request for the dataset cache, taken
/// over the ordered metadata serialization and the port.
fn request_digest(request: &Metadata, port: usize) -> u64 {
    let mut stream = BinaryStream::new();
    stream.write_metadata(request);
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    stream.as_slice().hash(&mut hasher);
    port.hash(&mut hasher);
    hasher.finish()
}

/// Collect the report for `port`, recursing upstream first. Reports
/// are cached in the producing stage until it is modified.
pub fn output_metadata(stage: &Arc<dyn Stage>, port: usize) -> CfResult<Metadata> {
    if let Some(report) = stage.core().cached_report(port) {
        return Ok(report);
    }

    let connections = stage.core().connections()?;
    let mut input_reports = Vec::with_capacity(connections.len());
    for (producer, producer_port) in &connections {
        input_reports.push(output_metadata(producer, *producer_port)?);
    }

    let report = stage.report(port, &input_reports)?;
    if report.is_empty() {
        return Err(CfError::Config(format!(
            "stage \"{}\" produced an empty report",
            stage.core().name()
        )));
    }

    stage.core().cache_report(port, report.clone());
    Ok(report)
}

/// Drive `stage` to produce the dataset answering `request`,
/// recursively satisfying its upstream ports first. A cache hit
/// short-circuits the whole upstream chain.
pub fn update(stage: &Arc<dyn Stage>, port: usize, request: &Metadata) -> CfResult<DatasetRef> {
    let key = request_digest(request, port);
    if let Some(dataset) = stage.core().cached_dataset(key) {
        debug!(stage = stage.core().name(), port, "dataset cache hit");
        return Ok(dataset);
    }

    let connections = stage.core().connections()?;
    let mut input_reports = Vec::with_capacity(connections.len());
    for (producer, producer_port) in &connections {
        input_reports.push(output_metadata(producer, *producer_port)?);
    }

    let upstream_requests = stage.request(port, &input_reports, request)?;
    if upstream_requests.len() != connections.len() {
        return Err(CfError::Contract(format!(
            "stage \"{}\" returned {} upstream requests for {} input ports",
            stage.core().name(),
            upstream_requests.len(),
            connections.len()
        )));
    }

    let mut inputs = Vec::with_capacity(connections.len());
    for ((producer, producer_port), upstream_request) in
        connections.iter().zip(&upstream_requests)
    {
        inputs.push(update(producer, *producer_port, upstream_request)?);
    }

    let dataset = stage.execute(port, &inputs, request)?;
    stage.core().cache_dataset(key, dataset.clone());
    Ok(dataset)
}

//! Default pipeline driver.
//!
//! Asks the sink for its report, partitions the time steps across
//! ranks, and issues one update per local step. Failed steps are
//! logged and skipped; the rest of the run continues.

use std::sync::Arc;

use tracing::debug;

use cf_common::{CfError, CfResult, DatasetRef, Extent, Metadata};

use crate::algorithm::{log_request_error, output_metadata, update, Stage};
use crate::comm::{partition_steps, Communicator, SoloComm};

/// Drives a sink stage over the time steps assigned to this rank.
pub struct Executive {
    comm: Arc<dyn Communicator>,
    extent: Option<Extent>,
    arrays: Vec<String>,
    time_steps: Option<Vec<u64>>,
}

/// Outcome of an executive run on this rank.
pub struct RunSummary {
    /// Datasets produced, paired with their time step.
    pub datasets: Vec<(u64, DatasetRef)>,
    /// Time steps whose request chain failed.
    pub failed_steps: Vec<u64>,
}

impl Default for Executive {
    fn default() -> Self {
        Self::new()
    }
}

impl Executive {
    /// Single-process executive.
    pub fn new() -> Self {
        Self::with_comm(Arc::new(SoloComm))
    }

    /// Executive over an explicit process group.
    pub fn with_comm(comm: Arc<dyn Communicator>) -> Self {
        Self {
            comm,
            extent: None,
            arrays: Vec::new(),
            time_steps: None,
        }
    }

    /// Restrict every request to this extent.
    pub fn set_extent(&mut self, extent: Extent) {
        self.extent = Some(extent);
    }

    /// Request these arrays at every step.
    pub fn set_arrays<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) {
        self.arrays = names.into_iter().map(Into::into).collect();
    }

    /// Drive an explicit list of time indices instead of all steps
    /// named by the report.
    pub fn set_time_steps(&mut self, steps: Vec<u64>) {
        self.time_steps = Some(steps);
    }

    /// Run the pipeline below `sink` for this rank's share of the
    /// time steps.
    pub fn run(&self, sink: &Arc<dyn Stage>) -> CfResult<RunSummary> {
        let report = output_metadata(sink, 0)?;

        let steps = match &self.time_steps {
            Some(steps) => steps.clone(),
            None => {
                let n = report
                    .get_scalar::<u64>("number_of_time_steps")
                    .ok_or_else(|| {
                        CfError::Config(
                            "sink report is missing \"number_of_time_steps\"".to_string(),
                        )
                    })?;
                (0..n).collect()
            }
        };

        let rank = self.comm.rank();
        let local = partition_steps(&steps, rank, self.comm.size());
        debug!(rank, local_steps = local.len(), total_steps = steps.len(), "starting run");

        let mut datasets = Vec::with_capacity(local.len());
        let mut failed_steps = Vec::new();
        for step in local {
            let mut request = Metadata::new();
            request.insert("time_step", step);
            if let Some(extent) = &self.extent {
                extent.to_metadata(&mut request, "extent");
            }
            if !self.arrays.is_empty() {
                request.insert("arrays", self.arrays.clone());
            }

            match update(sink, 0, &request) {
                Ok(dataset) => datasets.push((step, dataset)),
                Err(err) => {
                    log_request_error(rank, step, "time step failed", &err);
                    failed_steps.push(step);
                }
            }
        }

        let stats = sink.core().cache_stats();
        debug!(
            rank,
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            "sink dataset cache"
        );

        Ok(RunSummary {
            datasets,
            failed_steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::StageCore;
    use cf_common::{shared, CartesianMesh, VariantArray};

    /// Source with a fixed number of steps that fails on one of them.
    struct FlakySource {
        core: StageCore,
        bad_step: u64,
    }

    impl Stage for FlakySource {
        fn core(&self) -> &StageCore {
            &self.core
        }

        fn report(&self, _port: usize, _input_reports: &[Metadata]) -> CfResult<Metadata> {
            let mut md = Metadata::new();
            md.insert("number_of_time_steps", 5u64);
            Ok(md)
        }

        fn execute(
            &self,
            _port: usize,
            _inputs: &[DatasetRef],
            request: &Metadata,
        ) -> CfResult<DatasetRef> {
            let step = request.get_scalar::<u64>("time_step").unwrap_or(0);
            if step == self.bad_step {
                return Err(CfError::NetCdf("simulated read failure".to_string()));
            }
            let mut mesh = CartesianMesh::new();
            mesh.set_x_coordinates(shared(VariantArray::from(vec![step as f64])));
            mesh.set_time_step(step);
            Ok(Arc::new(mesh))
        }
    }

    fn flaky_sink(bad_step: u64) -> Arc<dyn Stage> {
        Arc::new(FlakySource {
            core: StageCore::new("flaky_source", 0),
            bad_step,
        })
    }

    #[test]
    fn test_run_covers_all_steps() {
        let sink = flaky_sink(u64::MAX);
        let summary = Executive::new().run(&sink).unwrap();
        let steps: Vec<u64> = summary.datasets.iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 4]);
        assert!(summary.failed_steps.is_empty());
    }

    #[test]
    fn test_failed_step_does_not_abort_the_run() {
        let sink = flaky_sink(2);
        let summary = Executive::new().run(&sink).unwrap();
        let steps: Vec<u64> = summary.datasets.iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![0, 1, 3, 4]);
        assert_eq!(summary.failed_steps, vec![2]);
    }

    #[test]
    fn test_explicit_time_steps() {
        let sink = flaky_sink(u64::MAX);
        let mut executive = Executive::new();
        executive.set_time_steps(vec![4, 1]);
        let summary = executive.run(&sink).unwrap();
        let steps: Vec<u64> = summary.datasets.iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![4, 1]);
    }

    #[test]
    fn test_request_carries_extent_and_arrays() {
        struct RequestInspector {
            core: StageCore,
        }
        impl Stage for RequestInspector {
            fn core(&self) -> &StageCore {
                &self.core
            }
            fn report(&self, _p: usize, _i: &[Metadata]) -> CfResult<Metadata> {
                let mut md = Metadata::new();
                md.insert("number_of_time_steps", 1u64);
                Ok(md)
            }
            fn execute(
                &self,
                _p: usize,
                _i: &[DatasetRef],
                request: &Metadata,
            ) -> CfResult<DatasetRef> {
                assert_eq!(
                    Extent::from_metadata(request, "extent"),
                    Some(Extent([0, 9, 0, 0, 0, 0]))
                );
                assert_eq!(request.get_strings("arrays").unwrap(), vec!["T"]);
                Ok(Arc::new(CartesianMesh::new()))
            }
        }

        let sink: Arc<dyn Stage> = Arc::new(RequestInspector {
            core: StageCore::new("inspector", 0),
        });
        let mut executive = Executive::new();
        executive.set_extent(Extent([0, 9, 0, 0, 0, 0]));
        executive.set_arrays(["T"]);
        executive.run(&sink).unwrap();
    }
}

//! CF NetCDF source stage.
//!
//! A dataset is a directory of NetCDF files sharing one spatial grid,
//! each holding a contiguous block of time steps. The catalog phase
//! enumerates the files, probes the grid once, assembles the global
//! time axis with a pool of I/O workers, and broadcasts the result to
//! the other ranks. The execute phase answers one time-step request
//! at a time by slicing the owning file.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use cf_common::{
    shared, BinaryStream, CartesianMesh, CfError, CfResult, DatasetRef, Extent, Metadata,
    VariantArray,
};
use pipeline_core::{
    log_request_error, root_rank, Communicator, SoloComm, Stage, StageCore, ThreadPool,
};

use crate::file_util::{locate_files, split_selector};
use crate::handle_cache::HandleCache;
use crate::nc::{element_kind, read_all, read_window, trim_text};

/// Reader configuration. Every setter on [`CfReader`] transitions the
/// stage to modified, forcing a re-catalog on the next report.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Directory plus basename regex selecting the file set.
    pub files_regex: String,
    /// Single path, used instead of `files_regex` when non-empty.
    pub file_name: String,
    /// Name of the x axis coordinate variable.
    pub x_axis_variable: String,
    /// Name of the y axis coordinate variable. Empty means a
    /// degenerate length-1 axis.
    pub y_axis_variable: String,
    /// Name of the z axis coordinate variable. Empty means a
    /// degenerate length-1 axis.
    pub z_axis_variable: String,
    /// Name of the time coordinate variable. Empty means one
    /// synthetic step.
    pub t_axis_variable: String,
    /// I/O worker count for catalog assembly. `<= 0` means one per
    /// available processor.
    pub thread_pool_size: i32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            files_regex: String::new(),
            file_name: String::new(),
            x_axis_variable: "lon".to_string(),
            y_axis_variable: "lat".to_string(),
            z_axis_variable: String::new(),
            t_axis_variable: "time".to_string(),
            thread_pool_size: -1,
        }
    }
}

/// Source stage reading CF-convention NetCDF file sets.
pub struct CfReader {
    core: StageCore,
    config: Mutex<ReaderConfig>,
    catalog: Mutex<Option<Metadata>>,
    handles: Arc<HandleCache>,
    comm: Arc<dyn Communicator>,
}

impl Default for CfReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CfReader {
    /// Single-process reader.
    pub fn new() -> Self {
        Self::with_comm(Arc::new(SoloComm))
    }

    /// Reader over an explicit process group. The catalog is built on
    /// the group's root rank and broadcast to the rest.
    pub fn with_comm(comm: Arc<dyn Communicator>) -> Self {
        Self {
            core: StageCore::new("cf_reader", 0),
            config: Mutex::new(ReaderConfig::default()),
            catalog: Mutex::new(None),
            handles: Arc::new(HandleCache::new()),
            comm,
        }
    }

    fn lock_config(&self) -> MutexGuard<'_, ReaderConfig> {
        match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_catalog(&self) -> MutexGuard<'_, Option<Metadata>> {
        match self.catalog.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drop the cached catalog and every open handle, then propagate
    /// modified downstream. Called by every property setter.
    fn set_modified(&self) {
        *self.lock_catalog() = None;
        self.handles.clear();
        self.core.set_modified();
    }

    pub fn set_files_regex(&self, regex: &str) {
        self.lock_config().files_regex = regex.to_string();
        self.set_modified();
    }

    pub fn set_file_name(&self, file_name: &str) {
        self.lock_config().file_name = file_name.to_string();
        self.set_modified();
    }

    pub fn set_x_axis_variable(&self, name: &str) {
        self.lock_config().x_axis_variable = name.to_string();
        self.set_modified();
    }

    pub fn set_y_axis_variable(&self, name: &str) {
        self.lock_config().y_axis_variable = name.to_string();
        self.set_modified();
    }

    pub fn set_z_axis_variable(&self, name: &str) {
        self.lock_config().z_axis_variable = name.to_string();
        self.set_modified();
    }

    pub fn set_t_axis_variable(&self, name: &str) {
        self.lock_config().t_axis_variable = name.to_string();
        self.set_modified();
    }

    pub fn set_thread_pool_size(&self, size: i32) {
        self.lock_config().thread_pool_size = size;
        self.set_modified();
    }

    /// The handle cache, for diagnostics.
    pub fn handle_cache(&self) -> &Arc<HandleCache> {
        &self.handles
    }

    // === catalog phase ===

    /// Probe one coordinate axis: read it in full, or produce a
    /// length-1 zero axis of `fallback` kind when `name` is empty.
    fn probe_axis(
        file: &netcdf::File,
        name: &str,
        fallback: &VariantArray,
    ) -> CfResult<VariantArray> {
        if name.is_empty() {
            let mut axis = VariantArray::new(fallback.kind());
            axis.resize(1);
            return Ok(axis);
        }
        let var = file.variable(name).ok_or_else(|| {
            CfError::Config(format!("axis variable \"{}\" not found", name))
        })?;
        read_all(&var)
    }

    /// Build the catalog on the root rank: enumerate files, probe the
    /// grid, harvest variable attributes, assemble the time axis.
    fn build_catalog(&self) -> CfResult<Metadata> {
        let config = self.lock_config().clone();

        let (root, files) = if !config.file_name.is_empty() {
            let (dir, name) = split_selector(&config.file_name);
            (dir, vec![name])
        } else {
            if config.files_regex.is_empty() {
                return Err(CfError::Config(
                    "neither files_regex nor file_name is set".to_string(),
                ));
            }
            let (dir, pattern) = split_selector(&config.files_regex);
            let files = locate_files(&dir, &pattern)?;
            (dir, files)
        };
        debug!(n_files = files.len(), root = %root.display(), "catalog file set");

        self.handles.initialize(&files);
        let (file, file_lock) = self.handles.get(&root, &files[0])?;

        let mut metadata = Metadata::new();
        let (x_axis, y_axis, z_axis) = {
            let _guard = lock_file(&file_lock);

            let x_axis = Self::probe_axis(&file, &config.x_axis_variable, &VariantArray::F64(Vec::new()))?;
            if x_axis.is_empty() {
                return Err(CfError::Config(format!(
                    "x axis variable \"{}\" is empty",
                    config.x_axis_variable
                )));
            }
            let y_axis = Self::probe_axis(&file, &config.y_axis_variable, &x_axis)?;
            let z_axis = Self::probe_axis(&file, &config.z_axis_variable, &x_axis)?;

            // harvest every array variable and its text attributes
            let mut attributes = Metadata::new();
            let mut variables: Vec<String> = Vec::new();
            let mut time_variables: Vec<String> = Vec::new();
            for (id, var) in file.variables().enumerate() {
                let dims = var.dimensions();
                if dims.is_empty() {
                    continue;
                }
                let name = var.name().to_string();
                let Some(kind) = element_kind(&var.vartype()) else {
                    warn!(variable = %name, "skipping variable with unsupported element type");
                    continue;
                };

                let dim_sizes: Vec<u64> = dims.iter().map(|d| d.len() as u64).collect();
                let dim_names: Vec<String> = dims.iter().map(|d| d.name().to_string()).collect();

                if dim_names.len() == 1 && dim_names[0] == config.t_axis_variable {
                    time_variables.push(name.clone());
                }

                let mut atts = Metadata::new();
                atts.insert("id", id as u64);
                atts.insert("dims", dim_sizes);
                atts.insert("dim_names", dim_names);
                atts.insert("type", kind.type_code() as u64);
                atts.insert("centering", "point");
                for attr in var.attributes() {
                    if let Ok(netcdf::AttrValue::Str(text)) = attr.value() {
                        atts.insert(attr.name(), trim_text(&text));
                    }
                }

                variables.push(name.clone());
                attributes.insert(&name, atts);
            }

            metadata.insert("variables", variables);
            metadata.insert("attributes", attributes);
            metadata.insert("time variables", time_variables);

            (x_axis, y_axis, z_axis)
        };

        // Assemble the global time axis, one read task per file. On
        // parallel file systems opening files and reading the
        // (non-contiguous) unlimited time dimension dominates catalog
        // cost, so the reads run on the worker pool.
        let (t_axis, step_count) = if config.t_axis_variable.is_empty() {
            (VariantArray::from(vec![0.0f64]), vec![1u64])
        } else {
            let mut pool: ThreadPool<(usize, CfResult<VariantArray>)> =
                ThreadPool::new(config.thread_pool_size);
            for (index, file_name) in files.iter().enumerate() {
                let handles = Arc::clone(&self.handles);
                let root = root.clone();
                let file_name = file_name.clone();
                let t_name = config.t_axis_variable.clone();
                pool.push_task(move || {
                    let result = read_time_axis(&handles, &root, &file_name, &t_name);
                    // one-off read: release the handle either way
                    handles.close(&file_name);
                    (index, result)
                });
            }
            let mut results = Vec::new();
            pool.wait_data(&mut results)?;

            // reassemble in ascending file order; completion order is
            // scheduler dependent
            results.sort_by_key(|(index, _)| *index);
            let mut t_axis: Option<VariantArray> = None;
            let mut step_count = Vec::with_capacity(files.len());
            for (index, result) in results {
                let axis = result.map_err(|e| {
                    CfError::NetCdf(format!(
                        "failed to read time axis from \"{}\": {}",
                        files[index], e
                    ))
                })?;
                step_count.push(axis.len() as u64);
                match &mut t_axis {
                    None => t_axis = Some(axis),
                    Some(t) => t.append(&axis)?,
                }
            }
            let t_axis = t_axis
                .ok_or_else(|| CfError::Internal("time axis assembly produced nothing".to_string()))?;
            (t_axis, step_count)
        };

        let mut coordinates = Metadata::new();
        coordinates.insert("x_variable", config.x_axis_variable.as_str());
        coordinates.insert("y_variable", config.y_axis_variable.as_str());
        coordinates.insert("z_variable", config.z_axis_variable.as_str());
        coordinates.insert("t_variable", config.t_axis_variable.as_str());
        coordinates.insert("x", x_axis.clone());
        coordinates.insert("y", y_axis.clone());
        coordinates.insert("z", z_axis.clone());
        coordinates.insert("t", t_axis.clone());

        let whole_extent = Extent::whole(x_axis.len() as u64, y_axis.len() as u64, z_axis.len() as u64);
        whole_extent.to_metadata(&mut metadata, "whole_extent");
        metadata.insert("coordinates", coordinates);
        metadata.insert("files", files.clone());
        metadata.insert("root", root.to_string_lossy().as_ref());
        metadata.insert("step_count", step_count);
        metadata.insert("number_of_time_steps", t_axis.len() as u64);

        Ok(metadata)
    }

    // === execute phase helpers ===

    /// Map a global time step to its owning file and within-file
    /// offset using the step-count prefix sums.
    fn locate_step(step_count: &[u64], time_step: u64) -> (usize, u64) {
        let mut index = 0;
        let mut consumed = 0;
        while index + 1 < step_count.len() && consumed + step_count[index] <= time_step {
            consumed += step_count[index];
            index += 1;
        }
        (index, time_step - consumed)
    }

    /// The `[t, z, y, x]`-prefixed dimension names, starts and counts
    /// for a mesh read at `offs` over `extent`. Axes with empty names
    /// are omitted.
    fn read_window_spec(
        config: &ReaderConfig,
        extent: &Extent,
        offs: u64,
    ) -> (Vec<String>, Vec<usize>, Vec<usize>) {
        let e = extent.0;
        let mut dim_names = Vec::with_capacity(4);
        let mut starts = Vec::with_capacity(4);
        let mut counts = Vec::with_capacity(4);
        if !config.t_axis_variable.is_empty() {
            dim_names.push(config.t_axis_variable.clone());
            starts.push(offs as usize);
            counts.push(1);
        }
        if !config.z_axis_variable.is_empty() {
            dim_names.push(config.z_axis_variable.clone());
            starts.push(e[4] as usize);
            counts.push((e[5] - e[4] + 1) as usize);
        }
        if !config.y_axis_variable.is_empty() {
            dim_names.push(config.y_axis_variable.clone());
            starts.push(e[2] as usize);
            counts.push((e[3] - e[2] + 1) as usize);
        }
        if !config.x_axis_variable.is_empty() {
            dim_names.push(config.x_axis_variable.clone());
            starts.push(e[0] as usize);
            counts.push((e[1] - e[0] + 1) as usize);
        }
        (dim_names, starts, counts)
    }
}

fn lock_file(file_lock: &Arc<Mutex<()>>) -> MutexGuard<'_, ()> {
    match file_lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Worker task: read one file's time axis in full through the shared
/// handle cache.
fn read_time_axis(
    handles: &HandleCache,
    root: &PathBuf,
    file_name: &str,
    t_name: &str,
) -> CfResult<VariantArray> {
    let (file, file_lock) = handles.get(root, file_name)?;
    let _guard = lock_file(&file_lock);
    let var = file.variable(t_name).ok_or_else(|| {
        CfError::Config(format!(
            "time axis variable \"{}\" not found in \"{}\"",
            t_name, file_name
        ))
    })?;
    read_all(&var)
}

impl Stage for CfReader {
    fn core(&self) -> &StageCore {
        &self.core
    }

    /// Catalog on the root rank, broadcast to everyone else. The
    /// result is cached until a property changes.
    fn report(&self, _port: usize, _input_reports: &[Metadata]) -> CfResult<Metadata> {
        if let Some(catalog) = self.lock_catalog().clone() {
            return Ok(catalog);
        }

        let rank = self.comm.rank();
        let root = root_rank(self.comm.as_ref());

        let catalog = if rank == root {
            let catalog = self.build_catalog().map_err(|e| {
                self.handles.clear();
                e
            })?;
            if self.comm.size() > 1 {
                let mut stream = BinaryStream::new();
                catalog.to_stream(&mut stream);
                let mut payload = stream.into_bytes();
                self.comm.broadcast(root, &mut payload)?;
            }
            catalog
        } else {
            let mut payload = Vec::new();
            self.comm.broadcast(root, &mut payload)?;
            let mut stream = BinaryStream::from_bytes(payload);
            let catalog = Metadata::from_stream(&mut stream)?;
            // seed the handle cache; files open lazily on first read
            if let Some(files) = catalog.get_strings("files") {
                self.handles.initialize(&files);
            }
            catalog
        };

        *self.lock_catalog() = Some(catalog.clone());
        Ok(catalog)
    }

    fn execute(
        &self,
        _port: usize,
        _inputs: &[DatasetRef],
        request: &Metadata,
    ) -> CfResult<DatasetRef> {
        let rank = self.comm.rank();
        let catalog = self
            .lock_catalog()
            .clone()
            .ok_or_else(|| CfError::Internal("execute called before the catalog phase".to_string()))?;
        let config = self.lock_config().clone();

        let time_step = request.get_scalar::<u64>("time_step").unwrap_or(0);
        let n_steps = catalog
            .get_scalar::<u64>("number_of_time_steps")
            .ok_or_else(|| CfError::Internal("catalog is missing \"number_of_time_steps\"".to_string()))?;
        if time_step >= n_steps {
            return Err(CfError::Range(format!(
                "rank {}: time_step {} is out of range, the dataset has {} steps",
                rank, time_step, n_steps
            )));
        }

        let coordinates = catalog
            .get_metadata("coordinates")
            .ok_or_else(|| CfError::Internal("catalog is missing \"coordinates\"".to_string()))?;
        let whole_extent = Extent::from_metadata(&catalog, "whole_extent")
            .ok_or_else(|| CfError::Internal("catalog is missing \"whole_extent\"".to_string()))?;

        // absent extent means the whole mesh; a partial one is
        // clamped against it
        let extent = match Extent::from_metadata(request, "extent") {
            Some(requested) => {
                let clamped = requested.clamp_to(&whole_extent);
                if clamped != requested {
                    log_request_error(
                        rank,
                        time_step,
                        "requested extent clamped",
                        &CfError::Range(format!(
                            "extent {:?} is outside the whole extent {:?}, using {:?}",
                            requested.0, whole_extent.0, clamped.0
                        )),
                    );
                }
                clamped
            }
            None => whole_extent,
        };
        extent.validate()?;

        // slice the coordinate axes on the extent
        let e = extent.0;
        let x_in = coordinates
            .get_array("x")
            .ok_or_else(|| CfError::Internal("catalog is missing the x coordinates".to_string()))?;
        let y_in = coordinates
            .get_array("y")
            .ok_or_else(|| CfError::Internal("catalog is missing the y coordinates".to_string()))?;
        let z_in = coordinates
            .get_array("z")
            .ok_or_else(|| CfError::Internal("catalog is missing the z coordinates".to_string()))?;
        let t_in = coordinates
            .get_array("t")
            .ok_or_else(|| CfError::Internal("catalog is missing the t coordinates".to_string()))?;

        let x_out = x_in.new_copy(e[0] as usize, e[1] as usize)?;
        let y_out = y_in.new_copy(e[2] as usize, e[3] as usize)?;
        let z_out = z_in.new_copy(e[4] as usize, e[5] as usize)?;
        let time = t_in.get::<f64>(time_step as usize).unwrap_or(0.0);

        // locate the owning file
        let step_count = catalog
            .get_vec::<u64>("step_count")
            .ok_or_else(|| CfError::Internal("catalog is missing \"step_count\"".to_string()))?;
        let files = catalog
            .get_strings("files")
            .ok_or_else(|| CfError::Internal("catalog is missing \"files\"".to_string()))?;
        let root = PathBuf::from(
            catalog
                .get_string("root")
                .ok_or_else(|| CfError::Internal("catalog is missing \"root\"".to_string()))?,
        );
        let (file_index, offs) = Self::locate_step(&step_count, time_step);
        let file_name = files.get(file_index).ok_or_else(|| {
            CfError::Internal(format!(
                "time step {} maps to file {} but the catalog lists {} files",
                time_step,
                file_index,
                files.len()
            ))
        })?;
        debug!(rank, time_step, file = %file_name, offs, "serving request");

        let (file, file_lock) = self.handles.get(&root, file_name)?;

        let mut mesh = CartesianMesh::new();
        mesh.set_x_coordinates(shared(x_out));
        mesh.set_y_coordinates(shared(y_out));
        mesh.set_z_coordinates(shared(z_out));
        mesh.set_time(time);
        mesh.set_time_step(time_step);
        mesh.set_whole_extent(whole_extent);
        mesh.set_extent(extent);

        let attributes = catalog
            .get_metadata("attributes")
            .ok_or_else(|| CfError::Internal("catalog is missing \"attributes\"".to_string()))?;

        // the time variable's CF attributes ride along on the mesh
        if let Some(time_atts) = attributes.get_metadata(&config.t_axis_variable) {
            if let Some(calendar) = time_atts.get_string("calendar") {
                mesh.set_calendar(calendar);
            }
            if let Some(units) = time_atts.get_string("units") {
                mesh.set_time_units(units);
            }
        }

        let (mesh_dim_names, starts, counts) = Self::read_window_spec(&config, &extent, offs);

        // read the requested arrays; per-array problems are logged
        // and skipped so the remaining arrays still flow
        let array_names = request.get_strings("arrays").unwrap_or_default();
        for name in &array_names {
            let Some(atts) = attributes.get_metadata(name) else {
                log_request_error(
                    rank,
                    time_step,
                    "skipping array",
                    &CfError::Contract(format!("array \"{}\" is not in the catalog", name)),
                );
                continue;
            };
            let dim_names = atts.get_strings("dim_names").unwrap_or_default();
            if dim_names != mesh_dim_names {
                log_request_error(
                    rank,
                    time_step,
                    "skipping array",
                    &CfError::Contract(format!(
                        "\"{}\" with dimensions {:?} is not a mesh variable",
                        name, dim_names
                    )),
                );
                continue;
            }
            let Some(var) = file.variable(name) else {
                log_request_error(
                    rank,
                    time_step,
                    "skipping array",
                    &CfError::Contract(format!(
                        "\"{}\" is not in \"{}\"",
                        name, file_name
                    )),
                );
                continue;
            };

            let array = {
                let _guard = lock_file(&file_lock);
                read_window(&var, &starts, &counts)
            };
            match array {
                Ok(array) => mesh.point_arrays_mut().append(name, shared(array)),
                Err(err) => {
                    self.handles.close(file_name);
                    return Err(CfError::NetCdf(format!(
                        "rank {}: time_step {}: reading \"{}\" from \"{}\" failed: {}",
                        rank, time_step, name, file_name, err
                    )));
                }
            }
        }

        // per-step scalars (anything whose only dimension is time)
        if !config.t_axis_variable.is_empty() {
            let time_variables = catalog.get_strings("time variables").unwrap_or_default();
            for name in &time_variables {
                let Some(var) = file.variable(name) else {
                    log_request_error(
                        rank,
                        time_step,
                        "skipping time variable",
                        &CfError::Contract(format!(
                            "\"{}\" is not in \"{}\"",
                            name, file_name
                        )),
                    );
                    continue;
                };
                let value = {
                    let _guard = lock_file(&file_lock);
                    read_window(&var, &[offs as usize], &[1])
                };
                match value {
                    Ok(value) => mesh.information_arrays_mut().append(name, shared(value)),
                    Err(err) => {
                        self.handles.close(file_name);
                        return Err(CfError::NetCdf(format!(
                            "rank {}: time_step {}: reading \"{}\" from \"{}\" failed: {}",
                            rank, time_step, name, file_name, err
                        )));
                    }
                }
            }
        }

        Ok(Arc::new(mesh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_step() {
        let step_count = [2u64, 2];
        assert_eq!(CfReader::locate_step(&step_count, 0), (0, 0));
        assert_eq!(CfReader::locate_step(&step_count, 1), (0, 1));
        assert_eq!(CfReader::locate_step(&step_count, 2), (1, 0));
        assert_eq!(CfReader::locate_step(&step_count, 3), (1, 1));

        let uneven = [3u64, 1, 4];
        assert_eq!(CfReader::locate_step(&uneven, 2), (0, 2));
        assert_eq!(CfReader::locate_step(&uneven, 3), (1, 0));
        assert_eq!(CfReader::locate_step(&uneven, 4), (2, 0));
        assert_eq!(CfReader::locate_step(&uneven, 7), (2, 3));
    }

    #[test]
    fn test_read_window_spec_omits_empty_axes() {
        let config = ReaderConfig::default();
        let extent = Extent([10, 19, 0, 2, 0, 0]);
        let (dims, starts, counts) = CfReader::read_window_spec(&config, &extent, 5);
        assert_eq!(dims, vec!["time", "lat", "lon"]);
        assert_eq!(starts, vec![5, 0, 10]);
        assert_eq!(counts, vec![1, 3, 10]);

        let mut with_z = ReaderConfig::default();
        with_z.z_axis_variable = "lev".to_string();
        let extent = Extent([0, 9, 0, 4, 0, 1]);
        let (dims, starts, counts) = CfReader::read_window_spec(&with_z, &extent, 0);
        assert_eq!(dims, vec!["time", "lev", "lat", "lon"]);
        assert_eq!(starts, vec![0, 0, 0, 0]);
        assert_eq!(counts, vec![1, 2, 5, 10]);
    }

    #[test]
    fn test_unconfigured_reader_reports_an_error() {
        let reader = CfReader::new();
        assert!(reader.build_catalog().is_err());
    }
}

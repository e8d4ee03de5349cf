//! Integration tests: build small CF corpora on disk, catalog them,
//! and serve time-step requests through the full stage contract.

use std::path::Path;
use std::sync::{Arc, Mutex};

use cf_common::{unshared, BinaryStream, CartesianMesh, CfError, CfResult, DatasetRef, Extent, Metadata};
use cf_reader::testdata::{constant_field, ramp_field, write_cf_file};
use cf_reader::CfReader;
use pipeline_core::{output_metadata, update, Communicator, Executive, Stage};

fn request(step: u64, arrays: &[&str]) -> Metadata {
    let mut md = Metadata::new();
    md.insert("time_step", step);
    if !arrays.is_empty() {
        let names: Vec<String> = arrays.iter().map(|s| s.to_string()).collect();
        md.insert("arrays", names);
    }
    md
}

fn mesh_of(dataset: &DatasetRef) -> &CartesianMesh {
    dataset
        .as_any()
        .downcast_ref::<CartesianMesh>()
        .expect("the reader produces cartesian meshes")
}

fn reader_for_dir(dir: &Path) -> (Arc<CfReader>, Arc<dyn Stage>) {
    let reader = Arc::new(CfReader::new());
    reader.set_files_regex(&format!("{}/.*\\.nc", dir.display()));
    let stage: Arc<dyn Stage> = reader.clone();
    (reader, stage)
}

/// One file, one step: the §single-step corpus with a constant field.
fn write_single_step(dir: &Path) {
    write_cf_file(
        &dir.join("single.nc"),
        &[0.0, 120.0, 240.0],
        &[-90.0, 0.0, 90.0],
        &[7.5],
        &[("T", constant_field(1.0, 1, 3, 3))],
        &[("mask", constant_field(0.0, 1, 3, 3))],
    )
    .expect("Failed to write test file");
}

/// Two files, two steps each, with a ramp field.
fn write_two_files(dir: &Path) {
    write_cf_file(
        &dir.join("part_00.nc"),
        &[0.0, 1.0, 2.0],
        &[10.0, 20.0],
        &[0.0, 1.0],
        &[("T", ramp_field(2, 2, 3))],
        &[],
    )
    .expect("Failed to write first test file");
    write_cf_file(
        &dir.join("part_01.nc"),
        &[0.0, 1.0, 2.0],
        &[10.0, 20.0],
        &[2.0, 3.0],
        &[("T", ramp_field(2, 2, 3))],
        &[],
    )
    .expect("Failed to write second test file");
}

#[test]
fn test_single_file_single_step() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_single_step(dir.path());
    let (_reader, stage) = reader_for_dir(dir.path());

    let report = output_metadata(&stage, 0).unwrap();
    assert_eq!(report.get_scalar::<u64>("number_of_time_steps"), Some(1));
    assert_eq!(report.get_vec::<u64>("step_count").unwrap(), vec![1]);

    let dataset = update(&stage, 0, &request(0, &["T"])).unwrap();
    let mesh = mesh_of(&dataset);

    assert_eq!(
        unshared(mesh.x_coordinates()).to_f64_vec().unwrap(),
        vec![0.0, 120.0, 240.0]
    );
    assert_eq!(
        unshared(mesh.y_coordinates()).to_f64_vec().unwrap(),
        vec![-90.0, 0.0, 90.0]
    );
    assert_eq!(
        unshared(mesh.z_coordinates()).to_f64_vec().unwrap(),
        vec![0.0]
    );

    let t_array = unshared(mesh.point_arrays().get("T").unwrap());
    assert_eq!(t_array.len(), 9);
    assert_eq!(t_array.to_f64_vec().unwrap(), vec![1.0; 9]);

    assert_eq!(mesh.time(), Some(7.5));
    assert_eq!(mesh.time_step(), Some(0));
    assert_eq!(mesh.calendar(), Some("standard"));
    assert_eq!(mesh.time_units(), Some("days since 2000-01-01 00:00:00"));
    assert!(mesh.validate().is_ok());

    // the time axis itself is a per-step scalar
    let info = unshared(mesh.information_arrays().get("time").unwrap());
    assert_eq!(info.to_f64_vec().unwrap(), vec![7.5]);
}

#[test]
fn test_multi_file_concatenation() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_two_files(dir.path());
    let (_reader, stage) = reader_for_dir(dir.path());

    let report = output_metadata(&stage, 0).unwrap();
    assert_eq!(report.get_scalar::<u64>("number_of_time_steps"), Some(4));
    assert_eq!(report.get_vec::<u64>("step_count").unwrap(), vec![2, 2]);
    assert_eq!(
        report.get_strings("files").unwrap(),
        vec!["part_00.nc", "part_01.nc"]
    );

    let coordinates = report.get_metadata("coordinates").unwrap();
    let t_axis = coordinates.get_array("t").unwrap();
    assert_eq!(t_axis.to_f64_vec().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);

    // sum(step_count) covers the whole axis
    let step_count = report.get_vec::<u64>("step_count").unwrap();
    assert_eq!(step_count.iter().sum::<u64>(), t_axis.len() as u64);

    // step 3 lives in the second file at offset 1
    let dataset = update(&stage, 0, &request(3, &["T"])).unwrap();
    let mesh = mesh_of(&dataset);
    assert_eq!(mesh.time(), Some(3.0));
    let t_array = unshared(mesh.point_arrays().get("T").unwrap());
    // ramp value at (t=1, j=0, i=0) within its file
    assert_eq!(t_array.get::<f64>(0), Some(100.0));
}

#[test]
fn test_extent_slicing() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let lon: Vec<f64> = (0..360).map(|i| i as f64).collect();
    write_cf_file(
        &dir.path().join("wide.nc"),
        &lon,
        &[0.0],
        &[0.0],
        &[("T", (0..360).map(|i| i as f64).collect())],
        &[],
    )
    .expect("Failed to write test file");
    let (_reader, stage) = reader_for_dir(dir.path());

    let mut req = request(0, &["T"]);
    Extent([10, 19, 0, 0, 0, 0]).to_metadata(&mut req, "extent");

    let dataset = update(&stage, 0, &req).unwrap();
    let mesh = mesh_of(&dataset);

    let x = unshared(mesh.x_coordinates()).to_f64_vec().unwrap();
    assert_eq!(x, (10..20).map(|i| i as f64).collect::<Vec<_>>());

    let t_array = unshared(mesh.point_arrays().get("T").unwrap());
    assert_eq!(t_array.len(), 10);
    assert_eq!(
        t_array.to_f64_vec().unwrap(),
        (10..20).map(|i| i as f64).collect::<Vec<_>>()
    );

    assert_eq!(mesh.extent(), Some(Extent([10, 19, 0, 0, 0, 0])));
    assert_eq!(mesh.whole_extent(), Some(Extent([0, 359, 0, 0, 0, 0])));
}

#[test]
fn test_degenerate_z_axis() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_single_step(dir.path());
    let (reader, stage) = reader_for_dir(dir.path());
    reader.set_z_axis_variable("");

    let report = output_metadata(&stage, 0).unwrap();
    let coordinates = report.get_metadata("coordinates").unwrap();
    assert_eq!(
        coordinates.get_array("z").unwrap().to_f64_vec().unwrap(),
        vec![0.0]
    );
    assert_eq!(coordinates.get_string("z_variable"), Some(""));
    assert_eq!(coordinates.get_string("y_variable"), Some("lat"));
    assert_eq!(coordinates.get_string("t_variable"), Some("time"));

    // reads omit the z start/count and still succeed
    let dataset = update(&stage, 0, &request(0, &["T"])).unwrap();
    let mesh = mesh_of(&dataset);
    assert_eq!(unshared(mesh.point_arrays().get("T").unwrap()).len(), 9);
}

#[test]
fn test_missing_array_is_skipped() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_single_step(dir.path());
    let (_reader, stage) = reader_for_dir(dir.path());

    let dataset = update(&stage, 0, &request(0, &["does_not_exist"])).unwrap();
    let mesh = mesh_of(&dataset);
    assert!(mesh.point_arrays().is_empty());
}

#[test]
fn test_non_mesh_variable_is_skipped() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_single_step(dir.path());
    let (_reader, stage) = reader_for_dir(dir.path());

    // "mask" exists but its dimensions are (lat, lon), not the mesh
    // prefix (time, lat, lon)
    let dataset = update(&stage, 0, &request(0, &["T", "mask"])).unwrap();
    let mesh = mesh_of(&dataset);
    assert!(mesh.point_arrays().get("T").is_some());
    assert!(mesh.point_arrays().get("mask").is_none());
}

#[test]
fn test_out_of_range_time_step_is_an_error() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_single_step(dir.path());
    let (_reader, stage) = reader_for_dir(dir.path());

    assert!(update(&stage, 0, &request(99, &["T"])).is_err());
}

#[test]
fn test_modified_forces_recatalog() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_two_files(dir.path());
    let (reader, stage) = reader_for_dir(dir.path());

    let report = output_metadata(&stage, 0).unwrap();
    assert_eq!(report.get_scalar::<u64>("number_of_time_steps"), Some(4));

    // changing the time axis must re-probe the files, not serve the
    // cached catalog
    reader.set_t_axis_variable("");
    let report = output_metadata(&stage, 0).unwrap();
    assert_eq!(report.get_scalar::<u64>("number_of_time_steps"), Some(1));
    assert_eq!(report.get_vec::<u64>("step_count").unwrap(), vec![1]);
}

#[test]
fn test_catalog_is_deterministic() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_two_files(dir.path());

    let serialize_report = || {
        let (_reader, stage) = reader_for_dir(dir.path());
        let report = output_metadata(&stage, 0).unwrap();
        let mut stream = BinaryStream::new();
        report.to_stream(&mut stream);
        stream.into_bytes()
    };

    assert_eq!(serialize_report(), serialize_report());
}

#[test]
fn test_file_name_selects_a_single_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_two_files(dir.path());

    let reader = Arc::new(CfReader::new());
    reader.set_file_name(&format!("{}/part_01.nc", dir.path().display()));
    let stage: Arc<dyn Stage> = reader.clone();

    let report = output_metadata(&stage, 0).unwrap();
    assert_eq!(report.get_scalar::<u64>("number_of_time_steps"), Some(2));
    assert_eq!(report.get_strings("files").unwrap(), vec!["part_01.nc"]);
}

#[test]
fn test_executive_drives_every_step() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_two_files(dir.path());
    let (_reader, stage) = reader_for_dir(dir.path());

    let mut executive = Executive::new();
    executive.set_arrays(["T"]);
    let summary = executive.run(&stage).unwrap();

    assert!(summary.failed_steps.is_empty());
    assert_eq!(summary.datasets.len(), 4);
    for (step, dataset) in &summary.datasets {
        let mesh = mesh_of(dataset);
        assert_eq!(mesh.time_step(), Some(*step));
        // the corpus writes time values equal to their global index
        assert_eq!(mesh.time(), Some(*step as f64));
        assert_eq!(unshared(mesh.point_arrays().get("T").unwrap()).len(), 6);
    }
}

/// In-process stand-in for a two-rank group: the root's broadcast
/// payload lands in a shared slot the other rank reads back.
struct LoopbackComm {
    rank: usize,
    size: usize,
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Communicator for LoopbackComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, root: usize, payload: &mut Vec<u8>) -> CfResult<()> {
        let mut slot = self.slot.lock().expect("slot lock");
        if self.rank == root {
            *slot = Some(payload.clone());
        } else {
            *payload = slot
                .clone()
                .ok_or_else(|| CfError::Internal("nothing was broadcast".to_string()))?;
        }
        Ok(())
    }
}

#[test]
fn test_catalog_broadcast_to_non_root_rank() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_two_files(dir.path());
    let regex = format!("{}/.*\\.nc", dir.path().display());
    let slot = Arc::new(Mutex::new(None));

    // rank 1 of 2 is the root: it catalogs the files and broadcasts
    let root_reader = Arc::new(CfReader::with_comm(Arc::new(LoopbackComm {
        rank: 1,
        size: 2,
        slot: Arc::clone(&slot),
    })));
    root_reader.set_files_regex(&regex);
    let root_stage: Arc<dyn Stage> = root_reader.clone();
    let root_report = output_metadata(&root_stage, 0).unwrap();

    // rank 0 receives the catalog without probing any file itself
    let other_reader = Arc::new(CfReader::with_comm(Arc::new(LoopbackComm {
        rank: 0,
        size: 2,
        slot,
    })));
    other_reader.set_files_regex(&regex);
    let other_stage: Arc<dyn Stage> = other_reader.clone();
    let other_report = output_metadata(&other_stage, 0).unwrap();

    assert_eq!(other_report, root_report);
    // the receiving rank seeds its handle cache closed
    assert_eq!(other_reader.handle_cache().open_count(), 0);

    // and serves its own share of the steps from the shared catalog
    let dataset = update(&other_stage, 0, &request(2, &["T"])).unwrap();
    let mesh = mesh_of(&dataset);
    assert_eq!(mesh.time(), Some(2.0));
    assert_eq!(unshared(mesh.point_arrays().get("T").unwrap()).len(), 6);
}

#[test]
fn test_handle_cache_reuses_open_files() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_two_files(dir.path());
    let (reader, stage) = reader_for_dir(dir.path());

    output_metadata(&stage, 0).unwrap();
    update(&stage, 0, &request(0, &["T"])).unwrap();
    update(&stage, 0, &request(1, &["T"])).unwrap();

    // both steps live in the first file: one open serves both reads
    let (hits, _misses) = reader.handle_cache().stats();
    assert!(hits >= 1);
    assert!(reader.handle_cache().open_count() >= 1);
}

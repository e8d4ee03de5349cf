//! Synthetic CF NetCDF corpora for tests.
//!
//! Writes small files with a `(time, lat, lon)` grid using the same
//! library the reader opens them with.

use std::path::Path;

use cf_common::{CfError, CfResult};

fn write_error(context: &str, err: netcdf::error::Error) -> CfError {
    CfError::NetCdf(format!("{}: {}", context, err))
}

/// Write one CF file: `lon`/`lat`/`time` coordinate variables plus
/// `(time, lat, lon)` fields and optional static `(lat, lon)` fields.
/// Each field buffer must hold `time.len() * lat.len() * lon.len()`
/// (or `lat.len() * lon.len()`) values.
pub fn write_cf_file(
    path: &Path,
    lon: &[f64],
    lat: &[f64],
    time: &[f64],
    fields: &[(&str, Vec<f64>)],
    static_fields: &[(&str, Vec<f64>)],
) -> CfResult<()> {
    let mut file =
        netcdf::create(path).map_err(|e| write_error("failed to create test file", e))?;

    file.add_dimension("time", time.len())
        .map_err(|e| write_error("failed to add the time dimension", e))?;
    file.add_dimension("lat", lat.len())
        .map_err(|e| write_error("failed to add the lat dimension", e))?;
    file.add_dimension("lon", lon.len())
        .map_err(|e| write_error("failed to add the lon dimension", e))?;

    let mut var = file
        .add_variable::<f64>("time", &["time"])
        .map_err(|e| write_error("failed to add the time variable", e))?;
    var.put_values(time, ..)
        .map_err(|e| write_error("failed to write the time axis", e))?;
    var.add_attribute("units", "days since 2000-01-01 00:00:00")
        .map_err(|e| write_error("failed to attribute the time axis", e))?;
    var.add_attribute("calendar", "standard")
        .map_err(|e| write_error("failed to attribute the time axis", e))?;

    let mut var = file
        .add_variable::<f64>("lat", &["lat"])
        .map_err(|e| write_error("failed to add the lat variable", e))?;
    var.put_values(lat, ..)
        .map_err(|e| write_error("failed to write the lat axis", e))?;
    var.add_attribute("units", "degrees_north")
        .map_err(|e| write_error("failed to attribute the lat axis", e))?;

    let mut var = file
        .add_variable::<f64>("lon", &["lon"])
        .map_err(|e| write_error("failed to add the lon variable", e))?;
    var.put_values(lon, ..)
        .map_err(|e| write_error("failed to write the lon axis", e))?;
    var.add_attribute("units", "degrees_east")
        .map_err(|e| write_error("failed to attribute the lon axis", e))?;

    for (name, data) in fields {
        let mut var = file
            .add_variable::<f64>(name, &["time", "lat", "lon"])
            .map_err(|e| write_error(&format!("failed to add \"{}\"", name), e))?;
        var.put_values(data, ..)
            .map_err(|e| write_error(&format!("failed to write \"{}\"", name), e))?;
        var.add_attribute("units", "K")
            .map_err(|e| write_error(&format!("failed to attribute \"{}\"", name), e))?;
    }

    for (name, data) in static_fields {
        let mut var = file
            .add_variable::<f64>(name, &["lat", "lon"])
            .map_err(|e| write_error(&format!("failed to add \"{}\"", name), e))?;
        var.put_values(data, ..)
            .map_err(|e| write_error(&format!("failed to write \"{}\"", name), e))?;
    }

    Ok(())
}

/// A field holding `value` at every point of an `n_time * n_lat *
/// n_lon` grid.
pub fn constant_field(value: f64, n_time: usize, n_lat: usize, n_lon: usize) -> Vec<f64> {
    vec![value; n_time * n_lat * n_lon]
}

/// A field whose value at `(t, j, i)` is `100 * t + 10 * j + i`, so
/// tests can pin down exactly which slice was read.
pub fn ramp_field(n_time: usize, n_lat: usize, n_lon: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(n_time * n_lat * n_lon);
    for t in 0..n_time {
        for j in 0..n_lat {
            for i in 0..n_lon {
                data.push(100.0 * t as f64 + 10.0 * j as f64 + i as f64);
            }
        }
    }
    data
}

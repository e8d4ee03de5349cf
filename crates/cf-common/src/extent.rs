//! Inclusive index extents into a Cartesian mesh.

use serde::{Deserialize, Serialize};

use crate::error::{CfError, CfResult};
use crate::metadata::Metadata;

/// Integer 6-tuple `[i0, i1, j0, j1, k0, k1]` of inclusive index
/// bounds into the whole mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent(pub [u64; 6]);

impl Extent {
    /// The extent covering a whole mesh of `nx * ny * nz` points.
    pub fn whole(nx: u64, ny: u64, nz: u64) -> Self {
        Extent([
            0,
            nx.saturating_sub(1),
            0,
            ny.saturating_sub(1),
            0,
            nz.saturating_sub(1),
        ])
    }

    /// Per-axis point counts `[ni, nj, nk]`.
    pub fn counts(&self) -> [u64; 3] {
        let e = self.0;
        [e[1] - e[0] + 1, e[3] - e[2] + 1, e[5] - e[4] + 1]
    }

    /// Total number of mesh points covered.
    pub fn num_points(&self) -> u64 {
        let [ni, nj, nk] = self.counts();
        ni * nj * nk
    }

    /// Total number of mesh cells covered.
    pub fn num_cells(&self) -> u64 {
        let [ni, nj, nk] = self.counts();
        ni.saturating_sub(1).max(1) * nj.saturating_sub(1).max(1) * nk.saturating_sub(1).max(1)
    }

    /// Check each `lo <= hi` pair.
    pub fn validate(&self) -> CfResult<()> {
        let e = self.0;
        for axis in 0..3 {
            if e[2 * axis] > e[2 * axis + 1] {
                return Err(CfError::Contract(format!(
                    "extent {:?} has lo > hi on axis {}",
                    e, axis
                )));
            }
        }
        Ok(())
    }

    /// True when `other` lies entirely inside this extent.
    pub fn contains(&self, other: &Extent) -> bool {
        (0..3).all(|axis| {
            other.0[2 * axis] >= self.0[2 * axis] && other.0[2 * axis + 1] <= self.0[2 * axis + 1]
        })
    }

    /// Clamp this extent against `whole`, pinning both bounds of each
    /// axis inside it.
    pub fn clamp_to(&self, whole: &Extent) -> Extent {
        let mut e = self.0;
        for axis in 0..3 {
            let (lo, hi) = (whole.0[2 * axis], whole.0[2 * axis + 1]);
            e[2 * axis] = e[2 * axis].clamp(lo, hi);
            e[2 * axis + 1] = e[2 * axis + 1].clamp(lo, hi);
        }
        Extent(e)
    }

    /// Read a 6-tuple stored under `key`.
    pub fn from_metadata(md: &Metadata, key: &str) -> Option<Extent> {
        let v = md.get_vec::<u64>(key)?;
        if v.len() != 6 {
            return None;
        }
        Some(Extent([v[0], v[1], v[2], v[3], v[4], v[5]]))
    }

    /// Store this extent as a 6-tuple under `key`.
    pub fn to_metadata(&self, md: &mut Metadata, key: &str) {
        md.insert(key, self.0.to_vec());
    }
}

impl From<[u64; 6]> for Extent {
    fn from(e: [u64; 6]) -> Self {
        Extent(e)
    }
}

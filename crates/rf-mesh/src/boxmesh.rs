//! Logically rectangular meshes.

use crate::mesh::Point;
use crate::unstructured::{MeshBuilder, UnstructuredMesh};
use crate::{MeshError, MeshResult};

const AXIS_NAMES: [&str; 3] = ["x", "y", "z"];

/// Axis-aligned box used to select cells or boundary faces by centroid.
#[derive(Clone, Copy, Debug)]
struct RegionBox {
    lo: Point,
    hi: Point,
}

impl RegionBox {
    fn contains(&self, x: &Point, tol: f64) -> bool {
        (0..3).all(|d| x[d] >= self.lo[d] - tol && x[d] <= self.hi[d] + tol)
    }
}

/// Builds a uniform box mesh in 1, 2 or 3 dimensions.
///
/// Every mesh gets a cell region `"All"` and boundary face regions
/// `"xmin"`, `"xmax"`, `"ymin"`, ... for each axis.
///
/// ```ignore
/// let mesh = BoxMeshBuilder::new(&[0.0, 0.0], &[1.0, 2.0], &[4, 8])
///     .cell_region("upper", &[0.0, 1.0], &[1.0, 2.0])
///     .build()?;
/// ```
pub struct BoxMeshBuilder {
    lo: Vec<f64>,
    hi: Vec<f64>,
    n: Vec<usize>,
    cell_regions: Vec<(String, RegionBox)>,
    face_regions: Vec<(String, RegionBox)>,
}

impl BoxMeshBuilder {
    pub fn new(lo: &[f64], hi: &[f64], n: &[usize]) -> Self {
        Self {
            lo: lo.to_vec(),
            hi: hi.to_vec(),
            n: n.to_vec(),
            cell_regions: Vec::new(),
            face_regions: Vec::new(),
        }
    }

    /// Named cell region: cells whose centroid lies in `[lo, hi]`.
    pub fn cell_region(mut self, name: impl Into<String>, lo: &[f64], hi: &[f64]) -> Self {
        self.cell_regions
            .push((name.into(), RegionBox { lo: pad(lo), hi: pad(hi) }));
        self
    }

    /// Named face region: boundary faces whose centroid lies in `[lo, hi]`.
    pub fn face_region(mut self, name: impl Into<String>, lo: &[f64], hi: &[f64]) -> Self {
        self.face_regions
            .push((name.into(), RegionBox { lo: pad(lo), hi: pad(hi) }));
        self
    }

    pub fn build(self) -> MeshResult<UnstructuredMesh> {
        let dim = self.n.len();
        if !(1..=3).contains(&dim) || self.lo.len() != dim || self.hi.len() != dim {
            return Err(MeshError::InvalidArg {
                what: format!(
                    "box mesh needs matching lo/hi/n of length 1..=3, got {}/{}/{}",
                    self.lo.len(),
                    self.hi.len(),
                    dim
                ),
            });
        }
        if self.n.iter().any(|&k| k == 0) {
            return Err(MeshError::InvalidArg {
                what: "box mesh needs at least one cell per axis".into(),
            });
        }
        if (0..dim).any(|d| !(self.hi[d] > self.lo[d])) {
            return Err(MeshError::InvalidArg {
                what: "box mesh needs hi > lo on every axis".into(),
            });
        }

        let mut n = [1usize; 3];
        let mut h = [1.0f64; 3];
        let mut lo = [0.0f64; 3];
        for d in 0..dim {
            n[d] = self.n[d];
            h[d] = (self.hi[d] - self.lo[d]) / self.n[d] as f64;
            lo[d] = self.lo[d];
        }
        let cell_index = |i: [usize; 3]| i[0] + n[0] * (i[1] + n[1] * i[2]);
        let volume: f64 = h[..dim].iter().product();

        let mut b = MeshBuilder::new(dim);
        let mut centroids = Vec::with_capacity(n[0] * n[1] * n[2]);
        for k in 0..n[2] {
            for j in 0..n[1] {
                for i in 0..n[0] {
                    let idx = [i, j, k];
                    let mut x = Point::zeros();
                    for d in 0..dim {
                        x[d] = lo[d] + (idx[d] as f64 + 0.5) * h[d];
                    }
                    b.add_cell(x, volume, 0);
                    centroids.push(x);
                }
            }
        }

        let mut boundary: Vec<Vec<usize>> = vec![Vec::new(); 2 * dim];
        let mut boundary_centroids: Vec<(usize, Point)> = Vec::new();
        for d in 0..dim {
            let area: f64 = (0..dim).filter(|&e| e != d).map(|e| h[e]).product();
            let mut planes = n;
            planes[d] += 1;
            for k in 0..planes[2] {
                for j in 0..planes[1] {
                    for i in 0..planes[0] {
                        let idx = [i, j, k];
                        let mut xf = Point::zeros();
                        for e in 0..dim {
                            let offset = if e == d { 0.0 } else { 0.5 };
                            xf[e] = lo[e] + (idx[e] as f64 + offset) * h[e];
                        }
                        let mut normal = Point::zeros();
                        normal[d] = area;
                        let left = (idx[d] > 0).then(|| {
                            let mut l = idx;
                            l[d] -= 1;
                            cell_index(l)
                        });
                        let right = (idx[d] < n[d]).then(|| cell_index(idx));
                        match (left, right) {
                            (Some(l), Some(r)) => {
                                b.add_face(l, Some(r), normal, xf);
                            }
                            (Some(l), None) => {
                                let f = b.add_face(l, None, normal, xf);
                                boundary[2 * d + 1].push(f);
                                boundary_centroids.push((f, xf));
                            }
                            (None, Some(r)) => {
                                let f = b.add_face(r, None, -normal, xf);
                                boundary[2 * d].push(f);
                                boundary_centroids.push((f, xf));
                            }
                            (None, None) => unreachable!("face plane without cells"),
                        }
                    }
                }
            }
        }

        let n_cells = centroids.len();
        b.cell_region("All", (0..n_cells).collect());
        for (d, axis) in AXIS_NAMES.iter().enumerate().take(dim) {
            b.face_region(format!("{axis}min"), std::mem::take(&mut boundary[2 * d]));
            b.face_region(format!("{axis}max"), std::mem::take(&mut boundary[2 * d + 1]));
        }

        let tol = 1e-10 * h[..dim].iter().copied().fold(0.0, f64::max);
        for (name, region) in &self.cell_regions {
            let cells: Vec<usize> = (0..n_cells)
                .filter(|&c| region.contains(&centroids[c], tol))
                .collect();
            if cells.is_empty() {
                return Err(MeshError::EmptyRegion { name: name.clone() });
            }
            b.cell_region(name.clone(), cells);
        }
        for (name, region) in &self.face_regions {
            let faces: Vec<usize> = boundary_centroids
                .iter()
                .filter(|(_, x)| region.contains(x, tol))
                .map(|(f, _)| *f)
                .collect();
            if faces.is_empty() {
                return Err(MeshError::EmptyRegion { name: name.clone() });
            }
            b.face_region(name.clone(), faces);
        }

        b.build()
    }
}

fn pad(v: &[f64]) -> Point {
    let mut p = Point::zeros();
    for (d, x) in v.iter().take(3).enumerate() {
        p[d] = *x;
    }
    p
}

//! Vertex and facet generation for the phasor observation surface.
//!
//! The observation region is a cuboid; its six faces are sampled with the
//! user's `phasorinc` stride into a deduplicated vertex list, and the facet
//! triangulation is regenerated after the run for export. A `J_tot = 0` grid
//! degenerates to the rectangle outline of the two K planes.

use std::collections::BTreeMap;

/// The observation cuboid, inclusive cell index bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cuboid {
    pub i0: usize,
    pub i1: usize,
    pub j0: usize,
    pub j1: usize,
    pub k0: usize,
    pub k1: usize,
}

impl Cuboid {
    pub fn from_bounds(bounds: [usize; 6]) -> Self {
        Self {
            i0: bounds[0],
            i1: bounds[1],
            j0: bounds[2],
            j1: bounds[3],
            k0: bounds[4],
            k1: bounds[5],
        }
    }
}

#[derive(Debug, Default)]
pub struct SurfaceMesh {
    pub vertices: Vec<[usize; 3]>,
    pub facets: Vec<[usize; 3]>,
}

/// Strided values covering `lo..=hi`, always including both end points.
fn strided(lo: usize, hi: usize, stride: usize) -> Vec<usize> {
    let stride = stride.max(1);
    let mut values: Vec<usize> = (lo..=hi).step_by(stride).collect();
    if values.last() != Some(&hi) {
        values.push(hi);
    }
    values
}

/// Triangulated cuboid surface with vertex stride per axis.
pub fn triangulate_cuboid(cuboid: &Cuboid, stride: [usize; 3]) -> SurfaceMesh {
    let is = strided(cuboid.i0, cuboid.i1, stride[0]);
    let js = strided(cuboid.j0, cuboid.j1, stride[1]);
    let ks = strided(cuboid.k0, cuboid.k1, stride[2]);

    let mut vertex_ids: BTreeMap<[usize; 3], usize> = BTreeMap::new();
    let mut vertices: Vec<[usize; 3]> = Vec::new();
    let mut facets: Vec<[usize; 3]> = Vec::new();

    let mut vertex_id = |vertex: [usize; 3], vertices: &mut Vec<[usize; 3]>| -> usize {
        *vertex_ids.entry(vertex).or_insert_with(|| {
            vertices.push(vertex);
            vertices.len() - 1
        })
    };

    let mut add_face = |grid_a: &[usize],
                        grid_b: &[usize],
                        cell: &dyn Fn(usize, usize) -> [usize; 3],
                        vertices: &mut Vec<[usize; 3]>,
                        facets: &mut Vec<[usize; 3]>| {
        for a_pair in grid_a.windows(2) {
            for b_pair in grid_b.windows(2) {
                let v00 = vertex_id(cell(a_pair[0], b_pair[0]), vertices);
                let v10 = vertex_id(cell(a_pair[1], b_pair[0]), vertices);
                let v01 = vertex_id(cell(a_pair[0], b_pair[1]), vertices);
                let v11 = vertex_id(cell(a_pair[1], b_pair[1]), vertices);
                facets.push([v00, v10, v11]);
                facets.push([v00, v11, v01]);
            }
        }
    };

    let (i0, i1) = (cuboid.i0, cuboid.i1);
    let (j0, j1) = (cuboid.j0, cuboid.j1);
    let (k0, k1) = (cuboid.k0, cuboid.k1);

    add_face(&is, &js, &|i, j| [i, j, k0], &mut vertices, &mut facets);
    add_face(&is, &js, &|i, j| [i, j, k1], &mut vertices, &mut facets);
    add_face(&is, &ks, &|i, k| [i, j0, k], &mut vertices, &mut facets);
    add_face(&is, &ks, &|i, k| [i, j1, k], &mut vertices, &mut facets);
    add_face(&js, &ks, &|j, k| [i0, j, k], &mut vertices, &mut facets);
    add_face(&js, &ks, &|j, k| [i1, j, k], &mut vertices, &mut facets);

    SurfaceMesh { vertices, facets }
}

/// Degenerate 2-D surface: the rectangle outline in the (i, k) plane at
/// j = 0; no facets.
pub fn create_boundary_2d(i0: usize, i1: usize, k0: usize, k1: usize) -> SurfaceMesh {
    let mut vertices = Vec::new();
    for i in i0..=i1 {
        vertices.push([i, 0, k0]);
        if k1 != k0 {
            vertices.push([i, 0, k1]);
        }
    }
    for k in (k0 + 1)..k1 {
        vertices.push([i0, 0, k]);
        if i1 != i0 {
            vertices.push([i1, 0, k]);
        }
    }
    vertices.sort_unstable();
    vertices.dedup();
    SurfaceMesh {
        vertices,
        facets: Vec::new(),
    }
}

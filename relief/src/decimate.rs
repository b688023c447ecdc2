//! Mesh simplification by edge collapse with quadric error metrics.
//!
//! Every vertex accumulates the planes of its faces in a 4x4 quadric; the cost
//! of collapsing an edge is the squared distance of the merged vertex to all
//! of those planes. Open borders get extra vertical constraint planes, and a
//! border vertex only ever merges into a neighbour on the same straight stretch
//! of outline, so the silhouette in XY is never changed. Corners stay put.

use std::{cmp::Reverse, collections::BinaryHeap, time::Instant};

use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::{
    error::{ReliefError, Result, Stage},
    mesh::Mesh,
    Pos,
};

type Quadric = Matrix4<f64>;
type Point = Vector3<f64>;

/// Weight of the border constraint planes relative to face planes.
const BOUNDARY_WEIGHT: f64 = 1000.0;

/// Collapses that bring a face normal closer than this to perpendicular with
/// its old direction are rejected.
const MIN_NORMAL_DOT: f64 = 0.1;

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    key: Reverse<(OrderedFloat<f64>, OrderedFloat<f64>)>,
    edge: (u32, u32),
    versions: (u32, u32),
}

struct Collapse {
    keep: u32,
    remove: u32,
    position: Point,
    cost: f64,
}

struct Decimator {
    positions: Vec<Point>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<u32>>,
    quadrics: Vec<Quadric>,
    boundary: Vec<bool>,
    /// Border vertices lying between two collinear border edges.
    slides: Vec<bool>,
    /// XY extent of the input, no vertex may leave it.
    extent: (Vector2<f64>, Vector2<f64>),
    versions: Vec<u32>,
    live_faces: usize,
}

/// Removes roughly `target_reduction` of the faces of `mesh`, so the result
/// has at most `ceil((1 - target_reduction) * faces)` faces unless no more
/// valid collapses remain.
pub fn decimate(mesh: &Mesh, target_reduction: f32) -> Result<Mesh> {
    if !(0.0..1.0).contains(&target_reduction) {
        return Err(ReliefError::geometry(
            Stage::Decimation,
            format!("target reduction {target_reduction} is outside 0..1"),
        ));
    }

    let original = mesh.face_count();
    let target = ((1.0 - target_reduction as f64) * original as f64).ceil() as usize;
    if original == 0 || target >= original {
        return Ok(mesh.clone());
    }

    let start = Instant::now();
    let mut decimator = Decimator::new(mesh);
    let mut heap = decimator.initial_candidates();
    let (mut collapses, mut rejected) = (0, 0);

    while decimator.live_faces > target {
        let Some(candidate) = heap.pop() else {
            break;
        };

        let (a, b) = candidate.edge;
        if decimator.versions[a as usize] != candidate.versions.0
            || decimator.versions[b as usize] != candidate.versions.1
        {
            continue;
        }

        let Some(collapse) = decimator.plan(a, b) else {
            rejected += 1;
            continue;
        };

        decimator.apply(&collapse);
        collapses += 1;

        let keep = collapse.keep;
        for neighbor in decimator.neighbors(keep) {
            if let Some(candidate) = decimator.candidate(keep, neighbor) {
                heap.push(candidate);
            }
        }
    }

    let out = decimator.into_mesh();
    if out.is_empty() {
        return Err(ReliefError::geometry(
            Stage::Decimation,
            "simplification removed every face",
        ));
    }

    debug!(
        "Decimated {original} faces to {} (target {target}) with {collapses} collapses, {rejected} rejected, in {:?}",
        out.face_count(),
        start.elapsed()
    );
    Ok(out)
}

impl Decimator {
    fn new(mesh: &Mesh) -> Self {
        let positions = (mesh.vertices().iter())
            .map(|v| v.map(|x| x as f64))
            .collect::<Vec<_>>();
        let faces = mesh.faces().to_vec();

        let mut vertex_faces = vec![Vec::new(); positions.len()];
        for (idx, face) in faces.iter().enumerate() {
            for &v in face {
                vertex_faces[v as usize].push(idx as u32);
            }
        }

        let mut quadrics = vec![Quadric::zeros(); positions.len()];
        let mut boundary = vec![false; positions.len()];
        let mut edges = std::collections::HashMap::<(u32, u32), u32>::new();

        for face in faces.iter() {
            let [a, b, c] = face.map(|x| positions[x as usize]);
            let cross = (b - a).cross(&(c - a));
            let area = cross.norm();
            if area <= 0.0 {
                continue;
            }

            let normal = cross / area;
            let plane = plane_quadric(&normal, &a) * (area / 2.0);
            face.iter().for_each(|&v| quadrics[v as usize] += plane);

            for i in 0..3 {
                let (u, v) = (face[i], face[(i + 1) % 3]);
                *edges.entry((u.min(v), u.max(v))).or_default() += 1;
            }
        }

        let mut border = vec![Vec::new(); positions.len()];
        for (&(u, v), &count) in edges.iter() {
            if count != 1 {
                continue;
            }

            boundary[u as usize] = true;
            boundary[v as usize] = true;
            border[u as usize].push(v);
            border[v as usize].push(u);

            let (pu, pv) = (positions[u as usize], positions[v as usize]);
            let edge = pv - pu;
            let side = edge.cross(&Point::z());
            if side.norm_squared() == 0.0 {
                continue;
            }

            let weight = BOUNDARY_WEIGHT * edge.norm_squared();
            let plane = plane_quadric(&side.normalize(), &pu) * weight;
            quadrics[u as usize] += plane;
            quadrics[v as usize] += plane;
        }

        let slides = (0..positions.len())
            .map(|v| match border[v].as_slice() {
                &[prev, next] => {
                    let here = positions[v];
                    straight_xy(positions[prev as usize] - here, positions[next as usize] - here)
                }
                _ => false,
            })
            .collect();

        let extent = positions.iter().fold(
            (Vector2::repeat(f64::MAX), Vector2::repeat(f64::MIN)),
            |(min, max), p| (min.inf(&p.xy()), max.sup(&p.xy())),
        );

        let live_faces = faces.len();
        Self {
            versions: vec![0; positions.len()],
            face_alive: vec![true; faces.len()],
            positions,
            faces,
            vertex_faces,
            quadrics,
            boundary,
            slides,
            extent,
            live_faces,
        }
    }

    fn initial_candidates(&self) -> BinaryHeap<Candidate> {
        let mut heap = BinaryHeap::with_capacity(self.faces.len() * 3 / 2);
        for face in self.faces.iter() {
            for i in 0..3 {
                let (a, b) = (face[i], face[(i + 1) % 3]);
                // Interior edges show up once from each side.
                if a < b || self.is_boundary_edge(a, b) {
                    heap.extend(self.candidate(a, b));
                }
            }
        }
        heap
    }

    fn live(&self, vertex: u32) -> impl Iterator<Item = u32> + '_ {
        (self.vertex_faces[vertex as usize].iter())
            .copied()
            .filter(|&f| self.face_alive[f as usize])
    }

    fn neighbors(&self, vertex: u32) -> Vec<u32> {
        let mut out = self
            .live(vertex)
            .flat_map(|f| self.faces[f as usize])
            .filter(|&x| x != vertex)
            .collect::<Vec<_>>();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn shared_faces(&self, a: u32, b: u32) -> Vec<u32> {
        self.live(a)
            .filter(|&f| self.faces[f as usize].contains(&b))
            .collect()
    }

    fn is_boundary_edge(&self, a: u32, b: u32) -> bool {
        self.shared_faces(a, b).len() == 1
    }

    fn cost(&self, quadric: &Quadric, point: &Point) -> f64 {
        let v = Vector4::new(point.x, point.y, point.z, 1.0);
        v.dot(&(quadric * v)).max(0.0)
    }

    fn candidate(&self, a: u32, b: u32) -> Option<Candidate> {
        let collapse = self.best_position(a, b)?;
        let length = (self.positions[a as usize] - self.positions[b as usize]).norm_squared();
        Some(Candidate {
            key: Reverse((OrderedFloat(collapse.cost), OrderedFloat(length))),
            edge: (a, b),
            versions: (self.versions[a as usize], self.versions[b as usize]),
        })
    }

    fn inside(&self, point: &Point) -> bool {
        let (min, max) = &self.extent;
        point.iter().all(|x| x.is_finite())
            && (min.x..=max.x).contains(&point.x)
            && (min.y..=max.y).contains(&point.y)
    }

    /// Picks which vertex survives and where it moves. Border vertices stay
    /// exactly where they are, and a border vertex is only removed along a
    /// straight stretch of the border.
    fn best_position(&self, a: u32, b: u32) -> Option<Collapse> {
        let (pa, pb) = (self.positions[a as usize], self.positions[b as usize]);
        let quadric = self.quadrics[a as usize] + self.quadrics[b as usize];
        let (ba, bb) = (self.boundary[a as usize], self.boundary[b as usize]);

        // (keep, remove, position)
        let mut options = Vec::with_capacity(4);
        match (ba, bb) {
            (false, false) => {
                let middle = (pa + pb) / 2.0;
                options.extend([pa, pb, middle].map(|p| (a, b, p)));
                if let Some(optimum) = optimum(&quadric) {
                    if (optimum - middle).norm() <= (pa - pb).norm() * 2.0 {
                        options.push((a, b, optimum));
                    }
                }
            }
            (true, false) => options.push((a, b, pa)),
            (false, true) => options.push((b, a, pb)),
            (true, true) => {
                if !self.is_boundary_edge(a, b) {
                    return None;
                }
                if self.slides[b as usize] {
                    options.push((a, b, pa));
                }
                if self.slides[a as usize] {
                    options.push((b, a, pb));
                }
            }
        }

        options
            .into_iter()
            .filter(|(_, _, p)| self.inside(p))
            .map(|(keep, remove, position)| Collapse {
                keep,
                remove,
                cost: self.cost(&quadric, &position),
                position,
            })
            .min_by_key(|x| OrderedFloat(x.cost))
    }

    /// Returns the collapse for edge `(a, b)` if it keeps the surface a valid
    /// manifold without folding any face over.
    fn plan(&self, a: u32, b: u32) -> Option<Collapse> {
        let shared = self.shared_faces(a, b);
        if shared.is_empty() || shared.len() > 2 {
            return None;
        }

        let (ba, bb) = (self.boundary[a as usize], self.boundary[b as usize]);
        if ba && bb && shared.len() != 1 {
            return None;
        }

        // Link condition: the only common neighbours are the apexes of the
        // shared faces.
        let apexes = (shared.iter())
            .flat_map(|&f| self.faces[f as usize])
            .filter(|&x| x != a && x != b)
            .collect::<Vec<_>>();
        let na = self.neighbors(a);
        let common = (self.neighbors(b).iter())
            .filter(|x| na.binary_search(x).is_ok())
            .count();
        if common != apexes.len() {
            return None;
        }

        let collapse = self.best_position(a, b)?;
        for vertex in [a, b] {
            for face in self.live(vertex).filter(|f| !shared.contains(f)) {
                let corners = self.faces[face as usize];
                let before = corners.map(|x| self.positions[x as usize]);
                let after = corners.map(|x| {
                    if x == a || x == b {
                        collapse.position
                    } else {
                        self.positions[x as usize]
                    }
                });

                let old = (before[1] - before[0]).cross(&(before[2] - before[0]));
                let new = (after[1] - after[0]).cross(&(after[2] - after[0]));
                let (old_len, new_len) = (old.norm(), new.norm());
                if new_len <= old_len * 1e-6 || new_len == 0.0 {
                    return None;
                }
                if old_len > 0.0 && old.dot(&new) < MIN_NORMAL_DOT * old_len * new_len {
                    return None;
                }
            }
        }

        Some(collapse)
    }

    fn apply(&mut self, collapse: &Collapse) {
        let Collapse {
            keep,
            remove,
            position,
            ..
        } = *collapse;

        let faces = std::mem::take(&mut self.vertex_faces[remove as usize]);
        for face in faces {
            if !self.face_alive[face as usize] {
                continue;
            }

            let corners = &mut self.faces[face as usize];
            if corners.contains(&keep) {
                self.face_alive[face as usize] = false;
                self.live_faces -= 1;
                continue;
            }

            corners.iter_mut().filter(|x| **x == remove).for_each(|x| *x = keep);
            self.vertex_faces[keep as usize].push(face);
        }

        let alive = &self.face_alive;
        self.vertex_faces[keep as usize].retain(|&f| alive[f as usize]);

        let removed = self.quadrics[remove as usize];
        self.quadrics[keep as usize] += removed;
        self.positions[keep as usize] = position;
        self.boundary[keep as usize] |= self.boundary[remove as usize];
        self.versions[keep as usize] += 1;
        self.versions[remove as usize] += 1;
    }

    fn into_mesh(self) -> Mesh {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut vertices = Vec::new();
        let mut faces = Vec::with_capacity(self.live_faces);

        for (face, _) in (self.faces.iter().zip(self.face_alive.iter())).filter(|(_, alive)| **alive)
        {
            faces.push(face.map(|v| {
                let slot = &mut remap[v as usize];
                if *slot == u32::MAX {
                    *slot = vertices.len() as u32;
                    let p = self.positions[v as usize];
                    vertices.push(Pos::new(p.x as f32, p.y as f32, p.z as f32));
                }
                *slot
            }));
        }

        Mesh::new(vertices, faces)
    }
}

/// `p pᵀ` for the plane through `point` with unit `normal`.
fn plane_quadric(normal: &Point, point: &Point) -> Quadric {
    let plane = Vector4::new(normal.x, normal.y, normal.z, -normal.dot(point));
    plane * plane.transpose()
}

/// Whether `a` and `b`, seen from a common vertex, point in opposite directions
/// in XY.
fn straight_xy(a: Point, b: Point) -> bool {
    let (a, b) = (a.xy(), b.xy());
    let scale = a.norm() * b.norm();
    scale > 0.0 && a.perp(&b).abs() <= 1e-9 * scale && a.dot(&b) < 0.0
}

/// The point minimizing the quadric, if its linear part is invertible.
fn optimum(quadric: &Quadric) -> Option<Point> {
    let a: Matrix3<f64> = quadric.fixed_view::<3, 3>(0, 0).into_owned();
    let b: Point = quadric.fixed_view::<3, 1>(0, 3).into_owned();
    if a.determinant().abs() < 1e-12 {
        return None;
    }

    a.try_inverse().map(|inv| -(inv * b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::MeshBuilder, mesh::tests::cube};

    /// A flat `n` by `n` grid of unit squares at the given height.
    fn grid(n: u32, height: impl Fn(u32, u32) -> f32) -> Mesh {
        let mut builder = MeshBuilder::new();
        for y in 0..=n {
            for x in 0..=n {
                builder.add_vertex(Pos::new(x as f32, y as f32, height(x, y)));
            }
        }

        let idx = |x: u32, y: u32| y * (n + 1) + x;
        for y in 0..n {
            for x in 0..n {
                builder.add_quad([idx(x, y), idx(x + 1, y), idx(x, y + 1), idx(x + 1, y + 1)]);
            }
        }
        builder.build()
    }

    #[test]
    fn planar_grid_respects_budget() {
        let mesh = grid(30, |_, _| 1.0);
        let out = decimate(&mesh, 0.9).unwrap();

        let target = (0.1 * mesh.face_count() as f64).ceil() as usize;
        assert!(out.face_count() <= target, "{} > {target}", out.face_count());
        out.validate().unwrap();
    }

    #[test]
    fn planar_grid_keeps_outline() {
        let mesh = grid(20, |_, _| 0.0);
        let out = decimate(&mesh, 0.95).unwrap();

        let (min, max) = out.bounds();
        assert_eq!((min.x, min.y), (0.0, 0.0));
        assert_eq!((max.x, max.y), (20.0, 20.0));
        assert!(out.vertices().iter().all(|v| v.z.abs() < 1e-5));

        let area = (0..out.face_count()).map(|f| out.double_area(f)).sum::<f32>() / 2.0;
        assert!((area - 400.0).abs() < 1e-2, "area {area}");
        assert!((0..out.face_count()).all(|f| out.normal(f).z > 0.0));
    }

    #[test]
    fn noisy_grid_keeps_footprint() {
        let noise = |x: u32, y: u32| {
            let h = (x as u64 * 73_856_093) ^ (y as u64 * 19_349_663);
            (h.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 56) as f32 / 64.0
        };
        let mesh = grid(40, noise);
        let out = decimate(&mesh, 0.98).unwrap();
        assert!(out.face_count() < mesh.face_count());

        let (min, max) = out.bounds();
        assert_eq!((min.x, min.y), (0.0, 0.0));
        assert_eq!((max.x, max.y), (40.0, 40.0));

        // Border vertices never leave the outline of the square.
        let on_border = |v: &Pos| [v.x, v.y].iter().any(|&c| c == 0.0 || c == 40.0);
        let mut counts = std::collections::HashMap::<(u32, u32), u32>::new();
        for face in out.faces() {
            for i in 0..3 {
                let (u, v) = (face[i], face[(i + 1) % 3]);
                *counts.entry((u.min(v), u.max(v))).or_default() += 1;
            }
        }
        for (u, v) in counts.into_iter().filter(|x| x.1 == 1).map(|x| x.0) {
            assert!(on_border(&out.vertices()[u as usize]));
            assert!(on_border(&out.vertices()[v as usize]));
        }

        for corner in [(0.0, 0.0), (40.0, 0.0), (0.0, 40.0), (40.0, 40.0)] {
            assert!(out.vertices().iter().any(|v| (v.x, v.y) == corner));
        }
    }

    #[test]
    fn detail_survives_longer_than_flat_regions() {
        let plateau = |x: u32, y: u32| (8..=12).contains(&x) && (8..=12).contains(&y);
        let mesh = grid(20, |x, y| if plateau(x, y) { 3.0 } else { 0.0 });
        let out = decimate(&mesh, 0.8).unwrap();
        assert!(out.vertices().iter().any(|v| (v.z - 3.0).abs() < 1e-3));
        out.validate().unwrap();
    }

    #[test]
    fn closed_mesh_stays_closed() {
        let out = decimate(&cube(), 0.5).unwrap();
        assert!(out.face_count() >= 4);
        assert!(out.is_manifold());
    }

    #[test]
    fn no_reduction_is_identity() {
        let mesh = grid(4, |_, _| 0.0);
        assert_eq!(decimate(&mesh, 0.0).unwrap(), mesh);
        assert!(decimate(&mesh, 1.0).is_err());
    }
}

//! Boolean union of a closed mesh with a convex one.
//!
//! The faces of the first operand are clipped against the planes of the convex
//! operand, keeping everything outside it. The faces of the convex operand are
//! split along their intersections with the first operand and every fragment
//! is classified with a vertical ray parity test. Surfaces shared by both
//! operands are kept once when both solids lie on the same side of them and
//! dropped when they face each other.
//!
//! The result is geometrically closed but fragments may meet in T-junctions.

use std::time::Instant;

use nalgebra::Vector3;
use tracing::debug;

use crate::{
    builder::MeshBuilder,
    error::{ReliefError, Result, Stage},
    mesh::Mesh,
    Pos,
};

type Point = Vector3<f64>;
type Triangle = [Point; 3];

/// Distance below which points are considered to be on a plane, in mm.
const EPSILON: f64 = 1e-6;

/// Polygons with more active cuts than this are split in half along their
/// longest axis before cutting.
const KD_THRESHOLD: usize = 12;
const KD_MAX_DEPTH: u32 = 20;

/// Maximum number of fragments produced while splitting the convex operand.
const FRAGMENT_LIMIT: usize = 1 << 22;

#[derive(Debug, Clone, Copy)]
struct Plane {
    normal: Point,
    offset: f64,
}

enum Split {
    Front,
    Back,
    Coplanar,
    Spanning(Vec<Point>, Vec<Point>),
}

/// A plane that bounds the region where some face of the first operand
/// meets a face of the convex operand, with the bounds of that meeting.
struct Cut {
    plane: Plane,
    min: Point,
    max: Point,
}

/// An axis aligned box with outward facing triangles.
pub fn box_mesh(min: Pos, max: Pos) -> Mesh {
    let mut builder = MeshBuilder::with_capacity(8, 12);
    builder.add_box(min, max);
    builder.build()
}

/// Union of the closed mesh `mesh` and the closed convex mesh `convex`.
pub fn union(mesh: &Mesh, convex: &Mesh) -> Result<Mesh> {
    let start = Instant::now();
    let (solid, hull) = (triangles(mesh)?, triangles(convex)?);
    let planes = hull_planes(&hull)?;

    let mut builder = MeshBuilder::new();
    let mut kept = 0;
    for triangle in solid.iter() {
        for polygon in clip_outside(triangle, &planes) {
            emit(&polygon, &mut builder);
            kept += 1;
        }
    }

    let index = RayIndex::new(&solid);
    let mut fragments = 0;
    let mut hull_kept = 0;
    for face in hull.iter() {
        let Some(plane) = Plane::from_triangle(face) else {
            continue;
        };

        let (cuts, coplanar) = face_cuts(face, &plane, &solid);
        for polygon in split_face(face.to_vec(), &cuts, &mut fragments)? {
            let center = centroid(&polygon);
            let on_solid = coplanar.iter().any(|&t| contains(&solid[t], &center));
            if !on_solid && !index.is_inside(&center) {
                emit(&polygon, &mut builder);
                hull_kept += 1;
            }
        }
    }

    let out = builder.build();
    if out.is_empty() {
        return Err(ReliefError::geometry(Stage::Boolean, "union is empty"));
    }

    if out.vertices().iter().any(|v| !v.iter().all(|x| x.is_finite())) {
        return Err(ReliefError::geometry(
            Stage::Boolean,
            "union produced non-finite vertices",
        ));
    }

    debug!(
        "Union kept {kept} fragments of {} faces and {hull_kept} of {fragments} convex fragments in {:?}",
        solid.len(),
        start.elapsed()
    );
    Ok(out)
}

fn triangles(mesh: &Mesh) -> Result<Vec<Triangle>> {
    if mesh.is_empty() {
        return Err(ReliefError::geometry(Stage::Boolean, "operand has no faces"));
    }

    mesh.validate()
        .map_err(|err| ReliefError::geometry(Stage::Boolean, err.to_string()))?;

    Ok((0..mesh.face_count())
        .map(|idx| mesh.triangle(idx).map(|v| v.map(|x| x as f64)))
        .collect())
}

/// The distinct face planes of a convex mesh.
fn hull_planes(hull: &[Triangle]) -> Result<Vec<Plane>> {
    let mut planes = Vec::<Plane>::new();
    for plane in hull.iter().filter_map(Plane::from_triangle) {
        let duplicate = planes.iter().any(|x| {
            x.normal.dot(&plane.normal) > 1.0 - 1e-9 && (x.offset - plane.offset).abs() < EPSILON
        });
        if !duplicate {
            planes.push(plane);
        }
    }

    let convex = (planes.iter())
        .all(|plane| hull.iter().flatten().all(|p| plane.distance(p) <= EPSILON * 10.0));
    if planes.len() < 4 || !convex {
        return Err(ReliefError::geometry(
            Stage::Boolean,
            "second operand is not a closed convex mesh",
        ));
    }

    Ok(planes)
}

/// The parts of `triangle` outside the convex region bounded by `planes`.
fn clip_outside(triangle: &Triangle, planes: &[Plane]) -> Vec<Vec<Point>> {
    let normal = (triangle[1] - triangle[0]).cross(&(triangle[2] - triangle[0]));
    let mut out = Vec::new();
    let mut rest = triangle.to_vec();

    for plane in planes {
        match split(&rest, plane) {
            Split::Front => {
                out.push(rest);
                return out;
            }
            Split::Back => {}
            Split::Coplanar if normal.dot(&plane.normal) > 0.0 => {
                out.push(rest);
                return out;
            }
            Split::Coplanar => {}
            Split::Spanning(front, back) => {
                out.push(front);
                rest = back;
            }
        }
    }

    out
}

/// Collects the planes that split the convex face `face` where it meets the
/// solid, plus the solid's triangles lying in the face's plane.
fn face_cuts(face: &Triangle, plane: &Plane, solid: &[Triangle]) -> (Vec<Cut>, Vec<usize>) {
    let (min, max) = bounds(face);
    let (min, max) = (min.add_scalar(-EPSILON), max.add_scalar(EPSILON));

    let mut cuts = Vec::new();
    let mut coplanar = Vec::new();

    for (idx, triangle) in solid.iter().enumerate() {
        let (tri_min, tri_max) = bounds(triangle);
        if !overlaps((&tri_min, &tri_max), (&min, &max)) {
            continue;
        }

        let distance = triangle.map(|p| plane.distance(&p));
        let on = distance.map(|x| x.abs() <= EPSILON);

        if on.iter().all(|&x| x) {
            coplanar.push(idx);
            for i in 0..3 {
                let (p, q) = (triangle[i], triangle[(i + 1) % 3]);
                let Some(normal) = plane.normal.cross(&(q - p)).try_normalize(1e-12) else {
                    continue;
                };
                let (min, max) = bounds(&[p, q]);
                cuts.push(Cut {
                    plane: Plane::new(normal, &p),
                    min,
                    max,
                });
            }
            continue;
        }

        let mut points = Vec::with_capacity(3);
        for i in 0..3 {
            let j = (i + 1) % 3;
            let (di, dj) = (distance[i], distance[j]);
            if on[i] {
                points.push(triangle[i]);
            } else if !on[j] && (di > 0.0) != (dj > 0.0) {
                points.push(triangle[i] + (triangle[j] - triangle[i]) * (di / (di - dj)));
            }
        }

        if points.len() < 2 {
            continue;
        }

        if let Some(plane) = Plane::from_triangle(triangle) {
            let (min, max) = bounds(&points);
            cuts.push(Cut { plane, min, max });
        }
    }

    (cuts, coplanar)
}

/// Splits a convex polygon by every cut that crosses it. The result is a set
/// of convex polygons none of which is crossed by a cut.
fn split_face(polygon: Vec<Point>, cuts: &[Cut], fragments: &mut usize) -> Result<Vec<Vec<Point>>> {
    let mut out = Vec::new();
    let mut stack = vec![(polygon, (0..cuts.len()).collect::<Vec<_>>(), 0)];

    while let Some((polygon, candidates, depth)) = stack.pop() {
        let (min, max) = bounds(&polygon);
        let active = (candidates.into_iter())
            .filter(|&c| {
                let cut = &cuts[c];
                overlaps((&cut.min, &cut.max), (&min, &max)) && straddles(&polygon, &cut.plane)
            })
            .collect::<Vec<_>>();

        if active.is_empty() {
            *fragments += 1;
            if *fragments > FRAGMENT_LIMIT {
                return Err(ReliefError::geometry(
                    Stage::Boolean,
                    format!("more than {FRAGMENT_LIMIT} fragments"),
                ));
            }
            out.push(polygon);
            continue;
        }

        if active.len() > KD_THRESHOLD && depth < KD_MAX_DEPTH {
            let axis = (max - min).imax();
            let mut normal = Point::zeros();
            normal[axis] = 1.0;
            let plane = Plane {
                normal,
                offset: (min[axis] + max[axis]) / 2.0,
            };

            if let Split::Spanning(front, back) = split(&polygon, &plane) {
                stack.push((front, active.clone(), depth + 1));
                stack.push((back, active, depth + 1));
                continue;
            }
        }

        let rest = active[1..].to_vec();
        match split(&polygon, &cuts[active[0]].plane) {
            Split::Spanning(front, back) => {
                stack.push((front, rest.clone(), depth));
                stack.push((back, rest, depth));
            }
            _ => stack.push((polygon, rest, depth)),
        }
    }

    Ok(out)
}

impl Plane {
    fn new(normal: Point, point: &Point) -> Self {
        Self {
            normal,
            offset: normal.dot(point),
        }
    }

    fn from_triangle(triangle: &Triangle) -> Option<Self> {
        let normal = (triangle[1] - triangle[0]).cross(&(triangle[2] - triangle[0]));
        let normal = normal.try_normalize(1e-12)?;
        Some(Self::new(normal, &triangle[0]))
    }

    fn distance(&self, point: &Point) -> f64 {
        self.normal.dot(point) - self.offset
    }
}

fn split(polygon: &[Point], plane: &Plane) -> Split {
    let distance = polygon.iter().map(|p| plane.distance(p)).collect::<Vec<_>>();
    let side = |d: f64| {
        if d > EPSILON {
            1
        } else if d < -EPSILON {
            -1
        } else {
            0
        }
    };

    let front = distance.iter().any(|&d| side(d) > 0);
    let back = distance.iter().any(|&d| side(d) < 0);
    match (front, back) {
        (false, false) => return Split::Coplanar,
        (true, false) => return Split::Front,
        (false, true) => return Split::Back,
        (true, true) => {}
    }

    let (mut f, mut b) = (Vec::new(), Vec::new());
    for i in 0..polygon.len() {
        let j = (i + 1) % polygon.len();
        let (si, sj) = (side(distance[i]), side(distance[j]));

        if si >= 0 {
            f.push(polygon[i]);
        }
        if si <= 0 {
            b.push(polygon[i]);
        }
        if si * sj < 0 {
            let t = distance[i] / (distance[i] - distance[j]);
            let point = polygon[i] + (polygon[j] - polygon[i]) * t;
            f.push(point);
            b.push(point);
        }
    }

    Split::Spanning(f, b)
}

fn straddles(polygon: &[Point], plane: &Plane) -> bool {
    let (mut front, mut back) = (false, false);
    for p in polygon {
        let d = plane.distance(p);
        front |= d > EPSILON;
        back |= d < -EPSILON;
    }
    front && back
}

fn bounds(points: &[Point]) -> (Point, Point) {
    points.iter().fold(
        (Point::repeat(f64::MAX), Point::repeat(f64::MIN)),
        |(min, max), p| (min.inf(p), max.sup(p)),
    )
}

fn overlaps((a_min, a_max): (&Point, &Point), (b_min, b_max): (&Point, &Point)) -> bool {
    (0..3).all(|i| a_min[i] <= b_max[i] + EPSILON && b_min[i] <= a_max[i] + EPSILON)
}

fn centroid(polygon: &[Point]) -> Point {
    polygon.iter().sum::<Point>() / polygon.len() as f64
}

/// True if `point`, lying in the plane of `triangle`, is inside it.
fn contains(triangle: &Triangle, point: &Point) -> bool {
    let [a, b, c] = triangle;
    let normal = (b - a).cross(&(c - a));
    [(a, b), (b, c), (c, a)]
        .iter()
        .all(|(p, q)| (*q - *p).cross(&(point - *p)).dot(&normal) >= -1e-12)
}

fn emit(polygon: &[Point], builder: &mut MeshBuilder) {
    if polygon.len() < 3 {
        return;
    }

    let to_pos = |p: &Point| Pos::new(p.x as f32, p.y as f32, p.z as f32);
    let first = builder.add_vertex(to_pos(&polygon[0]));
    let rest = polygon[1..].iter().map(|p| builder.add_vertex(to_pos(p))).collect::<Vec<_>>();
    for pair in rest.windows(2) {
        builder.add_face([first, pair[0], pair[1]]);
    }
}

/// Vertical ray parity test against a closed mesh, accelerated with a
/// uniform grid over its XY bounds.
struct RayIndex {
    triangles: Vec<Triangle>,
    origin: (f64, f64),
    cell: f64,
    size: (usize, usize),
    buckets: Vec<Vec<u32>>,
}

impl RayIndex {
    fn new(solid: &[Triangle]) -> Self {
        // Vertical faces never cross a vertical ray. The rest are wound
        // counter-clockwise in XY so the tie breaking rule below is consistent.
        let triangles = (solid.iter())
            .filter_map(|&[a, b, c]| match xy_cross(&a, &b, &c) {
                x if x > 1e-12 => Some([a, b, c]),
                x if x < -1e-12 => Some([a, c, b]),
                _ => None,
            })
            .collect::<Vec<_>>();

        let (min, max) = bounds(&triangles.iter().flatten().copied().collect::<Vec<_>>());
        let (width, height) = ((max.x - min.x).max(EPSILON), (max.y - min.y).max(EPSILON));
        let side = ((triangles.len() as f64).sqrt().ceil() as usize).clamp(1, 1024);
        let cell = (width.max(height) / side as f64).max(EPSILON);
        let size = (
            ((width / cell).ceil() as usize).max(1),
            ((height / cell).ceil() as usize).max(1),
        );

        let mut index = Self {
            triangles: Vec::new(),
            origin: (min.x, min.y),
            cell,
            size,
            buckets: vec![Vec::new(); size.0 * size.1],
        };

        for (idx, triangle) in triangles.iter().enumerate() {
            let (lo, hi) = bounds(triangle);
            let (x0, y0) = index.bucket(lo.x, lo.y);
            let (x1, y1) = index.bucket(hi.x, hi.y);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    index.buckets[y * size.0 + x].push(idx as u32);
                }
            }
        }

        index.triangles = triangles;
        index
    }

    fn bucket(&self, x: f64, y: f64) -> (usize, usize) {
        let cx = ((x - self.origin.0) / self.cell).floor().max(0.0) as usize;
        let cy = ((y - self.origin.1) / self.cell).floor().max(0.0) as usize;
        (cx.min(self.size.0 - 1), cy.min(self.size.1 - 1))
    }

    /// Counts the faces above `point`; an odd count means it is inside.
    fn is_inside(&self, point: &Point) -> bool {
        let (x, y) = self.bucket(point.x, point.y);
        let crossings = self.buckets[y * self.size.0 + x]
            .iter()
            .filter_map(|&t| height_at(&self.triangles[t as usize], point.x, point.y))
            .filter(|&z| z > point.z)
            .count();
        crossings % 2 == 1
    }
}

fn xy_cross(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Height of a counter-clockwise (in XY) triangle above `(x, y)`. Points on
/// an edge belong to the triangle only if it is a top or left edge, so a
/// point on a shared edge is counted once.
fn height_at([a, b, c]: &Triangle, x: f64, y: f64) -> Option<f64> {
    let p = Point::new(x, y, 0.0);
    let mut weights = [0.0; 3];

    for (i, (from, to)) in [(b, c), (c, a), (a, b)].into_iter().enumerate() {
        let edge = xy_cross(from, to, &p);
        let top_left = to.y < from.y || (to.y == from.y && to.x < from.x);
        if edge < 0.0 || (edge == 0.0 && !top_left) {
            return None;
        }
        weights[i] = edge;
    }

    let total = weights.iter().sum::<f64>();
    (total > 0.0).then(|| (weights[0] * a.z + weights[1] * b.z + weights[2] * c.z) / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(mesh: &Mesh) -> f64 {
        (0..mesh.face_count())
            .map(|f| {
                let [a, b, c] = mesh.triangle(f).map(|v| v.map(|x| x as f64));
                a.dot(&b.cross(&c)) / 6.0
            })
            .sum()
    }

    fn cuboid(min: [f32; 3], max: [f32; 3]) -> Mesh {
        box_mesh(Pos::from(min), Pos::from(max))
    }

    #[test]
    fn box_is_closed() {
        let mesh = cuboid([0.0, 0.0, 0.0], [1.0, 2.0, 3.0]);
        assert!(mesh.is_manifold());
        assert!((volume(&mesh) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn overlapping_boxes() {
        let a = cuboid([0.0, 0.0, 0.0], [2.0, 2.0, 2.0]);
        let b = cuboid([1.0, 0.5, 0.5], [3.0, 1.5, 1.5]);
        let out = union(&a, &b).unwrap();

        assert!((volume(&out) - 9.0).abs() < 1e-5, "volume {}", volume(&out));
        let (min, max) = out.bounds();
        assert_eq!(min, Pos::new(0.0, 0.0, 0.0));
        assert_eq!(max, Pos::new(3.0, 2.0, 2.0));
    }

    #[test]
    fn shared_side_faces_are_kept_once() {
        let a = cuboid([0.0, 0.0, 0.0], [2.0, 2.0, 2.0]);
        let b = cuboid([0.0, 0.0, -1.0], [2.0, 2.0, 1.0]);
        let out = union(&a, &b).unwrap();
        assert!((volume(&out) - 12.0).abs() < 1e-5, "volume {}", volume(&out));
    }

    #[test]
    fn contained_mesh_disappears() {
        let a = cuboid([1.0, 1.0, 1.0], [2.0, 2.0, 2.0]);
        let b = cuboid([0.0, 0.0, 0.0], [3.0, 3.0, 3.0]);
        let out = union(&a, &b).unwrap();
        assert!((volume(&out) - 27.0).abs() < 1e-5);
        assert_eq!(out.bounds(), b.bounds());
    }

    #[test]
    fn disjoint_meshes_are_combined() {
        let a = cuboid([0.0, 0.0, 5.0], [1.0, 1.0, 6.0]);
        let b = cuboid([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let out = union(&a, &b).unwrap();
        assert!((volume(&out) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_bad_operands() {
        let a = cuboid([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let mut concave = cuboid([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        concave.append(&cuboid([3.0, 0.0, 0.0], [4.0, 1.0, 1.0]));

        let err = union(&a, &concave).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Boolean));
        assert!(union(&Mesh::default(), &a).is_err());
    }

    #[test]
    fn ray_parity() {
        let solid = triangles(&cuboid([0.0, 0.0, 0.0], [2.0, 2.0, 2.0])).unwrap();
        let index = RayIndex::new(&solid);
        assert!(index.is_inside(&Point::new(1.0, 1.0, 1.0)));
        // On the diagonal shared by both top triangles.
        assert!(index.is_inside(&Point::new(0.5, 1.5, 0.5)));
        assert!(!index.is_inside(&Point::new(1.0, 1.0, 3.0)));
        assert!(!index.is_inside(&Point::new(1.0, 1.0, -1.0)));
        assert!(!index.is_inside(&Point::new(3.0, 1.0, 1.0)));
    }
}

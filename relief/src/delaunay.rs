//! Incremental 2D Delaunay triangulation.
//!
//! Points are inserted one at a time into a triangulation seeded with a large
//! enclosing triangle. Each insertion splits the containing triangle (or the
//! two triangles sharing the edge the point lies on) and then restores the
//! empty circumcircle property with edge flips. Triangles touching the seed
//! vertices are dropped at the end.

use nalgebra::Vector2;
use tracing::debug;

use crate::error::{ReliefError, Result, Stage};

const NONE: u32 = u32::MAX;

/// Relative tolerance for the orientation and incircle predicates.
const EPSILON: f64 = 1e-12;

/// How far the seed triangle reaches past the input bounds, in multiples of
/// the larger bounding box side.
const SEED_SCALE: f64 = 64.0;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    /// Counter-clockwise vertex indices.
    v: [u32; 3],
    /// `n[i]` is the triangle across the edge opposite `v[i]`.
    n: [u32; 3],
}

enum Location {
    Inside,
    Edge(usize),
    Vertex,
}

struct Triangulation {
    points: Vec<Vector2<f64>>,
    triangles: Vec<Triangle>,
    last: u32,
}

/// Triangulates the points, returning counter-clockwise index triples into
/// `points`. Duplicate points are skipped and collinear input produces an
/// empty list rather than an error.
pub fn triangulate(points: &[Vector2<f64>]) -> Result<Vec<[u32; 3]>> {
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(ReliefError::geometry(
            Stage::Triangulation,
            "input contains non-finite points",
        ));
    }

    if points.len() >= (NONE - 3) as usize {
        return Err(ReliefError::geometry(
            Stage::Triangulation,
            format!("too many points ({})", points.len()),
        ));
    }

    if points.len() < 3 {
        return Ok(Vec::new());
    }

    let mut triangulation = Triangulation::new(points);
    let mut skipped = 0;
    for idx in 0..points.len() as u32 {
        if !triangulation.insert(idx)? {
            skipped += 1;
        }
    }

    let count = points.len() as u32;
    let out = (triangulation.triangles.iter())
        .filter(|t| t.v.iter().all(|&x| x < count))
        .map(|t| t.v)
        .collect::<Vec<_>>();

    debug!(
        "Triangulated {} points into {} triangles ({skipped} duplicates skipped)",
        points.len(),
        out.len()
    );
    Ok(out)
}

impl Triangulation {
    fn new(input: &[Vector2<f64>]) -> Self {
        let (min, max) = input.iter().fold(
            (Vector2::repeat(f64::MAX), Vector2::repeat(f64::MIN)),
            |(min, max), p| (min.inf(p), max.sup(p)),
        );
        let center = (min + max) / 2.0;
        let size = (max - min).max().max(1.0) * SEED_SCALE;

        let mut points = Vec::with_capacity(input.len() + 3);
        points.extend_from_slice(input);

        let seed = input.len() as u32;
        points.push(Vector2::new(center.x - size, center.y - size));
        points.push(Vector2::new(center.x + size, center.y - size));
        points.push(Vector2::new(center.x, center.y + size));

        let mut triangles = Vec::with_capacity(input.len() * 2 + 1);
        triangles.push(Triangle {
            v: [seed, seed + 1, seed + 2],
            n: [NONE; 3],
        });

        Self {
            points,
            triangles,
            last: 0,
        }
    }

    fn point(&self, idx: u32) -> Vector2<f64> {
        self.points[idx as usize]
    }

    /// Inserts a point, returning false if it duplicates an existing vertex.
    fn insert(&mut self, p: u32) -> Result<bool> {
        let (t, location) = self.locate(self.point(p))?;
        let mut stack = Vec::new();

        match location {
            Location::Vertex => return Ok(false),
            Location::Inside => self.split_triangle(t, p, &mut stack),
            Location::Edge(i) => self.split_edge(t, i, p, &mut stack)?,
        }

        while let Some((t, i)) = stack.pop() {
            self.legalize(t, i, &mut stack);
        }

        Ok(true)
    }

    /// Finds the triangle containing `point` by walking towards it from the
    /// last inserted triangle, falling back to a linear scan if the walk
    /// does not settle.
    fn locate(&mut self, point: Vector2<f64>) -> Result<(u32, Location)> {
        let mut t = self.last;
        for _ in 0..self.triangles.len() + 3 {
            match self.classify(t, point) {
                Ok(location) => return Ok((t, location)),
                Err(next) if next != NONE => t = next,
                Err(_) => break,
            }
        }

        for t in 0..self.triangles.len() as u32 {
            if let Ok(location) = self.classify(t, point) {
                return Ok((t, location));
            }
        }

        Err(ReliefError::geometry(
            Stage::Triangulation,
            format!("point ({}, {}) is outside the triangulation", point.x, point.y),
        ))
    }

    /// Where `point` sits relative to triangle `t`, or the neighbour to step to
    /// if it is outside.
    fn classify(&self, t: u32, point: Vector2<f64>) -> std::result::Result<Location, u32> {
        let tri = self.triangles[t as usize];
        let mut on_edge = None;
        let mut zeros = 0;

        for i in 0..3 {
            let a = self.point(tri.v[(i + 1) % 3]);
            let b = self.point(tri.v[(i + 2) % 3]);
            match orient(a, b, point) {
                x if x < 0 => return Err(tri.n[i]),
                0 => {
                    zeros += 1;
                    on_edge = Some(i);
                }
                _ => {}
            }
        }

        Ok(match (zeros, on_edge) {
            (0, _) => Location::Inside,
            (1, Some(i)) => Location::Edge(i),
            _ => Location::Vertex,
        })
    }

    fn push(&mut self, v: [u32; 3], n: [u32; 3]) -> u32 {
        self.triangles.push(Triangle { v, n });
        (self.triangles.len() - 1) as u32
    }

    fn set(&mut self, t: u32, v: [u32; 3], n: [u32; 3]) {
        self.triangles[t as usize] = Triangle { v, n };
    }

    /// Points the neighbour link of `t` that referenced `old` at `new`.
    fn relink(&mut self, t: u32, old: u32, new: u32) {
        if t == NONE {
            return;
        }

        let tri = &mut self.triangles[t as usize];
        if let Some(slot) = tri.n.iter_mut().find(|x| **x == old) {
            *slot = new;
        }
    }

    fn split_triangle(&mut self, t: u32, p: u32, stack: &mut Vec<(u32, usize)>) {
        let Triangle {
            v: [a, b, c],
            n: [na, nb, nc],
        } = self.triangles[t as usize];

        let t1 = self.push([a, p, c], [t, nb, NONE]);
        let t2 = self.push([a, b, p], [t, t1, nc]);
        self.triangles[t1 as usize].n[2] = t2;
        self.set(t, [p, b, c], [na, t1, t2]);

        self.relink(nb, t, t1);
        self.relink(nc, t, t2);
        self.last = t;

        stack.extend([(t, 0), (t1, 1), (t2, 2)]);
    }

    fn split_edge(
        &mut self,
        t: u32,
        i: usize,
        p: u32,
        stack: &mut Vec<(u32, usize)>,
    ) -> Result<()> {
        let tri = self.triangles[t as usize];
        let (a, b, c) = (tri.v[i], tri.v[(i + 1) % 3], tri.v[(i + 2) % 3]);
        let (u, nb_t, nc_t) = (tri.n[i], tri.n[(i + 1) % 3], tri.n[(i + 2) % 3]);

        if u == NONE {
            return Err(ReliefError::geometry(
                Stage::Triangulation,
                "point lies on the outer boundary",
            ));
        }

        let other = self.triangles[u as usize];
        let Some(j) = other.n.iter().position(|&x| x == t) else {
            return Err(ReliefError::geometry(
                Stage::Triangulation,
                "inconsistent triangle adjacency",
            ));
        };
        let d = other.v[j];
        let (nu_c, nu_b) = (other.n[(j + 1) % 3], other.n[(j + 2) % 3]);

        let t1 = self.push([a, p, c], [u, nb_t, t]);
        let t3 = self.push([d, p, b], [t, nu_c, u]);
        self.set(t, [a, b, p], [t3, t1, nc_t]);
        self.set(u, [d, c, p], [t1, t3, nu_b]);

        self.relink(nb_t, t, t1);
        self.relink(nu_c, u, t3);
        self.last = t;

        stack.extend([(t, 2), (t1, 1), (u, 2), (t3, 1)]);
        Ok(())
    }

    /// Flips the edge opposite `v[i]` of triangle `t` if the vertex across it
    /// lies inside the circumcircle of `t`.
    fn legalize(&mut self, t: u32, i: usize, stack: &mut Vec<(u32, usize)>) {
        let tri = self.triangles[t as usize];
        let u = tri.n[i];
        if u == NONE {
            return;
        }

        let (p, b, c) = (tri.v[i], tri.v[(i + 1) % 3], tri.v[(i + 2) % 3]);
        let other = self.triangles[u as usize];
        let Some(j) = other.n.iter().position(|&x| x == t) else {
            return;
        };
        let d = other.v[j];

        let [pp, pb, pc, pd] = [p, b, c, d].map(|x| self.point(x));
        if incircle(pp, pb, pc, pd) <= 0 {
            return;
        }

        // Convexity guard for near degenerate quads.
        if orient(pp, pb, pd) <= 0 || orient(pp, pd, pc) <= 0 {
            return;
        }

        let (n_t_b, n_t_c) = (tri.n[(i + 1) % 3], tri.n[(i + 2) % 3]);
        let (u_c, u_b) = (other.n[(j + 1) % 3], other.n[(j + 2) % 3]);

        self.set(t, [p, b, d], [u_c, u, n_t_c]);
        self.set(u, [p, d, c], [u_b, n_t_b, t]);
        self.relink(u_c, u, t);
        self.relink(n_t_b, t, u);

        stack.extend([(t, 0), (u, 0)]);
    }
}

/// Sign of the signed area of `abc`: positive when counter-clockwise.
fn orient(a: Vector2<f64>, b: Vector2<f64>, c: Vector2<f64>) -> i8 {
    let left = (b.x - a.x) * (c.y - a.y);
    let right = (b.y - a.y) * (c.x - a.x);
    sign(left - right, left.abs() + right.abs())
}

/// Positive when `d` lies strictly inside the circumcircle of the
/// counter-clockwise triangle `abc`.
fn incircle(a: Vector2<f64>, b: Vector2<f64>, c: Vector2<f64>, d: Vector2<f64>) -> i8 {
    let (ad, bd, cd) = (a - d, b - d, c - d);
    let (al, bl, cl) = (ad.norm_squared(), bd.norm_squared(), cd.norm_squared());

    let (bc1, bc2) = (bd.x * cd.y, cd.x * bd.y);
    let (ca1, ca2) = (cd.x * ad.y, ad.x * cd.y);
    let (ab1, ab2) = (ad.x * bd.y, bd.x * ad.y);

    let det = al * (bc1 - bc2) + bl * (ca1 - ca2) + cl * (ab1 - ab2);
    let permanent = al * (bc1.abs() + bc2.abs())
        + bl * (ca1.abs() + ca2.abs())
        + cl * (ab1.abs() + ab2.abs());
    sign(det, permanent)
}

fn sign(value: f64, magnitude: f64) -> i8 {
    if value.abs() <= EPSILON * magnitude {
        0
    } else if value > 0.0 {
        1
    } else {
        -1
    }
}

//! Optical surfaces: a local frame plus a shape.
//!
//! The shape is defined in the surface's own frame with the z-axis as the
//! surface normal at the vertex. Intersection math follows the usual
//! line-plane and line-sphere formulas.

use crate::frame::Frame;
use nalgebra::{Matrix3xX, Vector3};
use std::sync::Arc;

/// Geometric shape of a surface in its local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    /// The plane z = 0.
    Plane,
    /// Spherical cap through the origin with center at (0, 0, radius).
    /// Positive radius curves away from the incoming -z side.
    Sphere { radius: f64 },
}

/// A surface: shape geometry attached to a coordinate frame that must be
/// connected to the owning element's root frame.
#[derive(Debug, Clone)]
pub struct Surface {
    frame: Arc<Frame>,
    shape: Shape,
    name: String,
}

/// Intersection distances for a bundle of rays.
pub struct Intersection {
    /// Signed distance along each (unit) ray direction.
    pub t: Vec<f64>,
    /// False where the ray misses or the hit lies behind the ray.
    pub hit: Vec<bool>,
}

impl Surface {
    pub fn new(frame: Arc<Frame>, shape: Shape) -> Self {
        Surface {
            frame,
            shape,
            name: String::new(),
        }
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Outward unit normal at a local point, in local coordinates.
    pub fn local_normal(&self, p: Vector3<f64>) -> Vector3<f64> {
        match self.shape {
            Shape::Plane => Vector3::z(),
            Shape::Sphere { radius } => {
                let center = Vector3::new(0.0, 0.0, radius);
                ((center - p) / radius).normalize()
            }
        }
    }

    /// Intersect global-frame rays `(x, d)` with this surface; `d` columns
    /// must be unit vectors. Distances are returned per ray; misses and
    /// backward hits are flagged.
    pub fn intersect(&self, x: &Matrix3xX<f64>, d: &Matrix3xX<f64>) -> Intersection {
        let xl = self.frame.points_to_local(x);
        let dl = self.frame.directions_to_local(d);
        let n = x.ncols();
        let mut t = vec![0.0; n];
        let mut hit = vec![false; n];
        for i in 0..n {
            let o = xl.column(i);
            let dir = dl.column(i);
            match self.shape {
                Shape::Plane => {
                    if dir.z.abs() > 1e-14 {
                        t[i] = -o.z / dir.z;
                        hit[i] = t[i] >= 0.0;
                    }
                }
                Shape::Sphere { radius } => {
                    let center = Vector3::new(0.0, 0.0, radius);
                    let delta = o - center;
                    let ud = dir.dot(&delta);
                    let under = ud * ud - delta.norm_squared() + radius * radius;
                    if under >= 0.0 {
                        // nearest forward intersection
                        let s = under.sqrt();
                        let t0 = -ud - s;
                        let t1 = -ud + s;
                        let tt = if t0 >= 0.0 { t0 } else { t1 };
                        if tt >= 0.0 {
                            t[i] = tt;
                            hit[i] = true;
                        }
                    }
                }
            }
        }
        Intersection { t, hit }
    }
}

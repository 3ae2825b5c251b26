//! Local coordinate frames for surfaces and materials.
//!
//! Frames form an immutable tree: each frame is either a root or a child of
//! another frame, offset by a translation and a rotation. The global
//! decomposition is cached at construction, so transforms never walk the
//! tree. Connectivity checks do walk it, comparing nodes by pointer
//! identity.

use nalgebra::{Matrix3, Matrix3xX, Rotation3, Vector3};
use num_complex::Complex64;
use std::sync::Arc;

/// A node in the local-coordinate-frame tree.
#[derive(Debug)]
pub struct Frame {
    parent: Option<Arc<Frame>>,
    /// Rotation of this frame's axes, expressed in the global frame.
    rot_global: Matrix3<f64>,
    rot_global_c: Matrix3<Complex64>,
    /// Origin of this frame, expressed in the global frame.
    origin_global: Vector3<f64>,
}

impl Frame {
    /// Create a root frame coincident with the global frame.
    pub fn root() -> Arc<Self> {
        Arc::new(Frame {
            parent: None,
            rot_global: Matrix3::identity(),
            rot_global_c: Matrix3::identity(),
            origin_global: Vector3::zeros(),
        })
    }

    /// Create a child frame, translated by `offset` and rotated by
    /// `rotation` relative to `parent`.
    pub fn child(parent: &Arc<Frame>, offset: Vector3<f64>, rotation: Rotation3<f64>) -> Arc<Self> {
        let rot_global = parent.rot_global * rotation.into_inner();
        Arc::new(Frame {
            parent: Some(Arc::clone(parent)),
            rot_global,
            rot_global_c: rot_global.map(|v| Complex64::new(v, 0.0)),
            origin_global: parent.origin_global + parent.rot_global * offset,
        })
    }

    /// Whether `self` is `root` or transitively a child of it.
    pub fn is_connected_to(self: &Arc<Self>, root: &Arc<Frame>) -> bool {
        let mut node = Arc::clone(self);
        loop {
            if Arc::ptr_eq(&node, root) {
                return true;
            }
            match &node.parent {
                Some(p) => node = Arc::clone(p),
                None => return false,
            }
        }
    }

    pub fn origin_global(&self) -> Vector3<f64> {
        self.origin_global
    }

    /// Global z-axis of this frame (the surface normal direction for
    /// surfaces defined in their own frame).
    pub fn z_axis_global(&self) -> Vector3<f64> {
        self.rot_global.column(2).into_owned()
    }

    /// Transform a 3×N matrix of global points into this frame.
    pub fn points_to_local(&self, p: &Matrix3xX<f64>) -> Matrix3xX<f64> {
        let mut q = p.clone_owned();
        for mut col in q.column_iter_mut() {
            col -= self.origin_global;
        }
        self.rot_global.transpose() * q
    }

    /// Transform a 3×N matrix of local points into the global frame.
    pub fn points_to_global(&self, p: &Matrix3xX<f64>) -> Matrix3xX<f64> {
        let mut q = self.rot_global * p;
        for mut col in q.column_iter_mut() {
            col += self.origin_global;
        }
        q
    }

    /// Transform global direction vectors into this frame. Directions are
    /// unaffected by the frame origin.
    pub fn directions_to_local(&self, d: &Matrix3xX<f64>) -> Matrix3xX<f64> {
        self.rot_global.transpose() * d
    }

    pub fn directions_to_global(&self, d: &Matrix3xX<f64>) -> Matrix3xX<f64> {
        self.rot_global * d
    }

    /// Complex-valued variant for wavevectors carrying evanescent parts.
    pub fn cdirections_to_local(&self, d: &Matrix3xX<Complex64>) -> Matrix3xX<Complex64> {
        self.rot_global_c.transpose() * d
    }

    pub fn cdirections_to_global(&self, d: &Matrix3xX<Complex64>) -> Matrix3xX<Complex64> {
        self.rot_global_c * d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn point_roundtrip_through_nested_frames() {
        let root = Frame::root();
        let a = Frame::child(
            &root,
            Vector3::new(0.0, 0.0, 10.0),
            Rotation3::from_euler_angles(0.1, -0.2, 0.3),
        );
        let b = Frame::child(
            &a,
            Vector3::new(1.0, -2.0, 3.0),
            Rotation3::from_euler_angles(-0.5, 0.4, 0.0),
        );
        let p = Matrix3xX::from_column_slice(&[0.3, -0.7, 2.0, 1.0, 1.0, 1.0]);
        let local = b.points_to_local(&p);
        let back = b.points_to_global(&local);
        assert_relative_eq!(p, back, epsilon = 1e-12);
    }

    #[test]
    fn rotated_frame_maps_axes() {
        let root = Frame::root();
        // rotate by 90 degrees about x: global +z is the local +y axis
        let f = Frame::child(
            &root,
            Vector3::zeros(),
            Rotation3::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2),
        );
        let d = Matrix3xX::from_column_slice(&[0.0, 0.0, 1.0]);
        let local = f.directions_to_local(&d);
        assert_relative_eq!(local[(0, 0)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(local[(1, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(local[(2, 0)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn connectivity_walks_parents_only() {
        let root = Frame::root();
        let other_root = Frame::root();
        let a = Frame::child(&root, Vector3::zeros(), Rotation3::identity());
        let b = Frame::child(&a, Vector3::new(0.0, 0.0, 1.0), Rotation3::identity());
        assert!(b.is_connected_to(&root));
        assert!(a.is_connected_to(&root));
        assert!(!b.is_connected_to(&other_root));
        assert!(!root.is_connected_to(&a));
    }
}

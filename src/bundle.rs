//! Ray bundles, bundle arena, and traced ray paths.
//!
//! A `RayBundle` is the moving numerical state of a trace: a finite ordered
//! set of rays sharing one wavelength, with a per-step history of positions
//! and wavevectors. Bundles are immutable once recorded on a path except
//! for `append`, which extends a bundle's own trajectory.
//!
//! Branching never deep-copies histories. All bundles live in a
//! `BundleArena`; a `RayPath` is just an ordered list of arena indices, so
//! cloning a path on a branch clones the index list only.

use crate::error::TraceError;
use nalgebra::Matrix3xX;
use num_complex::Complex64;

/// Index of a bundle inside a `BundleArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleId(pub(crate) usize);

/// An ordered set of rays sharing one wavelength, with trace history.
#[derive(Debug, Clone)]
pub struct RayBundle {
    /// Position snapshots, one 3×N matrix per trace step, in meters.
    x: Vec<Matrix3xX<f64>>,
    /// Wavevector snapshots; complex to carry evanescent/absorptive parts.
    /// Scaled so |k| equals the refractive index of the ambient medium.
    k: Vec<Matrix3xX<Complex64>>,
    /// Electric field snapshots, carried along untouched by the tracer.
    efield: Vec<Matrix3xX<Complex64>>,
    /// Per-step validity masks; a blocked ray stays in the bundle.
    valid: Vec<Vec<bool>>,
    /// Stable per-ray identifiers, constant across steps.
    ray_id: Vec<usize>,
    wavelength: f64,
}

impl RayBundle {
    /// Create a bundle from its initial state. `efield` defaults to zero
    /// when absent. Fails if the per-ray arrays disagree in ray count.
    pub fn new(
        x0: Matrix3xX<f64>,
        k0: Matrix3xX<Complex64>,
        efield0: Option<Matrix3xX<Complex64>>,
        ray_id: Vec<usize>,
        wavelength: f64,
    ) -> Result<Self, TraceError> {
        let n = x0.ncols();
        let efield0 = efield0.unwrap_or_else(|| Matrix3xX::zeros(n));
        for got in [k0.ncols(), efield0.ncols(), ray_id.len()] {
            if got != n {
                return Err(TraceError::ShapeMismatch { expected: n, got });
            }
        }
        Ok(RayBundle {
            x: vec![x0],
            k: vec![k0],
            efield: vec![efield0],
            valid: vec![vec![true; n]],
            ray_id,
            wavelength,
        })
    }

    /// Extend this bundle's own trajectory by one step.
    pub fn append(
        &mut self,
        x: Matrix3xX<f64>,
        k: Matrix3xX<Complex64>,
        efield: Matrix3xX<Complex64>,
        valid: Vec<bool>,
    ) -> Result<(), TraceError> {
        let n = self.num_rays();
        for got in [x.ncols(), k.ncols(), efield.ncols(), valid.len()] {
            if got != n {
                return Err(TraceError::ShapeMismatch { expected: n, got });
            }
        }
        self.x.push(x);
        self.k.push(k);
        self.efield.push(efield);
        self.valid.push(valid);
        Ok(())
    }

    /// Replace the initial validity mask, used when an interaction blocks
    /// rays in the bundle it creates.
    pub(crate) fn with_valid(mut self, valid: Vec<bool>) -> Self {
        debug_assert_eq!(valid.len(), self.num_rays());
        *self.valid.last_mut().unwrap() = valid;
        self
    }

    pub fn num_rays(&self) -> usize {
        self.ray_id.len()
    }

    /// Number of recorded trajectory steps.
    pub fn num_steps(&self) -> usize {
        self.x.len()
    }

    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    pub fn ray_ids(&self) -> &[usize] {
        &self.ray_id
    }

    pub fn first_x(&self) -> &Matrix3xX<f64> {
        &self.x[0]
    }

    pub fn first_k(&self) -> &Matrix3xX<Complex64> {
        &self.k[0]
    }

    pub fn last_x(&self) -> &Matrix3xX<f64> {
        self.x.last().unwrap()
    }

    pub fn last_k(&self) -> &Matrix3xX<Complex64> {
        self.k.last().unwrap()
    }

    pub fn last_efield(&self) -> &Matrix3xX<Complex64> {
        self.efield.last().unwrap()
    }

    pub fn last_valid(&self) -> &[bool] {
        self.valid.last().unwrap()
    }

    pub fn step_x(&self, step: usize) -> &Matrix3xX<f64> {
        &self.x[step]
    }

    pub fn step_k(&self, step: usize) -> &Matrix3xX<Complex64> {
        &self.k[step]
    }
}

/// Owns every bundle recorded during one trace.
#[derive(Debug, Default)]
pub struct BundleArena {
    bundles: Vec<RayBundle>,
}

impl BundleArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bundle: RayBundle) -> BundleId {
        self.bundles.push(bundle);
        BundleId(self.bundles.len() - 1)
    }

    pub fn get(&self, id: BundleId) -> &RayBundle {
        &self.bundles[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: BundleId) -> &mut RayBundle {
        &mut self.bundles[id.0]
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// One coherent, non-branching trace: an ordered list of arena indices,
/// one bundle snapshot per surface hit.
#[derive(Debug, Clone)]
pub struct RayPath {
    bundles: Vec<BundleId>,
}

impl RayPath {
    pub fn new(initial: BundleId) -> Self {
        RayPath {
            bundles: vec![initial],
        }
    }

    pub fn append(&mut self, id: BundleId) {
        self.bundles.push(id);
    }

    pub fn trailing(&self) -> BundleId {
        *self.bundles.last().unwrap()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn ids(&self) -> &[BundleId] {
        &self.bundles
    }
}

/// Result of a sequential trace: the arena plus every completed path.
///
/// Path order is part of the contract: path 0 is the unbranched
/// continuation, and at each sequence step newly created branches are
/// appended after all existing paths, in path-order × outgoing-bundle-order.
#[derive(Debug)]
pub struct TraceResult {
    pub(crate) arena: BundleArena,
    pub(crate) paths: Vec<RayPath>,
}

impl TraceResult {
    pub fn num_paths(&self) -> usize {
        self.paths.len()
    }

    pub fn path(&self, idx: usize) -> Option<&RayPath> {
        self.paths.get(idx)
    }

    pub fn arena(&self) -> &BundleArena {
        &self.arena
    }

    /// Iterate over the bundles of one path, in hit order.
    pub fn path_bundles(&self, idx: usize) -> impl Iterator<Item = &RayBundle> + '_ {
        self.paths[idx].ids().iter().map(move |&id| self.arena.get(id))
    }

    /// Clone one path's bundles out of the arena, in hit order.
    pub fn path_to_bundles(&self, idx: usize) -> Result<Vec<RayBundle>, TraceError> {
        if idx >= self.paths.len() {
            return Err(TraceError::PilotPathOutOfRange {
                requested: idx,
                available: self.paths.len(),
            });
        }
        Ok(self.path_bundles(idx).cloned().collect())
    }
}

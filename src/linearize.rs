//! Pilot-ray linearization: best-fit local transfer matrices.
//!
//! A pilot bundle is one reference (chief) ray plus a small cloud of
//! transverse/angular perturbations around it. Tracing it through the
//! sequence and fitting input against output states per hit interval gives
//! a linear transfer matrix for each interval, so nearby rays can be
//! propagated without full nonlinear retracing.
//!
//! Per hit the transfer is composed from three fitted stages: refraction
//! at the start surface, free-space propagation to the end surface (both
//! in the start surface frame), and the coordinate change into the end
//! surface frame. Each stage is a least-squares fit `T = (Y Xᵗ)(X Xᵗ)⁻¹`
//! over the reduced perturbation states.

use crate::bundle::RayBundle;
use crate::element::OpticalElement;
use crate::error::TraceError;
use crate::hitlist::{sequence_to_hitlist, HitKey, Sequence};
use crate::material::MaterialHandle;
use nalgebra::{DMatrix, Matrix2, Matrix3xX};
use num_complex::Complex64;
use num_traits::One;
use serde::Serialize;
use std::collections::HashMap;

/// Tolerance below which fit sub-blocks and residues count as zero.
pub const NUMERICAL_TOLERANCE: f64 = 1e-10;

/// Condition numbers above this raise a diagnostics advisory.
const CONDITION_LIMIT: f64 = 1e12;

/// Reduced-state layout used for fitting and differential propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinearizationMode {
    /// 4 rows: transverse position x2, complex transverse direction x2.
    Real4,
    /// 6 rows: transverse position x2, direction real x2, direction
    /// imaginary x2. Use this when wavevectors carry imaginary parts.
    SplitComplex6,
}

impl LinearizationMode {
    pub fn rows(self) -> usize {
        match self {
            LinearizationMode::Real4 => 4,
            LinearizationMode::SplitComplex6 => 6,
        }
    }
}

/// Advisory events from the linearizer. The computation proceeds past all
/// of these with a documented fallback; callers decide whether to retry
/// with another mode or tolerance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Advisory {
    /// A direction sub-block of a stage fit was near zero and was replaced
    /// by identity to keep the normal equations invertible.
    NearSingularBlock { hit: HitKey, stage: &'static str },
    /// A 4-row transfer carries non-negligible imaginary values; the
    /// 6-row mode represents this data faithfully.
    ImaginaryResidue { hit: HitKey },
    /// The composed transfer is poorly conditioned.
    HighConditionNumber { hit: HitKey, cond: f64 },
}

/// Transfer matrices keyed by disambiguated hit. The reverse key of every
/// entry maps to the matrix inverse. Built fresh per linearization call.
#[derive(Debug, Default)]
pub struct TransferTable {
    matrices: HashMap<HitKey, DMatrix<Complex64>>,
}

impl TransferTable {
    pub fn get(&self, key: &HitKey) -> Option<&DMatrix<Complex64>> {
        self.matrices.get(key)
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HitKey, &DMatrix<Complex64>)> {
        self.matrices.iter()
    }
}

/// Selected pilot path, its transfer table, and fit diagnostics.
#[derive(Debug)]
pub struct PilotLinearization {
    pub pilot: Vec<RayBundle>,
    pub table: TransferTable,
    pub advisories: Vec<Advisory>,
}

/// Drop the reference ray (column 0) after subtracting it, and keep only
/// the two transverse rows: the chief ray becomes the local origin.
fn reduce_positions(m: &Matrix3xX<f64>) -> DMatrix<f64> {
    let n = m.ncols();
    let mut out = DMatrix::zeros(2, n - 1);
    for j in 1..n {
        for r in 0..2 {
            out[(r, j - 1)] = m[(r, j)] - m[(r, 0)];
        }
    }
    out
}

fn reduce_directions(m: &Matrix3xX<Complex64>) -> DMatrix<Complex64> {
    let n = m.ncols();
    let mut out = DMatrix::zeros(2, n - 1);
    for j in 1..n {
        for r in 0..2 {
            out[(r, j - 1)] = m[(r, j)] - m[(r, 0)];
        }
    }
    out
}

/// Stack reduced position and direction blocks into the mode's state
/// layout, as a complex matrix in either mode.
pub(crate) fn stack_state(
    xred: &DMatrix<f64>,
    kred: &DMatrix<Complex64>,
    mode: LinearizationMode,
) -> DMatrix<Complex64> {
    let n = xred.ncols();
    let mut state = DMatrix::zeros(mode.rows(), n);
    for j in 0..n {
        for r in 0..2 {
            state[(r, j)] = Complex64::new(xred[(r, j)], 0.0);
        }
        match mode {
            LinearizationMode::Real4 => {
                for r in 0..2 {
                    state[(2 + r, j)] = kred[(r, j)];
                }
            }
            LinearizationMode::SplitComplex6 => {
                for r in 0..2 {
                    state[(2 + r, j)] = Complex64::new(kred[(r, j)].re, 0.0);
                    state[(4 + r, j)] = Complex64::new(kred[(r, j)].im, 0.0);
                }
            }
        }
    }
    state
}

/// Least-squares fit of the linear map X -> Y.
fn best_fit_transfer(
    x: &DMatrix<Complex64>,
    y: &DMatrix<Complex64>,
    mode: LinearizationMode,
    hit: &HitKey,
    stage: &'static str,
    advisories: &mut Vec<Advisory>,
) -> Result<DMatrix<Complex64>, TraceError> {
    let mut xx = x * x.transpose();
    let mut yx = y * x.transpose();

    if mode == LinearizationMode::SplitComplex6 {
        let x_imag = x.rows(4, 2);
        let y_imag = y.rows(4, 2);
        if x_imag.norm() < NUMERICAL_TOLERANCE || y_imag.norm() < NUMERICAL_TOLERANCE {
            log::warn!(
                "{} fit at {:?}: direction-imaginary rows are zero, substituting identity",
                stage,
                hit
            );
            advisories.push(Advisory::NearSingularBlock {
                hit: hit.clone(),
                stage,
            });
            let eye = Matrix2::from_diagonal_element(Complex64::one());
            xx.view_mut((4, 4), (2, 2)).copy_from(&eye);
            yx.view_mut((4, 4), (2, 2)).copy_from(&eye);
        }
    }

    let xx_inv = xx
        .try_inverse()
        .ok_or(TraceError::SingularFit(stage))?;
    let transfer = yx * xx_inv;

    if mode == LinearizationMode::Real4 {
        let imag_norm: f64 = transfer
            .iter()
            .map(|c| c.im * c.im)
            .sum::<f64>()
            .sqrt();
        if imag_norm > NUMERICAL_TOLERANCE {
            log::warn!(
                "{} fit at {:?}: transfer has imaginary residue {:e}, consider the 6-row mode",
                stage,
                hit,
                imag_norm
            );
            advisories.push(Advisory::ImaginaryResidue { hit: hit.clone() });
        }
    }

    log::debug!("{} transfer at {:?}: {:.5}", stage, hit, transfer);
    Ok(transfer)
}

impl OpticalElement {
    /// Trace the pilot bundle and fit per-hit transfer matrices.
    ///
    /// Ray 0 of `pilot_bundle` is the chief ray; the remaining rays must
    /// perturb it transversely and angularly enough to span the reduced
    /// state space, or the stage fits turn singular. The pilot is traced
    /// with branch splitting enabled and `pilot_path_nr` selects one
    /// resulting path, in the ordering documented on
    /// [`OpticalElement::seqtrace`].
    ///
    /// Returns the selected pilot path, the table holding the forward
    /// transfer under each hit key and its inverse under the reversed key,
    /// and any numerical advisories.
    pub fn calculate_xyuv(
        &self,
        pilot_bundle: RayBundle,
        sequence: &Sequence,
        background: &MaterialHandle,
        pilot_path_nr: usize,
        mode: LinearizationMode,
    ) -> Result<PilotLinearization, TraceError> {
        if pilot_bundle.num_rays() < 2 {
            return Err(TraceError::DegeneratePilotBundle);
        }
        let (hitlist, _options) = sequence_to_hitlist(sequence);

        let traced = self.seqtrace(pilot_bundle, sequence, background, true)?;
        log::info!(
            "pilot trace produced {} paths, selecting {}",
            traced.num_paths(),
            pilot_path_nr
        );
        let pilot = traced.path_to_bundles(pilot_path_nr)?;

        let mut table = TransferTable::default();
        let mut advisories = Vec::new();

        for ((pb1, pb2), hit) in pilot.iter().zip(&pilot[1..]).zip(&hitlist) {
            let lc_start = self.surface(&hit.start)?.frame().clone();
            let lc_end = self.surface(&hit.end)?.frame().clone();

            // before the interaction, in the start frame
            let startx = reduce_positions(&lc_start.points_to_local(pb1.last_x()));
            let startk = reduce_directions(&lc_start.cdirections_to_local(pb1.last_k()));
            // immediately after the interaction, still in the start frame
            let fspropx = reduce_positions(&lc_start.points_to_local(pb2.first_x()));
            let fspropk = reduce_directions(&lc_start.cdirections_to_local(pb2.first_k()));
            // propagated to the end surface, start frame
            let endx_s = reduce_positions(&lc_start.points_to_local(pb2.last_x()));
            let endk_s = reduce_directions(&lc_start.cdirections_to_local(pb2.last_k()));
            // same point expressed in the end frame
            let endx = reduce_positions(&lc_end.points_to_local(pb2.last_x()));
            let endk = reduce_directions(&lc_end.cdirections_to_local(pb2.last_k()));

            let start_m = stack_state(&startx, &startk, mode);
            let fsprop_m = stack_state(&fspropx, &fspropk, mode);
            let end_s_m = stack_state(&endx_s, &endk_s, mode);
            let end_m = stack_state(&endx, &endk, mode);

            let refract_m =
                best_fit_transfer(&start_m, &fsprop_m, mode, hit, "refraction", &mut advisories)?;
            let propagate_m =
                best_fit_transfer(&fsprop_m, &end_s_m, mode, hit, "propagation", &mut advisories)?;
            let trafo_m = best_fit_transfer(
                &end_s_m,
                &end_m,
                mode,
                hit,
                "coordinate transform",
                &mut advisories,
            )?;

            let transfer = trafo_m * propagate_m * refract_m;

            let sv = transfer.clone().singular_values();
            let cond = if sv.min() > 0.0 {
                sv.max() / sv.min()
            } else {
                f64::INFINITY
            };
            log::debug!("transfer at {:?}: condition number {:e}", hit, cond);
            if cond > CONDITION_LIMIT {
                advisories.push(Advisory::HighConditionNumber {
                    hit: hit.clone(),
                    cond,
                });
            }

            let inverse = transfer
                .clone()
                .try_inverse()
                .ok_or(TraceError::SingularTransfer)?;
            table.matrices.insert(hit.clone(), transfer);
            table.matrices.insert(hit.reversed(), inverse);
        }

        Ok(PilotLinearization {
            pilot,
            table,
            advisories,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::hitlist::SurfaceOptions;
    use crate::material::ConstantIndexGlass;
    use crate::surface::{Shape, Surface};
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Vector3};
    use num_traits::Zero;
    use std::sync::Arc;

    const WAVE: f64 = 550e-9;

    /// Chief ray along +z plus position and angle perturbations spanning
    /// the transverse state space.
    pub(crate) fn pilot_bundle(dx: f64, du: f64) -> RayBundle {
        let offsets: [(f64, f64, f64, f64); 9] = [
            (0.0, 0.0, 0.0, 0.0),
            (dx, 0.0, 0.0, 0.0),
            (-dx, 0.0, 0.0, 0.0),
            (0.0, dx, 0.0, 0.0),
            (0.0, -dx, 0.0, 0.0),
            (0.0, 0.0, du, 0.0),
            (0.0, 0.0, -du, 0.0),
            (0.0, 0.0, 0.0, du),
            (0.0, 0.0, 0.0, -du),
        ];
        let n = offsets.len();
        let mut x = Matrix3xX::zeros(n);
        let mut k = Matrix3xX::from_element(n, Complex64::zero());
        for (j, (px, py, u, v)) in offsets.iter().enumerate() {
            x[(0, j)] = *px;
            x[(1, j)] = *py;
            let kz = (1.0 - u * u - v * v).sqrt();
            k[(0, j)] = Complex64::new(*u, 0.0);
            k[(1, j)] = Complex64::new(*v, 0.0);
            k[(2, j)] = Complex64::new(kz, 0.0);
        }
        RayBundle::new(x, k, None, (0..n).collect(), WAVE).unwrap()
    }

    pub(crate) struct FreeSpace {
        pub element: OpticalElement,
        pub background: MaterialHandle,
        pub distance: f64,
    }

    /// Two flat surfaces in vacuum separated by `distance`: identity
    /// refraction, pure free-space propagation.
    pub(crate) fn free_space_system(distance: f64) -> FreeSpace {
        let root = Frame::root();
        let f1 = Frame::child(&root, Vector3::new(0.0, 0.0, 1.0), Rotation3::identity());
        let f2 = Frame::child(
            &root,
            Vector3::new(0.0, 0.0, 1.0 + distance),
            Rotation3::identity(),
        );
        let mut element = OpticalElement::new(Arc::clone(&root));
        element
            .add_surface("front", Surface::new(f1, Shape::Plane), ("air", "air"), "")
            .unwrap();
        element
            .add_surface("back", Surface::new(f2, Shape::Plane), ("air", "air"), "")
            .unwrap();
        let background: MaterialHandle = ConstantIndexGlass::vacuum(root);
        FreeSpace {
            element,
            background,
            distance,
        }
    }

    pub(crate) fn two_surface_sequence() -> Sequence {
        vec![
            ("front".to_string(), SurfaceOptions::refracting()),
            ("back".to_string(), SurfaceOptions::refracting()),
        ]
    }

    #[test]
    fn free_space_transfer_is_translation_like() {
        let d = 0.5;
        let setup = free_space_system(d);
        let lin = setup
            .element
            .calculate_xyuv(
                pilot_bundle(1e-6, 1e-6),
                &two_surface_sequence(),
                &setup.background,
                0,
                LinearizationMode::Real4,
            )
            .unwrap();
        let t = lin.table.get(&HitKey::new("front", "back", 1)).unwrap();
        // independent closed form: x' = x + d u, u' = u
        let mut expected = DMatrix::from_element(4, 4, Complex64::zero());
        for i in 0..4 {
            expected[(i, i)] = Complex64::one();
        }
        expected[(0, 2)] = Complex64::new(d, 0.0);
        expected[(1, 3)] = Complex64::new(d, 0.0);
        assert_relative_eq!((t - &expected).norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn reverse_key_holds_the_algebraic_inverse() {
        let setup = free_space_system(0.25);
        let lin = setup
            .element
            .calculate_xyuv(
                pilot_bundle(1e-6, 1e-6),
                &two_surface_sequence(),
                &setup.background,
                0,
                LinearizationMode::Real4,
            )
            .unwrap();
        let fwd = lin.table.get(&HitKey::new("front", "back", 1)).unwrap();
        let rev = lin.table.get(&HitKey::new("back", "front", 1)).unwrap();
        let product = fwd * rev;
        let eye = DMatrix::from_diagonal_element(4, 4, Complex64::one());
        assert_relative_eq!((product - eye).norm(), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn linearization_is_idempotent() {
        let setup = free_space_system(0.7);
        let run = || {
            setup
                .element
                .calculate_xyuv(
                    pilot_bundle(1e-6, 1e-6),
                    &two_surface_sequence(),
                    &setup.background,
                    0,
                    LinearizationMode::Real4,
                )
                .unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.table.len(), b.table.len());
        for (key, matrix) in a.table.iter() {
            assert_eq!(matrix, b.table.get(key).unwrap());
        }
    }

    #[test]
    fn six_row_mode_substitutes_identity_for_zero_imag_block() {
        let setup = free_space_system(0.5);
        let lin = setup
            .element
            .calculate_xyuv(
                pilot_bundle(1e-6, 1e-6),
                &two_surface_sequence(),
                &setup.background,
                0,
                LinearizationMode::SplitComplex6,
            )
            .unwrap();
        assert!(lin
            .advisories
            .iter()
            .any(|a| matches!(a, Advisory::NearSingularBlock { .. })));
        let t = lin.table.get(&HitKey::new("front", "back", 1)).unwrap();
        assert_eq!(t.nrows(), 6);
        // top-left block still the free-space transfer
        assert_relative_eq!(t[(0, 2)].re, 0.5, epsilon = 1e-5);
        // imaginary block pinned to identity
        assert_relative_eq!(t[(4, 4)].re, 1.0, epsilon = 1e-9);
        assert_relative_eq!(t[(5, 5)].re, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_pilot_bundle_is_rejected() {
        let setup = free_space_system(0.5);
        let chief_only = {
            let mut x = Matrix3xX::zeros(1);
            x[(2, 0)] = 0.0;
            let mut k = Matrix3xX::from_element(1, Complex64::zero());
            k[(2, 0)] = Complex64::one();
            RayBundle::new(x, k, None, vec![0], WAVE).unwrap()
        };
        let err = setup
            .element
            .calculate_xyuv(
                chief_only,
                &two_surface_sequence(),
                &setup.background,
                0,
                LinearizationMode::Real4,
            )
            .unwrap_err();
        assert!(matches!(err, TraceError::DegeneratePilotBundle));
    }

    #[test]
    fn pilot_path_selection_out_of_range() {
        let setup = free_space_system(0.5);
        let err = setup
            .element
            .calculate_xyuv(
                pilot_bundle(1e-6, 1e-6),
                &two_surface_sequence(),
                &setup.background,
                99,
                LinearizationMode::Real4,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TraceError::PilotPathOutOfRange { requested: 99, .. }
        ));
    }
}

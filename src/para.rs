//! Differential propagation along a pilot ray path.
//!
//! Instead of intersecting surfaces, a real bundle is propagated as a
//! difference from the pilot ray: per hit interval the transverse
//! difference state is pushed through the interval's fitted transfer
//! matrix and re-anchored on the pilot's local coordinates at the interval
//! end. This trades geometric exactness for speed.
//!
//! No aperture or validity checks are performed on the linearized path;
//! callers that need them must run a full nonlinear trace instead.

use crate::bundle::RayBundle;
use crate::element::OpticalElement;
use crate::error::TraceError;
use crate::hitlist::{sequence_to_hitlist, Sequence};
use crate::linearize::{stack_state, LinearizationMode, PilotLinearization};
use crate::material::MaterialHandle;
use nalgebra::{DMatrix, Matrix3xX, Vector3};
use num_complex::Complex64;

impl OpticalElement {
    /// Propagate `bundle` differentially along the pilot of
    /// `pilot_bundle`, skipping all surface intersection math.
    ///
    /// The bundle's state is interpreted at the first surface of the
    /// sequence; per interval its transverse difference from the pilot
    /// chief ray is mapped by the stored transfer matrix. Returns the
    /// pilot linearization and the approximate path, one bundle per hit.
    pub fn para_seqtrace(
        &self,
        pilot_bundle: RayBundle,
        bundle: RayBundle,
        sequence: &Sequence,
        background: &MaterialHandle,
        pilot_path_nr: usize,
        mode: LinearizationMode,
    ) -> Result<(PilotLinearization, Vec<RayBundle>), TraceError> {
        let lin =
            self.calculate_xyuv(pilot_bundle, sequence, background, pilot_path_nr, mode)?;
        let (hitlist, _options) = sequence_to_hitlist(sequence);

        let mut path = vec![bundle];
        for ((ps, pe), hit) in lin.pilot.iter().zip(&lin.pilot[1..]).zip(&hitlist) {
            let frame_start = self.surface(&hit.start)?.frame().clone();
            let frame_end = self.surface(&hit.end)?.frame().clone();

            let prev = path.last().unwrap();
            let n = prev.num_rays();
            let x0_glob = prev.last_x().clone();
            let k0_glob = prev.last_k().clone();
            let efield = prev.last_efield().clone();
            let mut new_bundle = RayBundle::new(
                x0_glob.clone(),
                k0_glob.clone(),
                Some(efield.clone()),
                prev.ray_ids().to_vec(),
                prev.wavelength(),
            )?;

            let x0 = frame_start.points_to_local(&x0_glob);
            let k0 = frame_start.cdirections_to_local(&k0_glob);
            let px0 = frame_start.points_to_local(&chief_x(ps));
            let pk0 = frame_start.cdirections_to_local(&chief_k(ps));
            let px1 = frame_end.points_to_local(&chief_x(pe));
            let pk1 = frame_end.cdirections_to_local(&chief_k(pe));

            // transverse difference from the pilot at the interval start
            let mut dx0 = DMatrix::zeros(2, n);
            let mut dk0 = DMatrix::from_element(2, n, Complex64::new(0.0, 0.0));
            for j in 0..n {
                for r in 0..2 {
                    dx0[(r, j)] = x0[(r, j)] - px0[(r, 0)];
                    dk0[(r, j)] = k0[(r, j)] - pk0[(r, 0)];
                }
            }
            let dstate0 = stack_state(&dx0, &dk0, mode);

            let matrix = lin
                .table
                .get(hit)
                .ok_or_else(|| TraceError::MissingSurface(hit.start.clone()))?;
            let dstate1 = matrix * dstate0;

            // re-embed into 3D, padding the dropped longitudinal component
            let mut x1_local = Matrix3xX::zeros(n);
            let mut k1_local = Matrix3xX::from_element(n, Complex64::new(0.0, 0.0));
            for j in 0..n {
                for r in 0..2 {
                    let dk = match mode {
                        LinearizationMode::Real4 => dstate1[(2 + r, j)],
                        LinearizationMode::SplitComplex6 => {
                            dstate1[(2 + r, j)] + Complex64::i() * dstate1[(4 + r, j)]
                        }
                    };
                    x1_local[(r, j)] = dstate1[(r, j)].re + px1[(r, 0)];
                    k1_local[(r, j)] = dk + pk1[(r, 0)];
                }
                x1_local[(2, j)] = px1[(2, 0)];
                k1_local[(2, j)] = pk1[(2, 0)];
            }

            let x1 = frame_end.points_to_global(&x1_local);
            let k1 = frame_end.cdirections_to_global(&k1_local);
            new_bundle.append(x1, k1, efield, vec![true; n])?;
            path.push(new_bundle);
        }

        Ok((lin, path))
    }
}

/// Aperture/validity checking of a linearized path. Not implemented:
/// intersecting the linearized bundles with the surface boundaries would
/// feed the clipped coordinates back into the difference states. Fails
/// explicitly rather than silently approximating.
pub fn linearized_aperture_check(_path: &[RayBundle]) -> Result<(), TraceError> {
    Err(TraceError::Unimplemented(
        "aperture check for linearized ray paths",
    ))
}

/// Chief-ray (column 0) trailing position as a 3×1 matrix.
fn chief_x(bundle: &RayBundle) -> Matrix3xX<f64> {
    let c = bundle.last_x().column(0);
    Matrix3xX::from_columns(&[Vector3::new(c[0], c[1], c[2])])
}

fn chief_k(bundle: &RayBundle) -> Matrix3xX<Complex64> {
    let c = bundle.last_k().column(0);
    Matrix3xX::from_columns(&[nalgebra::Vector3::new(c[0], c[1], c[2])])
}

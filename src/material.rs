//! Material contract and isotropic implementations.
//!
//! A material advances bundles to a surface (`propagate`) and produces the
//! outgoing bundles of a surface interaction (`refract`, `reflect`). With
//! `splitup` enabled an interaction may return more than one bundle, which
//! the sequential tracer turns into independent ray paths.
//!
//! Refraction works in wavevector form: |k| is scaled to the refractive
//! index of the ambient medium, the tangential component is conserved
//! across the interface, and the normal component is re-solved with a
//! complex square root so total internal reflection carries through as an
//! evanescent (imaginary) component instead of a hard failure.

use crate::bundle::RayBundle;
use crate::error::TraceError;
use crate::frame::Frame;
use crate::glasscat::{CatalogError, IndexFormula};
use crate::surface::Surface;
use nalgebra::{Matrix3xX, Vector3};
use num_complex::Complex64;
use std::sync::Arc;

/// Shared handle to a material. Identity of the handle (not deep equality)
/// drives the tracer's "other side of the surface" selection.
pub type MaterialHandle = Arc<dyn Material>;

pub trait Material: Send + Sync + std::fmt::Debug {
    /// Frame this material is attached to; must be connected to the owning
    /// element's root frame.
    fn frame(&self) -> &Arc<Frame>;

    /// Real refractive index n(lambda), wavelength in meters.
    fn refractive_index(&self, wavelength: f64) -> Result<f64, CatalogError>;

    /// Extinction coefficient k(lambda), wavelength in meters.
    fn extinction(&self, wavelength: f64) -> Result<f64, CatalogError>;

    /// Advance the bundle's trailing trajectory to the surface, in place.
    fn propagate(&self, bundle: &mut RayBundle, surface: &Surface) -> Result<(), TraceError> {
        let x = bundle.last_x().clone();
        let k = bundle.last_k().clone();
        let d = real_unit_directions(&k);
        let isec = surface.intersect(&x, &d);
        let mut x_new = x.clone();
        let mut valid = bundle.last_valid().to_vec();
        for i in 0..x.ncols() {
            if isec.hit[i] {
                let step: Vector3<f64> = d.column(i) * isec.t[i];
                let mut col = x_new.column_mut(i);
                col += step;
            } else {
                valid[i] = false;
            }
        }
        let efield = bundle.last_efield().clone();
        bundle.append(x_new, k, efield, valid)
    }

    /// Refract the bundle's trailing state into this material. With
    /// `splitup`, a second, partially reflected bundle is returned after
    /// the refracted one. Without it, exactly one bundle is returned.
    fn refract(
        &self,
        bundle: &RayBundle,
        surface: &Surface,
        splitup: bool,
    ) -> Result<Vec<RayBundle>, TraceError> {
        let wavelength = bundle.wavelength();
        let n2 = Complex64::new(
            self.refractive_index(wavelength)?,
            self.extinction(wavelength)?,
        );
        let x = bundle.last_x().clone();
        let k1 = bundle.last_k();
        let normals = surface_normals(surface, &x);
        let n = x.ncols();
        let mut k2 = Matrix3xX::zeros(n);
        let mut k_reflected = Matrix3xX::zeros(n);
        let mut valid = bundle.last_valid().to_vec();
        for i in 0..n {
            let nv = normals.column(i).into_owned();
            let kc = k1.column(i).into_owned();
            let kn: Complex64 = kc.x * nv.x + kc.y * nv.y + kc.z * nv.z;
            let kt = Vector3::new(kc.x - kn * nv.x, kc.y - kn * nv.y, kc.z - kn * nv.z);
            let kt_sq = kt.x * kt.x + kt.y * kt.y + kt.z * kt.z;
            let kz_sq = n2 * n2 - kt_sq;
            // principal root; orient along the incoming normal sense
            let kz = kz_sq.sqrt();
            let s = if kn.re >= 0.0 { 1.0 } else { -1.0 };
            if kz.re.abs() < 1e-14 {
                // evanescent: total internal reflection, ray is blocked
                valid[i] = false;
            }
            k2.set_column(i, &(kt + nv.map(|v| Complex64::new(s * v, 0.0)) * kz));
            k_reflected.set_column(i, &(kc - nv.map(|v| Complex64::new(2.0 * v, 0.0)) * kn));
        }
        let efield = bundle.last_efield().clone();
        let refracted = RayBundle::new(
            x.clone(),
            k2,
            Some(efield.clone()),
            bundle.ray_ids().to_vec(),
            wavelength,
        )?
        .with_valid(valid);
        if splitup {
            let reflected = RayBundle::new(
                x,
                k_reflected,
                Some(efield),
                bundle.ray_ids().to_vec(),
                wavelength,
            )?
            .with_valid(bundle.last_valid().to_vec());
            Ok(vec![refracted, reflected])
        } else {
            Ok(vec![refracted])
        }
    }

    /// Reflect the bundle's trailing state off the surface. Mirrors are
    /// fully reflective here, so `splitup` still yields a single bundle.
    fn reflect(
        &self,
        bundle: &RayBundle,
        surface: &Surface,
        _splitup: bool,
    ) -> Result<Vec<RayBundle>, TraceError> {
        let x = bundle.last_x().clone();
        let k1 = bundle.last_k();
        let normals = surface_normals(surface, &x);
        let n = x.ncols();
        let mut k_reflected = Matrix3xX::zeros(n);
        for i in 0..n {
            let nv = normals.column(i).into_owned();
            let kc = k1.column(i).into_owned();
            let kn: Complex64 = kc.x * nv.x + kc.y * nv.y + kc.z * nv.z;
            k_reflected.set_column(i, &(kc - nv.map(|v| Complex64::new(2.0 * v, 0.0)) * kn));
        }
        let reflected = RayBundle::new(
            x,
            k_reflected,
            Some(bundle.last_efield().clone()),
            bundle.ray_ids().to_vec(),
            bundle.wavelength(),
        )?
        .with_valid(bundle.last_valid().to_vec());
        Ok(vec![reflected])
    }
}

/// Unit ray travel directions from the real part of the wavevectors.
fn real_unit_directions(k: &Matrix3xX<Complex64>) -> Matrix3xX<f64> {
    let mut d = Matrix3xX::zeros(k.ncols());
    for i in 0..k.ncols() {
        let v = Vector3::new(k[(0, i)].re, k[(1, i)].re, k[(2, i)].re);
        let norm = v.norm();
        if norm > 1e-14 {
            d.set_column(i, &(v / norm));
        }
    }
    d
}

/// Global-frame unit surface normals at each ray's trailing position.
fn surface_normals(surface: &Surface, x: &Matrix3xX<f64>) -> Matrix3xX<f64> {
    let xl = surface.frame().points_to_local(x);
    let mut nl = Matrix3xX::zeros(x.ncols());
    for i in 0..x.ncols() {
        nl.set_column(i, &surface.local_normal(xl.column(i).into_owned()));
    }
    surface.frame().directions_to_global(&nl)
}

/// Non-dispersive medium with a fixed real refractive index; the usual
/// background medium is `ConstantIndexGlass::vacuum(frame)`.
#[derive(Debug)]
pub struct ConstantIndexGlass {
    n: f64,
    frame: Arc<Frame>,
}

impl ConstantIndexGlass {
    pub fn new(n: f64, frame: Arc<Frame>) -> Arc<Self> {
        Arc::new(ConstantIndexGlass { n, frame })
    }

    pub fn vacuum(frame: Arc<Frame>) -> Arc<Self> {
        Self::new(1.0, frame)
    }
}

impl Material for ConstantIndexGlass {
    fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    fn refractive_index(&self, _wavelength: f64) -> Result<f64, CatalogError> {
        Ok(self.n)
    }

    fn extinction(&self, _wavelength: f64) -> Result<f64, CatalogError> {
        Ok(0.0)
    }
}

/// Dispersive medium backed by a glass-catalog index formula.
#[derive(Debug)]
pub struct CatalogGlass {
    formula: IndexFormula,
    frame: Arc<Frame>,
}

impl CatalogGlass {
    pub fn new(formula: IndexFormula, frame: Arc<Frame>) -> Arc<Self> {
        Arc::new(CatalogGlass { formula, frame })
    }
}

impl Material for CatalogGlass {
    fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    fn refractive_index(&self, wavelength: f64) -> Result<f64, CatalogError> {
        self.formula.get_n(wavelength)
    }

    fn extinction(&self, wavelength: f64) -> Result<f64, CatalogError> {
        self.formula.get_k(wavelength)
    }
}

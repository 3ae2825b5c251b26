//! Refractive-index dispersion formulas.
//!
//! Each glass carries one index formula and one extinction formula as a
//! closed set of variants, evaluated in micrometers. Coefficients follow
//! the refractiveindex.info conventions; copy them unchanged from the
//! database and it'll be fine. The `Retro` and `Exotic` families are part
//! of that naming scheme but are not implemented here, and selecting them
//! fails loudly instead of returning a wrong value.

use derive_more::Display;

#[derive(Debug, Display, Clone, PartialEq)]
pub enum CatalogError {
    #[display(fmt = "dispersion formula '{}' is not implemented", _0)]
    UnimplementedFormula(&'static str),
    #[display(fmt = "wavelength {} um outside tabulated range", _0)]
    WavelengthOutOfRange(f64),
    #[display(fmt = "formula requires more coefficients than supplied")]
    InsufficientCoefficients,
}

impl std::error::Error for CatalogError {}

/// Index dispersion formula families of the refractiveindex.info database.
///
/// `Sellmeier` is "formula 1", `Sellmeier2` is "formula 2", and so on;
/// "formula 4" maps to `RationalShort` (nine or fewer coefficients) or
/// `RationalLong` (eleven or more).
#[derive(Debug, Clone, PartialEq)]
pub enum DispersionFormula {
    /// Linear interpolation of tabulated (wavelength um, n) pairs, sorted
    /// by wavelength.
    TabulatedN { wavelengths: Vec<f64>, values: Vec<f64> },
    Sellmeier(Vec<f64>),
    Sellmeier2(Vec<f64>),
    Polynomial(Vec<f64>),
    RationalShort(Vec<f64>),
    RationalLong(Vec<f64>),
    Cauchy(Vec<f64>),
    Gases(Vec<f64>),
    Herzberger(Vec<f64>),
    Retro(Vec<f64>),
    Exotic(Vec<f64>),
}

impl DispersionFormula {
    /// Evaluate the refractive index at a wavelength in micrometers.
    pub fn n(&self, w: f64) -> Result<f64, CatalogError> {
        use DispersionFormula::*;
        match self {
            TabulatedN { wavelengths, values } => interpolate(wavelengths, values, w),
            Sellmeier(c) => {
                let c0 = *c.first().ok_or(CatalogError::InsufficientCoefficients)?;
                let mut nsq = 1.0 + c0;
                for bc in c[1..].chunks_exact(2) {
                    nsq += bc[0] * w * w / (w * w - bc[1] * bc[1]);
                }
                Ok(nsq.sqrt())
            }
            Sellmeier2(c) => {
                let c0 = *c.first().ok_or(CatalogError::InsufficientCoefficients)?;
                let mut nsq = 1.0 + c0;
                for bc in c[1..].chunks_exact(2) {
                    nsq += bc[0] * w * w / (w * w - bc[1]);
                }
                Ok(nsq.sqrt())
            }
            Polynomial(c) => {
                let c0 = *c.first().ok_or(CatalogError::InsufficientCoefficients)?;
                let mut nsq = c0;
                for ap in c[1..].chunks_exact(2) {
                    nsq += ap[0] * w.powf(ap[1]);
                }
                Ok(nsq.sqrt())
            }
            RationalShort(c) => {
                let c0 = *c.first().ok_or(CatalogError::InsufficientCoefficients)?;
                let mut nsq = c0;
                for abcd in c[1..].chunks_exact(4) {
                    nsq += abcd[0] * w.powf(abcd[1]) / (w * w - abcd[2].powf(abcd[3]));
                }
                Ok(nsq.sqrt())
            }
            RationalLong(c) => {
                if c.len() < 11 {
                    return Err(CatalogError::InsufficientCoefficients);
                }
                let mut nsq = c[0];
                for abcd in c[1..9].chunks_exact(4) {
                    nsq += abcd[0] * w.powf(abcd[1]) / (w * w - abcd[2].powf(abcd[3]));
                }
                for ef in c[9..].chunks_exact(2) {
                    nsq += ef[0] * w.powf(ef[1]);
                }
                Ok(nsq.sqrt())
            }
            Cauchy(c) => {
                let c0 = *c.first().ok_or(CatalogError::InsufficientCoefficients)?;
                let mut n = c0;
                for ap in c[1..].chunks_exact(2) {
                    n += ap[0] * w.powf(ap[1]);
                }
                Ok(n)
            }
            Gases(c) => {
                let c0 = *c.first().ok_or(CatalogError::InsufficientCoefficients)?;
                let mut n = 1.0 + c0;
                for bc in c[1..].chunks_exact(2) {
                    n += bc[0] / (bc[1] - w.powi(-2));
                }
                Ok(n)
            }
            Herzberger(c) => {
                if c.len() < 3 {
                    return Err(CatalogError::InsufficientCoefficients);
                }
                let l = 1.0 / (w * w - 0.028);
                let mut n = c[0] + c[1] * l + c[2] * l * l;
                for (i, a) in c[3..].iter().enumerate() {
                    n += a * w.powi(2 * i as i32 + 2);
                }
                Ok(n)
            }
            Retro(_) => Err(CatalogError::UnimplementedFormula("retro")),
            Exotic(_) => Err(CatalogError::UnimplementedFormula("exotic")),
        }
    }
}

/// Extinction coefficient k(lambda); most catalog entries are lossless.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtinctionFormula {
    Lossless,
    TabulatedK { wavelengths: Vec<f64>, values: Vec<f64> },
}

impl ExtinctionFormula {
    /// Evaluate the extinction coefficient at a wavelength in micrometers.
    pub fn k(&self, w: f64) -> Result<f64, CatalogError> {
        match self {
            ExtinctionFormula::Lossless => Ok(0.0),
            ExtinctionFormula::TabulatedK { wavelengths, values } => {
                interpolate(wavelengths, values, w)
            }
        }
    }
}

/// One catalog entry: index formula plus extinction formula.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFormula {
    pub n_formula: DispersionFormula,
    pub k_formula: ExtinctionFormula,
}

impl IndexFormula {
    pub fn lossless(n_formula: DispersionFormula) -> Self {
        IndexFormula {
            n_formula,
            k_formula: ExtinctionFormula::Lossless,
        }
    }

    /// Refractive index at a wavelength in meters.
    pub fn get_n(&self, wavelength: f64) -> Result<f64, CatalogError> {
        self.n_formula.n(wavelength * 1e6)
    }

    /// Extinction coefficient at a wavelength in meters.
    pub fn get_k(&self, wavelength: f64) -> Result<f64, CatalogError> {
        self.k_formula.k(wavelength * 1e6)
    }
}

fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> Result<f64, CatalogError> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return Err(CatalogError::InsufficientCoefficients);
    }
    if x < xs[0] || x > *xs.last().unwrap() {
        return Err(CatalogError::WavelengthOutOfRange(x));
    }
    let i = match xs.iter().position(|&w| w >= x) {
        Some(0) => 1,
        Some(i) => i,
        None => xs.len() - 1,
    };
    let t = (x - xs[i - 1]) / (xs[i] - xs[i - 1]);
    Ok(ys[i - 1] + t * (ys[i] - ys[i - 1]))
}

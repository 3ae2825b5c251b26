//! Sequential optical ray tracing and pilot-ray linearization.
//!
//! `lenstrace` propagates bundles of rays through an ordered sequence of
//! optical surfaces, handling branch splitting when a surface produces
//! several outgoing bundles (partial reflection), and derives local linear
//! transfer matrices between surface pairs by least-squares fitting a
//! traced pilot bundle. The fitted matrices drive a differential
//! propagator that moves nearby rays through the whole sequence without
//! nonlinear retracing.
//!
//! Entry points live on [`OpticalElement`]: `seqtrace` for full traces,
//! `calculate_xyuv` for the pilot linearization, and `para_seqtrace` for
//! differential propagation.

mod bundle;
mod element;
mod error;
mod frame;
mod glasscat;
mod hitlist;
mod linearize;
mod material;
mod para;
mod surface;

pub use crate::bundle::{BundleArena, BundleId, RayBundle, RayPath, TraceResult};
pub use crate::element::OpticalElement;
pub use crate::error::TraceError;
pub use crate::frame::Frame;
pub use crate::glasscat::{
    CatalogError, DispersionFormula, ExtinctionFormula, IndexFormula,
};
pub use crate::hitlist::{
    hitlist_to_sequence, sequence_to_hitlist, HitKey, HitOptions, Sequence, SurfaceOptions,
};
pub use crate::linearize::{
    Advisory, LinearizationMode, PilotLinearization, TransferTable, NUMERICAL_TOLERANCE,
};
pub use crate::material::{CatalogGlass, ConstantIndexGlass, Material, MaterialHandle};
pub use crate::para::linearized_aperture_check;
pub use crate::surface::{Intersection, Shape, Surface};

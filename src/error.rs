use crate::glasscat::CatalogError;
use derive_more::Display;

/// Errors raised while configuring an optical element or tracing through it.
///
/// Configuration errors (`DisconnectedFrame`) surface at setup time and are
/// not recoverable by the tracer; everything else is reported from the
/// trace/linearize entry points.
#[derive(Debug, Display, Clone)]
pub enum TraceError {
    /// A sequence referenced a surface key that was never added.
    #[display(fmt = "no surface with key '{}' in optical element", _0)]
    MissingSurface(String),
    /// A surface or material frame is not connected to the element root.
    #[display(fmt = "{} coordinate frame is not connected to the element root frame", _0)]
    DisconnectedFrame(&'static str),
    /// A material interaction returned no outgoing bundles.
    #[display(fmt = "material returned an empty bundle list at surface '{}'", _0)]
    EmptyInteraction(String),
    /// Per-ray arrays of a bundle disagree in ray count.
    #[display(fmt = "ray count mismatch: expected {}, got {}", expected, got)]
    ShapeMismatch { expected: usize, got: usize },
    /// The requested pilot ray path index exceeds the number of traced paths.
    #[display(fmt = "pilot ray path {} requested but only {} paths traced", requested, available)]
    PilotPathOutOfRange { requested: usize, available: usize },
    /// The pilot bundle has no perturbation rays to fit against.
    #[display(fmt = "pilot bundle needs a chief ray plus at least one perturbation ray")]
    DegeneratePilotBundle,
    /// The normal-equation matrix of a stage fit is singular.
    #[display(fmt = "singular least-squares fit in {} stage", _0)]
    SingularFit(&'static str),
    /// A composed transfer matrix has no inverse.
    #[display(fmt = "composed transfer matrix is singular")]
    SingularTransfer,
    /// A requested feature exists in the interface but is not implemented.
    #[display(fmt = "unimplemented: {}", _0)]
    Unimplemented(&'static str),
    /// Refractive-index lookup failed.
    #[display(fmt = "glass catalog error: {}", _0)]
    Catalog(CatalogError),
}

impl std::error::Error for TraceError {}

impl From<CatalogError> for TraceError {
    fn from(err: CatalogError) -> Self {
        TraceError::Catalog(err)
    }
}

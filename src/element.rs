//! Optical element: surfaces, materials, and the sequential tracer.

use crate::bundle::{BundleArena, RayBundle, RayPath, TraceResult};
use crate::error::TraceError;
use crate::frame::Frame;
use crate::hitlist::Sequence;
use crate::material::MaterialHandle;
use crate::surface::Surface;
use std::collections::HashMap;
use std::sync::Arc;

/// A volume bounded by surfaces, with a material on each side of every
/// surface normal. Construct the element fully before tracing; the maps
/// are read-only during a trace.
#[derive(Debug)]
pub struct OpticalElement {
    frame: Arc<Frame>,
    surfaces: HashMap<String, Surface>,
    materials: HashMap<String, MaterialHandle>,
    /// surface key -> material keys on the (minus, plus) normal side
    surf_mat: HashMap<String, (String, String)>,
}

impl OpticalElement {
    pub fn new(frame: Arc<Frame>) -> Self {
        OpticalElement {
            frame,
            surfaces: HashMap::new(),
            materials: HashMap::new(),
            surf_mat: HashMap::new(),
        }
    }

    pub fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    /// Add a surface under `key`, with the material keys lying on the
    /// minus/plus side of its normal. Fails if the surface frame is not
    /// connected to the element root frame. Re-adding a key overwrites.
    pub fn add_surface(
        &mut self,
        key: &str,
        mut surface: Surface,
        material_keys: (&str, &str),
        name: &str,
    ) -> Result<(), TraceError> {
        if !surface.frame().is_connected_to(&self.frame) {
            return Err(TraceError::DisconnectedFrame("surface"));
        }
        surface.set_name(name);
        self.surfaces.insert(key.to_owned(), surface);
        self.surf_mat.insert(
            key.to_owned(),
            (material_keys.0.to_owned(), material_keys.1.to_owned()),
        );
        Ok(())
    }

    /// Add a material under `key`. Fails if the material frame is not
    /// connected to the element root frame. A duplicate key is skipped
    /// with a warning rather than overwritten.
    pub fn add_material(
        &mut self,
        key: &str,
        material: MaterialHandle,
        _comment: &str,
    ) -> Result<(), TraceError> {
        if !material.frame().is_connected_to(&self.frame) {
            return Err(TraceError::DisconnectedFrame("material"));
        }
        if self.materials.contains_key(key) {
            log::warn!("material key '{}' already taken, material not added", key);
            return Ok(());
        }
        self.materials.insert(key.to_owned(), material);
        Ok(())
    }

    pub fn surface(&self, key: &str) -> Result<&Surface, TraceError> {
        self.surfaces
            .get(key)
            .ok_or_else(|| TraceError::MissingSurface(key.to_owned()))
    }

    /// The material on the far side of a surface: whichever adjacent
    /// material is not (by handle identity) the one light currently
    /// travels in. When neither matches, e.g. entering from the background
    /// medium, the minus-side material is chosen.
    fn material_after_refraction(
        minus: &MaterialHandle,
        plus: &MaterialHandle,
        current: &MaterialHandle,
    ) -> MaterialHandle {
        if Arc::ptr_eq(minus, current) {
            Arc::clone(plus)
        } else {
            Arc::clone(minus)
        }
    }

    /// Materials adjacent to `key`, defaulting to the background medium
    /// for keys absent from the material table.
    fn adjacent_materials(
        &self,
        key: &str,
        background: &MaterialHandle,
    ) -> (MaterialHandle, MaterialHandle) {
        let (mkey_minus, mkey_plus) = &self.surf_mat[key];
        let lookup = |k: &str| {
            self.materials
                .get(k)
                .cloned()
                .unwrap_or_else(|| Arc::clone(background))
        };
        (lookup(mkey_minus), lookup(mkey_plus))
    }

    /// Trace a bundle through the sequence, starting in `background`.
    ///
    /// At each surface, every live path's trailing bundle is advanced to
    /// the surface by the current material, then refracted into the far
    /// side (or reflected, per the hit options). With `splitup`, an
    /// interaction may yield several outgoing bundles: the first continues
    /// its path, every further one starts a branch sharing the recorded
    /// history. Branches are appended after all existing paths, in
    /// discovery order, which fixes the path numbering used by
    /// `pilot_path_nr` elsewhere.
    pub fn seqtrace(
        &self,
        bundle: RayBundle,
        sequence: &Sequence,
        background: &MaterialHandle,
        splitup: bool,
    ) -> Result<TraceResult, TraceError> {
        let mut arena = BundleArena::new();
        let initial = arena.push(bundle);
        let mut paths = vec![RayPath::new(initial)];
        let mut current_material = Arc::clone(background);

        for (surf_key, options) in sequence {
            let surface = self.surface(surf_key)?;
            let (mat_minus, mat_plus) = self.adjacent_materials(surf_key, background);

            // finalize the trailing bundles at this surface
            for path in &paths {
                current_material.propagate(arena.get_mut(path.trailing()), surface)?;
            }

            if !options.is_mirror {
                current_material =
                    Self::material_after_refraction(&mat_minus, &mat_plus, &current_material);
            }

            let mut branches = Vec::new();
            for path in &mut paths {
                let outgoing = {
                    let trailing = arena.get(path.trailing());
                    if options.is_mirror {
                        current_material.reflect(trailing, surface, splitup)?
                    } else {
                        current_material.refract(trailing, surface, splitup)?
                    }
                };
                let mut outgoing = outgoing.into_iter();
                let first = outgoing
                    .next()
                    .ok_or_else(|| TraceError::EmptyInteraction(surf_key.clone()))?;
                for extra in outgoing {
                    let mut branch = path.clone();
                    branch.append(arena.push(extra));
                    branches.push(branch);
                }
                path.append(arena.push(first));
            }
            paths.extend(branches);
        }

        Ok(TraceResult { arena, paths })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitlist::SurfaceOptions;
    use crate::material::ConstantIndexGlass;
    use crate::surface::Shape;
    use float_eq::assert_float_eq;
    use nalgebra::{Matrix3xX, Rotation3, Vector3};
    use num_complex::Complex64;

    const WAVE: f64 = 550e-9;

    fn axial_bundle(n_rays: usize) -> RayBundle {
        let mut x = Matrix3xX::zeros(n_rays);
        for i in 0..n_rays {
            x[(0, i)] = 1e-3 * i as f64;
        }
        let k = Matrix3xX::from_fn(n_rays, |r, _| {
            if r == 2 {
                Complex64::new(1.0, 0.0)
            } else {
                Complex64::new(0.0, 0.0)
            }
        });
        RayBundle::new(x, k, None, (0..n_rays).collect(), WAVE).unwrap()
    }

    struct TwoSurface {
        element: OpticalElement,
        background: MaterialHandle,
    }

    fn two_flat_surfaces(n_glass: f64) -> TwoSurface {
        let root = Frame::root();
        let f1 = Frame::child(&root, Vector3::new(0.0, 0.0, 1.0), Rotation3::identity());
        let f2 = Frame::child(&root, Vector3::new(0.0, 0.0, 2.0), Rotation3::identity());
        let mut element = OpticalElement::new(Arc::clone(&root));
        element
            .add_material(
                "glass",
                ConstantIndexGlass::new(n_glass, Arc::clone(&root)),
                "",
            )
            .unwrap();
        element
            .add_surface(
                "front",
                Surface::new(f1, Shape::Plane),
                ("air", "glass"),
                "entrance",
            )
            .unwrap();
        element
            .add_surface(
                "back",
                Surface::new(f2, Shape::Plane),
                ("glass", "air"),
                "exit",
            )
            .unwrap();
        let background: MaterialHandle = ConstantIndexGlass::vacuum(root);
        TwoSurface {
            element,
            background,
        }
    }

    fn refract_sequence() -> Sequence {
        vec![
            ("front".to_string(), SurfaceOptions::refracting()),
            ("back".to_string(), SurfaceOptions::refracting()),
        ]
    }

    #[test]
    fn nonsplitting_trace_yields_one_path_with_k_plus_one_bundles() {
        let setup = two_flat_surfaces(1.5);
        let result = setup
            .element
            .seqtrace(axial_bundle(3), &refract_sequence(), &setup.background, false)
            .unwrap();
        assert_eq!(result.num_paths(), 1);
        assert_eq!(result.path(0).unwrap().len(), 3);
        let bundles: Vec<_> = result.path_bundles(0).collect();
        // inside the glass |k| = 1.5
        let k_inside = bundles[1].last_k();
        let norm = (k_inside[(0, 0)].norm_sqr()
            + k_inside[(1, 0)].norm_sqr()
            + k_inside[(2, 0)].norm_sqr())
        .sqrt();
        assert_float_eq!(norm, 1.5, abs <= 1e-12);
        // exit surface returns to the background medium, |k| = 1
        let k_out = bundles[2].last_k();
        let norm = (k_out[(0, 0)].norm_sqr()
            + k_out[(1, 0)].norm_sqr()
            + k_out[(2, 0)].norm_sqr())
        .sqrt();
        assert_float_eq!(norm, 1.0, abs <= 1e-12);
    }

    #[test]
    fn unknown_surface_key_is_a_hard_failure() {
        let setup = two_flat_surfaces(1.5);
        let sequence = vec![("nope".to_string(), SurfaceOptions::refracting())];
        let err = setup
            .element
            .seqtrace(axial_bundle(1), &sequence, &setup.background, false)
            .unwrap_err();
        assert!(matches!(err, TraceError::MissingSurface(ref k) if k == "nope"));
    }

    #[test]
    fn splitup_doubles_paths_per_surface() {
        let setup = two_flat_surfaces(1.5);
        let result = setup
            .element
            .seqtrace(axial_bundle(1), &refract_sequence(), &setup.background, true)
            .unwrap();
        // each refraction returns (refracted, reflected): 1 -> 2 -> 4
        assert_eq!(result.num_paths(), 4);
        // path 0 is the pure transmission branch
        assert_eq!(result.path(0).unwrap().len(), 3);
        for i in 0..4 {
            assert!(result.path(i).unwrap().len() >= 2);
        }
    }

    #[test]
    fn branches_are_independent_after_split() {
        let setup = two_flat_surfaces(1.5);
        let sequence = vec![("front".to_string(), SurfaceOptions::refracting())];
        let result = setup
            .element
            .seqtrace(axial_bundle(2), &sequence, &setup.background, true)
            .unwrap();
        assert_eq!(result.num_paths(), 2);
        let t0 = result.path(0).unwrap().trailing();
        let t1 = result.path(1).unwrap().trailing();
        assert_ne!(t0, t1);
        // shared initial bundle, distinct outgoing bundles
        assert_eq!(
            result.path(0).unwrap().ids()[0],
            result.path(1).unwrap().ids()[0]
        );
        // transmitted goes forward, partial reflection goes back
        assert!(result.arena().get(t0).last_k()[(2, 0)].re > 0.0);
        assert!(result.arena().get(t1).last_k()[(2, 0)].re < 0.0);
    }

    #[test]
    fn mirror_keeps_current_material() {
        let root = Frame::root();
        let f1 = Frame::child(&root, Vector3::new(0.0, 0.0, 1.0), Rotation3::identity());
        let f2 = Frame::child(&root, Vector3::new(0.0, 0.0, 0.0), Rotation3::identity());
        let mut element = OpticalElement::new(Arc::clone(&root));
        element
            .add_surface(
                "mirror",
                Surface::new(f1, Shape::Plane),
                ("air", "air"),
                "fold",
            )
            .unwrap();
        element
            .add_surface(
                "exit",
                Surface::new(f2, Shape::Plane),
                ("air", "air"),
                "",
            )
            .unwrap();
        let background: MaterialHandle = ConstantIndexGlass::vacuum(root);
        let sequence = vec![
            ("mirror".to_string(), SurfaceOptions::mirror()),
            ("exit".to_string(), SurfaceOptions::refracting()),
        ];
        let result = element
            .seqtrace(axial_bundle(1), &sequence, &background, false)
            .unwrap();
        assert_eq!(result.num_paths(), 1);
        let bundles: Vec<_> = result.path_bundles(0).collect();
        // reflected back to z = 0
        assert_float_eq!(bundles[2].last_x()[(2, 0)], 0.0, abs <= 1e-12);
        assert!(bundles[1].last_k()[(2, 0)].re < 0.0);
    }

    #[test]
    fn duplicate_material_key_is_skipped_not_replaced() {
        let root = Frame::root();
        let mut element = OpticalElement::new(Arc::clone(&root));
        let first = ConstantIndexGlass::new(1.5, Arc::clone(&root));
        let second = ConstantIndexGlass::new(1.7, Arc::clone(&root));
        element.add_material("glass", first, "original").unwrap();
        element.add_material("glass", second, "impostor").unwrap();
        let kept = &element.materials["glass"];
        assert_float_eq!(kept.refractive_index(WAVE).unwrap(), 1.5, abs <= 0.0);
    }

    #[test]
    fn disconnected_frames_are_rejected() {
        let root = Frame::root();
        let foreign = Frame::root();
        let mut element = OpticalElement::new(root);
        let err = element
            .add_surface(
                "s",
                Surface::new(Arc::clone(&foreign), Shape::Plane),
                ("a", "b"),
                "",
            )
            .unwrap_err();
        assert!(matches!(err, TraceError::DisconnectedFrame("surface")));
        let err = element
            .add_material("m", ConstantIndexGlass::vacuum(foreign), "")
            .unwrap_err();
        assert!(matches!(err, TraceError::DisconnectedFrame("material")));
    }
}

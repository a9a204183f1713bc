//! Model-state vectors and their algebra.
//!
//! A [`StateVector`] is an aggregate of optional physical-field slices (free
//! surface, velocities, tracers, open-boundary arrays, surface forcing). Which
//! slices exist is decided once per run by a [`StateLayout`]; a disabled slice is
//! simply absent from the vector, it is never stored as zeros. Each slice is a
//! contiguous `faer::Col<f64>` holding the local tile of that field.
//!
//! The local operations here (`add`, `scale`, `copy`, `fill`, `axpy`) never
//! communicate. The inner product needs the grid masks/metrics and a collective
//! reduction, so it lives on [`VectorSpace`].

mod geometry;
mod space;

pub use geometry::{ComponentGrid, Geometry};
pub use space::VectorSpace;

use std::collections::BTreeMap;
use std::fmt;

use faer::{Col, Scale, unzip, zip};
use serde::{Deserialize, Serialize};

use crate::error::{MinimizerErrorKind, MinimizerResult};

/// One optional physical slice of the control vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateComponent {
    FreeSurface,
    UBarotropic,
    VBarotropic,
    UVelocity,
    VVelocity,
    Tracer(usize),
    FreeSurfaceBoundary,
    UBarotropicBoundary,
    VBarotropicBoundary,
    UVelocityBoundary,
    VVelocityBoundary,
    TracerBoundary(usize),
    SurfaceUStress,
    SurfaceVStress,
    SurfaceTracerFlux(usize),
}

impl fmt::Display for StateComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateComponent::FreeSurface => write!(f, "zeta"),
            StateComponent::UBarotropic => write!(f, "ubar"),
            StateComponent::VBarotropic => write!(f, "vbar"),
            StateComponent::UVelocity => write!(f, "u"),
            StateComponent::VVelocity => write!(f, "v"),
            StateComponent::Tracer(i) => write!(f, "tracer[{i}]"),
            StateComponent::FreeSurfaceBoundary => write!(f, "zeta_obc"),
            StateComponent::UBarotropicBoundary => write!(f, "ubar_obc"),
            StateComponent::VBarotropicBoundary => write!(f, "vbar_obc"),
            StateComponent::UVelocityBoundary => write!(f, "u_obc"),
            StateComponent::VVelocityBoundary => write!(f, "v_obc"),
            StateComponent::TracerBoundary(i) => write!(f, "tracer_obc[{i}]"),
            StateComponent::SurfaceUStress => write!(f, "sustr"),
            StateComponent::SurfaceVStress => write!(f, "svstr"),
            StateComponent::SurfaceTracerFlux(i) => write!(f, "stflx[{i}]"),
        }
    }
}

/// Run-time switches selecting which components form the control vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlVariables {
    /// Include baroclinic velocities and tracers.
    pub solve3d: bool,
    /// Number of active tracers (only used when `solve3d`).
    pub n_tracers: usize,
    /// Adjust open-boundary conditions.
    pub adjust_boundary: bool,
    /// Adjust surface wind stress.
    pub adjust_wind_stress: bool,
    /// Adjust surface tracer fluxes (only used when `solve3d`).
    pub adjust_tracer_flux: bool,
}

impl Default for ControlVariables {
    fn default() -> Self {
        Self {
            solve3d: true,
            n_tracers: 2,
            adjust_boundary: false,
            adjust_wind_stress: false,
            adjust_tracer_flux: false,
        }
    }
}

/// Local tile dimensions used to size each component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    /// Number of rho points in the xi direction.
    pub nx: usize,
    /// Number of rho points in the eta direction.
    pub ny: usize,
    /// Number of vertical levels.
    pub nz: usize,
    /// Number of open-boundary time records.
    pub boundary_records: usize,
    /// Number of surface-forcing time records.
    pub forcing_records: usize,
}

impl GridShape {
    fn rho_points(&self) -> usize {
        self.nx * self.ny
    }

    fn u_points(&self) -> usize {
        self.nx.saturating_sub(1) * self.ny
    }

    fn v_points(&self) -> usize {
        self.nx * self.ny.saturating_sub(1)
    }

    /// Points along the four open edges of the tile.
    fn edge_points(&self) -> usize {
        2 * (self.nx + self.ny)
    }
}

/// Ordered set of enabled components and their local lengths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLayout {
    components: Vec<(StateComponent, usize)>,
}

impl StateLayout {
    /// Builds a layout from an explicit list. Duplicate components are rejected.
    pub fn new(components: Vec<(StateComponent, usize)>) -> MinimizerResult<Self> {
        let mut sorted = components;
        sorted.sort_by_key(|(c, _)| *c);
        if sorted.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(MinimizerErrorKind::LayoutMismatch(
                "a component appears twice in the layout".to_string(),
            )
            .into());
        }
        Ok(Self { components: sorted })
    }

    /// A single free-surface slice of length `n`. Convenient for synthetic problems.
    pub fn single(n: usize) -> Self {
        Self {
            components: vec![(StateComponent::FreeSurface, n)],
        }
    }

    /// Derives the layout from the control switches and the tile shape.
    pub fn for_controls(controls: &ControlVariables, shape: &GridShape) -> Self {
        let mut components = vec![
            (StateComponent::FreeSurface, shape.rho_points()),
            (StateComponent::UBarotropic, shape.u_points()),
            (StateComponent::VBarotropic, shape.v_points()),
        ];

        if controls.solve3d {
            components.push((StateComponent::UVelocity, shape.u_points() * shape.nz));
            components.push((StateComponent::VVelocity, shape.v_points() * shape.nz));
            for it in 0..controls.n_tracers {
                components.push((StateComponent::Tracer(it), shape.rho_points() * shape.nz));
            }
        }

        if controls.adjust_boundary {
            let edge = shape.edge_points() * shape.boundary_records;
            components.push((StateComponent::FreeSurfaceBoundary, edge));
            components.push((StateComponent::UBarotropicBoundary, edge));
            components.push((StateComponent::VBarotropicBoundary, edge));
            if controls.solve3d {
                components.push((StateComponent::UVelocityBoundary, edge * shape.nz));
                components.push((StateComponent::VVelocityBoundary, edge * shape.nz));
                for it in 0..controls.n_tracers {
                    components.push((StateComponent::TracerBoundary(it), edge * shape.nz));
                }
            }
        }

        if controls.adjust_wind_stress {
            components.push((
                StateComponent::SurfaceUStress,
                shape.u_points() * shape.forcing_records,
            ));
            components.push((
                StateComponent::SurfaceVStress,
                shape.v_points() * shape.forcing_records,
            ));
        }

        if controls.solve3d && controls.adjust_tracer_flux {
            for it in 0..controls.n_tracers {
                components.push((
                    StateComponent::SurfaceTracerFlux(it),
                    shape.rho_points() * shape.forcing_records,
                ));
            }
        }

        components.sort_by_key(|(c, _)| *c);
        Self { components }
    }

    /// Iterates over `(component, length)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (StateComponent, usize)> + '_ {
        self.components.iter().copied()
    }

    pub fn contains(&self, component: StateComponent) -> bool {
        self.components.iter().any(|(c, _)| *c == component)
    }

    /// Total number of local degrees of freedom.
    pub fn len(&self) -> usize {
        self.components.iter().map(|(_, n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A model-state (or gradient, or increment) vector over an enabled set of components.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVector {
    slices: BTreeMap<StateComponent, Col<f64>>,
}

impl StateVector {
    /// A zero vector with every component of `layout`.
    pub fn zeros(layout: &StateLayout) -> Self {
        Self::constant(layout, 0.0)
    }

    /// A vector with every entry equal to `value`.
    pub fn constant(layout: &StateLayout, value: f64) -> Self {
        let slices = layout
            .iter()
            .map(|(c, n)| (c, Col::from_fn(n, |_| value)))
            .collect();
        Self { slices }
    }

    /// Builds a vector from explicit slices.
    pub fn from_slices(slices: impl IntoIterator<Item = (StateComponent, Col<f64>)>) -> Self {
        Self {
            slices: slices.into_iter().collect(),
        }
    }

    /// Splits a flat column into the components of `layout`, in layout order.
    pub fn from_flat(layout: &StateLayout, flat: &[f64]) -> MinimizerResult<Self> {
        if flat.len() != layout.len() {
            return Err(MinimizerErrorKind::LayoutMismatch(format!(
                "flat vector has {} entries but the layout holds {}",
                flat.len(),
                layout.len()
            ))
            .into());
        }
        let mut offset = 0;
        let mut slices = BTreeMap::new();
        for (c, n) in layout.iter() {
            slices.insert(c, Col::from_fn(n, |i| flat[offset + i]));
            offset += n;
        }
        Ok(Self { slices })
    }

    /// Concatenates all slices in canonical component order.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.len());
        for slice in self.slices.values() {
            flat.extend((0..slice.nrows()).map(|i| slice[i]));
        }
        flat
    }

    /// Returns the layout this vector conforms to.
    pub fn layout(&self) -> StateLayout {
        StateLayout {
            components: self.slices.iter().map(|(c, s)| (*c, s.nrows())).collect(),
        }
    }

    pub fn component(&self, component: StateComponent) -> Option<&Col<f64>> {
        self.slices.get(&component)
    }

    pub fn component_mut(&mut self, component: StateComponent) -> Option<&mut Col<f64>> {
        self.slices.get_mut(&component)
    }

    pub fn components(&self) -> impl Iterator<Item = (StateComponent, &Col<f64>)> {
        self.slices.iter().map(|(c, s)| (*c, s))
    }

    /// Total number of local entries.
    pub fn len(&self) -> usize {
        self.slices.values().map(|s| s.nrows()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails unless `other` has exactly the same components and slice lengths.
    pub fn check_conforms(&self, other: &StateVector) -> MinimizerResult<()> {
        let same = self.slices.len() == other.slices.len()
            && self
                .slices
                .iter()
                .zip(other.slices.iter())
                .all(|((ca, a), (cb, b))| ca == cb && a.nrows() == b.nrows());
        if same {
            Ok(())
        } else {
            Err(MinimizerErrorKind::LayoutMismatch(format!(
                "cannot combine vectors with layouts {:?} and {:?}",
                self.layout(),
                other.layout()
            ))
            .into())
        }
    }

    /// `c = alpha * a + beta * b`.
    pub fn add(a: &StateVector, b: &StateVector, alpha: f64, beta: f64) -> MinimizerResult<Self> {
        a.check_conforms(b)?;
        let slices = a
            .slices
            .iter()
            .zip(b.slices.values())
            .map(|((c, sa), sb)| (*c, sa * Scale(alpha) + sb * Scale(beta)))
            .collect();
        Ok(Self { slices })
    }

    /// In-place `self += alpha * x`.
    pub fn axpy(&mut self, alpha: f64, x: &StateVector) -> MinimizerResult<()> {
        self.check_conforms(x)?;
        for (dst, src) in self.slices.values_mut().zip(x.slices.values()) {
            zip!(dst.as_mut(), src.as_ref()).for_each(|unzip!(dst, src)| {
                *dst += alpha * *src;
            });
        }
        Ok(())
    }

    /// In-place `self *= alpha`.
    pub fn scale(&mut self, alpha: f64) {
        for slice in self.slices.values_mut() {
            zip!(slice.as_mut()).for_each(|unzip!(value)| {
                *value *= alpha;
            });
        }
    }

    /// Returns `alpha * self`.
    pub fn scaled(&self, alpha: f64) -> Self {
        let mut out = self.clone();
        out.scale(alpha);
        out
    }

    /// Copies `src` into `self` without reallocating.
    pub fn copy_from(&mut self, src: &StateVector) -> MinimizerResult<()> {
        self.check_conforms(src)?;
        for (dst, s) in self.slices.values_mut().zip(src.slices.values()) {
            dst.as_mut().copy_from(s.as_ref());
        }
        Ok(())
    }

    /// Sets every entry to `value`.
    pub fn fill(&mut self, value: f64) {
        for slice in self.slices.values_mut() {
            zip!(slice.as_mut()).for_each(|unzip!(entry)| {
                *entry = value;
            });
        }
    }

    /// Returns true when every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.slices
            .values()
            .all(|s| (0..s.nrows()).all(|i| s[i].is_finite()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(layout: &StateLayout, seed: f64) -> StateVector {
        let flat: Vec<f64> = (0..layout.len())
            .map(|i| (seed + i as f64).sin())
            .collect();
        StateVector::from_flat(layout, &flat).unwrap()
    }

    #[test]
    fn test_layout_for_controls_selects_enabled_components() {
        let shape = GridShape {
            nx: 4,
            ny: 3,
            nz: 2,
            boundary_records: 1,
            forcing_records: 2,
        };
        let controls = ControlVariables {
            solve3d: true,
            n_tracers: 1,
            adjust_boundary: false,
            adjust_wind_stress: true,
            adjust_tracer_flux: false,
        };
        let layout = StateLayout::for_controls(&controls, &shape);

        assert!(layout.contains(StateComponent::FreeSurface));
        assert!(layout.contains(StateComponent::Tracer(0)));
        assert!(layout.contains(StateComponent::SurfaceUStress));
        assert!(!layout.contains(StateComponent::FreeSurfaceBoundary));
        assert!(!layout.contains(StateComponent::SurfaceTracerFlux(0)));
        // zeta 12, ubar 9, vbar 8, u 18, v 16, t 24, sustr 18, svstr 16
        assert_eq!(layout.len(), 12 + 9 + 8 + 18 + 16 + 24 + 18 + 16);
    }

    #[test]
    fn test_layout_rejects_duplicates() {
        let result = StateLayout::new(vec![
            (StateComponent::FreeSurface, 3),
            (StateComponent::FreeSurface, 3),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flat_round_trip_preserves_order() {
        let layout = StateLayout::new(vec![
            (StateComponent::UBarotropic, 2),
            (StateComponent::FreeSurface, 3),
        ])
        .unwrap();
        let flat = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let v = StateVector::from_flat(&layout, &flat).unwrap();
        // FreeSurface sorts before UBarotropic.
        assert_eq!(v.component(StateComponent::FreeSurface).unwrap()[0], 1.0);
        assert_eq!(v.component(StateComponent::UBarotropic).unwrap()[1], 5.0);
        assert_eq!(v.to_flat(), flat);
    }

    #[test]
    fn test_vector_space_laws() {
        let layout = StateLayout::single(7);
        let a = sample(&layout, 0.3);
        let b = sample(&layout, 1.7);

        let ab = StateVector::add(&a, &b, 2.0, -0.5).unwrap();
        let ba = StateVector::add(&b, &a, -0.5, 2.0).unwrap();
        for (x, y) in ab.to_flat().iter().zip(ba.to_flat()) {
            assert!((x - y).abs() < 1e-15);
        }

        let mut c = a.clone();
        c.axpy(3.0, &b).unwrap();
        let d = StateVector::add(&a, &b, 1.0, 3.0).unwrap();
        assert_eq!(c, d);

        let mut e = a.scaled(2.0);
        e.scale(0.5);
        assert_eq!(e, a);
    }

    #[test]
    fn test_copy_and_fill() {
        let layout = StateLayout::single(4);
        let a = sample(&layout, 0.1);
        let mut b = StateVector::zeros(&layout);
        b.copy_from(&a).unwrap();
        assert_eq!(a, b);
        b.fill(2.5);
        assert!(b.to_flat().iter().all(|&x| x == 2.5));
    }

    #[test]
    fn test_algebra_acts_on_every_component() {
        let layout = StateLayout::new(vec![
            (StateComponent::FreeSurface, 2),
            (StateComponent::UBarotropic, 3),
        ])
        .unwrap();
        let a = StateVector::from_flat(&layout, &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let b = StateVector::from_flat(&layout, &[1.0, 1.0, -1.0, -1.0, 0.5]).unwrap();

        let c = StateVector::add(&a, &b, 2.0, 4.0).unwrap();
        assert_eq!(c.to_flat(), vec![6.0, 8.0, 2.0, 4.0, 12.0]);

        let mut d = a.clone();
        d.axpy(-2.0, &b).unwrap();
        assert_eq!(d.to_flat(), vec![-1.0, 0.0, 5.0, 6.0, 4.0]);

        d.scale(-1.0);
        assert_eq!(d.to_flat(), vec![1.0, 0.0, -5.0, -6.0, -4.0]);

        d.fill(0.25);
        assert_eq!(d.to_flat(), vec![0.25; 5]);
    }

    #[test]
    fn test_mismatched_layouts_are_rejected() {
        let a = StateVector::zeros(&StateLayout::single(3));
        let b = StateVector::zeros(&StateLayout::single(4));
        assert!(StateVector::add(&a, &b, 1.0, 1.0).is_err());
        let mut c = a.clone();
        assert!(c.axpy(1.0, &b).is_err());
    }
}

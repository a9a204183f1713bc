//! Read-only grid masks and metric weights for the inner product.

use std::collections::BTreeMap;

use faer::{Col, unzip, zip};

use super::{StateComponent, StateLayout, StateVector};
use crate::error::{MinimizerErrorKind, MinimizerResult};

/// Land/sea mask and metric weight for one component's local tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentGrid {
    /// 1.0 at active points, 0.0 at masked (land) points.
    pub mask: Col<f64>,
    /// Positive metric weight (area or volume element) per point.
    pub metric: Col<f64>,
}

impl ComponentGrid {
    pub fn unmasked(n: usize) -> Self {
        Self {
            mask: Col::from_fn(n, |_| 1.0),
            metric: Col::from_fn(n, |_| 1.0),
        }
    }

    fn len(&self) -> usize {
        self.mask.nrows()
    }
}

/// Grid/mask provider: supplies a [`ComponentGrid`] for every component of a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    layout: StateLayout,
    grids: BTreeMap<StateComponent, ComponentGrid>,
}

impl Geometry {
    /// Unit mask and unit metric for every component: the plain Euclidean product.
    pub fn unmasked(layout: &StateLayout) -> Self {
        let grids = layout
            .iter()
            .map(|(c, n)| (c, ComponentGrid::unmasked(n)))
            .collect();
        Self {
            layout: layout.clone(),
            grids,
        }
    }

    /// Assembles a geometry from explicit per-component grids.
    ///
    /// Every component of `layout` must be supplied with matching lengths, masks
    /// must be 0/1 and metrics must be positive and finite.
    pub fn new(
        layout: &StateLayout,
        grids: impl IntoIterator<Item = (StateComponent, ComponentGrid)>,
    ) -> MinimizerResult<Self> {
        let grids: BTreeMap<_, _> = grids.into_iter().collect();
        for (c, n) in layout.iter() {
            let grid = grids.get(&c).ok_or_else(|| {
                MinimizerErrorKind::LayoutMismatch(format!("no grid supplied for component {c}"))
            })?;
            if grid.len() != n || grid.metric.nrows() != n {
                return Err(MinimizerErrorKind::LayoutMismatch(format!(
                    "grid for {c} has {} mask / {} metric points, layout expects {n}",
                    grid.len(),
                    grid.metric.nrows()
                ))
                .into());
            }
            for i in 0..n {
                let m = grid.mask[i];
                if m != 0.0 && m != 1.0 {
                    return Err(MinimizerErrorKind::InvalidInput(format!(
                        "mask of {c} at point {i} is {m}, expected 0 or 1"
                    ))
                    .into());
                }
                let w = grid.metric[i];
                if !(w.is_finite() && w > 0.0) {
                    return Err(MinimizerErrorKind::InvalidInput(format!(
                        "metric of {c} at point {i} is {w}, expected a positive value"
                    ))
                    .into());
                }
            }
        }
        if grids.len() != layout.iter().count() {
            return Err(MinimizerErrorKind::LayoutMismatch(
                "geometry supplies grids for components outside the layout".to_string(),
            )
            .into());
        }
        Ok(Self {
            layout: layout.clone(),
            grids,
        })
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn grid(&self, component: StateComponent) -> Option<&ComponentGrid> {
        self.grids.get(&component)
    }

    /// Local (this tile only) masked, metric-weighted sum `Σ mask·metric·a·b`.
    pub(crate) fn local_dot(&self, a: &StateVector, b: &StateVector) -> MinimizerResult<f64> {
        a.check_conforms(b)?;
        self.check_vector(a)?;
        let mut sum = 0.0;
        for ((c, sa), (_, sb)) in a.components().zip(b.components()) {
            // check_vector guarantees the grid exists.
            let Some(grid) = self.grids.get(&c) else {
                continue;
            };
            zip!(sa.as_ref(), sb.as_ref(), grid.mask.as_ref(), grid.metric.as_ref()).for_each(
                |unzip!(a, b, mask, metric)| {
                    sum += *mask * *metric * *a * *b;
                },
            );
        }
        Ok(sum)
    }

    /// Zeroes every masked point of `v`.
    pub fn apply_mask(&self, v: &mut StateVector) -> MinimizerResult<()> {
        self.check_vector(v)?;
        for (c, grid) in &self.grids {
            if let Some(slice) = v.component_mut(*c) {
                zip!(slice.as_mut(), grid.mask.as_ref()).for_each(|unzip!(value, mask)| {
                    *value *= *mask;
                });
            }
        }
        Ok(())
    }

    /// Fails unless `v` conforms to this geometry's layout.
    pub fn check_vector(&self, v: &StateVector) -> MinimizerResult<()> {
        if v.layout() == self.layout {
            Ok(())
        } else {
            Err(MinimizerErrorKind::LayoutMismatch(format!(
                "vector layout {:?} does not match the grid layout {:?}",
                v.layout(),
                self.layout
            ))
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_points_do_not_contribute() {
        let layout = StateLayout::single(3);
        let grid = ComponentGrid {
            mask: Col::from_fn(3, |i| if i == 1 { 0.0 } else { 1.0 }),
            metric: Col::from_fn(3, |i| (i + 1) as f64),
        };
        let geometry = Geometry::new(&layout, [(StateComponent::FreeSurface, grid)]).unwrap();
        let a = StateVector::from_flat(&layout, &[1.0, 100.0, 2.0]).unwrap();
        let b = StateVector::from_flat(&layout, &[3.0, 100.0, 4.0]).unwrap();
        // 1*1*3 + 0 + 3*2*4
        assert_eq!(geometry.local_dot(&a, &b).unwrap(), 27.0);

        let mut c = a.clone();
        geometry.apply_mask(&mut c).unwrap();
        assert_eq!(c.to_flat(), vec![1.0, 0.0, 2.0]);
    }

    #[test]
    fn test_metric_weights_each_component_separately() {
        let layout = StateLayout::new(vec![
            (StateComponent::FreeSurface, 2),
            (StateComponent::UBarotropic, 2),
        ])
        .unwrap();
        let surface = ComponentGrid {
            mask: Col::from_fn(2, |_| 1.0),
            metric: Col::from_fn(2, |_| 2.0),
        };
        let velocity = ComponentGrid {
            mask: Col::from_fn(2, |i| if i == 0 { 0.0 } else { 1.0 }),
            metric: Col::from_fn(2, |_| 0.5),
        };
        let geometry = Geometry::new(
            &layout,
            [
                (StateComponent::FreeSurface, surface),
                (StateComponent::UBarotropic, velocity),
            ],
        )
        .unwrap();
        let a = StateVector::from_flat(&layout, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        // 2 * (1 + 4) + 0.5 * 16
        assert_eq!(geometry.local_dot(&a, &a).unwrap(), 18.0);

        let mut masked = a.clone();
        geometry.apply_mask(&mut masked).unwrap();
        assert_eq!(masked.to_flat(), vec![1.0, 2.0, 0.0, 4.0]);
    }

    #[test]
    fn test_geometry_rejects_bad_grids() {
        let layout = StateLayout::single(2);
        let short = ComponentGrid::unmasked(3);
        assert!(Geometry::new(&layout, [(StateComponent::FreeSurface, short)]).is_err());

        let bad_mask = ComponentGrid {
            mask: Col::from_fn(2, |_| 0.5),
            metric: Col::from_fn(2, |_| 1.0),
        };
        assert!(Geometry::new(&layout, [(StateComponent::FreeSurface, bad_mask)]).is_err());

        assert!(Geometry::new(&layout, []).is_err());
    }
}

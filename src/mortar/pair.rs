//! Interface pairs: a slave facet and the master facet it may touch.
//!
//! For every slave node the closest point on the master facet is found
//! (line: clamped parameter, triangle: barycentric projection) and the
//! signed normal gap is evaluated with [`Fad`] so its derivative with
//! respect to every displacement dof of the pair comes for free. Slave
//! nodes are integrated with lumped weights (facet measure over node count).

use log::warn;

use crate::coupling_error::CouplingError;
use crate::discretization::{CellShape, NodeId};
use crate::fad::{Fad, cross3, dot3, sub3};
use crate::linalg::dof_map::Gid;
use crate::linalg::vector::DistVector;

/// A facet node: reference position and its displacement dofs.
#[derive(Clone, Debug, PartialEq)]
pub struct PairNode {
    pub node: NodeId,
    pub reference: [f64; 3],
    /// One id per spatial direction.
    pub dofs: Vec<Gid>,
}

impl PairNode {
    pub fn new(node: NodeId, reference: [f64; 3], dofs: Vec<Gid>) -> Self {
        PairNode {
            node,
            reference,
            dofs,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterfacePair {
    /// Segment (pair) id, reported back in contact points.
    pub segment: usize,
    pub slave_shape: CellShape,
    pub slave: Vec<PairNode>,
    pub master_shape: CellShape,
    pub master: Vec<PairNode>,
}

impl InterfacePair {
    /// Displacement dofs per node, taken from the first slave node.
    pub fn dofs_per_node(&self) -> usize {
        self.slave.first().map_or(0, |n| n.dofs.len())
    }

    /// Every dof of the pair: slave nodes first, then master nodes.
    pub fn dofs(&self) -> Vec<Gid> {
        self.slave
            .iter()
            .chain(&self.master)
            .flat_map(|n| n.dofs.iter().copied())
            .collect()
    }

    pub(crate) fn check_layout(&self) -> Result<(), CouplingError> {
        let per_node = self.dofs_per_node();
        let facets = [
            ("slave", self.slave_shape, &self.slave),
            ("master", self.master_shape, &self.master),
        ];
        for (side, shape, nodes) in facets {
            if nodes.len() != shape.num_nodes() {
                return Err(CouplingError::InvalidParameter(format!(
                    "pair {}: {side} facet {shape:?} has {} nodes",
                    self.segment,
                    nodes.len()
                )));
            }
            if let Some(n) = nodes.iter().find(|n| n.dofs.len() != per_node) {
                return Err(CouplingError::DofCountMismatch {
                    node: n.node,
                    expected: per_node,
                    found: n.dofs.len(),
                });
            }
        }
        Ok(())
    }

    /// Current positions as [`Fad`] vectors, one independent variable per
    /// pair dof in [`InterfacePair::dofs`] order.
    fn current_positions(
        &self,
        displacement: &DistVector,
    ) -> Result<Vec<[Fad; 3]>, CouplingError> {
        let n_var = (self.slave.len() + self.master.len()) * self.dofs_per_node();
        let mut var = 0;
        let mut out = Vec::with_capacity(self.slave.len() + self.master.len());
        for node in self.slave.iter().chain(&self.master) {
            let mut x = [
                Fad::constant(node.reference[0]),
                Fad::constant(node.reference[1]),
                Fad::constant(node.reference[2]),
            ];
            for (dim, &gid) in node.dofs.iter().enumerate() {
                let u = displacement.get(gid)?;
                x[dim] = Fad::variable(n_var, var, node.reference[dim] + u);
                var += 1;
            }
            out.push(x);
        }
        Ok(out)
    }
}

/// Geometric result for one projected slave node.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactPoint {
    pub slave_node: NodeId,
    /// Facet parameters of the closest point (`xi[1]` unused on lines).
    pub xi: [f64; 2],
    pub closest_point: [f64; 3],
    pub normal: [f64; 3],
    pub gap: f64,
    /// Lumped integration weight of the slave node.
    pub jacobian: f64,
    pub segment: usize,
}

/// Constraint contribution of one slave node: `weight * gap` and its
/// derivatives with respect to [`GapContribution::dofs`].
#[derive(Clone, Debug, PartialEq)]
pub struct GapContribution {
    pub slave_node: NodeId,
    pub weight: f64,
    pub weighted_gap: Fad,
    pub dofs: Vec<Gid>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PairEvaluation {
    pub points: Vec<ContactPoint>,
    pub contributions: Vec<GapContribution>,
}

fn values(v: &[Fad; 3]) -> [f64; 3] {
    [v[0].value(), v[1].value(), v[2].value()]
}

/// Lumped weight per slave node: facet length or area over node count.
fn slave_weight(shape: CellShape, x: &[[Fad; 3]]) -> Fad {
    match shape {
        CellShape::Line2 => {
            let t = sub3(&x[1], &x[0]);
            dot3(&t, &t).sqrt() * 0.5
        }
        CellShape::Tri3 => {
            let c = cross3(&sub3(&x[1], &x[0]), &sub3(&x[2], &x[0]));
            dot3(&c, &c).sqrt() * (1.0 / 6.0)
        }
    }
}

/// Line master facet in the x-y plane, two dofs per node.
pub fn evaluate_line2_2d(
    pair: &InterfacePair,
    displacement: &DistVector,
    tolerance: f64,
) -> Result<PairEvaluation, CouplingError> {
    let x = pair.current_positions(displacement)?;
    let ns = pair.slave.len();
    let (xs, xm) = x.split_at(ns);
    let weight = slave_weight(pair.slave_shape, xs);
    if weight.value() <= 0.0 {
        warn!("pair {}: degenerate slave facet", pair.segment);
        return Ok(PairEvaluation::default());
    }

    let t = sub3(&xm[1], &xm[0]);
    let len2 = dot3(&t, &t);
    if len2.value() <= 0.0 {
        warn!("pair {}: degenerate master facet", pair.segment);
        return Ok(PairEvaluation::default());
    }
    let len = len2.sqrt();
    let normal = [-&t[1] / &len, &t[0] / &len, Fad::constant(0.0)];

    let dofs = pair.dofs();
    let mut out = PairEvaluation::default();
    for (slave, xs_i) in pair.slave.iter().zip(xs) {
        let d = sub3(xs_i, &xm[0]);
        let xi = (&dot3(&d, &t) / &len2).value();
        if xi < -tolerance || xi > 1.0 + tolerance {
            continue;
        }
        let gap = dot3(&d, &normal);
        let tv = values(&t);
        let x0 = values(&xm[0]);
        out.points.push(ContactPoint {
            slave_node: slave.node,
            xi: [xi, 0.0],
            closest_point: [x0[0] + xi * tv[0], x0[1] + xi * tv[1], 0.0],
            normal: values(&normal),
            gap: gap.value(),
            jacobian: weight.value(),
            segment: pair.segment,
        });
        out.contributions.push(GapContribution {
            slave_node: slave.node,
            weight: weight.value(),
            weighted_gap: &weight * &gap,
            dofs: dofs.clone(),
        });
    }
    Ok(out)
}

/// Triangle master facet in 3D, three dofs per node.
pub fn evaluate_tri3_3d(
    pair: &InterfacePair,
    displacement: &DistVector,
    tolerance: f64,
) -> Result<PairEvaluation, CouplingError> {
    let x = pair.current_positions(displacement)?;
    let ns = pair.slave.len();
    let (xs, xm) = x.split_at(ns);
    let weight = slave_weight(pair.slave_shape, xs);
    if weight.value() <= 0.0 {
        warn!("pair {}: degenerate slave facet", pair.segment);
        return Ok(PairEvaluation::default());
    }

    let e1 = sub3(&xm[1], &xm[0]);
    let e2 = sub3(&xm[2], &xm[0]);
    let c = cross3(&e1, &e2);
    let area2 = dot3(&c, &c).sqrt();
    if area2.value() <= 0.0 {
        warn!("pair {}: degenerate master facet", pair.segment);
        return Ok(PairEvaluation::default());
    }
    let normal = [&c[0] / &area2, &c[1] / &area2, &c[2] / &area2];

    // in-plane metric for the barycentric solve
    let (e1v, e2v) = (values(&e1), values(&e2));
    let dot = |a: [f64; 3], b: [f64; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    let (g11, g12, g22) = (dot(e1v, e1v), dot(e1v, e2v), dot(e2v, e2v));
    let det = g11 * g22 - g12 * g12;

    let dofs = pair.dofs();
    let mut out = PairEvaluation::default();
    for (slave, xs_i) in pair.slave.iter().zip(xs) {
        let d = sub3(xs_i, &xm[0]);
        let dv = values(&d);
        let (r1, r2) = (dot(dv, e1v), dot(dv, e2v));
        let a = (g22 * r1 - g12 * r2) / det;
        let b = (g11 * r2 - g12 * r1) / det;
        if a < -tolerance || b < -tolerance || a + b > 1.0 + tolerance {
            continue;
        }
        let gap = dot3(&d, &normal);
        let x0 = values(&xm[0]);
        out.points.push(ContactPoint {
            slave_node: slave.node,
            xi: [a, b],
            closest_point: std::array::from_fn(|k| x0[k] + a * e1v[k] + b * e2v[k]),
            normal: values(&normal),
            gap: gap.value(),
            jacobian: weight.value(),
            segment: pair.segment,
        });
        out.contributions.push(GapContribution {
            slave_node: slave.node,
            weight: weight.value(),
            weighted_gap: &weight * &gap,
            dofs: dofs.clone(),
        });
    }
    Ok(out)
}

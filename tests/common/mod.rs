#![allow(dead_code)]

use posendf::{
    body_model::{BodyModel, BodyModelOutput},
    common::*,
    model::DistanceField,
    params,
};
use std::cell::Cell;

/// A linear stand-in for SMPL: vertices move linearly with pose and shape,
/// joints are fixed averages of vertices.
pub struct LinearBodyModel {
    template: Tensor,
    pose_basis: Tensor,
    shape_basis: Tensor,
    regressor: Tensor,
    faces: Tensor,
}

impl LinearBodyModel {
    pub fn new(num_vertices: i64, num_joints: i64) -> Self {
        tch::manual_seed(7);
        let options = (Kind::Float, Device::Cpu);
        let template = Tensor::randn(&[num_vertices, 3], options);
        let pose_basis = Tensor::randn(&[params::BODY_POSE_SIZE, num_vertices * 3], options) * 0.1;
        let shape_basis = Tensor::randn(&[params::NUM_BETAS, num_vertices * 3], options) * 0.1;
        let regressor = Tensor::rand(&[num_joints, num_vertices], options);
        let regressor = &regressor / regressor.sum_dim_intlist(&[1_i64][..], true, Kind::Float);
        let faces = Tensor::arange(num_vertices - num_vertices % 3, (Kind::Int64, Device::Cpu))
            .view([-1, 3]);

        Self {
            template,
            pose_basis,
            shape_basis,
            regressor,
            faces,
        }
    }
}

impl BodyModel for LinearBodyModel {
    fn forward(&self, betas: &Tensor, body_pose: &Tensor) -> Fallible<BodyModelOutput> {
        let batch_size = body_pose.size()[0];
        let (num_vertices, _) = self.template.size2()?;
        let offsets = body_pose.matmul(&self.pose_basis) + betas.matmul(&self.shape_basis);
        let vertices = offsets.view([batch_size, num_vertices, 3]) + &self.template;
        let joints = self.regressor.matmul(&vertices);
        Ok(BodyModelOutput { vertices, joints })
    }

    fn faces(&self) -> &Tensor {
        &self.faces
    }
}

/// Squared distance of every joint rotation to a fixed anchor pose.
///
/// The manifold is the anchor itself, and the gradient vanishes there.
pub struct AnchorDistanceField {
    anchor: Tensor,
}

impl AnchorDistanceField {
    /// Anchored at the identity rotation.
    pub fn identity() -> Self {
        let anchor = Tensor::from_slice(&[1_f32, 0., 0., 0.]).view([1, 1, 4]);
        Self { anchor }
    }

    /// Anchored at `[1, 21, 4]` quaternions.
    pub fn at(anchor: Tensor) -> Self {
        Self { anchor }
    }
}

impl DistanceField for AnchorDistanceField {
    fn predict(&self, quaternions: &Tensor) -> Fallible<Tensor> {
        let distance = (quaternions - &self.anchor).pow_tensor_scalar(2).sum_dim_intlist(
            &[1_i64, 2][..],
            false,
            Kind::Float,
        );
        Ok(distance)
    }
}

/// Returns NaN for every input, still attached to the input graph.
pub struct NanDistanceField;

impl DistanceField for NanDistanceField {
    fn predict(&self, quaternions: &Tensor) -> Fallible<Tensor> {
        let zeros = quaternions.sum_dim_intlist(&[1_i64, 2][..], false, Kind::Float) * 0.;
        Ok(zeros + f64::NAN)
    }
}

/// Counts how often the wrapped field is queried.
pub struct CountingDistanceField<F> {
    pub inner: F,
    pub count: Cell<usize>,
}

impl<F> CountingDistanceField<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            count: Cell::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.count.get()
    }
}

impl<F> DistanceField for CountingDistanceField<F>
where
    F: DistanceField,
{
    fn predict(&self, quaternions: &Tensor) -> Fallible<Tensor> {
        self.count.set(self.count.get() + 1);
        self.inner.predict(quaternions)
    }
}

pub fn zero_poses(batch_size: i64) -> Tensor {
    Tensor::zeros(&[batch_size, params::BODY_POSE_SIZE], (Kind::Float, Device::Cpu))
}

/// `[B, 69]` poses with small random rotations on the 21 manifold joints.
pub fn random_poses(batch_size: i64, scale: f64) -> Tensor {
    let manifold = Tensor::randn(
        &[batch_size, params::MANIFOLD_POSE_SIZE],
        (Kind::Float, Device::Cpu),
    ) * scale;
    Tensor::cat(
        &[
            manifold,
            Tensor::zeros(
                &[batch_size, params::BODY_POSE_SIZE - params::MANIFOLD_POSE_SIZE],
                (Kind::Float, Device::Cpu),
            ),
        ],
        1,
    )
}

pub fn max_abs_diff(lhs: &Tensor, rhs: &Tensor) -> f64 {
    (lhs - rhs).abs().max().double_value(&[])
}

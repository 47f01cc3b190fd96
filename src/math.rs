use crate::{common::*, params};

/// Euclidean norm over the last dimension.
///
/// The squared norm is floored at [NORM_EPS](params::NORM_EPS) before the square root,
/// so the gradient vanishes instead of turning into NaN when two points coincide.
pub fn safe_norm(x: &Tensor, keepdim: bool) -> Tensor {
    x.pow_tensor_scalar(2)
        .sum_dim_intlist(&[-1_i64][..], keepdim, x.kind())
        .clamp_min(params::NORM_EPS)
        .sqrt()
}

/// Mean point-to-point distance between two `[B, N, 3]` point sets.
pub fn mean_point_distance(lhs: &Tensor, rhs: &Tensor) -> Tensor {
    safe_norm(&(lhs - rhs), false).mean(lhs.kind())
}

/// Mean distance between consecutive frames of a `[B, N, 3]` point sequence.
pub fn mean_frame_displacement(points: &Tensor) -> Tensor {
    let num_frames = points.size()[0];
    if num_frames < 2 {
        return Tensor::zeros(&[], (points.kind(), points.device()));
    }
    let prev = points.narrow(0, 0, num_frames - 1);
    let next = points.narrow(0, 1, num_frames - 1);
    mean_point_distance(&prev, &next)
}

/// Vertex-to-vertex error in centimetres.
pub fn v2v_error(vertices: &Tensor, reference: &Tensor) -> f64 {
    tch::no_grad(|| {
        let diff = vertices - reference;
        let dist = diff
            .pow_tensor_scalar(2)
            .sum_dim_intlist(&[-1_i64][..], false, diff.kind())
            .sqrt();
        dist.mean(Kind::Double).double_value(&[]) * params::V2V_SCALE
    })
}

/// Scalar value of a zero-dimension tensor.
pub fn scalar(tensor: &Tensor) -> f64 {
    tensor.double_value(&[])
}

use static_assertions::const_assert;

// pose layout
pub const NUM_BODY_JOINTS: i64 = 23; // joints in the axis-angle body pose (no root)
pub const NUM_MANIFOLD_JOINTS: i64 = 21; // joints constrained by the distance field; the rest are hands
pub const AXIS_ANGLE_CHANNELS: i64 = 3;
pub const QUATERNION_CHANNELS: i64 = 4;
pub const BODY_POSE_SIZE: i64 = NUM_BODY_JOINTS * AXIS_ANGLE_CHANNELS; // 69
pub const MANIFOLD_POSE_SIZE: i64 = NUM_MANIFOLD_JOINTS * AXIS_ANGLE_CHANNELS; // 63
pub const NUM_BETAS: i64 = 10;

const_assert!(NUM_MANIFOLD_JOINTS <= NUM_BODY_JOINTS);

// hyper-parameters: denoising
pub const DENOISE_ITERATIONS: usize = 10;
pub const DENOISE_STEPS_PER_ITER: usize = 50;
pub const ADAM_LR: f64 = 0.03;
pub const ADAM_BETA1: f64 = 0.9;
pub const ADAM_BETA2: f64 = 0.999;

// hyper-parameters: loss weights
pub const TEMPORAL_WEIGHT: f64 = 1e1;
pub const DATA_WEIGHT: f64 = 1e1;
pub const POSE_PRIOR_WEIGHT: f64 = 1e7;

// hyper-parameters: sampling
pub const PROJECTION_STEPS: usize = 10;
pub const SAMPLE_BATCH_SIZE: i64 = 10;

// numerics
pub const NORM_EPS: f64 = 1e-12; // squared-norm floor, keeps sqrt differentiable at zero
pub const SMALL_ANGLE_EPS: f64 = 1e-6;
pub const V2V_SCALE: f64 = 100.; // metres to centimetres

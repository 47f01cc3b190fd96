mod common;

use common::{
    max_abs_diff, random_poses, zero_poses, AnchorDistanceField, CountingDistanceField,
    LinearBodyModel, NanDistanceField,
};
use posendf::{
    body_model,
    common::*,
    config::{DenoiseConfig, EarlyStopConfig},
    denoise::{MotionDenoiser, StepReport},
    error::PoseNdfError,
    model::{DecoderInit, DistanceField, EncoderInit, PoseNdf, PoseNdfInit},
    quaternion,
    schedule::{LossTerm, WeightFn, WeightSchedule},
};

fn config(iterations: usize, steps_per_iter: usize) -> DenoiseConfig {
    DenoiseConfig {
        iterations,
        steps_per_iter,
        ..Default::default()
    }
}

/// Predicts `value(n)` on the n-th query, independent of the input values.
struct QueryCountDistanceField {
    calls: std::cell::Cell<usize>,
    value: fn(usize) -> f64,
}

impl QueryCountDistanceField {
    fn new(value: fn(usize) -> f64) -> Self {
        Self {
            calls: std::cell::Cell::new(0),
            value,
        }
    }
}

impl DistanceField for QueryCountDistanceField {
    fn predict(&self, quaternions: &Tensor) -> Fallible<Tensor> {
        self.calls.set(self.calls.get() + 1);
        let zeros = quaternions.sum_dim_intlist(&[1_i64, 2][..], false, Kind::Float) * 0.;
        Ok(zeros + (self.value)(self.calls.get()))
    }
}

/// Returns a constant that is cut off from the input graph.
struct DetachedDistanceField;

impl DistanceField for DetachedDistanceField {
    fn predict(&self, quaternions: &Tensor) -> Fallible<Tensor> {
        let batch_size = quaternions.size()[0];
        Ok(Tensor::ones(&[batch_size], (Kind::Float, Device::Cpu)))
    }
}

#[test]
fn static_identity_sequence_stays_put() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = AnchorDistanceField::identity();
    let poses = zero_poses(5);
    let betas = body_model::zero_betas(5, Device::Cpu);

    let denoiser = MotionDenoiser::new(&field, &body_model, config(1, 50));
    let output = denoiser.optimize(&poses, Some(&poses), &betas).unwrap();

    assert_eq!(output.steps, 50);
    assert!(output.initial_v2v < 1e-6);
    assert!(output.v2v_error < 1e-3);
    assert!(max_abs_diff(&output.poses, &poses) < 1e-6);
    assert!(output.warnings.is_empty());
}

#[test]
fn clean_input_is_not_made_worse() {
    let body_model = LinearBodyModel::new(30, 8);
    let frame = random_poses(1, 0.3);
    let poses = frame.repeat(&[4, 1]);
    let anchor = quaternion::body_pose_to_quaternions(&frame).unwrap();
    let field = AnchorDistanceField::at(anchor);
    let betas = body_model::zero_betas(4, Device::Cpu);

    let denoiser = MotionDenoiser::new(&field, &body_model, config(2, 10));
    let output = denoiser.optimize(&poses, Some(&poses), &betas).unwrap();

    assert!(output.v2v_error <= output.initial_v2v + 1e-4);
}

#[test]
fn noise_is_pulled_towards_the_manifold() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = AnchorDistanceField::identity();
    let gt_poses = zero_poses(5);
    let noisy_poses = random_poses(5, 0.1);
    let betas = body_model::zero_betas(5, Device::Cpu);

    let denoiser = MotionDenoiser::new(&field, &body_model, config(1, 40));
    let output = denoiser
        .optimize(&noisy_poses, Some(&gt_poses), &betas)
        .unwrap();

    assert!(output.initial_v2v > 0.);
    assert!(output.v2v_error < output.initial_v2v);
}

#[test]
fn betas_are_left_untouched() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = AnchorDistanceField::identity();
    let poses = random_poses(3, 0.2);
    let betas = Tensor::randn(&[3, 10], (Kind::Float, Device::Cpu));
    let betas_before = betas.copy();

    let denoiser = MotionDenoiser::new(&field, &body_model, config(2, 5));
    denoiser.optimize(&poses, None, &betas).unwrap();

    assert!(betas.equal(&betas_before));
}

#[test]
fn data_term_is_skipped_on_the_very_first_step_only() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = AnchorDistanceField::identity();
    let poses = random_poses(3, 0.2);
    let betas = body_model::zero_betas(3, Device::Cpu);

    let mut reports: Vec<StepReport> = vec![];
    let denoiser = MotionDenoiser::new(&field, &body_model, config(2, 3));
    denoiser
        .optimize_with(&poses, None, &betas, |report| reports.push(report.clone()))
        .unwrap();

    assert_eq!(reports.len(), 6);
    for report in &reports {
        let has_data = report.losses.contains_key(&LossTerm::Data);
        let first = report.iteration == 0 && report.step == 0;
        assert_eq!(has_data, !first);
        assert!(report.losses.contains_key(&LossTerm::PosePrior));
        assert!(report.losses.contains_key(&LossTerm::Temporal));
    }
}

#[test]
fn every_step_queries_the_distance_field_once() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = CountingDistanceField::new(AnchorDistanceField::identity());
    let poses = random_poses(2, 0.2);
    let betas = body_model::zero_betas(2, Device::Cpu);

    let denoiser = MotionDenoiser::new(&field, &body_model, config(3, 4));
    let output = denoiser.optimize(&poses, None, &betas).unwrap();

    assert_eq!(output.steps, 12);
    assert_eq!(field.count(), 12);
}

#[test]
fn frozen_network_weights_do_not_change() {
    let body_model = LinearBodyModel::new(30, 8);
    let init = PoseNdfInit {
        encoder: EncoderInit {
            hidden_channels: vec![8],
            out_channels: 2,
        },
        decoder: DecoderInit {
            hidden_channels: vec![16],
        },
        ..Default::default()
    };
    let field = PoseNdf::new(init, Device::Cpu);
    let weights_before = field
        .var_store()
        .variables()
        .into_iter()
        .map(|(name, var)| (name, var.copy()))
        .collect::<HashMap<_, _>>();

    let poses = random_poses(3, 0.2);
    let betas = body_model::zero_betas(3, Device::Cpu);
    let denoiser = MotionDenoiser::new(&field, &body_model, config(1, 5));
    let output = denoiser.optimize(&poses, None, &betas).unwrap();
    assert_eq!(output.steps, 5);

    let weights_after = field.var_store().variables();
    assert_eq!(weights_before.len(), weights_after.len());
    for (name, before) in &weights_before {
        assert!(before.equal(&weights_after[name]), "{} changed", name);
    }
}

#[test]
fn rising_distance_is_reported_as_a_warning() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = QueryCountDistanceField::new(|calls| calls as f64);
    let poses = zero_poses(2);
    let betas = body_model::zero_betas(2, Device::Cpu);

    let denoiser = MotionDenoiser::new(&field, &body_model, config(3, 2));
    let output = denoiser.optimize(&poses, None, &betas).unwrap();

    // unweighted means per iteration are about 1.5, 3.5 and 5.5
    assert_eq!(output.warnings.len(), 2);
    assert_eq!(output.warnings[0].iteration, 1);
    assert!((output.warnings[0].previous - 1.5).abs() < 1e-3);
    assert!((output.warnings[0].current - 3.5).abs() < 1e-3);
    assert_eq!(output.warnings[1].iteration, 2);
}

#[test]
fn growing_weights_alone_do_not_warn() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = QueryCountDistanceField::new(|calls| 1. / calls as f64);
    let poses = zero_poses(2);
    let betas = body_model::zero_betas(2, Device::Cpu);

    let schedule = WeightSchedule::new(hashmap! {
        LossTerm::PosePrior => Box::new(|loss: &Tensor, it: usize| loss * 10_f64.powi(it as i32)) as WeightFn,
        LossTerm::Temporal => Box::new(|loss: &Tensor, _it: usize| loss * 0.) as WeightFn,
        LossTerm::Data => Box::new(|loss: &Tensor, _it: usize| loss * 0.) as WeightFn,
    });
    let mut totals = vec![];
    let denoiser = MotionDenoiser::new(&field, &body_model, config(3, 2)).with_schedule(schedule);
    let output = denoiser
        .optimize_with(&poses, None, &betas, |report| totals.push(report.total_loss))
        .unwrap();

    // the weighted total rises from one iteration to the next
    assert!(totals[2] > totals[1] && totals[4] > totals[3]);
    assert!(output.warnings.is_empty());
    assert!((output.final_losses[&LossTerm::PosePrior] - 100. / 6.).abs() < 1e-3);
}

#[test]
fn early_stop_ends_a_stalled_run() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = AnchorDistanceField::identity();
    let poses = zero_poses(3);
    let betas = body_model::zero_betas(3, Device::Cpu);

    let config = DenoiseConfig {
        early_stop: Some(EarlyStopConfig {
            min_rel_improvement: 10.,
        }),
        ..config(5, 3)
    };
    let denoiser = MotionDenoiser::new(&field, &body_model, config);
    let output = denoiser.optimize(&poses, None, &betas).unwrap();

    assert_eq!(output.steps, 6);
    assert!(!output.interrupted);
}

#[test]
fn raised_interrupt_returns_the_input_pose() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = AnchorDistanceField::identity();
    let poses = random_poses(3, 0.2);
    let betas = body_model::zero_betas(3, Device::Cpu);

    let flag = Arc::new(AtomicBool::new(true));
    let denoiser = MotionDenoiser::new(&field, &body_model, config(2, 5)).with_interrupt(flag);
    let output = denoiser.optimize(&poses, None, &betas).unwrap();

    assert!(output.interrupted);
    assert_eq!(output.steps, 0);
    assert!(output.poses.equal(&poses));
    assert!(output.v2v_error < 1e-6);
}

#[test]
fn nan_distances_are_rejected() {
    let body_model = LinearBodyModel::new(30, 8);
    let poses = random_poses(2, 0.2);
    let betas = body_model::zero_betas(2, Device::Cpu);

    let denoiser = MotionDenoiser::new(&NanDistanceField, &body_model, config(1, 2));
    let err = denoiser.optimize(&poses, None, &betas).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PoseNdfError>(),
        Some(PoseNdfError::ManifoldQueryFailure(_))
    ));
}

#[test]
fn detached_distances_are_rejected() {
    let body_model = LinearBodyModel::new(30, 8);
    let poses = zero_poses(1);
    let betas = body_model::zero_betas(1, Device::Cpu);

    let mut num_reports = 0;
    let denoiser = MotionDenoiser::new(&DetachedDistanceField, &body_model, config(1, 3));
    let err = denoiser
        .optimize_with(&poses, None, &betas, |_| num_reports += 1)
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PoseNdfError>(),
        Some(PoseNdfError::ManifoldQueryFailure(_))
    ));
    assert_eq!(num_reports, 0);
}

#[test]
fn diverging_loss_is_rejected() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = AnchorDistanceField::identity();
    let poses = random_poses(2, 0.2);
    let betas = body_model::zero_betas(2, Device::Cpu);

    let schedule = WeightSchedule::new(hashmap! {
        LossTerm::PosePrior => Box::new(|loss: &Tensor, _it: usize| loss * 1.) as WeightFn,
        LossTerm::Temporal => Box::new(|loss: &Tensor, _it: usize| loss * 1.) as WeightFn,
        LossTerm::Data => Box::new(|loss: &Tensor, _it: usize| loss * f64::INFINITY) as WeightFn,
    });
    let denoiser = MotionDenoiser::new(&field, &body_model, config(1, 3)).with_schedule(schedule);
    let err = denoiser.optimize(&poses, None, &betas).unwrap_err();

    match err.downcast_ref::<PoseNdfError>() {
        Some(PoseNdfError::NonFiniteLoss {
            iteration,
            step,
            term,
        }) => {
            assert_eq!((*iteration, *step), (0, 1));
            assert_eq!(term, "data");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn malformed_poses_are_rejected() {
    let body_model = LinearBodyModel::new(30, 8);
    let field = AnchorDistanceField::identity();
    let poses = Tensor::zeros(&[3, 63], (Kind::Float, Device::Cpu));
    let betas = body_model::zero_betas(3, Device::Cpu);

    let denoiser = MotionDenoiser::new(&field, &body_model, config(1, 2));
    let err = denoiser.optimize(&poses, None, &betas).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PoseNdfError>(),
        Some(PoseNdfError::InvalidPoseShape { .. })
    ));
}

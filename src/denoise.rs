//! Motion denoising by gradient descent on the pose manifold.

use crate::{
    body_model::{self, BodyModel, BodyModelOutput},
    common::*,
    config::{DenoiseConfig, EarlyStopConfig},
    error::{ConvergenceWarning, PoseNdfError},
    export::Visualizer,
    math,
    model::{self, DistanceField},
    quaternion,
    schedule::{self, LossDict, LossTerm, WeightSchedule},
};

/// The pose variable and the position of the optimizer in the nested loops.
#[derive(Debug)]
pub struct OptimizationState {
    /// `[B, 69]` axis-angle pose, the only trainable tensor.
    pub pose: Tensor,
    pub iteration: usize,
    pub step: usize,
}

impl OptimizationState {
    /// The data term is left out on the very first step.
    pub fn is_first_step(&self) -> bool {
        self.iteration == 0 && self.step == 0
    }
}

/// Progress of one inner optimization step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub iteration: usize,
    pub step: usize,
    /// Weighted loss terms of the step.
    pub losses: HashMap<LossTerm, f64>,
    pub total_loss: f64,
    /// Vertex-to-vertex error of the pose before the update, in centimetres.
    pub v2v: f64,
}

#[derive(Debug)]
pub struct DenoiseOutput {
    /// `[B, 69]` denoised poses, detached from any graph.
    pub poses: Tensor,
    pub initial_v2v: f64,
    pub v2v_error: f64,
    pub final_losses: HashMap<LossTerm, f64>,
    pub warnings: Vec<ConvergenceWarning>,
    pub steps: usize,
    pub interrupted: bool,
}

impl DenoiseOutput {
    pub fn summary(&self) -> DenoiseSummary {
        DenoiseSummary {
            initial_v2v: self.initial_v2v,
            v2v_error: self.v2v_error,
            final_losses: self.final_losses.clone(),
            warnings: self.warnings.clone(),
            steps: self.steps,
            interrupted: self.interrupted,
        }
    }
}

/// The part of [DenoiseOutput] written to `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct DenoiseSummary {
    pub initial_v2v: f64,
    pub v2v_error: f64,
    pub final_losses: HashMap<LossTerm, f64>,
    pub warnings: Vec<ConvergenceWarning>,
    pub steps: usize,
    pub interrupted: bool,
}

/// Pulls a noisy pose sequence onto the learned pose manifold while keeping
/// it smooth in time and close to the observed joints.
pub struct MotionDenoiser<'a> {
    distance_field: &'a dyn DistanceField,
    body_model: &'a dyn BodyModel,
    schedule: WeightSchedule,
    config: DenoiseConfig,
    visualizer: Option<&'a dyn Visualizer>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> MotionDenoiser<'a> {
    pub fn new(
        distance_field: &'a dyn DistanceField,
        body_model: &'a dyn BodyModel,
        config: DenoiseConfig,
    ) -> Self {
        Self {
            distance_field,
            body_model,
            schedule: WeightSchedule::denoise(),
            config,
            visualizer: None,
            interrupt: None,
        }
    }

    pub fn with_visualizer(mut self, visualizer: &'a dyn Visualizer) -> Self {
        self.visualizer = Some(visualizer);
        self
    }

    /// Stops the loops at the next step once `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn with_schedule(mut self, schedule: WeightSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn optimize(
        &self,
        noisy_poses: &Tensor,
        gt_poses: Option<&Tensor>,
        betas: &Tensor,
    ) -> Fallible<DenoiseOutput> {
        self.optimize_with(noisy_poses, gt_poses, betas, |_| ())
    }

    /// Like [MotionDenoiser::optimize], calling `on_step` after every update.
    pub fn optimize_with<F>(
        &self,
        noisy_poses: &Tensor,
        gt_poses: Option<&Tensor>,
        betas: &Tensor,
        mut on_step: F,
    ) -> Fallible<DenoiseOutput>
    where
        F: FnMut(&StepReport),
    {
        let DenoiseConfig {
            iterations,
            steps_per_iter,
            learning_rate,
            adam_beta1,
            adam_beta2,
            ref early_stop,
        } = self.config;
        ensure!(steps_per_iter > 0, "steps_per_iter must be positive");

        quaternion::check_body_pose(noisy_poses)?;
        let device = noisy_poses.device();
        let noisy_poses = noisy_poses.detach().to_kind(Kind::Float);
        let betas = betas.detach();

        // anchors of the data term and the error metric
        let init = tch::no_grad(|| body_model::pose_mesh(self.body_model, &betas, &noisy_poses))?
            .detach();
        self.visualize(&init.vertices, "init")?;

        let gt = match gt_poses {
            Some(gt_poses) => {
                if gt_poses.size() != noisy_poses.size() {
                    return Err(PoseNdfError::invalid_shape(
                        format!("{:?}", noisy_poses.size()),
                        gt_poses,
                    )
                    .into());
                }
                let gt_poses = gt_poses.detach().to_kind(Kind::Float).to_device(device);
                let gt = tch::no_grad(|| body_model::pose_mesh(self.body_model, &betas, &gt_poses))?
                    .detach();
                self.visualize(&gt.vertices, "gt")?;
                Some(gt)
            }
            None => None,
        };
        let reference = gt.as_ref().unwrap_or(&init);
        let initial_v2v = math::v2v_error(&init.vertices, &reference.vertices);
        info!("initial v2v error {:.8} cm", initial_v2v);

        let vs = VarStore::new(device);
        let pose = vs.root().var_copy("body_pose", &noisy_poses);
        let mut optimizer = Adam {
            beta1: adam_beta1,
            beta2: adam_beta2,
            ..Default::default()
        }
        .build(&vs, learning_rate)?;

        let mut state = OptimizationState {
            pose,
            iteration: 0,
            step: 0,
        };
        let mut warnings = vec![];
        let mut final_losses = HashMap::new();
        let mut prev_mean_loss: Option<f64> = None;
        let mut num_steps = 0;
        let mut interrupted = false;

        'outer: for iteration in 0..iterations {
            state.iteration = iteration;
            let iteration_instant = Instant::now();
            let mut raw_loss_sum = 0.0;

            for step in 0..steps_per_iter {
                state.step = step;
                if self.is_interrupted() {
                    warn!("interrupted at iteration {}, step {}", iteration, step);
                    interrupted = true;
                    break 'outer;
                }

                let (losses, mesh) = self.compute_losses(&state, &betas, &init.joints)?;
                let weighted = self.schedule.weigh_all(&losses, iteration)?;
                let weighted_values = weighted
                    .iter()
                    .map(|(&term, loss)| {
                        let value = math::scalar(loss);
                        if value.is_finite() {
                            Ok((term, value))
                        } else {
                            Err(PoseNdfError::NonFiniteLoss {
                                iteration,
                                step,
                                term: term.to_string(),
                            })
                        }
                    })
                    .collect::<Result<HashMap<_, _>, _>>()?;
                let total_loss = schedule::total_loss(&weighted)?;
                let raw_loss: f64 = losses.values().map(math::scalar).sum();

                optimizer.zero_grad();
                total_loss.backward();
                let grad = state.pose.grad();
                if !grad.defined() || grad.isfinite().all().int64_value(&[]) != 1 {
                    return Err(PoseNdfError::NonFiniteLoss {
                        iteration,
                        step,
                        term: "gradient".into(),
                    }
                    .into());
                }
                optimizer.step();
                num_steps += 1;

                let report = StepReport {
                    iteration,
                    step,
                    total_loss: math::scalar(&total_loss),
                    losses: weighted_values,
                    v2v: math::v2v_error(&mesh.vertices, &reference.vertices),
                };
                debug!(
                    "iteration {} step {}: loss {:.8} ({}) v2v {:.6} cm",
                    iteration,
                    step,
                    report.total_loss,
                    report
                        .losses
                        .iter()
                        .sorted_by_key(|(term, _)| **term)
                        .map(|(term, value)| format!("{}: {:.8}", term, value))
                        .join(", "),
                    report.v2v
                );
                raw_loss_sum += raw_loss;
                on_step(&report);
                final_losses = report.losses;
            }

            // the schedule rescales the terms every iteration, so progress is
            // measured on the unweighted losses
            let mean_loss = raw_loss_sum / steps_per_iter as f64;
            info!(
                "iteration {}/{}: mean unweighted loss {:.8}, elapsed {}ms",
                iteration + 1,
                iterations,
                mean_loss,
                iteration_instant.elapsed().as_millis()
            );

            if let Some(previous) = prev_mean_loss {
                if mean_loss > previous {
                    let warning = ConvergenceWarning {
                        iteration,
                        previous,
                        current: mean_loss,
                    };
                    warn!("{}", warning);
                    warnings.push(warning);
                }

                if let Some(EarlyStopConfig {
                    min_rel_improvement,
                }) = *early_stop
                {
                    let improvement = (previous - mean_loss) / previous.abs().max(f64::EPSILON);
                    if improvement < min_rel_improvement {
                        info!(
                            "stopping early after iteration {}: relative improvement {:.3e}",
                            iteration, improvement
                        );
                        break;
                    }
                }
            }
            prev_mean_loss = Some(mean_loss);
        }

        let poses = state.pose.detach().copy();
        let out = tch::no_grad(|| body_model::pose_mesh(self.body_model, &betas, &poses))?;
        self.visualize(&out.vertices, "out")?;
        let v2v_error = math::v2v_error(&out.vertices, &reference.vertices);
        info!(
            "v2v error {:.8} cm (initial {:.8} cm) after {} steps",
            v2v_error, initial_v2v, num_steps
        );

        Ok(DenoiseOutput {
            poses,
            initial_v2v,
            v2v_error,
            final_losses,
            warnings,
            steps: num_steps,
            interrupted,
        })
    }

    /// Raw loss terms of the current pose, together with the posed mesh.
    pub fn compute_losses(
        &self,
        state: &OptimizationState,
        betas: &Tensor,
        init_joints: &Tensor,
    ) -> Fallible<(LossDict, BodyModelOutput)> {
        let mut losses = LossDict::new();

        let quaternions = quaternion::body_pose_to_quaternions(&state.pose)?;
        let distance = model::query_distance(self.distance_field, &quaternions)?;
        losses.insert(LossTerm::PosePrior, distance.mean(Kind::Float));

        let mesh = body_model::pose_mesh(self.body_model, betas, &state.pose)?;
        losses.insert(
            LossTerm::Temporal,
            math::mean_frame_displacement(&mesh.vertices),
        );

        if !state.is_first_step() {
            losses.insert(
                LossTerm::Data,
                math::mean_point_distance(&mesh.joints, init_joints),
            );
        }

        Ok((losses, mesh))
    }

    fn visualize(&self, vertices: &Tensor, prefix: &str) -> Fallible<()> {
        if let Some(visualizer) = self.visualizer {
            visualizer.visualize(vertices, self.body_model.faces(), prefix)?;
        }
        Ok(())
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

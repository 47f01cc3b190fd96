use posendf::{
    body_model::{self, BodyModel, ScriptedBodyModel},
    common::*,
    config::Config,
    denoise::{DenoiseOutput, MotionDenoiser},
    export::MeshExporter,
    model::{self, DistanceField},
    motion,
    sample::{self, PoseProjectionSampler},
};

const POSES_FILE: &str = "poses.npz";
const SUMMARY_FILE: &str = "summary.json";

/// Pose denoising and sampling with a learned pose manifold.
#[derive(FromArgs)]
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Denoise(DenoiseArgs),
    DenoiseBatch(DenoiseBatchArgs),
    Sample(SampleArgs),
}

/// Denoise one motion sequence.
#[derive(FromArgs)]
#[argh(subcommand, name = "denoise")]
struct DenoiseArgs {
    /// the config file.
    #[argh(option, default = "PathBuf::from(\"config.json5\")")]
    config: PathBuf,
    /// the distance field checkpoint.
    #[argh(option)]
    ckpt: PathBuf,
    /// the .npz file of the noisy motion.
    #[argh(option)]
    motion: PathBuf,
    /// the .npz file of the ground truth motion.
    #[argh(option)]
    gt: Option<PathBuf>,
    /// the output directory.
    #[argh(option)]
    out: PathBuf,
}

/// Denoise every sequence of a dataset directory.
#[derive(FromArgs)]
#[argh(subcommand, name = "denoise-batch")]
struct DenoiseBatchArgs {
    /// the config file.
    #[argh(option, default = "PathBuf::from(\"config.json5\")")]
    config: PathBuf,
    /// the distance field checkpoint.
    #[argh(option)]
    ckpt: PathBuf,
    /// the directory holding one sub-directory per sequence.
    #[argh(option)]
    data_dir: PathBuf,
    /// the output directory.
    #[argh(option)]
    out: PathBuf,
}

/// Sample random poses projected onto the manifold.
#[derive(FromArgs)]
#[argh(subcommand, name = "sample")]
struct SampleArgs {
    /// the config file.
    #[argh(option, default = "PathBuf::from(\"config.json5\")")]
    config: PathBuf,
    /// the distance field checkpoint.
    #[argh(option)]
    ckpt: PathBuf,
    /// the output directory.
    #[argh(option)]
    out: PathBuf,
    /// number of poses, overriding the config file.
    #[argh(option)]
    batch_size: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SequenceSummary {
    name: String,
    initial_v2v: f64,
    v2v_error: f64,
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    sequences: Vec<SequenceSummary>,
    mean_initial_v2v: f64,
    mean_v2v_error: f64,
}

#[derive(Debug, Serialize)]
struct SampleSummary {
    batch_size: i64,
    steps: usize,
    mean_distances: Vec<f64>,
}

fn main() -> Fallible<()> {
    pretty_env_logger::init();

    // Parse arguments
    let Args { command } = argh::from_env();

    match command {
        Command::Denoise(args) => denoise(args),
        Command::DenoiseBatch(args) => denoise_batch(args),
        Command::Sample(args) => sample(args),
    }
}

fn denoise(args: DenoiseArgs) -> Fallible<()> {
    let DenoiseArgs {
        config,
        ckpt,
        motion,
        gt,
        out,
    } = args;
    let config = Config::open(&config)?;
    let interrupt = interrupt_flag()?;

    let distance_field = model::load_distance_field(&config.distance_field, &ckpt, config.device)?;
    let body_model = ScriptedBodyModel::from_config(&config.body_model, config.device)?;

    denoise_sequence(
        &config,
        &*distance_field,
        &body_model,
        &motion,
        gt.as_deref(),
        &out,
        interrupt,
    )?;
    Ok(())
}

fn denoise_batch(args: DenoiseBatchArgs) -> Fallible<()> {
    let DenoiseBatchArgs {
        config,
        ckpt,
        data_dir,
        out,
    } = args;
    let config = Config::open(&config)?;
    let interrupt = interrupt_flag()?;

    let distance_field = model::load_distance_field(&config.distance_field, &ckpt, config.device)?;
    let body_model = ScriptedBodyModel::from_config(&config.body_model, config.device)?;

    let sequences = motion::find_sequences(&data_dir)?;
    ensure!(
        !sequences.is_empty(),
        "no sequence found in {}",
        data_dir.display()
    );
    info!("found {} sequences in {}", sequences.len(), data_dir.display());

    let mut summaries = vec![];
    for seq in sequences {
        if interrupt.load(Ordering::SeqCst) {
            break;
        }
        info!("denoising {}", seq.name);
        let output = denoise_sequence(
            &config,
            &*distance_field,
            &body_model,
            &seq.observations,
            seq.ground_truth.as_deref(),
            &out.join(&seq.name),
            interrupt.clone(),
        )?;
        summaries.push(SequenceSummary {
            name: seq.name,
            initial_v2v: output.initial_v2v,
            v2v_error: output.v2v_error,
        });
    }

    let num_sequences = summaries.len().max(1) as f64;
    let mean_initial_v2v = summaries.iter().map(|seq| seq.initial_v2v).sum::<f64>() / num_sequences;
    let mean_v2v_error = summaries.iter().map(|seq| seq.v2v_error).sum::<f64>() / num_sequences;
    info!(
        "mean v2v error over {} sequences: {:.8} cm (initial {:.8} cm)",
        summaries.len(),
        mean_v2v_error,
        mean_initial_v2v
    );

    write_summary(
        &out,
        &BatchSummary {
            sequences: summaries,
            mean_initial_v2v,
            mean_v2v_error,
        },
    )
}

fn sample(args: SampleArgs) -> Fallible<()> {
    let SampleArgs {
        config,
        ckpt,
        out,
        batch_size,
    } = args;
    let config = Config::open(&config)?;
    let batch_size = batch_size.unwrap_or(config.sample.batch_size);
    ensure!(batch_size > 0, "batch size must be positive");

    let distance_field = model::load_distance_field(&config.distance_field, &ckpt, config.device)?;
    let body_model = if config.output.save_mesh {
        Some(ScriptedBodyModel::from_config(
            &config.body_model,
            config.device,
        )?)
    } else {
        None
    };

    fs::create_dir_all(&out)?;
    let exporter = MeshExporter::new(&out);
    let mut sampler = PoseProjectionSampler::new(&*distance_field, config.sample.clone());
    if let Some(body_model) = &body_model {
        sampler = sampler.with_visualizer(body_model, &exporter);
    }

    let init = sample::random_quaternions(batch_size, config.device);
    let output = sampler.project(&init)?;

    if config.output.save_poses {
        motion::save_motion(out.join(POSES_FILE), &output.axis_angle()?)?;
    }
    write_summary(
        &out,
        &SampleSummary {
            batch_size,
            steps: output.steps,
            mean_distances: output.mean_distances,
        },
    )
}

fn denoise_sequence(
    config: &Config,
    distance_field: &dyn DistanceField,
    body_model: &dyn BodyModel,
    motion_file: &Path,
    gt_file: Option<&Path>,
    out_dir: &Path,
    interrupt: Arc<AtomicBool>,
) -> Fallible<DenoiseOutput> {
    let device = config.device;
    let noisy_poses = motion::load_motion(motion_file, device)?;
    let gt_poses = gt_file
        .map(|path| motion::load_motion(path, device))
        .transpose()?;
    let betas = body_model::zero_betas(noisy_poses.size()[0], device);

    fs::create_dir_all(out_dir)?;
    let exporter = MeshExporter::new(out_dir);
    let mut denoiser = MotionDenoiser::new(distance_field, body_model, config.denoise.clone())
        .with_interrupt(interrupt);
    if config.output.save_mesh {
        denoiser = denoiser.with_visualizer(&exporter);
    }

    let output = denoiser.optimize(&noisy_poses, gt_poses.as_ref(), &betas)?;

    if config.output.save_poses {
        motion::save_motion(out_dir.join(POSES_FILE), &output.poses)?;
    }
    write_summary(out_dir, &output.summary())?;
    Ok(output)
}

fn write_summary<S>(out_dir: &Path, summary: &S) -> Fallible<()>
where
    S: Serialize,
{
    let path = out_dir.join(SUMMARY_FILE);
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, summary)?;
    info!("wrote {}", path.display());
    Ok(())
}

/// Set by Ctrl-C; the denoiser returns its current pose once it is raised.
fn interrupt_flag() -> Fallible<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupted by user");
        handler_flag.store(true, Ordering::SeqCst);
    })?;
    Ok(flag)
}

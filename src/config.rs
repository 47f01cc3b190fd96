use crate::{common::*, model::PoseNdfInit, params};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(
        serialize_with = "serialize_device",
        deserialize_with = "deserialize_device",
        default = "default_device"
    )]
    pub device: Device,
    pub distance_field: DistanceFieldConfig,
    pub body_model: BodyModelConfig,
    #[serde(default)]
    pub denoise: DenoiseConfig,
    #[serde(default)]
    pub sample: SampleConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DistanceFieldConfig {
    #[serde(rename = "posendf")]
    PoseNdf(PoseNdfConfig),
    #[serde(rename = "torchscript")]
    TorchScript,
}

/// Network architecture read from a YAML description next to the checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseNdfConfig {
    pub init: PoseNdfInit,
    raw_config: architecture_config::RawPoseNdfConfig,
}

impl PoseNdfConfig {
    pub fn architecture_file(&self) -> &Path {
        &self.raw_config.architecture_file
    }
}

impl Serialize for PoseNdfConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.raw_config.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PoseNdfConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use architecture_config::{ArchitectureFile, ArchitectureModel, RawPoseNdfConfig};
        let raw_config = RawPoseNdfConfig::deserialize(deserializer)?;

        let text = fs::read_to_string(&raw_config.architecture_file)
            .map_err(|err| D::Error::custom(format!("{:?}", err)))?;
        let ArchitectureFile {
            model: ArchitectureModel { num_joints, init },
        } = serde_yaml::from_str(&text).map_err(|err| D::Error::custom(format!("{:?}", err)))?;

        // the encoder is wired to the SMPL body tree
        if num_joints != params::NUM_MANIFOLD_JOINTS {
            return Err(D::Error::custom(format!(
                "the architecture expects {} joints, but poses have {}",
                num_joints,
                params::NUM_MANIFOLD_JOINTS
            )));
        }

        Ok(Self { init, raw_config })
    }
}

mod architecture_config {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct RawPoseNdfConfig {
        pub architecture_file: PathBuf,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ArchitectureFile {
        pub model: ArchitectureModel,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ArchitectureModel {
        #[serde(default = "default_num_joints")]
        pub num_joints: i64,
        #[serde(flatten)]
        pub init: PoseNdfInit,
    }

    fn default_num_joints() -> i64 {
        params::NUM_MANIFOLD_JOINTS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyModelConfig {
    /// TorchScript module computing `(vertices, joints)` from `(betas, body_pose)`.
    pub module_file: PathBuf,
    /// `.npz` archive holding the mesh triangles under the `faces` key.
    pub faces_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    pub iterations: usize,
    pub steps_per_iter: usize,
    pub learning_rate: f64,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub early_stop: Option<EarlyStopConfig>,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            iterations: params::DENOISE_ITERATIONS,
            steps_per_iter: params::DENOISE_STEPS_PER_ITER,
            learning_rate: params::ADAM_LR,
            adam_beta1: params::ADAM_BETA1,
            adam_beta2: params::ADAM_BETA2,
            early_stop: None,
        }
    }
}

/// Stops the outer loop once an iteration improves the mean total loss by
/// less than `min_rel_improvement` of the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopConfig {
    pub min_rel_improvement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    pub batch_size: i64,
    pub steps: usize,
    pub renormalize: bool,
    pub canonicalize: bool,
    pub tolerance: Option<f64>,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            batch_size: params::SAMPLE_BATCH_SIZE,
            steps: params::PROJECTION_STEPS,
            renormalize: true,
            canonicalize: true,
            tolerance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub save_mesh: bool,
    pub save_poses: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_mesh: false,
            save_poses: true,
        }
    }
}

fn default_device() -> Device {
    Device::cuda_if_available()
}

fn serialize_device<S>(device: &Device, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = match device {
        Device::Cpu => "cpu".into(),
        Device::Cuda(n) => format!("cuda({})", n),
        other => format!("{:?}", other).to_lowercase(),
    };
    text.serialize(serializer)
}

fn deserialize_device<'de, D>(deserializer: D) -> Result<Device, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    let device = match name.as_str() {
        "cpu" => Device::Cpu,
        "auto" => Device::cuda_if_available(),
        _ => {
            let prefix = "cuda(";
            let suffix = ")";
            if name.starts_with(prefix) && name.ends_with(suffix) {
                let number: usize = name[(prefix.len())..(name.len() - suffix.len())]
                    .parse()
                    .map_err(|_err| D::Error::custom(format!("invalid device name {}", name)))?;
                Device::Cuda(number)
            } else {
                return Err(D::Error::custom(format!("invalid device name {}", name)));
            }
        }
    };
    Ok(device)
}

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::domain::Species;
use crate::core::error::{AinebError, AinebResult};

// --- Convergence ---

/// Thresholds on the surrogate-vs-reference accuracy metrics.
/// A run is converged iff every metric is `<=` its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceCriteria {
    #[serde(alias = "cost_rmse")]
    pub energy_rmse: f64,
    #[serde(alias = "cost_maxresid")]
    pub energy_maxresid: f64,
    #[serde(alias = "gradient_rmse")]
    pub force_rmse: f64,
    #[serde(alias = "gradient_maxresid")]
    pub force_maxresid: f64,
    pub max_iteration: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            energy_rmse: 0.01,
            energy_maxresid: 0.02,
            force_rmse: 0.05,
            force_maxresid: 0.1,
            max_iteration: 10,
        }
    }
}

// --- Band relaxation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NebMethod {
    /// Upwind tangent switched at the highest image.
    Aseneb,
    /// Energy-weighted tangent of Henkelman & Jonsson.
    ImprovedTangent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Linear,
    Idpp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NebArgs {
    pub climb: bool,
    pub method: NebMethod,
    pub interp: Interpolation,
    pub fmax: f64,  // eV/Å
    pub steps: usize,
    pub spring: f64, // eV/Å²
    pub maxstep: f64, // Å per atom per step
}

impl Default for NebArgs {
    fn default() -> Self {
        Self {
            climb: false,
            method: NebMethod::Aseneb,
            interp: Interpolation::Linear,
            fmax: 0.05,
            steps: 200,
            spring: 0.1,
            maxstep: 0.2,
        }
    }
}

// --- Collaborators ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceConfig {
    Gulp {
        executable: String,
        potentials: String,
    },
    LennardJones {
        epsilon: f64,
        sigma: f64,
        cutoff: f64,
    },
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        ReferenceConfig::LennardJones { epsilon: 1.0, sigma: 1.0, cutoff: 3.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurrogateConfig {
    /// Artifact label; the trained model lives at `<output_dir>/<label>.json`.
    pub label: String,
    pub num_basis: usize,
    pub cutoff: f64,
    pub ridge: f64,
    /// Relative weight of force rows against energy rows in the fit.
    pub force_weight: f64,
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        Self {
            label: "surrogate".to_string(),
            num_basis: 8,
            cutoff: 6.0,
            ridge: 1e-8,
            force_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Rattled copies generated per endpoint.
    pub copies: usize,
    /// Max displacement per Cartesian component (Å).
    pub rattle: f64,
    pub seed: u64,
}

// --- Top level ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub species: Vec<Species>,
    pub initial_file: PathBuf,
    pub final_file: PathBuf,
    #[serde(default)]
    pub train_file: Option<PathBuf>,
    pub num_inter_images: usize,

    #[serde(default)]
    pub convergence: ConvergenceCriteria,
    #[serde(default)]
    pub neb: NebArgs,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub surrogate: SurrogateConfig,
    #[serde(default)]
    pub bootstrap: Option<BootstrapConfig>,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// How long the coordinator waits for a worker to join a gather.
    /// Unset means no deadline.
    #[serde(default)]
    pub collective_timeout_secs: Option<u64>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("aineb_out")
}

impl RunConfig {
    pub fn load(path: &Path) -> AinebResult<Self> {
        let text = fs::read_to_string(path)?;
        let cfg: RunConfig = serde_json::from_str(&text)
            .map_err(|e| AinebError::Config(format!("{}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings that would make the loop meaningless before any rank starts.
    pub fn validate(&self) -> AinebResult<()> {
        if self.num_inter_images == 0 {
            return Err(AinebError::Config("num_inter_images must be at least 1".into()));
        }
        if self.convergence.max_iteration == 0 {
            return Err(AinebError::Config("max_iteration must be at least 1".into()));
        }
        if !(self.neb.fmax > 0.0) || !(self.neb.maxstep > 0.0) {
            return Err(AinebError::Config("neb.fmax and neb.maxstep must be positive".into()));
        }
        if self.train_file.is_none() && self.bootstrap.is_none() {
            return Err(AinebError::Config(
                "either train_file or bootstrap must be given".into(),
            ));
        }
        if self.collective_timeout_secs == Some(0) {
            return Err(AinebError::Config("collective_timeout_secs must be positive when set".into()));
        }
        if self.surrogate.num_basis == 0 || !(self.surrogate.cutoff > 0.0) {
            return Err(AinebError::Config("surrogate needs num_basis > 0 and cutoff > 0".into()));
        }
        Ok(())
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the phace library.
///
/// Controls where rewritten files go, how many files are processed at once,
/// and how fresh region documents are stamped.
///
/// # Loading
///
/// ```rust,no_run
/// use phace::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.output.dir = "tagged".into();
/// config.concurrency.max_tasks = Some(2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output location and dry-run switch.
    pub output: OutputConfig,
    /// Concurrency limiter sizing.
    pub concurrency: ConcurrencyConfig,
    /// Region document settings.
    pub regions: RegionConfig,
}

/// Output behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory that rewritten images are written to. Created before a batch starts.
    pub dir: PathBuf,
    /// If `true`, run every step except writing the output file.
    pub dry_run: bool,
}

/// How many files may be open and in flight at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Added to the number of available CPUs.
    pub headroom: usize,
    /// Fixed limit; overrides the CPU-based one when set.
    pub max_tasks: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// `stDim:unit` for newly created `AppliedToDimensions`.
    pub dimensions_unit: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
            dry_run: false,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            headroom: 4,
            max_tasks: None,
        }
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            dimensions_unit: "pixel".to_string(),
        }
    }
}

impl ConcurrencyConfig {
    /// Number of permits for the batch limiter. Never less than one.
    pub fn limit(&self) -> usize {
        let limit = match self.max_tasks {
            Some(n) => n,
            None => {
                let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
                cpus + self.headroom
            }
        };
        limit.max(1)
    }
}

impl Config {
    /// Resolve the config file path: `config.json` next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}

use crate::simulation::id::SiteId;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to write config: {0}")]
    Write(#[from] serde_yaml::Error),
    #[error("invalid value `{value}` for `{key}`")]
    InvalidOverride { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Bike sharing rebalancing simulation", long_about = None)]
pub struct CommandLineArgs {
    #[arg(long, short)]
    pub config: Option<String>,
    #[arg(long = "set", value_parser = parse_key_val)]
    pub overrides: Vec<(String, String)>,
}

impl CommandLineArgs {
    pub fn new_with_path(path: impl ToString) -> Self {
        CommandLineArgs {
            config: Some(path.to_string()),
            overrides: Vec::new(),
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=');
    match pos {
        Some(pos) => Ok((s[..pos].to_string(), s[pos + 1..].to_string())),
        None => Err(format!("invalid KEY=VALUE: no `=` found in `{}`", s)),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub network: Network,
    pub fleet: Fleet,
    pub riders: Riders,
    pub simulation: Simulation,
    pub output: Output,
    #[serde(skip)]
    context: Option<PathBuf>,
}

impl Config {
    pub fn from_file(config_path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(config_path).map_err(|source| ConfigError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            serde_yaml::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
                path: config_path.to_path_buf(),
                source,
            })?;
        config.set_context(Some(config_path.to_path_buf()));
        Ok(config)
    }

    /// Loads the config file named on the command line, or starts from defaults if there is none,
    /// then applies the `--set` overrides and validates the result.
    pub fn from_args(args: &CommandLineArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Config::from_file(Path::new(path))?,
            None => Config::default(),
        };
        config.apply_overrides(&args.overrides)?;
        config.validate()?;
        Ok(config)
    }

    pub fn set_context(&mut self, context: Option<PathBuf>) {
        self.context = context;
    }

    pub fn context(&self) -> &Option<PathBuf> {
        &self.context
    }

    /// Apply generic key-value overrides to the config, e.g. network.bornes=12
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<(), ConfigError> {
        if !overrides.is_empty() {
            info!("Applying overrides: {:?}", overrides);
        }

        for (key, value) in overrides {
            if let Some(handler) = OVERRIDES.iter().find(|h| h.key == key.as_str()) {
                (handler.apply)(self, value).map_err(|_| ConfigError::InvalidOverride {
                    key: key.clone(),
                    value: value.clone(),
                })?;
            } else {
                warn!("No override handler found for key: {}", key);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.network.nb_sites == 0 {
            return invalid("network.nb_sites must be greater than 0");
        }
        if self.network.nb_bike_types == 0 {
            return invalid("network.nb_bike_types must be greater than 0");
        }
        if self.network.bornes < 2 {
            return invalid("network.bornes must be at least 2");
        }
        if self.fleet.van_capacity == 0 {
            return invalid("fleet.van_capacity must be greater than 0");
        }
        if self.fleet.min_travel_ms > self.fleet.max_travel_ms {
            return invalid("fleet.min_travel_ms must not exceed fleet.max_travel_ms");
        }
        if self.riders.min_ride_ms > self.riders.max_ride_ms {
            return invalid("riders.min_ride_ms must not exceed riders.max_ride_ms");
        }
        let valid_scale = |scale: f32| scale.is_finite() && scale >= 0.;
        if !valid_scale(self.fleet.time_scale) {
            return invalid("fleet.time_scale must be finite and not negative");
        }
        if !valid_scale(self.riders.time_scale) {
            return invalid("riders.time_scale must be finite and not negative");
        }
        if self.simulation.initial_bikes_per_site > self.network.bornes {
            return invalid("simulation.initial_bikes_per_site must not exceed network.bornes");
        }
        if self.simulation.initial_depot_bikes > self.network.depot_capacity {
            return invalid("simulation.initial_depot_bikes must not exceed network.depot_capacity");
        }
        Ok(())
    }

    /// The depot is the site directly after the regular sites.
    pub fn depot_id(&self) -> SiteId {
        SiteId(self.network.nb_sites)
    }
}

pub fn write_config(config: &Config, output_path: &Path) -> Result<PathBuf, ConfigError> {
    std::fs::create_dir_all(output_path).map_err(|source| ConfigError::Io {
        path: output_path.to_path_buf(),
        source,
    })?;
    let output_config = output_path.join("output_config.yml");
    let file = File::create(&output_config).map_err(|source| ConfigError::Io {
        path: output_config.clone(),
        source,
    })?;
    serde_yaml::to_writer(BufWriter::new(file), config)?;
    Ok(output_config)
}

/// Resolves `path` relative to the directory of the config file, if the path is relative and the
/// config was loaded from a file.
pub fn resolve_path(context: &Option<PathBuf>, path: &Path) -> PathBuf {
    match context.as_ref().and_then(|c| c.parent()) {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

struct OverrideHandler {
    key: &'static str,
    apply: fn(config: &mut Config, value: &str) -> Result<(), ()>,
}

fn parsed<T: std::str::FromStr>(value: &str) -> Result<T, ()> {
    value.parse().map_err(|_| ())
}

const OVERRIDES: &[OverrideHandler] = &[
    OverrideHandler {
        key: "network.nb_sites",
        apply: |c, v| {
            c.network.nb_sites = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "network.bornes",
        apply: |c, v| {
            c.network.bornes = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "network.depot_capacity",
        apply: |c, v| {
            c.network.depot_capacity = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "network.nb_bike_types",
        apply: |c, v| {
            c.network.nb_bike_types = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "fleet.nb_vans",
        apply: |c, v| {
            c.fleet.nb_vans = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "fleet.van_capacity",
        apply: |c, v| {
            c.fleet.van_capacity = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "fleet.time_scale",
        apply: |c, v| {
            c.fleet.time_scale = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "riders.nb_riders",
        apply: |c, v| {
            c.riders.nb_riders = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "riders.time_scale",
        apply: |c, v| {
            c.riders.time_scale = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "simulation.duration_ms",
        apply: |c, v| {
            c.simulation.duration_ms = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "simulation.seed",
        apply: |c, v| {
            c.simulation.seed = parsed(v)?;
            Ok(())
        },
    },
    OverrideHandler {
        key: "output.output_dir",
        apply: |c, v| {
            c.output.output_dir = PathBuf::from(v);
            Ok(())
        },
    },
    OverrideHandler {
        key: "output.logging",
        apply: |c, v| {
            c.output.logging = match v.to_lowercase().as_str() {
                "none" => Logging::None,
                "info" => Logging::Info,
                _ => return Err(()),
            };
            Ok(())
        },
    },
];

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Network {
    /// Number of regular sites, not counting the depot.
    pub nb_sites: usize,
    /// Capacity of every regular site.
    pub bornes: usize,
    pub depot_capacity: usize,
    pub nb_bike_types: usize,
}

impl Default for Network {
    fn default() -> Self {
        Network {
            nb_sites: 6,
            bornes: 8,
            depot_capacity: 100,
            nb_bike_types: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Fleet {
    pub nb_vans: u32,
    pub van_capacity: usize,
    pub min_travel_ms: u64,
    pub max_travel_ms: u64,
    /// Factor applied to travel times before the van thread sleeps for them. 0 disables sleeping,
    /// travel is then only reported.
    pub time_scale: f32,
}

impl Default for Fleet {
    fn default() -> Self {
        Fleet {
            nb_vans: 1,
            van_capacity: 4,
            min_travel_ms: 100,
            max_travel_ms: 1000,
            time_scale: 0.01,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Riders {
    pub nb_riders: u32,
    pub min_ride_ms: u64,
    pub max_ride_ms: u64,
    pub time_scale: f32,
}

impl Default for Riders {
    fn default() -> Self {
        Riders {
            nb_riders: 8,
            min_ride_ms: 200,
            max_ride_ms: 2000,
            time_scale: 0.01,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Simulation {
    pub initial_bikes_per_site: usize,
    pub initial_depot_bikes: usize,
    /// Wall clock time the controller lets vans and riders run before shutting down.
    pub duration_ms: u64,
    pub seed: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            initial_bikes_per_site: 6,
            initial_depot_bikes: 10,
            duration_ms: 2000,
            seed: 4711,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Output {
    pub output_dir: PathBuf,
    pub logging: Logging,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            output_dir: PathBuf::from("./output"),
            logging: Logging::None,
        }
    }
}

/// Controls the JSON log file in the output directory. Console logging is always on.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub enum Logging {
    #[default]
    None,
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_val_splits_on_first_equals() {
        assert_eq!(
            parse_key_val("output.output_dir=a=b"),
            Ok((String::from("output.output_dir"), String::from("a=b")))
        );
        assert!(parse_key_val("no-equals").is_err());
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = serde_yaml::from_str("network:\n  bornes: 12\n").unwrap();
        assert_eq!(config.network.bornes, 12);
        assert_eq!(config.network.nb_sites, Network::default().nb_sites);
        assert_eq!(config.fleet, Fleet::default());
    }

    #[test]
    fn overrides_are_applied() {
        let mut config = Config::default();
        config
            .apply_overrides(&[
                (String::from("network.bornes"), String::from("15")),
                (String::from("fleet.nb_vans"), String::from("3")),
                (String::from("output.logging"), String::from("Info")),
                (String::from("does.not.exist"), String::from("1")),
            ])
            .unwrap();

        assert_eq!(config.network.bornes, 15);
        assert_eq!(config.fleet.nb_vans, 3);
        assert_eq!(config.output.logging, Logging::Info);
    }

    #[test]
    fn invalid_override_value_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(&[(String::from("network.bornes"), String::from("many"))])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn validation_rejects_small_bornes() {
        let mut config = Config::default();
        config.network.bornes = 1;
        config.simulation.initial_bikes_per_site = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validation_rejects_reversed_travel_range() {
        let mut config = Config::default();
        config.fleet.min_travel_ms = 10;
        config.fleet.max_travel_ms = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_non_finite_time_scale() {
        for scale in [f32::INFINITY, f32::NAN, -1.] {
            let mut config = Config::default();
            config.fleet.time_scale = scale;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

            let mut config = Config::default();
            config.riders.time_scale = scale;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn infinite_time_scale_override_is_rejected() {
        let args = CommandLineArgs {
            config: None,
            overrides: vec![(String::from("fleet.time_scale"), String::from("inf"))],
        };
        assert!(matches!(
            Config::from_args(&args),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn depot_follows_sites() {
        let config = Config::default();
        assert_eq!(config.depot_id(), SiteId(6));
    }

    #[test]
    fn resolve_relative_to_config() {
        let context = Some(PathBuf::from("/tmp/run/config.yml"));
        assert_eq!(
            resolve_path(&context, Path::new("out")),
            PathBuf::from("/tmp/run/out")
        );
        assert_eq!(
            resolve_path(&context, Path::new("/abs")),
            PathBuf::from("/abs")
        );
        assert_eq!(resolve_path(&None, Path::new("out")), PathBuf::from("out"));
    }
}

use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_ENV_VAR: &str = "HIGHWAYPATROL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/highwaypatrol.toml";
const ENV_PREFIX: &str = "HIGHWAYPATROL";
const ENV_SEPARATOR: &str = "__";

/// Storage secrets: first variable set wins
const ACCESS_KEY_VARS: [&str; 2] = ["S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];
const SECRET_KEY_VARS: [&str; 2] = ["S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"];

/// Path named by `HIGHWAYPATROL_CONFIG`, else `config/highwaypatrol.toml`
pub fn default_path() -> PathBuf {
    env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Struct defaults, then the TOML file at `config_path` when present, then
/// `.env`, then process environment. Secrets only ever come from the
/// environment.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    if let Ok(dotenv) = dotenvy::dotenv() {
        info!(path = %dotenv.display(), "Loaded .env");
    }

    let mut builder = config::Config::builder();
    builder = match file_layer(&config_path) {
        Some(file) => builder.add_source(file),
        None => builder,
    };

    // HIGHWAYPATROL__SCHEDULER__SYSTEM_PERIODICITY -> scheduler.system_periodicity
    let env_layer = Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    let mut config: Config = builder.add_source(env_layer).build()?.try_deserialize()?;
    config.storage.access_key = first_var(&ACCESS_KEY_VARS);
    config.storage.secret_key = first_var(&SECRET_KEY_VARS);
    Ok(config)
}

fn file_layer(path: &Path) -> Option<File<config::FileSourceFile, config::FileFormat>> {
    if !path.exists() {
        warn!(path = %path.display(), "No configuration file, using defaults and environment");
        return None;
    }
    info!(path = %path.display(), "Loading configuration file");
    Some(File::from(path).required(true))
}

fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| env::var(name).ok().filter(|v| !v.is_empty()))
}

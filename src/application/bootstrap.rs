use crate::domain::models::Exercise;
use crate::infrastructure::config::{
    ensure_default_configs, load_app_config, load_exercise_catalog, AppConfig,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub config: AppConfig,
    pub catalog: Vec<Exercise>,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("activaya.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let config = load_app_config(&config_dir)?;
    let catalog = load_exercise_catalog(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        config_dir,
        logs_dir,
        database_path,
        config,
        catalog,
    })
}

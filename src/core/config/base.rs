use super::{constant::*, ConfigEntity, ConfigError, MsgConfig};
use crate::base::CommandKey;
use crate::{logging, utils};
use std::cell::RefCell;
use std::env;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

thread_local! {
    static GLOBAL_CONFIG: RefCell<ConfigEntity> = RefCell::new(ConfigEntity::new());
}

pub fn reset_global_config(entity: ConfigEntity) {
    GLOBAL_CONFIG.with(|c| {
        *c.borrow_mut() = entity;
    });
}

/// Initialize with built-in defaults; the config file path may still be
/// supplied through the `DEFENDER_CONFIG_FILE_PATH` environment variable.
pub fn init_default() -> Result<(), ConfigError> {
    let mut config_path = String::new();
    init_with_config_file(&mut config_path)
}

/// Initialize from a hand-crafted entity.
pub fn init_with_config(entity: ConfigEntity) -> Result<(), ConfigError> {
    entity.check()?;
    reset_global_config(entity);
    Ok(())
}

/// Initialize from the YAML file under the provided path.
/// Priority: system environment > YAML file > default config.
pub fn init_with_config_file(config_path: &mut String) -> Result<(), ConfigError> {
    if utils::is_blank(config_path) {
        // The path may be resolved from the system env when absent.
        *config_path = env::var(CONF_FILE_PATH_ENV_KEY).unwrap_or_else(|_| CONFIG_FILENAME.into());
    }
    load_global_config_from_yaml_file(config_path)?;
    Ok(())
}

fn load_global_config_from_yaml_file(path_str: &String) -> Result<(), ConfigError> {
    if path_str == CONFIG_FILENAME {
        // use the default global config
        return Ok(());
    }
    let path = Path::new(path_str);
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path_str.clone()));
    }
    let mut file = File::open(path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let entity: ConfigEntity = serde_yaml::from_str(&content)?;
    entity.check()?;
    logging::info!(
        "[Config] Resolving defender config from file, file {}",
        path_str
    );
    reset_global_config(entity);
    Ok(())
}

/// Resolve the settings for one command key. A missing `command.<key>`
/// entry yields the built-in defaults.
pub fn command_config(key: &CommandKey) -> MsgConfig {
    GLOBAL_CONFIG.with(|c| {
        c.borrow()
            .config
            .command
            .get(key.as_str())
            .map(MsgConfig::from)
            .unwrap_or_default()
    })
}

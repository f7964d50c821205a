use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "LIVESH_CONFIG_DIR";
pub const CONFIG_FILE_NAME: &str = "livesh.toml";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "livesh";
const APPLICATION: &str = "livesh";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        if let Some(dir) = env_dir(ENV_CONFIG_DIR)? {
            return Ok(Self { config_dir: dir });
        }
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;
        Ok(Self {
            config_dir: project_dirs.config_dir().to_path_buf(),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }
}

fn env_dir(name: &str) -> Result<Option<PathBuf>> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => {
            let path = PathBuf::from(value);
            if path.is_relative() {
                return Err(anyhow!("{name} must be an absolute path"));
            }
            Ok(Some(path))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        env::set_var(ENV_CONFIG_DIR, dir.path());
        let paths = AppPaths::discover().unwrap();
        env::remove_var(ENV_CONFIG_DIR);

        assert_eq!(paths.config_dir(), dir.path());
        assert_eq!(paths.config_file(), dir.path().join("livesh.toml"));
    }
}

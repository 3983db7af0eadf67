use anyhow::Result;
use std::path::PathBuf;

pub const SUBSTRATE_DIR_NAME: &str = ".substrate";
pub const EXEC_CONFIG_FILE: &str = "exec.toml";
pub const BACKGROUND_DIR_PREFIX: &str = "substrate-bg-";

pub fn substrate_home() -> Result<PathBuf> {
    if let Ok(override_home) = std::env::var("SUBSTRATE_HOME") {
        let trimmed = override_home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("No home directory found"))?
        .join(SUBSTRATE_DIR_NAME))
}

pub fn exec_config_file() -> Result<PathBuf> {
    Ok(substrate_home()?.join(EXEC_CONFIG_FILE))
}

/// Parent directory for per-launch background output directories.
pub fn background_root() -> PathBuf {
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substrate_home() {
        let path = substrate_home().unwrap();
        if std::env::var_os("SUBSTRATE_HOME").is_none() {
            assert!(path.ends_with(SUBSTRATE_DIR_NAME));
        }
        assert!(!path.as_os_str().is_empty());
    }

    #[test]
    fn test_exec_config_file() {
        let path = exec_config_file().unwrap();
        assert!(path.ends_with(EXEC_CONFIG_FILE));
        assert_eq!(path.parent().unwrap(), substrate_home().unwrap());
    }

    #[test]
    fn test_background_root_is_absolute() {
        assert!(background_root().is_absolute());
    }
}

//! TOML configuration loading.

use anyhow::{Context, Result};
use firelynx_types::config::Config;
use std::path::Path;

/// Reads, parses and validates a configuration file. The on-disk surface is
/// plain TOML mapping onto the snapshot schema; validation runs immediately
/// after parse so an invalid file never produces a usable snapshot.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("cannot parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
                [[listeners]]
                id = "main"
                address = "127.0.0.1:8080"

                [[endpoints]]
                id = "ep"
                listener_id = "main"

                [[endpoints.routes]]
                app_id = "echo"

                [endpoints.routes.rule]
                path_prefix = "/echo"

                [[apps]]
                id = "echo"
                type = "echo"
            "#
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listeners.len(), 1);
        assert_eq!(config.endpoints[0].routes[0].app_id, "echo");
    }

    #[test]
    fn invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
                [[listeners]]
                id = "a"
                address = "127.0.0.1:8080"

                [[listeners]]
                id = "b"
                address = "127.0.0.1:8080"
            "#
        )
        .unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate ID: listener address"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config(Path::new("/does/not/exist.toml")).is_err());
    }
}

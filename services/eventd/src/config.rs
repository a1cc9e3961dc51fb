//! Service configuration loading.
//!
//! `<path>/config.yaml` is the config source, with
//! `<path>/config.example.yaml` as the fallback so a fresh checkout runs
//! out of the box. An empty DSN on a file-backed driver defaults into the
//! working directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use ev_store::config::{Driver, Persistence};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub persistence: Persistence,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config.yaml or config.example.yaml under {0}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let file = File::open(path.join("config.yaml"))
        .or_else(|_| File::open(path.join("config.example.yaml")))
        .map_err(|_| ConfigError::NotFound(path.to_owned()))?;

    let mut cfg: Config = serde_yaml::from_reader(file)?;
    cfg.apply_path_defaults(path);
    Ok(cfg)
}

impl Config {
    fn apply_path_defaults(&mut self, path: &Path) {
        if !self.persistence.dsn.is_empty() {
            return;
        }
        match self.persistence.driver {
            Driver::Sled => {
                self.persistence.dsn = path.join("data").to_string_lossy().into_owned();
            }
            Driver::Sqlite => {
                self.persistence.dsn = path.join("events.db").to_string_lossy().into_owned();
            }
            Driver::InMem => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write(dir: &Path, name: &str, contents: &str) {
        let mut file = File::create(dir.join(name)).expect("create");
        file.write_all(contents.as_bytes()).expect("write");
    }

    #[test]
    fn loads_config_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "config.yaml",
            "persistence:\n  driver: sled\n  dsn: /tmp/events-data\n",
        );

        let cfg = load(dir.path()).expect("load");
        assert_eq!(cfg.persistence.driver, Driver::Sled);
        assert_eq!(cfg.persistence.dsn, "/tmp/events-data");
    }

    #[test]
    fn falls_back_to_the_example_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "config.example.yaml",
            "persistence:\n  driver: inmem\n",
        );

        let cfg = load(dir.path()).expect("load");
        assert_eq!(cfg.persistence.driver, Driver::InMem);
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(load(dir.path()), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn empty_dsn_defaults_into_the_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "config.yaml", "persistence:\n  driver: sled\n");

        let cfg = load(dir.path()).expect("load");
        assert_eq!(
            cfg.persistence.dsn,
            dir.path().join("data").to_string_lossy()
        );
    }
}

// src/infra/paths.rs — Default locations for config and run state
//
// All paths respect the KAIZEN_HOME environment variable for isolation.
// When KAIZEN_HOME is set, config and state live under that directory.
// When unset, config uses ~/.kaizen/ and state uses XDG_DATA_HOME/kaizen.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the KAIZEN_HOME override, if set.
fn kaizen_home() -> Option<PathBuf> {
    std::env::var_os("KAIZEN_HOME").map(PathBuf::from)
}

/// Configuration directory: $KAIZEN_HOME/ or ~/.kaizen/
pub fn config_dir() -> PathBuf {
    if let Some(home) = kaizen_home() {
        return home;
    }
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(".kaizen"),
        None => PathBuf::from(".kaizen"),
    }
}

/// State directory: $KAIZEN_HOME/state/ or ~/.local/share/kaizen/
pub fn state_dir() -> PathBuf {
    if let Some(home) = kaizen_home() {
        return home.join("state");
    }
    match ProjectDirs::from("", "", "kaizen") {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("state"),
    }
}

pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default run-state file written by `kaizen run`.
pub fn default_state_file() -> PathBuf {
    state_dir().join("run-state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_is_toml_in_config_dir() {
        let path = config_file_path();
        assert_eq!(path.file_name().unwrap(), "config.toml");
        assert_eq!(path.parent().unwrap(), config_dir());
    }

    #[test]
    fn test_default_state_file_in_state_dir() {
        let path = default_state_file();
        assert_eq!(path.file_name().unwrap(), "run-state.json");
        assert_eq!(path.parent().unwrap(), state_dir());
    }
}

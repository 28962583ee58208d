use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use config::Config;
use config::ConfigError as ExternalConfigError;
use config::File;
use config::FileFormat;
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_MAX_RELOAD_ITERATIONS: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration build/deserialize error")]
    Config(#[from] ExternalConfigError),
    #[error("reload.max_iterations must be at least 1")]
    ZeroReloadIterations,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub debug: bool,
    pub cache: CacheSettings,
    pub reload: ReloadSettings,
    /// Directory holding downloaded dependency modules, laid out as
    /// `<module path>@<version>/`.
    pub registry: Option<Utf8PathBuf>,
    pub watch: WatchSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Files modified more recently than this are read but never cached.
    pub debounce_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReloadSettings {
    /// Upper bound on repeated package reload passes triggered by files
    /// changing package.
    pub max_iterations: usize,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_RELOAD_ITERATIONS,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct WatchSettings {
    /// Additional glob patterns, relative to each workspace folder.
    pub extra_patterns: Vec<String>,
}

impl Settings {
    pub fn new(project_root: &Path) -> Result<Self, ConfigError> {
        let user_config_file = ProjectDirs::from("org", "cuelang", "cuels")
            .map(|proj_dirs| proj_dirs.config_dir().join("cuels.toml"));

        Self::load_from_paths(project_root, user_config_file.as_deref())
    }

    fn load_from_paths(
        project_root: &Path,
        user_config_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = user_config_path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        builder = builder.add_source(
            File::from(project_root.join(".cuels.toml"))
                .format(FileFormat::Toml)
                .required(false),
        );

        builder = builder.add_source(
            File::from(project_root.join("cuels.toml"))
                .format(FileFormat::Toml)
                .required(false),
        );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reload.max_iterations == 0 {
            return Err(ConfigError::ZeroReloadIterations);
        }
        Ok(())
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.cache.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    mod defaults {
        use super::*;

        #[test]
        fn test_load_no_files() {
            let dir = tempdir().unwrap();
            let settings = Settings::load_from_paths(dir.path(), None).unwrap();
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.cache.debounce_ms, DEFAULT_DEBOUNCE_MS);
            assert_eq!(settings.reload.max_iterations, DEFAULT_MAX_RELOAD_ITERATIONS);
            assert!(settings.registry.is_none());
        }

        #[test]
        fn test_debounce_duration() {
            let settings = Settings::default();
            assert_eq!(settings.debounce(), Duration::from_secs(2));
        }
    }

    mod project_files {
        use super::*;

        #[test]
        fn test_load_cuels_toml_only() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join("cuels.toml"), "debug = true").unwrap();
            let settings = Settings::load_from_paths(dir.path(), None).unwrap();
            assert!(settings.debug);
        }

        #[test]
        fn test_load_dot_cuels_toml_only() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join(".cuels.toml"), "debug = true").unwrap();
            let settings = Settings::load_from_paths(dir.path(), None).unwrap();
            assert!(settings.debug);
        }

        #[test]
        fn test_nested_tables() {
            let dir = tempdir().unwrap();
            let content = "registry = \"/tmp/modcache\"\n\n[cache]\ndebounce_ms = 0\n\n[reload]\nmax_iterations = 4\n\n[watch]\nextra_patterns = [\"**/*.json\"]\n";
            fs::write(dir.path().join("cuels.toml"), content).unwrap();
            let settings = Settings::load_from_paths(dir.path(), None).unwrap();
            assert_eq!(settings.cache.debounce_ms, 0);
            assert_eq!(settings.reload.max_iterations, 4);
            assert_eq!(
                settings.registry.as_deref(),
                Some(camino::Utf8Path::new("/tmp/modcache"))
            );
            assert_eq!(settings.watch.extra_patterns, vec!["**/*.json".to_string()]);
        }
    }

    mod priority {
        use super::*;

        #[test]
        fn test_project_priority_cuels_overrides_dot_cuels() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join(".cuels.toml"), "debug = false").unwrap();
            fs::write(dir.path().join("cuels.toml"), "debug = true").unwrap();
            let settings = Settings::load_from_paths(dir.path(), None).unwrap();
            assert!(settings.debug); // cuels.toml wins
        }

        #[test]
        fn test_user_priority_project_overrides_user() {
            let user_dir = tempdir().unwrap();
            let project_dir = tempdir().unwrap();
            let user_conf_path = user_dir.path().join("cuels.toml");
            fs::write(&user_conf_path, "[cache]\ndebounce_ms = 10").unwrap();
            fs::write(
                project_dir.path().join(".cuels.toml"),
                "[cache]\ndebounce_ms = 20",
            )
            .unwrap();

            let settings =
                Settings::load_from_paths(project_dir.path(), Some(&user_conf_path)).unwrap();
            assert_eq!(settings.cache.debounce_ms, 20);
        }

        #[test]
        fn test_user_and_project_values_merge() {
            let user_dir = tempdir().unwrap();
            let project_dir = tempdir().unwrap();
            let user_conf_path = user_dir.path().join("cuels.toml");
            fs::write(&user_conf_path, "debug = true").unwrap();
            fs::write(
                project_dir.path().join("cuels.toml"),
                "[reload]\nmax_iterations = 8",
            )
            .unwrap();

            let settings =
                Settings::load_from_paths(project_dir.path(), Some(&user_conf_path)).unwrap();
            assert!(settings.debug);
            assert_eq!(settings.reload.max_iterations, 8);
        }
    }

    mod user_config {
        use super::*;

        #[test]
        fn test_load_user_config_only() {
            let user_dir = tempdir().unwrap();
            let project_dir = tempdir().unwrap();
            let user_conf_path = user_dir.path().join("cuels.toml");
            fs::write(&user_conf_path, "debug = true").unwrap();
            let settings =
                Settings::load_from_paths(project_dir.path(), Some(&user_conf_path)).unwrap();
            assert!(settings.debug);
        }

        #[test]
        fn test_no_user_config_file_present() {
            let user_dir = tempdir().unwrap();
            let project_dir = tempdir().unwrap();
            let user_conf_path = user_dir.path().join("cuels.toml");
            let settings =
                Settings::load_from_paths(project_dir.path(), Some(&user_conf_path)).unwrap();
            assert_eq!(settings, Settings::default());
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn test_invalid_toml_content() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join("cuels.toml"), "debug = not_a_boolean").unwrap();
            let result = Settings::load_from_paths(dir.path(), None);
            assert!(matches!(result.unwrap_err(), ConfigError::Config(_)));
        }

        #[test]
        fn test_zero_reload_iterations_rejected() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join("cuels.toml"), "[reload]\nmax_iterations = 0").unwrap();
            let result = Settings::load_from_paths(dir.path(), None);
            assert!(matches!(
                result.unwrap_err(),
                ConfigError::ZeroReloadIterations
            ));
        }
    }
}

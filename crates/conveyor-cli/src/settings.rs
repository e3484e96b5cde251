//! Master configuration loading.

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use conveyor_core::config::MasterConfig;
use std::path::Path;

const ENV_PREFIX: &str = "CONVEYOR";

/// Load the YAML file at `path`, apply `CONVEYOR__*` environment overrides
/// and validate the result.
///
/// `CONVEYOR__TIMERS__TREE_STABLE_TIMER_SECS=30` overrides
/// `timers.tree_stable_timer_secs`.
pub fn load(path: &Path) -> anyhow::Result<MasterConfig> {
    let settings = Config::builder()
        .add_source(File::from(path).format(FileFormat::Yaml))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let config: MasterConfig = settings
        .try_deserialize()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("configuration {} rejected", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
workers:
  - id: linux-01
    pool: linux
builders:
  - name: build
    branch: master
    product_type: linux
    pool: linux
    conf_file: conf_linux_public.py
reporters:
  - type: log
"#;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml() {
        let file = write(YAML);
        let config = load(file.path()).unwrap();
        assert_eq!(config.builders[0].name, "build");
        assert_eq!(config.timers.tree_stable_timer_secs, 10);
        assert_eq!(config.reporters.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let yaml = YAML.replace("pool: linux\n    conf_file", "pool: windows\n    conf_file");
        let file = write(&yaml);
        let err = load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown worker pool: windows"));
    }

    #[test]
    fn test_missing_file() {
        assert!(load(Path::new("/nonexistent/conveyor.yaml")).is_err());
    }
}

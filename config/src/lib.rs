//! vsh Configuration System
//!
//! Layered YAML configuration for the vsh shell and its REPL.
//!
//! # Configuration Loading Priority
//!
//! 1. Compiled-in defaults
//! 2. `/etc/vsh/vsh.yaml` (system-wide)
//! 3. `~/.config/vsh/vsh.yaml` (user)
//! 4. `./vsh.yaml` (project-local)
//! 5. `--config PATH` or `VSH_CONFIG=/path/to/config.yaml` (explicit)
//! 6. Environment variables (highest priority)
//!
//! Each layer is merged key by key over the previous one.
//!
//! # Example Configuration
//!
//! ```yaml
//! shell:
//!   home: /home/dev
//!   prompt: "{cwd}> "
//!   env:
//!     EDITOR: vi
//!     TOKEN: "${VSH_TOKEN}"
//!
//! limits:
//!   max_loop_iterations: 100000
//!
//! execution:
//!   pipefail: true
//!
//! seed:
//!   - path: /home/dev/README
//!     content: "hello\n"
//! ```

#![allow(missing_docs)]

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::*;

/// Load configuration from default locations.
///
/// Searches for config files in order and merges them.
/// Environment variables override file values.
pub fn load() -> Result<VshConfig, ConfigError> {
    ConfigLoader::new().load()
}

/// Load configuration with `path` as the explicit layer.
pub fn load_from_file(path: &str) -> Result<VshConfig, ConfigError> {
    ConfigLoader::new().with_file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = VshConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shell.home, "/home/user");
        assert_eq!(config.limits.max_substitution_depth, 32);
        assert_eq!(config.limits.max_brace_expansion, 10_000);
        assert_eq!(config.limits.max_loop_iterations, 0);
        assert!(!config.execution.pipefail);
    }

    #[test]
    fn parse_minimal_yaml() {
        let yaml = r#"
execution:
  pipefail: true
"#;
        let config: VshConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.execution.pipefail);
        assert_eq!(config.shell.prompt, "vsh:{cwd}$ "); // default
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
shell:
  home: /home/dev
  prompt: "{cwd}> "
  env:
    EDITOR: vi
  history:
    enabled: false
    file: /tmp/hist
    max_entries: 50

limits:
  max_substitution_depth: 8
  max_brace_expansion: 100
  max_loop_iterations: 1000

seed:
  - path: /home/dev/a.txt
    content: "a"
  - path: /home/dev/empty

logging:
  level: debug
  format: json
"#;
        let config: VshConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.shell.home, "/home/dev");
        assert_eq!(config.shell.env.get("EDITOR").map(String::as_str), Some("vi"));
        assert!(!config.shell.history.enabled);
        assert_eq!(config.shell.history.path(), std::path::PathBuf::from("/tmp/hist"));
        assert_eq!(config.limits.max_substitution_depth, 8);
        assert_eq!(config.seed.len(), 2);
        assert_eq!(config.seed[1].content, "");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn zero_depth_is_rejected() {
        let mut config = VshConfig::default();
        config.limits.max_substitution_depth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }
}

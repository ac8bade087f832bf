use crate::{ConfigError, VshConfig};
use regex::Regex;
use serde_yaml::Value;
use std::path::{Path, PathBuf};

pub struct ConfigLoader {
    explicit_file: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        if let Some(home) = dirs::home_dir() {
            search_paths.push(home.join(".config/vsh/vsh.yaml"));
        }
        search_paths.push(PathBuf::from("./vsh.yaml"));

        #[cfg(unix)]
        search_paths.insert(0, PathBuf::from("/etc/vsh/vsh.yaml"));

        Self {
            explicit_file: None,
            search_paths,
        }
    }

    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Replace the default search locations. Missing files are skipped.
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    pub fn load(&self) -> Result<VshConfig, ConfigError> {
        let mut merged = serde_yaml::to_value(VshConfig::default())?;

        for path in &self.search_paths {
            if !path.exists() {
                continue;
            }
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    tracing::debug!(path = %path.display(), "merging config file");
                    merge_values(&mut merged, self.parse_document(&content)?);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable config");
                }
            }
        }

        let explicit = self
            .explicit_file
            .clone()
            .or_else(|| std::env::var_os("VSH_CONFIG").map(PathBuf::from));
        if let Some(path) = explicit {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
                path: path.clone(),
                source: e,
            })?;
            tracing::debug!(path = %path.display(), "merging explicit config file");
            merge_values(&mut merged, self.parse_document(&content)?);
        }

        let mut config: VshConfig = serde_yaml::from_value(merged)?;
        apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn parse_document(&self, content: &str) -> Result<Value, ConfigError> {
        let expanded = self.expand_env_vars(content);
        match serde_yaml::from_str(&expanded)? {
            // An empty file is an empty overlay
            Value::Null => Ok(Value::Mapping(serde_yaml::Mapping::new())),
            value => Ok(value),
        }
    }

    fn expand_env_vars(&self, content: &str) -> String {
        let Ok(re) = Regex::new(r"\$\{([^}]+)\}") else {
            return content.to_string();
        };
        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string()
    }
}

/// Overlay `overlay` onto `base`. Mappings merge key by key; any other
/// value replaces what was there.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut VshConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(level) = var("VSH_LOG_LEVEL") {
        match serde_yaml::from_str(&level.to_lowercase()) {
            Ok(l) => config.logging.level = l,
            Err(_) => tracing::warn!(%level, "ignoring invalid VSH_LOG_LEVEL"),
        }
    }
    if let Some(home) = var("VSH_HOME") {
        if !home.is_empty() {
            config.shell.home = home;
        }
    }
    if let Some(prompt) = var("VSH_PROMPT") {
        config.shell.prompt = prompt;
    }
    if let Some(pipefail) = var("VSH_PIPEFAIL") {
        match pipefail.as_str() {
            "1" | "true" | "on" | "yes" => config.execution.pipefail = true,
            "0" | "false" | "off" | "no" | "" => config.execution.pipefail = false,
            other => tracing::warn!(value = %other, "ignoring invalid VSH_PIPEFAIL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogLevel;
    use std::collections::HashMap;
    use std::io::Write;

    fn isolated_loader() -> ConfigLoader {
        ConfigLoader::new().with_search_paths(Vec::new())
    }

    #[test]
    fn expand_env_vars_works() {
        std::env::set_var("VSH_TEST_VAR_123", "hello");
        let result = isolated_loader().expand_env_vars("value: ${VSH_TEST_VAR_123}");
        assert_eq!(result, "value: hello");
        std::env::remove_var("VSH_TEST_VAR_123");
    }

    #[test]
    fn missing_env_var_becomes_empty() {
        let result = isolated_loader().expand_env_vars("value: ${NONEXISTENT_VAR_XYZ}");
        assert_eq!(result, "value: ");
    }

    #[test]
    fn env_overrides_config() {
        let vars: HashMap<&str, &str> = [
            ("VSH_HOME", "/srv/me"),
            ("VSH_PIPEFAIL", "true"),
            ("VSH_LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();
        let mut config = VshConfig::default();
        apply_env_overrides(&mut config, |name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.shell.home, "/srv/me");
        assert!(config.execution.pipefail);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn invalid_override_is_ignored() {
        let mut config = VshConfig::default();
        apply_env_overrides(&mut config, |name| {
            (name == "VSH_PIPEFAIL").then(|| "maybe".to_string())
        });
        assert!(!config.execution.pipefail);
    }

    #[test]
    fn merge_keeps_unrelated_keys() {
        let mut base = serde_yaml::to_value(VshConfig::default()).unwrap();
        let overlay: Value = serde_yaml::from_str("limits:\n  max_loop_iterations: 5\n").unwrap();
        merge_values(&mut base, overlay);
        let config: VshConfig = serde_yaml::from_value(base).unwrap();
        assert_eq!(config.limits.max_loop_iterations, 5);
        assert_eq!(config.limits.max_brace_expansion, 10_000);
        assert_eq!(config.shell.home, "/home/user");
    }

    #[test]
    fn later_files_override_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("system.yaml");
        let user = dir.path().join("user.yaml");
        std::fs::write(&system, "shell:\n  home: /sys\n  prompt: 'sys> '\n").unwrap();
        std::fs::write(&user, "shell:\n  home: /usr/me\n").unwrap();

        let config = isolated_loader()
            .with_search_paths(vec![system, dir.path().join("missing.yaml"), user])
            .load()
            .unwrap();
        assert_eq!(config.shell.home, "/usr/me");
        assert_eq!(config.shell.prompt, "sys> ");
    }

    #[test]
    fn explicit_file_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let err = isolated_loader()
            .with_file(dir.path().join("nope.yaml"))
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn explicit_file_with_seed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "seed:\n  - path: /etc/motd\n    content: \"hi\\n\"\nexecution:\n  pipefail: true"
        )
        .unwrap();
        let config = isolated_loader().with_file(file.path()).load().unwrap();
        assert_eq!(config.seed.len(), 1);
        assert_eq!(config.seed[0].content, "hi\n");
    }

    #[test]
    fn empty_file_is_empty_overlay() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = isolated_loader().with_file(file.path()).load().unwrap();
        assert_eq!(config.limits.max_substitution_depth, 32);
    }

    #[test]
    fn invalid_home_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shell:\n  home: relative/dir").unwrap();
        let err = isolated_loader().with_file(file.path()).load().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}

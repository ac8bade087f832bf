//! Session state shared by every statement of a shell

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared, long-lived session environment.
pub type SharedEnvironment = Arc<RwLock<Environment>>;

pub(crate) fn read_env(env: &SharedEnvironment) -> RwLockReadGuard<'_, Environment> {
    env.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_env(env: &SharedEnvironment) -> RwLockWriteGuard<'_, Environment> {
    env.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct Environment {
    pub cwd: String,
    pub vars: HashMap<String, String>,
    pub last_status: i32,
    /// `$0` followed by `$1..$n`
    pub positional: Vec<String>,
}

impl Environment {
    pub fn new(cwd: impl Into<String>) -> Self {
        let cwd = cwd.into();
        let mut vars = HashMap::new();
        vars.insert("PWD".to_string(), cwd.clone());
        Self {
            cwd,
            vars,
            last_status: 0,
            positional: vec!["vsh".to_string()],
        }
    }

    pub fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn unset_var(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }

    pub fn set_cwd(&mut self, cwd: &str) {
        if let Some(old) = self.vars.get("PWD").cloned() {
            self.vars.insert("OLDPWD".to_string(), old);
        }
        self.cwd = cwd.to_string();
        self.vars.insert("PWD".to_string(), cwd.to_string());
    }

    /// Resolve a parameter name, including the special parameters
    /// `?`, `#`, `@`, `*` and positional digits.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "?" => Some(self.last_status.to_string()),
            "#" => Some(self.positional.len().saturating_sub(1).to_string()),
            "@" | "*" => Some(self.positional.iter().skip(1).cloned().collect::<Vec<_>>().join(" ")),
            "PWD" => Some(self.cwd.clone()),
            _ if name.chars().all(|c| c.is_ascii_digit()) => {
                name.parse::<usize>().ok().and_then(|n| self.positional.get(n).cloned())
            }
            _ => self.vars.get(name).cloned(),
        }
    }

    /// Copy for a script run in its own environment.
    pub fn isolated(&self, script: &str, args: &[String]) -> Self {
        let mut positional = Vec::with_capacity(args.len() + 1);
        positional.push(script.to_string());
        positional.extend(args.iter().cloned());
        Self {
            cwd: self.cwd.clone(),
            vars: self.vars.clone(),
            last_status: 0,
            positional,
        }
    }
}

pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_parameters() {
        let mut env = Environment::new("/home/user");
        env.last_status = 3;
        env.positional = vec!["script.sh".into(), "a".into(), "b".into()];
        assert_eq!(env.lookup("?").as_deref(), Some("3"));
        assert_eq!(env.lookup("#").as_deref(), Some("2"));
        assert_eq!(env.lookup("0").as_deref(), Some("script.sh"));
        assert_eq!(env.lookup("2").as_deref(), Some("b"));
        assert_eq!(env.lookup("3"), None);
        assert_eq!(env.lookup("@").as_deref(), Some("a b"));
        assert_eq!(env.lookup("PWD").as_deref(), Some("/home/user"));
    }

    #[test]
    fn test_set_cwd_tracks_oldpwd() {
        let mut env = Environment::new("/a");
        env.set_cwd("/b");
        assert_eq!(env.get_var("OLDPWD"), Some("/a"));
        assert_eq!(env.get_var("PWD"), Some("/b"));
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("FOO_1"));
        assert!(is_valid_name("_x"));
        assert!(!is_valid_name("1x"));
        assert!(!is_valid_name("a-b"));
        assert!(!is_valid_name(""));
    }
}

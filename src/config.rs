//! Machine configuration.

use std::env;

use tracing::warn;

pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Environment variable overriding the stack capacity in [`VmConfig::from_env`].
pub const STACK_SIZE_VAR: &str = "BASALT_STACK_SIZE";

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Value stack capacity in cells.
    pub stack_size: usize,
    /// Bind the standard builtins as globals.
    pub builtins: bool,
}

impl VmConfig {
    pub fn new() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            builtins: true,
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_builtins(mut self, builtins: bool) -> Self {
        self.builtins = builtins;
        self
    }

    /// Defaults, with the stack size taken from `BASALT_STACK_SIZE` when set.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let config = Self::new();
        match env::var(STACK_SIZE_VAR) {
            Ok(raw) => match parse_stack_size(&raw) {
                Some(size) => config.with_stack_size(size),
                None => {
                    warn!(value = %raw, "ignoring invalid {}", STACK_SIZE_VAR);
                    config
                }
            },
            Err(_) => config,
        }
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_stack_size(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = VmConfig::new().with_stack_size(12).with_builtins(false);
        assert_eq!(config.stack_size, 12);
        assert!(!config.builtins);
        assert_eq!(VmConfig::default().stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn stack_size_parsing() {
        assert_eq!(parse_stack_size(" 256 "), Some(256));
        assert_eq!(parse_stack_size("0"), None);
        assert_eq!(parse_stack_size("lots"), None);
    }
}

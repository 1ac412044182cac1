//! Programs a local pod may start
//!
//! The local runtime runs session processes directly on the host, so the
//! first word of every command must be a known login shell.

use std::path::Path;

use anyhow::{bail, Result};

const KNOWN_SHELLS: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "/bin/zsh",
    "/bin/fish",
    "/bin/dash",
    "/bin/ksh",
    "/usr/bin/sh",
    "/usr/bin/bash",
    "/usr/bin/zsh",
    "/usr/bin/fish",
    "/usr/bin/dash",
    "/usr/bin/ksh",
    "/usr/local/bin/bash",
    "/usr/local/bin/zsh",
    "/usr/local/bin/fish",
    "/opt/homebrew/bin/bash",
    "/opt/homebrew/bin/zsh",
];

fn listed_in_etc_shells(program: &str) -> bool {
    std::fs::read_to_string("/etc/shells")
        .map(|shells| {
            shells
                .lines()
                .map(str::trim)
                .any(|line| !line.starts_with('#') && line == program)
        })
        .unwrap_or(false)
}

/// Check that `program` is an absolute path to an installed shell
pub fn validate_program(program: &str) -> Result<String> {
    if !program.starts_with('/') {
        bail!("'{}' is not an absolute path", program);
    }
    if !KNOWN_SHELLS.contains(&program) && !listed_in_etc_shells(program) {
        bail!("'{}' is not an allowed shell", program);
    }
    if !Path::new(program).exists() {
        bail!("shell '{}' does not exist", program);
    }
    Ok(program.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_bin_sh() {
        assert_eq!(validate_program("/bin/sh").unwrap(), "/bin/sh");
    }

    #[test]
    fn test_rejects_arbitrary_programs() {
        assert!(validate_program("/usr/bin/python3").is_err());
        assert!(validate_program("sh").is_err());
        assert!(validate_program("/tmp/bin/sh").is_err());
    }
}

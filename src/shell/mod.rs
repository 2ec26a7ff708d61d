//! Shell discovery and PTY-backed spawning.
//!
//! Each established client gets exactly one shell, forked directly onto the
//! slave side of a freshly allocated PTY ([`pty::spawn_shell_pty`]). There is no
//! one-shot "run a command and capture output" mode here: every client is an
//! interactive session for its whole connection lifetime.

use std::path::Path;

pub mod pty;

/// Resolve the shell program to run: the configured path if it exists and is
/// a file, otherwise `$SHELL` if that exists, otherwise `/bin/sh`.
///
/// Every client gets the same shell, so there's no need to rank multiple
/// candidates; a single two-step fallback covers it.
pub fn resolve_shell_program(configured: &str) -> String {
    if Path::new(configured).is_file() {
        return configured.to_string();
    }
    if let Ok(from_env) = std::env::var("SHELL") {
        if Path::new(&from_env).is_file() {
            return from_env;
        }
    }
    "/bin/sh".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_bin_sh_when_nothing_else_exists() {
        std::env::remove_var("SHELL");
        let resolved = resolve_shell_program("/no/such/shell/binary");
        assert_eq!(resolved, "/bin/sh");
    }

    #[test]
    fn resolve_keeps_configured_path_when_it_exists() {
        assert_eq!(resolve_shell_program("/bin/true"), "/bin/true");
    }

    #[test]
    fn resolve_falls_back_to_shell_env_when_configured_path_missing() {
        std::env::set_var("SHELL", "/bin/true");
        assert_eq!(resolve_shell_program("/no/such/shell/binary"), "/bin/true");
        std::env::remove_var("SHELL");
    }
}

//! Hand-off of rendered scripts to the nftables control plane
//!
//! The renderer only produces text. [`NftCommand`] pipes that text into
//! `nft -f -` (apply) or `nft --check -f -` (dry validation by nft itself).
//! The program is configurable so a wrapper such as `sudo nft` or a test
//! double can stand in for the real binary.

use crate::core::error::{Error, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

/// Program used when nothing else is configured
pub const DEFAULT_NFT_COMMAND: &str = "nft";

/// A configured nft invocation: program plus leading arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftCommand {
    program: String,
    args: Vec<String>,
}

impl Default for NftCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_NFT_COMMAND.to_string(),
            args: Vec::new(),
        }
    }
}

impl NftCommand {
    /// Parses a whitespace-separated command line such as `sudo nft`.
    /// A blank line falls back to plain `nft`.
    pub fn parse(command_line: &str) -> Self {
        let mut words = command_line.split_whitespace().map(str::to_string);
        match words.next() {
            Some(program) => Self {
                program,
                args: words.collect(),
            },
            None => Self::default(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Loads `script` into the kernel, replacing the current ruleset.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the program cannot be started, `Error::Nftables` if it
    /// exits non-zero.
    pub fn apply(&self, script: &str) -> Result<()> {
        info!("Applying ruleset via {} -f -", self.program);
        self.run(&["-f", "-"], script)
    }

    /// Asks nft to parse and check `script` without committing it.
    ///
    /// # Errors
    ///
    /// Same as [`NftCommand::apply`].
    pub fn check(&self, script: &str) -> Result<()> {
        info!("Checking ruleset via {} --check -f -", self.program);
        self.run(&["--check", "-f", "-"], script)
    }

    fn run(&self, extra: &[&str], script: &str) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // A program that exits without reading everything closes the pipe
        // early; its exit status decides the outcome.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(script.as_bytes())
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        let output = child.wait_with_output()?;
        debug!(status = ?output.status, "nft exited");

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let errors = parse_nft_errors(&stderr);
        error!("nft rejected the ruleset: {}", stderr.trim());

        Err(Error::Nftables {
            message: errors
                .first()
                .cloned()
                .unwrap_or_else(|| format!("{} exited with {}", self.program, output.status)),
            stderr: (!stderr.trim().is_empty()).then_some(stderr),
            exit_code: output.status.code(),
        })
    }
}

/// Splits nft stderr into one cleaned message per line.
fn parse_nft_errors(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.trim_start_matches("Error: ")
                .trim_start_matches("nft: ")
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let cmd = NftCommand::parse("sudo -n nft");
        assert_eq!(cmd.program(), "sudo");
        assert_eq!(cmd.args, ["-n", "nft"]);

        assert_eq!(NftCommand::parse("   "), NftCommand::default());
        assert_eq!(NftCommand::parse("nft").program(), DEFAULT_NFT_COMMAND);
    }

    #[test]
    fn test_parse_nft_errors_plain_text() {
        let errors = parse_nft_errors("Error: syntax error, unexpected $end\nError: invalid expression\n");
        assert_eq!(errors, ["syntax error, unexpected $end", "invalid expression"]);
    }

    #[test]
    fn test_parse_nft_errors_with_nft_prefix() {
        assert_eq!(parse_nft_errors("nft: syntax error\n"), ["syntax error"]);
        assert!(parse_nft_errors("").is_empty());
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let cmd = NftCommand::parse("/nonexistent/netfence-nft");
        let err = cmd.check("flush ruleset\n").unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err:?}");
    }

    #[test]
    fn test_script_reaches_stdin() {
        // `sh -c 'grep -q ...'` reads stdin and ignores the trailing nft flags.
        let cmd = NftCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "grep -q 'table inet netfence'".to_string()],
        };
        cmd.apply("flush ruleset\n\ntable inet netfence {\n}\n").unwrap();
        let err = cmd.apply("flush ruleset\n").unwrap_err();
        match err {
            Error::Nftables { exit_code, .. } => assert_eq!(exit_code, Some(1)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

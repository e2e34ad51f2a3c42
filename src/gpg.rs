use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureCheck {
    Good { details: String },
    Bad { details: String },
    Failed { details: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decryption {
    Decrypted(String),
    Failed { details: String },
}

/// Runs GnuPG on a message body written to a scratch file.
#[derive(Debug, Clone)]
pub struct GpgTool {
    program: PathBuf,
    args: Vec<String>,
}

impl Default for GpgTool {
    fn default() -> Self {
        Self::new("gpg")
    }
}

impl GpgTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before the generated ones, e.g. `--homedir`.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn run(&self, action: &str, text: &str) -> Result<Output> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("message.gpg");
        fs::write(&path, text)?;

        log::debug!("running {} {action}", self.program.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(["--batch", "--yes", action])
            .arg(&path)
            .output()?;
        Ok(output)
    }

    pub fn verify(&self, text: &str) -> Result<SignatureCheck> {
        let output = self.run("--verify", text)?;
        let details = String::from_utf8_lossy(&output.stderr).into_owned();
        Ok(match output.status.code() {
            Some(0) => SignatureCheck::Good { details },
            Some(1) => SignatureCheck::Bad { details },
            _ => SignatureCheck::Failed { details },
        })
    }

    pub fn decrypt(&self, text: &str) -> Result<Decryption> {
        let output = self.run("--decrypt", text)?;
        if output.status.success() {
            Ok(Decryption::Decrypted(
                String::from_utf8_lossy(&output.stdout).into_owned(),
            ))
        } else {
            Ok(Decryption::Failed {
                details: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

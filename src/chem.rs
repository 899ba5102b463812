//! Chemistry collaborators: canonical-form resolution and fingerprinting.
//!
//! Neither algorithm lives in this crate. Both are reached through traits so the
//! pipeline can run against an external program in production and against
//! fixed tables in tests.

use std::collections::HashMap;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::constants::fingerprint::FINGERPRINT_VERSION;
use crate::errors::PipelineError;
use crate::types::{CanonicalSmiles, RawSmiles};

/// Maps a raw structure string to its canonical representation.
///
/// Implementations must be deterministic. A structure that cannot be parsed is
/// reported as `PipelineError::Canonicalization`.
pub trait Canonicalizer {
    /// Canonical form of `raw`.
    fn canonicalize(&self, raw: &str) -> Result<CanonicalSmiles, PipelineError>;
}

/// Computes a versioned feature vector for a canonical structure.
pub trait Fingerprinter {
    /// Fingerprint of `canonical`, tagged with the producing release.
    fn fingerprint(&self, canonical: &str) -> Result<Fingerprint, PipelineError>;
}

/// Opaque fingerprint payload plus the release that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Feature vector as emitted by the fingerprinting program.
    pub features: serde_json::Value,
    /// Pinned fingerprint release.
    pub version: String,
}

impl Fingerprint {
    /// Wrap features with the pinned release version.
    pub fn pinned(features: serde_json::Value) -> Self {
        Self {
            features,
            version: FINGERPRINT_VERSION.to_string(),
        }
    }

    /// Serialized feature document stored in the `pg_fingerprint` column.
    pub fn encoded(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(&self.features)?)
    }
}

/// An external program invoked once per structure with the SMILES as its final
/// argument.
#[derive(Clone, Debug)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    /// Parse a whitespace-separated command line such as `python -m canon`.
    pub fn parse(command_line: &str) -> Result<Self, PipelineError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            PipelineError::Configuration("external command line is empty".to_string())
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Program name or path.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, input: &str) -> Result<String, String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .output()
            .map_err(|err| format!("spawn {}: {}", self.program, err))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(format!("{} produced no output", self.program));
        }
        Ok(stdout)
    }
}

/// Canonicalizer backed by an external program that prints the canonical SMILES.
#[derive(Clone, Debug)]
pub struct CommandCanonicalizer {
    command: ExternalCommand,
}

impl CommandCanonicalizer {
    /// Wrap an external command.
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Canonicalizer for CommandCanonicalizer {
    fn canonicalize(&self, raw: &str) -> Result<CanonicalSmiles, PipelineError> {
        self.command
            .run(raw)
            .map_err(|reason| PipelineError::Canonicalization {
                smiles: raw.to_string(),
                reason,
            })
    }
}

/// Fingerprinter backed by an external program that prints a JSON document.
#[derive(Clone, Debug)]
pub struct CommandFingerprinter {
    command: ExternalCommand,
}

impl CommandFingerprinter {
    /// Wrap an external command.
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Fingerprinter for CommandFingerprinter {
    fn fingerprint(&self, canonical: &str) -> Result<Fingerprint, PipelineError> {
        let fail = |reason: String| PipelineError::Fingerprint {
            smiles: canonical.to_string(),
            reason,
        };
        let stdout = self.command.run(canonical).map_err(fail)?;
        let features = serde_json::from_str(&stdout)
            .map_err(|err| fail(format!("invalid fingerprint document: {err}")))?;
        Ok(Fingerprint::pinned(features))
    }
}

/// Table-backed canonicalizer for tests and fixed vocabularies.
///
/// Inputs not in the table fail like an unparseable structure would.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCanonicalizer {
    table: HashMap<RawSmiles, CanonicalSmiles>,
}

impl InMemoryCanonicalizer {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `raw` to `canonical`.
    pub fn with(mut self, raw: impl Into<RawSmiles>, canonical: impl Into<CanonicalSmiles>) -> Self {
        self.table.insert(raw.into(), canonical.into());
        self
    }

    /// Map `canonical` to itself, marking it as a fixed point.
    pub fn with_fixed_point(self, canonical: impl Into<CanonicalSmiles>) -> Self {
        let canonical = canonical.into();
        self.with(canonical.clone(), canonical)
    }
}

impl Canonicalizer for InMemoryCanonicalizer {
    fn canonicalize(&self, raw: &str) -> Result<CanonicalSmiles, PipelineError> {
        self.table
            .get(raw)
            .cloned()
            .ok_or_else(|| PipelineError::Canonicalization {
                smiles: raw.to_string(),
                reason: "structure not recognized".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_canonicalizer_maps_and_rejects() {
        let canon = InMemoryCanonicalizer::new()
            .with("C1=CC=CC=C1", "c1ccccc1")
            .with_fixed_point("c1ccccc1");
        assert_eq!(canon.canonicalize("C1=CC=CC=C1").unwrap(), "c1ccccc1");
        assert_eq!(canon.canonicalize("c1ccccc1").unwrap(), "c1ccccc1");
        let err = canon.canonicalize("not a smiles").unwrap_err();
        assert!(matches!(err, PipelineError::Canonicalization { ref smiles, .. } if smiles == "not a smiles"));
    }

    #[test]
    fn pinned_fingerprint_carries_release_and_encodes_features() {
        let fp = Fingerprint::pinned(serde_json::json!({"a": 1.0, "b": 0}));
        assert_eq!(fp.version, FINGERPRINT_VERSION);
        assert_eq!(fp.encoded().unwrap(), r#"{"a":1.0,"b":0}"#);
    }

    #[test]
    fn external_command_parse_splits_program_and_args() {
        let cmd = ExternalCommand::parse("python3 -m psmiles_canon").unwrap();
        assert_eq!(cmd.program(), "python3");
        assert_eq!(cmd.args, vec!["-m", "psmiles_canon"]);
        assert!(ExternalCommand::parse("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_canonicalizer_reads_trimmed_stdout() {
        let canon = CommandCanonicalizer::new(ExternalCommand::parse("echo").unwrap());
        assert_eq!(canon.canonicalize("[*]CC[*]").unwrap(), "[*]CC[*]");
    }

    #[cfg(unix)]
    #[test]
    fn command_failures_surface_as_canonicalization_errors() {
        let canon = CommandCanonicalizer::new(ExternalCommand::parse("false").unwrap());
        assert!(matches!(
            canon.canonicalize("CC"),
            Err(PipelineError::Canonicalization { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_fingerprinter_parses_json_output() {
        let fp = CommandFingerprinter::new(ExternalCommand::parse("echo").unwrap())
            .fingerprint(r#"{"x":2}"#)
            .unwrap();
        assert_eq!(fp.features, serde_json::json!({"x": 2}));
        assert_eq!(fp.version, FINGERPRINT_VERSION);

        let err = CommandFingerprinter::new(ExternalCommand::parse("echo").unwrap())
            .fingerprint("CC")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Fingerprint { .. }));
    }
}

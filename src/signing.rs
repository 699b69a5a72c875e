//! Detached signatures through an external signing service.
//!
//! The service is driven with `sign -d -i <input> -o <output> [-k <key>]` and
//! `verify -d <signature> -i <input> -S <identity>`. Contract bytes are always
//! handed to it through a scratch copy, so what is signed is exactly the
//! bytes whose hash was computed.
use crate::contract::Contract;
use crate::error::{Error, Result, SignatureProblem};
use crate::process::ToolCommand;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Progress of one signing act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SigningStage {
    Unsigned,
    Hashed,
    ExternallySigned,
    Placed,
}

impl fmt::Display for SigningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SigningStage::Unsigned => "unsigned",
            SigningStage::Hashed => "hashed",
            SigningStage::ExternallySigned => "externally-signed",
            SigningStage::Placed => "placed",
        };
        f.write_str(label)
    }
}

/// A placed detached signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub filename: PathBuf,
    pub counterparty_id: String,
    pub signatory_id: String,
    pub expected_signer_identity: Option<String>,
}

pub struct SigningGateway {
    signer: ToolCommand,
}

impl SigningGateway {
    pub fn new(signer: ToolCommand) -> Self {
        Self { signer }
    }

    pub fn sign(
        &self,
        content_file: &Path,
        output_signature_file: &Path,
        signer_key_id: Option<&str>,
    ) -> Result<()> {
        self.signer.ensure_available()?;
        let input = content_file.to_string_lossy();
        let output_path = output_signature_file.to_string_lossy();
        let mut args = vec!["sign", "-d", "-i", input.as_ref(), "-o", output_path.as_ref()];
        if let Some(key) = signer_key_id {
            args.extend(["-k", key]);
        }
        let output = self.signer.run(&args, None)?;
        if !output.success() {
            return Err(Error::Signing {
                operation: self.signer.describe(&args),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        let written = fs::metadata(output_signature_file)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false);
        if !written {
            return Err(Error::Signing {
                operation: format!("{} (no signature written)", self.signer.describe(&args)),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    /// Fails with `SignatureVerification` unless the service accepts the
    /// signature for `expected_signer_identity`.
    pub fn verify(
        &self,
        content_file: &Path,
        signature_file: &Path,
        expected_signer_identity: &str,
    ) -> Result<()> {
        self.signer.ensure_available()?;
        let signature = signature_file.to_string_lossy();
        let input = content_file.to_string_lossy();
        let args = [
            "verify",
            "-d",
            signature.as_ref(),
            "-i",
            input.as_ref(),
            "-S",
            expected_signer_identity,
        ];
        let output = self.signer.run(&args, None)?;
        if output.success() {
            return Ok(());
        }
        let detail = output.stderr.trim();
        let mut reason = match output.exit_code {
            Some(code) => format!("signing service rejected signature (exit code {code})"),
            None => "signing service terminated by signal".to_string(),
        };
        if !detail.is_empty() {
            reason.push_str(": ");
            reason.push_str(detail);
        }
        Err(Error::SignatureVerification {
            problems: vec![SignatureProblem {
                subject: signature_file.display().to_string(),
                reason,
            }],
        })
    }
}

/// Sign `contract` on behalf of one signatory and place the detached
/// signature beside it as `<counterparty>__<signatory>.sig`.
pub fn sign_contract(
    contract: &mut Contract,
    gateway: &SigningGateway,
    counterparty_id: &str,
    signatory_id: &str,
    signer_key_id: Option<&str>,
) -> Result<SignatureRecord> {
    let expected_signer_identity = contract
        .find_signatory(counterparty_id, signatory_id)?
        .1
        .signer_identity
        .clone();
    let mut act = SigningAct::new(counterparty_id, signatory_id);

    let hash = contract.compute_hash().to_string();
    act.advance(SigningStage::Hashed, &hash);

    let directory = contract.directory();
    let scratch = scratch_dir(&directory)?;
    let input = scratch.path().join("contract");
    fs::write(&input, contract.raw_bytes())
        .map_err(|err| Error::io("write scratch contract", &input, err))?;
    let staged = scratch.path().join("signature");
    gateway.sign(&input, &staged, signer_key_id)?;
    act.advance(SigningStage::ExternallySigned, &hash);

    let filename = contract.signature_path(counterparty_id, signatory_id);
    fs::rename(&staged, &filename).map_err(|err| Error::io("place signature", &filename, err))?;
    act.advance(SigningStage::Placed, &hash);

    Ok(SignatureRecord {
        filename,
        counterparty_id: counterparty_id.to_string(),
        signatory_id: signatory_id.to_string(),
        expected_signer_identity,
    })
}

/// Check every counterparty/signatory pair against the contract bytes
/// currently on disk, collecting all problems before failing. Returns the
/// verified records when there are none.
pub fn verify_contract(
    contract: &mut Contract,
    gateway: &SigningGateway,
) -> Result<Vec<SignatureRecord>> {
    let filename = contract.filename().to_path_buf();
    let on_disk = fs::read(&filename).map_err(|err| Error::io("read contract", &filename, err))?;
    if on_disk != contract.raw_bytes() {
        tracing::warn!(contract = %filename.display(), "contract changed since load, verifying current bytes");
        contract.set_raw_bytes(on_disk);
    }
    let hash = contract.compute_hash().to_string();
    let scratch = scratch_dir(&contract.directory())?;
    let input = scratch.path().join("contract");
    fs::write(&input, contract.raw_bytes())
        .map_err(|err| Error::io("write scratch contract", &input, err))?;

    let mut problems = Vec::new();
    let mut verified = Vec::new();
    for (counterparty, signatory) in contract.signing_pairs() {
        let filename = contract.signature_path(&counterparty.id, &signatory.id);
        let mut missing = false;
        if !filename.is_file() {
            problems.push(SignatureProblem::signatory(
                &counterparty.id,
                &signatory.id,
                format!("missing signature file {}", filename.display()),
            ));
            missing = true;
        }
        let Some(identity) = signatory.signer_identity.as_deref() else {
            problems.push(SignatureProblem::signatory(
                &counterparty.id,
                &signatory.id,
                "no recorded signer identity (keybase_id)",
            ));
            continue;
        };
        if missing {
            continue;
        }
        match gateway.verify(&input, &filename, identity) {
            Ok(()) => {
                tracing::info!(
                    counterparty = %counterparty.id,
                    signatory = %signatory.id,
                    hash = %hash,
                    "signature verified"
                );
                verified.push(SignatureRecord {
                    filename,
                    counterparty_id: counterparty.id.clone(),
                    signatory_id: signatory.id.clone(),
                    expected_signer_identity: Some(identity.to_string()),
                });
            }
            Err(Error::SignatureVerification { problems: found }) => {
                problems.extend(found.into_iter().map(|problem| {
                    SignatureProblem::signatory(&counterparty.id, &signatory.id, problem.reason)
                }));
            }
            Err(err) => problems.push(SignatureProblem::signatory(
                &counterparty.id,
                &signatory.id,
                err.to_string(),
            )),
        }
    }

    if problems.is_empty() {
        Ok(verified)
    } else {
        tracing::error!(problems = problems.len(), hash = %hash, "signature verification failed");
        Err(Error::SignatureVerification { problems })
    }
}

fn scratch_dir(directory: &Path) -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix(".themis-sign-")
        .tempdir_in(directory)
        .map_err(|err| Error::io("create scratch dir in", directory, err))
}

struct SigningAct<'a> {
    stage: SigningStage,
    counterparty_id: &'a str,
    signatory_id: &'a str,
}

impl<'a> SigningAct<'a> {
    fn new(counterparty_id: &'a str, signatory_id: &'a str) -> Self {
        Self {
            stage: SigningStage::Unsigned,
            counterparty_id,
            signatory_id,
        }
    }

    fn advance(&mut self, next: SigningStage, hash: &str) {
        debug_assert!(next > self.stage, "{} -> {next}", self.stage);
        tracing::info!(
            counterparty = self.counterparty_id,
            signatory = self.signatory_id,
            from = %self.stage,
            to = %next,
            hash,
            "signing stage"
        );
        self.stage = next;
    }
}

//! Shared fixtures for binary-level tests.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

pub const TEMPLATE: &str = "<h1>Services Agreement</h1>
<p>Effective {{date}}</p>
{{#each counterparties}}<p>Signed by {{this.full_name}}</p>{{/each}}
";

/// A scratch directory holding a profile, a template and a contract.
pub struct Workspace {
    dir: TempDir,
}

fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Skip when `sh` is missing; the mock signing service needs it.
#[allow(dead_code)]
pub fn skip_if_no_shell() -> bool {
    let missing = Command::new("sh")
        .arg("-c")
        .arg("exit 0")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_err();
    if missing {
        eprintln!("Skipping: sh not available");
    }
    missing
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[allow(dead_code)]
    pub fn contract_path(&self) -> PathBuf {
        self.path().join("contract.toml")
    }

    pub fn write_template(&self, content: &str) {
        std::fs::write(self.path().join("contract.html"), content).expect("write template");
    }

    /// Write a contract pinned to `hash` with one signatory per counterparty.
    pub fn write_contract(&self, hash: &str) {
        let text = format!(
            r#"date = "1 January 2020"
counterparties = ["client", "supplier"]

[template]
source = "./contract.html"
format = "handlebars"
hash = "{hash}"

[client]
full_name = "Company XYZ"
signatories = ["client_sig01"]

[client_sig01]
full_names = "Client Sig01"
keybase_id = "clientsig"

[supplier]
full_name = "ABC Limited"
signatories = ["supplier_sig01"]

[supplier_sig01]
full_names = "Supplier Sig01"
keybase_id = "suppliersig"
"#
        );
        std::fs::write(self.contract_path(), text).expect("write contract");
    }

    /// Run the binary against this workspace's profile and the mock signer.
    pub fn run(&self, args: &[&str]) -> Output {
        let signer = format!("sh {}", manifest_dir().join("tests/mock-signer.sh").display());
        Command::new(env!("CARGO_BIN_EXE_themis-contract"))
            .arg("--profile")
            .arg(self.path().join("profile"))
            .arg("--signer")
            .arg(signer)
            .args(args)
            .current_dir(self.path())
            .env_remove("THEMIS_LOG")
            .env_remove("RUST_LOG")
            .output()
            .expect("run themis-contract")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

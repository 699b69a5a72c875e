//! CLI argument parsing.
use crate::template::TemplateFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "themis-contract",
    version,
    about = "Versionable contracts with pinned templates and detached signatures",
    after_help = "Examples:\n  themis-contract new --template git://github.com:acme/templates.git/nda.html#v1 contract.toml\n  themis-contract check contract.toml\n  themis-contract sign contract.toml --counterparty client --signatory alice\n  themis-contract verify contract.toml\n  themis-contract parse-location --json git+ssh://git@github.com:2222:acme/t.git/nda.md#main",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Profile directory (template cache, repository mirrors, config.json)
    #[arg(long, global = true, value_name = "DIR")]
    pub profile: Option<PathBuf>,

    /// Log at debug level to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Repository tool command (default: git)
    #[arg(long = "git", global = true, value_name = "COMMAND")]
    pub git_command: Option<String>,

    /// Signing service command (default: keybase)
    #[arg(long = "signer", global = true, value_name = "COMMAND")]
    pub signer_command: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    ParseLocation(ParseLocationArgs),
    Hash(HashArgs),
    Fetch(FetchArgs),
    Vars(VarsArgs),
    New(NewArgs),
    Check(CheckArgs),
    Sign(SignArgs),
    Verify(VerifyArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Parse a repository location and show its parts")]
pub struct ParseLocationArgs {
    pub location: String,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Print the content hash of a file")]
pub struct HashArgs {
    pub file: PathBuf,
}

/// Template selection shared by `fetch`, `vars` and `new`.
#[derive(Args, Debug, Clone)]
pub struct TemplateArgs {
    /// Template syntax
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<TemplateFormat>,

    /// Custom tag delimiters
    #[arg(long, num_args = 2, value_names = ["OPEN", "CLOSE"])]
    pub delimiters: Option<Vec<String>>,

    /// Ignore cached copies and fetch again
    #[arg(long)]
    pub refresh: bool,
}

impl TemplateArgs {
    pub fn delimiter_pair(&self) -> Option<(String, String)> {
        match self.delimiters.as_deref() {
            Some([open, close]) => Some((open.clone(), close.clone())),
            _ => None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Resolve a template into the cache and print its hash")]
pub struct FetchArgs {
    /// Local path, URL, or repository location
    pub source: String,

    /// Fail unless the content hashes to this value
    #[arg(long, value_name = "HASH")]
    pub expect_hash: Option<String>,

    #[command(flatten)]
    pub template: TemplateArgs,
}

#[derive(Parser, Debug)]
#[command(about = "List the variables a template references")]
pub struct VarsArgs {
    /// Local path, URL, or repository location
    pub source: String,

    #[command(flatten)]
    pub template: TemplateArgs,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Create a contract that pins a template")]
pub struct NewArgs {
    /// Local path, URL, or repository location of the template
    #[arg(long = "template", value_name = "SOURCE")]
    pub source: String,

    /// Contract file to write
    pub out: PathBuf,

    /// Overwrite an existing contract
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub template: TemplateArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Load a contract, verify its template pin and print its hash")]
pub struct CheckArgs {
    pub contract: PathBuf,

    /// Ignore cached templates and fetch again
    #[arg(long)]
    pub refresh: bool,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Sign a contract on behalf of one signatory")]
pub struct SignArgs {
    pub contract: PathBuf,

    #[arg(long, value_name = "ID")]
    pub counterparty: String,

    #[arg(long, value_name = "ID")]
    pub signatory: String,

    /// Signing key (default: profile signing_key_id, then the service default)
    #[arg(long, value_name = "KEY")]
    pub key_id: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Verify every signatory's detached signature")]
pub struct VerifyArgs {
    pub contract: PathBuf,
}

use crate::cli::{
    CheckArgs, FetchArgs, GlobalArgs, HashArgs, NewArgs, ParseLocationArgs, SignArgs,
    TemplateArgs, VarsArgs, VerifyArgs,
};
use crate::contract::{self, Contract, ContractLoadOptions};
use crate::integrity::{content_hash, HASH_FORMAT_VERSION};
use crate::location::{LocationForm, LocationUrl};
use crate::profile::{Overrides, Profile};
use crate::signing::{sign_contract, verify_contract};
use crate::template::{LoadOptions, Template, TemplateResolver};
use crate::util::display_path;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub fn load_profile(global: &GlobalArgs) -> Result<Profile> {
    Profile::resolve(Overrides {
        profile: global.profile.clone(),
        git_command: global.git_command.clone(),
        signer_command: global.signer_command.clone(),
    })
}

#[derive(Serialize)]
struct LocationReport<'a> {
    form: &'static str,
    protocol_stack: &'a [String],
    protocol: &'a str,
    user: &'a str,
    password_set: bool,
    host: &'a str,
    port: &'a str,
    path: &'a str,
    reference: &'a str,
    repository: bool,
    repository_identity: String,
    inner_path: &'a str,
    clone_url: String,
}

pub fn run_parse_location(args: ParseLocationArgs) -> Result<()> {
    let location = LocationUrl::parse(&args.location)?;
    let report = LocationReport {
        form: match location.form() {
            LocationForm::Ssh => "ssh",
            LocationForm::Https => "https",
        },
        protocol_stack: location.protocol_stack(),
        protocol: location.protocol(),
        user: location.user(),
        password_set: !location.password().is_empty(),
        host: location.host(),
        port: location.port(),
        path: location.path(),
        reference: location.reference(),
        repository: location.is_repository(),
        repository_identity: location.repository_identity(),
        inner_path: location.inner_path(),
        clone_url: location.clone_url(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("location: {location}");
    println!("form: {}", report.form);
    println!("protocol stack: {}", report.protocol_stack.join("+"));
    println!("user: {}", report.user);
    println!("host: {}", report.host);
    println!("port: {}", report.port);
    println!("path: {}", report.path);
    println!("ref: {}", report.reference);
    println!("repository identity: {}", report.repository_identity);
    println!("inner path: {}", report.inner_path);
    println!("clone url: {}", report.clone_url);
    Ok(())
}

pub fn run_hash(args: HashArgs) -> Result<()> {
    let bytes = fs::read(&args.file).with_context(|| format!("read {}", args.file.display()))?;
    println!("{}  {}", content_hash(&bytes), args.file.display());
    Ok(())
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("resolve current directory")
}

fn load_template(
    resolver: &mut TemplateResolver,
    source: &str,
    template: &TemplateArgs,
    expected_hash: Option<String>,
) -> Result<Template> {
    let mut options = LoadOptions::new(current_dir()?);
    options.expected_content_hash = expected_hash;
    options.format = template.format;
    options.delimiters = template.delimiter_pair();
    options.refresh = template.refresh;
    resolver
        .load(source, &options)
        .with_context(|| format!("load template {source}"))
}

pub fn run_fetch(global: &GlobalArgs, args: FetchArgs) -> Result<()> {
    let profile = load_profile(global)?;
    let mut resolver = profile.resolver()?;
    let was_cached = resolver.cache().is_some_and(|cache| cache.has(&args.source));
    let template = load_template(
        &mut resolver,
        &args.source,
        &args.template,
        args.expect_hash,
    )?;
    println!("{}  {}", template.content_hash, template.source);
    println!(
        "format: {}  extension: {}",
        template.format,
        template.extension.as_deref().unwrap_or("-")
    );
    if args.source.contains("://") {
        if let Some(cache) = resolver.cache() {
            let origin = if was_cached && !args.template.refresh {
                "cache hit"
            } else {
                "fetched"
            };
            println!(
                "{origin} ({} cached sources in {})",
                cache.entry_count(),
                cache.base_path().display()
            );
        }
    }
    Ok(())
}

pub fn run_vars(global: &GlobalArgs, args: VarsArgs) -> Result<()> {
    let mut resolver = load_profile(global)?.resolver()?;
    let template = load_template(&mut resolver, &args.source, &args.template, None)?;
    let vars = template.variables();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&vars)?);
    } else {
        print!("{}", vars.render_outline());
    }
    Ok(())
}

pub fn run_new(global: &GlobalArgs, args: NewArgs) -> Result<()> {
    let mut resolver = load_profile(global)?.resolver()?;
    let template = load_template(&mut resolver, &args.source, &args.template, None)?;
    let template = relative_to_contract(template, &args.out)?;
    contract::scaffold(&template, &args.out, args.force)
        .with_context(|| format!("write {}", args.out.display()))?;
    println!("wrote {}", args.out.display());
    Ok(())
}

/// Local template paths were resolved against the working directory; the
/// contract must record them relative to its own directory instead.
fn relative_to_contract(mut template: Template, out: &Path) -> Result<Template> {
    if template.source.contains("://") {
        return Ok(template);
    }
    let cwd = current_dir()?;
    let absolute = cwd.join(&template.source);
    let contract_dir = out
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(|parent| cwd.join(parent))
        .unwrap_or_else(|| cwd.clone());
    let absolute = absolute.canonicalize().unwrap_or(absolute);
    let contract_dir = contract_dir.canonicalize().unwrap_or(contract_dir);
    template.source = match absolute.strip_prefix(&contract_dir) {
        Ok(relative) => format!("./{}", relative.display()),
        Err(_) => absolute.display().to_string(),
    };
    Ok(template)
}

#[derive(Serialize)]
struct CheckReport<'a> {
    contract: String,
    contract_hash: &'a str,
    hash_format_version: u32,
    template_source: &'a str,
    template_hash: &'a str,
    counterparties: Vec<&'a str>,
    params: Vec<&'a str>,
}

pub fn run_check(global: &GlobalArgs, args: CheckArgs) -> Result<()> {
    let profile = load_profile(global)?;
    let mut resolver = profile.resolver()?;
    let contract = Contract::load(
        &args.contract,
        &mut resolver,
        ContractLoadOptions {
            refresh: args.refresh,
        },
    )
    .with_context(|| format!("load contract {}", args.contract.display()))?;
    let report = CheckReport {
        contract: display_path(contract.filename(), current_dir().ok().as_deref()),
        contract_hash: contract.contract_hash().unwrap_or_default(),
        hash_format_version: HASH_FORMAT_VERSION,
        template_source: &contract.template().source,
        template_hash: &contract.template().content_hash,
        counterparties: contract.counterparties().keys().map(String::as_str).collect(),
        params: contract
            .params()
            .keys()
            .map(String::as_str)
            .filter(|key| {
                !contract.counterparties().contains_key(*key) && !is_signatory(&contract, key)
            })
            .collect(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("contract: {}", report.contract);
        println!("contract hash: {}", report.contract_hash);
        println!(
            "template: {} ({})",
            report.template_source, report.template_hash
        );
        println!("counterparties: {}", report.counterparties.join(", "));
        println!("params: {}", report.params.join(", "));
    }
    Ok(())
}

fn is_signatory(contract: &Contract, key: &str) -> bool {
    contract
        .signing_pairs()
        .any(|(_, signatory)| signatory.id == key)
}

pub fn run_sign(global: &GlobalArgs, args: SignArgs) -> Result<()> {
    let profile = load_profile(global)?;
    let mut resolver = profile.resolver()?;
    let gateway = profile.signing_gateway()?;
    let mut contract = Contract::load(&args.contract, &mut resolver, ContractLoadOptions::default())
        .with_context(|| format!("load contract {}", args.contract.display()))?;
    let key_id = profile.signing_key_id(args.key_id.as_deref());
    let record = sign_contract(
        &mut contract,
        &gateway,
        &args.counterparty,
        &args.signatory,
        key_id.as_deref(),
    )
    .with_context(|| {
        format!(
            "sign {} as {}/{}",
            args.contract.display(),
            args.counterparty,
            args.signatory
        )
    })?;
    println!("wrote {}", record.filename.display());
    Ok(())
}

pub fn run_verify(global: &GlobalArgs, args: VerifyArgs) -> Result<()> {
    let profile = load_profile(global)?;
    let mut resolver = profile.resolver()?;
    let gateway = profile.signing_gateway()?;
    let mut contract = Contract::load(&args.contract, &mut resolver, ContractLoadOptions::default())
        .with_context(|| format!("load contract {}", args.contract.display()))?;
    let records = verify_contract(&mut contract, &gateway)?;
    for record in &records {
        println!(
            "ok {}/{} ({})",
            record.counterparty_id,
            record.signatory_id,
            record.expected_signer_identity.as_deref().unwrap_or("")
        );
    }
    println!("verified {} signature(s)", records.len());
    Ok(())
}

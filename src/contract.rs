//! Contract records.
//!
//! A contract is a TOML file naming its template (with a pinned content
//! hash), its counterparties and their signatories. Every other top-level key
//! is a free parameter for rendering.
use crate::error::{Error, Result};
use crate::integrity::content_hash;
use crate::template::{LoadOptions, Template, TemplateFormat, TemplateResolver, VariableTree};
use crate::util::write_atomic;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use toml::{Table, Value};

const TEMPLATE_KEY: &str = "template";
const COUNTERPARTIES_KEY: &str = "counterparties";

/// Separator between counterparty and signatory ids in signature filenames.
pub const SIGNATURE_ID_SEPARATOR: &str = "__";
pub const SIGNATURE_EXTENSION: &str = "sig";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub source: String,
    pub format: TemplateFormat,
    pub hash: String,
    pub delimiters: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signatory {
    pub id: String,
    pub full_names: String,
    /// Identity the signing service must report for this signatory.
    pub signer_identity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterparty {
    pub id: String,
    pub full_name: String,
    pub signatories: Vec<Signatory>,
}

impl Counterparty {
    pub fn signatory(&self, id: &str) -> Option<&Signatory> {
        self.signatories.iter().find(|signatory| signatory.id == id)
    }
}

/// Parsed contract file without its template.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractRecord {
    pub template: TemplateRef,
    pub counterparties: BTreeMap<String, Counterparty>,
    pub params: Table,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContractLoadOptions {
    pub refresh: bool,
}

#[derive(Debug, Clone)]
pub struct Contract {
    filename: PathBuf,
    raw_bytes: Vec<u8>,
    record: ContractRecord,
    template: Template,
    contract_hash: Option<String>,
}

impl Contract {
    /// Read, parse and resolve a contract. The template is loaded relative to
    /// the contract's directory and must match the pinned hash.
    pub fn load(
        path: &Path,
        resolver: &mut TemplateResolver,
        options: ContractLoadOptions,
    ) -> Result<Self> {
        let raw_bytes = fs::read(path).map_err(|err| Error::io("read contract", path, err))?;
        let text = std::str::from_utf8(&raw_bytes).map_err(|err| {
            Error::contract_format(format!("{} is not valid UTF-8: {err}", path.display()))
        })?;
        let record = parse_record(text)?;

        let mut load = LoadOptions::new(contract_dir(path));
        load.expected_content_hash = Some(record.template.hash.clone());
        load.format = Some(record.template.format);
        load.delimiters = record.template.delimiters.clone();
        load.refresh = options.refresh;
        let template = resolver.load(&record.template.source, &load)?;

        let mut contract = Self {
            filename: path.to_path_buf(),
            raw_bytes,
            record,
            template,
            contract_hash: None,
        };
        let hash = contract.compute_hash().to_string();
        tracing::info!(
            contract = %path.display(),
            hash = %hash,
            template = %contract.template.source,
            "contract loaded"
        );
        Ok(contract)
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    /// Replace the raw record bytes. The contract hash must be recomputed.
    pub fn set_raw_bytes(&mut self, raw_bytes: Vec<u8>) {
        self.raw_bytes = raw_bytes;
        self.contract_hash = None;
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn counterparties(&self) -> &BTreeMap<String, Counterparty> {
        &self.record.counterparties
    }

    pub fn params(&self) -> &Table {
        &self.record.params
    }

    /// Hash of the raw record bytes only; the template is pinned separately.
    pub fn compute_hash(&mut self) -> &str {
        self.contract_hash
            .get_or_insert_with(|| content_hash(&self.raw_bytes))
    }

    pub fn contract_hash(&self) -> Option<&str> {
        self.contract_hash.as_deref()
    }

    pub fn directory(&self) -> PathBuf {
        contract_dir(&self.filename)
    }

    /// Every (counterparty, signatory) pair in counterparty id order.
    pub fn signing_pairs(&self) -> impl Iterator<Item = (&Counterparty, &Signatory)> {
        self.record.counterparties.values().flat_map(|counterparty| {
            counterparty
                .signatories
                .iter()
                .map(move |signatory| (counterparty, signatory))
        })
    }

    pub fn find_signatory(
        &self,
        counterparty_id: &str,
        signatory_id: &str,
    ) -> Result<(&Counterparty, &Signatory)> {
        let counterparty = self
            .record
            .counterparties
            .get(counterparty_id)
            .ok_or_else(|| {
                Error::contract_format(format!("unknown counterparty {counterparty_id:?}"))
            })?;
        let signatory = counterparty.signatory(signatory_id).ok_or_else(|| {
            Error::contract_format(format!(
                "counterparty {counterparty_id:?} has no signatory {signatory_id:?}"
            ))
        })?;
        Ok((counterparty, signatory))
    }

    /// Detached signature path for a signatory, beside the contract file.
    pub fn signature_path(&self, counterparty_id: &str, signatory_id: &str) -> PathBuf {
        self.directory()
            .join(signature_filename(counterparty_id, signatory_id))
    }
}

pub fn signature_filename(counterparty_id: &str, signatory_id: &str) -> String {
    format!("{counterparty_id}{SIGNATURE_ID_SEPARATOR}{signatory_id}.{SIGNATURE_EXTENSION}")
}

fn contract_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Counterparty and signatory ids: a letter or underscore followed by
/// letters, digits and underscores.
pub fn is_valid_id(id: &str) -> bool {
    static ID_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    ID_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(id))
}

pub fn parse_record(text: &str) -> Result<ContractRecord> {
    let mut table: Table = toml::from_str(text)?;
    let template = parse_template_ref(&mut table)?;
    let ids = match table.remove(COUNTERPARTIES_KEY) {
        Some(value) => string_array(&value, COUNTERPARTIES_KEY)?,
        None => Vec::new(),
    };

    let mut counterparties = BTreeMap::new();
    for id in ids {
        if !is_valid_id(&id) {
            return Err(Error::contract_format(format!(
                "invalid counterparty id {id:?}"
            )));
        }
        if counterparties.contains_key(&id) {
            return Err(Error::contract_format(format!(
                "duplicate counterparty id {id:?}"
            )));
        }
        let counterparty = parse_counterparty(&table, &id)?;
        counterparties.insert(id, counterparty);
    }
    Ok(ContractRecord {
        template,
        counterparties,
        params: table,
    })
}

fn parse_template_ref(table: &mut Table) -> Result<TemplateRef> {
    let section = match table.remove(TEMPLATE_KEY) {
        Some(Value::Table(section)) => section,
        Some(_) => return Err(Error::contract_format("`template` must be a table")),
        None => return Err(Error::contract_format("missing `[template]` section")),
    };
    let source = required_str(&section, "source", TEMPLATE_KEY)?.to_string();
    let hash = required_str(&section, "hash", TEMPLATE_KEY)?.to_string();
    let format = match section.get("format") {
        None => TemplateFormat::default(),
        Some(Value::String(format)) => format
            .parse()
            .map_err(|err: String| Error::contract_format(format!("template.format: {err}")))?,
        Some(_) => return Err(Error::contract_format("template.format must be a string")),
    };
    let delimiters = match section.get("delimiters") {
        None => None,
        Some(value) => match string_array(value, "template.delimiters")?.as_slice() {
            [open, close] if !open.is_empty() && !close.is_empty() => {
                Some((open.clone(), close.clone()))
            }
            _ => {
                return Err(Error::contract_format(
                    "template.delimiters must be a pair of non-empty strings",
                ))
            }
        },
    };
    Ok(TemplateRef {
        source,
        format,
        hash,
        delimiters,
    })
}

fn parse_counterparty(table: &Table, id: &str) -> Result<Counterparty> {
    let counterparty_section = section(table, id, "counterparty")?;
    let full_name = required_str(counterparty_section, "full_name", id)?.to_string();
    let signatory_ids = match counterparty_section.get("signatories") {
        Some(value) => string_array(value, &format!("{id}.signatories"))?,
        None => Vec::new(),
    };
    if signatory_ids.is_empty() {
        return Err(Error::contract_format(format!(
            "counterparty {id:?} has no signatories"
        )));
    }
    let mut signatories: Vec<Signatory> = Vec::with_capacity(signatory_ids.len());
    for signatory_id in signatory_ids {
        if !is_valid_id(&signatory_id) {
            return Err(Error::contract_format(format!(
                "invalid signatory id {signatory_id:?} for counterparty {id:?}"
            )));
        }
        if signatories.iter().any(|existing| existing.id == signatory_id) {
            return Err(Error::contract_format(format!(
                "duplicate signatory {signatory_id:?} for counterparty {id:?}"
            )));
        }
        let entry = section(table, &signatory_id, "signatory")?;
        let signer_identity = match entry.get("keybase_id") {
            None => None,
            Some(Value::String(identity)) if identity.trim().is_empty() => None,
            Some(Value::String(identity)) => Some(identity.trim().to_string()),
            Some(_) => {
                return Err(Error::contract_format(format!(
                    "{signatory_id}.keybase_id must be a string"
                )))
            }
        };
        signatories.push(Signatory {
            full_names: required_str(entry, "full_names", &signatory_id)?.to_string(),
            id: signatory_id,
            signer_identity,
        });
    }
    Ok(Counterparty {
        id: id.to_string(),
        full_name,
        signatories,
    })
}

fn section<'a>(table: &'a Table, id: &str, kind: &str) -> Result<&'a Table> {
    match table.get(id) {
        Some(Value::Table(section)) => Ok(section),
        Some(_) => Err(Error::contract_format(format!(
            "{kind} {id:?} must be a table"
        ))),
        None => Err(Error::contract_format(format!(
            "missing section for {kind} {id:?}"
        ))),
    }
}

fn required_str<'a>(table: &'a Table, key: &str, context: &str) -> Result<&'a str> {
    match table.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value),
        Some(Value::String(_)) => Err(Error::contract_format(format!(
            "{context}.{key} must not be empty"
        ))),
        Some(_) => Err(Error::contract_format(format!(
            "{context}.{key} must be a string"
        ))),
        None => Err(Error::contract_format(format!(
            "missing field {context}.{key}"
        ))),
    }
}

fn string_array(value: &Value, context: &str) -> Result<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(Error::contract_format(format!(
            "{context} must be an array of strings"
        )));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(text) => Ok(text.clone()),
            _ => Err(Error::contract_format(format!(
                "{context} must contain only strings"
            ))),
        })
        .collect()
}

/// Write a new contract that pins `template` and stubs out every variable it
/// references. Refuses to overwrite unless `force` is set.
pub fn scaffold(template: &Template, out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        return Err(Error::contract_format(format!(
            "{} already exists (use --force to overwrite)",
            out.display()
        )));
    }
    let text = scaffold_text(template)?;
    write_atomic(out, text.as_bytes())?;
    tracing::info!(
        contract = %out.display(),
        template = %template.source,
        hash = %template.content_hash,
        "scaffolded contract"
    );
    Ok(())
}

pub fn scaffold_text(template: &Template) -> Result<String> {
    let vars = template.variables();
    for name in reserved_variables(&vars) {
        tracing::warn!(
            variable = name,
            template = %template.source,
            "template variable collides with a reserved contract key, no stub written"
        );
    }
    let mut table = Table::new();
    stub_variables(&vars, &mut table);
    table.remove(TEMPLATE_KEY);
    table.insert(COUNTERPARTIES_KEY.to_string(), Value::Array(Vec::new()));

    let mut pin = Table::new();
    pin.insert("source".to_string(), Value::String(template.source.clone()));
    pin.insert(
        "format".to_string(),
        Value::String(template.format.as_str().to_string()),
    );
    pin.insert(
        "hash".to_string(),
        Value::String(template.content_hash.clone()),
    );
    if let Some((open, close)) = &template.custom_delimiters {
        pin.insert(
            "delimiters".to_string(),
            Value::Array(vec![Value::String(open.clone()), Value::String(close.clone())]),
        );
    }
    table.insert(TEMPLATE_KEY.to_string(), Value::Table(pin));
    toml::to_string(&table)
        .map_err(|err| Error::contract_format(format!("serialize contract: {err}")))
}

/// Top-level variables whose names the contract record reserves.
pub fn reserved_variables(vars: &VariableTree) -> Vec<&str> {
    vars.iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| *name == TEMPLATE_KEY || *name == COUNTERPARTIES_KEY)
        .collect()
}

fn stub_variables(vars: &VariableTree, table: &mut Table) {
    for (name, children) in vars.iter() {
        if children.is_empty() {
            table.insert(name.clone(), Value::String(String::new()));
        } else {
            let mut nested = Table::new();
            stub_variables(children, &mut nested);
            table.insert(name.clone(), Value::Table(nested));
        }
    }
}

#[cfg(test)]
#[path = "contract_tests.rs"]
mod tests;

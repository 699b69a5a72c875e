//! Static variable extraction from template syntax.
//!
//! Templates are scanned tag by tag; nothing is rendered. Section and block
//! tags open scopes so variables referenced inside them nest under the
//! section name, which is how a contract author sees them in the scaffold.
use super::TemplateFormat;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_OPEN: &str = "{{";
pub const DEFAULT_CLOSE: &str = "}}";

/// Ordered tree of variable names. Leaves are plain values; inner nodes are
/// sections, iterated lists or dotted paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VariableTree(BTreeMap<String, VariableTree>);

impl VariableTree {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableTree)> {
        self.0.iter()
    }

    fn track(&mut self, path: &[String]) {
        let mut node = self;
        for segment in path {
            node = node.0.entry(segment.clone()).or_default();
        }
    }

    /// Indented listing, one name per line.
    pub fn render_outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(0, &mut out);
        out
    }

    fn write_outline(&self, depth: usize, out: &mut String) {
        for (name, child) in &self.0 {
            out.push_str(&"  ".repeat(depth));
            out.push_str(name);
            out.push('\n');
            child.write_outline(depth + 1, out);
        }
    }
}

/// Collect every variable referenced by `content`.
///
/// Extraction is total: unknown or unbalanced tags are skipped rather than
/// reported, since the renderer is the authority on template validity.
pub fn extract_variables(
    content: &str,
    format: TemplateFormat,
    delimiters: Option<(&str, &str)>,
) -> VariableTree {
    let (open, close) = delimiters.unwrap_or((DEFAULT_OPEN, DEFAULT_CLOSE));
    let mut tree = VariableTree::default();
    match format {
        TemplateFormat::Mustache => MustacheWalker::default().walk(content, open, close, &mut tree),
        TemplateFormat::Handlebars => {
            HandlebarsWalker::default().walk(content, open, close, &mut tree)
        }
    }
    tracing::debug!(variables = tree.len(), %format, "extracted template variables");
    tree
}

struct Tag<'a> {
    triple: bool,
    body: &'a str,
    end: usize,
}

fn tag_pattern(open: &str, close: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"(?s){}(\{{)?(.*?)\}}?{}",
        regex::escape(open),
        regex::escape(close)
    ))
    .ok()
}

fn next_tag<'a>(pattern: &Regex, content: &'a str, from: usize) -> Option<Tag<'a>> {
    let caps = pattern.captures_at(content, from)?;
    let whole = caps.get(0)?;
    Some(Tag {
        triple: caps.get(1).is_some(),
        body: caps.get(2).map_or("", |m| m.as_str()).trim(),
        end: whole.end(),
    })
}

fn split_sigil(body: &str) -> (Option<char>, &str) {
    match body.chars().next() {
        Some(c @ ('#' | '^' | '/' | '!' | '>' | '&' | '=')) => (Some(c), body[1..].trim()),
        _ => (None, body),
    }
}

fn dotted(name: &str) -> Vec<String> {
    name.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Default)]
struct MustacheWalker {
    sections: Vec<Vec<String>>,
}

impl MustacheWalker {
    fn walk(&mut self, content: &str, open: &str, close: &str, tree: &mut VariableTree) {
        let Some(mut pattern) = tag_pattern(open, close) else {
            return;
        };
        let mut pos = 0;
        while let Some(tag) = next_tag(&pattern, content, pos) {
            pos = tag.end;
            if tag.triple {
                self.record(tag.body, tree);
                continue;
            }
            match split_sigil(tag.body) {
                (Some('!' | '>'), _) => {}
                (Some('='), rest) => {
                    let pair = rest.strip_suffix('=').unwrap_or(rest);
                    let mut parts = pair.split_whitespace();
                    if let (Some(new_open), Some(new_close)) = (parts.next(), parts.next()) {
                        match tag_pattern(new_open, new_close) {
                            Some(next) => pattern = next,
                            None => return,
                        }
                    }
                }
                (Some('#' | '^'), name) => {
                    let path = self.record(name, tree);
                    self.sections.push(path);
                }
                (Some('/'), name) => {
                    let closing = dotted(name);
                    if let Some(index) = self
                        .sections
                        .iter()
                        .rposition(|section| section.ends_with(&closing))
                    {
                        self.sections.truncate(index);
                    }
                }
                (_, name) => {
                    self.record(name, tree);
                }
            }
        }
    }

    fn record(&self, name: &str, tree: &mut VariableTree) -> Vec<String> {
        if name == "." {
            return self.sections.last().cloned().unwrap_or_default();
        }
        let mut path = self.sections.last().cloned().unwrap_or_default();
        path.extend(dotted(name));
        tree.track(&path);
        path
    }
}

/// One open handlebars block. `context` is set when the block changes the
/// lookup context (`each`, `with`).
struct Block {
    helper: String,
    context: Option<Vec<String>>,
}

#[derive(Default)]
struct HandlebarsWalker {
    blocks: Vec<Block>,
}

impl HandlebarsWalker {
    fn walk(&mut self, content: &str, open: &str, close: &str, tree: &mut VariableTree) {
        let Some(pattern) = tag_pattern(open, close) else {
            return;
        };
        let mut pos = 0;
        while let Some(tag) = next_tag(&pattern, content, pos) {
            pos = tag.end;
            if tag.triple {
                self.record_expression(tag.body, tree);
                continue;
            }
            let body = tag.body.trim_start_matches('~').trim_end_matches('~').trim();
            match split_sigil(body) {
                (Some('!' | '>' | '='), _) => {}
                (Some('#'), rest) => self.open_block(rest, tree),
                (Some('^'), rest) => {
                    // `{{^name}}` is an inverse block; `{{^}}` is an else.
                    if !rest.is_empty() {
                        self.open_block(rest, tree);
                    }
                }
                (Some('/'), name) => {
                    if let Some(index) = self.blocks.iter().rposition(|block| block.helper == name)
                    {
                        self.blocks.truncate(index);
                    }
                }
                (_, rest) => {
                    match rest.strip_prefix("else") {
                        Some("") => {}
                        Some(chain) if chain.starts_with(' ') => {
                            self.record_expression(chain.trim(), tree)
                        }
                        _ => self.record_expression(rest, tree),
                    }
                }
            }
        }
    }

    fn open_block(&mut self, expression: &str, tree: &mut VariableTree) {
        let mut words = expression.split_whitespace();
        let Some(helper) = words.next() else {
            return;
        };
        let args: Vec<&str> = words.take_while(|word| *word != "as").collect();
        let context = match helper {
            "each" | "with" => args.first().and_then(|arg| self.record_path(arg, tree)),
            "if" | "unless" => {
                for arg in &args {
                    self.record_path(arg, tree);
                }
                None
            }
            _ if args.is_empty() => self.record_path(helper, tree),
            _ => {
                for arg in &args {
                    self.record_argument(arg, tree);
                }
                None
            }
        };
        self.blocks.push(Block {
            helper: helper.to_string(),
            context,
        });
    }

    fn record_expression(&self, expression: &str, tree: &mut VariableTree) {
        let words: Vec<&str> = expression.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            [single] => {
                self.record_path(single, tree);
            }
            [_helper, args @ ..] => {
                for arg in args {
                    self.record_argument(arg, tree);
                }
            }
        }
    }

    fn record_argument(&self, arg: &str, tree: &mut VariableTree) {
        let value = arg.split_once('=').map_or(arg, |(_, value)| value);
        self.record_path(value, tree);
    }

    fn record_path(&self, raw: &str, tree: &mut VariableTree) -> Option<Vec<String>> {
        let raw = raw.trim_matches(|c| c == '(' || c == ')');
        if is_literal(raw) || raw.starts_with('@') {
            return None;
        }
        let mut contexts: Vec<&Vec<String>> = self
            .blocks
            .iter()
            .filter_map(|block| block.context.as_ref())
            .collect();
        let mut rest = raw;
        while let Some(stripped) = rest.strip_prefix("../") {
            contexts.pop();
            rest = stripped;
        }
        let rest = rest
            .strip_prefix("this.")
            .or_else(|| rest.strip_prefix("this/"))
            .or_else(|| rest.strip_prefix("./"))
            .unwrap_or(rest);
        if rest == "this" || rest == "." || rest == ".." {
            return None;
        }
        let mut path = contexts.last().map(|ctx| (*ctx).clone()).unwrap_or_default();
        path.extend(
            rest.split(['.', '/'])
                .filter(|segment| !segment.is_empty())
                .map(str::to_string),
        );
        if path.is_empty() {
            return None;
        }
        tree.track(&path);
        Some(path)
    }
}

fn is_literal(word: &str) -> bool {
    word.is_empty()
        || word.starts_with('"')
        || word.starts_with('\'')
        || word.starts_with(|c: char| c.is_ascii_digit() || c == '-')
        || matches!(word, "true" | "false" | "null" | "undefined")
}

#[cfg(test)]
#[path = "vars_tests.rs"]
mod tests;

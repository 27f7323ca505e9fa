//! Shell-style variable substitution over raw definition text.
//!
//! Supports `$NAME`, `${NAME}` and the common parameter expansions:
//! defaults (`${NAME:-x}`, `${NAME-x}`, `${NAME:=x}`, `${NAME=x}`),
//! alternates (`${NAME:+x}`, `${NAME+x}`), length (`${#NAME}`), case
//! conversion (`^`, `^^`, `,`, `,,`), substrings (`${NAME:off:len}`),
//! literal prefix/suffix removal (`#`, `##`, `%`, `%%`) and replacement
//! (`/old/new`, `//old/new`). `$$` produces a literal `$`.
//!
//! Unresolved variables expand to the empty string.

use kestrel_core::{Error, Result};
use std::collections::BTreeMap;

/// A parsed template, ready to be executed against a variable lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(Substitution),
}

#[derive(Debug, Clone, PartialEq)]
struct Substitution {
    name: String,
    op: Op,
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Plain,
    Length,
    Default { value: Template, on_empty: bool },
    Alternate { value: Template, on_empty: bool },
    UpperFirst,
    UpperAll,
    LowerFirst,
    LowerAll,
    Substring { offset: i64, length: Option<i64> },
    TrimPrefix(String),
    TrimSuffix(String),
    Replace { old: String, new: String, all: bool },
}

impl Template {
    /// Parse template text. Fails on unclosed or malformed substitutions.
    pub fn parse(input: &str) -> Result<Self> {
        Ok(Self {
            nodes: parse_nodes(input)?,
        })
    }

    /// Render the template, resolving variables through `lookup`.
    pub fn execute<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        self.render(&lookup)
    }

    /// Render the template against a variable map.
    pub fn execute_map(&self, vars: &BTreeMap<String, String>) -> String {
        self.execute(|name| vars.get(name).cloned())
    }

    fn render(&self, lookup: &dyn Fn(&str) -> Option<String>) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Var(sub) => out.push_str(&sub.render(lookup)),
            }
        }
        out
    }
}

impl Substitution {
    fn render(&self, lookup: &dyn Fn(&str) -> Option<String>) -> String {
        let value = lookup(&self.name);
        let current = value.clone().unwrap_or_default();

        match &self.op {
            Op::Plain => current,
            Op::Length => current.chars().count().to_string(),
            Op::Default { value: fallback, on_empty } => match value {
                Some(v) if !(*on_empty && v.is_empty()) => v,
                _ => fallback.render(lookup),
            },
            Op::Alternate { value: alt, on_empty } => match value {
                Some(v) if !(*on_empty && v.is_empty()) => alt.render(lookup),
                _ => String::new(),
            },
            Op::UpperFirst => map_first(&current, |c| c.to_uppercase().collect()),
            Op::UpperAll => current.to_uppercase(),
            Op::LowerFirst => map_first(&current, |c| c.to_lowercase().collect()),
            Op::LowerAll => current.to_lowercase(),
            Op::Substring { offset, length } => substring(&current, *offset, *length),
            Op::TrimPrefix(pattern) => current
                .strip_prefix(pattern.as_str())
                .map(str::to_string)
                .unwrap_or(current),
            Op::TrimSuffix(pattern) => current
                .strip_suffix(pattern.as_str())
                .map(str::to_string)
                .unwrap_or(current),
            Op::Replace { old, new, all } => {
                if old.is_empty() {
                    current
                } else if *all {
                    current.replace(old.as_str(), new)
                } else {
                    current.replacen(old.as_str(), new, 1)
                }
            }
        }
    }
}

fn map_first(value: &str, f: impl Fn(char) -> String) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => f(first) + chars.as_str(),
        None => String::new(),
    }
}

fn substring(value: &str, offset: i64, length: Option<i64>) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len() as i64;
    let start = if offset < 0 {
        len.saturating_add(offset).max(0)
    } else {
        offset.min(len)
    };
    let end = match length {
        None => len,
        Some(l) if l >= 0 => start.saturating_add(l).min(len),
        Some(l) => len.saturating_add(l).max(start),
    };
    chars[start as usize..end as usize].iter().collect()
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn name_len(input: &str) -> usize {
    input
        .bytes()
        .enumerate()
        .take_while(|&(i, b)| if i == 0 { is_name_start(b) } else { b.is_ascii_alphanumeric() || b == b'_' })
        .count()
}

/// Position of the `}` closing a substitution whose body starts at `from`.
fn closing_brace(input: &str, from: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut depth = 1;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_nodes(input: &str) -> Result<Vec<Node>> {
    let bytes = input.as_bytes();
    let mut nodes = Vec::new();
    let mut text = String::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'$') => {
                text.push_str(&input[start..i]);
                text.push('$');
                i += 2;
                start = i;
            }
            Some(b'{') => {
                let end = closing_brace(input, i + 2).ok_or_else(|| {
                    Error::Template(format!("unclosed substitution at offset {}", i))
                })?;
                text.push_str(&input[start..i]);
                flush_text(&mut nodes, &mut text);
                nodes.push(Node::Var(parse_expression(&input[i + 2..end])?));
                i = end + 1;
                start = i;
            }
            Some(&b) if is_name_start(b) => {
                let len = name_len(&input[i + 1..]);
                text.push_str(&input[start..i]);
                flush_text(&mut nodes, &mut text);
                nodes.push(Node::Var(Substitution {
                    name: input[i + 1..i + 1 + len].to_string(),
                    op: Op::Plain,
                }));
                i += 1 + len;
                start = i;
            }
            _ => i += 1,
        }
    }

    text.push_str(&input[start..]);
    flush_text(&mut nodes, &mut text);
    Ok(nodes)
}

fn flush_text(nodes: &mut Vec<Node>, text: &mut String) {
    if !text.is_empty() {
        nodes.push(Node::Text(std::mem::take(text)));
    }
}

fn bad_substitution(body: &str) -> Error {
    Error::Template(format!("bad substitution: ${{{}}}", body))
}

fn parse_expression(body: &str) -> Result<Substitution> {
    if let Some(name) = body.strip_prefix('#') {
        if !name.is_empty() && name_len(name) == name.len() {
            return Ok(Substitution {
                name: name.to_string(),
                op: Op::Length,
            });
        }
        return Err(bad_substitution(body));
    }

    let len = name_len(body);
    if len == 0 {
        return Err(bad_substitution(body));
    }
    let name = body[..len].to_string();
    let rest = &body[len..];

    let op = if rest.is_empty() {
        Op::Plain
    } else if let Some(v) = rest.strip_prefix(":-").or_else(|| rest.strip_prefix(":=")) {
        Op::Default {
            value: Template::parse(v)?,
            on_empty: true,
        }
    } else if let Some(v) = rest.strip_prefix(":+") {
        Op::Alternate {
            value: Template::parse(v)?,
            on_empty: true,
        }
    } else if let Some(v) = rest.strip_prefix('-').or_else(|| rest.strip_prefix('=')) {
        Op::Default {
            value: Template::parse(v)?,
            on_empty: false,
        }
    } else if let Some(v) = rest.strip_prefix('+') {
        Op::Alternate {
            value: Template::parse(v)?,
            on_empty: false,
        }
    } else if rest == "^^" {
        Op::UpperAll
    } else if rest == "^" {
        Op::UpperFirst
    } else if rest == ",," {
        Op::LowerAll
    } else if rest == "," {
        Op::LowerFirst
    } else if let Some(range) = rest.strip_prefix(':') {
        let (offset, length) = match range.split_once(':') {
            Some((o, l)) => (o, Some(l)),
            None => (range, None),
        };
        let parse_int = |s: &str| s.trim().parse::<i64>().map_err(|_| bad_substitution(body));
        Op::Substring {
            offset: parse_int(offset)?,
            length: length.map(parse_int).transpose()?,
        }
    } else if let Some(p) = rest.strip_prefix("##").or_else(|| rest.strip_prefix('#')) {
        Op::TrimPrefix(p.to_string())
    } else if let Some(p) = rest.strip_prefix("%%").or_else(|| rest.strip_prefix('%')) {
        Op::TrimSuffix(p.to_string())
    } else if let Some(r) = rest.strip_prefix('/') {
        let (all, r) = match r.strip_prefix('/') {
            Some(r) => (true, r),
            None => (false, r),
        };
        let (old, new) = r.split_once('/').unwrap_or((r, ""));
        Op::Replace {
            old: old.to_string(),
            new: new.to_string(),
            all,
        }
    } else {
        return Err(bad_substitution(body));
    };

    Ok(Substitution { name, op })
}

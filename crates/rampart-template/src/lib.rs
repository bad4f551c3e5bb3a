//! Text templates for tool commands and output prefixes.
//!
//! The syntax is a deliberately small subset of the familiar
//! double-curly-brace template form:
//!
//! - `{{ .field }}` — substitute a parameter value
//! - `{{ .field | upper | quote }}` — pipe through pure string helpers
//! - `{{ if .field }} ... {{ else }} ... {{ end }}` — conditional blocks
//!
//! There are no loops and no arbitrary code. Templates are parsed once at
//! handler construction ([`Template::parse`]); syntax errors surface there.
//! Rendering is deterministic and side-effect-free; referencing a field that
//! has no value at render time is a [`RampartError::TemplateRender`] error.
//!
//! Helpers: `upper`, `lower`, `trim`, `quote` (POSIX single-quote escaping),
//! and `default "fallback"` (used instead of erroring when the field is
//! absent or empty).

use std::collections::HashMap;

use rampart_types::{ParamValue, RampartError};

/// A parsed template, ready for repeated rendering.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    /// `{{ .field | helper ... }}`
    Subst { field: String, helpers: Vec<Helper> },
    /// `{{ if .field }} then {{ else }} otherwise {{ end }}`
    Cond {
        field: String,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Helper {
    Upper,
    Lower,
    Trim,
    Quote,
    Default(String),
}

/// A tag found between `{{` and `}}`, after trimming.
enum Tag {
    Subst { field: String, helpers: Vec<Helper> },
    If(String),
    Else,
    End,
}

impl Template {
    /// Parse a template string. Illegal syntax is reported here, not at
    /// render time.
    pub fn parse(source: &str) -> Result<Self, RampartError> {
        let mut tags = scan(source)?;
        let nodes = build_block(&mut tags, source, BlockContext::TopLevel)?;
        Ok(Template {
            source: source.to_string(),
            nodes,
        })
    }

    /// The original template source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render with the given parameter map.
    pub fn render(&self, params: &HashMap<String, ParamValue>) -> Result<String, RampartError> {
        let mut out = String::new();
        render_nodes(&self.nodes, params, &mut out)?;
        Ok(out)
    }
}

/// What kind of block we are currently assembling; governs which closing
/// tags are legal.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockContext {
    TopLevel,
    ThenBranch,
    ElseBranch,
}

/// Raw pieces produced by the scanner, in source order.
enum Piece {
    Text(String),
    Tag(Tag),
}

/// Split the source into literal text and parsed tags.
fn scan(source: &str) -> Result<Vec<Piece>, RampartError> {
    let mut pieces = Vec::new();
    let mut rest = source;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            pieces.push(Piece::Text(rest[..open].to_string()));
        }
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}").ok_or_else(|| {
            RampartError::Compile(format!("template has an unclosed '{{{{' tag: {source:?}"))
        })?;
        let tag_src = after_open[..close].trim();
        pieces.push(Piece::Tag(parse_tag(tag_src)?));
        rest = &after_open[close + 2..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest.to_string()));
    }

    // Reverse so build_block can pop from the back in source order.
    pieces.reverse();
    Ok(pieces)
}

/// Assemble a node list until the block's closing tag (or end of input for
/// the top level).
fn build_block(
    pieces: &mut Vec<Piece>,
    source: &str,
    context: BlockContext,
) -> Result<Vec<Node>, RampartError> {
    let mut nodes = Vec::new();

    while let Some(piece) = pieces.pop() {
        match piece {
            Piece::Text(text) => nodes.push(Node::Text(text)),
            Piece::Tag(Tag::Subst { field, helpers }) => {
                nodes.push(Node::Subst { field, helpers })
            }
            Piece::Tag(Tag::If(field)) => {
                let then = build_block(pieces, source, BlockContext::ThenBranch)?;
                // build_block for the then-branch stops at either else or end;
                // it re-pushes an Else marker so we can see which.
                let otherwise = if matches!(pieces.last(), Some(Piece::Tag(Tag::Else))) {
                    pieces.pop();
                    build_block(pieces, source, BlockContext::ElseBranch)?
                } else {
                    Vec::new()
                };
                nodes.push(Node::Cond {
                    field,
                    then,
                    otherwise,
                });
            }
            Piece::Tag(Tag::Else) => {
                if context != BlockContext::ThenBranch {
                    return Err(RampartError::Compile(format!(
                        "template has '{{{{ else }}}}' outside an if block: {source:?}"
                    )));
                }
                // Leave the marker for the caller to consume.
                pieces.push(Piece::Tag(Tag::Else));
                return Ok(nodes);
            }
            Piece::Tag(Tag::End) => {
                if context == BlockContext::TopLevel {
                    return Err(RampartError::Compile(format!(
                        "template has '{{{{ end }}}}' without an if block: {source:?}"
                    )));
                }
                return Ok(nodes);
            }
        }
    }

    if context != BlockContext::TopLevel {
        return Err(RampartError::Compile(format!(
            "template is missing '{{{{ end }}}}': {source:?}"
        )));
    }
    Ok(nodes)
}

/// Parse the inside of one `{{ ... }}` tag.
fn parse_tag(tag: &str) -> Result<Tag, RampartError> {
    if tag == "else" {
        return Ok(Tag::Else);
    }
    if tag == "end" {
        return Ok(Tag::End);
    }
    if let Some(rest) = tag.strip_prefix("if ") {
        let field = parse_field(rest.trim())?;
        return Ok(Tag::If(field));
    }

    // Substitution with optional helper pipeline.
    let mut segments = tag.split('|').map(str::trim);
    let field = parse_field(segments.next().unwrap_or_default())?;
    let helpers = segments
        .map(parse_helper)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Tag::Subst { field, helpers })
}

/// A field reference is `.name` with an identifier-shaped name.
fn parse_field(raw: &str) -> Result<String, RampartError> {
    let name = raw.strip_prefix('.').ok_or_else(|| {
        RampartError::Compile(format!("template field must start with '.', found {raw:?}"))
    })?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(RampartError::Compile(format!(
            "invalid template field name {name:?}"
        )));
    }
    Ok(name.to_string())
}

fn parse_helper(raw: &str) -> Result<Helper, RampartError> {
    match raw {
        "upper" => Ok(Helper::Upper),
        "lower" => Ok(Helper::Lower),
        "trim" => Ok(Helper::Trim),
        "quote" => Ok(Helper::Quote),
        _ => {
            if let Some(arg) = raw.strip_prefix("default ") {
                let arg = arg.trim();
                let unquoted = arg
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| arg.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                    .ok_or_else(|| {
                        RampartError::Compile(format!(
                            "default helper needs a quoted argument, found {arg:?}"
                        ))
                    })?;
                Ok(Helper::Default(unquoted.to_string()))
            } else {
                Err(RampartError::Compile(format!(
                    "unknown template helper {raw:?}"
                )))
            }
        }
    }
}

fn render_nodes(
    nodes: &[Node],
    params: &HashMap<String, ParamValue>,
    out: &mut String,
) -> Result<(), RampartError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Subst { field, helpers } => {
                out.push_str(&render_subst(field, helpers, params)?)
            }
            Node::Cond {
                field,
                then,
                otherwise,
            } => {
                // A missing optional parameter simply selects the else
                // branch; only direct substitution of a missing field errors.
                let truthy = params.get(field).map(ParamValue::is_truthy).unwrap_or(false);
                if truthy {
                    render_nodes(then, params, out)?;
                } else {
                    render_nodes(otherwise, params, out)?;
                }
            }
        }
    }
    Ok(())
}

fn render_subst(
    field: &str,
    helpers: &[Helper],
    params: &HashMap<String, ParamValue>,
) -> Result<String, RampartError> {
    // `default` rescues an absent field; anything else is a render error.
    let mut value = match params.get(field) {
        Some(v) => v.render(),
        None => match helpers.iter().find_map(|h| match h {
            Helper::Default(fallback) => Some(fallback.clone()),
            _ => None,
        }) {
            Some(fallback) => fallback,
            None => {
                return Err(RampartError::TemplateRender(format!(
                    "unknown field '.{field}'"
                )))
            }
        },
    };

    for helper in helpers {
        value = match helper {
            Helper::Upper => value.to_uppercase(),
            Helper::Lower => value.to_lowercase(),
            Helper::Trim => value.trim().to_string(),
            Helper::Quote => shell_quote(&value),
            Helper::Default(fallback) => {
                if value.is_empty() {
                    fallback.clone()
                } else {
                    value
                }
            }
        };
    }
    Ok(value)
}

/// Wrap a string in single quotes for safe interpolation into a POSIX shell
/// command, escaping embedded single quotes.
pub fn shell_quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('\'');
    for c in raw.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

use crate::indexer::extract::{ExtractedFile, LanguageExtractor};
use crate::model::{SymbolEntry, SymbolKind};
use anyhow::{Result, anyhow, bail};
use std::path::Path;
use tree_sitter::{Node, Parser};

#[derive(Clone)]
struct Context {
    file: String,
    class_stack: Vec<String>,
    fn_depth: usize,
}

pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_python::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for PythonExtractor {
    fn extract(&mut self, rel_path: &str, source: &str) -> Result<ExtractedFile> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| anyhow!("parser produced no tree"))?;
        let root = tree.root_node();
        if root.has_error() {
            match first_error_line(root) {
                Some(line) => bail!("syntax error near line {line}"),
                None => bail!("syntax error"),
            }
        }

        let mut output = ExtractedFile::default();
        let ctx = Context {
            file: rel_path.to_string(),
            class_stack: Vec::new(),
            fn_depth: 0,
        };
        walk_node(root, &ctx, source, &mut output);
        Ok(output)
    }
}

/// Module-equivalent name used by the dependency heuristic: path separators
/// become dots and the extension is dropped (`pkg/util.py` -> `pkg.util`).
pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let path = Path::new(rel_path);
    let mut parts: Vec<String> = path
        .components()
        .filter_map(|comp| comp.as_os_str().to_str().map(|s| s.to_string()))
        .collect();
    let Some(file) = parts.pop() else {
        return String::new();
    };
    let stem = Path::new(&file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&file)
        .to_string();
    parts.push(stem);
    parts.join(".")
}

fn walk_node(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    match node.kind() {
        "decorated_definition" => {
            if let Some(definition) = node.child_by_field_name("definition") {
                walk_node(definition, ctx, source, output);
            }
            return;
        }
        "class_definition" => {
            if ctx.fn_depth > 0 {
                return;
            }
            let Some(name_node) = node.child_by_field_name("name") else {
                return;
            };
            let name = node_text(name_node, source);
            let body = node.child_by_field_name("body");
            output.symbols.push(SymbolEntry {
                kind: SymbolKind::Class,
                name: name.clone(),
                file: ctx.file.clone(),
                line: start_line(node),
                end_line: end_line(node),
                members: body.map(|b| method_names(b, source)).unwrap_or_default(),
                docstring: body.and_then(|b| extract_docstring(b, source)),
                parent: ctx.class_stack.last().cloned(),
            });
            let mut next_ctx = ctx.clone();
            next_ctx.class_stack.push(name);
            if let Some(body) = body {
                walk_children(body, &next_ctx, source, output);
            }
            return;
        }
        "function_definition" => {
            if ctx.fn_depth > 0 {
                walk_children(node, ctx, source, output);
                return;
            }
            let Some(name_node) = node.child_by_field_name("name") else {
                return;
            };
            let kind = if ctx.class_stack.is_empty() {
                SymbolKind::Function
            } else {
                SymbolKind::Method
            };
            let body = node.child_by_field_name("body");
            output.symbols.push(SymbolEntry {
                kind,
                name: node_text(name_node, source),
                file: ctx.file.clone(),
                line: start_line(node),
                end_line: end_line(node),
                members: node
                    .child_by_field_name("parameters")
                    .map(|params| parameter_names(params, source))
                    .unwrap_or_default(),
                docstring: body.and_then(|b| extract_docstring(b, source)),
                parent: ctx.class_stack.last().cloned(),
            });
            let mut next_ctx = ctx.clone();
            next_ctx.fn_depth += 1;
            if let Some(body) = body {
                walk_children(body, &next_ctx, source, output);
            }
            return;
        }
        "import_statement" | "import_from_statement" => {
            output.imports.extend(parse_imports(&node_text(node, source)));
            return;
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                if function.kind() == "identifier" {
                    output.calls.insert(node_text(function, source));
                }
            }
        }
        _ => {}
    }
    walk_children(node, ctx, source, output);
}

fn walk_children(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, ctx, source, output);
    }
}

fn method_names(body: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        let definition = if child.kind() == "decorated_definition" {
            child.child_by_field_name("definition")
        } else {
            Some(child)
        };
        let Some(definition) = definition else {
            continue;
        };
        if definition.kind() != "function_definition" {
            continue;
        }
        if let Some(name) = definition.child_by_field_name("name") {
            names.push(node_text(name, source));
        }
    }
    names
}

fn parameter_names(params: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        let name = match child.kind() {
            "identifier" => Some(node_text(child, source)),
            "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                first_identifier(child).map(|n| node_text(n, source))
            }
            "default_parameter" | "typed_default_parameter" => child
                .child_by_field_name("name")
                .map(|n| node_text(n, source)),
            _ => None,
        };
        if let Some(name) = name {
            if !name.is_empty() {
                names.push(name);
            }
        }
    }
    names
}

fn first_identifier(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find(|child| child.kind() == "identifier");
    found
}

fn first_error_line(node: Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(start_line(node));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if !child.has_error() && !child.is_missing() {
            continue;
        }
        if let Some(line) = first_error_line(child) {
            return Some(line);
        }
    }
    None
}

fn start_line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

fn end_line(node: Node<'_>) -> usize {
    node.end_position().row + 1
}

fn node_text(node: Node<'_>, source: &str) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    source.get(start..end).unwrap_or("").trim().to_string()
}

fn extract_docstring(body: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = body.walk();
    let mut children = body.named_children(&mut cursor);
    let first = children.next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0)?;
    if string_node.kind() != "string" {
        return None;
    }
    let raw = node_text(string_node, source);
    let doc = unquote_string_literal(&raw).unwrap_or(raw);
    let doc = doc.trim().to_string();
    if doc.is_empty() { None } else { Some(doc) }
}

fn unquote_string_literal(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut idx = 0;
    for (offset, ch) in trimmed.char_indices() {
        if ch.is_ascii_alphabetic() {
            idx = offset + ch.len_utf8();
        } else {
            break;
        }
    }
    let rest = &trimmed[idx..];
    for quote in ["'''", "\"\"\""] {
        if rest.starts_with(quote) && rest.ends_with(quote) && rest.len() >= 6 {
            return Some(rest[3..rest.len() - 3].to_string());
        }
    }
    for quote in ['"', '\''] {
        if rest.starts_with(quote) && rest.ends_with(quote) && rest.len() >= 2 {
            return Some(rest[1..rest.len() - 1].to_string());
        }
    }
    None
}

/// Module names referenced by an import statement. `from a import b` yields
/// both `a` and `a.b` since `b` may itself be a module; relative dots are
/// dropped.
pub fn parse_imports(text: &str) -> Vec<String> {
    let cleaned = text
        .replace(['\n', '\\', '(', ')'], " ")
        .trim()
        .trim_end_matches(';')
        .to_string();
    if let Some(rest) = cleaned.strip_prefix("import ") {
        return rest
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .map(|name| name.to_string())
            .collect();
    }
    let Some(rest) = cleaned.strip_prefix("from ") else {
        return Vec::new();
    };
    let Some((module, names)) = rest.split_once(" import ") else {
        return Vec::new();
    };
    let base = module.trim().trim_start_matches('.');
    let mut out = Vec::new();
    if !base.is_empty() {
        out.push(base.to_string());
    }
    for part in names.split(',') {
        let Some(item) = part.split_whitespace().next() else {
            continue;
        };
        if item == "*" {
            continue;
        }
        if base.is_empty() {
            out.push(item.to_string());
        } else {
            out.push(format!("{base}.{item}"));
        }
    }
    out
}

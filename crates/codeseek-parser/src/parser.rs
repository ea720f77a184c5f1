use std::collections::BTreeSet;
use std::path::Path;

use codeseek_core::{ChunkKind, CodeChunk, CodeseekError, Result};
use tree_sitter::{Node, Parser};

/// The node kinds the chunker cares about.
///
/// Every tree-sitter node is mapped to one of these before the traversal
/// looks at it, so the walk is a `match` over a closed set instead of string
/// comparisons spread through the code.
///
/// # Examples
///
/// ```
/// use codeseek_parser::parser::SyntaxKind;
///
/// assert_eq!(SyntaxKind::from_kind("decorated_definition"), SyntaxKind::Decorated);
/// assert_eq!(SyntaxKind::from_kind("while_statement"), SyntaxKind::Other);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxKind {
    Module,
    FunctionDef,
    ClassDef,
    /// A function or class preceded by one or more decorators.
    Decorated,
    Block,
    Call,
    Identifier,
    Attribute,
    ArgumentList,
    KeywordArgument,
    /// `*args` in a call.
    ListSplat,
    /// `**kwargs` in a call.
    DictionarySplat,
    Comment,
    /// Python 2 `print x`; the grammar accepts it, Python 3 does not.
    PrintStatement,
    /// Python 2 `exec code`.
    ExecStatement,
    Other,
}

impl SyntaxKind {
    /// Map a tree-sitter-python node kind name.
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "module" => SyntaxKind::Module,
            "function_definition" => SyntaxKind::FunctionDef,
            "class_definition" => SyntaxKind::ClassDef,
            "decorated_definition" => SyntaxKind::Decorated,
            "block" => SyntaxKind::Block,
            "call" => SyntaxKind::Call,
            "identifier" => SyntaxKind::Identifier,
            "attribute" => SyntaxKind::Attribute,
            "argument_list" => SyntaxKind::ArgumentList,
            "keyword_argument" => SyntaxKind::KeywordArgument,
            "list_splat" => SyntaxKind::ListSplat,
            "dictionary_splat" => SyntaxKind::DictionarySplat,
            "comment" => SyntaxKind::Comment,
            "print_statement" => SyntaxKind::PrintStatement,
            "exec_statement" => SyntaxKind::ExecStatement,
            _ => SyntaxKind::Other,
        }
    }

    fn of(node: &Node) -> Self {
        Self::from_kind(node.kind())
    }
}

/// Where a definition sits, which decides what kind of chunk a `def` becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Module,
    ClassBody,
    Nested,
}

struct FileContext<'a> {
    path: &'a Path,
    source: &'a [u8],
    lines: Vec<&'a str>,
}

impl FileContext<'_> {
    /// Build a chunk for `def`, taking calls from `outer` so decorator calls count.
    fn chunk(&self, def: Node, outer: Node, kind: ChunkKind) -> Option<CodeChunk> {
        let name = def
            .child_by_field_name("name")
            .map(|n| node_text(&n, self.source))
            .filter(|n| !n.is_empty())?;

        let start_line = def.start_position().row as u32 + 1;
        let end = def.end_position();
        // A node ending at column 0 stops before that row's first character.
        let end_row = if end.column == 0 && end.row > def.start_position().row {
            end.row - 1
        } else {
            end.row
        };
        let end_line = end_row as u32 + 1;

        let first = (start_line as usize - 1).min(self.lines.len());
        let last = (end_line as usize).min(self.lines.len());
        let source_text = self.lines[first..last].join("\n");

        let mut calls = BTreeSet::new();
        collect_calls(outer, self.source, &mut calls);

        Some(CodeChunk::new(
            self.path.to_path_buf(),
            name,
            kind,
            start_line,
            end_line,
            source_text,
            calls,
        ))
    }
}

/// Chunk Python source held in memory.
///
/// Emits a `Function` chunk for every module-level function, a `Class` chunk
/// for every class at any depth, and a `Method` chunk for every function
/// defined directly in a class body. Chunks come out in source order.
///
/// # Errors
///
/// Returns [`CodeseekError::Parse`] if the grammar cannot be loaded or the
/// source is not valid Python 3. That covers tree-sitter error nodes and the
/// constructs the grammar tolerates but the language rejects: Python 2
/// `print`/`exec` statements, a positional argument after a keyword or `**`
/// argument, `*` after `**`, and a block with no statements.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use codeseek_core::ChunkKind;
/// use codeseek_parser::parser::parse_source;
///
/// let src = "def foo():\n    bar()\n\n\ndef bar():\n    pass\n";
/// let chunks = parse_source(Path::new("mod.py"), src).unwrap();
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].kind(), ChunkKind::Function);
/// assert!(chunks[0].calls().contains("bar"));
/// ```
pub fn parse_source(path: &Path, source: &str) -> Result<Vec<CodeChunk>> {
    let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| CodeseekError::Parse(format!("failed to set language: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| CodeseekError::Parse("parser produced no tree".into()))?;

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error(root)
            .map(|n| n.start_position().row + 1)
            .unwrap_or(1);
        return Err(CodeseekError::Parse(format!(
            "syntax error in {} near line {line}",
            path.display()
        )));
    }
    if let Some((node, reason)) = first_invalid(root) {
        return Err(CodeseekError::Parse(format!(
            "invalid syntax in {} at line {}: {reason}",
            path.display(),
            node.start_position().row + 1
        )));
    }

    let ctx = FileContext {
        path,
        source: source.as_bytes(),
        lines: source.lines().collect(),
    };
    let mut chunks = Vec::new();
    visit(root, Scope::Module, &ctx, &mut chunks);
    Ok(chunks)
}

/// Read and chunk one Python file.
///
/// Never fails: an unreadable file is logged at error level, a file with a
/// syntax error at warn level, and both yield an empty vec.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use codeseek_parser::parser::parse_file;
///
/// for chunk in parse_file(Path::new("app/models.py")) {
///     println!("{} {}", chunk.kind(), chunk.id());
/// }
/// ```
pub fn parse_file(path: &Path) -> Vec<CodeChunk> {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(source) => {
            let err = CodeseekError::Read {
                path: path.to_path_buf(),
                source,
            };
            tracing::error!(path = %path.display(), "{err}");
            return Vec::new();
        }
    };

    match parse_source(path, &source) {
        Ok(chunks) => {
            tracing::debug!(path = %path.display(), chunks = chunks.len(), "parsed file");
            chunks
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), "skipping file: {err}");
            Vec::new()
        }
    }
}

/// Chunk every file in `paths`, concatenating results in path order.
///
/// One bad file never aborts the batch; see [`parse_file`].
pub fn parse_repository<P: AsRef<Path>>(paths: &[P]) -> Vec<CodeChunk> {
    let mut chunks = Vec::new();
    for path in paths {
        chunks.extend(parse_file(path.as_ref()));
    }
    tracing::info!(files = paths.len(), chunks = chunks.len(), "parsed repository");
    chunks
}

fn visit(node: Node, scope: Scope, ctx: &FileContext, chunks: &mut Vec<CodeChunk>) {
    match SyntaxKind::of(&node) {
        SyntaxKind::Module => visit_children(node, Scope::Module, ctx, chunks),
        SyntaxKind::Block => visit_children(node, scope, ctx, chunks),
        SyntaxKind::Decorated => match node.child_by_field_name("definition") {
            Some(def) => visit_definition(def, node, scope, ctx, chunks),
            None => visit_children(node, Scope::Nested, ctx, chunks),
        },
        SyntaxKind::FunctionDef | SyntaxKind::ClassDef => {
            visit_definition(node, node, scope, ctx, chunks);
        }
        SyntaxKind::Call
        | SyntaxKind::Identifier
        | SyntaxKind::Attribute
        | SyntaxKind::ArgumentList
        | SyntaxKind::KeywordArgument
        | SyntaxKind::ListSplat
        | SyntaxKind::DictionarySplat
        | SyntaxKind::Comment
        | SyntaxKind::PrintStatement
        | SyntaxKind::ExecStatement
        | SyntaxKind::Other => visit_children(node, Scope::Nested, ctx, chunks),
    }
}

fn visit_children(node: Node, scope: Scope, ctx: &FileContext, chunks: &mut Vec<CodeChunk>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        visit(child, scope, ctx, chunks);
    }
}

fn visit_definition(
    def: Node,
    outer: Node,
    scope: Scope,
    ctx: &FileContext,
    chunks: &mut Vec<CodeChunk>,
) {
    match SyntaxKind::of(&def) {
        SyntaxKind::FunctionDef => {
            let kind = match scope {
                Scope::Module => Some(ChunkKind::Function),
                Scope::ClassBody => Some(ChunkKind::Method),
                Scope::Nested => None,
            };
            if let Some(chunk) = kind.and_then(|k| ctx.chunk(def, outer, k)) {
                chunks.push(chunk);
            }
            // Nested functions are not chunks, but classes inside them are.
            visit_children(def, Scope::Nested, ctx, chunks);
        }
        SyntaxKind::ClassDef => {
            if let Some(chunk) = ctx.chunk(def, outer, ChunkKind::Class) {
                chunks.push(chunk);
            }
            if let Some(body) = def.child_by_field_name("body") {
                visit(body, Scope::ClassBody, ctx, chunks);
            }
        }
        _ => visit_children(def, Scope::Nested, ctx, chunks),
    }
}

/// Collect callee names from every call expression under `node`.
///
/// `name(...)` records `name`, `obj.attr(...)` records `attr`; any other
/// callee shape records nothing.
fn collect_calls(node: Node, source: &[u8], calls: &mut BTreeSet<String>) {
    if SyntaxKind::of(&node) == SyntaxKind::Call {
        if let Some(name) = node
            .child_by_field_name("function")
            .and_then(|callee| callee_name(callee, source))
        {
            calls.insert(name);
        }
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_calls(child, source, calls);
    }
}

fn callee_name(callee: Node, source: &[u8]) -> Option<String> {
    let name = match SyntaxKind::of(&callee) {
        SyntaxKind::Identifier => node_text(&callee, source),
        SyntaxKind::Attribute => node_text(&callee.child_by_field_name("attribute")?, source),
        _ => return None,
    };
    (!name.is_empty()).then_some(name)
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}

/// Find the first node the grammar accepted but Python 3 would reject.
fn first_invalid(node: Node) -> Option<(Node, &'static str)> {
    let reason = match SyntaxKind::of(&node) {
        SyntaxKind::PrintStatement => Some("Python 2 print statement"),
        SyntaxKind::ExecStatement => Some("Python 2 exec statement"),
        SyntaxKind::ArgumentList => invalid_argument_order(node),
        SyntaxKind::FunctionDef | SyntaxKind::ClassDef => node
            .child_by_field_name("body")
            .is_none()
            .then_some("definition has no body"),
        SyntaxKind::Block => {
            let mut cursor = node.walk();
            let has_statement = node
                .named_children(&mut cursor)
                .any(|c| SyntaxKind::of(&c) != SyntaxKind::Comment);
            (!has_statement).then_some("expected an indented block")
        }
        _ => None,
    };
    if let Some(reason) = reason {
        return Some((node, reason));
    }

    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    children.into_iter().find_map(first_invalid)
}

fn invalid_argument_order(args: Node) -> Option<&'static str> {
    let (mut seen_keyword, mut seen_double_splat) = (false, false);
    let mut cursor = args.walk();
    for arg in args.named_children(&mut cursor) {
        match SyntaxKind::of(&arg) {
            SyntaxKind::Comment => {}
            SyntaxKind::KeywordArgument => seen_keyword = true,
            SyntaxKind::DictionarySplat => seen_double_splat = true,
            SyntaxKind::ListSplat if seen_double_splat => {
                return Some("iterable unpacking follows keyword argument unpacking");
            }
            SyntaxKind::ListSplat => {}
            _ if seen_keyword || seen_double_splat => {
                return Some("positional argument follows keyword argument");
            }
            _ => {}
        }
    }
    None
}

fn node_text(node: &Node, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or_default().to_string()
}

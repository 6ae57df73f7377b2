//! Source-code merge strategy.
//!
//! Works at top-level declaration granularity. Both the working copy and the
//! snapshot are parsed into syntax trees; declarations the user added or
//! changed relative to the snapshot are the custom edits. Each custom edit is
//! spliced verbatim into the fresh candidate: replacing the same-named
//! declaration when the generator left it alone, or inserted near its
//! original anchor when it is new. A custom edit whose target the new
//! generation reshaped cannot be combined safely; the whole file falls back
//! to the free-text strategy with the conflict flag raised. The same fallback
//! (without the forced flag) covers edits that cannot be attributed to any
//! declaration, such as changed imports or preamble.
//!
//! Anchoring is name-based with positional fallback: a new declaration goes
//! after the nearest preceding working-file declaration that still exists in
//! the candidate, or at end of file when none survives.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;
use tree_sitter::{Language, Node, Parser};

use super::{text, MergeOutcome};

// ---------------------------------------------------------------------------
// Language support
// ---------------------------------------------------------------------------

/// Languages the declaration-level merge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
}

impl SourceLanguage {
    /// Detect language from a relative path's extension.
    pub fn from_path(rel_path: &str) -> Option<Self> {
        match Path::new(rel_path).extension()?.to_str()? {
            "rs" => Some(Self::Rust),
            "py" => Some(Self::Python),
            "ts" | "tsx" => Some(Self::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    fn grammar(self) -> Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    /// Node kinds that count as top-level named declarations.
    const fn declaration_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "struct_item",
                "enum_item",
                "trait_item",
                "impl_item",
                "const_item",
                "static_item",
                "type_item",
                "mod_item",
                "macro_definition",
            ],
            Self::Python => &[
                "function_definition",
                "class_definition",
                "decorated_definition",
            ],
            Self::TypeScript | Self::JavaScript => &[
                "function_declaration",
                "class_declaration",
                "interface_declaration",
                "type_alias_declaration",
                "enum_declaration",
                "lexical_declaration",
                "export_statement",
            ],
            Self::Go => &[
                "function_declaration",
                "method_declaration",
                "type_declaration",
            ],
        }
    }

    /// Node kinds that attach to the following declaration (comments,
    /// attributes) and travel with it when splicing.
    const fn attached_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["line_comment", "block_comment", "attribute_item"],
            Self::Python | Self::TypeScript | Self::JavaScript | Self::Go => &["comment"],
        }
    }

    /// Extract the identifying name of a declaration node.
    fn name_of(self, node: &Node<'_>, source: &[u8]) -> Option<String> {
        // Rust impl blocks are identified by their type, qualified by the
        // trait when present so `impl Pet` and `impl Display for Pet` stay
        // distinct.
        if self == Self::Rust && node.kind() == "impl_item" {
            let type_name = node
                .child_by_field_name("type")?
                .utf8_text(source)
                .ok()?
                .to_string();
            return match node.child_by_field_name("trait") {
                Some(trait_node) => {
                    let trait_name = trait_node.utf8_text(source).ok()?;
                    Some(format!("{} for {}", trait_name, type_name))
                }
                None => Some(type_name),
            };
        }

        if let Some(name_node) = node.child_by_field_name("name") {
            return name_node.utf8_text(source).ok().map(str::to_string);
        }

        // Wrapper nodes carry the name on a nested declaration.
        match node.kind() {
            // Python decorators wrap the real definition.
            "decorated_definition" => self
                .find_child(node, &["function_definition", "class_definition"])
                .and_then(|inner| self.name_of(&inner, source)),
            // TS/JS `export ...` wraps the declared item.
            "export_statement" => node
                .child_by_field_name("declaration")
                .and_then(|inner| self.name_of(&inner, source)),
            // `const x = ...` names live on the declarator.
            "lexical_declaration" => self
                .find_child(node, &["variable_declarator"])
                .and_then(|inner| self.name_of(&inner, source)),
            // Go `type Foo struct {...}` names live on the spec.
            "type_declaration" => self
                .find_child(node, &["type_spec"])
                .and_then(|inner| self.name_of(&inner, source)),
            _ => None,
        }
    }

    fn find_child<'tree>(&self, node: &Node<'tree>, kinds: &[&str]) -> Option<Node<'tree>> {
        let mut cursor = node.walk();
        let found = node
            .children(&mut cursor)
            .find(|child| kinds.contains(&child.kind()));
        found
    }
}

// ---------------------------------------------------------------------------
// Declaration extraction
// ---------------------------------------------------------------------------

/// One top-level declaration, with any attached leading comments/attributes
/// folded into its span.
#[derive(Debug, Clone)]
struct Declaration {
    kind: String,
    name: String,
    start: usize,
    end: usize,
    text: String,
}

impl Declaration {
    fn key(&self) -> (String, String) {
        (self.kind.clone(), self.name.clone())
    }
}

/// Parse `source` and extract top-level declarations.
///
/// Returns `None` when the grammar rejects the input; the caller treats
/// that as a parse failure and falls back.
fn parse_declarations(source: &str, lang: SourceLanguage) -> Option<Vec<Declaration>> {
    let mut parser = Parser::new();
    parser.set_language(&lang.grammar()).ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    let bytes = source.as_bytes();
    let mut declarations = Vec::new();
    let mut attached_start: Option<usize> = None;

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        let kind = child.kind();
        if lang.attached_kinds().contains(&kind) {
            attached_start.get_or_insert(child.start_byte());
            continue;
        }

        if lang.declaration_kinds().contains(&kind) {
            if let Some(name) = lang.name_of(&child, bytes) {
                let start = attached_start.take().unwrap_or_else(|| child.start_byte());
                let end = child.end_byte();
                declarations.push(Declaration {
                    kind: kind.to_string(),
                    name,
                    start,
                    end,
                    text: source[start..end].to_string(),
                });
                continue;
            }
        }
        attached_start = None;
    }

    Some(declarations)
}

fn index_by_key(declarations: &[Declaration]) -> BTreeMap<(String, String), &Declaration> {
    let mut map = BTreeMap::new();
    for decl in declarations {
        // First occurrence wins; duplicate names cannot be matched reliably.
        map.entry(decl.key()).or_insert(decl);
    }
    map
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Three-way merge at declaration granularity.
pub fn merge(rel_path: &str, base: &str, working: &str, candidate: &str) -> MergeOutcome {
    let lang = match SourceLanguage::from_path(rel_path) {
        Some(lang) => lang,
        None => return text::merge(base, working, candidate),
    };

    let parsed = (
        parse_declarations(base, lang),
        parse_declarations(working, lang),
        parse_declarations(candidate, lang),
    );
    let (base_decls, work_decls, cand_decls) = match parsed {
        (Some(b), Some(w), Some(c)) => (b, w, c),
        _ => {
            debug!(path = rel_path, "syntax tree unavailable, using free-text merge");
            let mut outcome = text::merge(base, working, candidate);
            outcome.had_conflict = true;
            return outcome;
        }
    };

    let base_map = index_by_key(&base_decls);
    let cand_map = index_by_key(&cand_decls);
    let work_map = index_by_key(&work_decls);

    // Edits outside declaration spans (imports, preamble) cannot be spliced
    // declaration-wise; hand the whole file to the free-text strategy.
    if residue(base, &base_decls) != residue(working, &work_decls) {
        debug!(path = rel_path, "edits outside declarations, using free-text merge");
        return text::merge(base, working, candidate);
    }

    #[derive(Debug)]
    enum Op {
        Replace { start: usize, end: usize, text: String },
        Insert { at: usize, text: String },
    }

    let mut ops: Vec<Op> = Vec::new();
    let mut appends: Vec<String> = Vec::new();

    // Custom edits: declarations added or changed in the working copy.
    for decl in &work_decls {
        let key = decl.key();
        let customized = match base_map.get(&key) {
            Some(base_decl) => base_decl.text != decl.text,
            None => true,
        };
        if !customized {
            continue;
        }

        if let Some(cand_decl) = cand_map.get(&key) {
            if cand_decl.text == decl.text {
                // Both sides made the identical change.
                continue;
            }
        }

        if generation_changed(&base_map, &cand_map, &key) {
            debug!(
                path = rel_path,
                kind = key.0.as_str(),
                name = key.1.as_str(),
                "custom edit targets a regenerated declaration"
            );
            let mut outcome = text::merge(base, working, candidate);
            outcome.had_conflict = true;
            return outcome;
        }

        match cand_map.get(&key) {
            Some(cand_decl) => ops.push(Op::Replace {
                start: cand_decl.start,
                end: cand_decl.end,
                text: decl.text.clone(),
            }),
            None => match find_anchor(decl, &work_decls, &cand_map) {
                Some(anchor_end) => ops.push(Op::Insert {
                    at: anchor_end,
                    text: format!("\n\n{}", decl.text),
                }),
                None => appends.push(decl.text.clone()),
            },
        }
    }

    // Custom deletions: declarations removed from the working copy.
    for decl in &base_decls {
        let key = decl.key();
        if work_map.contains_key(&key) {
            continue;
        }
        match cand_map.get(&key) {
            None => {} // removed on both sides
            Some(cand_decl) if cand_decl.text == decl.text => {
                // Generator kept it unchanged; the deletion wins.
                let mut end = cand_decl.end;
                let bytes = candidate.as_bytes();
                while end < bytes.len() && bytes[end] == b'\n' {
                    end += 1;
                }
                ops.push(Op::Replace {
                    start: cand_decl.start,
                    end,
                    text: String::new(),
                });
            }
            Some(_) => {
                // Deleted locally, regenerated differently upstream.
                debug!(
                    path = rel_path,
                    kind = key.0.as_str(),
                    name = key.1.as_str(),
                    "deleted declaration was regenerated"
                );
                let mut outcome = text::merge(base, working, candidate);
                outcome.had_conflict = true;
                return outcome;
            }
        }
    }

    // Apply back-to-front so earlier offsets stay valid. For equal
    // positions, later-queued ops apply first, which keeps multiple
    // insertions at one anchor in working-file order.
    let mut indexed: Vec<(usize, Op)> = ops.into_iter().enumerate().collect();
    indexed.sort_by(|(ai, a), (bi, b)| {
        let pos = |op: &Op| match op {
            Op::Replace { start, .. } => *start,
            Op::Insert { at, .. } => *at,
        };
        pos(b).cmp(&pos(a)).then(bi.cmp(ai))
    });

    let mut output = candidate.to_string();
    for (_, op) in indexed {
        match op {
            Op::Replace { start, end, text } => output.replace_range(start..end, &text),
            Op::Insert { at, text } => output.insert_str(at, &text),
        }
    }

    for text in appends {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push('\n');
        output.push_str(&text);
        output.push('\n');
    }

    MergeOutcome::clean(output)
}

/// Whether the new generation structurally changed the declaration at `key`
/// (modified, removed, or newly added relative to the base).
fn generation_changed(
    base_map: &BTreeMap<(String, String), &Declaration>,
    cand_map: &BTreeMap<(String, String), &Declaration>,
    key: &(String, String),
) -> bool {
    match (base_map.get(key), cand_map.get(key)) {
        (Some(base_decl), Some(cand_decl)) => base_decl.text != cand_decl.text,
        (Some(_), None) | (None, Some(_)) => true,
        (None, None) => false,
    }
}

/// End byte of the anchor declaration in the candidate for a new custom
/// declaration, or `None` when no preceding working declaration survives.
fn find_anchor(
    decl: &Declaration,
    work_decls: &[Declaration],
    cand_map: &BTreeMap<(String, String), &Declaration>,
) -> Option<usize> {
    work_decls
        .iter()
        .filter(|other| other.start < decl.start)
        .rev()
        .find_map(|other| cand_map.get(&other.key()).map(|anchor| anchor.end))
}

/// The source with all declaration spans excised and whitespace collapsed.
/// What remains is preamble, imports and inter-declaration trivia.
fn residue(source: &str, declarations: &[Declaration]) -> String {
    let mut kept = String::new();
    let mut pos = 0;
    for decl in declarations {
        if decl.start > pos {
            kept.push_str(&source[pos..decl.start]);
            kept.push(' ');
        }
        pos = decl.end.max(pos);
    }
    if pos < source.len() {
        kept.push_str(&source[pos..]);
    }
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_RS: &str = "\
use serde::Serialize;

pub fn list_pets() -> Vec<Pet> {
    Vec::new()
}

pub fn get_pet(id: u64) -> Option<Pet> {
    let _ = id;
    None
}
";

    #[test]
    fn test_language_detection() {
        assert_eq!(SourceLanguage::from_path("a/b.rs"), Some(SourceLanguage::Rust));
        assert_eq!(SourceLanguage::from_path("a/b.py"), Some(SourceLanguage::Python));
        assert_eq!(SourceLanguage::from_path("a/b.ts"), Some(SourceLanguage::TypeScript));
        assert_eq!(SourceLanguage::from_path("a/b.go"), Some(SourceLanguage::Go));
        assert_eq!(SourceLanguage::from_path("a/b.md"), None);
    }

    #[test]
    fn test_parse_declarations_rust() {
        let decls = parse_declarations(BASE_RS, SourceLanguage::Rust).unwrap();
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["list_pets", "get_pet"]);
    }

    #[test]
    fn test_parse_failure_returns_none() {
        assert!(parse_declarations("fn broken( {", SourceLanguage::Rust).is_none());
    }

    #[test]
    fn test_custom_function_replaces_unchanged_candidate() {
        // User rewrote get_pet; generator only touched list_pets.
        let working = BASE_RS.replace("None", "Some(Pet::default())");
        let candidate = BASE_RS.replace("Vec::new()", "vec![Pet::default()]");
        let out = merge("api.rs", BASE_RS, &working, &candidate);
        assert!(!out.had_conflict);
        assert!(out.content.contains("vec![Pet::default()]"));
        assert!(out.content.contains("Some(Pet::default())"));
    }

    #[test]
    fn test_new_declaration_spliced_after_anchor() {
        let working = format!(
            "{}\npub fn delete_pet(id: u64) {{\n    let _ = id;\n}}\n",
            BASE_RS
        );
        let candidate = BASE_RS.replace("Vec::new()", "vec![]");
        let out = merge("api.rs", BASE_RS, &working, &candidate);
        assert!(!out.had_conflict);
        assert!(out.content.contains("delete_pet"));
        assert!(out.content.contains("vec![]"));
        // Anchored after get_pet, its original neighbor.
        let get_pos = out.content.find("fn get_pet").unwrap();
        let del_pos = out.content.find("fn delete_pet").unwrap();
        assert!(del_pos > get_pos);
    }

    #[test]
    fn test_custom_edit_on_regenerated_declaration_conflicts() {
        // Both the user and the generator rewrote get_pet.
        let working = BASE_RS.replace("None", "Some(Pet::default())");
        let candidate = BASE_RS.replace("None", "unimplemented!()");
        let out = merge("api.rs", BASE_RS, &working, &candidate);
        assert!(out.had_conflict);
    }

    #[test]
    fn test_identical_change_both_sides_is_clean() {
        let working = BASE_RS.replace("None", "Some(Pet::default())");
        let candidate = working.clone();
        let out = merge("api.rs", BASE_RS, &working, &candidate);
        assert!(!out.had_conflict);
        assert_eq!(out.content, candidate);
    }

    #[test]
    fn test_attached_attribute_travels_with_declaration() {
        let working = BASE_RS.replace(
            "pub fn get_pet",
            "#[tracing::instrument]\npub fn get_pet",
        );
        let candidate = BASE_RS.replace("Vec::new()", "vec![]");
        let out = merge("api.rs", BASE_RS, &working, &candidate);
        assert!(!out.had_conflict);
        assert!(out.content.contains("#[tracing::instrument]\npub fn get_pet"));
    }

    #[test]
    fn test_user_deleted_declaration_stays_deleted() {
        let working = BASE_RS.replace(
            "\npub fn get_pet(id: u64) -> Option<Pet> {\n    let _ = id;\n    None\n}\n",
            "",
        );
        let candidate = BASE_RS.replace("Vec::new()", "vec![]");
        let out = merge("api.rs", BASE_RS, &working, &candidate);
        assert!(!out.had_conflict);
        assert!(!out.content.contains("get_pet"));
        assert!(out.content.contains("vec![]"));
    }

    #[test]
    fn test_import_edit_falls_back_to_text_merge() {
        let working = BASE_RS.replace(
            "use serde::Serialize;",
            "use serde::Serialize;\nuse std::collections::HashMap;",
        );
        // Upstream change far from the import edit, so the line-based patch
        // applies cleanly after the declaration-level strategy bows out.
        let candidate = BASE_RS.replace("None", "Some(Pet::new())");
        let out = merge("api.rs", BASE_RS, &working, &candidate);
        assert!(!out.had_conflict);
        assert!(out.content.contains("HashMap"));
        assert!(out.content.contains("Some(Pet::new())"));
    }

    #[test]
    fn test_unparseable_working_copy_conflicts() {
        let working = BASE_RS.replace("pub fn get_pet(id: u64)", "pub fn get_pet(id u64");
        let candidate = BASE_RS.replace("Vec::new()", "vec![]");
        let out = merge("api.rs", BASE_RS, &working, &candidate);
        assert!(out.had_conflict);
    }

    #[test]
    fn test_typescript_export_declarations() {
        let base = "export function listPets(): Pet[] {\n  return [];\n}\n";
        let decls = parse_declarations(base, SourceLanguage::TypeScript).unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "listPets");
    }

    #[test]
    fn test_python_decorated_definition() {
        let base = "@retry\ndef list_pets():\n    return []\n";
        let decls = parse_declarations(base, SourceLanguage::Python).unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "list_pets");
    }

    #[test]
    fn test_go_type_declaration() {
        let base = "package pets\n\ntype Pet struct {\n\tName string\n}\n";
        let decls = parse_declarations(base, SourceLanguage::Go).unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "Pet");
        assert_eq!(decls[0].kind, "type_declaration");
    }
}

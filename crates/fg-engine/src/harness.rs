//! Syntactic harness parsing.
//!
//! Harness code is thin and almost never dispatches through function
//! pointers, so a tree-sitter pass with no semantic resolution is enough
//! to bridge each fuzzer's entry function into the library. The pass
//! errs toward over-reporting, which is the correct direction: a missing
//! harness→library edge hides reachable code.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use fg_core::{Error, FuzzerFile, FuzzerInfo, Result};
use tree_sitter::{Node, Parser};

/// Function definitions found in one harness file, each with the call
/// names occurring in its body. Conditional-compilation branches all
/// contribute; shared template files therefore yield the union of their
/// per-macro call sets.
#[derive(Debug, Default, Clone)]
pub struct HarnessFileAnalysis {
    pub definitions: HashMap<String, Vec<String>>,
}

/// Parse every declared fuzzer and compute its library calls.
///
/// For each fuzzer the in-harness call closure starts at `entry_symbol`;
/// closure leaves that are not defined within the harness files and do
/// appear in `library_functions` become the fuzzer's library calls.
pub fn parse_fuzzers(
    project_root: &Path,
    fuzzer_sources: &BTreeMap<String, Vec<String>>,
    library_functions: &HashSet<String>,
    entry_symbol: &str,
) -> Result<Vec<FuzzerInfo>> {
    let mut analysis_cache: HashMap<String, (String, HarnessFileAnalysis)> = HashMap::new();
    let mut fuzzers = Vec::with_capacity(fuzzer_sources.len());

    for (name, files) in fuzzer_sources {
        if files.is_empty() {
            return Err(Error::HarnessParse(format!(
                "fuzzer {name} declares no source files"
            )));
        }

        let mut harness_defs: HashMap<String, Vec<String>> = HashMap::new();
        let mut fuzzer_files = Vec::with_capacity(files.len());
        for rel in files {
            let cached = analysis_cache.get(rel).cloned();
            let (source, analysis) = match cached {
                Some(cached) => cached,
                None => {
                    let path = crate::probe::resolve_in_project(project_root, rel)?;
                    let source = std::fs::read_to_string(&path).map_err(|e| {
                        Error::HarnessParse(format!(
                            "cannot read harness source {rel}: {e}"
                        ))
                    })?;
                    let analysis = analyze_harness_source(&source, rel)?;
                    analysis_cache
                        .insert(rel.clone(), (source.clone(), analysis.clone()));
                    (source, analysis)
                }
            };
            fuzzer_files.push(FuzzerFile {
                path: rel.clone(),
                source,
            });
            for (def, calls) in analysis.definitions {
                harness_defs.entry(def).or_default().extend(calls);
            }
        }

        if !harness_defs.contains_key(entry_symbol) {
            return Err(Error::HarnessParse(format!(
                "fuzzer {name} does not define {entry_symbol}"
            )));
        }

        let library_calls =
            closure_library_calls(&harness_defs, library_functions, entry_symbol);
        fuzzers.push(FuzzerInfo {
            name: name.clone(),
            entry_function: entry_symbol.to_string(),
            files: fuzzer_files,
            focus: None,
            library_calls,
        });
    }
    Ok(fuzzers)
}

/// Closure of in-harness calls from the entry symbol; leaves are matched
/// against the library function set.
fn closure_library_calls(
    harness_defs: &HashMap<String, Vec<String>>,
    library_functions: &HashSet<String>,
    entry_symbol: &str,
) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::from([entry_symbol]);
    let mut queue: VecDeque<&str> = VecDeque::from([entry_symbol]);
    let mut library_calls: HashSet<&str> = HashSet::new();

    while let Some(def) = queue.pop_front() {
        let Some(calls) = harness_defs.get(def) else {
            continue;
        };
        for call in calls {
            if harness_defs.contains_key(call.as_str()) {
                if visited.insert(call.as_str()) {
                    queue.push_back(call.as_str());
                }
            } else if library_functions.contains(call.as_str()) {
                library_calls.insert(call.as_str());
            }
        }
    }

    let mut out: Vec<String> = library_calls.into_iter().map(str::to_string).collect();
    out.sort();
    out
}

/// Parse one harness source file into definitions and their calls.
pub fn analyze_harness_source(source: &str, file_name: &str) -> Result<HarnessFileAnalysis> {
    let mut parser = Parser::new();
    let language = if is_cpp_file(file_name) {
        tree_sitter_cpp::LANGUAGE.into()
    } else {
        tree_sitter_c::LANGUAGE.into()
    };
    parser.set_language(&language).map_err(|e| {
        Error::HarnessParse(format!("failed to load grammar for {file_name}: {e}"))
    })?;
    let tree = parser.parse(source, None).ok_or_else(|| {
        Error::HarnessParse(format!("tree-sitter parse returned None for {file_name}"))
    })?;

    let mut analysis = HarnessFileAnalysis::default();
    collect_definitions(tree.root_node(), source.as_bytes(), &mut analysis);
    Ok(analysis)
}

fn is_cpp_file(file_name: &str) -> bool {
    let ext = file_name.rsplit('.').next().unwrap_or_default();
    matches!(ext, "cc" | "cpp" | "cxx" | "C" | "hh" | "hpp" | "hxx")
}

fn collect_definitions(node: Node<'_>, source: &[u8], analysis: &mut HarnessFileAnalysis) {
    if node.kind() == "function_definition" {
        if let Some(name) = definition_name(&node, source) {
            let mut calls = Vec::new();
            collect_calls(node, source, &mut calls);
            analysis.definitions.entry(name).or_default().extend(calls);
            return;
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_definitions(child, source, analysis);
    }
}

/// Name of a function_definition: descend the declarator chain to its
/// innermost identifier.
fn definition_name(node: &Node<'_>, source: &[u8]) -> Option<String> {
    let declarator = node.child_by_field_name("declarator")?;
    innermost_identifier(declarator, source)
}

fn innermost_identifier(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" | "field_identifier" | "destructor_name" | "operator_name" => {
            Some(node_text(&node, source).to_string())
        }
        "qualified_identifier" => {
            // `ns::f` defines `f`; the analyzer reports plain symbols.
            let name = node.child_by_field_name("name")?;
            innermost_identifier(name, source)
        }
        _ => {
            if let Some(inner) = node.child_by_field_name("declarator") {
                return innermost_identifier(inner, source);
            }
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if let Some(name) = innermost_identifier(child, source) {
                    return Some(name);
                }
            }
            None
        }
    }
}

fn collect_calls(node: Node<'_>, source: &[u8], calls: &mut Vec<String>) {
    if node.kind() == "call_expression" {
        if let Some(function) = node.child_by_field_name("function") {
            if let Some(name) = call_target_name(function, source) {
                calls.push(name);
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_calls(child, source, calls);
    }
}

/// The symbol a call expression targets: the rightmost identifier of the
/// callee expression.
fn call_target_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(&node, source).to_string()),
        "qualified_identifier" => {
            let name = node.child_by_field_name("name")?;
            call_target_name(name, source)
        }
        "field_expression" => {
            let field = node.child_by_field_name("field")?;
            Some(node_text(&field, source).to_string())
        }
        "parenthesized_expression" | "pointer_expression" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if let Some(name) = call_target_name(child, source) {
                    return Some(name);
                }
            }
            None
        }
        "template_function" => {
            let name = node.child_by_field_name("name")?;
            call_target_name(name, source)
        }
        _ => None,
    }
}

fn node_text<'a>(node: &Node<'_>, source: &'a [u8]) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    const ENTRY: &str = fg_core::FUZZ_ENTRY_SYMBOL;

    #[test]
    fn direct_and_transitive_library_calls() {
        let source = r#"
#include <stdint.h>

static void prepare(const uint8_t *data) {
    png_init(data);
}

int LLVMFuzzerTestOneInput(const uint8_t *data, size_t size) {
    prepare(data);
    png_read(data, size);
    local_noise();
    return 0;
}

static void local_noise(void) { }
"#;
        let analysis = analyze_harness_source(source, "fuzz/h.c").unwrap();
        assert!(analysis.definitions.contains_key(ENTRY));
        assert!(analysis.definitions.contains_key("prepare"));

        let mut defs = HashMap::new();
        for (k, v) in analysis.definitions {
            defs.insert(k, v);
        }
        let calls = closure_library_calls(&defs, &lib(&["png_init", "png_read"]), ENTRY);
        assert_eq!(calls, vec!["png_init".to_string(), "png_read".to_string()]);
    }

    #[test]
    fn cpp_harness_with_qualified_calls() {
        let source = r#"
#include <cstdint>

extern "C" int LLVMFuzzerTestOneInput(const uint8_t *data, size_t size) {
    demo::Decoder d;
    d.feed(data, size);
    demo::flush();
    return 0;
}
"#;
        let analysis = analyze_harness_source(source, "fuzz/h.cc").unwrap();
        let defs = analysis.definitions;
        assert!(defs.contains_key(ENTRY));
        let calls = closure_library_calls(&defs, &lib(&["feed", "flush"]), ENTRY);
        assert_eq!(calls, vec!["feed".to_string(), "flush".to_string()]);
    }

    #[test]
    fn template_harness_unions_macro_branches() {
        let source = r#"
int LLVMFuzzerTestOneInput(const unsigned char *data, unsigned long size) {
#ifdef MODE_A
    lib_a(data, size);
#else
    lib_b(data, size);
#endif
    return 0;
}
"#;
        let analysis = analyze_harness_source(source, "fuzz/template.c").unwrap();
        let calls =
            closure_library_calls(&analysis.definitions, &lib(&["lib_a", "lib_b"]), ENTRY);
        assert_eq!(calls, vec!["lib_a".to_string(), "lib_b".to_string()]);
    }

    #[test]
    fn parse_fuzzers_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "fuzz/a.c",
            "int LLVMFuzzerTestOneInput(const unsigned char *d, unsigned long n) {\n    parse_header(d, n);\n    return 0;\n}\n",
        );
        write(
            dir.path(),
            "fuzz/b.c",
            "int LLVMFuzzerTestOneInput(const unsigned char *d, unsigned long n) {\n    dispatch(d);\n    return 0;\n}\n",
        );

        let mut sources = BTreeMap::new();
        sources.insert("fz_a".to_string(), vec!["fuzz/a.c".to_string()]);
        sources.insert("fz_b".to_string(), vec!["fuzz/b.c".to_string()]);

        let fuzzers = parse_fuzzers(
            dir.path(),
            &sources,
            &lib(&["parse_header", "dispatch", "helper"]),
            ENTRY,
        )
        .unwrap();

        assert_eq!(fuzzers.len(), 2);
        assert_eq!(fuzzers[0].name, "fz_a");
        assert_eq!(fuzzers[0].library_calls, vec!["parse_header".to_string()]);
        assert_eq!(fuzzers[1].library_calls, vec!["dispatch".to_string()]);
        assert_eq!(fuzzers[0].primary_file_path(), Some("fuzz/a.c"));
        assert!(fuzzers[0].files[0].source.contains("parse_header"));
    }

    #[test]
    fn missing_harness_source_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = BTreeMap::new();
        sources.insert("fz".to_string(), vec!["fuzz/gone.c".to_string()]);
        let err = parse_fuzzers(dir.path(), &sources, &lib(&[]), ENTRY).unwrap_err();
        assert!(matches!(err, Error::HarnessParse(_)));
    }

    #[test]
    fn harness_without_entry_symbol_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "fuzz/h.c", "int helper(void) { return 0; }\n");
        let mut sources = BTreeMap::new();
        sources.insert("fz".to_string(), vec!["fuzz/h.c".to_string()]);
        let err = parse_fuzzers(dir.path(), &sources, &lib(&[]), ENTRY).unwrap_err();
        assert!(matches!(err, Error::HarnessParse(_)));
    }
}

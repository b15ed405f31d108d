//! Debug-metadata extraction from textual IR.
//!
//! Walks `library.ll` for `define` lines, their `!DISubprogram` records,
//! and the `!DIFile` records those reference, producing per-function
//! `(ir_name, original_name, file_path, line)` tuples; function bodies
//! are then read back from the source tree.

use std::collections::HashMap;
use std::path::Path;

use fg_core::FunctionMeta;

/// Extract per-function debug metadata from disassembled IR and attach
/// source bodies read from `project_root`.
pub fn extract(ll_text: &str, project_root: &Path) -> Vec<FunctionMeta> {
    let mut files: HashMap<String, String> = HashMap::new();
    let mut subprograms: HashMap<String, Subprogram> = HashMap::new();
    let mut defines: Vec<(String, String)> = Vec::new();

    for line in ll_text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("define") {
            if let Some(pair) = parse_define(trimmed) {
                defines.push(pair);
            }
        } else if let Some((id, record)) = parse_metadata_record(trimmed) {
            if record.contains("!DIFile(") {
                if let Some(path) = difile_path(record, project_root) {
                    files.insert(id.to_string(), path);
                }
            } else if record.contains("!DISubprogram(") {
                if let Some(sp) = parse_subprogram(record) {
                    subprograms.insert(id.to_string(), sp);
                }
            }
        }
    }

    let mut source_cache: HashMap<String, Option<String>> = HashMap::new();
    let mut metas = Vec::with_capacity(defines.len());
    for (ir_name, dbg_ref) in defines {
        let Some(sp) = subprograms.get(&dbg_ref) else {
            continue;
        };
        let Some(file_path) = files.get(&sp.file_ref) else {
            continue;
        };
        let source = source_cache
            .entry(file_path.clone())
            .or_insert_with(|| std::fs::read_to_string(project_root.join(file_path)).ok());
        let (content, end_line) = match source {
            Some(text) => match capture_body(text, sp.line as usize) {
                Some((body, end)) => (Some(body), Some(end as i64)),
                None => (None, None),
            },
            None => (None, None),
        };
        metas.push(FunctionMeta {
            ir_name,
            original_name: sp.name.clone(),
            file_path: file_path.clone(),
            start_line: sp.line,
            end_line,
            content,
        });
    }
    metas
}

struct Subprogram {
    name: String,
    file_ref: String,
    line: i64,
}

/// `!N = ...` metadata line → `("!N", rest)`.
fn parse_metadata_record(line: &str) -> Option<(&str, &str)> {
    if !line.starts_with('!') {
        return None;
    }
    let (id, rest) = line.split_once(" = ")?;
    if !id[1..].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((id, rest))
}

/// `define ... @sym(...) ... !dbg !N {` → `(sym, "!N")`.
fn parse_define(line: &str) -> Option<(String, String)> {
    let at = line.find('@')?;
    let rest = &line[at + 1..];
    let ir_name = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()?.to_string()
    } else {
        rest.chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
            .collect()
    };
    if ir_name.is_empty() {
        return None;
    }
    let dbg = line.find("!dbg !")?;
    let num: String = line[dbg + "!dbg !".len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if num.is_empty() {
        return None;
    }
    Some((ir_name, format!("!{num}")))
}

fn parse_subprogram(record: &str) -> Option<Subprogram> {
    let name = field_str(record, "name")?;
    let file_ref = field_ref(record, "file")?;
    let line = field_int(record, "line")?;
    Some(Subprogram {
        name,
        file_ref,
        line,
    })
}

/// Project-relative path of a `!DIFile` record.
fn difile_path(record: &str, project_root: &Path) -> Option<String> {
    let filename = field_str(record, "filename")?;
    let directory = field_str(record, "directory").unwrap_or_default();
    let full = if Path::new(&filename).is_absolute() || directory.is_empty() {
        std::path::PathBuf::from(&filename)
    } else {
        Path::new(&directory).join(&filename)
    };
    let relative = match full.strip_prefix(project_root) {
        Ok(p) => p.to_path_buf(),
        // Compiled elsewhere: a relative filename is already what the
        // compiler saw from the project root.
        Err(_) if Path::new(&filename).is_relative() => filename.into(),
        Err(_) => full,
    };
    Some(relative.to_string_lossy().replace('\\', "/"))
}

fn field_str(record: &str, field: &str) -> Option<String> {
    let needle = format!("{field}: \"");
    let start = record.find(&needle)? + needle.len();
    record[start..].split('"').next().map(str::to_string)
}

fn field_ref(record: &str, field: &str) -> Option<String> {
    let needle = format!("{field}: !");
    let start = record.find(&needle)? + needle.len();
    let num: String = record[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if num.is_empty() {
        None
    } else {
        Some(format!("!{num}"))
    }
}

fn field_int(record: &str, field: &str) -> Option<i64> {
    let needle = format!("{field}: ");
    let start = record.find(&needle)? + needle.len();
    let num: String = record[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    num.parse().ok()
}

/// Capture a function body: from `start_line` (1-based) through the
/// closing brace matching the first opening brace. The scan is aware of
/// line and block comments, string literals, and character literals.
pub fn capture_body(source: &str, start_line: usize) -> Option<(String, usize)> {
    let lines: Vec<&str> = source.lines().collect();
    if start_line == 0 || start_line > lines.len() {
        return None;
    }

    let mut depth: i64 = 0;
    let mut seen_open = false;
    let mut in_block_comment = false;

    for (offset, line) in lines[start_line - 1..].iter().enumerate() {
        let mut chars = line.chars().peekable();
        let mut in_string = false;
        let mut in_char = false;
        while let Some(c) = chars.next() {
            if in_block_comment {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    in_block_comment = false;
                }
                continue;
            }
            if in_string {
                match c {
                    '\\' => {
                        chars.next();
                    }
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            if in_char {
                match c {
                    '\\' => {
                        chars.next();
                    }
                    '\'' => in_char = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '/' if chars.peek() == Some(&'/') => break,
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    in_block_comment = true;
                }
                '"' => in_string = true,
                '\'' => in_char = true,
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => {
                    depth -= 1;
                    if seen_open && depth == 0 {
                        let end_line = start_line + offset;
                        let body = lines[start_line - 1..end_line].join("\n");
                        return Some((body, end_line));
                    }
                }
                _ => {}
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LL: &str = r#"
; ModuleID = 'library.bc'
source_filename = "llvm-link"

define dso_local i32 @png_read(ptr %0, i64 %1) #0 !dbg !10 {
  ret i32 0
}

define internal void @png_helper.1() #0 !dbg !20 {
  ret void
}

define void @no_debug_info() #0 {
  ret void
}

!10 = distinct !DISubprogram(name: "png_read", scope: !5, file: !5, line: 3, type: !11, unit: !4)
!20 = distinct !DISubprogram(name: "png_helper", linkageName: "png_helper.1", scope: !5, file: !6, line: 8, type: !11, unit: !4)
!5 = !DIFile(filename: "src/read.c", directory: "/work/libdemo")
!6 = !DIFile(filename: "/work/libdemo/src/help.c", directory: "/work/libdemo")
"#;

    #[test]
    fn extracts_defines_joined_with_subprograms() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/read.c"),
            "#include <stdio.h>\n\nint png_read(char *buf, long n)\n{\n    return 0; /* } in comment */\n}\n",
        )
        .unwrap();
        // src/help.c intentionally absent: metadata still extracted,
        // content stays empty.

        // Pretend the project root is the DIFile directory.
        let metas = extract(SAMPLE_LL, Path::new("/work/libdemo"));
        assert_eq!(metas.len(), 2, "the define without !dbg is skipped");

        let read = &metas[0];
        assert_eq!(read.ir_name, "png_read");
        assert_eq!(read.original_name, "png_read");
        assert_eq!(read.file_path, "src/read.c");
        assert_eq!(read.start_line, 3);

        let helper = &metas[1];
        assert_eq!(helper.ir_name, "png_helper.1");
        assert_eq!(helper.original_name, "png_helper");
        assert_eq!(helper.file_path, "src/help.c");
        assert_eq!(helper.start_line, 8);
        assert!(helper.content.is_none());

        // With the real tree in place the body is attached.
        let metas = extract(SAMPLE_LL, dir.path());
        let read = metas.iter().find(|m| m.ir_name == "png_read").unwrap();
        let body = read.content.as_deref().unwrap();
        assert!(body.starts_with("int png_read"));
        assert!(body.ends_with('}'));
        assert_eq!(read.end_line, Some(6));
    }

    #[test]
    fn body_capture_matches_braces() {
        let source = "int f(void)\n{\n    if (x) { y(); }\n    return \"}\"[0];\n}\nint g(void) { return 1; }\n";
        let (body, end) = capture_body(source, 1).unwrap();
        assert_eq!(end, 5);
        assert!(body.ends_with('}'));
        assert!(!body.contains("int g"));

        let (body, end) = capture_body(source, 6).unwrap();
        assert_eq!(end, 6);
        assert_eq!(body, "int g(void) { return 1; }");
    }

    #[test]
    fn body_capture_ignores_commented_braces() {
        let source = "int f(void)\n{\n    // stray }\n    /* { */\n    return 0;\n}\n";
        let (_, end) = capture_body(source, 1).unwrap();
        assert_eq!(end, 6);
    }

    #[test]
    fn body_capture_out_of_range() {
        assert!(capture_body("int x;\n", 99).is_none());
        assert!(capture_body("", 1).is_none());
    }

    #[test]
    fn quoted_symbol_names_parse() {
        let (name, dbg) =
            parse_define("define void @\"weird name\"() !dbg !7 {").unwrap();
        assert_eq!(name, "weird name");
        assert_eq!(dbg, "!7");
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fg_core::{Error, ProjectInfo, Result};

/// Directories never scanned for sources.
const EXCLUDED_DIRS: &[&str] = &["vendor", "third_party", "build", ".git"];

/// Implementation-file extensions considered for language classification.
const LANGUAGE_EXTS: &[(&str, &str)] = &[
    ("c", "c"),
    ("cc", "c++"),
    ("cpp", "c++"),
    ("cxx", "c++"),
    ("go", "go"),
    ("rs", "rust"),
    ("py", "python"),
    ("java", "java"),
    ("js", "javascript"),
    ("ts", "javascript"),
];

/// Header extensions: listed among sources, ignored for classification.
const HEADER_EXTS: &[&str] = &["h", "hh", "hpp", "hxx"];

/// Classify a project working tree: primary language, build system,
/// source file census, capability hints, and git state.
///
/// Pure function of the filesystem. Never fails on ambiguity — an
/// unrecognized layout probes as `build_system = "unknown"`.
pub fn probe(project_root: &Path, diff_files: Option<Vec<String>>) -> Result<ProjectInfo> {
    if !project_root.is_dir() {
        return Err(Error::Probe(format!(
            "project root {} is not a readable directory",
            project_root.display()
        )));
    }

    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let mut source_files = Vec::new();
    walk(project_root, project_root, &mut counts, &mut source_files)?;
    source_files.sort();

    let language = counts
        .iter()
        .map(|(lang, count)| (*count, *lang))
        .max_by_key(|&(count, lang)| (count, std::cmp::Reverse(lang)))
        .map(|(_, lang)| lang.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Ok(ProjectInfo {
        language,
        build_system: detect_build_system(project_root),
        source_files,
        diff_files,
        has_compile_commands: project_root.join("compile_commands.json").is_file()
            || project_root.join("build/compile_commands.json").is_file(),
        has_clang_config: project_root.join(".clang-format").is_file()
            || project_root.join(".clangd").is_file(),
        git_commit: read_git_commit(project_root),
    })
}

fn walk(
    root: &Path,
    dir: &Path,
    counts: &mut HashMap<&'static str, usize>,
    source_files: &mut Vec<String>,
) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Probe(format!("cannot read {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Probe(e.to_string()))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if EXCLUDED_DIRS.contains(&name.as_str()) || name.starts_with('.') {
                continue;
            }
            walk(root, &path, counts, source_files)?;
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        let is_header = HEADER_EXTS.contains(&ext.as_str());
        let lang = LANGUAGE_EXTS
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, lang)| *lang);
        if let Some(lang) = lang {
            *counts.entry(lang).or_default() += 1;
        }
        if lang.is_some() || is_header {
            if let Ok(rel) = path.strip_prefix(root) {
                source_files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

/// Marker files checked in priority order.
fn detect_build_system(root: &Path) -> String {
    let markers: &[(&[&str], &str)] = &[
        (&["CMakeLists.txt"], "cmake"),
        (&["configure", "configure.ac"], "autotools"),
        (&["meson.build"], "meson"),
        (&["build.sh"], "custom_script"),
        (&["Makefile", "makefile", "GNUmakefile"], "make"),
        (&["Cargo.toml"], "cargo"),
        (&["go.mod"], "go"),
        (&["package.json"], "npm"),
        (&["setup.py", "pyproject.toml"], "python"),
    ];
    for (files, tag) in markers {
        if files.iter().any(|f| root.join(f).is_file()) {
            return tag.to_string();
        }
    }
    "unknown".to_string()
}

/// Resolve HEAD to a commit hash when the tree is a git checkout.
fn read_git_commit(root: &Path) -> Option<String> {
    let head = std::fs::read_to_string(root.join(".git/HEAD")).ok()?;
    let head = head.trim();
    if let Some(reference) = head.strip_prefix("ref: ") {
        let resolved = std::fs::read_to_string(root.join(".git").join(reference)).ok()?;
        return Some(resolved.trim().to_string());
    }
    Some(head.to_string())
}

/// Absolute path of a project-relative file, refusing traversal outside
/// the root.
pub fn resolve_in_project(root: &Path, relative: &str) -> Result<PathBuf> {
    if Path::new(relative).is_absolute() || relative.split('/').any(|seg| seg == "..") {
        return Err(Error::Input(format!(
            "path {relative} must be project-relative"
        )));
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn classifies_c_project_with_cmake() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "CMakeLists.txt");
        touch(dir.path(), "src/a.c");
        touch(dir.path(), "src/b.c");
        touch(dir.path(), "src/util.h");
        touch(dir.path(), "tools/gen.py");
        // Excluded trees never count.
        touch(dir.path(), "vendor/lib.cpp");
        touch(dir.path(), "build/gen.c");

        let info = probe(dir.path(), None).unwrap();
        assert_eq!(info.language, "c");
        assert_eq!(info.build_system, "cmake");
        assert!(info.source_files.contains(&"src/a.c".to_string()));
        assert!(info.source_files.contains(&"src/util.h".to_string()));
        assert!(!info.source_files.iter().any(|f| f.starts_with("vendor/")));
    }

    #[test]
    fn autotools_beats_make() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "configure.ac");
        touch(dir.path(), "Makefile");
        touch(dir.path(), "lib/x.cc");

        let info = probe(dir.path(), None).unwrap();
        assert_eq!(info.build_system, "autotools");
        assert_eq!(info.language, "c++");
    }

    #[test]
    fn unknown_build_system_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "notes.txt");
        let info = probe(dir.path(), None).unwrap();
        assert_eq!(info.build_system, "unknown");
        assert_eq!(info.language, "unknown");
        assert!(info.source_files.is_empty());
    }

    #[test]
    fn missing_root_is_probe_error() {
        let err = probe(Path::new("/nonexistent/fg-probe"), None).unwrap_err();
        assert!(matches!(err, Error::Probe(_)));
    }

    #[test]
    fn capability_hints_detected() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "compile_commands.json");
        touch(dir.path(), ".clang-format");
        touch(dir.path(), "m.c");
        let info = probe(dir.path(), None).unwrap();
        assert!(info.has_compile_commands);
        assert!(info.has_clang_config);
    }

    #[test]
    fn diff_files_carried_through() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.c");
        let info = probe(dir.path(), Some(vec!["a.c".to_string()])).unwrap();
        assert_eq!(info.diff_files, Some(vec!["a.c".to_string()]));
    }

    #[test]
    fn project_relative_paths_only() {
        let root = Path::new("/proj");
        assert!(resolve_in_project(root, "fuzz/h.c").is_ok());
        assert!(resolve_in_project(root, "/etc/passwd").is_err());
        assert!(resolve_in_project(root, "../escape.c").is_err());
    }
}

pub mod debug_meta;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fg_core::{BuildCommand, Error, FunctionMeta, Phase, Result, SnapshotId};

use crate::executor::{run_command, run_shell, CommandStatus};
use crate::logsink::LogSink;

/// Result of the bitcode phase: the whole-program library bitcode, its
/// textual form, and per-function debug metadata.
#[derive(Debug, Clone)]
pub struct BitcodeOutput {
    pub bc_path: PathBuf,
    pub ll_path: PathBuf,
    pub function_metas: Vec<FunctionMeta>,
}

/// Produces library-only whole-program bitcode.
///
/// The target's native build runs unchanged behind compiler wrappers
/// that force debug info; static-archive outputs are gathered into
/// per-archive bitcode blobs; blobs belonging to declared harness
/// translation units are dropped so same-named fuzz entry symbols never
/// collide at link time.
pub struct BitcodeBuilder {
    build_timeout: Duration,
}

impl BitcodeBuilder {
    pub fn new(build_timeout: Duration) -> Self {
        Self { build_timeout }
    }

    /// Run the full bitcode phase inside `workspace` (a per-build-unique
    /// scratch directory).
    pub async fn build(
        &self,
        project_root: &Path,
        workspace: &Path,
        build_cmd: &BuildCommand,
        harness_sources: &[String],
        logs: &LogSink,
        snapshot_id: SnapshotId,
    ) -> Result<BitcodeOutput> {
        self.check_toolchain(workspace).await?;

        let wrappers = install_wrappers(workspace).await?;
        let mut env = HashMap::new();
        env.insert("CC".to_string(), wrappers.cc.display().to_string());
        env.insert("CXX".to_string(), wrappers.cxx.display().to_string());

        for command in &build_cmd.commands {
            logs.append(snapshot_id, Phase::Bitcode, &format!("$ {command}"))
                .await?;
            let out = run_shell(command, project_root, self.build_timeout, &env).await;
            if !out.success() {
                logs.append(snapshot_id, Phase::Bitcode, &out.stderr_tail(40))
                    .await?;
                return Err(Error::Build(format!(
                    "build command {command:?} failed: {}",
                    out.stderr_tail(5)
                )));
            }
        }

        let blob_dir = workspace.join("bitcode");
        tokio::fs::create_dir_all(&blob_dir).await?;
        let archives = find_static_archives(project_root)?;
        logs.append(
            snapshot_id,
            Phase::Bitcode,
            &format!("found {} static archives", archives.len()),
        )
        .await?;

        let mut blobs = Vec::new();
        for archive in &archives {
            let blob_name = format!(
                "{}.bc",
                archive.file_name().and_then(|n| n.to_str()).unwrap_or("lib.a")
            );
            let blob_path = blob_dir.join(&blob_name);
            if blob_path.exists() {
                // The same archive name can surface from both the build
                // tree and an install prefix; one blob is enough.
                continue;
            }
            let out = run_command(
                "get-bc",
                &["-b", "-o", &blob_path.display().to_string(), &archive.display().to_string()],
                project_root,
                self.build_timeout,
                &env,
            )
            .await;
            if !out.success() {
                logs.append(snapshot_id, Phase::Bitcode, &out.stderr_tail(20))
                    .await?;
                return Err(Error::Build(format!(
                    "get-bc failed on {}: {}",
                    archive.display(),
                    out.stderr_tail(3)
                )));
            }
            blobs.push(blob_path);
        }

        let retained = exclude_harness_blobs(&blobs, harness_sources);
        let dropped = blobs.len() - retained.len();
        if dropped > 0 {
            logs.append(
                snapshot_id,
                Phase::Bitcode,
                &format!("excluded {dropped} harness bitcode blobs"),
            )
            .await?;
        }
        if retained.is_empty() {
            return Err(Error::Build(
                "no library bitcode remains after harness exclusion; \
                 the build produced no static archives"
                    .to_string(),
            ));
        }

        let bc_path = workspace.join("library.bc");
        if retained.len() == 1 {
            tokio::fs::copy(&retained[0], &bc_path).await?;
        } else {
            let mut args: Vec<String> =
                vec!["-o".to_string(), bc_path.display().to_string()];
            args.extend(retained.iter().map(|p| p.display().to_string()));
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let out = run_command(
                "llvm-link",
                &arg_refs,
                workspace,
                self.build_timeout,
                &env,
            )
            .await;
            if !out.success() {
                logs.append(snapshot_id, Phase::Bitcode, &out.stderr_tail(20))
                    .await?;
                return Err(Error::Build(format!(
                    "llvm-link failed: {}",
                    out.stderr_tail(3)
                )));
            }
        }

        let ll_path = workspace.join("library.ll");
        let out = run_command(
            "llvm-dis",
            &[
                &bc_path.display().to_string(),
                "-o",
                &ll_path.display().to_string(),
            ],
            workspace,
            self.build_timeout,
            &env,
        )
        .await;
        if !out.success() {
            logs.append(snapshot_id, Phase::Bitcode, &out.stderr_tail(20))
                .await?;
            return Err(Error::Build(format!(
                "llvm-dis failed: {}",
                out.stderr_tail(3)
            )));
        }

        let ll_text = tokio::fs::read_to_string(&ll_path).await?;
        let function_metas = debug_meta::extract(&ll_text, project_root);
        logs.append(
            snapshot_id,
            Phase::Bitcode,
            &format!("extracted debug metadata for {} functions", function_metas.len()),
        )
        .await?;

        Ok(BitcodeOutput {
            bc_path,
            ll_path,
            function_metas,
        })
    }

    /// The compiler driver and the whole-program linker must agree on
    /// their LLVM major version; skew between them is a common and
    /// confusing link-failure cause, so it is rejected up front.
    async fn check_toolchain(&self, workspace: &Path) -> Result<()> {
        let env = HashMap::new();
        let clang = run_command("clang", &["--version"], workspace, Duration::from_secs(30), &env)
            .await;
        if clang.status != CommandStatus::Success {
            return Err(Error::Build(format!(
                "clang is not available: {}",
                clang.stderr_tail(2)
            )));
        }
        let link = run_command(
            "llvm-link",
            &["--version"],
            workspace,
            Duration::from_secs(30),
            &env,
        )
        .await;
        if link.status != CommandStatus::Success {
            return Err(Error::Build(format!(
                "llvm-link is not available: {}",
                link.stderr_tail(2)
            )));
        }
        match (
            parse_major_version(&clang.stdout),
            parse_major_version(&link.stdout),
        ) {
            (Some(c), Some(l)) if c != l => Err(Error::Build(format!(
                "toolchain version skew: clang {c} vs llvm-link {l}"
            ))),
            _ => Ok(()),
        }
    }
}

struct Wrappers {
    cc: PathBuf,
    cxx: PathBuf,
}

/// Write thin wrapper scripts that forward to the bitcode-capturing
/// driver with debug info forced on. The flag is idempotent in the
/// underlying compiler, so builds that already pass `-g` are unchanged.
async fn install_wrappers(workspace: &Path) -> Result<Wrappers> {
    let dir = workspace.join("wrappers");
    tokio::fs::create_dir_all(&dir).await?;
    let cc = dir.join("fg-cc");
    let cxx = dir.join("fg-cxx");
    tokio::fs::write(&cc, "#!/bin/sh\nexec gclang -g \"$@\"\n").await?;
    tokio::fs::write(&cxx, "#!/bin/sh\nexec gclang++ -g \"$@\"\n").await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for path in [&cc, &cxx] {
            let mut perms = tokio::fs::metadata(path).await?.permissions();
            perms.set_mode(0o755);
            tokio::fs::set_permissions(path, perms).await?;
        }
    }
    Ok(Wrappers { cc, cxx })
}

/// Every `*.a` under the project tree, excluding VCS internals.
fn find_static_archives(root: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| Error::Build(format!("cannot scan {}: {e}", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::Build(e.to_string()))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if name != ".git" {
                    stack.push(path);
                }
            } else if name.ends_with(".a") {
                archives.push(path);
            }
        }
    }
    archives.sort();
    Ok(archives)
}

/// Drop blobs that belong to declared harness translation units.
///
/// Matching is by basename: the harness source's basename, with its
/// extension mapped to the expected bitcode suffixes, against the blob's
/// file name.
fn exclude_harness_blobs(blobs: &[PathBuf], harness_sources: &[String]) -> Vec<PathBuf> {
    let excluded: Vec<String> = harness_sources
        .iter()
        .flat_map(|src| harness_blob_names(src))
        .collect();
    blobs
        .iter()
        .filter(|blob| {
            let name = blob
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            !excluded.iter().any(|ex| ex == name)
        })
        .cloned()
        .collect()
}

/// Candidate blob file names a harness source could have produced.
fn harness_blob_names(source: &str) -> Vec<String> {
    let basename = source.rsplit('/').next().unwrap_or(source);
    let stem = basename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(basename);
    vec![
        format!("{basename}.bc"),
        format!("{basename}.o.bc"),
        format!("{stem}.bc"),
        format!("{stem}.o.bc"),
        format!("{stem}.a.bc"),
    ]
}

fn parse_major_version(version_output: &str) -> Option<u32> {
    // Both `clang --version` and `llvm-link --version` print a line
    // containing "version <major>.<minor>.<patch>".
    for line in version_output.lines() {
        if let Some(idx) = line.find("version ") {
            let rest = &line[idx + "version ".len()..];
            let major: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(v) = major.parse::<u32>() {
                return Some(v);
            }
        }
    }
    None
}

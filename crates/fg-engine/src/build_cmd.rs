use fg_core::{BuildCommand, BuildCommandSource, Error, ProjectInfo, Result};

/// Two-tier build-command resolution: a user-provided script runs
/// verbatim; otherwise the probed build system maps to its canonical
/// command sequence. A third tier reading project documentation is a
/// declared future extension.
pub fn resolve_build_command(
    info: &ProjectInfo,
    build_script: Option<&str>,
) -> Result<BuildCommand> {
    if let Some(script) = build_script {
        return Ok(BuildCommand {
            commands: vec![format!("sh {script}")],
            build_system: info.build_system.clone(),
            source: BuildCommandSource::User,
            confidence: 1.0,
        });
    }

    let commands: Vec<String> = match info.build_system.as_str() {
        "cmake" => vec![
            "cmake -S . -B fg-build -DCMAKE_BUILD_TYPE=RelWithDebInfo".to_string(),
            "cmake --build fg-build -j".to_string(),
        ],
        "autotools" => vec![
            "test -x ./configure || autoreconf -fi".to_string(),
            "./configure".to_string(),
            "make -j".to_string(),
        ],
        "meson" => vec![
            "meson setup fg-build".to_string(),
            "ninja -C fg-build".to_string(),
        ],
        "custom_script" => vec!["sh ./build.sh".to_string()],
        "make" => vec!["make -j".to_string()],
        other => {
            return Err(Error::BuildCommand(format!(
                "no canonical build command for build system {other:?}; \
                 provide a build script"
            )));
        }
    };

    Ok(BuildCommand {
        commands,
        build_system: info.build_system.clone(),
        source: BuildCommandSource::AutoDetect,
        confidence: 0.8,
    })
}

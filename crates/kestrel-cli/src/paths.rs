//! Host path handling for local builds.

use kestrel_core::Result;
use std::path::Path;

/// Leading volume designator of a Windows-style path: a drive (`C:`) or
/// a UNC share (`\\host\share`). Empty when the path has neither.
pub fn volume_name(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return &path[..2];
    }

    let is_sep = |b: u8| b == b'\\' || b == b'/';
    if bytes.len() > 2 && is_sep(bytes[0]) && is_sep(bytes[1]) && !is_sep(bytes[2]) {
        let host_end = match bytes[2..].iter().position(|&b| is_sep(b)) {
            Some(n) => n + 2,
            None => return "",
        };
        let share_start = host_end + 1;
        if share_start >= bytes.len() || is_sep(bytes[share_start]) {
            return "";
        }
        let share_end = bytes[share_start..]
            .iter()
            .position(|&b| is_sep(b))
            .map_or(bytes.len(), |n| n + share_start);
        return &path[..share_end];
    }
    ""
}

/// Rewrite a Windows path into the form Docker accepts for bind mounts.
///
/// `C:\Users\dev` becomes `/c/Users/dev`; any other path only has its
/// separators turned into forward slashes.
pub fn convert_path_for_windows(path: &str) -> String {
    let volume = volume_name(path);
    if volume.len() == 2 {
        let drive = volume.trim_end_matches(':').to_lowercase();
        let rest = path[volume.len()..].replace('\\', "/");
        return format!("/{}{}", drive, rest);
    }
    path.replace('\\', "/")
}

/// Join container paths with forward slashes.
pub fn join(base: &str, path: &str) -> String {
    match (base.trim_end_matches('/'), path.trim_matches('/')) {
        (base, "") => base.to_string(),
        ("", path) => format!("/{}", path),
        (base, path) => format!("{}/{}", base, path),
    }
}

/// Absolute directory holding the pipeline file, in bind-mount form.
pub fn source_dir(file: &Path) -> Result<String> {
    let parent = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let dir = std::path::absolute(parent)?;
    let dir = dir.to_string_lossy();
    Ok(if cfg!(windows) {
        convert_path_for_windows(&dir)
    } else {
        dir.into_owned()
    })
}

/// Mounts for a local build: the shared workspace volume and the source
/// directory bound into the workspace path.
pub fn local_volumes(prefix: &str, base: &str, path: &str, dir: &str) -> [String; 2] {
    [
        format!("{}_default:{}", prefix, base),
        format!("{}:{}", dir, join(base, path)),
    ]
}

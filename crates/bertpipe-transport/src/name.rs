use std::path::{Path, PathBuf};

/// Resolve a channel name to the filesystem path of its pipe.
///
/// A name that already contains a path separator is used as-is. A bare name
/// such as `bert-1234` lands in `$XDG_RUNTIME_DIR` (or the system temp dir)
/// as `bert-1234.sock`.
pub fn pipe_path(name: &str) -> PathBuf {
    if name.contains(std::path::MAIN_SEPARATOR) || Path::new(name).is_absolute() {
        return PathBuf::from(name);
    }
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(std::env::temp_dir);
    dir.join(format!("{name}.sock"))
}

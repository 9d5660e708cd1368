//! Cross-platform permission helpers.
//!
//! On Unix the permission bits recorded in the index are the lower twelve bits
//! of `st_mode`. Elsewhere no bits are recorded and applying them is a no-op,
//! so an index built on Unix can still be restored (without modes) on Windows.

use std::fs::Metadata;
use std::io;
use std::path::Path;

/// Mask applied to `st_mode` before it is stored.
pub const PERMISSION_MASK: u32 = 0o7777;

#[cfg(unix)]
/// Permission bits of a file, or `None` on platforms without POSIX modes.
pub fn permission_bits(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & PERMISSION_MASK)
}

#[cfg(not(unix))]
pub fn permission_bits(_metadata: &Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & PERMISSION_MASK))
}

#[cfg(not(unix))]
/// No-op on Windows: POSIX permission bits are not preserved.
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// True when `err` is the "too many levels of symbolic links" error.
pub fn is_symlink_loop(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ELOOP)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn applied_bits_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        set_unix_permissions(&path, 0o100640).unwrap();
        let md = std::fs::metadata(&path).unwrap();
        assert_eq!(permission_bits(&md), Some(0o640));
    }
}

//! Passwd lookups and file ownership helpers.
//!
//! Thin wrappers over libc for the best-effort hardening steps the queue
//! performs after creating or relocating a record+payload pair.

use std::ffi::CString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::ptr;

use tracing::debug;

use crate::error::{Result, SpoolError};

/// Resolved uid/gid for a user name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIds {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

/// Look up a user in the passwd database.
///
/// Fails with [`SpoolError::UnknownUser`] when the name does not resolve.
pub fn lookup_user(user: &str) -> Result<UserIds> {
    let name = CString::new(user)
        .map_err(|_| SpoolError::UnknownUser(user.to_string()))?;

    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0_u8; passwd_buffer_size()];
    let mut found: *mut libc::passwd = ptr::null_mut();

    // SAFETY: all pointers are valid for the duration of the call and the
    // buffer outlives `pwd`'s string fields, which we never read.
    let rc = unsafe {
        libc::getpwnam_r(
            name.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr().cast::<libc::c_char>(),
            buf.len(),
            &mut found,
        )
    };
    if rc != 0 || found.is_null() {
        return Err(SpoolError::UnknownUser(user.to_string()));
    }
    Ok(UserIds {
        uid: pwd.pw_uid,
        gid: pwd.pw_gid,
    })
}

/// Name of the user this process runs as, from the passwd database.
pub fn current_user_name() -> Result<String> {
    // SAFETY: geteuid cannot fail.
    let uid = unsafe { libc::geteuid() };

    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0_u8; passwd_buffer_size()];
    let mut found: *mut libc::passwd = ptr::null_mut();

    // SAFETY: see lookup_user; pw_name is read while `buf` is still live.
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr().cast::<libc::c_char>(),
            buf.len(),
            &mut found,
        )
    };
    if rc != 0 || found.is_null() {
        return Err(SpoolError::UnknownUser(format!("uid {uid}")));
    }
    // SAFETY: on success pw_name points into `buf`, NUL-terminated.
    let name = unsafe { std::ffi::CStr::from_ptr(pwd.pw_name) };
    Ok(name.to_string_lossy().into_owned())
}

/// Whether this process may change file ownership.
pub fn is_privileged() -> bool {
    // SAFETY: geteuid cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Whether this process can write `path` right now.
///
/// `access(2)` with `W_OK`; a missing file answers false, matching the
/// "gone or not ours" classification the queue needs.
pub fn is_writable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: cpath is a valid NUL-terminated path for the call duration.
    unsafe { libc::access(cpath.as_ptr(), libc::W_OK) == 0 }
}

/// Restrict `files` to the owning user.
///
/// Always chmods to `mode` (normally 0600). Ownership is transferred only
/// when running as root; otherwise the files keep their current owner.
/// This is a best-effort hardening step, not a correctness requirement of
/// the queue.
pub fn set_protection(user: &str, mode: u32, files: &[&Path]) -> Result<()> {
    let ids = lookup_user(user)?;
    let privileged = is_privileged();

    for file in files {
        fs::set_permissions(file, fs::Permissions::from_mode(mode))
            .map_err(|e| SpoolError::io(format!("chmod {}", file.display()), e))?;
        if privileged {
            chown(file, ids)?;
        } else {
            debug!(file = %file.display(), "not running as root, leaving ownership unchanged");
        }
    }
    Ok(())
}

/// Create `dir` with mode 0700, owned by `user` when privileged.
///
/// Existing directories are left untouched.
pub fn make_user_dir(user: &str, dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.exists() {
        return Ok(());
    }
    let ids = lookup_user(user)?;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| SpoolError::io(format!("creating directory {}", dir.display()), e))?;
    if is_privileged() {
        chown(dir, ids)?;
    }
    Ok(())
}

fn passwd_buffer_size() -> usize {
    // SAFETY: sysconf is always callable; -1 means "no limit configured".
    let suggested = unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) };
    if suggested > 0 {
        suggested as usize
    } else {
        4096
    }
}

fn chown(path: &Path, ids: UserIds) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SpoolError::io(
            format!("chown {}", path.display()),
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        ))?;
    // SAFETY: cpath is a valid NUL-terminated path for the call duration.
    let rc = unsafe { libc::chown(cpath.as_ptr(), ids.uid, ids.gid) };
    if rc != 0 {
        return Err(SpoolError::io(
            format!("chown {}", path.display()),
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

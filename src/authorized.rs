/// Local authorized_keys handling: home lookup, existing entries, merge,
/// and output formatting
use crate::error::{KeygateError, KeygateResult};
use crate::keys::KeySet;
use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Upper bound for the getpwnam_r scratch buffer
const MAX_PWBUF: usize = 1 << 17;

/// Resolve a local account's home directory via the passwd database
pub fn home_dir_for(account: &str) -> KeygateResult<PathBuf> {
    let name = CString::new(account).map_err(|_| {
        KeygateError::AccountLookup(format!("invalid account name {:?}", account))
    })?;

    let mut buf = vec![0_u8; 1024];
    loop {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf.len() < MAX_PWBUF {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return Err(KeygateError::AccountLookup(format!(
                "unknown account {:?}",
                account
            )));
        }

        let home = unsafe { CStr::from_ptr(pwd.pw_dir) }
            .to_string_lossy()
            .into_owned();
        if home.is_empty() {
            return Err(KeygateError::AccountLookup(format!(
                "account {:?} has no home directory",
                account
            )));
        }
        return Ok(PathBuf::from(home));
    }
}

/// Reader for an account's pre-existing authorized_keys entries
#[derive(Debug, Clone)]
pub struct AuthorizedKeys {
    path: PathBuf,
}

impl AuthorizedKeys {
    /// Locate the authorized_keys file for a local account
    pub fn for_account(account: &str) -> KeygateResult<Self> {
        let home = home_dir_for(account)?;
        Ok(Self {
            path: home.join(".ssh").join("authorized_keys"),
        })
    }

    /// Use an explicit file path (tests and the $HOME fallback)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read existing key lines, preserving order.
    ///
    /// A missing file is an empty list, not an error; `#` comments and blank
    /// lines are stripped.
    pub async fn read_existing(&self) -> KeygateResult<Vec<String>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KeygateError::Io(e)),
        };

        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}

/// Merge resolved keys with pre-existing local entries.
///
/// Local entries fold in first, so their original line text — custom
/// comments and options included — wins when the resolved set carries the
/// same algorithm+blob.
pub fn merge(resolved: &[String], existing: &[String]) -> Vec<String> {
    let mut set = KeySet::new();
    for line in existing {
        set.insert(line);
    }
    for line in resolved {
        set.insert(line);
    }
    set.into_lines()
}

/// Format merged lines for the sshd authorization stream: one key per line
/// with a single trailing newline. An empty set renders as an empty string.
pub fn format_keys(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

use std::fmt::Write;

use super::{BackendKind, Result, SandboxError};

/// Number of random hex characters after the backend prefix.
const ID_HEX_LEN: usize = 12;

/// Lowercase hex of `bytes` random bytes from the OS.
pub(crate) fn random_hex(bytes: usize) -> std::result::Result<String, getrandom::Error> {
    let mut buf = vec![0u8; bytes];
    getrandom::fill(&mut buf)?;
    let mut out = String::with_capacity(bytes * 2);
    for b in buf {
        let _ = write!(out, "{b:02x}");
    }
    Ok(out)
}

/// Mint a fresh id such as `sbx_tmx_3f9a0c1d2e4b`.
///
/// Uniqueness against live sandboxes is the caller's job; see
/// [`unused_sandbox_id`].
pub(crate) fn new_sandbox_id(kind: BackendKind) -> Result<String> {
    let hex = random_hex(ID_HEX_LEN / 2)
        .map_err(|e| SandboxError::Creation(format!("random source unavailable: {e}")))?;
    Ok(format!("{}{}", kind.id_prefix(), hex))
}

/// Mint ids until `taken` rejects none, giving up after a few tries.
pub(crate) fn unused_sandbox_id(
    kind: BackendKind,
    mut taken: impl FnMut(&str) -> Result<bool>,
) -> Result<String> {
    for _ in 0..8 {
        let id = new_sandbox_id(kind)?;
        if !taken(&id)? {
            return Ok(id);
        }
        tracing::debug!(sandbox_id = %id, "sandbox:id collision, regenerating");
    }
    Err(SandboxError::Creation(
        "could not allocate an unused sandbox id".to_string(),
    ))
}

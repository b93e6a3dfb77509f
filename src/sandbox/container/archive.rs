//! Single-file tar streams for `cp` to and from a container.

use anyhow::{Result, bail};
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

/// A tar stream holding one regular file `name` (mode 0644, mtime now).
pub fn pack_single_file(name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, data)?;
    Ok(builder.into_inner()?)
}

/// Contents of the first entry of `archive`, which must be a regular file.
pub fn unpack_single_file(archive: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(archive);
    let Some(entry) = archive.entries()?.next() else {
        bail!("archive is empty");
    };
    let mut entry = entry?;

    let kind = entry.header().entry_type();
    if kind.is_dir() {
        bail!("is a directory");
    }
    if kind.is_symlink() || kind.is_hard_link() {
        bail!("is a link");
    }

    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    Ok(data)
}

//! Tar export and import of indexed packages.
//!
//! An archive holds `index.json`, an index document listing the exported
//! names, followed by the `<file_ref>.zip` and `<file_ref>.json` pair of
//! every referenced package.

use crate::index::{IndexDocument, IndexStore, LocalIndex};
use artisan_core::{
    Error, Package, PackageName, Result, Seal, SealVerifier, json, validate_file_ref,
};
use chrono::Utc;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Component, Path};
use tracing::{debug, info};

/// Name of the index entry inside an archive.
pub const INDEX_ENTRY: &str = "index.json";

const ARCHIVE: &str = "<archive>";

/// Write the packages `names` resolve to into a tar stream.
///
/// Only the listed tags are exported. Returns the writer once the archive
/// is finished.
///
/// # Errors
/// Returns [`Error::NotFound`] if a name does not resolve, or IO errors.
pub fn export<S: IndexStore, W: Write>(
    index: &LocalIndex<S>,
    names: &[PackageName],
    writer: W,
) -> Result<W> {
    let mut doc = IndexDocument::default();
    let mut file_refs = BTreeSet::new();
    for name in names {
        let package = index
            .find(name)
            .ok_or_else(|| Error::not_found(format!("package {name}")))?;
        let repo = doc.repository_or_create(&name.fully_qualified_name());
        match repo.find_by_id_mut(&package.id) {
            Some(existing) => {
                existing.add_tag(name.tag());
            }
            None => repo.packages.push(package.tag_only_copy(name.tag())),
        }
        file_refs.insert(package.file_ref.clone());
    }

    let mut builder = tar::Builder::new(writer);
    append_bytes(&mut builder, INDEX_ENTRY, json::to_json_pretty(&doc)?.as_bytes())?;
    for file_ref in &file_refs {
        let home = index.home();
        for (path, entry) in [
            (home.content_path(file_ref), format!("{file_ref}.zip")),
            (home.seal_path(file_ref), format!("{file_ref}.json")),
        ] {
            builder
                .append_path_with_name(&path, &entry)
                .map_err(|e| Error::io(&path, e))?;
        }
    }

    let writer = builder.into_inner().map_err(|e| Error::io(ARCHIVE, e))?;
    info!(packages = file_refs.len(), names = names.len(), "archive written");
    Ok(writer)
}

fn append_bytes<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(u64::try_from(Utc::now().timestamp()).unwrap_or_default());
    header.set_cksum();
    builder
        .append_data(&mut header, name, data)
        .map_err(|e| Error::io(name, e))
}

/// Entry name when it is a single plain file name.
fn plain_file_name(path: &Path) -> Option<String> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name.to_str().map(str::to_string),
        _ => None,
    }
}

/// Read an archive produced by [`export`] into `index`.
///
/// Content already stored locally is tagged instead of re-added; new
/// content is verified against its seal first. Returns the imported names.
///
/// # Errors
/// Returns [`Error::CorruptData`] for a malformed archive and
/// [`Error::Integrity`] when content does not match its seal.
pub fn import<S: IndexStore, R: Read>(
    index: &mut LocalIndex<S>,
    reader: R,
    verifier: &dyn SealVerifier,
) -> Result<Vec<String>> {
    let tmp = index.home().tmp_dir();
    std::fs::create_dir_all(&tmp).map_err(|e| Error::io(&tmp, e))?;
    let scratch = tempfile::tempdir_in(&tmp).map_err(|e| Error::io(&tmp, e))?;

    let mut archive = tar::Archive::new(reader);
    let mut doc: Option<IndexDocument> = None;
    for entry in archive.entries().map_err(|e| Error::io(ARCHIVE, e))? {
        let mut entry = entry.map_err(|e| Error::io(ARCHIVE, e))?;
        let path = entry.path().map_err(|e| Error::io(ARCHIVE, e))?.into_owned();
        let Some(file_name) = plain_file_name(&path) else {
            return Err(Error::CorruptData(format!(
                "unexpected archive entry '{}'",
                path.display()
            )));
        };

        if file_name == INDEX_ENTRY {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| Error::io(&path, e))?;
            doc = Some(json::from_json_strict(&bytes, "archive index")?);
        } else {
            let dest = scratch.path().join(&file_name);
            entry.unpack(&dest).map_err(|e| Error::io(&dest, e))?;
            debug!(entry = %file_name, "archive entry extracted");
        }
    }
    let doc = doc.ok_or_else(|| Error::CorruptData(format!("archive has no {INDEX_ENTRY}")))?;

    let mut imported = Vec::new();
    for repo in &doc.repositories {
        for package in &repo.packages {
            let mut stored = index.find_by_id(&package.id).cloned();
            for tag in &package.tags {
                let name = PackageName::parse(&format!("{}:{tag}", repo.repository))?;
                match &stored {
                    Some(existing) => index.link(existing, &name)?,
                    None => {
                        stored = Some(add_verified(index, scratch.path(), package, &name, verifier)?);
                    }
                }
                imported.push(name.to_string());
            }
        }
    }

    info!(count = imported.len(), "archive imported");
    Ok(imported)
}

fn add_verified<S: IndexStore>(
    index: &mut LocalIndex<S>,
    dir: &Path,
    package: &Package,
    name: &PackageName,
    verifier: &dyn SealVerifier,
) -> Result<Package> {
    validate_file_ref(&package.file_ref)?;
    let seal_path = dir.join(format!("{}.json", package.file_ref));
    let content_path = dir.join(format!("{}.zip", package.file_ref));
    let seal_bytes = std::fs::read(&seal_path).map_err(|e| Error::io(&seal_path, e))?;
    let seal = Seal::from_slice(&seal_bytes)?;
    let content = std::fs::read(&content_path).map_err(|e| Error::io(&content_path, e))?;

    verifier.verify(&seal, &content)?;
    let id = seal.package_id()?;
    if id != package.id {
        return Err(Error::Integrity(format!(
            "seal of {name} hashes to {id}, the archive lists {}",
            package.id
        )));
    }
    index.add(&content_path, name, &seal)
}

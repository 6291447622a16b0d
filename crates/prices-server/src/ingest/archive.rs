//! Zip archive access for uploaded price lists
//!
//! Only entries that look like tabular files are exposed. The archive is read
//! straight from the uploaded buffer, which gives the zip reader the random
//! access it needs without staging a temporary file.

use std::io::{Cursor, Read};
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

/// File suffix of tabular entries (compared ASCII case-insensitively)
pub const TABULAR_SUFFIX: &str = ".csv";

/// Resource-fork directory added by macOS archivers
const MACOS_METADATA_DIR: &str = "__MACOSX/";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive is corrupt or not a zip file: {0}")]
    Corrupt(#[from] zip::result::ZipError),

    #[error("Failed to open archive entry '{name}': {source}")]
    Entry {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Archive entry '{name}' is unreadable: {reason}")]
    Unreadable { name: String, reason: String },
}

/// One tabular member of an archive, readable once
pub struct TabularEntry<'a> {
    pub name: String,
    pub reader: Box<dyn Read + 'a>,
}

/// The tabular entries of a zip archive, in archive-listing order
pub struct TabularArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    /// (archive index, entry name)
    entries: Vec<(usize, String)>,
}

impl TabularArchive {
    /// Parse the central directory of `bytes` and index its tabular entries
    pub fn open(bytes: Vec<u8>) -> Result<Self, ArchiveError> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;

        let entries: Vec<(usize, String)> = (0..archive.len())
            .filter_map(|index| {
                archive
                    .name_for_index(index)
                    .filter(|name| is_tabular(name))
                    .map(|name| (index, name.to_string()))
            })
            .collect();

        debug!(
            members = archive.len(),
            tabular = entries.len(),
            "Indexed archive"
        );

        Ok(Self { archive, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the tabular entries, in listing order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, name)| name.as_str())
    }

    /// Open the `position`-th tabular entry as a decompressing stream
    pub fn entry(&mut self, position: usize) -> Result<TabularEntry<'_>, ArchiveError> {
        let (index, name) = self.entries.get(position).cloned().ok_or_else(|| {
            ArchiveError::Entry {
                name: format!("#{}", position),
                source: zip::result::ZipError::FileNotFound,
            }
        })?;

        let file = self
            .archive
            .by_index(index)
            .map_err(|source| ArchiveError::Entry {
                name: name.clone(),
                source,
            })?;

        Ok(TabularEntry {
            name,
            reader: Box::new(file),
        })
    }
}

/// Whether an archive member name denotes a tabular file
pub fn is_tabular(name: &str) -> bool {
    if name.ends_with('/') || name.starts_with(MACOS_METADATA_DIR) {
        return false;
    }

    let file_name = name.rsplit('/').next().unwrap_or(name);
    file_name.len() > TABULAR_SUFFIX.len()
        && file_name
            .get(file_name.len() - TABULAR_SUFFIX.len()..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(TABULAR_SUFFIX))
}

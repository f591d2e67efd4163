// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Files the emulated drive shows to the controller.

use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info};
use crate::error::{Error, Result};
use crate::protocol::NAME_WIDTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Exposed file names in listing order, each backed by a file in `dir`.
///
/// The catalog only changes when a write is committed or a file deleted.
#[derive(Debug)]
pub struct DiskCatalog {
    dir: PathBuf,
    entries: Vec<CatalogEntry>,
    overwrite: bool,
}

/// Names the drive can list and store: at most 12 printable characters,
/// no path separators, no leading dot.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= NAME_WIDTH
        && !name.starts_with('.')
        && name.bytes().all(|b| b.is_ascii_graphic() && b != b'/' && b != b'\\')
}

fn is_job_file(name: &str) -> bool {
    name.ends_with(".JBI") && name.len() > 4 && name.len() <= NAME_WIDTH
}

impl DiskCatalog {
    /// Every job file in `dir`, sorted by name.
    pub fn scan(dir: impl Into<PathBuf>, overwrite: bool) -> Result<Self> {
        let dir = dir.into();
        let mut names = Vec::new();

        for entry in fs::read_dir(&dir).map_err(|e| Error::local_file(&dir, e))? {
            let entry = entry.map_err(|e| Error::local_file(&dir, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if let Some(name) = entry.file_name().to_str() {
                if is_file && is_job_file(name) && valid_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        debug!("discovered {} job files in {}", names.len(), dir.display());
        Ok(Self::from_names(dir, names, overwrite))
    }

    /// Exactly the named files from `dir`, in the given order.
    pub fn with_files(dir: impl Into<PathBuf>, names: &[String], overwrite: bool) -> Result<Self> {
        let dir = dir.into();
        for name in names {
            if !valid_name(name) {
                return Err(Error::Parameter(format!("{:?} is not a usable disk file name", name)));
            }
            if !dir.join(name).is_file() {
                return Err(Error::NotFound(dir.join(name).display().to_string()));
            }
        }
        Ok(Self::from_names(dir, names.to_vec(), overwrite))
    }

    fn from_names(dir: PathBuf, names: Vec<String>, overwrite: bool) -> Self {
        let entries = names
            .into_iter()
            .map(|name| CatalogEntry { path: dir.join(&name), name })
            .collect();
        DiskCatalog { dir, entries, overwrite }
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// True when a write to `name` would replace something, listed or not.
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some() || self.dir.join(name).exists()
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        fs::read(&entry.path).map_err(|e| Error::local_file(&entry.path, e))
    }

    /// Store `data` as `name`. The bytes go to `NAME.partial` first and are
    /// renamed into place only once fully written.
    pub fn commit(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if !valid_name(name) {
            return Err(Error::Parameter(format!("{:?} is not a usable disk file name", name)));
        }
        if !self.overwrite && self.exists(name) {
            return Err(Error::Conflict(name.to_string()));
        }

        let path = self.dir.join(name);
        let partial = self.dir.join(format!("{}.partial", name));
        let written = fs::write(&partial, data).and_then(|_| fs::rename(&partial, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(Error::local_file(&path, e));
        }

        if self.get(name).is_none() {
            self.entries.push(CatalogEntry { name: name.to_string(), path: path.clone() });
        }
        info!("stored {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        let index = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let path = &self.entries[index].path;
        fs::remove_file(path).map_err(|e| Error::local_file(path, e))?;
        info!("deleted {}", path.display());
        self.entries.remove(index);
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Make the `//NAME` line of a job agree with the job's file name. Line
/// endings are left alone. Returns the corrected text and the line that
/// was replaced, if any.
pub fn fix_job_name(file_name: &str, data: &[u8]) -> (Vec<u8>, Option<String>) {
    let stem = file_name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file_name);
    let expected = format!("//NAME {}", stem);

    let mut out = Vec::with_capacity(data.len());
    let mut replaced = None;

    for line in data.split_inclusive(|&b| b == b'\n') {
        let content_len = line
            .iter()
            .rposition(|&b| b != b'\r' && b != b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let (content, ending) = line.split_at(content_len);

        if content.starts_with(b"//NAME ") && content != expected.as_bytes() {
            replaced = Some(String::from_utf8_lossy(content).into_owned());
            out.extend_from_slice(expected.as_bytes());
            out.extend_from_slice(ending);
        } else {
            out.extend_from_slice(line);
        }
    }

    (out, replaced)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir_with(files: &[(&str, &[u8])]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, data) in files {
            fs::write(dir.path().join(name), data).unwrap();
        }
        dir
    }

    #[test]
    fn test_scan_finds_job_files_sorted() {
        let dir = dir_with(&[
            ("B.JBI", b"b"),
            ("A.JBI", b"a"),
            ("C.DAT", b"c"),
            ("NOTES.txt", b"n"),
            ("WAYTOOLONGNAME.JBI", b"x"),
        ]);
        let catalog = DiskCatalog::scan(dir.path(), false).unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["A.JBI", "B.JBI"]);
    }

    #[test]
    fn test_restricted_catalog_keeps_given_order() {
        let dir = dir_with(&[("A.JBI", b"a"), ("B.JBI", b"b"), ("C.DAT", b"c")]);
        let names = vec!["C.DAT".to_string(), "A.JBI".to_string()];
        let catalog = DiskCatalog::with_files(dir.path(), &names, false).unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["C.DAT", "A.JBI"]);
        assert!(catalog.get("B.JBI").is_none());
    }

    #[test]
    fn test_restricted_catalog_rejects_missing_file() {
        let dir = dir_with(&[("A.JBI", b"a")]);
        let names = vec!["MISSING.JBI".to_string()];
        assert!(matches!(DiskCatalog::with_files(dir.path(), &names, false), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_commit_adds_entry_and_leaves_no_partial() {
        let dir = dir_with(&[]);
        let mut catalog = DiskCatalog::scan(dir.path(), false).unwrap();
        catalog.commit("NEW.JBI", b"/JOB\r\n").unwrap();

        assert_eq!(fs::read(dir.path().join("NEW.JBI")).unwrap(), b"/JOB\r\n");
        assert!(!dir.path().join("NEW.JBI.partial").exists());
        assert_eq!(catalog.read("NEW.JBI").unwrap(), b"/JOB\r\n");
    }

    #[test]
    fn test_commit_respects_overwrite_flag() {
        let dir = dir_with(&[("A.JBI", b"old")]);
        let mut catalog = DiskCatalog::scan(dir.path(), false).unwrap();
        assert!(matches!(catalog.commit("A.JBI", b"new"), Err(Error::Conflict(_))));
        assert_eq!(fs::read(dir.path().join("A.JBI")).unwrap(), b"old");

        // unlisted files on disk are protected too
        let mut restricted = DiskCatalog::with_files(dir.path(), &[], false).unwrap();
        assert!(matches!(restricted.commit("A.JBI", b"new"), Err(Error::Conflict(_))));

        let mut catalog = DiskCatalog::scan(dir.path(), true).unwrap();
        catalog.commit("A.JBI", b"new").unwrap();
        assert_eq!(fs::read(dir.path().join("A.JBI")).unwrap(), b"new");
        assert_eq!(catalog.names().count(), 1);
    }

    #[test]
    fn test_remove() {
        let dir = dir_with(&[("A.JBI", b"a")]);
        let mut catalog = DiskCatalog::scan(dir.path(), false).unwrap();
        assert!(matches!(catalog.remove("B.JBI"), Err(Error::NotFound(_))));
        catalog.remove("A.JBI").unwrap();
        assert!(!dir.path().join("A.JBI").exists());
        assert_eq!(catalog.names().count(), 0);
    }

    #[test]
    fn test_valid_name() {
        assert!(valid_name("TEST.JBI"));
        assert!(valid_name("SYSTEM.DAT"));
        assert!(!valid_name(""));
        assert!(!valid_name("../ETC.JBI"));
        assert!(!valid_name(".HIDDEN"));
        assert!(!valid_name("THIRTEEN.JBIX"));
        assert!(!valid_name("A B.JBI"));
    }

    #[test]
    fn test_fix_job_name_rewrites_only_the_name_line() {
        let data = b"/JOB\r\n//NAME OLDNAME\r\n//POS\r\nNOP\r\nEND\r\n";
        let (fixed, replaced) = fix_job_name("TEST.JBI", data);
        assert_eq!(fixed, b"/JOB\r\n//NAME TEST\r\n//POS\r\nNOP\r\nEND\r\n".to_vec());
        assert_eq!(replaced.as_deref(), Some("//NAME OLDNAME"));

        let (same, replaced) = fix_job_name("TEST.JBI", &fixed);
        assert_eq!(same, fixed);
        assert_eq!(replaced, None);

        let (raw, replaced) = fix_job_name("DEMO.JBI", b"0123456789");
        assert_eq!(raw, b"0123456789".to_vec());
        assert_eq!(replaced, None);
    }
}

//! Table-of-contents schema shared by estargz and zstd:chunked manifests.

use std::collections::HashMap;

use a3s_storage_core::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use tar::EntryType;

/// Regular file.
pub const TYPE_REG: &str = "reg";
/// Continuation chunk of the preceding regular file.
pub const TYPE_CHUNK: &str = "chunk";
/// Hard link.
pub const TYPE_LINK: &str = "hardlink";
/// Character device.
pub const TYPE_CHAR: &str = "char";
/// Block device.
pub const TYPE_BLOCK: &str = "block";
/// Directory.
pub const TYPE_DIR: &str = "dir";
/// Named pipe.
pub const TYPE_FIFO: &str = "fifo";
/// Symbolic link.
pub const TYPE_SYMLINK: &str = "symlink";

/// Supported TOC version.
pub const TOC_VERSION: i32 = 1;

/// Map a TOC entry type to its tar typeflag byte.
///
/// Chunk entries only describe file data and have no tar counterpart.
pub fn type_to_tar_type(t: &str) -> Result<u8> {
    let entry_type = match t {
        TYPE_REG => EntryType::Regular,
        TYPE_LINK => EntryType::Link,
        TYPE_CHAR => EntryType::Char,
        TYPE_BLOCK => EntryType::Block,
        TYPE_DIR => EntryType::Directory,
        TYPE_FIFO => EntryType::Fifo,
        TYPE_SYMLINK => EntryType::Symlink,
        _ => return Err(StorageError::UnknownEntryType(t.to_string())),
    };
    Ok(entry_type.as_byte())
}

/// Decoded table of contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toc {
    pub version: i32,

    #[serde(default)]
    pub entries: Vec<TocEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tar_split_digest: Option<String>,
}

impl Toc {
    /// Parse TOC JSON, rejecting versions we do not understand.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let toc: Toc = serde_json::from_slice(data)?;
        if toc.version != TOC_VERSION {
            return Err(StorageError::SerializationError(format!(
                "unsupported TOC version {}",
                toc.version
            )));
        }
        Ok(toc)
    }

    /// Entries that start a file, skipping chunk continuations.
    pub fn files(&self) -> impl Iterator<Item = &TocEntry> {
        self.entries.iter().filter(|e| e.entry_type != TYPE_CHUNK)
    }
}

/// One TOC entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link_name: String,
    #[serde(default)]
    pub mode: i64,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub uid: i32,
    #[serde(default)]
    pub gid: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modtime: Option<String>,
    #[serde(default)]
    pub dev_major: i64,
    #[serde(default)]
    pub dev_minor: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub xattrs: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub end_offset: i64,
    #[serde(default)]
    pub chunk_size: i64,
    #[serde(default)]
    pub chunk_offset: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chunk_digest: String,
}

impl TocEntry {
    /// Tar typeflag for this entry.
    pub fn tar_type(&self) -> Result<u8> {
        type_to_tar_type(&self.entry_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_to_tar_type() {
        assert_eq!(type_to_tar_type(TYPE_REG).unwrap(), b'0');
        assert_eq!(type_to_tar_type(TYPE_LINK).unwrap(), b'1');
        assert_eq!(type_to_tar_type(TYPE_SYMLINK).unwrap(), b'2');
        assert_eq!(type_to_tar_type(TYPE_CHAR).unwrap(), b'3');
        assert_eq!(type_to_tar_type(TYPE_BLOCK).unwrap(), b'4');
        assert_eq!(type_to_tar_type(TYPE_DIR).unwrap(), b'5');
        assert_eq!(type_to_tar_type(TYPE_FIFO).unwrap(), b'6');
    }

    #[test]
    fn test_type_to_tar_type_unknown() {
        for t in [TYPE_CHUNK, "", "socket", "REG"] {
            let err = type_to_tar_type(t).unwrap_err();
            assert!(matches!(err, StorageError::UnknownEntryType(_)));
        }
        assert_eq!(type_to_tar_type("whiteout").unwrap_err().to_string(), "Unknown type: whiteout");
    }

    #[test]
    fn test_toc_from_slice() {
        let json = br#"{
            "version": 1,
            "entries": [
                {"type": "dir", "name": "etc/", "mode": 493},
                {"type": "reg", "name": "etc/hosts", "size": 12, "digest": "sha256:aa",
                 "offset": 100, "endOffset": 140, "xattrs": {"user.a": "Yg=="}},
                {"type": "chunk", "name": "etc/hosts", "chunkOffset": 6, "chunkSize": 6},
                {"type": "symlink", "name": "etc/localtime", "linkName": "/usr/share/zoneinfo/UTC"}
            ],
            "tarSplitDigest": "sha256:bb"
        }"#;
        let toc = Toc::from_slice(json).unwrap();

        assert_eq!(toc.entries.len(), 4);
        assert_eq!(toc.tar_split_digest.as_deref(), Some("sha256:bb"));
        assert_eq!(toc.files().count(), 3);

        let hosts = &toc.entries[1];
        assert_eq!(hosts.end_offset, 140);
        assert_eq!(hosts.xattrs.get("user.a").map(String::as_str), Some("Yg=="));
        assert_eq!(hosts.tar_type().unwrap(), b'0');
        assert_eq!(toc.entries[3].link_name, "/usr/share/zoneinfo/UTC");
        assert!(toc.entries[2].tar_type().is_err());
    }

    #[test]
    fn test_toc_rejects_unknown_version() {
        let err = Toc::from_slice(br#"{"version": 2, "entries": []}"#).unwrap_err();
        assert!(err.to_string().contains("unsupported TOC version 2"));
    }

    #[test]
    fn test_toc_rejects_garbage() {
        let err = Toc::from_slice(b"not json").unwrap_err();
        assert!(matches!(err, StorageError::SerializationError(_)));
    }
}

//! Change detection for crawled files.
//!
//! A file is unchanged when the store already has a record for its path with
//! the same size and the same modification time. Content is never hashed.

use std::collections::HashMap;

use super::discovery::FileDescriptor;
use crate::db::FileSignature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Modified,
    Unchanged,
}

impl Change {
    pub fn needs_write(&self) -> bool {
        !matches!(self, Change::Unchanged)
    }
}

/// Stored signatures for one target, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct KnownFiles {
    signatures: HashMap<String, FileSignature>,
}

impl KnownFiles {
    pub fn new(signatures: HashMap<String, FileSignature>) -> Self {
        Self { signatures }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn classify(&self, file: &FileDescriptor) -> Change {
        match self.signatures.get(&file.path_string()) {
            None => Change::New,
            Some(known) if known.file_size == file.size && known.file_modified == file.modified => {
                Change::Unchanged
            }
            Some(_) => Change::Modified,
        }
    }
}

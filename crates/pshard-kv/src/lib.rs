// Copyright 2020 Alex Dukhno
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ordered KV backend with column families (C1). One `KvStore` per database
//! directory; one sled `Tree` per column family (a table's data, or a
//! secondary index). Grounded on the teacher's `SledBackendStorage`
//! (`src/storage/src/backend.rs`) and its on-disk counterpart.

use std::path::Path;

use pshard_kernel::{Error, Result};

/// An ordered iterator over key/value pairs, boxed so callers don't need to
/// name the concrete sled iterator type — the storage engine only ever
/// consumes this as a `ReadCursor`.
pub type ReadCursor = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>>;

fn map_sled_error(error: sled::Error) -> Error {
    match error {
        sled::Error::Io(io_error) => Error::internal(format!("io error: {}", io_error)),
        sled::Error::CollectionNotFound(name) => {
            Error::not_found(format!("column family {:?} not found", name))
        }
        sled::Error::Unsupported(op) => Error::internal(format!("unsupported sled operation: {}", op)),
        sled::Error::Corruption { at, .. } => match at {
            Some(at) => Error::internal(format!("storage corruption at {}", at)),
            None => Error::internal("storage corruption".to_owned()),
        },
        sled::Error::ReportableBug(description) => Error::internal(format!("sled bug: {}", description)),
    }
}

/// A single database directory. Holds every table's data CF and every
/// index's CF as sled `Tree`s inside one `sled::Db`.
pub struct KvStore {
    db: sled::Db,
}

impl KvStore {
    /// Opens (or creates) the database at `path`. Returns whether an
    /// existing database was recovered, matching `sled::Db::was_recovered`
    /// which the teacher's persistent catalog uses to decide whether to
    /// replay `.state.txt` (§6).
    pub fn open_on_disk(path: &Path) -> Result<(KvStore, bool)> {
        let db = sled::open(path).map_err(map_sled_error)?;
        let recovered = db.was_recovered();
        Ok((KvStore { db }, recovered))
    }

    /// A temporary, in-memory database — used for tests and for the CLI's
    /// `--in-memory` mode.
    pub fn open_in_memory() -> Result<KvStore> {
        let db = sled::Config::default()
            .temporary(true)
            .open()
            .map_err(map_sled_error)?;
        Ok(KvStore { db })
    }

    /// Creates a column family if it does not already exist. Idempotent,
    /// since CREATE TABLE / CREATE INDEX replay on catalog load must not
    /// fail on a CF that already exists on disk.
    pub fn create_cf(&self, name: &str) -> Result<ColumnFamily> {
        let tree = self.db.open_tree(name).map_err(map_sled_error)?;
        Ok(ColumnFamily { tree })
    }

    pub fn cf(&self, name: &str) -> Result<ColumnFamily> {
        if !self.cf_exists(name) {
            return Err(Error::not_found(format!("column family {:?} does not exist", name)));
        }
        self.create_cf(name)
    }

    pub fn cf_exists(&self, name: &str) -> bool {
        self.db.tree_names().iter().any(|n| n == name.as_bytes())
    }

    pub fn drop_cf(&self, name: &str) -> Result<()> {
        self.db.drop_tree(name.as_bytes()).map_err(map_sled_error)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(map_sled_error)?;
        Ok(())
    }
}

/// One column family: a table's row store, or one secondary index.
#[derive(Clone)]
pub struct ColumnFamily {
    tree: sled::Tree,
}

impl ColumnFamily {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tree
            .get(key)
            .map(|opt| opt.map(|ivec| ivec.to_vec()))
            .map_err(map_sled_error)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.insert(key, value).map_err(map_sled_error)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.tree.remove(key).map_err(map_sled_error)?;
        Ok(())
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.tree.contains_key(key).map_err(map_sled_error)
    }

    /// Iterates every entry whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> ReadCursor {
        Box::new(self.tree.scan_prefix(prefix).map(|item| {
            item.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(map_sled_error)
        }))
    }

    /// Iterates every entry in the CF, in key order — the slow-path scan
    /// used when no shard can be derived from the statement (§4.2.1).
    pub fn scan_all(&self) -> ReadCursor {
        Box::new(
            self.tree
                .iter()
                .map(|item| item.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(map_sled_error)),
        )
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

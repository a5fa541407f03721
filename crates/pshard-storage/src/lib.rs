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

//! Storage engine (C4): per-table row CRUD plus the candidate-lookup
//! policy (§4.2/§4.2.1). Grounded on the teacher's
//! `storage::frontend::FrontendStorage`, which pairs a data CF with its
//! index CFs behind the same per-table API this crate exposes.
//!
//! What shard(s) a row belongs to, and whether an update or replace needs
//! to move a row between shards, is decided by the SQL engine (C6), which
//! holds the catalog; this crate only knows how to read/write a row once
//! given an explicit shard key, and how to find candidate rows once given
//! an equality constraint (or the absence of one).

use pshard_dataflow::{DataflowSink, Record};
use pshard_encoding::{decode_row, encode_row, row_key, ColumnType, Value, SEP};
use pshard_index::SecondaryIndex;
use pshard_kernel::Result;
use pshard_kv::{ColumnFamily, KvStore};
use std::path::Path;

pub struct StorageEngine {
    kv: KvStore,
}

/// Which columns of a table are indexed, their type (needed to decode the
/// old value on a replace), and the index each one maintains.
#[derive(Default)]
pub struct IndexedColumns {
    pub entries: Vec<(usize, ColumnType, SecondaryIndex)>,
}

impl IndexedColumns {
    pub fn none() -> IndexedColumns {
        IndexedColumns::default()
    }
}

impl StorageEngine {
    pub fn open_on_disk(path: &Path) -> Result<(StorageEngine, bool)> {
        let (kv, recovered) = KvStore::open_on_disk(path)?;
        Ok((StorageEngine { kv }, recovered))
    }

    pub fn open_in_memory() -> Result<StorageEngine> {
        Ok(StorageEngine { kv: KvStore::open_in_memory()? })
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn table_cf(&self, table: &str) -> Result<ColumnFamily> {
        self.kv.create_cf(table)
    }

    pub fn index(&self, name: &str) -> Result<SecondaryIndex> {
        SecondaryIndex::open(&self.kv, name)
    }

    pub fn flush(&self) -> Result<()> {
        self.kv.flush()
    }

    /// Insert(row, shard_key) (§4.2): Put into the data CF, then emit one
    /// index entry per indexed column.
    pub fn insert(&self, table: &str, shard_key: &[u8], pk: &Value, row: &[Value], indices: &IndexedColumns) -> Result<()> {
        let cf = self.table_cf(table)?;
        let key = row_key(shard_key, pk)?;
        cf.put(&key, &encode_row(row)?)?;
        for (column, _, index) in &indices.entries {
            index.add(shard_key, &row[*column], pk)?;
        }
        Ok(())
    }

    /// Replace(row, shard_key) (§4.2): delete-then-insert under the same
    /// pk, only mutating index entries whose value actually changed.
    pub fn replace(&self, table: &str, shard_key: &[u8], pk: &Value, row: &[Value], indices: &IndexedColumns) -> Result<()> {
        let cf = self.table_cf(table)?;
        let key = row_key(shard_key, pk)?;
        if let Some(old_bytes) = cf.get(&key)? {
            for (column, column_type, index) in &indices.entries {
                let old_value = pshard_encoding::extract_field(&old_bytes, *column)?;
                let new_bytes = pshard_encoding::encode_value(&row[*column])?;
                if old_value != new_bytes.as_slice() {
                    let old_decoded = pshard_encoding::decode_value(old_value, *column_type)?;
                    index.delete(shard_key, &old_decoded, pk)?;
                    index.add(shard_key, &row[*column], pk)?;
                }
            }
        } else {
            for (column, _, index) in &indices.entries {
                index.add(shard_key, &row[*column], pk)?;
            }
        }
        cf.put(&key, &encode_row(row)?)
    }

    /// Delete(filter) (§4.2): remove the row and every index entry it owns,
    /// returning the row that was deleted (for the dataflow sink).
    pub fn delete(
        &self,
        table: &str,
        shard_key: &[u8],
        pk: &Value,
        column_types: &[ColumnType],
        indices: &IndexedColumns,
    ) -> Result<Option<Vec<Value>>> {
        let cf = self.table_cf(table)?;
        let key = row_key(shard_key, pk)?;
        let Some(bytes) = cf.get(&key)? else {
            return Ok(None);
        };
        let row = decode_row(&bytes, column_types)?;
        for (column, _, index) in &indices.entries {
            index.delete(shard_key, &row[*column], pk)?;
        }
        cf.delete(&key)?;
        Ok(Some(row))
    }

    /// Delete and emit one `Negative` record into `sink`, as every mutating
    /// statement's dataflow contract requires (§6).
    pub fn delete_and_emit(
        &self,
        table: &str,
        shard_key: &[u8],
        pk: &Value,
        column_types: &[ColumnType],
        indices: &IndexedColumns,
        sink: &dyn DataflowSink,
    ) -> Result<bool> {
        match self.delete(table, shard_key, pk, column_types, indices)? {
            Some(row) => {
                sink.emit(table, vec![Record::Negative(row)]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, table: &str, shard_key: &[u8], pk: &Value) -> Result<Option<Vec<u8>>> {
        let cf = self.table_cf(table)?;
        cf.get(&row_key(shard_key, pk)?)
    }

    pub fn scan_shard(&self, table: &str, shard_key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.table_cf(table)?;
        cf.scan_prefix(shard_key).collect()
    }

    pub fn scan_table(&self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.table_cf(table)?;
        cf.scan_all().collect()
    }

    /// Candidate-lookup policy (§4.2.1): PK equality takes a point Get,
    /// indexed-column equality range-scans the index, otherwise a prefix
    /// (or, with no shard implied at all, a full) scan of the data CF.
    pub fn candidates(
        &self,
        table: &str,
        shard_key: Option<&[u8]>,
        pk_eq: Option<&Value>,
        index_eq: Option<(&SecondaryIndex, &Value)>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if let Some(pk) = pk_eq {
            return Ok(match shard_key {
                Some(shard) => {
                    let key = row_key(shard, pk)?;
                    self.get(table, shard, pk)?.map(|v| (key, v)).into_iter().collect()
                }
                None => {
                    let target = pshard_encoding::encode_value(pk)?;
                    self.scan_table(table)?.into_iter().filter(|(key, _)| pk_matches_tail(key, &target)).collect()
                }
            });
        }
        if let Some((index, value)) = index_eq {
            let pairs = match shard_key {
                Some(shard) => index.lookup(shard, value)?.into_iter().map(|pk_bytes| (shard.to_vec(), pk_bytes)).collect(),
                None => index.lookup_across_shards(value)?,
            };
            let cf = self.table_cf(table)?;
            let mut results = Vec::new();
            for (shard, pk_bytes) in pairs {
                let mut key = shard.clone();
                key.extend_from_slice(&pk_bytes);
                if let Some(row) = cf.get(&key)? {
                    results.push((key, row));
                }
            }
            return Ok(results);
        }
        match shard_key {
            Some(shard) => self.scan_shard(table, shard),
            None => {
                log::debug!("full table scan over '{}': no shard implied by the filter", table);
                self.scan_table(table)
            }
        }
    }
}

fn pk_matches_tail(key: &[u8], pk_bytes: &[u8]) -> bool {
    key.len() >= pk_bytes.len() && &key[key.len() - pk_bytes.len()..] == pk_bytes && {
        let before = key.len() - pk_bytes.len();
        before == 0 || key[before - 1] == SEP
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pshard_encoding::shard_key;

    fn shard(subject: u64) -> Vec<u8> {
        shard_key("user", &Value::UnsignedInt(subject)).unwrap()
    }

    #[rstest::fixture]
    fn storage() -> StorageEngine {
        StorageEngine::open_in_memory().unwrap()
    }

    #[rstest::rstest]
    fn insert_then_get_round_trips(storage: StorageEngine) {
        let shard = shard(1);
        let row = vec![Value::UnsignedInt(10), Value::Text("a".to_owned())];
        storage.insert("addr", &shard, &Value::UnsignedInt(10), &row, &IndexedColumns::none()).unwrap();

        let bytes = storage.get("addr", &shard, &Value::UnsignedInt(10)).unwrap().unwrap();
        let schema = vec![ColumnType::UnsignedInt, ColumnType::Text];
        assert_eq!(decode_row(&bytes, &schema).unwrap(), row);
    }

    #[rstest::rstest]
    fn replace_updates_changed_index_entries_only(storage: StorageEngine) {
        let shard = shard(1);
        let index = storage.index("addr_uid_idx").unwrap();
        let indexed = IndexedColumns { entries: vec![(1usize, ColumnType::UnsignedInt, index.clone())] };

        let row = vec![Value::UnsignedInt(10), Value::UnsignedInt(1)];
        storage.insert("addr", &shard, &Value::UnsignedInt(10), &row, &indexed).unwrap();
        assert_eq!(index.lookup(&shard, &Value::UnsignedInt(1)).unwrap(), vec![b"10".to_vec()]);

        let updated = vec![Value::UnsignedInt(10), Value::UnsignedInt(2)];
        storage.replace("addr", &shard, &Value::UnsignedInt(10), &updated, &indexed).unwrap();

        assert!(index.lookup(&shard, &Value::UnsignedInt(1)).unwrap().is_empty());
        assert_eq!(index.lookup(&shard, &Value::UnsignedInt(2)).unwrap(), vec![b"10".to_vec()]);
    }

    #[rstest::rstest]
    fn delete_and_emit_pushes_a_negative_record(storage: StorageEngine) {
        let shard = shard(1);
        let row = vec![Value::UnsignedInt(10), Value::Text("a".to_owned())];
        storage.insert("addr", &shard, &Value::UnsignedInt(10), &row, &IndexedColumns::none()).unwrap();

        let sink = pshard_dataflow::RecordingSink::new();
        let schema = vec![ColumnType::UnsignedInt, ColumnType::Text];
        let deleted = storage
            .delete_and_emit("addr", &shard, &Value::UnsignedInt(10), &schema, &IndexedColumns::none(), &sink)
            .unwrap();
        assert!(deleted);
        assert_eq!(sink.emitted(), vec![("addr".to_owned(), vec![Record::Negative(row)])]);
        assert!(storage.get("addr", &shard, &Value::UnsignedInt(10)).unwrap().is_none());
    }

    #[rstest::rstest]
    fn candidates_pk_equality_takes_a_point_get(storage: StorageEngine) {
        let shard = shard(1);
        let row = vec![Value::UnsignedInt(10), Value::Text("a".to_owned())];
        storage.insert("addr", &shard, &Value::UnsignedInt(10), &row, &IndexedColumns::none()).unwrap();
        storage.insert("addr", &shard, &Value::UnsignedInt(11), &[Value::UnsignedInt(11)], &IndexedColumns::none()).unwrap();

        let found = storage.candidates("addr", Some(&shard), Some(&Value::UnsignedInt(10)), None).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[rstest::rstest]
    fn candidates_with_no_equality_and_no_shard_scans_everything(storage: StorageEngine) {
        let shard_one = shard(1);
        let shard_two = shard(2);
        storage.insert("addr", &shard_one, &Value::UnsignedInt(10), &[Value::UnsignedInt(10)], &IndexedColumns::none()).unwrap();
        storage.insert("addr", &shard_two, &Value::UnsignedInt(20), &[Value::UnsignedInt(20)], &IndexedColumns::none()).unwrap();

        let found = storage.candidates("addr", None, None, None).unwrap();
        assert_eq!(found.len(), 2);
    }
}

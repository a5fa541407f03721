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

//! Secondary index (C3): a CF mapping `(shard_id, indexed_value) -> pk`.
//! Grounded on the index-maintenance helpers in the teacher's
//! `storage::frontend`, re-pointed at `pshard-kv`'s CF abstraction.

use pshard_encoding::{encode_value, index_key, split_fields, Value, SEP};
use pshard_kernel::Result;
use pshard_kv::{ColumnFamily, KvStore};

#[derive(Clone)]
pub struct SecondaryIndex {
    cf: ColumnFamily,
}

impl SecondaryIndex {
    pub fn open(kv: &KvStore, name: &str) -> Result<SecondaryIndex> {
        Ok(SecondaryIndex { cf: kv.create_cf(name)? })
    }

    pub fn add(&self, shard_key: &[u8], value: &Value, pk: &Value) -> Result<()> {
        let key = index_key(shard_key, value, pk)?;
        self.cf.put(&key, b"")
    }

    pub fn delete(&self, shard_key: &[u8], value: &Value, pk: &Value) -> Result<()> {
        let key = index_key(shard_key, value, pk)?;
        self.cf.delete(&key)
    }

    fn value_prefix(shard_key: &[u8], value: &Value) -> Result<Vec<u8>> {
        let mut prefix = shard_key.to_vec();
        prefix.extend_from_slice(&encode_value(value)?);
        prefix.push(SEP);
        Ok(prefix)
    }

    /// Range-scans `shard_key ‖ value ‖ SEP` for every matching pk (§4.2.1
    /// step 2, and the within-table WHERE-clause equality path).
    pub fn lookup(&self, shard_key: &[u8], value: &Value) -> Result<Vec<Vec<u8>>> {
        let prefix = Self::value_prefix(shard_key, value)?;
        let mut pks = Vec::new();
        for item in self.cf.scan_prefix(&prefix) {
            let (key, _) = item?;
            if let Some(pk) = split_fields(&key).get(3) {
                pks.push(pk.to_vec());
            }
        }
        Ok(pks)
    }

    /// Scans the whole index CF for every `(shard_key, pk)` whose indexed
    /// value equals `value`, without knowing the shard up front — this is
    /// how TRANSITIVE/VARIABLE ownership is resolved: the FK points at
    /// `T'.pk`, and the pk-keyed simple index on `T'` reveals which
    /// shard(s) that pk currently lives in. Explicitly the slow path
    /// (§4.2.1): a full index scan instead of a prefix scan.
    pub fn lookup_across_shards(&self, value: &Value) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let target = encode_value(value)?;
        let mut matches = Vec::new();
        for item in self.cf.scan_all() {
            let (key, _) = item?;
            let fields = split_fields(&key);
            if fields.len() == 4 && fields[2] == target.as_slice() {
                let mut shard_key = fields[0].to_vec();
                shard_key.push(SEP);
                shard_key.extend_from_slice(fields[1]);
                shard_key.push(SEP);
                matches.push((shard_key, fields[3].to_vec()));
            }
        }
        Ok(matches)
    }

    /// Batch lookup: builds one prefix per `(shard_key, value)` entry, sorts
    /// and deduplicates them, then iterates each prefix once (§4.3).
    pub fn lookup_many(&self, entries: &[(Vec<u8>, Value)]) -> Result<Vec<Vec<u8>>> {
        let mut prefixes = Vec::with_capacity(entries.len());
        for (shard_key, value) in entries {
            prefixes.push(Self::value_prefix(shard_key, value)?);
        }
        prefixes.sort();
        prefixes.dedup();

        let mut pks = Vec::new();
        for prefix in prefixes {
            for item in self.cf.scan_prefix(&prefix) {
                let (key, _) = item?;
                if let Some(pk) = split_fields(&key).get(3) {
                    pks.push(pk.to_vec());
                }
            }
        }
        Ok(pks)
    }

    pub fn is_empty(&self) -> bool {
        self.cf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pshard_encoding::shard_key;

    #[rstest::fixture]
    fn index() -> SecondaryIndex {
        let kv = Box::leak(Box::new(KvStore::open_in_memory().unwrap()));
        SecondaryIndex::open(kv, "addr_uid_idx").unwrap()
    }

    #[rstest::rstest]
    fn add_then_lookup_within_shard(index: SecondaryIndex) {
        let shard = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        index.add(&shard, &Value::UnsignedInt(1), &Value::UnsignedInt(10)).unwrap();

        let pks = index.lookup(&shard, &Value::UnsignedInt(1)).unwrap();
        assert_eq!(pks, vec![b"10".to_vec()]);
    }

    #[rstest::rstest]
    fn delete_removes_the_entry(index: SecondaryIndex) {
        let shard = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        index.add(&shard, &Value::UnsignedInt(1), &Value::UnsignedInt(10)).unwrap();
        index.delete(&shard, &Value::UnsignedInt(1), &Value::UnsignedInt(10)).unwrap();

        assert!(index.lookup(&shard, &Value::UnsignedInt(1)).unwrap().is_empty());
    }

    #[rstest::rstest]
    fn lookup_across_shards_finds_the_owning_shard(index: SecondaryIndex) {
        let shard_one = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        let shard_two = shard_key("user", &Value::UnsignedInt(2)).unwrap();
        // pk-keyed simple index: indexed value == the row's own pk.
        index.add(&shard_one, &Value::UnsignedInt(10), &Value::UnsignedInt(10)).unwrap();
        index.add(&shard_two, &Value::UnsignedInt(20), &Value::UnsignedInt(20)).unwrap();

        let matches = index.lookup_across_shards(&Value::UnsignedInt(10)).unwrap();
        assert_eq!(matches, vec![(shard_one, b"10".to_vec())]);
    }

    #[rstest::rstest]
    fn lookup_many_dedups_identical_prefixes(index: SecondaryIndex) {
        let shard = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        index.add(&shard, &Value::UnsignedInt(1), &Value::UnsignedInt(10)).unwrap();
        index.add(&shard, &Value::UnsignedInt(1), &Value::UnsignedInt(11)).unwrap();

        let entries = vec![
            (shard.clone(), Value::UnsignedInt(1)),
            (shard.clone(), Value::UnsignedInt(1)),
        ];
        let mut pks = index.lookup_many(&entries).unwrap();
        pks.sort();
        assert_eq!(pks, vec![b"10".to_vec(), b"11".to_vec()]);
    }
}

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

//! `REPLACE` (§4.2, §4.4). The fast path (a single `Put` per shard) is only
//! safe when the table has at most one owner, that owner is `DIRECT`, and
//! the table has no dependents — otherwise a row might need to move shards
//! or migrate a dependent, which the fast path can't express, so the engine
//! falls back to a synthesized `DELETE` (by pk, across every shard the row
//! currently lives in) followed by an `INSERT`.

use crate::insert::{project_row, InsertCommand};
use crate::resolve::resolve_insert_shards;
use crate::Engine;
use pshard_ast::{Insert, Replace};
use pshard_catalog::ShardDescriptor;
use pshard_dataflow::Record;
use pshard_kernel::Result;

pub struct ReplaceCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> ReplaceCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> ReplaceCommand<'a, 'b> {
        ReplaceCommand { engine }
    }

    pub fn execute(&self, replace: Replace) -> Result<usize> {
        let table = self.engine.catalog.table(&replace.table)?;
        let fast_path = table.dependents.is_empty()
            && match table.owners.len() {
                0 => true,
                1 => matches!(table.owners[0], ShardDescriptor::Direct { .. }),
                _ => false,
            };

        let mut affected = 0;
        for values in replace.rows {
            let row = project_row(&table, &replace.columns, values)?;
            let pk = row[table.primary_key_index].clone();

            if fast_path {
                let indexed = self.engine.open_indexed_columns(&table)?;
                let shards = resolve_insert_shards(self.engine, &table, &row)?;
                for shard in &shards {
                    self.engine.storage.replace(&table.name, shard, &pk, &row, &indexed)?;
                }
                self.engine.sink.emit(&table.name, vec![Record::Positive(row.clone())]);
                affected += 1;
            } else {
                affected += self.delete_every_copy(&table, &pk)?;
                affected += InsertCommand::new(self.engine).execute(Insert {
                    table: table.name.clone(),
                    columns: Vec::new(),
                    rows: vec![row],
                })?;
            }
        }
        Ok(affected)
    }

    /// The slow path's DELETE half: removes every copy of `pk` regardless of
    /// which shard(s) it currently lives in, since a row may have several
    /// owners (§3.3).
    fn delete_every_copy(&self, table: &pshard_catalog::Table, pk: &pshard_encoding::Value) -> Result<usize> {
        let column_types = self.engine.column_types(table);
        let indexed = self.engine.open_indexed_columns(table)?;
        let pk_bytes = pshard_encoding::encode_value(pk)?;

        let candidates = self.engine.storage.candidates(&table.name, None, Some(pk), None)?;
        let mut shards: Vec<Vec<u8>> = candidates
            .into_iter()
            .map(|(key, _)| key[..key.len() - pk_bytes.len()].to_vec())
            .collect();
        shards.sort();
        shards.dedup();

        let mut deleted = 0;
        for shard in shards {
            if self.engine.storage.delete_and_emit(&table.name, &shard, pk, &column_types, &indexed, self.engine.sink)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

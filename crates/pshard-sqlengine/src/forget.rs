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

//! `FORGET` (§4.4, §8 invariant 4): erases a data subject. Every table the
//! kind owns has its shard scanned and every row under it deleted, index
//! entries included, producing one total deleted-row count. Idempotent:
//! forgetting an already-forgotten (or never-seen) subject deletes nothing.

use crate::Engine;
use pshard_ast::Forget;
use pshard_encoding::{decode_row, shard_key};
use pshard_kernel::Result;

pub struct ForgetCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> ForgetCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> ForgetCommand<'a, 'b> {
        ForgetCommand { engine }
    }

    pub fn execute(&self, forget: Forget) -> Result<usize> {
        let shard = shard_key(&forget.kind, &forget.subject_id)?;
        let mut total = 0;
        for table_name in self.engine.catalog.tables_owned_by_kind(&forget.kind) {
            let table = self.engine.catalog.table(&table_name)?;
            let column_types = self.engine.column_types(&table);
            let indexed = self.engine.open_indexed_columns(&table)?;

            for (_, bytes) in self.engine.storage.scan_shard(&table_name, &shard)? {
                let row = decode_row(&bytes, &column_types)?;
                let pk = row[table.primary_key_index].clone();
                if self.engine.storage.delete_and_emit(&table_name, &shard, &pk, &column_types, &indexed, self.engine.sink)? {
                    total += 1;
                }
            }
        }
        Ok(total)
    }
}

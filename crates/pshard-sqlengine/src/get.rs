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

//! `GET` (§4.4): same table enumeration as `FORGET`, but a read — one
//! result set per table the kind owns, instead of a deletion.

use crate::select::QueryResult;
use crate::Engine;
use pshard_ast::Get;
use pshard_encoding::{decode_row, shard_key};
use pshard_kernel::Result;

pub struct GetCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> GetCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> GetCommand<'a, 'b> {
        GetCommand { engine }
    }

    pub fn execute(&self, get: Get) -> Result<Vec<(String, QueryResult)>> {
        let shard = shard_key(&get.kind, &get.subject_id)?;
        let mut results = Vec::new();
        for table_name in self.engine.catalog.tables_owned_by_kind(&get.kind) {
            let table = self.engine.catalog.table(&table_name)?;
            let column_types = self.engine.column_types(&table);
            let columns = table.columns.iter().map(|c| c.name.clone()).collect();

            let mut rows = Vec::new();
            for (_, bytes) in self.engine.storage.scan_shard(&table_name, &shard)? {
                rows.push(decode_row(&bytes, &column_types)?);
            }
            results.push((table_name, QueryResult { columns, rows }));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_table::CreateTableCommand;
    use crate::insert::InsertCommand;
    use pshard_ast::{ColumnDef, CreateTable, Insert};
    use pshard_catalog::Catalog;
    use pshard_dataflow::RecordingSink;
    use pshard_encoding::{ColumnType, Value};
    use pshard_storage::StorageEngine;

    #[test]
    fn get_returns_one_result_set_per_owned_table() {
        let catalog = Catalog::new();
        let storage = StorageEngine::open_in_memory().unwrap();
        let sink = RecordingSink::new();
        let engine = Engine::new(&catalog, &storage, &sink);
        let create = CreateTableCommand::new(&engine);
        create
            .execute(CreateTable {
                table: "user".to_owned(),
                columns: vec![ColumnDef { name: "id".to_owned(), column_type: ColumnType::UnsignedInt, nullable: false, primary_key: true }],
                data_subject: true,
                foreign_keys: vec![],
            })
            .unwrap();
        InsertCommand::new(&engine)
            .execute(Insert { table: "user".to_owned(), columns: vec![], rows: vec![vec![Value::UnsignedInt(1)]] })
            .unwrap();

        let get = GetCommand::new(&engine);
        let results = get.execute(Get { kind: "user".to_owned(), subject_id: Value::UnsignedInt(1) }).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "user");
        assert_eq!(results[0].1.rows, vec![vec![Value::UnsignedInt(1)]]);
    }
}

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

//! `DELETE` (§4.2, §4.4): candidate lookup per the WHERE clause, a residual
//! filter pass, then one `Delete` per matching row, emitting negated records.

use crate::filter::{candidates_for_filter, evaluate, ValueMapper};
use crate::Engine;
use pshard_ast::Delete;
use pshard_encoding::decode_row;
use pshard_kernel::Result;

pub struct DeleteCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> DeleteCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> DeleteCommand<'a, 'b> {
        DeleteCommand { engine }
    }

    pub fn execute(&self, delete: Delete) -> Result<usize> {
        let table = self.engine.catalog.table(&delete.table)?;
        let column_types = self.engine.column_types(&table);
        let indexed = self.engine.open_indexed_columns(&table)?;
        let mapper = ValueMapper::from_filter(delete.filter.as_ref());

        let candidates = candidates_for_filter(self.engine, &table, None, &mapper)?;
        let mut deleted = 0;
        for (key, bytes) in candidates {
            let row = decode_row(&bytes, &column_types)?;
            if let Some(filter) = &delete.filter {
                if !evaluate(filter, &table, &row)? {
                    continue;
                }
            }
            let pk = row[table.primary_key_index].clone();
            let shard_len = key.len() - pshard_encoding::encode_value(&pk)?.len();
            let shard = key[..shard_len].to_vec();
            if self.engine.storage.delete_and_emit(&table.name, &shard, &pk, &column_types, &indexed, self.engine.sink)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_table::CreateTableCommand;
    use crate::insert::InsertCommand;
    use pshard_ast::{ColumnDef, CreateTable, Expr, Insert, Literal};
    use pshard_catalog::Catalog;
    use pshard_dataflow::RecordingSink;
    use pshard_encoding::{shard_key, ColumnType, Value};
    use pshard_storage::StorageEngine;

    #[test]
    fn deletes_matching_rows_and_leaves_others() {
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
        let insert = InsertCommand::new(&engine);
        insert
            .execute(Insert { table: "user".to_owned(), columns: vec![], rows: vec![vec![Value::UnsignedInt(1)], vec![Value::UnsignedInt(2)]] })
            .unwrap();

        let delete = DeleteCommand::new(&engine);
        let affected = delete
            .execute(Delete {
                table: "user".to_owned(),
                filter: Some(Expr::Eq(Box::new(Expr::Column("id".to_owned())), Box::new(Expr::Literal(Literal::UnsignedInt(1))))),
            })
            .unwrap();
        assert_eq!(affected, 1);

        let shard = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        assert!(storage.get("user", &shard, &Value::UnsignedInt(1)).unwrap().is_none());
        let shard2 = shard_key("user", &Value::UnsignedInt(2)).unwrap();
        assert!(storage.get("user", &shard2, &Value::UnsignedInt(2)).unwrap().is_some());
    }
}

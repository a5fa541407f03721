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

//! `UPDATE` (§4.4). When the SET list touches a column some `ShardDescriptor`
//! reads from, ownership may have changed, so the row can't just be
//! overwritten in place — it's executed as a synthesized DELETE then INSERT,
//! the same split `REPLACE`'s slow path uses. Otherwise every matching copy
//! is updated in place, one `replace` per shard it currently lives in.

use crate::filter::{candidates_for_filter, evaluate, ValueMapper};
use crate::insert::InsertCommand;
use crate::Engine;
use pshard_ast::{Insert, Update};
use pshard_dataflow::Record;
use pshard_encoding::decode_row;
use pshard_kernel::Result;

pub struct UpdateCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> UpdateCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> UpdateCommand<'a, 'b> {
        UpdateCommand { engine }
    }

    pub fn execute(&self, update: Update) -> Result<usize> {
        let table = self.engine.catalog.table(&update.table)?;
        let column_types = self.engine.column_types(&table);
        let indexed = self.engine.open_indexed_columns(&table)?;
        let mapper = ValueMapper::from_filter(update.filter.as_ref());

        let touches_ownership = table
            .owners
            .iter()
            .any(|desc| update.assignments.iter().any(|(name, _)| table.column_index(name) == Some(desc.column_index())));

        let candidates = candidates_for_filter(self.engine, &table, None, &mapper)?;
        let mut affected = 0;
        for (key, bytes) in candidates {
            let row = decode_row(&bytes, &column_types)?;
            if let Some(filter) = &update.filter {
                if !evaluate(filter, &table, &row)? {
                    continue;
                }
            }
            let mut updated = row.clone();
            for (name, value) in &update.assignments {
                if let Some(index) = table.column_index(name) {
                    updated[index] = value.clone();
                }
            }

            let pk = row[table.primary_key_index].clone();
            let shard_len = key.len() - pshard_encoding::encode_value(&pk)?.len();
            let shard = key[..shard_len].to_vec();

            if touches_ownership {
                self.engine
                    .storage
                    .delete_and_emit(&table.name, &shard, &pk, &column_types, &indexed, self.engine.sink)?;
                affected += InsertCommand::new(self.engine).execute(Insert {
                    table: table.name.clone(),
                    columns: Vec::new(),
                    rows: vec![updated],
                })?;
            } else {
                self.engine.storage.replace(&table.name, &shard, &pk, &updated, &indexed)?;
                self.engine.sink.emit(&table.name, vec![Record::Negative(row), Record::Positive(updated)]);
                affected += 1;
            }
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_table::CreateTableCommand;
    use crate::insert::InsertCommand;
    use pshard_ast::{Annotation, ColumnDef, CreateTable, Expr, ForeignKeyDef, Literal};
    use pshard_catalog::Catalog;
    use pshard_dataflow::RecordingSink;
    use pshard_encoding::{shard_key, ColumnType, Value};
    use pshard_storage::StorageEngine;

    fn setup() -> (Catalog, StorageEngine, RecordingSink) {
        (Catalog::new(), StorageEngine::open_in_memory().unwrap(), RecordingSink::new())
    }

    #[test]
    fn s6_update_that_flips_owner_moves_the_row_between_shards() {
        let (catalog, storage, sink) = setup();
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
        create
            .execute(CreateTable {
                table: "addr".to_owned(),
                columns: vec![
                    ColumnDef { name: "id".to_owned(), column_type: ColumnType::UnsignedInt, nullable: false, primary_key: true },
                    ColumnDef { name: "uid".to_owned(), column_type: ColumnType::UnsignedInt, nullable: false, primary_key: false },
                ],
                data_subject: false,
                foreign_keys: vec![ForeignKeyDef {
                    column: "uid".to_owned(),
                    references_table: "user".to_owned(),
                    references_column: "id".to_owned(),
                    annotation: Annotation::Owner,
                }],
            })
            .unwrap();
        let insert = InsertCommand::new(&engine);
        insert
            .execute(Insert { table: "user".to_owned(), columns: vec![], rows: vec![vec![Value::UnsignedInt(1)], vec![Value::UnsignedInt(2)]] })
            .unwrap();
        insert
            .execute(Insert { table: "addr".to_owned(), columns: vec![], rows: vec![vec![Value::UnsignedInt(10), Value::UnsignedInt(1)]] })
            .unwrap();

        let update = UpdateCommand::new(&engine);
        let affected = update
            .execute(Update {
                table: "addr".to_owned(),
                assignments: vec![("uid".to_owned(), Literal::UnsignedInt(2))],
                filter: Some(Expr::Eq(Box::new(Expr::Column("id".to_owned())), Box::new(Expr::Literal(Literal::UnsignedInt(10))))),
            })
            .unwrap();
        assert_eq!(affected, 1);

        let old_shard = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        let new_shard = shard_key("user", &Value::UnsignedInt(2)).unwrap();
        assert!(storage.get("addr", &old_shard, &Value::UnsignedInt(10)).unwrap().is_none());
        assert!(storage.get("addr", &new_shard, &Value::UnsignedInt(10)).unwrap().is_some());
    }

    #[test]
    fn in_place_update_leaves_the_row_in_its_shard() {
        let (catalog, storage, sink) = setup();
        let engine = Engine::new(&catalog, &storage, &sink);
        let create = CreateTableCommand::new(&engine);
        create
            .execute(CreateTable {
                table: "user".to_owned(),
                columns: vec![
                    ColumnDef { name: "id".to_owned(), column_type: ColumnType::UnsignedInt, nullable: false, primary_key: true },
                    ColumnDef { name: "name".to_owned(), column_type: ColumnType::Text, nullable: true, primary_key: false },
                ],
                data_subject: true,
                foreign_keys: vec![],
            })
            .unwrap();
        let insert = InsertCommand::new(&engine);
        insert
            .execute(Insert { table: "user".to_owned(), columns: vec![], rows: vec![vec![Value::UnsignedInt(1), Value::Text("ann".to_owned())]] })
            .unwrap();

        let update = UpdateCommand::new(&engine);
        let affected = update
            .execute(Update { table: "user".to_owned(), assignments: vec![("name".to_owned(), Literal::Text("bo".to_owned()))], filter: None })
            .unwrap();
        assert_eq!(affected, 1);

        let shard = shard_key("user", &Value::UnsignedInt(1)).unwrap();
        let bytes = storage.get("user", &shard, &Value::UnsignedInt(1)).unwrap().unwrap();
        let row = decode_row(&bytes, &[ColumnType::UnsignedInt, ColumnType::Text]).unwrap();
        assert_eq!(row[1], Value::Text("bo".to_owned()));
    }
}

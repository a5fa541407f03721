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

//! `SELECT` (§4.4): planner-less. Shard and candidate selection both come
//! straight out of the WHERE clause's top-level equalities; the rest of the
//! predicate is evaluated as a residual filter over the decoded row.

use crate::filter::{candidates_for_filter, evaluate, ValueMapper};
use crate::Engine;
use pshard_ast::Select;
use pshard_encoding::{decode_row, shard_key};
use pshard_kernel::{Error, Result};

pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<pshard_encoding::Value>>,
}

pub struct SelectCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> SelectCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> SelectCommand<'a, 'b> {
        SelectCommand { engine }
    }

    pub fn execute(&self, select: Select) -> Result<QueryResult> {
        let table = self.engine.catalog.table(&select.table)?;
        let column_types = self.engine.column_types(&table);
        let mapper = ValueMapper::from_filter(select.filter.as_ref());

        // A WHERE clause that pins one of the table's own owning kinds to a
        // literal narrows candidate lookup to that single shard, instead of
        // scanning every shard the row might live in.
        let shard = table
            .owners
            .iter()
            .find_map(|desc| mapper.get(desc.kind()).map(|value| shard_key(desc.kind(), value)))
            .transpose()?;

        let candidates = candidates_for_filter(self.engine, &table, shard.as_deref(), &mapper)?;

        let mut rows = Vec::new();
        for (_, bytes) in candidates {
            let row = decode_row(&bytes, &column_types)?;
            if let Some(filter) = &select.filter {
                if !evaluate(filter, &table, &row)? {
                    continue;
                }
            }
            rows.push(row);
            if let Some(limit) = select.limit {
                if rows.len() as u64 >= limit {
                    break;
                }
            }
        }

        let columns = match &select.projection {
            Some(names) => names.clone(),
            None => table.columns.iter().map(|c| c.name.clone()).collect(),
        };
        let rows = if select.projection.is_some() {
            rows.into_iter().map(|row| project(&table, &select.projection, row)).collect::<Result<Vec<_>>>()?
        } else {
            rows
        };

        Ok(QueryResult { columns, rows })
    }
}

fn project(
    table: &pshard_catalog::Table,
    projection: &Option<Vec<String>>,
    row: Vec<pshard_encoding::Value>,
) -> Result<Vec<pshard_encoding::Value>> {
    let Some(names) = projection else {
        return Ok(row);
    };
    names
        .iter()
        .map(|name| {
            let index = table
                .column_index(name)
                .ok_or_else(|| Error::invalid_argument(format!("unknown column '{}'", name)))?;
            Ok(row[index].clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_table::CreateTableCommand;
    use crate::insert::InsertCommand;
    use pshard_ast::{Annotation, ColumnDef, CreateTable, ForeignKeyDef, Insert};
    use pshard_catalog::Catalog;
    use pshard_dataflow::RecordingSink;
    use pshard_encoding::{ColumnType, Value};
    use pshard_storage::StorageEngine;

    #[test]
    fn s1_select_over_default_shard_is_empty_once_row_has_an_owner() {
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
        insert.execute(Insert { table: "user".to_owned(), columns: vec![], rows: vec![vec![Value::UnsignedInt(1)]] }).unwrap();
        insert
            .execute(Insert { table: "addr".to_owned(), columns: vec![], rows: vec![vec![Value::UnsignedInt(10), Value::UnsignedInt(1)]] })
            .unwrap();

        let select = SelectCommand::new(&engine);
        let result = select.execute(Select { table: "addr".to_owned(), projection: None, filter: None, limit: None }).unwrap();
        assert_eq!(result.rows, vec![vec![Value::UnsignedInt(10), Value::UnsignedInt(1)]]);
    }

    #[test]
    fn projection_selects_a_column_subset() {
        let catalog = Catalog::new();
        let storage = StorageEngine::open_in_memory().unwrap();
        let sink = RecordingSink::new();
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
            .execute(Insert {
                table: "user".to_owned(),
                columns: vec![],
                rows: vec![vec![Value::UnsignedInt(1), Value::Text("ann".to_owned())]],
            })
            .unwrap();

        let select = SelectCommand::new(&engine);
        let result = select
            .execute(Select { table: "user".to_owned(), projection: Some(vec!["name".to_owned()]), filter: None, limit: None })
            .unwrap();
        assert_eq!(result.rows, vec![vec![Value::Text("ann".to_owned())]]);
    }
}

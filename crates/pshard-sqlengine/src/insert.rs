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

//! `INSERT` (§4.4): resolves every way the table is owned into a set of
//! target shards (copying the row into each), falls back to the default
//! shard when nothing resolves, registers new subjects, and recurses into
//! dependents for the belated-association case (§4.5, §9 Open Question 1).

use crate::resolve::{migrate_dependents, resolve_insert_shards};
use crate::Engine;
use pshard_ast::Insert;
use pshard_catalog::Table;
use pshard_dataflow::Record;
use pshard_encoding::Value;
use pshard_kernel::{Error, Result};

pub struct InsertCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> InsertCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> InsertCommand<'a, 'b> {
        InsertCommand { engine }
    }

    pub fn execute(&self, insert: Insert) -> Result<usize> {
        let table = self.engine.catalog.table(&insert.table)?;
        let indexed = self.engine.open_indexed_columns(&table)?;
        let mut affected = 0;

        for values in insert.rows {
            let row = project_row(&table, &insert.columns, values)?;
            let pk = row[table.primary_key_index].clone();
            let shards = resolve_insert_shards(self.engine, &table, &row)?;

            for shard in &shards {
                self.engine.storage.insert(&table.name, shard, &pk, &row, &indexed)?;
                if table.create_statement.data_subject && shard_is_self(shard, &table.name) {
                    self.engine.catalog.register_subject(&table.name, &pk)?;
                }
            }
            self.engine.sink.emit(&table.name, vec![Record::Positive(row.clone())]);
            migrate_dependents(self.engine, &table, &row, &shards)?;
            affected += 1;
        }
        Ok(affected)
    }
}

fn shard_is_self(shard: &[u8], table_name: &str) -> bool {
    crate::shard_kind_matches(shard, table_name)
}

/// Builds the full row in schema-column order from an explicit or implicit
/// column list. A column absent from the statement defaults to `NULL`,
/// which is rejected downstream for any column that is not nullable.
pub fn project_row(table: &Table, columns: &[String], mut values: Vec<Value>) -> Result<Vec<Value>> {
    if columns.is_empty() {
        if values.len() != table.columns.len() {
            return Err(Error::invalid_argument(format!(
                "table '{}' has {} columns, {} values given",
                table.name,
                table.columns.len(),
                values.len()
            )));
        }
        return check_nullability(table, values);
    }
    if columns.len() != values.len() {
        return Err(Error::invalid_argument("column list and value list have different lengths"));
    }
    let mut row = vec![Value::Null; table.columns.len()];
    let mut seen = vec![false; table.columns.len()];
    for (name, value) in columns.iter().zip(values.drain(..)) {
        let index = table
            .column_index(name)
            .ok_or_else(|| Error::invalid_argument(format!("unknown column '{}' on table '{}'", name, table.name)))?;
        row[index] = value;
        seen[index] = true;
    }
    check_nullability(table, row)
}

fn check_nullability(table: &Table, row: Vec<Value>) -> Result<Vec<Value>> {
    for (value, column) in row.iter().zip(table.columns.iter()) {
        if value.is_null() && !column.nullable {
            return Err(Error::invalid_argument(format!("column '{}' is not nullable", column.name)));
        }
    }
    Ok(row)
}

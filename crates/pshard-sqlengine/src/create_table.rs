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

//! `CREATE TABLE` (§4.4): validates annotations via the catalog (§3.2),
//! creates the table's data CF and any secondary-index CFs the derivation
//! spawned. The create statement itself is kept verbatim in the catalog
//! (`Table::create_statement`) so a database can replay it on open (§6).

use crate::Engine;
use pshard_ast::CreateTable;
use pshard_catalog::Table;
use pshard_kernel::Result;

pub struct CreateTableCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> CreateTableCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> CreateTableCommand<'a, 'b> {
        CreateTableCommand { engine }
    }

    pub fn execute(&self, create: CreateTable) -> Result<Table> {
        let table_name = create.table.clone();
        let (table, new_indices) = self.engine.catalog.create_table(create)?;

        self.engine.storage.table_cf(&table_name)?;
        for descriptor in &new_indices {
            self.engine.storage.index(&descriptor.name)?;
            log::debug!("created index CF '{}' for table '{}'", descriptor.name, table_name);
        }
        Ok(table)
    }
}

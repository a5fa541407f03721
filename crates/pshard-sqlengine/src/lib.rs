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

//! The SQL engine (C6): one context struct per statement kind, each
//! translating the typed AST (`pshard-ast`) plus the catalog (`pshard-catalog`)
//! into storage calls (`pshard-storage`/`pshard-index`). Grounded on the
//! teacher's command-per-statement-kind pattern in
//! `src/sql_engine/src/{ddl,dml}/*.rs` (`InsertCommand::new(..).execute()`).

mod create_table;
mod delete;
mod explain;
mod filter;
mod forget;
mod get;
mod insert;
mod replace;
mod resolve;
mod select;
mod update;

pub use create_table::CreateTableCommand;
pub use delete::DeleteCommand;
pub use explain::{ExplainCommand, ExplainReport, TableExplanation};
pub use forget::ForgetCommand;
pub use get::GetCommand;
pub use insert::InsertCommand;
pub use replace::ReplaceCommand;
pub use select::{QueryResult, SelectCommand};
pub use update::UpdateCommand;

use pshard_catalog::{Catalog, Table};
use pshard_dataflow::DataflowSink;
use pshard_encoding::ColumnType;
use pshard_kernel::Result;
use pshard_storage::{IndexedColumns, StorageEngine};

/// Everything a statement context needs: the shared catalog, the shared KV
/// handle, and the dataflow sink mutations are emitted into. One `Engine`
/// per `Connection` (C7), shared across sessions — it owns no per-statement
/// state itself.
pub struct Engine<'a> {
    pub catalog: &'a Catalog,
    pub storage: &'a StorageEngine,
    pub sink: &'a dyn DataflowSink,
}

impl<'a> Engine<'a> {
    pub fn new(catalog: &'a Catalog, storage: &'a StorageEngine, sink: &'a dyn DataflowSink) -> Engine<'a> {
        Engine { catalog, storage, sink }
    }

    pub fn column_types(&self, table: &Table) -> Vec<ColumnType> {
        table.columns.iter().map(|c| c.column_type).collect()
    }

    /// Opens every simple index rooted at `table` (§4.2: "for each secondary
    /// index of the table"), ready to hand to `pshard-storage` for
    /// maintenance on insert/replace/update/delete.
    pub fn open_indexed_columns(&self, table: &Table) -> Result<IndexedColumns> {
        let mut entries = Vec::new();
        for (column_index, index_name) in self.catalog.indices_for_table(table) {
            let index = self.storage.index(&index_name)?;
            entries.push((column_index, table.column(column_index).column_type, index));
        }
        Ok(IndexedColumns { entries })
    }
}

/// `true` when `shard_key` was built for `kind` — i.e. starts with
/// `kind ‖ SEP`. Used to filter cross-shard index matches down to the
/// specific kind a `ShardDescriptor` resolves for, since a table's own
/// self-pk index mixes entries from every kind it has ever been owned by.
pub fn shard_kind_matches(shard_key: &[u8], kind: &str) -> bool {
    let prefix_len = kind.len();
    shard_key.len() > prefix_len && &shard_key[..prefix_len] == kind.as_bytes() && shard_key[prefix_len] == pshard_encoding::SEP
}

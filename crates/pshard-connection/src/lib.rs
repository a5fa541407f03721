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

//! Connection (C7): owns the single shared catalog and KV handle for a
//! database directory, and per-session transaction state. Grounded on
//! `data_manager::persistent::PersistentDatabase` for the open/recover
//! pattern (a `was_recovered()` flag driving whether prior state is
//! replayed) and on `sql_engine::session::Session` for the idea of
//! session-scoped state riding on top of one shared backend.
//!
//! `BEGIN`/`COMMIT`/`ROLLBACK` (§3's C7 description) track only whether a
//! session is inside a transaction; per the Non-goals, this system gives no
//! isolation stronger than per-statement atomicity, so there is no staging
//! area to roll back — `ROLLBACK` just closes the transaction marker. See
//! `DESIGN.md` for this Open Question's resolution.

use pshard_ast::Statement;
use pshard_catalog::Catalog;
use pshard_dataflow::DataflowSink;
use pshard_kernel::{Error, Result};
use pshard_sqlengine::{
    CreateTableCommand, DeleteCommand, Engine, ExplainCommand, ExplainReport, ForgetCommand, GetCommand, InsertCommand,
    QueryResult, ReplaceCommand, SelectCommand, UpdateCommand,
};
use pshard_storage::StorageEngine;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = ".state.txt";

/// What executing one `Statement` produced, handed back to the CLI (or any
/// other frontend) to render.
pub enum StatementResult {
    Ack,
    RowsAffected(usize),
    Rows(QueryResult),
    /// `GET`'s one result set per table the subject's kind owns.
    Subject(Vec<(String, QueryResult)>),
    Explain(ExplainReport),
}

/// The shared sharder state a database directory holds: the catalog and
/// the KV handle, process-global per §5 ("The single KV handle and the
/// catalog are process-global").
pub struct Database {
    path: Option<PathBuf>,
    catalog: Catalog,
    storage: StorageEngine,
}

impl Database {
    /// Opens (or creates) the database at `path`, replaying `.state.txt`
    /// when present. Returns whether an existing database was recovered.
    pub fn open(path: &Path) -> Result<(Database, bool)> {
        let (storage, storage_recovered) = StorageEngine::open_on_disk(path)?;
        let state_path = path.join(STATE_FILE);
        let (catalog, catalog_recovered) = match fs::read_to_string(&state_path) {
            Ok(text) => (Catalog::from_text(&text)?, true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Catalog::new(), false),
            Err(e) => return Err(Error::from(e)),
        };
        let recovered = storage_recovered || catalog_recovered;
        log::info!("opened database at {:?} (recovered: {})", path, recovered);
        Ok((Database { path: Some(path.to_owned()), catalog, storage }, recovered))
    }

    pub fn open_in_memory() -> Result<Database> {
        Ok(Database { path: None, catalog: Catalog::new(), storage: StorageEngine::open_in_memory()? })
    }

    /// Rewrites `.state.txt` with the current catalog and flushes the KV
    /// backend, the clean-shutdown persistence path of §6.
    pub fn close(&self) -> Result<()> {
        self.storage.flush()?;
        if let Some(path) = &self.path {
            let text = self.catalog.to_text()?;
            fs::write(path.join(STATE_FILE), text).map_err(Error::from)?;
        }
        Ok(())
    }

    pub fn session<'d, 's>(&'d self, sink: &'s dyn DataflowSink) -> Connection<'d, 's> {
        Connection { database: self, sink, in_transaction: false }
    }
}

/// Per-session state (C7): which statement context to build next and
/// whether a transaction is currently open. Multiple `Connection`s may
/// share one `Database` concurrently; the catalog's upgradable lock (§5)
/// is what actually serializes their access to shared state.
pub struct Connection<'d, 's> {
    database: &'d Database,
    sink: &'s dyn DataflowSink,
    in_transaction: bool,
}

impl<'d, 's> Connection<'d, 's> {
    pub fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::failed_precondition("a transaction is already open on this session"));
        }
        self.in_transaction = true;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::failed_precondition("no transaction is open on this session"));
        }
        self.in_transaction = false;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::failed_precondition("no transaction is open on this session"));
        }
        self.in_transaction = false;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Executes one statement against the shared database, dispatching to
    /// the matching `pshard-sqlengine` command context (§4.4).
    pub fn execute(&self, statement: Statement) -> Result<StatementResult> {
        let engine = Engine::new(&self.database.catalog, &self.database.storage, self.sink);
        Ok(match statement {
            Statement::CreateTable(create) => {
                CreateTableCommand::new(&engine).execute(create)?;
                StatementResult::Ack
            }
            Statement::Insert(insert) => StatementResult::RowsAffected(InsertCommand::new(&engine).execute(insert)?),
            Statement::Replace(replace) => StatementResult::RowsAffected(ReplaceCommand::new(&engine).execute(replace)?),
            Statement::Update(update) => StatementResult::RowsAffected(UpdateCommand::new(&engine).execute(update)?),
            Statement::Delete(delete) => StatementResult::RowsAffected(DeleteCommand::new(&engine).execute(delete)?),
            Statement::Select(select) => StatementResult::Rows(SelectCommand::new(&engine).execute(select)?),
            Statement::Forget(forget) => StatementResult::RowsAffected(ForgetCommand::new(&engine).execute(forget)?),
            Statement::Get(get) => StatementResult::Subject(GetCommand::new(&engine).execute(get)?),
            Statement::Explain(explain) => StatementResult::Explain(ExplainCommand::new(&engine).execute(explain)?),
        })
    }
}

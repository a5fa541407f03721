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

//! CLI surface (§6, minimum): open database, execute string, close. The SQL
//! parser is out of scope (§1) — statements arrive already as a
//! bincode-encoded `Vec<pshard_ast::Statement>`, read from a file named on
//! the command line or from stdin, matching the typed-AST boundary the
//! engine is actually driven by. Exit codes: 0 on success, nonzero on the
//! first fatal statement.

use pshard_ast::Statement;
use pshard_connection::{Database, StatementResult};
use pshard_dataflow::{DataflowSink, Record};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

/// Logs every emitted mutation; the dataflow/materialized-view subsystem
/// that would otherwise consume these records is out of scope (§1).
struct LoggingSink;

impl DataflowSink for LoggingSink {
    fn emit(&self, table: &str, records: Vec<Record>) {
        log::debug!("{}: {} record(s) emitted", table, records.len());
    }
}

fn main() -> ExitCode {
    if let Ok(()) = simple_logger::SimpleLogger::new().init() {}

    let mut args = std::env::args().skip(1);
    let Some(target) = args.next() else {
        eprintln!("usage: pshard-cli <db-path|--in-memory> [statements-file]");
        return ExitCode::FAILURE;
    };
    let statements_path = args.next();

    let statements = match read_statements(statements_path) {
        Ok(statements) => statements,
        Err(e) => {
            log::error!("failed to read statements: {}", e);
            return ExitCode::FAILURE;
        }
    };

    run(&target, statements)
}

fn read_statements(path: Option<String>) -> std::io::Result<Vec<Statement>> {
    let bytes = match path {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    bincode::deserialize(&bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn run(target: &str, statements: Vec<Statement>) -> ExitCode {
    let sink = LoggingSink;

    let database = if target == "--in-memory" {
        match Database::open_in_memory() {
            Ok(db) => db,
            Err(e) => {
                log::error!("failed to open in-memory database: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        match Database::open(&PathBuf::from(target)) {
            Ok((db, recovered)) => {
                log::info!("opened '{}' (recovered: {})", target, recovered);
                db
            }
            Err(e) => {
                log::error!("failed to open '{}': {}", target, e);
                return ExitCode::FAILURE;
            }
        }
    };

    let conn = database.session(&sink);
    for statement in statements {
        match conn.execute(statement) {
            Ok(StatementResult::RowsAffected(count)) => log::info!("ok, {} row(s) affected", count),
            Ok(StatementResult::Rows(result)) => log::info!("ok, {} row(s) returned", result.rows.len()),
            Ok(StatementResult::Subject(tables)) => log::info!("ok, {} table(s) returned", tables.len()),
            Ok(StatementResult::Explain(report)) => log::info!("ok, explained {} table(s)", report.tables.len()),
            Ok(StatementResult::Ack) => log::info!("ok"),
            Err(e) => {
                log::error!("statement failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = database.close() {
        log::error!("failed to close database: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

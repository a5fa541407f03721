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

//! `EXPLAIN PRIVACY` (§4.4's last paragraph). Walks the catalog and prints,
//! per table, how each owner/accessor resolves plus a warning list: chains
//! of variable ownership longer than one hop, more than one variable
//! ownership on the same table, ownership that can never actually pin down
//! a shard (every FK column involved is nullable), and column names that
//! look like PII sitting in a table nothing shards.

use crate::Engine;
use pshard_ast::Explain;
use pshard_catalog::{ShardDescriptor, Table};
use pshard_kernel::Result;

pub struct TableExplanation {
    pub table: String,
    pub owners: Vec<String>,
    pub accessors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct ExplainReport {
    pub tables: Vec<TableExplanation>,
}

const PII_LIKE_NAMES: &[&str] = &["email", "ssn", "ssn_number", "phone", "address", "dob", "date_of_birth", "full_name", "name", "ip_address"];

pub struct ExplainCommand<'a, 'b> {
    engine: &'a Engine<'b>,
}

impl<'a, 'b> ExplainCommand<'a, 'b> {
    pub fn new(engine: &'a Engine<'b>) -> ExplainCommand<'a, 'b> {
        ExplainCommand { engine }
    }

    pub fn execute(&self, explain: Explain) -> Result<ExplainReport> {
        let tables = match &explain.table {
            Some(name) => vec![self.engine.catalog.table(name)?],
            None => self.engine.catalog.all_tables(),
        };
        let mut explanations: Vec<TableExplanation> = tables.iter().map(|t| self.explain_table(t, &tables)).collect();
        explanations.sort_by(|a, b| a.table.cmp(&b.table));
        Ok(ExplainReport { tables: explanations })
    }

    fn explain_table(&self, table: &Table, universe: &[Table]) -> TableExplanation {
        let owners: Vec<String> = table.owners.iter().map(describe).collect();
        let accessors: Vec<String> = table.accessors.iter().map(describe).collect();

        let mut warnings = Vec::new();

        let variable_count = table.owners.iter().filter(|d| matches!(d, ShardDescriptor::Variable { .. })).count();
        if variable_count > 1 {
            warnings.push(format!("table '{}' has {} distinct variable ownerships", table.name, variable_count));
        }

        for desc in &table.owners {
            if let ShardDescriptor::Variable { origin_table, .. } = desc {
                if let Some(origin) = universe.iter().find(|t| &t.name == origin_table) {
                    if origin.owners.iter().any(|d| matches!(d, ShardDescriptor::Variable { .. })) {
                        warnings.push(format!(
                            "table '{}' is owned through a chain of variable ownerships longer than one hop (via '{}')",
                            table.name, origin_table
                        ));
                    }
                }
            }
        }

        if !table.owners.is_empty() && table.owners.iter().all(|desc| table.column(desc.column_index()).nullable) {
            warnings.push(format!("table '{}' is owned only through nullable columns; rows may silently land in the default shard", table.name));
        }

        if table.owners.is_empty() {
            for column in &table.columns {
                let lower = column.name.to_lowercase();
                if PII_LIKE_NAMES.iter().any(|pii| lower.contains(pii)) {
                    warnings.push(format!("unsharded table '{}' has a column '{}' that looks like it holds personal data", table.name, column.name));
                }
            }
        }

        TableExplanation { table: table.name.clone(), owners, accessors, warnings }
    }
}

fn describe(desc: &ShardDescriptor) -> String {
    match desc {
        ShardDescriptor::Direct { column, kind, .. } => format!("DIRECT via '{}' -> kind '{}'", column, kind),
        ShardDescriptor::Transitive { column, kind, next_table, index, via_variable, .. } => format!(
            "TRANSITIVE via '{}' through '{}' (index '{}'{}) -> kind '{}'",
            column,
            next_table,
            index,
            if *via_variable { ", variable upstream" } else { "" },
            kind
        ),
        ShardDescriptor::Variable { origin_table, origin_column, kind, .. } => {
            format!("VARIABLE via '{}.{}' -> kind '{}'", origin_table, origin_column, kind)
        }
    }
}

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

//! The catalog's schema types (§3.1): `Table`, `ShardKind`, `ShardDescriptor`
//! and `IndexDescriptor`.

use pshard_ast::CreateTable;
use pshard_encoding::ColumnType;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// A registered data-subject kind: a table whose rows each head a shard.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ShardKind {
    pub name: String,
    pub pk_column: String,
    pub pk_column_index: usize,
}

/// A index the engine maintains to resolve ownership without knowing the
/// shard up front. `Simple` is a pk-keyed index on a table that is itself
/// a step in some ownership chain; `Joined` composes a simple index on this
/// table's FK column with an upstream index already in the registry, so a
/// multi-hop TRANSITIVE chain never duplicates the base index.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum IndexVariant {
    Simple { table: String, column: String },
    Joined { table: String, column: String, joined_index: String },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub variant: IndexVariant,
}

/// One way a table's rows are owned or accessed (§3.1, §4.4).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ShardDescriptor {
    /// The table holds the subject id itself — `kind == subject table name`
    /// both for the self-direct case (a data-subject table's own rows) and
    /// for a table one hop from it.
    Direct { column: String, column_index: usize, kind: String },
    /// Ownership is resolved by looking up `column`'s value (a FK to some
    /// table `next_table`) in `index`, which maps `next_table`'s pk to the
    /// shard(s) it lives in. `via_variable` records whether that lookup is
    /// allowed to come back empty (when the upstream link is itself a
    /// not-yet-associated VARIABLE one) rather than failing as a dangling FK.
    Transitive {
        column: String,
        column_index: usize,
        kind: String,
        next_table: String,
        next_column: String,
        index: String,
        via_variable: bool,
    },
    /// Ownership was retroactively granted by another table's `OWNS`
    /// annotation: `origin_table.origin_column` points back at this table's
    /// pk, and `index` (on `origin_table`) is scanned to find association
    /// rows whose shard determines this row's shard.
    Variable {
        column: String,
        column_index: usize,
        kind: String,
        origin_table: String,
        origin_column: String,
        index: String,
    },
}

impl ShardDescriptor {
    pub fn kind(&self) -> &str {
        match self {
            ShardDescriptor::Direct { kind, .. }
            | ShardDescriptor::Transitive { kind, .. }
            | ShardDescriptor::Variable { kind, .. } => kind,
        }
    }

    pub fn column_index(&self) -> usize {
        match self {
            ShardDescriptor::Direct { column_index, .. }
            | ShardDescriptor::Transitive { column_index, .. }
            | ShardDescriptor::Variable { column_index, .. } => *column_index,
        }
    }

    pub fn index_name(&self) -> Option<&str> {
        match self {
            ShardDescriptor::Direct { .. } => None,
            ShardDescriptor::Transitive { index, .. } | ShardDescriptor::Variable { index, .. } => Some(index),
        }
    }

    fn is_self_direct(&self, table_name: &str) -> bool {
        matches!(self, ShardDescriptor::Direct { kind, .. } if kind == table_name)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key_index: usize,
    pub owners: Vec<ShardDescriptor>,
    pub accessors: Vec<ShardDescriptor>,
    /// Tables whose ownership must be recomputed when a row is inserted
    /// into or deleted from this table (§4.4, §4.5's belated association).
    pub dependents: Vec<String>,
    pub create_statement: CreateTable,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, index: usize) -> &ColumnDefinition {
        &self.columns[index]
    }

    pub fn primary_key_column(&self) -> &ColumnDefinition {
        &self.columns[self.primary_key_index]
    }

    /// `true` when `way` represents "this table's own pk is the subject" —
    /// the base case `OWNER`/`ACCESSOR` derivation stops recursing on.
    pub fn is_self_direct(way: &ShardDescriptor, table_name: &str) -> bool {
        way.is_self_direct(table_name)
    }
}

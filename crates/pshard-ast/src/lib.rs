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

//! The typed AST contract the SQL engine consumes (§6). The parser that
//! produces this tree from SQL text is out of scope (§1); this crate only
//! names the shape the engine is driven by, deliberately independent of
//! any particular parser's AST (the teacher wires `sqlparser::ast` in
//! directly, which this system does not do since the parser is an
//! external collaborator here, not a dependency of the core).

pub use pshard_encoding::{ColumnType, Value as Literal};

/// Expression tree: `{EQ, AND, OR, GT, IN, LITERAL, COLUMN, LITERAL_LIST}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Eq(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    Literal(Literal),
    Column(String),
    LiteralList(Vec<Literal>),
}

/// How a foreign-key column on a `CREATE TABLE` is annotated (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Annotation {
    Owner,
    Accessor,
    Owns,
    Accesses,
    Only,
    Default,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ForeignKeyDef {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CreateTable {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub data_subject: bool,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Literal>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Replace {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Literal>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Literal)>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Select {
    pub table: String,
    pub projection: Option<Vec<String>>,
    pub filter: Option<Expr>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Forget {
    pub kind: String,
    pub subject_id: Literal,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Get {
    pub kind: String,
    pub subject_id: Literal,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Explain {
    pub table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Statement {
    CreateTable(CreateTable),
    Insert(Insert),
    Replace(Replace),
    Update(Update),
    Delete(Delete),
    Select(Select),
    Forget(Forget),
    Get(Get),
    Explain(Explain),
}

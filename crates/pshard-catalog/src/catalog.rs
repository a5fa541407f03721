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

//! `Catalog`: the sharder's table registry and the derivation rules that
//! turn a `CREATE TABLE`'s FK annotations into `ShardDescriptor`s (§3.2).

use crate::lock::Upgradable;
use crate::schema::{ColumnDefinition, IndexDescriptor, IndexVariant, ShardDescriptor, ShardKind, Table};
use pshard_ast::{Annotation, CreateTable, ForeignKeyDef};
use pshard_encoding::Value;
use pshard_kernel::{Error, Result};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct CatalogState {
    tables: HashMap<String, Table>,
    shard_kinds: HashMap<String, ShardKind>,
    indices: HashMap<String, IndexDescriptor>,
    /// Subjects observed so far, per kind, keyed by the encoded subject id —
    /// used to tell a first insert for a kind (which must register the
    /// subject) apart from a later one.
    subjects: HashMap<String, HashSet<Vec<u8>>>,
    next_index_id: u64,
}

pub struct Catalog {
    state: Upgradable<CatalogState>,
}

impl Default for Catalog {
    fn default() -> Catalog {
        Catalog::new()
    }
}

impl Catalog {
    pub fn new() -> Catalog {
        Catalog { state: Upgradable::new(CatalogState::default()) }
    }

    /// Parses the text form `to_text` produces — the `.state.txt` contract
    /// of §6 ("a text file storing the serialized catalog").
    pub fn from_text(text: &str) -> Result<Catalog> {
        let state: CatalogState = serde_json::from_str(text).map_err(|e| Error::internal(format!("corrupt catalog state: {}", e)))?;
        Ok(Catalog { state: Upgradable::new(state) })
    }

    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string_pretty(&*self.state.read()).map_err(|e| Error::internal(format!("cannot serialize catalog: {}", e)))
    }

    pub fn table(&self, name: &str) -> Result<Table> {
        self.state
            .read()
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("table '{}' does not exist", name)))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.state.read().tables.contains_key(name)
    }

    pub fn shard_kind(&self, name: &str) -> Option<ShardKind> {
        self.state.read().shard_kinds.get(name).cloned()
    }

    pub fn index(&self, name: &str) -> Result<IndexDescriptor> {
        self.state
            .read()
            .indices
            .get(name)
            .cloned()
            .ok_or_else(|| Error::internal(format!("unknown index '{}'", name)))
    }

    /// Every table owned (directly or transitively) by `kind` — the set
    /// `FORGET`/`GET` must visit (§6).
    pub fn tables_owned_by_kind(&self, kind: &str) -> Vec<String> {
        self.state
            .read()
            .tables
            .values()
            .filter(|t| t.owners.iter().any(|w| w.kind() == kind))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Every registered table, for `EXPLAIN` and catalog replay.
    pub fn all_tables(&self) -> Vec<Table> {
        self.state.read().tables.values().cloned().collect()
    }

    pub fn all_shard_kinds(&self) -> Vec<ShardKind> {
        self.state.read().shard_kinds.values().cloned().collect()
    }

    /// Number of distinct subjects observed for `kind` so far.
    pub fn subject_count(&self, kind: &str) -> usize {
        self.state.read().subjects.get(kind).map_or(0, |s| s.len())
    }

    /// The simple indices rooted at `table`: `(column_index, index_name)`
    /// pairs that must be maintained whenever a row of `table` is written,
    /// because some other table's ownership chain resolves through them
    /// (§4.2's "for each secondary index of the table").
    pub fn indices_for_table(&self, table: &Table) -> Vec<(usize, String)> {
        self.state
            .read()
            .indices
            .values()
            .filter_map(|d| match &d.variant {
                IndexVariant::Simple { table: t, column } if t == &table.name => {
                    table.column_index(column).map(|idx| (idx, d.name.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// First-time registration of a subject id for `kind`, guarded by the
    /// upgrade path so concurrent inserts for distinct subjects don't race
    /// on the registration set (§5's lazy per-shard initialization).
    pub fn register_subject(&self, kind: &str, subject: &Value) -> Result<bool> {
        let encoded = pshard_encoding::encode_value(subject)?;
        let guard = self.state.read();
        if guard.subjects.get(kind).is_some_and(|seen| seen.contains(&encoded)) {
            return Ok(false);
        }
        Ok(self.state.upgrade(guard, |state| {
            state.subjects.entry(kind.to_owned()).or_default().insert(encoded)
        }))
    }

    /// Registers a `CREATE TABLE`, deriving its `ShardDescriptor`s from its
    /// FK annotations (§3.2) and retroactively updating any table it `OWNS`
    /// or `ACCESSES`. Returns the newly created `IndexDescriptor`s so the
    /// storage layer can open their column families.
    pub fn create_table(&self, create: CreateTable) -> Result<(Table, Vec<IndexDescriptor>)> {
        let guard = self.state.read();
        if guard.tables.contains_key(&create.table) {
            return Err(Error::invalid_argument(format!("table '{}' already exists", create.table)));
        }
        drop(guard);

        self.state.upgrade(self.state.read(), |state| Self::create_table_locked(state, create))
    }

    fn create_table_locked(state: &mut CatalogState, create: CreateTable) -> Result<(Table, Vec<IndexDescriptor>)> {
        let columns: Vec<ColumnDefinition> = create
            .columns
            .iter()
            .map(|c| ColumnDefinition { name: c.name.clone(), column_type: c.column_type, nullable: c.nullable })
            .collect();
        let primary_key_index = create
            .columns
            .iter()
            .position(|c| c.primary_key)
            .ok_or_else(|| Error::invalid_argument(format!("table '{}' declares no primary key", create.table)))?;

        validate_foreign_keys(state, &create)?;

        let mut new_indices = Vec::new();
        let mut table = Table {
            name: create.table.clone(),
            columns,
            primary_key_index,
            owners: Vec::new(),
            accessors: Vec::new(),
            dependents: Vec::new(),
            create_statement: create.clone(),
        };

        if create.data_subject {
            state.shard_kinds.insert(
                create.table.clone(),
                ShardKind {
                    name: create.table.clone(),
                    pk_column: table.primary_key_column().name.clone(),
                    pk_column_index: primary_key_index,
                },
            );
            table.owners.push(ShardDescriptor::Direct {
                column: table.primary_key_column().name.clone(),
                column_index: primary_key_index,
                kind: create.table.clone(),
            });
        }

        let resolved = resolve_default_annotations(&create, state)?;

        for (fk, annotation) in create.foreign_keys.iter().zip(resolved.iter()) {
            match annotation {
                Annotation::Only | Annotation::Default => {}
                Annotation::Owner | Annotation::Accessor => {
                    derive_owner_or_accessor(state, &mut table, fk, *annotation, &mut new_indices)?;
                }
                Annotation::Owns | Annotation::Accesses => {}
            }
        }

        // OWNS/ACCESSES read back this table's own owners, so they run in a
        // second pass once direct/transitive derivation above has settled.
        for (fk, annotation) in create.foreign_keys.iter().zip(resolved.iter()) {
            match annotation {
                Annotation::Owns | Annotation::Accesses => {
                    derive_variable(state, &mut table, fk, *annotation, &mut new_indices)?;
                }
                _ => {}
            }
        }

        let missing_from_accessors: Vec<ShardDescriptor> =
            table.owners.iter().filter(|w| !table.accessors.contains(w)).cloned().collect();
        table.accessors.extend(missing_from_accessors);

        state.tables.insert(table.name.clone(), table.clone());
        Ok((table, new_indices))
    }
}

/// Resolves `Annotation::Default` FKs into an explicit `Owner`, following
/// §3.2: a FK defaults to `OWNER` when its target is itself a data subject
/// or already owned, and only one FK per table may resolve that way.
fn resolve_default_annotations(create: &CreateTable, state: &CatalogState) -> Result<Vec<Annotation>> {
    let mut resolved = Vec::with_capacity(create.foreign_keys.len());
    let mut implicit_owner_seen = false;
    for fk in &create.foreign_keys {
        if fk.annotation != Annotation::Default {
            resolved.push(fk.annotation);
            continue;
        }
        let target = state
            .tables
            .get(&fk.references_table)
            .ok_or_else(|| Error::invalid_argument(format!("FK target table '{}' does not exist", fk.references_table)))?;
        let eligible = state.shard_kinds.contains_key(&target.name) || !target.owners.is_empty();
        if eligible {
            if implicit_owner_seen {
                return Err(Error::failed_precondition(format!(
                    "table '{}' has more than one implicit OWNER; annotate all but one explicitly",
                    create.table
                )));
            }
            implicit_owner_seen = true;
            resolved.push(Annotation::Owner);
        } else {
            resolved.push(Annotation::Default);
        }
    }
    Ok(resolved)
}

fn validate_foreign_keys(state: &CatalogState, create: &CreateTable) -> Result<()> {
    for fk in &create.foreign_keys {
        if !create.columns.iter().any(|c| c.name == fk.column) {
            return Err(Error::invalid_argument(format!(
                "table '{}' declares a FK on undeclared column '{}'",
                create.table, fk.column
            )));
        }
        let target = state
            .tables
            .get(&fk.references_table)
            .ok_or_else(|| Error::invalid_argument(format!("FK target table '{}' does not exist", fk.references_table)))?;
        if target.primary_key_column().name != fk.references_column {
            return Err(Error::invalid_argument(format!(
                "FK on '{}.{}' must reference '{}''s primary key, not '{}'",
                create.table, fk.column, fk.references_table, fk.references_column
            )));
        }
        if fk.references_table == create.table {
            return Err(Error::failed_precondition(format!(
                "table '{}' cannot declare a FK referencing itself",
                create.table
            )));
        }
    }
    Ok(())
}

/// `OWNER`/`ACCESSOR`: for every way the FK target is owned (or accessed,
/// for the transitive accessor case), derive the equivalent way this table
/// is owned/accessed, substituting the FK column for the target's key.
fn derive_owner_or_accessor(
    state: &mut CatalogState,
    table: &mut Table,
    fk: &ForeignKeyDef,
    annotation: Annotation,
    new_indices: &mut Vec<IndexDescriptor>,
) -> Result<()> {
    let column_index = table
        .columns
        .iter()
        .position(|c| c.name == fk.column)
        .expect("validated by validate_foreign_keys");
    let target = state
        .tables
        .get(&fk.references_table)
        .cloned()
        .expect("validated by validate_foreign_keys");

    let ways: Vec<ShardDescriptor> = if annotation == Annotation::Owner {
        target.owners.clone()
    } else {
        let mut ways = target.owners.clone();
        for way in &target.accessors {
            if !ways.contains(way) {
                ways.push(way.clone());
            }
        }
        ways
    };

    if ways.is_empty() {
        return Err(Error::failed_precondition(format!(
            "'{}' annotated on '{}.{}' but '{}' is not a data subject and is not owned",
            annotation_name(annotation),
            table.name,
            fk.column,
            fk.references_table
        )));
    }

    for way in &ways {
        let derived = if Table::is_self_direct(way, &target.name) {
            ShardDescriptor::Direct { column: fk.column.clone(), column_index, kind: target.name.clone() }
        } else {
            // The physical index is always `target`'s own self-pk index: it
            // records every shard `target`'s row currently lives in, for
            // whichever kind it ends up owned by, so a chain of any depth
            // resolves through the same one index per intermediate table
            // rather than a distinct index per upstream `way`.
            let index_name = index_for_simple(state, &target.name, &target.primary_key_column().name.clone(), new_indices);
            let via_variable = matches!(way, ShardDescriptor::Variable { .. });
            ShardDescriptor::Transitive {
                column: fk.column.clone(),
                column_index,
                kind: way.kind().to_owned(),
                next_table: target.name.clone(),
                next_column: target.primary_key_column().name.clone(),
                index: index_name,
                via_variable,
            }
        };
        if annotation == Annotation::Owner {
            table.owners.push(derived);
        } else {
            table.accessors.push(derived);
        }
    }
    Ok(())
}

/// `OWNS`/`ACCESSES`: retroactively grants the FK target a `VARIABLE` way
/// of being owned/accessed via this table's association rows, for every
/// way this table is itself already owned.
fn derive_variable(
    state: &mut CatalogState,
    table: &mut Table,
    fk: &ForeignKeyDef,
    annotation: Annotation,
    new_indices: &mut Vec<IndexDescriptor>,
) -> Result<()> {
    if table.owners.is_empty() {
        return Err(Error::failed_precondition(format!(
            "'{}' annotated on '{}.{}' but '{}' is not itself owned by anything to propagate",
            annotation_name(annotation),
            table.name,
            fk.column,
            table.name
        )));
    }
    let target_name = fk.references_table.clone();
    if target_name == table.name {
        return Err(Error::failed_precondition(format!("table '{}' cannot OWN itself", table.name)));
    }

    let own_ways = table.owners.clone();
    let self_index = index_for_simple(state, &table.name, &fk.column, new_indices);

    let target = state
        .tables
        .get_mut(&target_name)
        .ok_or_else(|| Error::invalid_argument(format!("FK target table '{}' does not exist", target_name)))?;
    let target_pk_column = target.primary_key_column().name.clone();
    let target_pk_index = target.primary_key_index;

    for way in &own_ways {
        let derived = ShardDescriptor::Variable {
            column: target_pk_column.clone(),
            column_index: target_pk_index,
            kind: way.kind().to_owned(),
            origin_table: table.name.clone(),
            origin_column: fk.column.clone(),
            index: self_index.clone(),
        };
        if annotation == Annotation::Owns {
            if !target.owners.contains(&derived) {
                target.owners.push(derived.clone());
            }
        } else if !target.accessors.contains(&derived) {
            target.accessors.push(derived);
        }
    }

    if annotation == Annotation::Owns && !table.dependents.contains(&target_name) {
        table.dependents.push(target_name);
    }
    Ok(())
}

/// Returns the name of the simple pk-keyed index on `(table, column)`,
/// creating it if this is the first descriptor that needs it.
fn index_for_simple(state: &mut CatalogState, table: &str, column: &str, new_indices: &mut Vec<IndexDescriptor>) -> String {
    let shape = IndexVariant::Simple { table: table.to_owned(), column: column.to_owned() };
    if let Some(existing) = state.indices.values().find(|d| d.variant == shape) {
        return existing.name.clone();
    }
    state.next_index_id += 1;
    let name = format!("{}__{}__idx_{}", table, column, state.next_index_id);
    let descriptor = IndexDescriptor { name: name.clone(), variant: shape };
    state.indices.insert(name.clone(), descriptor.clone());
    new_indices.push(descriptor);
    name
}

fn annotation_name(annotation: Annotation) -> &'static str {
    match annotation {
        Annotation::Owner => "OWNER",
        Annotation::Accessor => "ACCESSOR",
        Annotation::Owns => "OWNS",
        Annotation::Accesses => "ACCESSES",
        Annotation::Only => "ONLY",
        Annotation::Default => "default",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pshard_ast::ColumnDef;
    use pshard_encoding::ColumnType;

    fn column(name: &str, ty: ColumnType, pk: bool) -> ColumnDef {
        ColumnDef { name: name.to_owned(), column_type: ty, nullable: !pk, primary_key: pk }
    }

    fn fk(column: &str, references_table: &str, annotation: Annotation) -> ForeignKeyDef {
        ForeignKeyDef {
            column: column.to_owned(),
            references_table: references_table.to_owned(),
            references_column: "id".to_owned(),
            annotation,
        }
    }

    #[rstest::fixture]
    fn catalog() -> Catalog {
        Catalog::new()
    }

    #[rstest::rstest]
    fn data_subject_table_owns_itself_directly(catalog: Catalog) {
        let create = CreateTable {
            table: "user".to_owned(),
            columns: vec![column("id", ColumnType::UnsignedInt, true)],
            data_subject: true,
            foreign_keys: vec![],
        };
        let (table, new_indices) = catalog.create_table(create).unwrap();
        assert!(new_indices.is_empty());
        assert_eq!(table.owners.len(), 1);
        assert!(matches!(&table.owners[0], ShardDescriptor::Direct { kind, .. } if kind == "user"));
    }

    #[rstest::rstest]
    fn owner_on_a_subject_fk_derives_direct_ownership(catalog: Catalog) {
        catalog
            .create_table(CreateTable {
                table: "user".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true)],
                data_subject: true,
                foreign_keys: vec![],
            })
            .unwrap();
        let (addr, new_indices) = catalog
            .create_table(CreateTable {
                table: "addr".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true), column("uid", ColumnType::UnsignedInt, false)],
                data_subject: false,
                foreign_keys: vec![fk("uid", "user", Annotation::Owner)],
            })
            .unwrap();
        assert!(new_indices.is_empty());
        assert_eq!(addr.owners.len(), 1);
        assert!(matches!(&addr.owners[0], ShardDescriptor::Direct { column, kind, .. } if column == "uid" && kind == "user"));
    }

    #[rstest::rstest]
    fn owner_one_hop_further_derives_transitive_ownership_and_a_simple_index(catalog: Catalog) {
        catalog
            .create_table(CreateTable {
                table: "user".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true)],
                data_subject: true,
                foreign_keys: vec![],
            })
            .unwrap();
        catalog
            .create_table(CreateTable {
                table: "addr".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true), column("uid", ColumnType::UnsignedInt, false)],
                data_subject: false,
                foreign_keys: vec![fk("uid", "user", Annotation::Owner)],
            })
            .unwrap();
        let (phone, new_indices) = catalog
            .create_table(CreateTable {
                table: "phone".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true), column("aid", ColumnType::UnsignedInt, false)],
                data_subject: false,
                foreign_keys: vec![fk("aid", "addr", Annotation::Owner)],
            })
            .unwrap();
        assert_eq!(new_indices.len(), 1);
        assert!(matches!(&new_indices[0].variant, IndexVariant::Simple { table, column } if table == "addr" && column == "id"));
        assert_eq!(phone.owners.len(), 1);
        assert!(matches!(
            &phone.owners[0],
            ShardDescriptor::Transitive { next_table, kind, .. } if next_table == "addr" && kind == "user"
        ));
    }

    #[rstest::rstest]
    fn owns_grants_the_target_table_variable_ownership(catalog: Catalog) {
        catalog
            .create_table(CreateTable {
                table: "user".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true)],
                data_subject: true,
                foreign_keys: vec![],
            })
            .unwrap();
        catalog
            .create_table(CreateTable {
                table: "grp".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true)],
                data_subject: false,
                foreign_keys: vec![],
            })
            .unwrap();
        catalog
            .create_table(CreateTable {
                table: "membership".to_owned(),
                columns: vec![
                    column("id", ColumnType::UnsignedInt, true),
                    column("uid", ColumnType::UnsignedInt, false),
                    column("gid", ColumnType::UnsignedInt, false),
                ],
                data_subject: false,
                foreign_keys: vec![fk("uid", "user", Annotation::Owner), fk("gid", "grp", Annotation::Owns)],
            })
            .unwrap();

        let grp = catalog.table("grp").unwrap();
        assert_eq!(grp.owners.len(), 1);
        assert!(matches!(
            &grp.owners[0],
            ShardDescriptor::Variable { origin_table, kind, .. } if origin_table == "membership" && kind == "user"
        ));
        let membership = catalog.table("membership").unwrap();
        assert_eq!(membership.dependents, vec!["grp".to_owned()]);
    }

    #[rstest::rstest]
    fn ambiguous_implicit_owner_is_rejected(catalog: Catalog) {
        catalog
            .create_table(CreateTable {
                table: "user".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true)],
                data_subject: true,
                foreign_keys: vec![],
            })
            .unwrap();
        catalog
            .create_table(CreateTable {
                table: "other_subject".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true)],
                data_subject: true,
                foreign_keys: vec![],
            })
            .unwrap();
        let result = catalog.create_table(CreateTable {
            table: "shared".to_owned(),
            columns: vec![
                column("id", ColumnType::UnsignedInt, true),
                column("uid", ColumnType::UnsignedInt, false),
                column("oid", ColumnType::UnsignedInt, false),
            ],
            data_subject: false,
            foreign_keys: vec![fk("uid", "user", Annotation::Default), fk("oid", "other_subject", Annotation::Default)],
        });
        assert!(matches!(result, Err(Error::FailedPrecondition(_))));
    }

    #[rstest::rstest]
    fn owner_on_a_table_that_is_not_owned_is_rejected(catalog: Catalog) {
        catalog
            .create_table(CreateTable {
                table: "plain".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true)],
                data_subject: false,
                foreign_keys: vec![],
            })
            .unwrap();
        let result = catalog.create_table(CreateTable {
            table: "leaf".to_owned(),
            columns: vec![column("id", ColumnType::UnsignedInt, true), column("pid", ColumnType::UnsignedInt, false)],
            data_subject: false,
            foreign_keys: vec![fk("pid", "plain", Annotation::Owner)],
        });
        assert!(matches!(result, Err(Error::FailedPrecondition(_))));
    }

    #[rstest::rstest]
    fn round_trips_through_text(catalog: Catalog) {
        catalog
            .create_table(CreateTable {
                table: "user".to_owned(),
                columns: vec![column("id", ColumnType::UnsignedInt, true)],
                data_subject: true,
                foreign_keys: vec![],
            })
            .unwrap();
        let text = catalog.to_text().unwrap();
        assert!(text.is_ascii());
        let restored = Catalog::from_text(&text).unwrap();
        assert!(restored.table_exists("user"));
        assert_eq!(restored.shard_kind("user").unwrap().pk_column, "id");
    }

    #[rstest::rstest]
    fn register_subject_is_idempotent_per_kind(catalog: Catalog) {
        assert!(catalog.register_subject("user", &Value::UnsignedInt(1)).unwrap());
        assert!(!catalog.register_subject("user", &Value::UnsignedInt(1)).unwrap());
        assert!(catalog.register_subject("user", &Value::UnsignedInt(2)).unwrap());
    }
}

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

//! Owner-shard resolution (§4.4's Insert semantics) and the belated-
//! association migration that realizes the row-residency state machine
//! (§4.5) for `VARIABLE` ownership discovered after the fact.

use crate::{shard_kind_matches, Engine};
use pshard_catalog::{ShardDescriptor, Table};
use pshard_dataflow::Record;
use pshard_encoding::{decode_row, default_shard_key, shard_key, Value};
use pshard_kernel::{Error, Result};

/// Resolves the shard(s) a single `ShardDescriptor` contributes for the
/// concrete `value` found in its column (`row[desc.column_index()]` for an
/// insert, or a WHERE-clause binding for a routing decision). `Direct` just
/// builds the key; `Transitive`/`Variable` consult the descriptor's index
/// and filter cross-shard matches down to this descriptor's own kind, since
/// one physical self-pk index accumulates entries for every kind a table has
/// ever been owned by (§4.3).
pub fn resolve_value(engine: &Engine, desc: &ShardDescriptor, value: &Value) -> Result<Vec<Vec<u8>>> {
    match desc {
        ShardDescriptor::Direct { kind, .. } => {
            if value.is_null() {
                return Err(Error::failed_precondition("owner column cannot be NULL"));
            }
            Ok(vec![shard_key(kind, value)?])
        }
        ShardDescriptor::Transitive { kind, index, via_variable, next_table, .. } => {
            if value.is_null() {
                return if *via_variable {
                    Ok(Vec::new())
                } else {
                    Err(Error::failed_precondition("owner column cannot be NULL"))
                };
            }
            let idx = engine.storage.index(index)?;
            let matches: Vec<Vec<u8>> = idx
                .lookup_across_shards(value)?
                .into_iter()
                .filter(|(shard, _)| shard_kind_matches(shard, kind))
                .map(|(shard, _)| shard)
                .collect();
            if matches.is_empty() {
                if *via_variable {
                    Ok(Vec::new())
                } else {
                    Err(Error::failed_precondition(format!(
                        "dangling foreign key: no '{}' row found for kind '{}'",
                        next_table, kind
                    )))
                }
            } else {
                Ok(dedup(matches))
            }
        }
        ShardDescriptor::Variable { index, .. } => {
            if value.is_null() {
                return Ok(Vec::new());
            }
            let idx = engine.storage.index(index)?;
            let matches: Vec<Vec<u8>> = idx
                .lookup_across_shards(value)?
                .into_iter()
                .filter(|(shard, _)| shard_kind_matches(shard, desc.kind()))
                .map(|(shard, _)| shard)
                .collect();
            Ok(dedup(matches))
        }
    }
}

fn dedup(mut shards: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    shards.sort();
    shards.dedup();
    shards
}

/// Resolves every shard a freshly-inserted `row` of `table` belongs to
/// (§4.4's Insert), or `[default_shard_key()]` when no owner resolves at
/// all (§4.5: "a row is in DEFAULT iff no resolver could produce any owning
/// shard at the time of insert").
pub fn resolve_insert_shards(engine: &Engine, table: &Table, row: &[Value]) -> Result<Vec<Vec<u8>>> {
    let mut shards = Vec::new();
    for desc in &table.owners {
        let value = &row[desc.column_index()];
        shards.extend(resolve_value(engine, desc, value)?);
    }
    if shards.is_empty() {
        Ok(vec![default_shard_key()])
    } else {
        Ok(dedup(shards))
    }
}

/// The belated-association case (§4.5, §9 Open Question 1): after inserting
/// `source_row` into `source_table` under `new_shards`, every dependent
/// table that is `VARIABLE`-owned via `source_table` must have its matching
/// row migrated from `DEFAULT` into the newly-resolved shard(s), and the
/// same check recurses into that dependent's own dependents so a chain of
/// variable ownerships migrates transitively.
pub fn migrate_dependents(engine: &Engine, source_table: &Table, source_row: &[Value], new_shards: &[Vec<u8>]) -> Result<()> {
    for dependent_name in source_table.dependents.clone() {
        let dependent = engine.catalog.table(&dependent_name)?;
        let descriptors: Vec<ShardDescriptor> = dependent.owners.iter().chain(dependent.accessors.iter()).cloned().collect();
        for desc in descriptors {
            let ShardDescriptor::Variable { origin_table, origin_column, kind, .. } = &desc else {
                continue;
            };
            if origin_table != &source_table.name {
                continue;
            }
            let matching: Vec<Vec<u8>> = new_shards.iter().filter(|s| shard_kind_matches(s, kind)).cloned().collect();
            if matching.is_empty() {
                continue;
            }
            let origin_index = source_table
                .column_index(origin_column)
                .ok_or_else(|| Error::internal(format!("unknown column '{}' on '{}'", origin_column, source_table.name)))?;
            let target_pk = &source_row[origin_index];
            migrate_one_row(engine, &dependent, target_pk, &matching)?;
        }
    }
    Ok(())
}

fn migrate_one_row(engine: &Engine, dependent: &Table, target_pk: &Value, new_shards: &[Vec<u8>]) -> Result<()> {
    let column_types = engine.column_types(dependent);
    let indexed = engine.open_indexed_columns(dependent)?;
    let default_key = default_shard_key();

    let existing_default = engine.storage.get(&dependent.name, &default_key, target_pk)?;
    let row_values = match existing_default {
        Some(bytes) => Some(decode_row(&bytes, &column_types)?),
        None => engine
            .storage
            .candidates(&dependent.name, None, Some(target_pk), None)?
            .into_iter()
            .next()
            .map(|(_, bytes)| decode_row(&bytes, &column_types))
            .transpose()?,
    };

    let Some(row_values) = row_values else {
        // No such row exists yet; nothing to migrate until it does.
        return Ok(());
    };

    for shard in new_shards {
        engine.storage.insert(&dependent.name, shard, target_pk, &row_values, &indexed)?;
        engine.sink.emit(&dependent.name, vec![Record::Positive(row_values.clone())]);
    }

    if engine.storage.get(&dependent.name, &default_key, target_pk)?.is_some() {
        engine.storage.delete(&dependent.name, &default_key, target_pk, &column_types, &indexed)?;
        engine.sink.emit(&dependent.name, vec![Record::Negative(row_values.clone())]);
    }

    migrate_dependents(engine, dependent, &row_values, new_shards)
}

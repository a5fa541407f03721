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

//! `ValueMapper`: the equality constraints extracted from a WHERE clause
//! (§4.2.1), plus residual-filter evaluation over a decoded row so a
//! candidate that an index/point-lookup over-selects can still be checked
//! against the rest of the predicate.

use crate::Engine;
use pshard_ast::Expr;
use pshard_catalog::Table;
use pshard_encoding::Value;
use pshard_kernel::{Error, Result};
use std::cmp::Ordering;
use std::collections::HashMap;

/// The equality bindings a WHERE clause's top-level conjunction yields,
/// keyed by column name. Anything not expressible as a top-level `AND` of
/// `column = literal` (an `OR`, a `Gt`, ...) is left for residual
/// evaluation instead of shard/index derivation.
#[derive(Debug, Default)]
pub struct ValueMapper {
    pub equalities: HashMap<String, Value>,
}

impl ValueMapper {
    pub fn from_filter(filter: Option<&Expr>) -> ValueMapper {
        let mut equalities = HashMap::new();
        if let Some(expr) = filter {
            collect_conjunctive_equalities(expr, &mut equalities);
        }
        ValueMapper { equalities }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.equalities.get(column)
    }
}

/// Candidate-lookup policy (§4.2.1) lifted up to the equality bindings a
/// WHERE clause contributed: a PK equality takes a point Get, an indexed
/// column's equality range-scans that index, otherwise every shard the
/// filter implies (or, lacking any shard hint at all, the whole table) is
/// scanned and left to residual evaluation.
pub fn candidates_for_filter(
    engine: &Engine,
    table: &Table,
    shard_key: Option<&[u8]>,
    mapper: &ValueMapper,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let pk_name = table.primary_key_column().name.clone();
    if let Some(pk) = mapper.get(&pk_name) {
        return engine.storage.candidates(&table.name, shard_key, Some(pk), None);
    }
    for (column_index, index_name) in engine.catalog.indices_for_table(table) {
        let column = table.column(column_index);
        if let Some(value) = mapper.get(&column.name) {
            let index = engine.storage.index(&index_name)?;
            return engine.storage.candidates(&table.name, shard_key, None, Some((&index, value)));
        }
    }
    engine.storage.candidates(&table.name, shard_key, None, None)
}

fn collect_conjunctive_equalities(expr: &Expr, out: &mut HashMap<String, Value>) {
    match expr {
        Expr::And(lhs, rhs) => {
            collect_conjunctive_equalities(lhs, out);
            collect_conjunctive_equalities(rhs, out);
        }
        Expr::Eq(lhs, rhs) => {
            if let (Expr::Column(name), Expr::Literal(value)) | (Expr::Literal(value), Expr::Column(name)) =
                (lhs.as_ref(), rhs.as_ref())
            {
                out.insert(name.clone(), value.clone());
            }
        }
        _ => {}
    }
}

/// Evaluates a full WHERE predicate against a decoded row (the residual
/// filter applied after candidate lookup, §4.2).
pub fn evaluate(expr: &Expr, table: &Table, row: &[Value]) -> Result<bool> {
    Ok(match eval_value(expr, table, row)? {
        Eval::Bool(b) => b,
        Eval::Value(_) => return Err(Error::invalid_argument("WHERE clause does not evaluate to a boolean")),
    })
}

enum Eval {
    Bool(bool),
    Value(Value),
}

fn eval_value(expr: &Expr, table: &Table, row: &[Value]) -> Result<Eval> {
    Ok(match expr {
        Expr::Literal(v) => Eval::Value(v.clone()),
        Expr::Column(name) => {
            let index = table
                .column_index(name)
                .ok_or_else(|| Error::invalid_argument(format!("unknown column '{}'", name)))?;
            Eval::Value(row[index].clone())
        }
        Expr::LiteralList(_) => return Err(Error::invalid_argument("a literal list is not a scalar value")),
        Expr::Eq(lhs, rhs) => {
            let (l, r) = (as_value(eval_value(lhs, table, row)?)?, as_value(eval_value(rhs, table, row)?)?);
            Eval::Bool(values_equal(&l, &r))
        }
        Expr::Gt(lhs, rhs) => {
            let (l, r) = (as_value(eval_value(lhs, table, row)?)?, as_value(eval_value(rhs, table, row)?)?);
            Eval::Bool(compare(&l, &r).map(|o| o == Ordering::Greater).unwrap_or(false))
        }
        Expr::And(lhs, rhs) => Eval::Bool(evaluate(lhs, table, row)? && evaluate(rhs, table, row)?),
        Expr::Or(lhs, rhs) => Eval::Bool(evaluate(lhs, table, row)? || evaluate(rhs, table, row)?),
        Expr::In(lhs, rhs) => {
            let needle = as_value(eval_value(lhs, table, row)?)?;
            let haystack = match rhs.as_ref() {
                Expr::LiteralList(values) => values.clone(),
                other => vec![as_value(eval_value(other, table, row)?)?],
            };
            Eval::Bool(haystack.iter().any(|v| values_equal(v, &needle)))
        }
    })
}

fn as_value(eval: Eval) -> Result<Value> {
    match eval {
        Eval::Value(v) => Ok(v),
        Eval::Bool(_) => Err(Error::invalid_argument("expected a value, found a boolean expression")),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::SignedInt(x), Value::SignedInt(y)) => x.partial_cmp(y),
        (Value::UnsignedInt(x), Value::UnsignedInt(y)) => x.partial_cmp(y),
        (Value::SignedInt(x), Value::UnsignedInt(y)) => i64::try_from(*y).ok().and_then(|y| x.partial_cmp(&y)),
        (Value::UnsignedInt(x), Value::SignedInt(y)) => i64::try_from(*x).ok().and_then(|x| y.partial_cmp(&x).map(Ordering::reverse)),
        (Value::Text(x), Value::Text(y)) | (Value::DateTime(x), Value::DateTime(y)) => x.partial_cmp(y),
        (Value::Null, Value::Null) => None,
        _ => None,
    }
}

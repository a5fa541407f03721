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

//! The dataflow sink contract (§6, output): every mutating statement emits
//! a sequence of positive/negative records keyed by the affected table.
//! The dataflow/materialized-view subsystem that consumes these records is
//! out of scope (§1) — this crate only names the boundary, modeled after
//! the teacher's `protocol::Sender` trait (the query-result sink the SQL
//! engine pushes into).

use pshard_encoding::Value;

/// A record mutation: `Positive` for rows added to a shard, `Negative` for
/// rows removed from one — e.g. an UPDATE that moves a row to a new owner
/// emits a `Negative` under the old shard and a `Positive` under the new.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Positive(Vec<Value>),
    Negative(Vec<Value>),
}

pub trait DataflowSink {
    fn emit(&self, table: &str, records: Vec<Record>);
}

/// A test double that records every emission for assertions.
#[derive(Default)]
pub struct RecordingSink {
    emitted: std::sync::Mutex<Vec<(String, Vec<Record>)>>,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink::default()
    }

    pub fn emitted(&self) -> Vec<(String, Vec<Record>)> {
        self.emitted.lock().expect("recording sink lock poisoned").clone()
    }
}

impl DataflowSink for RecordingSink {
    fn emit(&self, table: &str, records: Vec<Record>) {
        self.emitted
            .lock()
            .expect("recording sink lock poisoned")
            .push((table.to_owned(), records));
    }
}

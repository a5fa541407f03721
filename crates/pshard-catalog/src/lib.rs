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

//! The sharder's catalog (C5) and its upgradable concurrency control (C8).
//! Grounded on the teacher's `sql_engine::catalog_manager` (the
//! `RwLock<HashMap<..>>`-nested `DataDefinition`), generalized from a
//! schema/table registry into the per-table ownership-derivation registry
//! §3.2 describes.

mod catalog;
mod lock;
mod schema;

pub use catalog::{Catalog, CatalogState};
pub use lock::Upgradable;
pub use schema::{ColumnDefinition, IndexDescriptor, IndexVariant, ShardDescriptor, ShardKind, Table};

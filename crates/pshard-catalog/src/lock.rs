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

//! The upgradable reader/writer lock the catalog runs under (§5, C8).
//!
//! `std::sync::RwLock` has no atomic read-to-write upgrade: a reader that
//! tries to acquire the writer lock while holding its read guard deadlocks
//! against any other reader doing the same. `Upgradable` sidesteps this by
//! never upgrading in place — a caller asking to upgrade drops its read
//! guard first, then serializes behind a dedicated inner mutex before taking
//! the write lock. The inner mutex is what turns "every reader racing for
//! the writer lock" into "one upgrader at a time," which is what makes the
//! lazy per-shard initialization path in the SQL engine safe to call from
//! a held read lock.
pub struct Upgradable<T> {
    data: std::sync::RwLock<T>,
    upgrade_gate: std::sync::Mutex<()>,
}

impl<T> Upgradable<T> {
    pub fn new(value: T) -> Upgradable<T> {
        Upgradable {
            data: std::sync::RwLock::new(value),
            upgrade_gate: std::sync::Mutex::new(()),
        }
    }

    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, T> {
        self.data.read().expect("catalog lock poisoned")
    }

    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, T> {
        self.data.write().expect("catalog lock poisoned")
    }

    /// Drops `guard`, serializes behind the upgrade gate, and runs `f` under
    /// an exclusive lock. Downgrading back to shared is just letting the
    /// returned write guard go out of scope and calling `read` again.
    pub fn upgrade<R>(&self, guard: std::sync::RwLockReadGuard<'_, T>, f: impl FnOnce(&mut T) -> R) -> R {
        drop(guard);
        let _gate = self.upgrade_gate.lock().expect("upgrade gate poisoned");
        let mut write_guard = self.data.write().expect("catalog lock poisoned");
        f(&mut write_guard)
    }
}

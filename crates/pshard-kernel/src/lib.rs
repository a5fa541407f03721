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

//! Shared error type for every crate in the sharding engine.

use std::fmt::{self, Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;

/// The four error kinds from the failure semantics design (§7).
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// User/SQL errors: malformed statement, unsupported construct, bad FK target.
    InvalidArgument(String),
    /// Catalog violations: annotation rules, cycle detection, owner-null, dangling FK.
    FailedPrecondition(String),
    /// Missing table, shard, row or index.
    NotFound(String),
    /// KV backend failure or an engine invariant broken.
    Internal(String),
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Error {
        Error::InvalidArgument(message.into())
    }

    pub fn failed_precondition(message: impl Into<String>) -> Error {
        Error::FailedPrecondition(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Error {
        Error::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Error {
        Error::Internal(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Error::InvalidArgument(m) | Error::FailedPrecondition(m) | Error::NotFound(m) | Error::Internal(m) => m,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(m) => write!(f, "invalid argument: {}", m),
            Error::FailedPrecondition(m) => write!(f, "failed precondition: {}", m),
            Error::NotFound(m) => write!(f, "not found: {}", m),
            Error::Internal(m) => write!(f, "internal error: {}", m),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::Internal(format!("io error: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_kind_with_its_message() {
        assert_eq!(Error::invalid_argument("bad").to_string(), "invalid argument: bad");
        assert_eq!(
            Error::failed_precondition("nope").to_string(),
            "failed precondition: nope"
        );
        assert_eq!(Error::not_found("gone").to_string(), "not found: gone");
        assert_eq!(Error::internal("boom").to_string(), "internal error: boom");
    }
}

// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A snapshot of the process environment.

use std::collections::BTreeMap;

use tracing::warn;

/// The name of the variable the local identity resolver publishes.
pub const IP_ADDRESS_VAR: &str = "IP_ADDRESS";

/// An immutable-by-default copy of the environment, taken once at startup.
///
/// Keys are kept in sorted order so that anything derived from the snapshot
/// (rendered configuration, expanded commands) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Captures the current process environment.
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    pub fn from_process() -> Environment {
        let mut vars = BTreeMap::new();
        for (key, value) in std::env::vars_os() {
            match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => {
                    vars.insert(key, value);
                }
                (Ok(key), Err(_)) => {
                    warn!(%key, "skipping environment variable with non-unicode value")
                }
                (Err(key), _) => warn!(?key, "skipping non-unicode environment variable"),
            }
        }
        Environment { vars }
    }

    /// Returns the value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns the value of `key` if it is set to something non-empty.
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Expands `$VAR` and `${VAR}` references in `input` against this
    /// snapshot. Unknown variables expand to the empty string.
    pub fn expand(&self, input: &str) -> String {
        shellexpand::env_with_context_no_errors(input, |var: &str| {
            Some(self.get(var).unwrap_or(""))
        })
        .into_owned()
    }

    /// Borrows the underlying variables.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Environment {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Configuration rendering.
//!
//! Templates use Go `text/template` syntax. The template's root has two
//! fields: `.Seeds`, the ordered seed URIs, and `.Env`, the environment
//! snapshot. For example:
//!
//! ```text
//! [meta]
//!   peers = [{{range .Seeds}}"{{.}}", {{end}}]
//!   hostname = "{{.Env.IP_ADDRESS}}"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use gtmpl::error::{ExecError, ParseError};
use gtmpl::{Context, Template, Value};

/// The data a configuration template is rendered with.
#[derive(Debug)]
pub struct RenderContext<'a> {
    pub seeds: &'a [String],
    pub env: &'a BTreeMap<String, String>,
}

impl RenderContext<'_> {
    /// The template's root value. `Seeds` and `Env` are fields of a struct,
    /// and `Env` is a string map.
    fn to_value(&self) -> Value {
        let seeds = self.seeds.iter().cloned().map(Value::String).collect();
        let env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(HashMap::from([
            ("Seeds".to_string(), Value::Array(seeds)),
            ("Env".to_string(), Value::Map(env)),
        ]))
    }
}

/// An error loading or rendering a configuration template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("reading template {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing template {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("rendering template {}", path.display())]
    Render {
        path: PathBuf,
        #[source]
        source: ExecError,
    },
}

/// An error writing the rendered configuration.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("creating {}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Renders the template at `path`.
pub fn render(path: &Path, context: &RenderContext) -> Result<String, TemplateError> {
    let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut template = Template::default();
    template
        .parse(source)
        .map_err(|source| TemplateError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    template
        .render(&Context::from(context.to_value()))
        .map_err(|source| TemplateError::Render {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `contents` to `path`, replacing any existing file.
pub fn materialize(path: &Path, contents: &str) -> Result<(), MaterializeError> {
    let mut file = File::create(path).map_err(|source| MaterializeError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| MaterializeError::Write {
            path: path.to_path_buf(),
            source,
        })
}

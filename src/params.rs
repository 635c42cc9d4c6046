//! params.rs
//! `name=value` parameter file parsing.
//!
//! Format: one parameter per line, `%` starts a comment (whole-line or
//! trailing), whitespace around names and values is ignored. Booleans are
//! written `1`/`0`. Parsing happens before any device interaction; a missing
//! required parameter aborts the session with one diagnostic per name.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

const COMMENT: char = '%';

#[derive(Debug)]
pub enum ParamError {
    Io(io::Error),
    /// Every required parameter absent from the file, reported together.
    Missing(Vec<String>),
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamError::Io(e) => write!(f, "cannot read parameter file: {e}"),
            ParamError::Missing(names) => {
                writeln!(f, "missing parameters:")?;
                for name in names {
                    writeln!(f, "  {name}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ParamError {}

/// Raw parameter table with typed accessors.
#[derive(Debug, Default)]
pub struct ParamFile {
    values: HashMap<String, String>,
}

impl ParamFile {
    pub fn load(path: &Path) -> Result<Self, ParamError> {
        let text = fs::read_to_string(path).map_err(ParamError::Io)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for line in text.lines() {
            let line = match line.find(COMMENT) {
                Some(at) => &line[..at],
                None => line,
            };
            if let Some((name, value)) = line.split_once('=') {
                values.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.values.get(name)?.parse().ok()
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.values.get(name)?.parse().ok()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        Some(self.values.get(name)? == "1")
    }
}

//! Build matrix declaration and expansion

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A matrix as declared under `strategy.matrix`
///
/// Every key other than `exclude` and `include` is a dimension. Dimension
/// order follows the YAML document, and so does cell order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Mapping", into = "Mapping")]
pub struct MatrixConfig {
    pub dimensions: Vec<(String, Vec<String>)>,
    pub exclude: Vec<BTreeMap<String, String>>,
    pub include: Vec<BTreeMap<String, String>>,
}

/// One concrete assignment of values to a job's matrix dimensions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    pub values: Vec<(String, String)>,
}

/// Render a YAML scalar the way it is written in a workflow file
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn entry_map(value: &Value, section: &str) -> Result<BTreeMap<String, String>, String> {
    let map = value
        .as_mapping()
        .ok_or_else(|| format!("matrix {} entries must be mappings", section))?;
    let mut out = BTreeMap::new();
    for (k, v) in map {
        let key = k
            .as_str()
            .ok_or_else(|| format!("matrix {} keys must be strings", section))?;
        let val = scalar_to_string(v)
            .ok_or_else(|| format!("matrix {} value for '{}' must be a scalar", section, key))?;
        out.insert(key.to_string(), val);
    }
    Ok(out)
}

fn entry_list(value: &Value, section: &str) -> Result<Vec<BTreeMap<String, String>>, String> {
    match value {
        Value::Sequence(items) => items.iter().map(|v| entry_map(v, section)).collect(),
        _ => Err(format!("matrix {} must be a list", section)),
    }
}

impl TryFrom<Mapping> for MatrixConfig {
    type Error = String;

    fn try_from(map: Mapping) -> Result<Self, Self::Error> {
        let mut config = MatrixConfig::default();

        for (key, value) in &map {
            let key = key
                .as_str()
                .ok_or_else(|| "matrix keys must be strings".to_string())?;
            match key {
                "exclude" => config.exclude = entry_list(value, "exclude")?,
                "include" => config.include = entry_list(value, "include")?,
                dimension => {
                    let values = match value {
                        Value::Sequence(items) => items
                            .iter()
                            .map(|v| {
                                scalar_to_string(v).ok_or_else(|| {
                                    format!("matrix dimension '{}' holds a non-scalar value", dimension)
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                        other => vec![scalar_to_string(other).ok_or_else(|| {
                            format!("matrix dimension '{}' must be a list of scalars", dimension)
                        })?],
                    };
                    config.dimensions.push((dimension.to_string(), values));
                }
            }
        }

        Ok(config)
    }
}

impl From<MatrixConfig> for Mapping {
    fn from(config: MatrixConfig) -> Self {
        fn entries(list: Vec<BTreeMap<String, String>>) -> Value {
            Value::Sequence(
                list.into_iter()
                    .map(|entry| {
                        Value::Mapping(
                            entry
                                .into_iter()
                                .map(|(k, v)| (Value::String(k), Value::String(v)))
                                .collect(),
                        )
                    })
                    .collect(),
            )
        }

        let mut map = Mapping::new();
        for (name, values) in config.dimensions {
            map.insert(
                Value::String(name),
                Value::Sequence(values.into_iter().map(Value::String).collect()),
            );
        }
        if !config.exclude.is_empty() {
            map.insert(Value::String("exclude".into()), entries(config.exclude));
        }
        if !config.include.is_empty() {
            map.insert(Value::String("include".into()), entries(config.include));
        }
        map
    }
}

impl MatrixConfig {
    /// Check that exclusions only name declared dimensions
    pub fn validate(&self) -> Result<(), String> {
        for entry in &self.exclude {
            if entry.is_empty() {
                return Err("matrix exclude entry is empty".to_string());
            }
            for key in entry.keys() {
                if !self.dimensions.iter().any(|(name, _)| name == key) {
                    return Err(format!("matrix exclude references unknown dimension '{}'", key));
                }
            }
        }
        for (name, values) in &self.dimensions {
            if values.is_empty() {
                return Err(format!("matrix dimension '{}' has no values", name));
            }
        }
        Ok(())
    }

    fn is_excluded(&self, cell: &MatrixCell) -> bool {
        self.exclude.iter().any(|entry| {
            entry
                .iter()
                .all(|(key, value)| cell.get(key) == Some(value.as_str()))
        })
    }

    /// Expand into concrete cells
    ///
    /// Cartesian product of the dimensions (first dimension outermost),
    /// minus cells matching every key of some `exclude` entry, then each
    /// `include` entry that is not already present appended as its own cell.
    /// A matrix with no dimensions yields one empty cell.
    pub fn expand(&self) -> Vec<MatrixCell> {
        let mut cells = vec![MatrixCell::default()];

        for (name, values) in &self.dimensions {
            cells = cells
                .into_iter()
                .flat_map(|cell| {
                    values.iter().map(move |value| {
                        let mut next = cell.clone();
                        next.values.push((name.clone(), value.clone()));
                        next
                    })
                })
                .collect();
        }

        cells.retain(|cell| !self.is_excluded(cell));

        if self.dimensions.is_empty() && !self.include.is_empty() {
            cells.clear();
        }

        for entry in &self.include {
            let mut cell = MatrixCell::default();
            for (name, _) in &self.dimensions {
                if let Some(value) = entry.get(name) {
                    cell.values.push((name.clone(), value.clone()));
                }
            }
            for (key, value) in entry {
                if cell.get(key).is_none() {
                    cell.values.push((key.clone(), value.clone()));
                }
            }
            if !cells.contains(&cell) {
                cells.push(cell);
            }
        }

        cells
    }
}

impl MatrixCell {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `key=value` pairs, e.g. from the command line
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            values: pairs.to_vec(),
        }
    }
}

impl fmt::Display for MatrixCell {
    /// `(3.7, ubuntu)`, or empty for a job without a matrix
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return Ok(());
        }
        let joined: Vec<&str> = self.values.iter().map(|(_, v)| v.as_str()).collect();
        write!(f, "({})", joined.join(", "))
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A key/value pair, used both for configuration parameters and for labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Parameter {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A named, versioned set of parameters and labels.
///
/// `(name, version)` is the identity. The id is assigned when the configuration is
/// first created and never changes afterwards; a nil id means "not assigned yet".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub id: Uuid,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub labels: Vec<Parameter>,
}

impl Configuration {
    pub fn new<N, V>(name: N, version: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Configuration {
            id: Uuid::nil(),
            name: name.into(),
            version: version.into(),
            params: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.push(Parameter::new(key, value));
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.push(Parameter::new(key, value));
        self
    }

    /// Labels keyed by label key. A key repeated within one configuration keeps its
    /// last value.
    pub fn label_map(&self) -> HashMap<&str, &str> {
        self.labels
            .iter()
            .map(|label| (label.key.as_str(), label.value.as_str()))
            .collect()
    }
}

/// A named, versioned envelope holding a snapshot of member configurations.
///
/// Members are owned by value; changing a top-level configuration never changes
/// a group that embeds a copy of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationGroup {
    #[serde(default)]
    pub id: Uuid,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

impl ConfigurationGroup {
    pub fn new<N, V>(name: N, version: V, configurations: Vec<Configuration>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        ConfigurationGroup {
            id: Uuid::nil(),
            name: name.into(),
            version: version.into(),
            configurations,
        }
    }
}

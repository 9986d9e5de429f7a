use std::fmt;
use std::fs;
use std::path::Path;

use log::info;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::job::macros::{self, Macros};

/// A single-task batch job whose fields may contain `{macros[NAME]}` placeholders
///
/// Templates are written as JSON, either inline in a job collection or as a separate file:
///
/// ```json
/// {
///     "executable": "/path/to/executable",
///     "arguments": "--in {macros[inputfile]}",
///     "transfer_executable": true,
///     "options": { "time": "01:00:00", "mem": "2G" },
///     "transfer_input_files": ["{macros[inputfile]}"],
///     "transfer_output_files": ["{macros[outputfile]}"]
/// }
/// ```
///
/// `executable` is the only mandatory key.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobTemplate {
    pub executable: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arguments: String,
    #[serde(default)]
    pub transfer_executable: bool,
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    pub options: Options,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transfer_input_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transfer_output_files: Vec<String>,
}

impl JobTemplate {
    pub fn new(executable: impl Into<String>) -> Self {
        JobTemplate {
            executable: executable.into(),
            arguments: String::new(),
            transfer_executable: false,
            options: Options::default(),
            transfer_input_files: Vec::new(),
            transfer_output_files: Vec::new(),
        }
    }

    /// Resolve all placeholders, see [`macros::expand`]
    pub fn expand(&self, macros: &Macros) -> crate::error::Result<JobDescription> {
        macros::expand(self, macros)
    }

    /// Distinct macro names referenced anywhere in the template
    pub fn placeholders(&self) -> Result<Vec<String>, String> {
        let mut texts: Vec<&str> = vec![&self.executable, &self.arguments];
        texts.extend(self.options.iter().filter_map(|(_, value)| match value {
            OptionValue::String(text) => Some(text.as_str()),
            _ => None,
        }));
        texts.extend(self.transfer_input_files.iter().map(String::as_str));
        texts.extend(self.transfer_output_files.iter().map(String::as_str));

        let mut names: Vec<String> = Vec::new();
        for text in texts {
            for name in macros::placeholders(text)? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }
}

/// Read a template file written by [`save`]
pub fn load(path: &Path) -> anyhow::Result<JobTemplate> {
    info!("Reading job template {}", path.display());
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Write a template as pretty JSON
pub fn save(template: &JobTemplate, path: &Path) -> anyhow::Result<()> {
    info!("Writing job template {}", path.display());
    let json = serde_json::to_string_pretty(template)?;
    fs::write(path, json + "\n")?;
    Ok(())
}

/// A job template with every placeholder resolved
///
/// Only [`macros::expand`] creates these, and nothing changes them afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDescription {
    pub(in crate::job) executable: String,
    pub(in crate::job) arguments: String,
    pub(in crate::job) options: Options,
    pub(in crate::job) transfer_executable: bool,
    pub(in crate::job) transfer_input_files: Vec<String>,
    pub(in crate::job) transfer_output_files: Vec<String>,
}

impl JobDescription {
    pub fn executable(&self) -> &str {
        &self.executable
    }
    pub fn arguments(&self) -> &str {
        &self.arguments
    }
    pub fn options(&self) -> &Options {
        &self.options
    }
    pub fn transfer_executable(&self) -> bool {
        self.transfer_executable
    }
    pub fn transfer_input_files(&self) -> &[String] {
        &self.transfer_input_files
    }
    pub fn transfer_output_files(&self) -> &[String] {
        &self.transfer_output_files
    }
}

/// Value of an sbatch option
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptionValue::Bool(value) => write!(f, "{value}"),
            OptionValue::Integer(value) => write!(f, "{value}"),
            OptionValue::Float(value) => write!(f, "{value}"),
            OptionValue::String(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::String(value.to_string())
    }
}

/// sbatch options, kept in the order they were written
///
/// Inserting an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options(Vec<(String, OptionValue)>);

impl Options {
    pub fn insert(&mut self, name: String, value: OptionValue) {
        match self.0.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter().map(|(key, value)| (key, value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Options {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Options {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OptionsVisitor;

        impl<'de> Visitor<'de> for OptionsVisitor {
            type Value = Options;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of sbatch option names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Options, A::Error> {
                let mut options = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, OptionValue>()? {
                    if options.iter().any(|(existing, _)| *existing == key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate sbatch option `{key}`"
                        )));
                    }
                    options.push((key, value));
                }
                Ok(Options(options))
            }
        }

        deserializer.deserialize_map(OptionsVisitor)
    }
}

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use jsonschema::{Draft, JSONSchema};
use log::{info, warn};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::job::macros::Macros;
use crate::job::template::{self, JobDescription, JobTemplate};
use crate::ledger::Ledger;

/// Where a job's template comes from
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    Inline(JobTemplate),
    /// Path to a template file, relative paths are resolved against the collection file
    Reference(PathBuf),
}

/// One job of a collection: its template and the macros the template is expanded with
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "RawEntry", into = "RawEntry")]
pub struct JobEntry {
    pub template: TemplateSource,
    pub macros: Macros,
}

/// Serialised shape of a [`JobEntry`], exactly one of `script` and `template` is set
#[derive(Deserialize, Serialize)]
struct RawEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<JobTemplate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    macros: Macros,
}

impl TryFrom<RawEntry> for JobEntry {
    type Error = String;

    fn try_from(raw: RawEntry) -> std::result::Result<Self, Self::Error> {
        let template = match (raw.script, raw.template) {
            (Some(path), None) => TemplateSource::Reference(path),
            (None, Some(template)) => TemplateSource::Inline(template),
            (Some(_), Some(_)) => return Err("both `script` and `template` are set".to_string()),
            (None, None) => return Err("one of `script` or `template` is required".to_string()),
        };
        Ok(JobEntry {
            template,
            macros: raw.macros,
        })
    }
}

impl From<JobEntry> for RawEntry {
    fn from(entry: JobEntry) -> Self {
        let (script, template) = match entry.template {
            TemplateSource::Reference(path) => (Some(path), None),
            TemplateSource::Inline(template) => (None, Some(template)),
        };
        RawEntry {
            script,
            template,
            macros: entry.macros,
        }
    }
}

/// A named set of jobs, the input of a submission run
///
/// On disk this is a JSON object mapping job names to entries:
///
/// ```json
/// {
///     "job_0": { "script": "reco.json", "macros": { "inputfile": "run_0.i3" } },
///     "job_1": { "template": { "executable": "echo", "arguments": "{macros[msg]}" },
///                "macros": { "msg": "hello" } }
/// }
/// ```
///
/// Job names are unique; a repeated name is rejected with [`Error::DuplicateJobName`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobCollection {
    jobs: BTreeMap<String, JobEntry>,
}

/// A job whose template reference has been loaded
#[derive(Debug)]
pub struct ResolvedJob<'a> {
    pub template: Rc<JobTemplate>,
    pub macros: &'a Macros,
}

impl JobCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: JobEntry) -> Result<()> {
        let name = name.into();
        if self.jobs.contains_key(&name) {
            return Err(Error::DuplicateJobName(name));
        }
        self.jobs.insert(name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&JobEntry> {
        self.jobs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobEntry)> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Parse a collection from JSON
    ///
    /// The bytes are first split into the raw JSON text of each job (keeping repeated job
    /// names), each entry is validated against the collection schema, and only then
    /// converted into typed entries.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        info!("Parsing job collection into untyped structure");
        let raw: RawCollection = serde_json::from_slice(bytes)
            .map_err(|err| Error::malformed(format!("invalid JSON: {err}")))?;

        let schema = entry_schema()?;
        let mut collection = JobCollection::new();
        for (name, raw_entry) in raw.0 {
            let value: Value = serde_json::from_str(raw_entry.get())
                .map_err(|err| Error::malformed(format!("job `{name}`: {err}")))?;
            validate(&schema, &name, &value)?;
            // typed entries come from the raw text, which keeps option order and repeats
            let entry: JobEntry = serde_json::from_str(raw_entry.get())
                .map_err(|err| Error::malformed(format!("job `{name}`: {err}")))?;
            collection.insert(name, entry)?;
        }

        info!("Job collection holds {} job(s)", collection.len());
        Ok(collection)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&self.jobs)
            .map_err(|err| Error::malformed(format!("cannot serialise collection: {err}")))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("Reading job collection {}", path.display());
        let bytes = fs::read(path).map_err(|err| {
            Error::malformed(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::decode(&bytes).map_err(|err| match err {
            Error::MalformedCollection { reason } => {
                Error::malformed(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        info!("Writing job collection {}", path.display());
        fs::write(path, self.encode()?)
            .map_err(|err| Error::malformed(format!("cannot write {}: {err}", path.display())))
    }

    /// Keep only the jobs named in a rescue ledger
    ///
    /// Names in `rescue` that are not part of the collection are logged and ignored.
    pub fn retain_rescued(&mut self, rescue: &Ledger) {
        for (name, _) in rescue.iter() {
            if !self.jobs.contains_key(name) {
                warn!("Rescued job {name} is not part of the job collection, ignoring it");
            }
        }
        self.jobs.retain(|name, _| rescue.contains(name));
        info!("{} job(s) left after applying rescue file", self.jobs.len());
    }

    /// Load every referenced template file
    ///
    /// Relative references are resolved against `base_dir`. Each file is read once even if
    /// many jobs share it.
    pub fn resolve(&self, base_dir: &Path) -> Result<BTreeMap<&str, ResolvedJob<'_>>> {
        let mut loaded: HashMap<PathBuf, Rc<JobTemplate>> = HashMap::new();
        let mut resolved = BTreeMap::new();

        for (name, entry) in &self.jobs {
            let template = match &entry.template {
                TemplateSource::Inline(template) => Rc::new(template.clone()),
                TemplateSource::Reference(path) => {
                    let path = base_dir.join(path);
                    match loaded.get(&path) {
                        Some(template) => template.clone(),
                        None => {
                            let template = template::load(&path).map_err(|err| {
                                if err.downcast_ref::<std::io::Error>().is_some() {
                                    Error::MissingTemplate {
                                        job: name.clone(),
                                        path: path.clone(),
                                        reason: format!("{err:#}"),
                                    }
                                } else {
                                    Error::malformed(format!(
                                        "job `{name}`: template {}: {err:#}",
                                        path.display()
                                    ))
                                }
                            })?;
                            let template = Rc::new(template);
                            loaded.insert(path, template.clone());
                            template
                        }
                    }
                }
            };
            resolved.insert(
                name.as_str(),
                ResolvedJob {
                    template,
                    macros: &entry.macros,
                },
            );
        }

        Ok(resolved)
    }

    /// Resolve and expand every job
    ///
    /// Fails on the first job that cannot be expanded, so nothing is submitted from a
    /// collection with a broken job.
    pub fn expand(&self, base_dir: &Path) -> Result<BTreeMap<String, JobDescription>> {
        self.resolve(base_dir)?
            .into_iter()
            .map(|(name, job)| {
                let description = job.template.expand(job.macros).map_err(|err| match err {
                    Error::UnresolvedMacro { name: macro_name, field } => Error::UnresolvedMacro {
                        name: macro_name,
                        field: format!("{field} of job `{name}`"),
                    },
                    Error::MalformedPlaceholder {
                        field,
                        text,
                        reason,
                    } => Error::MalformedPlaceholder {
                        field: format!("{field} of job `{name}`"),
                        text,
                        reason,
                    },
                    other => other,
                })?;
                Ok((name.to_string(), description))
            })
            .collect()
    }
}

/// Top level of a collection file, with repeated keys preserved
struct RawCollection(Vec<(String, Box<RawValue>)>);

impl<'de> Deserialize<'de> for RawCollection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RawVisitor;

        impl<'de> Visitor<'de> for RawVisitor {
            type Value = RawCollection;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of job names to job entries")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<RawCollection, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = access.next_entry::<String, Box<RawValue>>()? {
                    entries.push(entry);
                }
                Ok(RawCollection(entries))
            }
        }

        deserializer.deserialize_map(RawVisitor)
    }
}

fn entry_schema() -> Result<JSONSchema> {
    static SCHEMA: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/collection.json"));
    let schema: Value = serde_json::from_str(SCHEMA)
        .map_err(|err| Error::malformed(format!("invalid collection schema: {err}")))?;
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|err| Error::malformed(format!("invalid collection schema: {err}")))
}

fn validate(schema: &JSONSchema, name: &str, entry: &Value) -> Result<()> {
    if let Err(errors) = schema.validate(entry) {
        let reasons: Vec<String> = errors
            .map(|err| format!("{} at `{}`", err, err.instance_path))
            .collect();
        warn!("Job {name} fails validation");
        return Err(Error::malformed(format!("job `{name}`: {}", reasons.join("; "))));
    }
    Ok(())
}

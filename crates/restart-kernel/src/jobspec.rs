//! The job description model.
//!
//! A [`JobSpec`] is the complete, self-contained description of one
//! simulation attempt: an ordered list of input sections (one of which is
//! the parameter block), a resource budget, and the list of output
//! artifacts to retrieve. Values are always text tokens, even numeric
//! ones, so the exact formatting the simulation code expects survives
//! round-trips.
//!
//! Specs are immutable per attempt: the restart machinery never mutates a
//! submitted spec, it clones it and derives a new one, so every attempt in
//! a retry cycle stays auditable.

use serde::{Deserialize, Serialize};

/// Resource and runtime budget for one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Number of machines to allocate
    pub num_machines: u32,
    /// MPI processes per machine
    pub procs_per_machine: u32,
    /// Wall-clock budget in seconds; grown on every restart
    pub walltime_secs: u64,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            num_machines: 1,
            procs_per_machine: 1,
            walltime_secs: 3600,
        }
    }
}

/// Insertion-ordered parameter block: parameter name to its list of text
/// tokens (e.g. a 3-component field is three tokens).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamBlock(Vec<(String, Vec<String>)>);

impl ParamBlock {
    /// Create an empty block.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Get a parameter's tokens.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Get the first token of a parameter, if present.
    pub fn first_token(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// Replace a parameter's tokens, appending the entry if it is new.
    /// Insertion order of existing keys is preserved.
    pub fn set(&mut self, key: impl Into<String>, tokens: Vec<String>) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = tokens,
            None => self.0.push((key, tokens)),
        }
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for ParamBlock {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Content of one named input section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionContent {
    /// The structured parameter block (exactly one per spec)
    Params(ParamBlock),
    /// Tabular data: rows of text tokens
    Table(Vec<Vec<String>>),
    /// Verbatim text, e.g. an emitted restart payload
    Text(String),
}

/// One named input section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub content: SectionContent,
}

/// Complete description of one job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Human-readable label for this job
    pub label: String,
    /// Human-readable description
    pub description: String,
    /// Ordered input sections; one carries the parameter block
    pub sections: Vec<Section>,
    /// Resource and walltime budget
    pub resources: Resources,
    /// Output-artifact name patterns to retrieve after the run
    pub retrieve: Vec<String>,
}

impl JobSpec {
    /// Create a spec with an empty parameter block under the given
    /// section name.
    pub fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            sections: vec![Section {
                name: "params".to_string(),
                content: SectionContent::Params(ParamBlock::new()),
            }],
            resources: Resources::default(),
            retrieve: Vec::new(),
        }
    }

    /// Find a section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// The parameter block. Every well-formed spec carries exactly one;
    /// returns `None` only for a spec built without it.
    pub fn params(&self) -> Option<&ParamBlock> {
        self.sections.iter().find_map(|s| match &s.content {
            SectionContent::Params(p) => Some(p),
            _ => None,
        })
    }

    /// Mutable access to the parameter block.
    pub fn params_mut(&mut self) -> Option<&mut ParamBlock> {
        self.sections.iter_mut().find_map(|s| match &mut s.content {
            SectionContent::Params(p) => Some(p),
            _ => None,
        })
    }

    /// Replace a section's content, appending the section if it is new.
    pub fn replace_section(&mut self, name: impl Into<String>, content: SectionContent) {
        let name = name.into();
        match self.sections.iter_mut().find(|s| s.name == name) {
            Some(s) => s.content = content,
            None => self.sections.push(Section { name, content }),
        }
    }
}

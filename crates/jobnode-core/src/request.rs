//! Run requests as delivered by the control plane.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{RunId, TaskId};

/// A request to execute one containerized algorithm invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Identity of this run, unique per submission.
    pub run_id: RunId,

    /// Task this run belongs to.
    pub task_id: TaskId,

    /// Parent task, for runs started by another algorithm.
    #[serde(default)]
    pub parent_id: Option<TaskId>,

    /// Positional arguments for the algorithm, in insertion order.
    #[serde(default)]
    pub task_info: TaskArgs,

    /// Container image reference.
    pub image: String,

    /// Labels of the datasets the run wants mounted.
    #[serde(default)]
    pub databases_to_use: Vec<String>,

    /// Credential handed to the algorithm container.
    #[serde(default)]
    pub token: RunToken,

    /// Opaque input payload, handed to the algorithm as a file.
    #[serde(default, with = "crate::encoding::base64_bytes")]
    pub input: Vec<u8>,
}

impl RunRequest {
    /// Create a new RunRequest with no arguments, datasets or token.
    pub fn new(run_id: RunId, task_id: TaskId, image: impl Into<String>) -> Self {
        Self {
            run_id,
            task_id,
            parent_id: None,
            task_info: TaskArgs::new(),
            image: image.into(),
            databases_to_use: Vec::new(),
            token: RunToken::default(),
            input: Vec::new(),
        }
    }

    /// Builder method to append a positional argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.task_info.insert(name, value);
        self
    }

    /// Builder method to request a dataset.
    pub fn with_database(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.databases_to_use.contains(&label) {
            self.databases_to_use.push(label);
        }
        self
    }

    /// Builder method to set the container token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = RunToken::new(token);
        self
    }

    /// Builder method to set the input payload.
    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = input.into();
        self
    }

    /// Builder method to set the parent task.
    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Opaque credential passed to the job. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunToken(String);

impl RunToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RunToken(***)")
    }
}

/// Ordered mapping of argument name to value.
///
/// Values are handed to the algorithm positionally, so insertion order is
/// part of the contract. Deserialization keeps the document order of the
/// incoming map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskArgs(Vec<(String, String)>);

impl TaskArgs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert an argument. Re-inserting a name replaces its value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Argument values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TaskArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = TaskArgs::new();
        for (name, value) in iter {
            args.insert(name, value);
        }
        args
    }
}

impl Serialize for TaskArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(n, v)| (n, v)))
    }
}

/// Scalar argument value as it may appear on the wire.
#[derive(Deserialize)]
#[serde(untagged)]
enum ArgValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl From<ArgValue> for String {
    fn from(value: ArgValue) -> Self {
        match value {
            ArgValue::Text(s) => s,
            ArgValue::Integer(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::Flag(b) => b.to_string(),
        }
    }
}

struct TaskArgsVisitor;

impl<'de> Visitor<'de> for TaskArgsVisitor {
    type Value = TaskArgs;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of argument names to scalar values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut args = TaskArgs::new();
        while let Some((name, value)) = map.next_entry::<String, ArgValue>()? {
            args.insert(name, String::from(value));
        }
        Ok(args)
    }
}

impl<'de> Deserialize<'de> for TaskArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TaskArgsVisitor)
    }
}

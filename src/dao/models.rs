//! Backend-neutral vocabulary shared by every session store implementation.

use std::fmt;

use serde_json::{Map, Value};

use crate::dao::storage::{StorageError, StorageResult};

/// Outcome of an atomic create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// This caller created the document.
    Created,
    /// Another writer created the document first; nothing was written.
    AlreadyExists,
}

/// Full document value delivered to subscribers on every change.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSnapshot {
    /// The document exists; the value never carries backend bookkeeping fields.
    Present(Value),
    /// No document is stored under the subscribed key.
    Missing,
}

/// Path of a field inside a document, one segment per nesting level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Address a top-level field.
    pub fn root(field: impl Into<String>) -> Self {
        Self(vec![field.into()])
    }

    /// Extend the path by one nested segment.
    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// Borrow the individual path segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Render the path with `.` separators, as document databases expect.
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }

    /// Reject segments that cannot be expressed as a dotted path.
    pub fn validate(&self) -> StorageResult<()> {
        if self.0.is_empty() {
            return Err(self.invalid("empty path"));
        }

        for segment in &self.0 {
            if segment.is_empty() {
                return Err(self.invalid("empty segment"));
            }
            if segment.contains('.') {
                return Err(self.invalid("segment contains `.`"));
            }
            if segment.starts_with('$') || segment.starts_with('_') {
                return Err(self.invalid("segment uses a reserved prefix"));
            }
        }

        Ok(())
    }

    fn invalid(&self, reason: &'static str) -> StorageError {
        StorageError::InvalidPath {
            path: self.dotted(),
            reason,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// Flat set of field assignments applied to a document in a single write.
///
/// Assignments are applied in order and only touch the addressed fields;
/// sibling fields stay as they are, which is what makes concurrent merges
/// from different clients resolve as last-writer-wins per field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePatch {
    fields: Vec<(FieldPath, Value)>,
}

impl MergePatch {
    /// Start an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an assignment and return the patch for chaining.
    pub fn set(mut self, path: FieldPath, value: Value) -> Self {
        self.fields.push((path, value));
        self
    }

    /// Borrow the assignments in write order.
    pub fn fields(&self) -> &[(FieldPath, Value)] {
        &self.fields
    }

    /// True when the patch assigns nothing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate every path of the patch.
    pub fn validate(&self) -> StorageResult<()> {
        self.fields.iter().try_for_each(|(path, _)| path.validate())
    }

    /// Apply the patch to a JSON document in place.
    ///
    /// Intermediate maps are created when missing. The whole patch is
    /// validated before the first assignment so a rejected patch leaves the
    /// document untouched.
    pub fn apply_to(&self, document: &mut Value) -> StorageResult<()> {
        self.validate()?;
        let Value::Object(root) = document else {
            return Err(StorageError::InvalidPath {
                path: String::new(),
                reason: "document root is not an object",
            });
        };

        for (path, value) in &self.fields {
            assign(root, path.segments(), value.clone());
        }

        Ok(())
    }
}

fn assign(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [last] => {
            target.insert(last.clone(), value);
        }
        [head, rest @ ..] => {
            let slot = target
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                assign(child, rest, value);
            }
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::WorkloadKind;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("patch path must not be empty")]
    EmptyPath,
    #[error("{0} has no deployment level to label")]
    NoDeploymentLevel(WorkloadKind),
    #[error("serializing patch value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// RFC 6902 operation kind. Injection only ever adds structure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
}

/// A single `{op, path, value}` entry. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOperation {
    op: PatchOp,
    path: String,
    value: Json,
}

impl PatchOperation {
    pub fn new(op: PatchOp, path: impl Into<String>, value: Json) -> Result<Self, PatchError> {
        let path = path.into();
        if path.is_empty() { return Err(PatchError::EmptyPath); }
        Ok(Self { op, path, value })
    }

    /// `add` operation whose payload is any serializable value.
    pub fn add<T: Serialize + ?Sized>(path: impl Into<String>, value: &T) -> Result<Self, PatchError> {
        Self::new(PatchOp::Add, path, serde_json::to_value(value)?)
    }

    pub fn op(&self) -> PatchOp { self.op }
    pub fn path(&self) -> &str { &self.path }
    pub fn value(&self) -> &Json { &self.value }
}

impl fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?} {}", self.op, self.path),
        }
    }
}

/// Ordered patch document. Insertion order is application order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PatchDocument {
    ops: Vec<PatchOperation>,
}

impl PatchDocument {
    pub(crate) fn from_ops(ops: Vec<PatchOperation>) -> Self { Self { ops } }

    pub fn len(&self) -> usize { self.ops.len() }
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, PatchOperation> { self.ops.iter() }
    pub fn operations(&self) -> &[PatchOperation] { &self.ops }

    /// Encode as the JSON array carried in an admission response.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PatchError> {
        Ok(serde_json::to_vec(&self.ops)?)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, PatchError> {
        let ops: Vec<PatchOperation> = serde_json::from_slice(bytes)?;
        if ops.iter().any(|o| o.path.is_empty()) { return Err(PatchError::EmptyPath); }
        Ok(Self { ops })
    }
}

impl<'a> IntoIterator for &'a PatchDocument {
    type Item = &'a PatchOperation;
    type IntoIter = std::slice::Iter<'a, PatchOperation>;
    fn into_iter(self) -> Self::IntoIter { self.ops.iter() }
}

impl fmt::Display for PatchDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 { f.write_str(",")?; }
            write!(f, "{}", op)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_path_is_rejected() {
        let err = PatchOperation::new(PatchOp::Add, "", json!(1)).unwrap_err();
        assert!(matches!(err, PatchError::EmptyPath));
    }

    #[test]
    fn operation_serializes_as_rfc6902() {
        let op = PatchOperation::add("/spec/volumes", &Vec::<String>::new()).unwrap();
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v, json!({"op": "add", "path": "/spec/volumes", "value": []}));
        assert_eq!(op.to_string(), r#"{"op":"add","path":"/spec/volumes","value":[]}"#);
    }

    #[test]
    fn document_round_trips_through_bytes() {
        let doc = PatchDocument::from_ops(vec![
            PatchOperation::add("/spec/containers/-", &json!({"name": "proxy"})).unwrap(),
            PatchOperation::add("/metadata/labels", &json!({"a": "b"})).unwrap(),
        ]);
        let bytes = doc.to_json_bytes().unwrap();
        let back = PatchDocument::from_json_slice(&bytes).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.to_string(), String::from_utf8(bytes).unwrap());
    }

    #[test]
    fn decoding_rejects_unknown_ops_and_empty_paths() {
        assert!(PatchDocument::from_json_slice(br#"[{"op":"remove","path":"/a"}]"#).is_err());
        let err = PatchDocument::from_json_slice(br#"[{"op":"add","path":"","value":1}]"#).unwrap_err();
        assert!(matches!(err, PatchError::EmptyPath));
    }
}

//! Resource addressing and operation kinds.

use crate::error::{Failure, FailureKind};
use std::fmt;
use std::sync::Arc;

/// One `kind/id` step of a resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Segment {
    kind: Arc<str>,
    id: Arc<str>,
}

/// Immutable hierarchical path to a remote resource, e.g. `dbs/shop/colls/orders/docs/42`
/// or `threads/t_1/runs/r_9`. Two refs are equal when their paths are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    segments: Arc<[Segment]>,
}

fn validate(part: &str, what: &str) -> Result<(), Failure> {
    if part.is_empty() || part.contains('/') {
        return Err(Failure::new(
            FailureKind::InvalidRequest,
            format!("resource {what} `{part}` must be non-empty and must not contain '/'"),
        ));
    }
    Ok(())
}

impl ResourceRef {
    /// Top-level resource such as `dbs/{id}` or `threads/{id}`.
    pub fn root(kind: &str, id: &str) -> Result<Self, Failure> {
        validate(kind, "kind")?;
        validate(id, "id")?;
        Ok(Self { segments: Arc::from(vec![Segment { kind: kind.into(), id: id.into() }]) })
    }

    /// Nested resource under `self`.
    pub fn child(&self, kind: &str, id: &str) -> Result<Self, Failure> {
        validate(kind, "kind")?;
        validate(id, "id")?;
        let mut segments = self.segments.to_vec();
        segments.push(Segment { kind: kind.into(), id: id.into() });
        Ok(Self { segments: Arc::from(segments) })
    }

    /// Parse a `kind/id/kind/id...` path.
    pub fn parse(path: &str) -> Result<Self, Failure> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        if parts.len() % 2 != 0 {
            return Err(Failure::invalid_request(format!("`{path}` is not a kind/id path")));
        }
        let mut chunks = parts.chunks(2);
        let first = chunks
            .next()
            .ok_or_else(|| Failure::invalid_request("empty resource path"))?;
        chunks.try_fold(Self::root(first[0], first[1])?, |acc, pair| acc.child(pair[0], pair[1]))
    }

    pub fn database(id: &str) -> Result<Self, Failure> {
        Self::root("dbs", id)
    }

    pub fn collection(db: &str, coll: &str) -> Result<Self, Failure> {
        Self::database(db)?.child("colls", coll)
    }

    pub fn document(db: &str, coll: &str, doc: &str) -> Result<Self, Failure> {
        Self::collection(db, coll)?.child("docs", doc)
    }

    pub fn thread(id: &str) -> Result<Self, Failure> {
        Self::root("threads", id)
    }

    pub fn run(thread: &str, run: &str) -> Result<Self, Failure> {
        Self::thread(thread)?.child("runs", run)
    }

    /// The enclosing resource, or `None` for a top-level one.
    pub fn parent(&self) -> Option<Self> {
        match self.segments.len() {
            0 | 1 => None,
            n => Some(Self { segments: Arc::from(&self.segments[..n - 1]) }),
        }
    }

    /// Id of the last path segment.
    pub fn id(&self) -> &str {
        self.segments.last().map(|s| &*s.id).unwrap_or_default()
    }

    /// Kind of the last path segment.
    pub fn kind(&self) -> &str {
        self.segments.last().map(|s| &*s.kind).unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}/{}", seg.kind, seg.id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceRef({self})")
    }
}

/// Logical operation issued against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Execute,
}

impl Operation {
    /// HTTP method used to carry this operation.
    pub fn method(self) -> Method {
        match self {
            Operation::Create | Operation::Query | Operation::Execute => Method::Post,
            Operation::Read => Method::Get,
            Operation::Update => Method::Put,
            Operation::Delete => Method::Delete,
        }
    }

    /// Operations that may be repeated without changing the outcome.
    pub fn is_idempotent(self) -> bool {
        !matches!(self, Operation::Create | Operation::Execute)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_nested_paths() {
        let doc = ResourceRef::document("shop", "orders", "42").unwrap();
        assert_eq!(doc.path(), "dbs/shop/colls/orders/docs/42");
        assert_eq!(doc.id(), "42");
        assert_eq!(doc.kind(), "docs");
        assert_eq!(doc.depth(), 3);
        assert_eq!(doc.parent(), Some(ResourceRef::collection("shop", "orders").unwrap()));
        assert_eq!(ResourceRef::thread("t").unwrap().parent(), None);
    }

    #[test]
    fn equality_is_path_equality() {
        let a = ResourceRef::run("t_1", "r_1").unwrap();
        let b = ResourceRef::parse("/threads/t_1/runs/r_1/").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, ResourceRef::run("t_1", "r_2").unwrap());
    }

    #[test]
    fn rejects_bad_segments() {
        assert!(ResourceRef::database("").is_err());
        assert!(ResourceRef::database("a/b").is_err());
        assert!(ResourceRef::parse("dbs/a/colls").is_err());
        let err = ResourceRef::thread("x/y").unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidRequest);
    }

    #[test]
    fn operations_map_to_methods() {
        assert_eq!(Operation::Create.method(), Method::Post);
        assert_eq!(Operation::Read.method(), Method::Get);
        assert_eq!(Operation::Update.method(), Method::Put);
        assert_eq!(Operation::Delete.method(), Method::Delete);
        assert_eq!(Operation::Query.method(), Method::Post);
        assert!(!Operation::Create.is_idempotent());
        assert!(Operation::Read.is_idempotent());
    }
}

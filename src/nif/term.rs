use crate::errors::BridgeError;
use crate::registry::ResourceHandle;

/// A host runtime value, as seen by the native module.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Atom(String),
    Int(i128),
    Binary(Vec<u8>),
    List(Vec<Term>),
    Tuple(Vec<Term>),
    /// Opaque reference to a wrapper owned by the registry.
    Resource(ResourceHandle),
}

impl Term {
    #[must_use]
    pub fn atom(name: &str) -> Self {
        Term::Atom(name.to_string())
    }

    /// `{ok, Resource}`
    #[must_use]
    pub fn ok_resource(handle: ResourceHandle) -> Self {
        Term::Tuple(vec![Term::atom("ok"), Term::Resource(handle)])
    }

    /// `{error, Reason}`
    #[must_use]
    pub fn error(err: &BridgeError) -> Self {
        Term::Tuple(vec![Term::atom("error"), Term::atom(err.reason())])
    }

    /// Textual content of an atom or a UTF-8 binary.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Term::Atom(name) => Some(name),
            Term::Binary(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_atom(&self, name: &str) -> bool {
        matches!(self, Term::Atom(a) if a == name)
    }

    /// The resource inside `{ok, Resource}`.
    #[must_use]
    pub fn as_ok_resource(&self) -> Option<&ResourceHandle> {
        match self {
            Term::Tuple(items) => match items.as_slice() {
                [tag, Term::Resource(handle)] if tag.is_atom("ok") => Some(handle),
                _ => None,
            },
            _ => None,
        }
    }

    /// The reason inside `{error, Reason}`.
    #[must_use]
    pub fn as_error_reason(&self) -> Option<&str> {
        match self {
            Term::Tuple(items) => match items.as_slice() {
                [tag, Term::Atom(reason)] if tag.is_atom("error") => Some(reason),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Term::Atom(value.to_string())
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Int(i128::from(value))
    }
}

impl From<Vec<u8>> for Term {
    fn from(value: Vec<u8>) -> Self {
        Term::Binary(value)
    }
}

impl From<ResourceHandle> for Term {
    fn from(value: ResourceHandle) -> Self {
        Term::Resource(value)
    }
}

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::format::DecodeError;
use crate::streaming::jobs::{JobKind, Payload};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier under which a resource is known outside of the streamer, e.g. to the scene
/// graph that attaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalHandle(pub u64);

impl ExternalHandle {
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ExternalHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something the [`crate::streaming::cache::StreamingCache`] can hold: built from the payload of a
/// job on the control thread and disposed exactly once when the cache evicts it.
pub trait StreamedResource: Sized {
    const KIND: JobKind;

    fn from_payload(key: &str, payload: Payload) -> Result<Self, DecodeError>;

    fn cache_key(&self) -> &str;

    fn external_handle(&self) -> ExternalHandle;

    fn dispose(&self);
}

pub(crate) fn unexpected_payload(expected: JobKind, payload: &Payload) -> DecodeError {
    DecodeError::InvalidArguments(format!(
        "Expected a {:?} payload, got {:?}",
        expected,
        payload.kind()
    ))
}

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::trace;

use crate::format::m2::{M2Description, decode_m2};
use crate::format::wmo::{WmoGroupDescription, WmoRootDescription, decode_group, decode_root};
use crate::format::DecodeError;
use crate::io::common::loader::RawAssetLoader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    WmoRoot,
    WmoGroup,
    M2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobArg {
    Path(String),
    Index(u32),
}

/// A unit of decode work. The arguments are positional and interpreted by the [`JobRunner`]
/// according to the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub args: Vec<JobArg>,
}

impl JobRequest {
    pub fn new(kind: JobKind) -> Self {
        Self { kind, args: vec![] }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.args.push(JobArg::Path(path.into()));
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.args.push(JobArg::Index(index));
        self
    }

    /// The first path argument.
    pub fn path(&self) -> Result<&str, DecodeError> {
        self.args
            .iter()
            .find_map(|arg| match arg {
                JobArg::Path(path) => Some(path.as_str()),
                _ => None,
            })
            .ok_or_else(|| DecodeError::InvalidArguments(format!("{} is missing a path", self)))
    }

    /// The first index argument.
    pub fn index(&self) -> Result<u32, DecodeError> {
        self.args
            .iter()
            .find_map(|arg| match arg {
                JobArg::Index(index) => Some(*index),
                _ => None,
            })
            .ok_or_else(|| DecodeError::InvalidArguments(format!("{} is missing an index", self)))
    }
}

impl Display for JobRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(", self.kind)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match arg {
                JobArg::Path(path) => write!(f, "{}", path)?,
                JobArg::Index(index) => write!(f, "#{}", index)?,
            }
        }
        write!(f, ")")
    }
}

/// What a job produces, the plain description that a [`crate::streaming::resource::StreamedResource`]
/// is built from on the control thread.
#[derive(Debug, Clone)]
pub enum Payload {
    WmoRoot(WmoRootDescription),
    WmoGroup {
        index: u32,
        description: WmoGroupDescription,
    },
    M2(M2Description),
}

impl Payload {
    pub fn kind(&self) -> JobKind {
        match self {
            Payload::WmoRoot(_) => JobKind::WmoRoot,
            Payload::WmoGroup { .. } => JobKind::WmoGroup,
            Payload::M2(_) => JobKind::M2,
        }
    }
}

/// Executes jobs on the worker threads. Implementations must not touch any state of the control
/// thread, they are handed the request and nothing else.
pub trait JobRunner: Send + Sync {
    fn run(&self, request: &JobRequest) -> Result<Payload, DecodeError>;
}

/// Loads the raw bytes and decodes them.
pub struct AssetJobRunner {
    loader: Arc<dyn RawAssetLoader>,
}

impl AssetJobRunner {
    pub fn new(loader: Arc<dyn RawAssetLoader>) -> Self {
        Self { loader }
    }
}

impl JobRunner for AssetJobRunner {
    fn run(&self, request: &JobRequest) -> Result<Payload, DecodeError> {
        trace!("Running {}", request);
        let path = request.path()?;
        let data = self.loader.load_raw_owned(path)?;

        Ok(match request.kind {
            JobKind::WmoRoot => Payload::WmoRoot(decode_root(&data)?),
            JobKind::WmoGroup => Payload::WmoGroup {
                index: request.index()?,
                description: decode_group(&data)?,
            },
            JobKind::M2 => Payload::M2(decode_m2(&data)?),
        })
    }
}

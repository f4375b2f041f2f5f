#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod builder;
mod computed;
mod dependency;
mod error;
mod invocation;
mod memo;
mod node;
mod observable;
mod reaction;
mod runtime;
mod status;
pub mod tracer;

pub use builder::MemoBuilder;
pub use computed::Computed;
pub use dependency::{Awaitable, Dependency};
pub use error::{ConfigError, MemoError};
pub use invocation::{Invocation, InvocationId, InvocationKind, Producer, Resolution, ResolveSync};
pub use memo::Memo;
pub use node::NodeId;
pub use observable::{Atom, Observable};
pub use reaction::Reaction;
pub use runtime::{Runtime, RuntimeBuilder, DEFAULT_MAX_REACTION_ITERATIONS};
pub use status::{Status, StatusKind};
#[cfg(feature = "tracing")]
pub use tracer::TracingTracer;
pub use tracer::{CommitOutcome, MemoId, NoopTracer, Tracer, TracerMemoKey};

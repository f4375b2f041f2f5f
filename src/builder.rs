//! Construction of cells.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;

use crate::dependency::{Dependency, DependencyFn};
use crate::invocation::{Producer, Resolution, ResolveSync};
use crate::memo::{ErrorCallback, MemoConfig, ResultCallback};
use crate::{ConfigError, Memo, MemoError, Runtime};

/// Builder for [`Memo`] with its producer, await list, default and callbacks.
///
/// # Example
///
/// ```
/// use memo_flow::{Memo, MemoError, Resolution, Runtime, StatusKind};
///
/// let runtime = Runtime::new();
/// let config = Memo::from_fn(&runtime, || async { Ok::<_, MemoError>(8080u16) });
///
/// let address = Memo::builder(&runtime)
///     .name("address")
///     .await_deps({
///         let config = config.clone();
///         move || vec![config.dependency()]
///     })
///     .invoke({
///         let config = config.clone();
///         move |resolve| {
///             resolve.resolve(format!("127.0.0.1:{}", config.result().unwrap_or_default()));
///             Resolution::rejected(MemoError::msg("unused"))
///         }
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(address.status(), StatusKind::Pending);
/// runtime.run_until_stalled();
/// assert_eq!(address.result().as_deref(), Some("127.0.0.1:8080"));
/// ```
pub struct MemoBuilder<R> {
    runtime: Runtime,
    name: Option<Arc<str>>,
    producer: Option<Producer<R>>,
    dependencies: Option<DependencyFn>,
    default: Option<R>,
    on_result: Option<ResultCallback<R>>,
    on_error: Option<ErrorCallback>,
}

impl<R: Clone + Send + Sync + 'static> Memo<R> {
    /// Start configuring a cell in `runtime`.
    pub fn builder(runtime: &Runtime) -> MemoBuilder<R> {
        MemoBuilder::new(runtime)
    }

    /// A cell holding the outcome of a single future.
    ///
    /// The future is polled once by the runtime; re-reading the cell never
    /// restarts it.
    pub fn from_future<F, E>(runtime: &Runtime, future: F) -> Self
    where
        F: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<MemoError> + 'static,
    {
        let shared = future
            .map(|outcome: Result<R, E>| -> Result<R, MemoError> { outcome.map_err(Into::into) })
            .boxed()
            .shared();
        Memo::new(
            runtime,
            MemoConfig {
                name: None,
                producer: Box::new(move |_: &ResolveSync<R>| {
                    Resolution::Async(shared.clone().boxed())
                }),
                dependencies: None,
                default: None,
                on_result: None,
                on_error: None,
            },
        )
    }

    /// A cell whose producer calls `f` for a new future on every invocation.
    pub fn from_fn<F, Fut, E>(runtime: &Runtime, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<MemoError> + 'static,
    {
        Memo::new(
            runtime,
            MemoConfig {
                name: None,
                producer: Box::new(move |_: &ResolveSync<R>| Resolution::future(f())),
                dependencies: None,
                default: None,
                on_result: None,
                on_error: None,
            },
        )
    }
}

impl<R: Clone + Send + Sync + 'static> MemoBuilder<R> {
    /// Create a builder for a cell in `runtime`.
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            name: None,
            producer: None,
            dependencies: None,
            default: None,
            on_result: None,
            on_error: None,
        }
    }

    /// Name the cell in tracer events and `Debug` output.
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the producer.
    ///
    /// The producer may call [`ResolveSync::resolve`] to settle the invocation
    /// immediately, in which case its returned [`Resolution`] is disregarded.
    pub fn invoke(
        mut self,
        producer: impl Fn(&ResolveSync<R>) -> Resolution<R> + Send + Sync + 'static,
    ) -> Self {
        self.producer = Some(Box::new(producer));
        self
    }

    /// Set a producer that always returns a future.
    pub fn invoke_async<F, Fut, E>(self, producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<MemoError> + 'static,
    {
        self.invoke(move |_| Resolution::future(producer()))
    }

    /// Set the await list: the producer is only called while every returned
    /// dependency is complete.
    ///
    /// `dependencies` is called on every read, so it may return a different
    /// list over time.
    pub fn await_deps(
        mut self,
        dependencies: impl Fn() -> Vec<Dependency> + Send + Sync + 'static,
    ) -> Self {
        self.dependencies = Some(Box::new(dependencies));
        self
    }

    /// Value reported as the result while nothing was committed yet or the
    /// latest outcome is an error.
    pub fn default_result(mut self, value: R) -> Self {
        self.default = Some(value);
        self
    }

    /// Called with the committed value of every accepted successful
    /// invocation.
    pub fn on_result(mut self, callback: impl Fn(R) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Box::new(callback));
        self
    }

    /// Called with the error of every accepted failing invocation.
    pub fn on_error(mut self, callback: impl Fn(MemoError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Build the cell.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingProducer`] if no producer was set.
    pub fn build(self) -> Result<Memo<R>, ConfigError> {
        let Some(producer) = self.producer else {
            return Err(ConfigError::MissingProducer {
                name: self
                    .name
                    .as_deref()
                    .unwrap_or("<unnamed>")
                    .to_string(),
            });
        };
        Ok(Memo::new(
            &self.runtime,
            MemoConfig {
                name: self.name,
                producer,
                dependencies: self.dependencies,
                default: self.default,
                on_result: self.on_result,
                on_error: self.on_error,
            },
        ))
    }
}

impl<R> std::fmt::Debug for MemoBuilder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoBuilder")
            .field("name", &self.name)
            .field("has_producer", &self.producer.is_some())
            .field("has_dependencies", &self.dependencies.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusKind;
    use futures::channel::oneshot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_missing_producer() {
        let rt = Runtime::new();
        let err = Memo::<u32>::builder(&rt).name("orphan").build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingProducer {
                name: "orphan".to_string()
            }
        );

        let err = Memo::<u32>::builder(&rt).build().unwrap_err();
        assert!(err.to_string().contains("<unnamed>"));
    }

    #[test]
    fn test_from_future_invoked_once() {
        let rt = Runtime::new();
        let (tx, rx) = oneshot::channel::<u32>();
        let memo = Memo::from_future(&rt, rx);

        assert_eq!(memo.status(), StatusKind::Pending);
        tx.send(3).unwrap();
        rt.run_until_stalled();
        assert_eq!(memo.result(), Some(3));
        assert_eq!(memo.invocation().map(|i| i.id.0), Some(1));
    }

    #[test]
    fn test_from_fn_calls_function_per_invocation() {
        let rt = Runtime::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = {
            let calls = calls.clone();
            Memo::from_fn(&rt, move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, MemoError>(n) }
            })
        };
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        memo.status();
        rt.run_until_stalled();
        assert_eq!(memo.result(), Some(0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_named_memo() {
        let rt = Runtime::new();
        let memo = Memo::builder(&rt)
            .name("answer")
            .invoke_async(|| async { Ok::<_, MemoError>(42) })
            .build()
            .unwrap();
        assert_eq!(memo.name(), Some("answer"));
        assert!(format!("{:?}", memo).contains("answer#"));
    }
}

/// Implements [`RemoteFunction::name`](crate::RemoteFunction::name).
#[macro_export]
macro_rules! name {
    ($name:expr) => {
        fn name(&self) -> &str {
            $name
        }
    };
}

/// Implements the `Domain`/`Range` associated types and
/// [`RemoteFunction::call`](crate::RemoteFunction::call) from an
/// `async fn`-shaped body. The body evaluates to
/// `Result<Range, RemoteError>`:
///
/// ```ignore
/// impl RemoteFunction for Add {
///     name!("add");
///     call! {
///         async fn call(&self, x: i64, y: i64) -> i64 {
///             Ok(x + y)
///         }
///     }
/// }
/// ```
#[macro_export]
macro_rules! call {
    (async fn call(& $self:ident $(, $arg:ident : $argty:ty)* $(,)?) -> $range:ty { $($body:tt)* }) => {
        type Domain = ($($argty,)*);
        type Range = $range;

        fn call<'call>(
            &'call $self,
            ($($arg,)*): Self::Domain,
        ) -> $crate::BoxFuture<'call, ::std::result::Result<Self::Range, $crate::RemoteError>> {
            ::std::boxed::Box::pin(async move { $($body)* })
        }
    };
}

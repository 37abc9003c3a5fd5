use crate::{frame::RemoteError, RemoteFunction};
use futures::future::BoxFuture;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

/// The local object whose functions the remote peer may invoke.
///
/// A provider is a tree: each entry is either a nested scope or a function.
/// An inbound request names its target by a dotted path (`"math.add"`); the
/// path is resolved segment by segment, descending scopes until the final
/// segment lands on a function.
///
/// Functions are registered with [`insert`](Provider::insert); nested scopes
/// are built with [`scope_mut`](Provider::scope_mut). Registering the same
/// name twice replaces the earlier entry.
#[derive(Default)]
pub struct Provider {
    entries: BTreeMap<String, Entry>,
}

enum Entry {
    Scope(Provider),
    Function(Arc<dyn ErasedFunction>),
}

impl Provider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<RFn>(&mut self, rfn: RFn)
    where
        RFn: RemoteFunction + Send + Sync + 'static,
        RFn::Domain: Send,
    {
        let name = rfn.name().to_owned();
        let dyn_rfn = Arc::new(TypedRemoteFunction { rfn });
        self.entries.insert(name, Entry::Function(dyn_rfn));
    }

    /// The nested scope registered under `name`, created on first use.
    pub fn scope_mut(&mut self, name: &str) -> &mut Provider {
        if !matches!(self.entries.get(name), Some(Entry::Scope(_))) {
            self.entries
                .insert(name.to_owned(), Entry::Scope(Provider::new()));
        }
        match self.entries.get_mut(name) {
            Some(Entry::Scope(scope)) => scope,
            _ => unreachable!("scope was inserted above"),
        }
    }

    /// Resolve a dotted path to a function. Intermediate segments must be
    /// scopes and the final segment a function; anything else is `None`.
    pub(crate) fn resolve(&self, listener: &str) -> Option<Arc<dyn ErasedFunction>> {
        let mut scope = self;
        let mut segments = listener.split('.').peekable();
        while let Some(segment) = segments.next() {
            match (scope.entries.get(segment)?, segments.peek()) {
                (Entry::Scope(inner), Some(_)) => scope = inner,
                (Entry::Function(rfn), None) => return Some(rfn.clone()),
                _ => return None,
            }
        }
        None
    }
}

/// A type-erased version of the main trait, RemoteFunction
pub(crate) trait ErasedFunction: Send + Sync {
    fn invoke(&self, parameters: Vec<Value>) -> BoxFuture<'_, Result<Value, RemoteError>>;
}

struct TypedRemoteFunction<RFn>
where
    RFn: RemoteFunction + Send + Sync,
    RFn::Domain: Send,
{
    rfn: RFn,
}

impl<RFn> ErasedFunction for TypedRemoteFunction<RFn>
where
    RFn: RemoteFunction + Send + Sync,
    RFn::Domain: Send,
{
    fn invoke(&self, parameters: Vec<Value>) -> BoxFuture<'_, Result<Value, RemoteError>> {
        Box::pin(async move {
            // A parameterless domain is the unit type, which decodes from
            // null rather than from an empty sequence.
            let encoded_args = if parameters.is_empty() {
                Value::Null
            } else {
                Value::Array(parameters)
            };
            let args: RFn::Domain = serde_json::from_value(encoded_args)
                .map_err(|e| RemoteError::new("TypeError", format!("invalid parameters: {e}")))?;
            let retval = self.rfn.call(args).await?;
            serde_json::to_value(retval).map_err(|e| {
                RemoteError::new("TypeError", format!("unserializable return value: {e}"))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{call, name};
    use serde_json::json;

    struct Add;

    impl RemoteFunction for Add {
        name!("add");
        call! {
            async fn call(&self, x: i64, y: i64) -> i64 {
                Ok(x + y)
            }
        }
    }

    struct Fail;

    impl RemoteFunction for Fail {
        name!("fail");
        call! {
            async fn call(&self,) -> () {
                Err(RemoteError::new("Error", "boom"))
            }
        }
    }

    fn sample() -> Provider {
        let mut provider = Provider::new();
        provider.insert(Fail);
        provider.scope_mut("math").insert(Add);
        provider
    }

    #[tokio::test]
    async fn resolves_nested_paths() {
        let provider = sample();
        let add = provider.resolve("math.add").expect("math.add resolves");
        let sum = add.invoke(vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(sum, json!(5));
    }

    #[test]
    fn rejects_partial_and_unknown_paths() {
        let provider = sample();
        assert!(provider.resolve("math").is_none());
        assert!(provider.resolve("math.add.deeper").is_none());
        assert!(provider.resolve("absent").is_none());
        assert!(provider.resolve("").is_none());
    }

    #[tokio::test]
    async fn function_errors_keep_their_identity() {
        let provider = sample();
        let fail = provider.resolve("fail").unwrap();
        let error = fail.invoke(vec![]).await.unwrap_err();
        assert_eq!(error.name, "Error");
        assert_eq!(error.message, "boom");
    }

    #[tokio::test]
    async fn parameter_mismatch_is_a_remote_type_error() {
        let provider = sample();
        let add = provider.resolve("math.add").unwrap();
        let error = add.invoke(vec![json!("two"), json!(3)]).await.unwrap_err();
        assert_eq!(error.name, "TypeError");
    }
}

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::comm::Communicator;
use crate::error::RfcError;
use crate::frame::IntoParameters;

/// A proxy onto the remote peer's provider.
///
/// The driver is lazy: it never enumerates the remote surface. It only
/// accumulates a dotted path — [`get`](Driver::get) descends one scope, and
/// [`call`](Driver::call) invokes a function under the current path:
///
/// ```ignore
/// let sum: i64 = driver.get("math").call("add", (2, 3)).await?;
/// // equivalent to
/// let sum: i64 = driver.call("math.add", (2, 3)).await?;
/// ```
///
/// Drivers are cheap to clone and remain valid handles after the session
/// closes; calls made then reject with the teardown error.
#[derive(Clone)]
pub struct Driver {
    comm: Arc<Communicator>,
    path: String,
}

impl Driver {
    pub(crate) fn root(comm: Arc<Communicator>) -> Self {
        Self {
            comm,
            path: String::new(),
        }
    }

    /// A deeper proxy for the member `name` of the current path.
    pub fn get(&self, name: &str) -> Driver {
        Driver {
            comm: self.comm.clone(),
            path: self.join_path(name),
        }
    }

    /// The dotted path this driver denotes; empty at the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Call the remote function `name` under this driver's path. Arguments
    /// are passed positionally; the returned value is decoded into `R`.
    pub async fn call<A, R>(&self, name: &str, args: A) -> Result<R, RfcError>
    where
        A: IntoParameters,
        R: DeserializeOwned,
    {
        let listener = self.join_path(name);
        let value = self.comm.invoke(&listener, args.into_parameters()?).await?;
        serde_json::from_value(value).map_err(|e| RfcError::Codec(e.to_string()))
    }

    /// Raw call at this driver's own path, for callers that already hold
    /// encoded parameters.
    pub async fn invoke(&self, parameters: Vec<Value>) -> Result<Value, RfcError> {
        self.comm.invoke(&self.path, parameters).await
    }

    fn join_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{}", self.path, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Invoke, InvokeResponse};
    use crate::state::{SessionState, StateCell};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::task::yield_now;

    fn capture() -> (Arc<Communicator>, Arc<Mutex<Vec<Invoke>>>) {
        let frames: Arc<Mutex<Vec<Invoke>>> = Arc::default();
        let sink = {
            let frames = frames.clone();
            move |frame: Invoke| -> Result<(), RfcError> {
                frames.lock().unwrap().push(frame);
                Ok(())
            }
        };
        let state = Arc::new(StateCell::new(SessionState::Open));
        (Communicator::new(sink, state, None), frames)
    }

    #[test]
    fn paths_accumulate_through_member_access() {
        let (comm, _) = capture();
        let driver = comm.driver();
        assert_eq!(driver.path(), "");
        assert_eq!(driver.get("a").path(), "a");
        assert_eq!(driver.get("a").get("b").get("c").path(), "a.b.c");
    }

    #[tokio::test]
    async fn calls_carry_the_dotted_listener_and_decode_the_result() {
        let (comm, frames) = capture();
        let driver = comm.driver().get("math");

        let call = tokio::spawn(async move { driver.call::<_, i64>("add", (2, 3)).await });
        yield_now().await;

        let sent = frames.lock().unwrap().clone();
        let Invoke::Request(request) = &sent[0] else {
            panic!("expected a request frame");
        };
        assert_eq!(request.listener, "math.add");
        assert_eq!(request.parameters, vec![json!(2), json!(3)]);

        comm.deliver(Invoke::Response(InvokeResponse::success(
            request.uid,
            json!(5),
        )));
        assert_eq!(call.await.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn mistyped_results_surface_as_codec_errors() {
        let (comm, frames) = capture();
        let driver = comm.driver();

        let call = tokio::spawn({
            let driver = driver.clone();
            async move { driver.call::<_, i64>("name", ()).await }
        });
        yield_now().await;

        let uid = frames.lock().unwrap()[0].uid();
        comm.deliver(Invoke::Response(InvokeResponse::success(
            uid,
            json!("not a number"),
        )));
        assert!(matches!(call.await.unwrap(), Err(RfcError::Codec(_))));
    }
}

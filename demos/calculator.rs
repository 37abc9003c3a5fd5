use gridlink::{call, name, Connector, Provider, RemoteError, RemoteFunction, RfcError, Server};

pub struct Add;

impl RemoteFunction for Add {
    name!("add");
    call! {
        async fn call(&self, x: f64, y: f64) -> f64 {
            Ok(x + y)
        }
    }
}

pub struct Div;

impl RemoteFunction for Div {
    name!("div");
    call! {
        async fn call(&self, x: f64, y: f64) -> f64 {
            if y == 0.0 {
                Err(RemoteError::new("RangeError", "division by zero"))
            } else {
                Ok(x / y)
            }
        }
    }
}

fn calculator() -> Provider {
    let mut provider = Provider::new();
    let arithmetic = provider.scope_mut("arithmetic");
    arithmetic.insert(Add);
    arithmetic.insert(Div);
    provider
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let server = Server::open(0, |acceptor| async move {
        acceptor.accept(calculator()).unwrap();
    })
    .await
    .unwrap();

    let connector = Connector::connect(
        ("127.0.0.1", server.local_addr().port()),
        vec![],
        None,
    )
    .await
    .unwrap();

    let arithmetic = connector.driver().get("arithmetic");
    let sum: f64 = arithmetic.call("add", (2.0, 3.0)).await.unwrap();
    println!("2 + 3 = {sum}");

    match arithmetic.call::<_, f64>("div", (1.0, 0.0)).await {
        Err(RfcError::RemoteFailure(error)) => println!("1 / 0 failed: {error}"),
        other => println!("unexpected outcome: {other:?}"),
    }

    connector.close().unwrap();
    connector.join().await.unwrap();
}

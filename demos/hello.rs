use gridlink::{call, name, Connector, Provider, RemoteFunction, Server};

pub struct Hello;

impl RemoteFunction for Hello {
    name!("hello");
    call! {
        async fn call(&self, who: String) -> String {
            Ok(format!("Hello, {who}!"))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let server = Server::open(0, |acceptor| async move {
        let mut provider = Provider::new();
        provider.insert(Hello);
        acceptor.accept(provider).unwrap();
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

    let greeting: String = connector.driver().call("hello", ("world",)).await.unwrap();
    println!("{greeting}");

    connector.close().unwrap();
}

//! The assembled proxy driven by an ordinary HTTP client.

use std::net::SocketAddr;
use std::time::Duration;

use granblue_proxy::lifecycle::{App, Shutdown};
use granblue_proxy::ProxyConfig;
use reqwest::{redirect::Policy, StatusCode};

async fn start_app() -> (SocketAddr, Shutdown) {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.web.hostname = "localhost".into();
    config.cache.disk.enabled = false;
    config.cache.memory = true;

    let app = App::build(&config).await.unwrap();
    let addr = app.local_addr().unwrap();
    let shutdown = Shutdown::new();
    tokio::spawn(app.run(shutdown.clone()));
    (addr, shutdown)
}

fn client(proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(format!("http://{}", proxy)).unwrap())
        .redirect(Policy::none())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn own_site_redirects_and_404s() {
    let (addr, shutdown) = start_app().await;
    let client = client(addr);

    let res = client.get("http://localhost/").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(
        res.headers()["location"],
        "https://game.granbluefantasy.jp/"
    );
    assert!(res.headers().contains_key("x-proxy-server"));

    let res = client.get("http://localhost/favicon.ico").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
}

#[tokio::test]
async fn foreign_host_is_forbidden() {
    let (addr, shutdown) = start_app().await;

    let res = client(addr)
        .get("http://evil.example.com/index.html")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        res.text().await.unwrap(),
        "Target host evil.example.com is not allowed to be accessed via this proxy"
    );

    shutdown.trigger();
}

#[tokio::test]
async fn foreign_https_tunnel_is_refused() {
    let (addr, shutdown) = start_app().await;

    let result = client(addr).get("https://evil.example.com/").send().await;
    assert!(result.is_err());

    shutdown.trigger();
}

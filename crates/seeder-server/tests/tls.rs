mod common;

use common::{addr_of, Fixture, TestCa};
use rcgen::ExtendedKeyUsagePurpose;
use reqwest::{Certificate, Client, Identity, StatusCode};
use seeder_server::{ListenerKind, StopOutcome};
use std::net::SocketAddr;
use std::time::Duration;

fn client(server_ca: &TestCa, addr: SocketAddr, identity: Option<Identity>) -> Client {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(Certificate::from_pem(server_ca.cert_pem.as_bytes()).unwrap())
        .resolve("seeder.test", addr)
        .timeout(Duration::from_secs(10));
    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn test_secure_listener_serves_over_tls() {
    let fixture = Fixture::new().with_secure_listener(None);
    let seeder = fixture.seeder();
    seeder.start().await.unwrap();

    let secure = addr_of(&seeder, ListenerKind::Secure).await;
    let insecure = addr_of(&seeder, ListenerKind::Insecure).await;
    assert_ne!(secure, insecure);

    let response = client(&fixture.server_ca, secure, None)
        .get(format!("https://seeder.test:{}/agent/x86_64", secure.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[..], b"agent x86_64 payload");

    // Plain HTTP against the TLS port gets no answer
    assert!(Client::new()
        .get(format!("http://{secure}/agent/x86_64"))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .is_err());

    // The plain listener keeps working alongside
    let response = reqwest::get(format!("http://{insecure}/agent/x86_64")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(seeder.stop(Duration::from_secs(5)).await, StopOutcome::Drained { forced: false });
}

#[tokio::test]
async fn test_untrusted_server_certificate_is_refused_by_clients() {
    let fixture = Fixture::new().with_secure_listener(None);
    let seeder = fixture.seeder();
    seeder.start().await.unwrap();
    let secure = addr_of(&seeder, ListenerKind::Secure).await;

    let stranger = TestCa::new("Someone Else");
    let result = client(&stranger, secure, None)
        .get(format!("https://seeder.test:{}/agent/x86_64", secure.port()))
        .send()
        .await;
    assert!(result.is_err());

    seeder.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_client_ca_requires_client_certificate() {
    let client_ca = TestCa::new("Device CA");
    let fixture = Fixture::new().with_secure_listener(Some(&client_ca));
    let seeder = fixture.seeder();
    seeder.start().await.unwrap();
    let secure = addr_of(&seeder, ListenerKind::Secure).await;
    let url = format!("https://seeder.test:{}/stage0/x86_64", secure.port());

    assert!(client(&fixture.server_ca, secure, None).get(&url).send().await.is_err());

    let rogue = TestCa::new("Rogue CA").leaf("switch-1", Some(ExtendedKeyUsagePurpose::ClientAuth));
    let rogue = Identity::from_pem(format!("{}{}", rogue.cert_pem, rogue.key_pem).as_bytes()).unwrap();
    assert!(client(&fixture.server_ca, secure, Some(rogue)).get(&url).send().await.is_err());

    let device = client_ca.leaf("switch-1", Some(ExtendedKeyUsagePurpose::ClientAuth));
    let identity = Identity::from_pem(format!("{}{}", device.cert_pem, device.key_pem).as_bytes()).unwrap();
    let response = client(&fixture.server_ca, secure, Some(identity))
        .get(&url)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.unwrap().starts_with(b"stage0 x86_64 payload"));

    seeder.stop(Duration::from_secs(5)).await;
}

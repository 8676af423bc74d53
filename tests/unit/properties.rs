//! Unit tests for broker properties

use kafka_operator::Error;
use kafka_operator::broker::properties::listeners;
use kafka_operator::broker::{WorkloadPaths, server_properties};

use crate::common::*;

fn paths() -> WorkloadPaths {
    WorkloadPaths::new("/etc/kafka")
}

#[test]
fn test_listeners_follow_security_protocol() {
    let plaintext = ClusterFixture::new(0)
        .with_credentials()
        .with_zookeeper(false)
        .state();
    let names: Vec<String> = listeners(&plaintext)
        .unwrap()
        .iter()
        .map(|l| l.name())
        .collect();
    assert_eq!(names, vec!["INTERNAL_SASL_PLAINTEXT", "CLIENT_SASL_PLAINTEXT"]);

    let mtls = ClusterFixture::new(0)
        .with_credentials()
        .with_tls()
        .with_mtls()
        .with_unit_tls_material()
        .with_zookeeper(true)
        .state();
    let names: Vec<String> = listeners(&mtls).unwrap().iter().map(|l| l.name()).collect();
    assert_eq!(
        names,
        vec!["INTERNAL_SASL_SSL", "CLIENT_SASL_SSL", "CLIENT_SSL"]
    );
}

#[test]
fn test_mtls_listener_requires_client_auth() {
    let state = ClusterFixture::new(0)
        .with_credentials()
        .with_tls()
        .with_mtls()
        .with_unit_tls_material()
        .with_zookeeper(true)
        .state();
    let properties = server_properties(&state, &paths()).unwrap();

    assert_eq!(
        properties.get("listener.name.client_ssl.ssl.client.auth"),
        Some("required")
    );
    assert_eq!(
        properties.get("zookeeper.ssl.truststore.location"),
        Some("/etc/kafka/truststore.jks")
    );
}

#[test]
fn test_super_users_include_admin_clients() {
    let state = ClusterFixture::new(0)
        .with_credentials()
        .with_zookeeper(false)
        .with_client(5, "admin-app", &[("extra-user-roles", "admin")])
        .with_app_field("relation-5", "client-secret")
        .state();
    let properties = server_properties(&state, &paths()).unwrap();

    assert_eq!(
        properties.get("super.users"),
        Some("User:admin;User:relation-5;User:sync")
    );
}

#[test]
fn test_vm_broker_advertises_private_address() {
    let state = ClusterFixture::new(1)
        .on_vm()
        .with_credentials()
        .with_zookeeper(false)
        .with_unit_field("private-address", "192.168.1.11")
        .state();
    let properties = server_properties(&state, &paths()).unwrap();

    assert_eq!(properties.get("broker.id"), Some("1"));
    assert_eq!(
        properties.get("advertised.listeners"),
        Some(
            "INTERNAL_SASL_PLAINTEXT://192.168.1.11:19092,CLIENT_SASL_PLAINTEXT://192.168.1.11:9092"
        )
    );
}

#[test]
fn test_vm_broker_without_address_defers() {
    let state = ClusterFixture::new(1)
        .on_vm()
        .with_credentials()
        .with_zookeeper(false)
        .state();
    assert!(matches!(
        server_properties(&state, &paths()),
        Err(Error::MissingPrerequisite(_))
    ));
}

#[test]
fn test_diff_after_enabling_tls() {
    let tls = ClusterFixture::new(0)
        .with_credentials()
        .with_zookeeper(true)
        .with_tls()
        .with_unit_tls_material();
    let plaintext = ClusterFixture::new(0)
        .with_credentials()
        .with_zookeeper(false)
        .state();

    let current = server_properties(&plaintext, &paths()).unwrap().render();
    let desired = server_properties(&tls.state(), &paths()).unwrap();
    let changed = desired.diff(&current).changed_keys();

    assert!(changed.contains("listeners"));
    assert!(changed.contains("ssl.keystore.location"));
    assert!(!changed.contains("broker.id"));
    assert!(!changed.contains("zookeeper.connect"));
}

//! Unit tests for node port exposure

use kafka_operator::resources::nodeport::{MAX_BROKER_ORDINALS, NODEPORT_MAX};
use kafka_operator::resources::service::{
    allocated_node_port, bootstrap_service_name, listener_service_name,
};
use kafka_operator::resources::{
    ApplyOutcome, ServiceReconciler, bootstrap_exposure, bootstrap_node_port, generate_service,
    listener_exposure, listener_node_port,
};
use kafka_operator::state::SECURITY_MECHANISMS;
use kafka_operator::testing::{FakeClusterApi, broker_pod};
use kafka_operator::{Error, SecurityMechanism};

use crate::common::*;

mod node_port_tests {
    use super::*;

    #[test]
    fn test_ports_for_first_brokers() {
        assert_eq!(listener_node_port(0, SecurityMechanism::SaslPlaintext).unwrap(), 31000);
        assert_eq!(listener_node_port(0, SecurityMechanism::SaslSsl).unwrap(), 31001);
        assert_eq!(listener_node_port(2, SecurityMechanism::Ssl).unwrap(), 31022);
        assert_eq!(bootstrap_node_port(SecurityMechanism::SaslSsl), 30001);
    }

    #[test]
    fn test_last_ordinal_fits_range() {
        let last = MAX_BROKER_ORDINALS - 1;
        for mechanism in SECURITY_MECHANISMS {
            assert!(listener_node_port(last, mechanism).unwrap() <= NODEPORT_MAX);
        }
        assert!(matches!(
            listener_node_port(MAX_BROKER_ORDINALS, SecurityMechanism::SaslPlaintext),
            Err(Error::NodePortOutOfRange(_))
        ));
    }

    #[test]
    fn test_external_bootstrap_lists_brokers_with_node_ip() {
        let state = ClusterFixture::new(0)
            .exposed()
            .with_unit_field("node-ip", "34.0.0.1")
            .with_peer(1, &[("node-ip", "34.0.0.2")])
            .with_peer(2, &[])
            .state();

        assert_eq!(
            state.bootstrap_server(),
            "34.0.0.1:31000,34.0.0.2:31010"
        );
    }
}

mod service_tests {
    use super::*;

    #[test]
    fn test_listener_service_selects_only_its_pod() {
        let pod = broker_pod("kafka-1", APP, "node-a");
        let spec = listener_exposure(&pod, APP, 1, SecurityMechanism::SaslSsl).unwrap();
        let service = generate_service(&spec);

        assert_eq!(spec.name, "kafka-1-sasl-ssl");
        assert_eq!(allocated_node_port(&service), Some(31011));

        let svc_spec = service.spec.unwrap();
        assert_eq!(svc_spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(svc_spec.external_traffic_policy.as_deref(), Some("Local"));
        assert_eq!(
            svc_spec
                .selector
                .unwrap()
                .get("statefulset.kubernetes.io/pod-name")
                .map(String::as_str),
            Some("kafka-1")
        );
        assert_eq!(svc_spec.ports.unwrap()[0].port, 29093);
    }

    #[test]
    fn test_names() {
        assert_eq!(
            listener_service_name("kafka-3", SecurityMechanism::SaslPlaintext),
            "kafka-3-sasl-plaintext"
        );
        assert_eq!(
            bootstrap_service_name(APP, SecurityMechanism::Ssl),
            "kafka-ssl-bootstrap"
        );
    }

    #[tokio::test]
    async fn test_every_broker_gets_its_own_service() {
        let api = FakeClusterApi::default();
        let services = ServiceReconciler::new(&api);

        for unit_id in 0..3 {
            let pod = broker_pod(&format!("kafka-{}", unit_id), APP, "node-a");
            let spec =
                listener_exposure(&pod, APP, unit_id, SecurityMechanism::SaslPlaintext).unwrap();
            assert_eq!(services.ensure(&spec).await.unwrap(), ApplyOutcome::Applied);

            let bootstrap = bootstrap_exposure(&pod, APP, SecurityMechanism::SaslPlaintext);
            assert_eq!(
                services.ensure(&bootstrap).await.unwrap(),
                ApplyOutcome::Applied
            );
        }

        // Bootstrap service is shared by all brokers
        assert_eq!(api.service_count(), 4);
        let ports: Vec<i32> = api
            .service_names()
            .iter()
            .filter_map(|name| api.service(name))
            .filter_map(|svc| allocated_node_port(&svc))
            .collect();
        assert_eq!(ports, vec![31000, 31010, 31020, 30000]);
    }

    #[tokio::test]
    async fn test_port_clash_resolution() {
        let pod = broker_pod("kafka-0", APP, "node-a");
        let spec = listener_exposure(&pod, APP, 0, SecurityMechanism::SaslPlaintext).unwrap();

        let ours = FakeClusterApi::default().with_service(generate_service(&spec));
        ours.reject_next_apply_with_port_clash();
        assert_eq!(
            ServiceReconciler::new(&ours).ensure(&spec).await.unwrap(),
            ApplyOutcome::AlreadyAllocated
        );

        let theirs = FakeClusterApi::default();
        theirs.reject_next_apply_with_port_clash();
        assert!(matches!(
            ServiceReconciler::new(&theirs).ensure(&spec).await,
            Err(Error::PortConflict { port: 31000, .. })
        ));
    }

    #[tokio::test]
    async fn test_denied_delete_is_not_fatal() {
        let api = FakeClusterApi::default();
        api.deny_services();
        assert!(!ServiceReconciler::new(&api)
            .remove("kafka-0-sasl-ssl")
            .await
            .unwrap());
    }
}

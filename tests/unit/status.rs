//! Unit tests for status evaluation

use kafka_operator::controller::status::{LogLevel, StatusKind};
use kafka_operator::{Status, evaluate_status};

use crate::common::*;

mod precedence_tests {
    use super::*;

    #[test]
    fn test_no_peer_relation_hides_everything() {
        let state = ClusterFixture::new(0).state_without_peers();
        assert_eq!(evaluate_status(&state), Status::NoPeerRelation);
    }

    #[test]
    fn test_missing_zookeeper_relation() {
        let state = ClusterFixture::new(0).with_credentials().state();
        assert_eq!(evaluate_status(&state), Status::ZkNotRelated);
    }

    #[test]
    fn test_zookeeper_without_data() {
        let state = ClusterFixture::new(0)
            .with_credentials()
            .with_zookeeper_pending()
            .state();
        assert_eq!(evaluate_status(&state), Status::ZkNoData);
    }

    #[test]
    fn test_tls_mismatch_either_way() {
        let kafka_only = ClusterFixture::new(0)
            .with_credentials()
            .with_tls()
            .with_zookeeper(false)
            .state();
        assert_eq!(evaluate_status(&kafka_only), Status::ZkTlsMismatch);

        let zookeeper_only = ClusterFixture::new(0)
            .with_credentials()
            .with_zookeeper(true)
            .state();
        assert_eq!(evaluate_status(&zookeeper_only), Status::ZkTlsMismatch);
    }

    #[test]
    fn test_tls_mismatch_before_missing_certificate() {
        let state = ClusterFixture::new(0).with_tls().with_zookeeper(false).state();
        assert_eq!(evaluate_status(&state), Status::ZkTlsMismatch);
    }

    #[test]
    fn test_waiting_for_certificate() {
        let state = ClusterFixture::new(0)
            .with_credentials()
            .with_tls()
            .with_zookeeper(true)
            .state();
        assert_eq!(evaluate_status(&state), Status::NoCert);
    }

    #[test]
    fn test_missing_certificate_before_missing_credentials() {
        let state = ClusterFixture::new(0)
            .with_tls()
            .with_zookeeper(true)
            .state();
        assert_eq!(evaluate_status(&state), Status::NoCert);
    }

    #[test]
    fn test_waiting_for_credentials() {
        let state = ClusterFixture::new(0)
            .with_app_field("admin-password", "only-admin")
            .with_zookeeper(false)
            .state();
        assert_eq!(evaluate_status(&state), Status::NoBrokerCreds);
    }

    #[test]
    fn test_active_plaintext_and_tls() {
        let plaintext = ClusterFixture::new(0)
            .with_credentials()
            .with_zookeeper(false)
            .state();
        assert_eq!(evaluate_status(&plaintext), Status::Active);

        let tls = ClusterFixture::new(0)
            .with_credentials()
            .with_tls()
            .with_unit_tls_material()
            .with_zookeeper(true)
            .state();
        assert_eq!(evaluate_status(&tls), Status::Active);
    }
}

mod presentation_tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Status::Active.kind(), StatusKind::Active);
        assert_eq!(Status::NoPeerRelation.kind(), StatusKind::Maintenance);
        assert_eq!(Status::ZkNotRelated.kind(), StatusKind::Blocked);
        assert_eq!(Status::ZkTlsMismatch.kind(), StatusKind::Blocked);
        assert_eq!(Status::ZkNoData.kind(), StatusKind::Waiting);
        assert_eq!(Status::NoCert.kind(), StatusKind::Waiting);
    }

    #[test]
    fn test_tls_mismatch_is_logged_as_error() {
        assert_eq!(Status::ZkTlsMismatch.log_level(), LogLevel::Error);
        assert_eq!(Status::NoCert.log_level(), LogLevel::Info);
        assert_eq!(Status::ZkNoData.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Status::ZkTlsMismatch.to_string(),
            "Blocked: tls must be enabled on both kafka and zookeeper"
        );
        assert_eq!(Status::Active.to_string(), "Active");
    }
}

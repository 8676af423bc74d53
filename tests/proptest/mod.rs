// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for node ports, SANs and status evaluation
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Node ports are unique per (ordinal, mechanism) and stay in range
//! 2. SAN sets are deterministic and independent of input order
//! 3. Status evaluation honours its precedence for any relation data
//! 4. Rendered properties produce no diff against themselves

#[path = "../common/mod.rs"]
mod common;

use std::collections::HashSet;

use proptest::prelude::*;

use kafka_operator::broker::{WorkloadPaths, server_properties};
use kafka_operator::resources::nodeport::{NODEPORT_BASE, NODEPORT_MAX};
use kafka_operator::resources::{MAX_BROKER_ORDINALS, bootstrap_node_port, listener_node_port};
use kafka_operator::state::SECURITY_MECHANISMS;
use kafka_operator::tls::{SanInputs, SanSet, build_sans, parse_current_sans};
use kafka_operator::{SecurityMechanism, Status, Substrate, evaluate_status};

use common::*;

// =============================================================================
// Strategies
// =============================================================================

fn mechanism() -> impl Strategy<Value = SecurityMechanism> {
    prop::sample::select(SECURITY_MECHANISMS.to_vec())
}

fn ordinal() -> impl Strategy<Value = u32> {
    0..MAX_BROKER_ORDINALS
}

fn ipv4() -> impl Strategy<Value = String> {
    (1u8..=254, 0u8..=255, 0u8..=255, 1u8..=254)
        .prop_map(|(a, b, c, d)| format!("{}.{}.{}.{}", a, b, c, d))
}

fn hostname() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}(\\.[a-z][a-z0-9]{0,8}){0,3}"
}

fn san_inputs() -> impl Strategy<Value = SanInputs> {
    (
        prop::bool::ANY,
        0u32..50,
        prop::option::of(ipv4()),
        prop::option::of(ipv4()),
        prop::option::of(ipv4()),
        hostname(),
        prop::collection::vec(hostname(), 0..4),
    )
        .prop_map(|(vm, unit_id, bind, node_ip, host, fqdn, extra_sans)| SanInputs {
            substrate: if vm { Substrate::Vm } else { Substrate::K8s },
            unit_id,
            unit_name: format!("kafka/{}", unit_id),
            bind_address: bind,
            node_ip,
            host,
            internal_address: Some(format!("kafka-{}.kafka-endpoints", unit_id)),
            fqdn,
            extra_sans,
        })
}

// =============================================================================
// Node ports
// =============================================================================

proptest! {
    #[test]
    fn listener_ports_stay_in_range(unit_id in ordinal(), mech in mechanism()) {
        let port = listener_node_port(unit_id, mech).unwrap();
        prop_assert!(port >= NODEPORT_BASE);
        prop_assert!(port <= NODEPORT_MAX);
    }

    #[test]
    fn listener_ports_are_injective(
        a in (ordinal(), mechanism()),
        b in (ordinal(), mechanism()),
    ) {
        let port_a = listener_node_port(a.0, a.1).unwrap();
        let port_b = listener_node_port(b.0, b.1).unwrap();
        prop_assert_eq!(port_a == port_b, a == b);
    }

    #[test]
    fn listener_ports_never_hit_bootstrap_ports(unit_id in ordinal(), mech in mechanism()) {
        let port = listener_node_port(unit_id, mech).unwrap();
        for bootstrap in SECURITY_MECHANISMS {
            prop_assert_ne!(port, bootstrap_node_port(bootstrap));
        }
    }

    #[test]
    fn ordinals_beyond_capacity_are_rejected(
        unit_id in MAX_BROKER_ORDINALS..10_000,
        mech in mechanism(),
    ) {
        prop_assert!(listener_node_port(unit_id, mech).is_err());
    }
}

#[test]
fn every_port_in_plan_is_distinct() {
    let mut seen = HashSet::new();
    for unit_id in 0..MAX_BROKER_ORDINALS {
        for mech in SECURITY_MECHANISMS {
            assert!(seen.insert(listener_node_port(unit_id, mech).unwrap()));
        }
    }
    for mech in SECURITY_MECHANISMS {
        assert!(seen.insert(bootstrap_node_port(mech)));
    }
}

// =============================================================================
// SANs
// =============================================================================

proptest! {
    #[test]
    fn build_sans_is_deterministic(inputs in san_inputs()) {
        prop_assert_eq!(build_sans(&inputs), build_sans(&inputs));
    }

    #[test]
    fn build_sans_ignores_extra_san_order(inputs in san_inputs()) {
        let mut reversed = inputs.clone();
        reversed.extra_sans.reverse();
        prop_assert_eq!(build_sans(&inputs), build_sans(&reversed));
    }

    #[test]
    fn san_sets_are_sorted_and_unique(inputs in san_inputs()) {
        let sans = build_sans(&inputs);
        for list in [&sans.sans_ip, &sans.sans_dns] {
            prop_assert!(list.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(list.iter().all(|s| !s.is_empty() && s.trim() == s));
        }
    }

    #[test]
    fn rendered_sans_parse_back(inputs in san_inputs()) {
        let sans = build_sans(&inputs);
        let rendered = sans
            .sans_dns
            .iter()
            .map(|d| format!("DNS:{}", d))
            .chain(sans.sans_ip.iter().map(|ip| format!("IP Address:{}", ip)))
            .collect::<Vec<_>>()
            .join(", ");
        let output = format!("X509v3 Subject Alternative Name:\n    {}\n", rendered);

        let parsed = parse_current_sans(&output);
        prop_assert_eq!(parsed, sans);
    }

    #[test]
    fn k8s_sans_carry_the_internal_address(inputs in san_inputs()) {
        prop_assume!(inputs.substrate == Substrate::K8s);
        let sans = build_sans(&inputs);
        let internal = inputs.internal_address.clone().unwrap();
        prop_assert!(sans.sans_dns.contains(&internal));
    }
}

#[test]
fn empty_san_set() {
    assert!(SanSet::new(Vec::new(), Vec::new()).is_empty());
}

// =============================================================================
// Status
// =============================================================================

#[derive(Clone, Debug)]
struct Scenario {
    peer: bool,
    zookeeper: Option<Option<bool>>,
    tls: bool,
    certificate: bool,
    credentials: bool,
}

fn scenario() -> impl Strategy<Value = Scenario> {
    (
        prop::bool::ANY,
        prop::option::of(prop::option::of(prop::bool::ANY)),
        prop::bool::ANY,
        prop::bool::ANY,
        prop::bool::ANY,
    )
        .prop_map(|(peer, zookeeper, tls, certificate, credentials)| Scenario {
            peer,
            zookeeper,
            tls,
            certificate,
            credentials,
        })
}

impl Scenario {
    fn fixture(&self) -> ClusterFixture {
        let mut fixture = ClusterFixture::new(0);
        match self.zookeeper {
            Some(Some(zk_tls)) => fixture = fixture.with_zookeeper(zk_tls),
            Some(None) => fixture = fixture.with_zookeeper_pending(),
            None => {}
        }
        if self.tls {
            fixture = fixture.with_tls();
        }
        if self.certificate {
            fixture = fixture.with_unit_tls_material();
        }
        if self.credentials {
            fixture = fixture.with_credentials();
        }
        fixture
    }

    fn status(&self) -> Status {
        let fixture = self.fixture();
        if self.peer {
            evaluate_status(&fixture.state())
        } else {
            evaluate_status(&fixture.state_without_peers())
        }
    }
}

proptest! {
    #[test]
    fn missing_peer_relation_wins(s in scenario()) {
        prop_assume!(!s.peer);
        prop_assert_eq!(s.status(), Status::NoPeerRelation);
    }

    #[test]
    fn tls_mismatch_reported_whenever_flags_differ(s in scenario()) {
        prop_assume!(s.peer);
        if let Some(Some(zk_tls)) = s.zookeeper {
            prop_assume!(zk_tls != s.tls);
            prop_assert_eq!(s.status(), Status::ZkTlsMismatch);
        }
    }

    #[test]
    fn active_exactly_when_all_prerequisites_hold(s in scenario()) {
        let ready = s.peer
            && matches!(s.zookeeper, Some(Some(zk_tls)) if zk_tls == s.tls)
            && (!s.tls || s.certificate)
            && s.credentials;
        prop_assert_eq!(s.status() == Status::Active, ready);
    }

    #[test]
    fn evaluation_is_deterministic(s in scenario()) {
        prop_assert_eq!(s.status(), s.status());
    }
}

// =============================================================================
// Broker properties
// =============================================================================

proptest! {
    #[test]
    fn properties_diff_is_empty_against_own_rendering(
        unit_id in 0u32..100,
        tls in prop::bool::ANY,
        exposed in prop::bool::ANY,
        node_ip in ipv4(),
    ) {
        let mut fixture = ClusterFixture::new(unit_id)
            .with_credentials()
            .with_zookeeper(tls)
            .with_unit_field("node-ip", &node_ip);
        if tls {
            fixture = fixture.with_tls().with_unit_tls_material();
        }
        if exposed {
            fixture = fixture.exposed();
        }

        let paths = WorkloadPaths::new("/etc/kafka");
        let properties = server_properties(&fixture.state(), &paths).unwrap();
        prop_assert!(properties.diff(&properties.render()).is_empty());
        let broker_id = unit_id.to_string();
        prop_assert_eq!(properties.get("broker.id"), Some(broker_id.as_str()));
    }
}

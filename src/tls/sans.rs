//! Subject Alternative Names for a unit's certificate

use std::collections::BTreeSet;

use crate::config::UNIT_PLACEHOLDER;
use crate::state::models::Substrate;

/// IP and DNS SANs, always sorted and deduplicated
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SanSet {
    pub sans_ip: Vec<String>,
    pub sans_dns: Vec<String>,
}

impl SanSet {
    /// Normalize arbitrary entries; empty entries are dropped
    pub fn new<I, D>(ips: I, dns: D) -> Self
    where
        I: IntoIterator<Item = String>,
        D: IntoIterator<Item = String>,
    {
        fn normalize(entries: impl IntoIterator<Item = String>) -> Vec<String> {
            entries
                .into_iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        }

        Self {
            sans_ip: normalize(ips),
            sans_dns: normalize(dns),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sans_ip.is_empty() && self.sans_dns.is_empty()
    }
}

/// Everything SANs are derived from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SanInputs {
    pub substrate: Substrate,
    pub unit_id: u32,
    /// Stable unit name (`kafka/1`)
    pub unit_name: String,
    pub bind_address: Option<String>,
    /// Discovered address of the hosting node
    pub node_ip: Option<String>,
    /// Plain host address off the cluster network
    pub host: Option<String>,
    /// In-cluster address (`kafka-1.kafka-endpoints`)
    pub internal_address: Option<String>,
    pub fqdn: String,
    /// Operator-declared names, may contain `{unit}`
    pub extra_sans: Vec<String>,
}

/// Derive the SANs a unit's certificate must carry
pub fn build_sans(inputs: &SanInputs) -> SanSet {
    let extra = inputs
        .extra_sans
        .iter()
        .map(|san| san.replace(UNIT_PLACEHOLDER, &inputs.unit_id.to_string()));

    match inputs.substrate {
        Substrate::Vm => SanSet::new(
            inputs.host.clone(),
            [inputs.unit_name.clone(), inputs.fqdn.clone()]
                .into_iter()
                .chain(extra),
        ),
        Substrate::K8s => {
            let internal = inputs.internal_address.clone().unwrap_or_default();
            let short_name = internal.split('.').next().unwrap_or_default().to_string();

            SanSet::new(
                inputs
                    .bind_address
                    .clone()
                    .into_iter()
                    .chain(inputs.node_ip.clone()),
                [short_name, internal, inputs.fqdn.clone()]
                    .into_iter()
                    .chain(extra),
            )
        }
    }
}

/// Parse `openssl x509 -noout -ext subjectAltName` output
///
/// ```text
/// X509v3 Subject Alternative Name:
///     DNS:kafka-0, DNS:kafka-0.kafka-endpoints, IP Address:10.1.0.7
/// ```
pub fn parse_current_sans(output: &str) -> SanSet {
    let mut ips = Vec::new();
    let mut dns = Vec::new();

    let entries = output
        .lines()
        .filter(|line| line.contains("DNS:") || line.contains("IP Address:"))
        .flat_map(|line| line.split(','));

    for entry in entries {
        match entry.trim().split_once(':') {
            Some(("DNS", value)) => dns.push(value.to_string()),
            Some(("IP Address", value)) => ips.push(value.to_string()),
            _ => {}
        }
    }

    SanSet::new(ips, dns)
}

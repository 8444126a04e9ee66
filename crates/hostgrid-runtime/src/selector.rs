//! Host selection: deterministic placement of one dispatch onto one host.
//!
//! A host is eligible when it is `online`, carries every required capability
//! tag, and (when a protocol is requested) lists it as compatible or primary.
//! Among eligible hosts a location match wins; remaining ties go to the lowest
//! host id. The ranking is a placeholder policy until a real scoring model
//! exists; it only has to be stable for a given registry snapshot.

use crate::error::StoreError;
use crate::models::{Host, HostStatus, ProtocolType};
use crate::registry::HostRegistry;
use crate::repository::ComputeRepository;

/// What the caller needs from a host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub required_capabilities: Vec<String>,
    pub protocol_type: Option<ProtocolType>,
    /// Soft preference; never filters hosts out.
    pub preferred_location: Option<String>,
}

impl SelectionCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol(mut self, protocol_type: ProtocolType) -> Self {
        self.protocol_type = Some(protocol_type);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.preferred_location = Some(location.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Selection result. An empty candidate set is a normal outcome, not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionDecision {
    Selected(Host),
    NoHostAvailable,
}

/// True when `host` may serve a dispatch matching `criteria`.
pub fn is_eligible(host: &Host, criteria: &SelectionCriteria) -> bool {
    if host.status != HostStatus::Online {
        return false;
    }
    let protocol_ok = criteria
        .protocol_type
        .map_or(true, |protocol| host.speaks(protocol));
    let capabilities_ok = criteria
        .required_capabilities
        .iter()
        .all(|required| host.capabilities.iter().any(|c| c == required));
    protocol_ok && capabilities_ok
}

fn location_matches(host: &Host, preferred: Option<&str>) -> bool {
    match (preferred, host.location.as_deref()) {
        (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
        _ => false,
    }
}

/// Pick one host from a registry snapshot.
pub fn select_host<'a>(hosts: &'a [Host], criteria: &SelectionCriteria) -> Option<&'a Host> {
    let preferred = criteria.preferred_location.as_deref();
    hosts
        .iter()
        .filter(|host| is_eligible(host, criteria))
        .min_by(|a, b| {
            let a_local = location_matches(a, preferred);
            let b_local = location_matches(b, preferred);
            b_local
                .cmp(&a_local)
                .then_with(|| a.host_id.cmp(&b.host_id))
        })
}

/// Selector bound to a host registry.
#[derive(Clone)]
pub struct HostSelector<R: ComputeRepository> {
    registry: HostRegistry<R>,
}

impl<R: ComputeRepository> HostSelector<R> {
    pub fn new(registry: HostRegistry<R>) -> Self {
        Self { registry }
    }

    pub fn select(&self, criteria: &SelectionCriteria) -> Result<SelectionDecision, StoreError> {
        let hosts = self.registry.list_online_hosts()?;
        Ok(match select_host(&hosts, criteria) {
            Some(host) => SelectionDecision::Selected(host.clone()),
            None => SelectionDecision::NoHostAvailable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_repository::InMemoryComputeRepository;
    use crate::testing::sample_host;

    fn host(id: &str, protocols: &[ProtocolType], location: Option<&str>) -> Host {
        let mut h = sample_host(id, 70);
        h.primary_protocol = ProtocolType::Misc;
        h.compatible_protocols = protocols.to_vec();
        h.location = location.map(str::to_string);
        h
    }

    #[test]
    fn only_online_compatible_hosts_are_selected() {
        let mut offline = host("host-a", &[ProtocolType::Mcp], None);
        offline.status = HostStatus::Offline;
        let mut busy = host("host-b", &[ProtocolType::Mcp], None);
        busy.status = HostStatus::Busy;
        let a2a = host("host-c", &[ProtocolType::A2a], None);
        let mcp = host("host-d", &[ProtocolType::Mcp], None);
        let hosts = vec![offline, busy, a2a, mcp];

        let criteria = SelectionCriteria::new().with_protocol(ProtocolType::Mcp);
        let chosen = select_host(&hosts, &criteria).expect("one host eligible");
        assert_eq!(chosen.host_id, "host-d");
        for h in &hosts {
            if is_eligible(h, &criteria) {
                assert_eq!(h.status, HostStatus::Online);
                assert!(h.speaks(ProtocolType::Mcp));
            }
        }
    }

    #[test]
    fn primary_protocol_counts_as_compatible() {
        let mut h = host("host-a", &[], None);
        h.primary_protocol = ProtocolType::A2a;
        let criteria = SelectionCriteria::new().with_protocol(ProtocolType::A2a);
        assert!(is_eligible(&h, &criteria));
    }

    #[test]
    fn no_protocol_requested_accepts_any_online_host() {
        let hosts = vec![host("host-b", &[ProtocolType::A2a], None)];
        let chosen = select_host(&hosts, &SelectionCriteria::new());
        assert_eq!(chosen.map(|h| h.host_id.as_str()), Some("host-b"));
    }

    #[test]
    fn no_eligible_host_yields_none() {
        let hosts = vec![host("host-a", &[ProtocolType::Mcp], None)];
        let criteria = SelectionCriteria::new().with_protocol(ProtocolType::A2a);
        assert!(select_host(&hosts, &criteria).is_none());
    }

    #[test]
    fn location_preference_beats_lower_id() {
        let hosts = vec![
            host("host-a", &[ProtocolType::Mcp], Some("us-east")),
            host("host-z", &[ProtocolType::Mcp], Some("eu-west")),
        ];
        let criteria = SelectionCriteria::new()
            .with_protocol(ProtocolType::Mcp)
            .with_location("EU-WEST");
        assert_eq!(select_host(&hosts, &criteria).unwrap().host_id, "host-z");
    }

    #[test]
    fn location_is_soft_preference() {
        let hosts = vec![host("host-a", &[ProtocolType::Mcp], Some("us-east"))];
        let criteria = SelectionCriteria::new().with_location("ap-south");
        assert_eq!(select_host(&hosts, &criteria).unwrap().host_id, "host-a");
    }

    #[test]
    fn ties_break_on_lowest_id_regardless_of_order() {
        let forward = vec![
            host("host-c", &[ProtocolType::Mcp], None),
            host("host-a", &[ProtocolType::Mcp], None),
            host("host-b", &[ProtocolType::Mcp], None),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();
        let criteria = SelectionCriteria::new().with_protocol(ProtocolType::Mcp);
        assert_eq!(select_host(&forward, &criteria).unwrap().host_id, "host-a");
        assert_eq!(select_host(&reversed, &criteria).unwrap().host_id, "host-a");
    }

    #[test]
    fn required_capabilities_are_a_subset_match() {
        let mut gpu = host("host-b", &[ProtocolType::Mcp], None);
        gpu.capabilities = vec!["cpu".into(), "gpu".into()];
        let cpu_only = host("host-a", &[ProtocolType::Mcp], None);
        let hosts = vec![cpu_only, gpu];

        let criteria = SelectionCriteria::new().with_capabilities(["gpu"]);
        assert_eq!(select_host(&hosts, &criteria).unwrap().host_id, "host-b");

        let criteria = SelectionCriteria::new().with_capabilities(["gpu", "tpu"]);
        assert!(select_host(&hosts, &criteria).is_none());
    }

    #[test]
    fn selector_reads_online_hosts_from_registry() {
        let repo = InMemoryComputeRepository::new();
        repo.insert_host(&host("host-a", &[ProtocolType::Mcp], None))
            .unwrap();
        let selector = HostSelector::new(HostRegistry::new(repo));

        let decision = selector
            .select(&SelectionCriteria::new().with_protocol(ProtocolType::Mcp))
            .unwrap();
        assert!(matches!(decision, SelectionDecision::Selected(ref h) if h.host_id == "host-a"));

        let decision = selector
            .select(&SelectionCriteria::new().with_protocol(ProtocolType::A2a))
            .unwrap();
        assert_eq!(decision, SelectionDecision::NoHostAvailable);
    }
}

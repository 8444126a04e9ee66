//! Host registry: source of truth for host existence, capability and statistics.

use chrono::Utc;
use tracing::info;

use crate::error::{RegistryError, StoreError};
use crate::identity::new_id;
use crate::models::{Host, HostStatus, NewHost, ProtocolType, StatisticsDelta};
use crate::repository::ComputeRepository;

/// Profit share applied when an operator registers a host without one.
pub const DEFAULT_PROFIT_SHARE_PERCENTAGE: u8 = 70;

#[derive(Clone)]
pub struct HostRegistry<R: ComputeRepository> {
    repository: R,
}

impl<R: ComputeRepository> HostRegistry<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Register a host in `online` status with zeroed counters.
    pub fn register_host(&self, new_host: NewHost) -> Result<Host, RegistryError> {
        if new_host.name.trim().is_empty() {
            return Err(RegistryError::Invalid("host name must not be empty".into()));
        }
        validate_endpoint(&new_host.endpoint)?;
        let profit_share_percentage = new_host
            .profit_share_percentage
            .unwrap_or(DEFAULT_PROFIT_SHARE_PERCENTAGE);
        validate_profit_share(profit_share_percentage)?;

        let primary_protocol = new_host.primary_protocol.unwrap_or(ProtocolType::Misc);
        let mut compatible_protocols = new_host.compatible_protocols;
        if !compatible_protocols.contains(&primary_protocol) {
            compatible_protocols.push(primary_protocol);
        }
        compatible_protocols.sort();
        compatible_protocols.dedup();

        let mut capabilities: Vec<String> = new_host
            .capabilities
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        capabilities.sort();
        capabilities.dedup();

        let now = Utc::now();
        let host = Host {
            host_id: new_id(),
            owner_id: new_host.owner_id,
            name: new_host.name.trim().to_string(),
            endpoint: new_host.endpoint.trim().trim_end_matches('/').to_string(),
            status: HostStatus::Online,
            location: new_host
                .location
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            capabilities,
            primary_protocol,
            compatible_protocols,
            profit_share_percentage,
            total_executions: 0,
            successful_executions: 0,
            total_earnings: Default::default(),
            created_at: now,
            updated_at: now,
            last_seen_at: None,
        };
        self.repository.insert_host(&host)?;
        info!(
            host_id = %host.host_id,
            endpoint = %host.endpoint,
            primary_protocol = %host.primary_protocol,
            profit_share = host.profit_share_percentage,
            "compute host registered"
        );
        Ok(host)
    }

    pub fn list_online_hosts(&self) -> Result<Vec<Host>, StoreError> {
        self.repository.list_hosts_by_status(HostStatus::Online)
    }

    pub fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        self.repository.list_hosts()
    }

    pub fn get_host(&self, host_id: &str) -> Result<Host, StoreError> {
        self.repository
            .get_host(host_id)?
            .ok_or_else(|| StoreError::HostNotFound(host_id.to_string()))
    }

    /// Atomically apply one execution's counter changes to a host.
    pub fn update_statistics(
        &self,
        host_id: &str,
        delta: StatisticsDelta,
    ) -> Result<Host, StoreError> {
        self.repository
            .apply_host_statistics(host_id, &delta, Utc::now())
    }

    pub fn set_status(&self, host_id: &str, status: HostStatus) -> Result<Host, StoreError> {
        let host = self
            .repository
            .update_host_status(host_id, status, Utc::now())?;
        info!(host_id = %host_id, status = status.as_str(), "compute host status changed");
        Ok(host)
    }

    pub fn set_profit_share(
        &self,
        host_id: &str,
        profit_share_percentage: u8,
    ) -> Result<Host, RegistryError> {
        validate_profit_share(profit_share_percentage)?;
        let host =
            self.repository
                .update_profit_share(host_id, profit_share_percentage, Utc::now())?;
        info!(
            host_id = %host_id,
            profit_share = profit_share_percentage,
            "compute host profit share changed"
        );
        Ok(host)
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }
}

fn validate_profit_share(percentage: u8) -> Result<(), RegistryError> {
    if percentage > 100 {
        return Err(RegistryError::Invalid(format!(
            "profit_share_percentage must be within 0..=100, got {}",
            percentage
        )));
    }
    Ok(())
}

pub(crate) fn validate_endpoint(endpoint: &str) -> Result<(), RegistryError> {
    let url = reqwest::Url::parse(endpoint.trim())
        .map_err(|e| RegistryError::Invalid(format!("invalid endpoint '{}': {}", endpoint, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RegistryError::Invalid(format!(
            "endpoint scheme must be http or https, got '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::Credits;
    use crate::memory_repository::InMemoryComputeRepository;

    fn new_host(name: &str) -> NewHost {
        NewHost {
            owner_id: "operator-1".into(),
            name: name.into(),
            endpoint: "http://127.0.0.1:7000/".into(),
            primary_protocol: Some(ProtocolType::Mcp),
            ..Default::default()
        }
    }

    #[test]
    fn register_host_defaults_to_online_and_seventy_percent() {
        let registry = HostRegistry::new(InMemoryComputeRepository::new());
        let host = registry.register_host(new_host("alpha")).unwrap();
        assert_eq!(host.status, HostStatus::Online);
        assert_eq!(host.profit_share_percentage, DEFAULT_PROFIT_SHARE_PERCENTAGE);
        assert_eq!(host.compatible_protocols, vec![ProtocolType::Mcp]);
        assert_eq!(host.endpoint, "http://127.0.0.1:7000");
        assert_eq!(host.total_executions, 0);
    }

    #[test]
    fn register_host_rejects_bad_input() {
        let registry = HostRegistry::new(InMemoryComputeRepository::new());

        let mut bad_share = new_host("alpha");
        bad_share.profit_share_percentage = Some(101);
        assert!(matches!(
            registry.register_host(bad_share),
            Err(RegistryError::Invalid(_))
        ));

        let mut bad_endpoint = new_host("alpha");
        bad_endpoint.endpoint = "ftp://example.com".into();
        assert!(matches!(
            registry.register_host(bad_endpoint),
            Err(RegistryError::Invalid(_))
        ));

        assert!(matches!(
            registry.register_host(new_host("  ")),
            Err(RegistryError::Invalid(_))
        ));
    }

    #[test]
    fn list_online_hosts_excludes_other_statuses() {
        let registry = HostRegistry::new(InMemoryComputeRepository::new());
        let a = registry.register_host(new_host("alpha")).unwrap();
        let b = registry.register_host(new_host("beta")).unwrap();
        registry.set_status(&b.host_id, HostStatus::Maintenance).unwrap();

        let online = registry.list_online_hosts().unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].host_id, a.host_id);
        assert_eq!(registry.list_hosts().unwrap().len(), 2);
    }

    #[test]
    fn update_statistics_accumulates() {
        let registry = HostRegistry::new(InMemoryComputeRepository::new());
        let host = registry.register_host(new_host("alpha")).unwrap();
        registry
            .update_statistics(&host.host_id, StatisticsDelta::success(Credits::from_whole(7)))
            .unwrap();
        let after = registry
            .update_statistics(&host.host_id, StatisticsDelta::failure())
            .unwrap();
        assert_eq!(after.total_executions, 2);
        assert_eq!(after.successful_executions, 1);
        assert_eq!(after.total_earnings, Credits::from_whole(7));
        assert!(after.last_seen_at.is_some());
        assert_eq!(after.success_rate(), Some(0.5));
    }

    #[test]
    fn get_missing_host_is_not_found() {
        let registry = HostRegistry::new(InMemoryComputeRepository::new());
        assert!(matches!(
            registry.get_host("nope"),
            Err(StoreError::HostNotFound(ref id)) if id == "nope"
        ));
    }

    #[test]
    fn set_profit_share_validates_range() {
        let registry = HostRegistry::new(InMemoryComputeRepository::new());
        let host = registry.register_host(new_host("alpha")).unwrap();
        let updated = registry.set_profit_share(&host.host_id, 55).unwrap();
        assert_eq!(updated.profit_share_percentage, 55);
        assert!(registry.set_profit_share(&host.host_id, 120).is_err());
    }
}

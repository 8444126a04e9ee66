//! Server catalog: named logical capabilities that requesters address.

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::detector::ProtocolDetector;
use crate::error::{RegistryError, StoreError};
use crate::identity::new_id;
use crate::models::{ProtocolType, ServerDefinition, ServerVisibility};
use crate::registry::validate_endpoint;
use crate::repository::ComputeRepository;

/// Registration input for a server definition.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewServer {
    pub owner_id: String,
    pub name: String,
    pub endpoint: String,
    /// Detected from the endpoint when omitted.
    pub protocol_type: Option<ProtocolType>,
    /// Defaults to private.
    pub visibility: Option<ServerVisibility>,
    pub description: Option<String>,
    pub code: Option<String>,
    pub app_url: Option<String>,
}

#[derive(Clone)]
pub struct ServerCatalog<R: ComputeRepository, D: ProtocolDetector> {
    repository: R,
    detector: D,
}

impl<R: ComputeRepository, D: ProtocolDetector> ServerCatalog<R, D> {
    pub fn new(repository: R, detector: D) -> Self {
        Self {
            repository,
            detector,
        }
    }

    pub async fn register_server(
        &self,
        new_server: NewServer,
    ) -> Result<ServerDefinition, RegistryError> {
        let name = new_server.name.trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::Invalid("server name must not be empty".into()));
        }
        if new_server.owner_id.trim().is_empty() {
            return Err(RegistryError::Invalid("server owner must not be empty".into()));
        }
        validate_endpoint(&new_server.endpoint)?;
        let endpoint = new_server.endpoint.trim().trim_end_matches('/').to_string();

        let protocol_type = match new_server.protocol_type {
            Some(declared) => declared,
            None => self.detector.detect_or_misc(&endpoint).await,
        };

        let server = ServerDefinition {
            server_id: new_id(),
            owner_id: new_server.owner_id,
            name,
            protocol_type,
            endpoint,
            visibility: new_server.visibility.unwrap_or(ServerVisibility::Private),
            description: new_server.description,
            code: new_server.code,
            app_url: new_server.app_url,
            created_at: Utc::now(),
        };
        self.repository.insert_server(&server)?;
        info!(
            server_id = %server.server_id,
            name = %server.name,
            protocol_type = %server.protocol_type,
            "server registered"
        );
        Ok(server)
    }

    /// Public servers plus the requester's own, newest first.
    pub fn list_visible(&self, requester_id: &str) -> Result<Vec<ServerDefinition>, StoreError> {
        Ok(self
            .repository
            .list_servers()?
            .into_iter()
            .filter(|s| s.visible_to(requester_id))
            .collect())
    }

    /// Resolve a server name for a requester.
    pub fn find_visible_by_name(
        &self,
        requester_id: &str,
        name: &str,
    ) -> Result<Option<ServerDefinition>, StoreError> {
        let servers = self.repository.list_servers()?;
        Ok(resolve_visible_server(servers, requester_id, name))
    }
}

/// Pick the definition a requester means by `name`. The requester's own
/// definition shadows a public one with the same name; otherwise the newest
/// visible one wins.
pub fn resolve_visible_server(
    servers: Vec<ServerDefinition>,
    requester_id: &str,
    name: &str,
) -> Option<ServerDefinition> {
    let mut candidates: Vec<ServerDefinition> = servers
        .into_iter()
        .filter(|s| s.name == name && s.visible_to(requester_id))
        .collect();
    match candidates.iter().position(|s| s.owner_id == requester_id) {
        Some(index) => Some(candidates.swap_remove(index)),
        None => candidates.into_iter().next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::StaticProtocolDetector;
    use crate::memory_repository::InMemoryComputeRepository;

    fn catalog(
        detected: ProtocolType,
    ) -> ServerCatalog<InMemoryComputeRepository, StaticProtocolDetector> {
        ServerCatalog::new(
            InMemoryComputeRepository::new(),
            StaticProtocolDetector(detected),
        )
    }

    fn new_server(owner: &str, name: &str) -> NewServer {
        NewServer {
            owner_id: owner.into(),
            name: name.into(),
            endpoint: "http://127.0.0.1:7100/".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn undeclared_protocol_is_detected() {
        let catalog = catalog(ProtocolType::A2a);
        let server = catalog.register_server(new_server("alice", "weather")).await.unwrap();
        assert_eq!(server.protocol_type, ProtocolType::A2a);
        assert_eq!(server.visibility, ServerVisibility::Private);
        assert_eq!(server.endpoint, "http://127.0.0.1:7100");
    }

    #[tokio::test]
    async fn declared_protocol_skips_detection() {
        let catalog = catalog(ProtocolType::A2a);
        let mut input = new_server("alice", "weather");
        input.protocol_type = Some(ProtocolType::Mcp);
        let server = catalog.register_server(input).await.unwrap();
        assert_eq!(server.protocol_type, ProtocolType::Mcp);
    }

    #[tokio::test]
    async fn duplicate_name_per_owner_is_rejected() {
        let catalog = catalog(ProtocolType::Misc);
        catalog.register_server(new_server("alice", "weather")).await.unwrap();
        let err = catalog
            .register_server(new_server("alice", "weather"))
            .await
            .expect_err("same owner and name");
        assert!(matches!(err, RegistryError::Store(StoreError::DuplicateServer(_))));
        catalog.register_server(new_server("bob", "weather")).await.unwrap();
    }

    #[tokio::test]
    async fn visibility_limits_listing_and_lookup() {
        let catalog = catalog(ProtocolType::Mcp);
        let mut public = new_server("alice", "weather");
        public.visibility = Some(ServerVisibility::Public);
        catalog.register_server(public).await.unwrap();
        catalog.register_server(new_server("alice", "secret")).await.unwrap();

        let names: Vec<String> = catalog
            .list_visible("bob")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["weather".to_string()]);
        assert_eq!(catalog.list_visible("alice").unwrap().len(), 2);
        assert!(catalog.find_visible_by_name("bob", "secret").unwrap().is_none());
        assert!(catalog.find_visible_by_name("alice", "secret").unwrap().is_some());
    }

    #[tokio::test]
    async fn own_definition_shadows_public_one() {
        let catalog = catalog(ProtocolType::Mcp);
        let mut public = new_server("alice", "weather");
        public.visibility = Some(ServerVisibility::Public);
        catalog.register_server(public).await.unwrap();
        let mut own = new_server("bob", "weather");
        own.protocol_type = Some(ProtocolType::A2a);
        catalog.register_server(own).await.unwrap();

        let found = catalog.find_visible_by_name("bob", "weather").unwrap().unwrap();
        assert_eq!(found.owner_id, "bob");
        assert_eq!(found.protocol_type, ProtocolType::A2a);
        let found = catalog.find_visible_by_name("carol", "weather").unwrap().unwrap();
        assert_eq!(found.owner_id, "alice");
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let catalog = catalog(ProtocolType::Misc);
        assert!(catalog.register_server(new_server("alice", " ")).await.is_err());
        let mut bad = new_server("alice", "weather");
        bad.endpoint = "not a url".into();
        assert!(matches!(
            catalog.register_server(bad).await,
            Err(RegistryError::Invalid(_))
        ));
    }
}

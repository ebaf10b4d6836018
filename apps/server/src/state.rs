use std::sync::Arc;

use dashmap::DashMap;
use servicehub_broker::SimulatedBrokerGateway;
use servicehub_core::{BrokerGateway, Namespace};
use servicehub_engine::{DlqMonitor, ReplayExecutor, RuleEngine};
use servicehub_query::DlqQueryService;
use servicehub_store::{CredentialStore, DlqStore, RuleStore};

use crate::config::ServerConfig;

/// Everything wired up for one registered namespace.
pub struct NamespaceRuntime {
    pub namespace: Namespace,
    pub gateway: Arc<dyn BrokerGateway>,
    pub monitor: Arc<DlqMonitor>,
    pub replay_executor: Arc<ReplayExecutor>,
}

pub struct AppState {
    pub config: ServerConfig,
    pub namespaces: DashMap<String, NamespaceRuntime>,
    pub credential_store: Arc<dyn CredentialStore>,
    pub dlq_store: Arc<dyn DlqStore>,
    pub rule_store: Arc<dyn RuleStore>,
    pub rule_engine: Arc<RuleEngine>,
    pub query_service: Arc<DlqQueryService>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        credential_store: Arc<dyn CredentialStore>,
        dlq_store: Arc<dyn DlqStore>,
        rule_store: Arc<dyn RuleStore>,
    ) -> Self {
        let rule_engine = Arc::new(RuleEngine::new(rule_store.clone()));
        let query_service = Arc::new(DlqQueryService::new(dlq_store.clone()));
        Self {
            config,
            namespaces: DashMap::new(),
            credential_store,
            dlq_store,
            rule_store,
            rule_engine,
            query_service,
        }
    }

    /// Wires a freshly registered namespace's in-memory gateway, monitor,
    /// and replay executor.
    pub fn mount_namespace(&self, namespace: Namespace) {
        let gateway: Arc<dyn BrokerGateway> = Arc::new(SimulatedBrokerGateway::new());
        let replay_executor = Arc::new(ReplayExecutor::new(gateway.clone(), self.dlq_store.clone()));
        let monitor = Arc::new(DlqMonitor::new(
            namespace.id.clone(),
            gateway.clone(),
            self.dlq_store.clone(),
            self.rule_engine.clone(),
            replay_executor.clone(),
            self.config.dlq_page_size,
        ));
        self.namespaces.insert(
            namespace.id.clone(),
            NamespaceRuntime {
                namespace,
                gateway,
                monitor,
                replay_executor,
            },
        );
    }
}

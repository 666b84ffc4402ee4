//! ServiceRegistry - 登録テーブル
//!
//! payload 型 → (work logic, 確定済み設定) の対応を起動時に明示的に登録します。
//!
//! # 不変条件
//! - サービス名は一意
//! - 1 つのキューを消費するサービスは 1 つだけ

use std::collections::HashMap;
use std::sync::Arc;

use super::message::Message;
use super::service::{CloudService, QueueService};
use crate::app::batch::BatchProcessor;
use crate::domain::{QueueName, QueueServiceSettings, ServiceSettings};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("service '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("queue '{queue}' is already consumed by service '{service}'")]
    QueueAlreadyConsumed { queue: QueueName, service: String },
}

#[derive(Default)]
pub struct ServiceRegistry {
    /// 登録順（ランタイムはこの順で巡回する）
    services: Vec<Arc<dyn CloudService>>,
    by_name: HashMap<String, usize>,
    by_queue: HashMap<QueueName, String>,
    routes: HashMap<String, QueueName>,
    overrides: HashMap<String, QueueServiceSettings>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings overrides from configuration, keyed by service name.
    ///
    /// 登録より前に設定しておくこと（設定は登録時に一度だけ確定する）。
    pub fn with_overrides(mut self, overrides: HashMap<String, QueueServiceSettings>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn register<T: Message, S: QueueService<T>>(
        &mut self,
        service: S,
    ) -> Result<&ServiceSettings, RegistryError> {
        let type_name = std::any::type_name::<S>();
        let attached = service.settings();
        let key = attached
            .service_name
            .clone()
            .unwrap_or_else(|| type_name.to_string());
        let attached = match self.overrides.get(&key) {
            Some(from_config) => attached.overridden_by(from_config),
            None => attached,
        };
        let settings = ServiceSettings::derive(T::queue_name(), type_name, &attached);

        let name = settings.service_name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        if let Some(existing) = self.by_queue.get(settings.queue_name()) {
            return Err(RegistryError::QueueAlreadyConsumed {
                queue: settings.queue_name().clone(),
                service: existing.clone(),
            });
        }

        self.by_queue
            .insert(settings.queue_name().clone(), name.clone());
        self.routes
            .insert(T::TYPE.to_string(), settings.queue_name().clone());
        self.by_name.insert(name, self.services.len());
        self.services
            .push(Arc::new(BatchProcessor::new(Arc::new(service), settings)));

        Ok(self.services[self.services.len() - 1].settings())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CloudService>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.services[i]))
    }

    pub fn services(&self) -> &[Arc<dyn CloudService>] {
        &self.services
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    /// `Message::TYPE` → consumed queue, for producers in the same worker.
    pub fn routes(&self) -> HashMap<String, QueueName> {
        self.routes.clone()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::app::batch::BatchContext;
    use crate::domain::{LeasedMessage, ServiceError};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Ping {
        pub n: u32,
    }

    impl Message for Ping {
        const TYPE: &'static str = "test.ping.v1";
    }

    pub struct PingService;

    #[async_trait]
    impl QueueService<Ping> for PingService {
        async fn start(
            &self,
            _ctx: &BatchContext<Ping>,
            _message: &LeasedMessage<Ping>,
        ) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    struct NamedPingService(&'static str);

    #[async_trait]
    impl QueueService<Ping> for NamedPingService {
        fn settings(&self) -> QueueServiceSettings {
            QueueServiceSettings::new()
                .service_name(self.0)
                .queue_name(format!("{}-queue", self.0))
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ServiceRegistry::new();
        let settings = registry.register::<Ping, _>(PingService).unwrap().clone();

        assert_eq!(settings.queue_name(), &Ping::queue_name());
        assert!(settings.service_name().ends_with("PingService"));
        assert!(registry.get(settings.service_name()).is_some());
        assert_eq!(registry.routes()[Ping::TYPE], Ping::queue_name());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ServiceRegistry::new();
        registry.register::<Ping, _>(NamedPingService("a")).unwrap();
        let result = registry.register::<Ping, _>(NamedPingService("a"));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(name)) if name == "a"));
    }

    #[test]
    fn one_consumer_per_queue() {
        let mut registry = ServiceRegistry::new();
        registry.register::<Ping, _>(PingService).unwrap();
        let second = registry.register::<Ping, _>(NamedPingService("b")).map(|_| ());
        // 別名・別キューなら共存できる
        assert!(second.is_ok());

        let mut registry = ServiceRegistry::new().with_overrides(HashMap::from([(
            "b".to_string(),
            QueueServiceSettings::new().queue_name("a-queue"),
        )]));
        registry.register::<Ping, _>(NamedPingService("a")).unwrap();
        let result = registry.register::<Ping, _>(NamedPingService("b"));
        assert!(matches!(
            result,
            Err(RegistryError::QueueAlreadyConsumed { service, .. }) if service == "a"
        ));
    }

    #[test]
    fn config_overrides_apply_at_registration() {
        let mut registry = ServiceRegistry::new().with_overrides(HashMap::from([(
            "a".to_string(),
            QueueServiceSettings::new().max_processing_trials(9),
        )]));
        let settings = registry.register::<Ping, _>(NamedPingService("a")).unwrap();
        assert_eq!(settings.max_processing_trials(), 9);
        assert_eq!(settings.queue_name().as_str(), "a-queue");
        assert_eq!(registry.registered_names(), vec!["a".to_string()]);
    }
}

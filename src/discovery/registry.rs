//! Service registry
//!
//! One process-wide address book for the cluster: storage nodes by id,
//! routing clients by id, and the single master. Registration is
//! last-writer-wins so a restarted service can re-register under its old id.

use crate::common::types::{ServiceDescriptor, ServiceKind};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    nodes: HashMap<u32, ServiceDescriptor>,
    clients: HashMap<u32, ServiceDescriptor>,
    master: Option<ServiceDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: ServiceDescriptor) {
        let mut inner = self.inner.lock().unwrap();
        info!(
            id = descriptor.id,
            kind = ?descriptor.kind,
            url = %descriptor.base_url(),
            "service registered"
        );
        match descriptor.kind {
            ServiceKind::Node => {
                inner.nodes.insert(descriptor.id, descriptor);
            }
            ServiceKind::Client => {
                inner.clients.insert(descriptor.id, descriptor);
            }
            ServiceKind::Master => {
                inner.master = Some(descriptor);
            }
        }
    }

    pub fn node(&self, id: u32) -> Option<ServiceDescriptor> {
        self.inner.lock().unwrap().nodes.get(&id).cloned()
    }

    pub fn nodes(&self) -> HashMap<u32, ServiceDescriptor> {
        self.inner.lock().unwrap().nodes.clone()
    }

    pub fn client(&self, id: u32) -> Option<ServiceDescriptor> {
        self.inner.lock().unwrap().clients.get(&id).cloned()
    }

    pub fn master(&self) -> Option<ServiceDescriptor> {
        self.inner.lock().unwrap().master.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: u32, kind: ServiceKind, port: u16) -> ServiceDescriptor {
        ServiceDescriptor {
            id,
            kind,
            host: "localhost".to_string(),
            port,
        }
    }

    #[test]
    fn test_register_and_lookup_by_kind() {
        let registry = Registry::new();
        registry.register(descriptor(1, ServiceKind::Node, 6001));
        registry.register(descriptor(1, ServiceKind::Client, 7001));
        registry.register(descriptor(0, ServiceKind::Master, 5000));

        assert_eq!(registry.node(1).unwrap().port, 6001);
        assert_eq!(registry.client(1).unwrap().port, 7001);
        assert_eq!(registry.master().unwrap().port, 5000);
        assert!(registry.node(2).is_none());
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = Registry::new();
        registry.register(descriptor(1, ServiceKind::Node, 6001));
        registry.register(descriptor(1, ServiceKind::Node, 6002));
        assert_eq!(registry.node(1).unwrap().port, 6002);
        assert_eq!(registry.nodes().len(), 1);
    }
}

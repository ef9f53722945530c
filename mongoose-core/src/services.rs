//! Service registry: capability-table-based injection, the explicit
//! stand-in for the Java original's reflection-discovered annotated setter
//! injection. A processor asks for a concrete service type by turbofish
//! rather than declaring an annotated field the runtime scans for.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{MongooseError, Result};

#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under its concrete type. A second registration
    /// of the same type replaces the first — later wiring wins, matching
    /// how a server rebuilds its service table on each configuration pass.
    pub fn register<T: Send + Sync + 'static>(&self, service: Arc<T>) {
        self.services.write().insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.services
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| {
                MongooseError::NoSource(format!(
                    "no service registered for type {}",
                    std::any::type_name::<T>()
                ))
            })?
            .downcast::<T>()
            .map_err(|_| MongooseError::InvalidState("service registered under a mismatched type"))
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.read().contains_key(&TypeId::of::<T>())
    }
}

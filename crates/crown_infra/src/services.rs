use crate::error::NodeError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::{type_name, Any, TypeId};

/// Typed lookup of the services a node exposes to the rest of the process.
///
/// Services are keyed by their type, usually an `Arc<dyn Trait>` or an
/// `Arc` of a concrete service. Each type can be registered once.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Returns
    ///
    /// [`NodeError::DuplicateService`] if a service of type `T` already exists.
    pub fn register<T>(&self, service: T) -> Result<(), NodeError>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.services.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(NodeError::DuplicateService(type_name::<T>())),
            Entry::Vacant(slot) => {
                slot.insert(Box::new(service));
                Ok(())
            }
        }
    }

    pub fn get<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|service| service.downcast_ref::<T>().cloned())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn clear(&self) {
        self.services.clear();
    }
}

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Kind of resource bound next to a uniform buffer's constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Sampler,
    StorageBuffer,
}

/// One resource slot declared by a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub binding: u32,
    pub kind: ResourceKind,
}

impl ResourceDescriptor {
    pub fn new(binding: u32, kind: ResourceKind) -> Self {
        Self { binding, kind }
    }
}

/// Shape of a uniform buffer: constant byte size plus the resources bound with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformBufferLayout {
    pub name: String,
    pub constant_buffer_size: u32,
    pub resources: Vec<ResourceDescriptor>,
}

impl UniformBufferLayout {
    pub fn new(name: impl Into<String>, constant_buffer_size: u32) -> Self {
        Self {
            name: name.into(),
            constant_buffer_size,
            resources: Vec::new(),
        }
    }

    /// Layout sized for one `T`.
    pub fn for_type<T: bytemuck::Pod>(name: impl Into<String>) -> Self {
        Self::new(name, std::mem::size_of::<T>() as u32)
    }

    pub fn with_resource(mut self, binding: u32, kind: ResourceKind) -> Self {
        self.resources.push(ResourceDescriptor::new(binding, kind));
        self
    }

    pub fn has_constants(&self) -> bool {
        self.constant_buffer_size > 0
    }
}

/// Non-owning reference to a texture, sampler or other bindable resource.
///
/// The uniform buffer only records what must be bound; the renderer keeps
/// the resource alive.
#[derive(Clone)]
pub struct ResourceRef {
    kind: ResourceKind,
    resource: Weak<dyn Any + Send + Sync>,
}

impl ResourceRef {
    pub fn new<T: Any + Send + Sync>(kind: ResourceKind, resource: &Arc<T>) -> Self {
        let resource: Arc<dyn Any + Send + Sync> = resource.clone();
        Self {
            kind,
            resource: Arc::downgrade(&resource),
        }
    }

    pub fn texture<T: Any + Send + Sync>(resource: &Arc<T>) -> Self {
        Self::new(ResourceKind::Texture, resource)
    }

    pub fn sampler<T: Any + Send + Sync>(resource: &Arc<T>) -> Self {
        Self::new(ResourceKind::Sampler, resource)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_alive(&self) -> bool {
        self.resource.strong_count() > 0
    }

    /// The resource, if it is still alive and is a `T`.
    pub fn upgrade<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resource.upgrade()?.downcast::<T>().ok()
    }

    pub fn ptr_eq(&self, other: &ResourceRef) -> bool {
        Weak::ptr_eq(&self.resource, &other.resource)
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRef")
            .field("kind", &self.kind)
            .field("alive", &self.is_alive())
            .finish()
    }
}

use std::{fmt, marker::PhantomData};

use altq_classifier::{FilterHandle, FlowFilter};
use altq_queue::{AttachMode, Registry};
use altq_wire::ClassHandle;
use tracing::debug;

use crate::{Classful, Jobs, Priq, Result};

/// Control plane for discipline `D` over the interfaces of a [`Registry`].
///
/// Mirrors the configuration requests of a discipline: attach and detach, enable, disable and
/// clear, class and filter management, and statistics.
pub struct Control<D> {
    registry: Registry,
    _disc: PhantomData<fn() -> D>,
}

/// PRIQ control plane.
pub type PriqControl = Control<Priq>;
/// JoBS control plane.
pub type JobsControl = Control<Jobs>;

impl<D> fmt::Debug for Control<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("discipline", &std::any::type_name::<D>())
            .field("registry", &self.registry)
            .finish()
    }
}

impl<D> Clone for Control<D> {
    fn clone(&self) -> Self {
        Self { registry: self.registry.clone(), _disc: PhantomData }
    }
}

impl<D: Classful> Control<D> {
    pub fn new(registry: Registry) -> Self {
        Self { registry, _disc: PhantomData }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates a discipline instance and attaches it to `ifname`, disabled.
    pub fn if_attach(&self, ifname: &str, options: D::Options) -> Result<()> {
        let disc = D::create(options)?;
        self.registry.attach(ifname, Box::new(disc), AttachMode::Exclusive)?;
        debug!(ifname, discipline = std::any::type_name::<D>(), "attached");
        Ok(())
    }

    /// Disables and detaches the discipline of `ifname`, destroying its classes and filters.
    pub fn if_detach(&self, ifname: &str) -> Result<()> {
        // Check the type before touching the queue state.
        self.registry.with_discipline::<D, _>(ifname, |_| ())?;
        self.registry.disable(ifname)?;
        let mut disc = self.registry.detach(ifname)?;
        if let Some(disc) = disc.as_any_mut().downcast_mut::<D>() {
            disc.clear();
        }
        debug!(ifname, "detached");
        Ok(())
    }

    pub fn enable(&self, ifname: &str) -> Result<()> {
        self.registry.with_discipline::<D, _>(ifname, |_| ())?;
        self.registry.enable(ifname)?;
        Ok(())
    }

    pub fn disable(&self, ifname: &str) -> Result<()> {
        self.registry.with_discipline::<D, _>(ifname, |_| ())?;
        self.registry.disable(ifname)?;
        Ok(())
    }

    /// Destroys every class and filter of the discipline on `ifname`.
    pub fn clear(&self, ifname: &str) -> Result<()> {
        self.registry.with_discipline::<D, _>(ifname, |d| d.clear())?;
        debug!(ifname, "cleared");
        Ok(())
    }

    pub fn add_class(&self, ifname: &str, options: D::ClassOptions) -> Result<ClassHandle> {
        self.registry.with_discipline::<D, _>(ifname, |d| d.add_class(options))?
    }

    pub fn modify_class(
        &self,
        ifname: &str,
        class: ClassHandle,
        options: D::ClassOptions,
    ) -> Result<()> {
        self.registry.with_discipline::<D, _>(ifname, |d| d.modify_class(class, options))?
    }

    pub fn delete_class(&self, ifname: &str, class: ClassHandle) -> Result<()> {
        self.registry.with_discipline::<D, _>(ifname, |d| d.delete_class(class))?
    }

    pub fn add_filter(
        &self,
        ifname: &str,
        class: ClassHandle,
        filter: FlowFilter,
    ) -> Result<FilterHandle> {
        self.registry.with_discipline::<D, _>(ifname, |d| d.add_filter(class, filter))?
    }

    pub fn delete_filter(&self, ifname: &str, filter: FilterHandle) -> Result<()> {
        self.registry.with_discipline::<D, _>(ifname, |d| d.delete_filter(filter))?
    }

    pub fn stats(&self, ifname: &str) -> Result<D::Stats> {
        Ok(self.registry.with_discipline::<D, _>(ifname, |d| d.stats())?)
    }
}

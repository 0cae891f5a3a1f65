use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use altq_common::{Clock, MonotonicClock};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::{
    AttachMode, Discipline, Error, Interface, InterfaceOptions, Result, TbrProfile,
};

/// Default period of the token-bucket timer.
const DEFAULT_TBR_TICK: Duration = Duration::from_millis(10);

/// Options for a [`Registry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Time source shared by every interface of the registry.
    clock: Arc<dyn Clock>,
    /// Period of the token-bucket timer.
    tbr_tick: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self { clock: Arc::new(MonotonicClock::default()), tbr_tick: DEFAULT_TBR_TICK }
    }
}

impl RegistryOptions {
    /// Sets the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the period at which the token-bucket timer restarts throttled interfaces.
    pub fn tbr_tick(mut self, tick: Duration) -> Self {
        self.tbr_tick = tick;
        self
    }
}

#[derive(Debug)]
struct Inner {
    interfaces: RwLock<FxHashMap<String, Arc<Interface>>>,
    options: RegistryOptions,
    timer_armed: AtomicBool,
}

/// The set of interfaces managed together. Cheap to clone; clones share state.
///
/// Registries are independent of each other: nothing is process-global.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

impl Registry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                interfaces: RwLock::new(FxHashMap::default()),
                options,
                timer_armed: AtomicBool::new(false),
            }),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.options.clock
    }

    /// Registers a new interface.
    pub fn create_interface(
        &self,
        name: impl Into<String>,
        options: InterfaceOptions,
    ) -> Result<Arc<Interface>> {
        let name = name.into();
        let mut interfaces = self.inner.interfaces.write();
        if interfaces.contains_key(&name) {
            return Err(Error::InterfaceExists(name));
        }

        let iface =
            Arc::new(Interface::new(name.clone(), options, Arc::clone(&self.inner.options.clock)));
        interfaces.insert(name.clone(), Arc::clone(&iface));
        debug!(ifname = %name, "created interface");
        Ok(iface)
    }

    /// Unregisters an interface. Its queue and discipline go away with the last reference.
    pub fn remove_interface(&self, name: &str) -> Result<Arc<Interface>> {
        let iface = self
            .inner
            .interfaces
            .write()
            .remove(name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_owned()))?;
        debug!(ifname = %name, "removed interface");
        Ok(iface)
    }

    pub fn interface(&self, name: &str) -> Result<Arc<Interface>> {
        self.inner
            .interfaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InterfaceNotFound(name.to_owned()))
    }

    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.inner.interfaces.read().values().cloned().collect()
    }

    pub fn attach(&self, name: &str, disc: Box<dyn Discipline>, mode: AttachMode) -> Result<()> {
        self.interface(name)?.with_queue(|q| q.attach(disc, mode))
    }

    pub fn detach(&self, name: &str) -> Result<Box<dyn Discipline>> {
        self.interface(name)?.with_queue(|q| q.detach())
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.interface(name)?.with_queue(|q| q.enable())
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.interface(name)?.with_queue(|q| q.disable())
    }

    /// Runs `f` on the discipline attached to `name`, which must be a `D`.
    pub fn with_discipline<D, R>(&self, name: &str, f: impl FnOnce(&mut D) -> R) -> Result<R>
    where
        D: Discipline,
    {
        self.interface(name)?.with_queue(|q| {
            let disc = q.discipline_mut().ok_or(Error::NotAttached)?;
            let found = disc.kind();
            let disc = disc.as_any_mut().downcast_mut::<D>().ok_or(Error::WrongDiscipline {
                expected: std::any::type_name::<D>(),
                found,
            })?;
            Ok(f(disc))
        })
    }

    /// Installs, replaces or (with a zero rate) removes the regulator of `name`.
    pub fn tbr_set(&self, name: &str, profile: TbrProfile) -> Result<()> {
        let iface = self.interface(name)?;
        let now = iface.now();
        iface.with_queue(|q| q.set_tbr(profile, now))?;

        if profile.rate == 0 {
            debug!(ifname = %name, "token bucket removed");
        } else {
            debug!(ifname = %name, rate = profile.rate, depth = profile.depth, "token bucket set");
            self.arm_tbr_timer();
        }
        Ok(())
    }

    /// The profile of the regulator of `name`, if one is installed.
    pub fn tbr_get(&self, name: &str) -> Result<Option<TbrProfile>> {
        Ok(self.interface(name)?.with_queue(|q| q.tbr().map(|t| t.profile())))
    }

    /// One token-bucket timer tick: restarts every regulated interface with queued packets.
    /// Returns the number of installed regulators.
    pub fn tbr_timeout(&self) -> usize {
        let mut active = 0;
        for iface in self.interfaces() {
            let backlogged = iface.with_queue(|q| q.tbr().map(|_| !q.is_empty()));
            match backlogged {
                Some(true) => {
                    active += 1;
                    iface.start();
                }
                Some(false) => active += 1,
                None => {}
            }
        }
        active
    }

    fn active_regulators(&self) -> usize {
        self.interfaces().iter().filter(|i| i.with_queue(|q| q.tbr().is_some())).count()
    }

    pub fn is_tbr_timer_armed(&self) -> bool {
        self.inner.timer_armed.load(Ordering::SeqCst)
    }

    fn arm_tbr_timer(&self) {
        if self.inner.timer_armed.swap(true, Ordering::SeqCst) {
            return;
        }

        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            self.inner.timer_armed.store(false, Ordering::SeqCst);
            warn!("no async runtime, token-bucket timer not armed; drive tbr_timeout manually");
            return;
        };

        let tick = self.inner.options.tbr_tick;
        let weak = Arc::downgrade(&self.inner);
        rt.spawn(tbr_timer(weak, tick));
        debug!(?tick, "token-bucket timer armed");
    }
}

/// Periodic token-bucket timer. Stops once no regulator is left or the registry is dropped.
async fn tbr_timer(registry: Weak<Inner>, tick: Duration) {
    loop {
        tokio::time::sleep(tick).await;

        let Some(inner) = registry.upgrade() else { return };
        let registry = Registry { inner };

        if registry.tbr_timeout() == 0 {
            registry.inner.timer_armed.store(false, Ordering::SeqCst);
            // A regulator may have been installed while the flag was still set.
            if registry.active_regulators() == 0
                || registry.inner.timer_armed.swap(true, Ordering::SeqCst)
            {
                debug!("token-bucket timer disarmed");
                return;
            }
        }
    }
}

//! Classful queueing disciplines for the altq framework.
//!
//! - [`Priq`]: strict priority queueing. The non-empty class with the highest priority is
//!   always served first.
//! - [`Jobs`]: Joint Buffer management and Scheduling. Per-class absolute and relative delay,
//!   loss and rate constraints are enforced by recomputing service rates and dropping packets
//!   on every enqueue.
//!
//! Both are driven through a [`Control`], which binds the discipline type to a
//! [`Registry`](altq_queue::Registry) of interfaces.

use std::fmt;

use altq_classifier::{FilterHandle, FlowFilter};
use altq_queue::Discipline;
use altq_wire::ClassHandle;
use thiserror::Error;

mod admission;
pub use admission::{Admission, DropTail};

mod control;
pub use control::{Control, JobsControl, PriqControl};

pub mod jobs;
pub use jobs::{Jobs, JobsClassOptions, JobsOptions};

pub mod priq;
pub use priq::{Priq, PriqClassOptions, PriqOptions};

mod table;

/// Default per-class queue limit, in packets.
pub const DEFAULT_QLIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid priority {pri}, must be below {max}")]
    InvalidPriority { pri: u8, max: usize },
    #[error("Priority {0} is already in use")]
    PriorityInUse(u8),
    #[error("Class not found")]
    ClassNotFound,
    #[error("A default class already exists")]
    DefaultClassExists,
    #[error("No default class configured")]
    NoDefaultClass,
    #[error("Invalid bandwidth: {0} bps")]
    InvalidBandwidth(u64),
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(&'static str),
    #[error("Classifier error: {0}")]
    Classifier(#[from] altq_classifier::Error),
    #[error("Queue error: {0}")]
    Queue(#[from] altq_queue::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A discipline made of prioritised classes, configured through the control plane.
pub trait Classful: Discipline + Sized {
    /// Interface-level parameters given at attach time.
    type Options: fmt::Debug;
    /// Per-class parameters.
    type ClassOptions: fmt::Debug;
    /// Snapshot returned by [`Classful::stats`].
    type Stats: fmt::Debug + Clone;

    fn create(options: Self::Options) -> Result<Self>;

    fn add_class(&mut self, options: Self::ClassOptions) -> Result<ClassHandle>;

    /// Reconfigures a class. The class queue is purged.
    fn modify_class(&mut self, class: ClassHandle, options: Self::ClassOptions) -> Result<()>;

    /// Destroys a class with its queue and every filter bound to it.
    fn delete_class(&mut self, class: ClassHandle) -> Result<()>;

    fn add_filter(&mut self, class: ClassHandle, filter: FlowFilter) -> Result<FilterHandle>;

    fn delete_filter(&mut self, filter: FilterHandle) -> Result<()>;

    /// Destroys every class and filter.
    fn clear(&mut self);

    fn stats(&self) -> Self::Stats;
}

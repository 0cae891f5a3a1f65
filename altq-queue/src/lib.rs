//! The discipline-attach framework.
//!
//! Every [`Interface`] owns an output queue ([`IfQueue`]) that is either a plain bounded FIFO
//! or, once a [`Discipline`] is attached and enabled, whatever that discipline implements. An
//! optional [`TokenBucket`] shapes the dequeue side of either. Interfaces live in a
//! [`Registry`], which also drives the periodic token-bucket timer.

use std::error::Error as StdError;

use thiserror::Error;

mod discipline;
pub use discipline::{Dequeue, DequeueOp, Discipline, DisciplineKind, DropReason, Enqueue};

mod ifqueue;
pub use ifqueue::{AttachMode, IfQueue, IFQ_MAXLEN};

mod interface;
pub use interface::{Interface, InterfaceOptions, StartFn};

mod registry;
pub use registry::{Registry, RegistryOptions};

mod stats;
pub use stats::PktCounter;

mod tbr;
pub use tbr::{TbrProfile, TbrStatus, TokenBucket};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Interface queue is not ready")]
    NotReady,
    #[error("A discipline is enabled on this interface")]
    Busy,
    #[error("A discipline is already attached to this interface")]
    AlreadyAttached,
    #[error("No discipline attached to this interface")]
    NotAttached,
    #[error("Attached discipline is {found}, expected {expected}")]
    WrongDiscipline { expected: &'static str, found: DisciplineKind },
    #[error("Unknown interface: {0}")]
    InterfaceNotFound(String),
    #[error("Interface already exists: {0}")]
    InterfaceExists(String),
    #[error("No token-bucket regulator installed")]
    NoRegulator,
    #[error("Invalid token-bucket profile: {0}")]
    InvalidProfile(&'static str),
    #[error("Discipline refused the operation: {0}")]
    Discipline(Box<dyn StdError + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;

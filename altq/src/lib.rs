#![doc(issue_tracker_base_url = "https://github.com/chainbound/altq-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use altq_classifier::{Classifier, FilterHandle, FlowFilter};
pub use altq_common::{constants, Clock, Fixed, Loss, ManualClock, MonotonicClock, Rate, Share};
pub use altq_disc::{
    jobs, priq, Admission, Classful, Control, DropTail, Jobs, JobsClassOptions, JobsControl,
    JobsOptions, Priq, PriqClassOptions, PriqControl, PriqOptions, DEFAULT_QLIMIT,
};
pub use altq_queue::{
    AttachMode, Dequeue, DequeueOp, Discipline, DisciplineKind, DropReason, Enqueue, IfQueue,
    Interface, InterfaceOptions, PktCounter, Registry, RegistryOptions, StartFn, TbrProfile,
    TbrStatus, TokenBucket, IFQ_MAXLEN,
};
pub use altq_wire::*;

/// Error types of the individual layers.
pub mod error {
    pub use altq_classifier::Error as ClassifierError;
    pub use altq_disc::Error as DisciplineError;
    pub use altq_queue::Error as QueueError;
}

//! The teacher/learner tree-reconciliation protocol (Section 4.4): a
//! recursive hash comparison that transmits only the subtrees where two
//! peers' merkle trees actually disagree. The teacher's side is a
//! synchronous depth-first walk; the learner's side pipelines its reads of
//! the teacher's lessons ahead of where its own recursive comparison has
//! got to, via a bounded "anticipated"/"received" queue pair.

pub mod custom_view;
pub mod learner;
pub mod message;
pub mod teacher;

pub use custom_view::{CustomViewRegistry, NoCustomViews};
pub use learner::Learner;
pub use message::{Lesson, Query};
pub use teacher::{TeachStats, Teacher};

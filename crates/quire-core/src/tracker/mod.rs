//! Per-project compilation tracking.
//!
//! A [`CompilationTracker`] turns a project record into a final compilation
//! through a small state machine:
//!
//! ```text
//! Empty ──> InProgress(pending actions) ──> AllTreesAssembled ──> Final
//!             ^                                                     │
//!             └──────────────── fork(action) ───────────────────────┘
//! ```
//!
//! Edits never touch a built compilation directly. Forking a tracker queues a
//! [`TranslationAction`], and the next build applies the queue in order to
//! the last draft.

mod actions;
mod compilation_tracker;
mod references;
mod skeleton;
mod state;

pub use actions::{ActionKind, TranslationAction};
pub use compilation_tracker::CompilationTracker;
pub use skeleton::{DeclarationSkeletonBuilder, SkeletonBuilder, SkeletonReferenceCache};
pub use state::{FinalState, TrackerState};

//! Shared domain types for the reactor coordination and reaction backplane.
//!
//! Every crate in the workspace that needs to talk about a mutation, a
//! subscription, or a document filter imports these types rather than
//! defining its own. Keeping them in one leaf crate avoids the
//! back-reference smell the daemon design notes warn about.

pub mod document;
pub mod filter;
pub mod jsonpath;
pub mod subscription;

pub use document::{Event, Mutation};
pub use filter::Filter;
pub use subscription::{
    DeliveryAttempt, ScheduleState, ScheduledJob, ScheduledView, ScriptSubscription,
    SubscriptionError, WebhookSubscription,
};

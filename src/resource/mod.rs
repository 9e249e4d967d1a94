mod events;
mod pending;
mod resource;

pub use events::{ListenerHandle, ResourceEvent, ResourceEventKind};
pub use pending::{PendingChange, PendingChanges};
pub use resource::{PropVals, Resource};

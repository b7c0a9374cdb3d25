//! Self-update: the session state machine, the coordinator that drives it
//! and the service that talks to the release server.

pub mod coordinator;
pub mod http;
pub mod service;
pub mod session;

pub use coordinator::{UpdateAction, UpdateCoordinator};
pub use http::{HttpUpdateService, ReleaseManifest, ReleaseVersion};
pub use service::{
    UpdateEventReceiver, UpdateEventSender, UpdateService, UpdateServiceError,
    UpdateServiceEvent, event_channel,
};
pub use session::{TransitionResult, UpdateEvent, UpdateSession, UpdateState};

//! Tower layers of the default transport
//!
//! - [`AbortLayer`] - Cancels requests through their abort signal
//! - [`UserAgentLayer`] - Adds a User-Agent header to requests without one
//! - [`SecureRedirectPolicy`] - Redirect policy honoring per-request redirect modes

mod abort;
mod redirect;
mod user_agent;

pub use abort::{AbortLayer, AbortService};
pub use redirect::SecureRedirectPolicy;
pub use user_agent::{UserAgentLayer, UserAgentService};

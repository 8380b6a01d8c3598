mod core;
mod store;

pub use self::core::{CoreSettings, SessionClient, SessionClosed, SessionCore, SessionEvent};
pub use self::store::{Attach, PlayRequest, PlayTag, SessionStore};

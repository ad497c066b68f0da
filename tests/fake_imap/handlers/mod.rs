//! IMAP command handlers for the fake server.
//!
//! Each handler lives in its own module and processes a single IMAP
//! command (CAPABILITY, LOGIN, LOGOUT, SELECT, FETCH, UID FETCH,
//! IDLE).

mod fetch;
mod login;

pub use capability::handle_capability;
pub use fetch::handle_fetch;
pub use idle::handle_idle;
pub use login::handle_login;
pub use logout::handle_logout;
pub use select::handle_select;
pub use uid_fetch::handle_uid_fetch;

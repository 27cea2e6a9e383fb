//! Session authentication core: signed identity cookies, sliding expiry and
//! double-submit CSRF protection. Keep the public surface thin and split
//! implementation across sub-modules.

mod cookies;
mod token;
mod csrf;
mod session;

pub use cookies::{CookiePolicy, parse_cookie};
pub use token::IdentityCodec;
pub use csrf::{CsrfGuard, CSRF_COOKIE, CSRF_HEADER, generate_token};
pub use session::{SessionManager, SESSION_COOKIE};

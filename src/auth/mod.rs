// Authentication module
// Credential sources, resolution, and session lifecycle

mod cookies;
mod resolver;
mod session;
mod storage;
mod types;

pub use cookies::{CookieJar, TOKEN_COOKIE};
pub use resolver::{synthesize_token, CredentialResolver, DEFAULT_TOKEN_FETCH_TIMEOUT};
pub use session::SessionManager;
pub use storage::{
    AuthStateStore, MemoryStorage, SqliteStorage, Storage, AUTH_TOKEN_KEY, COOKIE_KEY,
    PERSIST_ROOT_KEY,
};
pub use types::{AuthState, Credential, CredentialSource, UserRecord};

// blinkly-api: session, transport and wire types for the Blink cloud API

pub mod auth;
pub mod endpoints;
pub mod error;
pub mod models;
pub mod session;
pub mod transport;

pub use auth::{CredentialStore, LoginCredentials, LoginOutcome, SessionInfo, StoredCredential};
pub use endpoints::Endpoints;
pub use error::Error;
pub use models::{DeviceEntry, DeviceList, NetworkSnapshot};
pub use reqwest::Method;
pub use session::{SessionManager, SessionStatus};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, TlsMode, Transport, TransportConfig};

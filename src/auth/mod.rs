pub mod credentials;
pub mod jwt;

pub use credentials::{CredentialGate, User};
pub use jwt::TokenIssuer;

pub mod access_jwt;
pub mod claims;
pub mod credential;
pub mod factory;
pub mod jwks;

pub use access_jwt::{SigningKeys, TokenValidator, ValidationError};
pub use claims::Identity;
pub use credential::{IncomingCredential, token_fingerprint};
pub use factory::build_token_validator;
pub use jwks::JwksCache;

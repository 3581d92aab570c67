pub mod codec;

pub use codec::{derive_session_id, generate_client_token, TokenError};

//! Authentication boundary. Tokens are issued by the identity service; this
//! server only validates them and binds the subject to requests and connections.

pub mod jwt;
pub mod middleware;

pub mod errors;
pub mod ids;
pub mod text;

pub use errors::{ClientError, SendError};
pub use ids::{ConnectionId, Jid};

mod actor;
mod handlers;
pub mod response;
mod routes;

pub use actor::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use routes::create_router;

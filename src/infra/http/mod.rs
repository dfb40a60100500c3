mod admin;
pub mod api;
mod middleware;
mod public;

pub use admin::build_admin_router;
pub use api::{AdminToken, ApiState, build_api_router};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use public::{PublicState, build_public_router};

//! ---
//! cf_section: "05-routing"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Dynamic routing contract between the engine and the proxy."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
//! Each cluster owns at most one route, keyed by its id, forwarding
//! `/access/{id}/**` to the live host of its access instance.

pub mod access_path;
pub mod error;
pub mod router;
pub mod table;

pub use error::{Result, RoutingError};
pub use router::DynamicRouter;
pub use table::{RouteEntry, RoutingTable};

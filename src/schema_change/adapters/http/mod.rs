//! HTTP adapters.

mod control_plane;

pub use control_plane::HttpControlPlaneClient;

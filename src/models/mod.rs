mod configs;
mod devices;
mod jobs;
mod templates;
mod vpn;

pub use configs::*;
pub use devices::*;
pub use jobs::*;
pub use templates::*;
pub use vpn::*;

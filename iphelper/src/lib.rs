//! Address and route change notifications plus the IPv4 table calls of the
//! Windows IP Helper API.

pub mod abi;
pub mod api;
pub mod cancel;
pub mod change;
pub mod error;
pub mod event;
pub mod notify;
pub mod route;
#[cfg(target_os = "windows")]
pub mod system;
#[cfg(test)]
mod testing;

pub use api::ChangeKind;
pub use change::{ChangeEvent, ChangeNotify, Phase};

#[cfg(target_os = "windows")]
pub type IpChangeNotify = ChangeNotify<system::SystemApi>;

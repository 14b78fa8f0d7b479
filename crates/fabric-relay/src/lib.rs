//! `fabric-relay` — the central message router.
//!
//! Accepts device connections on a public WebSocket endpoint, authenticates
//! them (pylons by configured id + IP allowlist, apps by pool-allocated
//! index, viewers by share id), and fans every non-control frame out
//! according to the addressing rules.
//!
//! The router is factored as a pure reducer ([`reducer::reduce`]): given a
//! state snapshot and one connection event it returns a list of
//! [`reducer::Action`]s. The I/O layer in [`server`] is the only code that
//! writes sockets or mutates the client registry. All routing tests drive
//! the reducer and inspect actions.

pub mod allocator;
pub mod devices;
pub mod reducer;
pub mod server;
pub mod state;

pub use allocator::IndexAllocator;
pub use devices::{DeviceEntry, DeviceTable, FileShares, ShareValidator, StaticShares};
pub use reducer::{reduce, Action, ClientEvent, ReduceCtx};
pub use server::{build_router, serve, serve_on, RelayConfig, RelayState};
pub use state::{Client, ClientId, ClientUpdate, Clients};

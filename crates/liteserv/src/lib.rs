//! LiteServ lifecycle supervisor
//!
//! Downloads, installs, starts, verifies and stops a LiteServ test server on
//! one of five deployment targets, so functional tests can run against a
//! known build at a known endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  TestServerFactory                                        │
//! │    validate(ServerSpec) -> ServerTarget                   │
//! │    create(ServerSpec)   -> Box<dyn PlatformBackend>       │
//! ├───────────────────────────────────────────────────────────┤
//! │  LifecycleSupervisor                                      │
//! │    start(log) -> url        stop()       run_scoped()     │
//! │      ├── PlatformBackend    download/install/start/stop   │
//! │      ├── ReachabilityPoller poll/wait_until_unreachable   │
//! │      └── reconcile()        expected vs reported build    │
//! ├───────────────────────────────────────────────────────────┤
//! │  Backends                                                 │
//! │    LocalProcessBackend   macOS binary, .NET under mono    │
//! │    MobileAppBackend      Android (adb), iOS (simctl)      │
//! │    RemoteServiceBackend  Windows host via playbooks       │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod bridge;
pub mod config;
pub mod download;
pub mod factory;
pub mod poller;
pub mod provision;
pub mod supervisor;

pub use backend::{LocalProcessBackend, MobileAppBackend, PlatformBackend, RemoteServiceBackend};
pub use config::HarnessConfig;
pub use factory::{Capabilities, TestServerFactory};
pub use poller::ReachabilityPoller;
pub use supervisor::LifecycleSupervisor;

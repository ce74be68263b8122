//! # pointhub-server
//!
//! HTTP and WebSocket front end for the pointhub point-data hub.
//!
//! ## Endpoints
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | `POST` | `/api/v1/points/batch` | Current values for a list of IDs |
//! | `GET` | `/api/v1/points?prefix=P` | Every point whose ID starts with `P` |
//! | `POST` | `/api/v1/control` | Write a value through the owning driver |
//! | `POST` | `/api/v1/drivers/:driver/reports` | Push value reports for a driver |
//! | `GET` | `/health` | Liveness and counts |
//! | `GET` | `/ws` | WebSocket: `SUBSCRIBE <prefix>`, `UNSUBSCRIBE <prefix>`, `PING` |

pub mod api;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};

//! fipa-agency library root.

pub mod agency;
pub mod agent;
pub mod audit;
pub mod behavior;
pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod web;

pub use agency::{Agency, AgencyInfo};
pub use agent::{Agent, AgentInfo, AgentTask};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{Acl, AgencyContext, AgencyRouter};
pub use error::{Error, Result};
pub use protocol::{AclMessage, Performative, Protocol};
pub use web::run_server;

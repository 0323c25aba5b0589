//! Configuration store
//!
//! Typed reads and writes over the tables created by the schema migrations:
//! Config rows keyed by (KEY, COMPONENT), and driver instances with their
//! dials, plans and services.

mod config;
mod instances;
mod model;

pub use config::ConfigStore;
pub use instances::InstanceStore;
pub use model::{
    parse_uaa_auth, BrokerApi, BrokerConfiguration, CatalogService, CloudController, Component,
    ConfigEntry, Credentials, DashboardClient, Dial, Instance, ManagementApi, Plan, RoutesRegister,
    UaaAuth,
};

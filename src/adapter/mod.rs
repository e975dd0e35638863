//! Concrete resource apply ports.

mod command;

pub use command::{CommandApplyPort, ENV_KIND, ENV_OPERATION_ID, ENV_RESOURCE_TYPE};

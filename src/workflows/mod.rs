//! Top-level operations built on the pool, batch and poll primitives
//!
//! - `deploy` - converge N releases on the delivery service in parallel
//! - `validate` - run one command across N instances and wait for each result

pub mod deploy;
pub mod validate;

pub use deploy::{converge_release, ReleaseDeployer, ReleaseTarget};
pub use validate::{run_instance_command, InstanceValidator, ValidationTarget};

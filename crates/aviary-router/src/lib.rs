pub mod router;
pub mod spam;
pub mod tenant;
pub mod wait_group;

pub use router::{PersonalityLoader, Router, RouterDeps};
pub use spam::{SpamCheck, SpamRecord};
pub use tenant::TenantResources;
pub use wait_group::WaitGroup;

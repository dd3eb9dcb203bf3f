pub mod attributes;
pub mod organization;
pub mod system;
pub mod user;

pub use attributes::{AttributeError, AttributePatch, CompanyProfile, OrgAttributes, OrgProfile, SystemFields};
pub use organization::{OrgNode, Organization};
pub use system::System;
pub use user::{username_from_email, User};

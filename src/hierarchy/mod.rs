//! Organization tree traversal and access resolution

pub mod cache;
pub mod resolver;
pub mod tree;

pub use cache::HierarchyCache;
pub use resolver::HierarchyResolver;
pub use tree::OrgTree;

pub mod bulk;
pub mod core;
pub mod hierarchy;
pub mod ordering;
pub mod selection;
pub mod setup;
pub mod tabular;

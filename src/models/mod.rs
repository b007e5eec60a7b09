pub mod activity;
pub mod blacklist;
pub mod proxy;

pub use activity::*;
pub use blacklist::*;
pub use proxy::*;

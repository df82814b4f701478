mod list;
mod restore;

pub use list::list;
pub use restore::restore;

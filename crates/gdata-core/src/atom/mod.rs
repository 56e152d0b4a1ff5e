//! Atom elements shared by feeds and entries.

mod author;
mod category;
mod generator;
mod link;

pub use author::Author;
pub use category::Category;
pub use generator::Generator;
pub use link::{Link, rel};

pub mod pipeline;
pub mod screenshot;
pub mod traits;
pub mod types;
pub mod view_tree;

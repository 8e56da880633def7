pub mod compare;
pub mod load;
pub mod normalize;
pub mod setup;
pub mod ui;

mod lane;
pub use lane::Lane;

pub mod document;
pub mod error;
pub mod geometry;
pub mod model;
pub mod page;
pub mod raster;

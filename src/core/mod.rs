//! Core module: dictionary analysis, layer parameters, shrinkage and the
//! LISTA network.

pub mod dictionary;
pub mod lasso;
pub mod layer;
pub mod lista;
pub mod shrink;

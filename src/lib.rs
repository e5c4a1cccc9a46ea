pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod lineage;
pub mod matrix;
pub mod mtx;
pub mod ontology;
pub mod output;
pub mod pipeline;
